//! riskwatch: longitudinal clinical records in, 90-day deterioration risk out.
//!
//! The crate is laid out by stage. `features` turns raw observations into an
//! engineered longitudinal frame and per-patient snapshots, `model` trains and
//! explains the candidate classifiers, and `clinical` turns a prediction into
//! trends, recommendations and cohort summaries. `session::RiskPipeline` ties
//! the stages together behind the operations a service layer calls.

pub mod config;
pub mod error;
pub mod report;
pub mod session;
pub mod source;
pub mod stats;
pub mod types;

#[path = "../features/mod.rs"]
pub mod features;

#[path = "../model/mod.rs"]
pub mod model;

#[path = "../clinical/mod.rs"]
pub mod clinical;

pub use error::{ErrorKind, ErrorReport, PipelineError};
pub use session::RiskPipeline;
