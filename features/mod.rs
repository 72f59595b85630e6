//! Longitudinal frame, imputation, feature engineering and snapshot construction.

pub mod aggregate;
pub mod encode;
pub mod engineer;
pub mod frame;
pub mod impute;
pub mod indicators;
pub mod prune;
pub mod rolling;
pub mod snapshot;
