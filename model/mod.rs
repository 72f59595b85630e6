pub mod artifact;
pub mod classifier;
pub mod ensemble;
pub mod explain;
pub mod linear;
pub mod metrics;
pub mod select;
pub mod tree;
