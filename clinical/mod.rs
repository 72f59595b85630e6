pub mod cohort;
pub mod recommend;
pub mod trends;
