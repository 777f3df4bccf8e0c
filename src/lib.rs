pub mod config;
pub mod dashboard;
pub mod errors;
pub mod steps;
pub mod workflow;
