//! Infrastructure services

mod experiment_service;

pub use experiment_service::{AbTestResult, ExperimentService, VisitorScope};
