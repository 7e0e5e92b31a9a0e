//! Domain layer - Core types, contracts and errors

pub mod error;
pub mod experiment;
pub mod persistence;
pub mod store;

pub use error::DomainError;
