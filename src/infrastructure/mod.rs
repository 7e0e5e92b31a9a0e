//! Infrastructure layer - Store backends, visitor stores and the experiment engine

pub mod engine;
pub mod logging;
pub mod persistence;
pub mod services;
pub mod store;
