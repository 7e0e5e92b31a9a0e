//! Store domain - Shared key-value store abstraction

mod repository;

pub use repository::{Store, StoreExt, StoreOp, StoreValue};

#[cfg(test)]
pub use repository::MockStore;
