//! Persistence domain - Per-visitor key/value storage

mod repository;

pub use repository::UserStore;
