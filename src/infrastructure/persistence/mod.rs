//! Visitor store backends

mod dual;
mod redis;
mod session;

pub use dual::DualUserStore;
pub use redis::{LookupFn, RedisUserStore};
pub use session::SessionUserStore;
