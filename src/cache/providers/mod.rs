//! External cache tier implementations

pub mod noop;
pub mod postgres;

pub use noop::NoOpCacheService;
pub use postgres::PgCacheService;
