//! # Two-Tier Cache Module
//!
//! Generic TTL key/value cache with a durable external tier and a bounded
//! in-process fallback tier.
//!
//! ## Architecture
//!
//! ```text
//! TwoTierCache<S: CacheService>
//!   ├── external: S                 <- CacheBackend enum dispatch by default
//!   │     ├── Postgres(PgCacheService)
//!   │     └── NoOp(NoOpCacheService)
//!   ├── local: LocalCache           <- DashMap with absolute expiry
//!   └── circuit_breaker (optional)  <- skips the external tier while open
//! ```
//!
//! ## Design Decisions
//!
//! - **Reads never fail**: external misses and errors fall through to the local map
//! - **Best-effort writes**: external write errors are logged, the local map is always updated
//! - **Calendar TTLs**: "once per day per key" is expressed with [`daily_key`], not the TTL

pub mod errors;
pub mod local;
pub mod provider;
pub mod providers;
pub mod traits;

pub use errors::{CacheError, CacheResult};
pub use local::{CacheEntry, LocalCache, MAX_LOCAL_TTL};
pub use provider::{daily_key, today_key, CacheBackend, TwoTierCache};
pub use providers::{NoOpCacheService, PgCacheService};
pub use traits::{CacheService, CachedValue};
