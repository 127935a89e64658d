//! Recurring remote invocations.

pub mod cache;
pub mod registry;
pub mod task;

pub use cache::{CacheConfig, CachedResult, ResultCache};
pub use registry::RepeatRegistry;
pub use task::RepeatTask;
