//! # hermod-state
//!
//! Durable per-agent key/value state and the primitives built directly on
//! it. The one rule everything here follows: a key touched by more than
//! one writer is only ever mutated through an atomic check-and-set against
//! the last value the writer read, retried from a fresh snapshot on
//! conflict. [`lock::TemporalLock`] and [`tokens::TokenStore`] are the two
//! in-tree consumers of that discipline.

pub mod error;
pub mod lock;
pub mod memory;
pub mod store;
pub mod tokens;

pub use error::{StoreError, StoreResult};
pub use lock::{LockConfig, TemporalLock};
pub use memory::MemoryStore;
pub use store::{read_as, update, AgentStore, StateValue};
pub use tokens::{IssuedToken, TokenConfig, TokenStore};
