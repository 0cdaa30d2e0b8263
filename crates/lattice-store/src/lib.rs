//! Rule store access for the Lattice platform.
//!
//! This crate owns everything between the validation engine and the external
//! vector-similarity store:
//! - [`RuleStore`] — the async store contract, with an HTTP implementation
//!   ([`HttpRuleStore`]) and an in-memory double ([`InMemoryRuleStore`]) for
//!   tests and offline runs
//! - [`RuleCache`] — the provenance-verifying cache; only rules with complete
//!   metadata are ever stored, and provenance is re-checked on every read
//! - [`CircuitBreaker`] — generic Closed/Open/HalfOpen gate wrapped around any
//!   external call

pub mod breaker;
pub mod cache;
pub mod client;
pub mod memory;

pub use breaker::{BreakerConfig, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use cache::{CachePutOutcome, CacheStats, RuleCache};
pub use client::{HttpRuleStore, QueryFilters, RuleStore};
pub use memory::InMemoryRuleStore;
