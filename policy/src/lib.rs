//! vspace-policy: per-service admission policy for binder interception.
//!
//! Two layers per service: an allow/block bit, then an optional caller
//! supplied predicate over the parsed transaction. Absence of an entry means
//! allow: the engine fails open for services it has no opinion about.

mod store;

pub use store::{PolicyStore, TransactionFilter, Verdict, DEFAULT_ALLOWED, DEFAULT_BLOCKED};
