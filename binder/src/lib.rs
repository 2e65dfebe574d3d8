//! vspace-binder: the binder driver surface shared across the engine.
//!
//! Control-command encodings, object-tag constants, transaction parsing and
//! the service-name heuristic live here so the interceptor and the policy
//! layer agree on one definition of "a binder transaction".

pub mod device;
pub mod ioctl;
pub mod transaction;

pub use transaction::{ParseError, Transaction};
