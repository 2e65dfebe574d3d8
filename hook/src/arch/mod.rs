//! Architecture-specific jump synthesis.
//!
//! Both emitters are compiled everywhere (they only produce bytes); the
//! `native` alias picks the variant matching the build target. Executing
//! patched code is only meaningful on the matching ISA; foreign hosts can
//! still exercise byte-level behavior.

pub mod aarch32;
pub mod aarch64;

#[cfg(target_arch = "arm")]
pub use aarch32 as native;
#[cfg(not(target_arch = "arm"))]
pub use aarch64 as native;
