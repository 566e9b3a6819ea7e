//! rune-bundle - OCI bundle lifecycle management for Rune
//!
//! Creates, locates and deletes the on-disk bundles a low-level container
//! runtime is started from. It provides:
//!
//! - Crash-consistent bundle creation with full rollback on failure
//! - Idempotent deletion that never removes a still-mounted rootfs
//! - Atomic (rename-then-delete) directory removal
//! - Bounded capture of shim panic logs
//! - Lifecycle event publication through a pluggable notifier

pub mod bundle;
pub mod config;
pub mod error;
pub mod events;
pub mod fs;
pub mod identifiers;
pub mod mount;
pub mod namespaces;

pub use bundle::{Bundle, BundleManager};
pub use config::ManagerConfig;
pub use error::{BundleError, Result};
pub use events::{Envelope, EventExchange, LifecycleNotifier};
pub use namespaces::Context;
