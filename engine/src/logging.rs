//! Tracing setup for binaries embedding this engine. The engine itself only
//! ever calls into `tracing`'s macros directly (see `ceremony_runner.rs`'s
//! `info_span!` usage in the teacher) — it never configures a global
//! subscriber on its own, since that's a process-wide decision that belongs
//! to whatever binary links us in.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a JSON-free, env-filterable subscriber. Call once, from `main`.
pub fn init_default_subscriber() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(true).init();
}
