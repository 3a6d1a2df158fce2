//! Process-wide `tracing` subscriber setup.
//!
//! Called once from `domainwatch::main`. Level is driven by `RUST_LOG`
//! (standard `EnvFilter` syntax, e.g. `domainwatch=debug,info`); falls back
//! to `info` in release builds and `debug` in debug builds. Set
//! `LOG_FORMAT=json` for structured output suitable for log shipping.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let default_directive = if cfg!(debug_assertions) { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
