// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Tracing initialization. A scoped-down version of the layer-composition approach in
//! the reference codebase's tracing setup: this crate has no terminal output surface, so
//! only an `EnvFilter`-gated `fmt` layer is composed, not a custom colorizing formatter.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global `tracing` subscriber reading its filter directives from `RUST_LOG`,
/// falling back to `default_directive` (e.g. `"warn"`) when unset. Idempotent: a second
/// call after one has already succeeded elsewhere in the process is a silent no-op.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive.to_owned()));
    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_does_not_panic_when_called_twice() {
        init_tracing("warn");
        init_tracing("debug");
    }
}
