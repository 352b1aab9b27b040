//! Execution context threaded through the orchestrator and worktree manager.
//!
//! Replaces process-wide globals: cancellation state and the tracing span that
//! scopes log output travel together in one cloneable value.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::{Span, info, warn};

/// Cloneable handle shared by everything that must observe a shutdown request.
#[derive(Debug, Clone)]
pub struct ExecContext {
    shutdown: Arc<AtomicBool>,
    span: Span,
}

impl ExecContext {
    /// Context logging into `span`.
    pub fn new(span: Span) -> Self {
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            span,
        }
    }

    /// Context that is never cancelled by a signal (tests, library callers).
    pub fn detached() -> Self {
        Self::new(Span::none())
    }

    /// Route Ctrl-C to [`ExecContext::request_shutdown`].
    ///
    /// A second signal exits the process immediately.
    pub fn install_signal_handler(&self) -> Result<()> {
        let ctx = self.clone();
        ctrlc::set_handler(move || {
            if ctx.is_shutdown_requested() {
                warn!("second interrupt, exiting immediately");
                std::process::exit(crate::exit_codes::INTERRUPTED);
            }
            ctx.request_shutdown();
        })
        .context("install interrupt handler")
    }

    pub fn request_shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            let _entered = self.span.enter();
            info!("shutdown requested; stopping after the current task");
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Span that scopes log output for this run.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::detached()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_is_shared_between_clones() {
        let ctx = ExecContext::detached();
        let clone = ctx.clone();
        assert!(!clone.is_shutdown_requested());
        ctx.request_shutdown();
        assert!(clone.is_shutdown_requested());
    }
}
