//! Shutdown requests from SIGINT/SIGTERM.

use log::warn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set once the process is asked to stop, sources poll it between reads.
#[derive(Debug, Clone)]
pub struct ShutdownFlag {
    flag: Arc<AtomicBool>,
}

impl ShutdownFlag {
    /// Creates the flag and registers the Ctrl+C / termination handler.
    pub fn new() -> Self {
        let shutdown = Self::manual();
        let flag = shutdown.flag.clone();

        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
            warn!("Unable to register the shutdown handler, final report will only follow end of input: {}", e);
        }

        shutdown
    }

    /// A flag without any signal handler, only `trigger` sets it.
    pub fn manual() -> Self {
        ShutdownFlag { flag: Arc::new(AtomicBool::new(false)) }
    }

    #[cfg(test)]
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_flag_is_shared_between_clones() {
        let shutdown = ShutdownFlag::manual();
        let observer = shutdown.clone();

        assert!(!observer.is_triggered());
        shutdown.trigger();
        assert!(observer.is_triggered());
    }
}
