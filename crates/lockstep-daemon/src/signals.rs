//! Signal handling for graceful daemon shutdown.
//!
//! Provides Unix signal handling (SIGTERM, SIGINT) for clean shutdown
//! of the lockstep daemon. Signal handlers set static atomic flags; a
//! poll thread translates them into a raised stop flag, which every
//! worker and the scheduler observe without blocking.

use lockstep_runtime::SharedFlag;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Signal types that the daemon handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM - Graceful termination request.
    Terminate,
    /// SIGINT - Interrupt (Ctrl+C).
    Interrupt,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Interrupt => write!(f, "SIGINT"),
        }
    }
}

/// Shared state for signal handling.
///
/// Shared between the poll thread and the main loop. All fields use
/// atomic operations for thread-safe access.
#[derive(Debug, Default)]
pub struct SignalState {
    /// Set to true when a shutdown signal is received.
    shutdown_requested: AtomicBool,
    /// Count of signals received (for diagnostics).
    signal_count: AtomicU32,
    /// The most recent signal received (0 = none).
    last_signal: AtomicU32,
}

impl SignalState {
    /// Create a new signal state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Relaxed)
    }

    /// Request shutdown (can be called from any thread).
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Relaxed);
    }

    /// Record a signal.
    fn record_signal(&self, kind: SignalKind) {
        self.signal_count.fetch_add(1, Ordering::Relaxed);
        self.last_signal.store(kind as u32 + 1, Ordering::Relaxed);
    }

    /// Get the total number of signals received.
    pub fn signal_count(&self) -> u32 {
        self.signal_count.load(Ordering::Relaxed)
    }

    /// The most recent signal received, if any.
    pub fn last_signal(&self) -> Option<SignalKind> {
        match self.last_signal.load(Ordering::Relaxed) {
            1 => Some(SignalKind::Terminate),
            2 => Some(SignalKind::Interrupt),
            _ => None,
        }
    }
}

/// Handle for signal management.
///
/// Holds the shared state and the stop flag the run observes.
#[derive(Clone)]
pub struct SignalHandler {
    state: Arc<SignalState>,
    stop: Arc<SharedFlag>,
}

impl SignalHandler {
    /// Create a signal handler bound to `stop` and register handlers.
    ///
    /// On Unix systems, this registers handlers for SIGTERM and SIGINT.
    /// On other platforms, only shutdown requests through the shared
    /// state are observed. Either path raises `stop`.
    pub fn new(stop: Arc<SharedFlag>) -> std::io::Result<Self> {
        let handler = Self {
            state: Arc::new(SignalState::new()),
            stop,
        };

        #[cfg(unix)]
        handler.register_unix_handlers()?;

        Ok(handler)
    }

    /// Register Unix signal handlers.
    #[cfg(unix)]
    fn register_unix_handlers(&self) -> std::io::Result<()> {
        use std::os::raw::c_int;

        // Signal handlers must be async-signal-safe, so they only touch
        // static atomics. A poll thread does the rest.
        static TERM_FLAG: AtomicBool = AtomicBool::new(false);
        static INT_FLAG: AtomicBool = AtomicBool::new(false);

        let state = Arc::clone(&self.state);
        let stop = Arc::clone(&self.stop);

        std::thread::spawn(move || loop {
            if TERM_FLAG.swap(false, Ordering::Relaxed) {
                info!(signal = %SignalKind::Terminate, "Shutdown signal received");
                state.record_signal(SignalKind::Terminate);
                state.request_shutdown();
            }
            if INT_FLAG.swap(false, Ordering::Relaxed) {
                info!(signal = %SignalKind::Interrupt, "Shutdown signal received");
                state.record_signal(SignalKind::Interrupt);
                state.request_shutdown();
            }
            if state.shutdown_requested() {
                stop.raise();
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        });

        unsafe {
            libc::signal(libc::SIGTERM, sigterm_handler as libc::sighandler_t);
            libc::signal(libc::SIGINT, sigint_handler as libc::sighandler_t);
        }

        extern "C" fn sigterm_handler(_: c_int) {
            TERM_FLAG.store(true, Ordering::Relaxed);
        }

        extern "C" fn sigint_handler(_: c_int) {
            INT_FLAG.store(true, Ordering::Relaxed);
        }

        debug!("Unix signal handlers registered");
        Ok(())
    }

    /// Check if shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.state.shutdown_requested()
    }

    /// Get the signal state for inspection.
    pub fn state(&self) -> &SignalState {
        &self.state
    }
}
