//! Process signals.
//!
//! * Ctrl-C (SIGINT) and SIGTERM stop the engine
//! * SIGHUP replaces the browser session, for example after the account was
//!   logged out elsewhere (Unix only)
//!
//! # Example
//!
//! ```no_run
//! use jukebox::signal::{Handler, Signal};
//!
//! async fn example() {
//!     let mut signals = Handler::new().unwrap();
//!
//!     loop {
//!         match signals.recv().await {
//!             Signal::Reinitialize => println!("replacing browser session"),
//!             signal => {
//!                 println!("{signal}: stopping");
//!                 break;
//!             }
//!         }
//!     }
//! }
//! ```

use std::{fmt, future::Future, io};

use crate::error::Result;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// A received signal.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Signal {
    /// Ctrl-C (SIGINT)
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGHUP
    Reinitialize,
}

impl Signal {
    /// Whether the process should exit.
    #[must_use]
    pub fn is_shutdown(self) -> bool {
        matches!(self, Self::Interrupt | Self::Terminate)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => f.write_str("Ctrl+C"),
            Self::Terminate => f.write_str("SIGTERM"),
            Self::Reinitialize => f.write_str("SIGHUP"),
        }
    }
}

/// Listener for the signals the engine reacts to. On platforms other than
/// Unix only Ctrl-C is delivered.
pub struct Handler {
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sighup: tokio::signal::unix::Signal,
}

impl Handler {
    /// Registers the listeners.
    ///
    /// # Errors
    ///
    /// Returns error if signal handlers cannot be registered.
    pub fn new() -> Result<Self> {
        #[cfg(unix)]
        {
            Ok(Self {
                sigterm: signal(SignalKind::terminate())?,
                sighup: signal(SignalKind::hangup())?,
            })
        }

        #[cfg(not(unix))]
        Ok(Self {})
    }

    /// Waits for the next signal.
    pub async fn recv(&mut self) -> Signal {
        #[cfg(unix)]
        {
            tokio::select! {
                () = interrupted(tokio::signal::ctrl_c()) => Signal::Interrupt,
                _ = self.sigterm.recv() => Signal::Terminate,
                _ = self.sighup.recv() => Signal::Reinitialize,
            }
        }

        #[cfg(not(unix))]
        {
            interrupted(tokio::signal::ctrl_c()).await;
            Signal::Interrupt
        }
    }
}

/// Completes when `listener` reports Ctrl-C. A listener that fails never
/// completes.
async fn interrupted<F>(listener: F)
where
    F: Future<Output = io::Result<()>>,
{
    if let Err(e) = listener.await {
        error!("unable to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
