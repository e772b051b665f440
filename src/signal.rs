//! Process signals.
//!
//! Ctrl-C and SIGTERM stop playback and end the process. SIGHUP asks for
//! an immediate look-ahead download and device queue alignment pass, for
//! when the speaker's queue was edited from another controller. Only
//! Ctrl-C is available on Windows.

use std::fmt;

use crate::error::Result;

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal as UnixSignal, SignalKind};

/// Signal received by the process.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Signal {
    /// Interrupt signal (Ctrl-C/SIGINT)
    Interrupt,
    /// Termination signal (SIGTERM)
    Terminate,
    /// Resynchronization signal (SIGHUP)
    Resync,
}

/// Listens for Ctrl-C, SIGTERM and SIGHUP.
pub struct Handler {
    #[cfg(unix)]
    sigterm: UnixSignal,
    #[cfg(unix)]
    sighup: UnixSignal,
}

impl Handler {
    /// Creates a new signal handler.
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
                _ = tokio::signal::ctrl_c() => Signal::Interrupt,
                _ = self.sigterm.recv() => Signal::Terminate,
                _ = self.sighup.recv() => Signal::Resync,
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await;
            Signal::Interrupt
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Interrupt => write!(f, "Ctrl+C"),
            Signal::Terminate => write!(f, "SIGTERM"),
            Signal::Resync => write!(f, "SIGHUP"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(Signal::Interrupt.to_string(), "Ctrl+C");
        assert_eq!(Signal::Resync.to_string(), "SIGHUP");
    }
}
