//! Bounded retry of remote calls.
//!
//! [`Retry::run`] re-runs a call until it succeeds or the attempts are used
//! up. A rejected token is repaired by refreshing that kind of token before
//! the next attempt. Errors that no retry can fix propagate at once, and
//! exhaustion returns the last error unchanged.
//!
//! # Example
//!
//! ```rust
//! let api = &*api;
//! let devices = retry.run(TokenKind::Official, || api.devices()).await?;
//! ```

use std::{future::Future, sync::Arc};

use crate::{
    credentials::{Credentials, TokenKind},
    error::{ErrorKind, Result},
};

/// Retry wrapper for calls authenticated with one kind of token.
#[derive(Clone)]
pub struct Retry {
    credentials: Arc<Credentials>,
    attempts: u32,
}

impl Retry {
    /// Creates a wrapper making at most `attempts` attempts per call.
    #[must_use]
    pub fn new(credentials: Arc<Credentials>, attempts: u32) -> Self {
        Self {
            credentials,
            attempts: attempts.max(1),
        }
    }

    /// Runs `task` until it succeeds or the attempts are used up.
    ///
    /// # Errors
    ///
    /// * The error of the last attempt when all attempts failed
    /// * Non-retryable errors of any attempt
    /// * `Auth` errors from refreshing a rejected token
    pub async fn run<T, F, Fut>(&self, kind: TokenKind, mut task: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut remaining = self.attempts;
        loop {
            let e = match task().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            remaining -= 1;
            if remaining == 0 || !e.is_retryable() {
                return Err(e);
            }

            if e.kind == ErrorKind::Unauthorized {
                debug!("{kind} token rejected, refreshing before retry");
                self.credentials.refresh(kind).await?;
            } else {
                debug!("retrying after {e} ({remaining} attempts left)");
            }
        }
    }
}
