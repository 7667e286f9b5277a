//! Serialized access to the shared browser session.
//!
//! The browser session is one stateful resource: interleaving two flows on
//! it corrupts both. The [`Channel`] owns the session and runs submitted
//! tasks one at a time, in the order they were submitted.
//!
//! # Recovery
//!
//! Browser sessions fail in two ways: a transient glitch in the page, fixed
//! by trying again, or a dead session, fixed only by starting over. A failed
//! task therefore escalates through tiers:
//!
//! 1. [`Tier::Immediate`] - retry the task once as is
//! 2. [`Tier::Reinitialized`] - quit the session, pause, launch and
//!    authenticate a new one, then try the task twice more
//!
//! When the last attempt fails its error is returned. When the new session
//! cannot be launched or authenticated, that error is returned instead of
//! the task's. The channel stays usable for the next submission either way.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::{Mutex, MutexGuard};

use super::{Authenticator, Browser, Launcher};
use crate::error::Result;

/// Escalation stage of a failing task.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Tier {
    /// Initial attempt.
    First,
    /// One immediate retry.
    Immediate,
    /// Attempts left on a fresh session.
    Reinitialized(u8),
}

impl Tier {
    /// Attempts on a fresh session.
    const REINITIALIZED_ATTEMPTS: u8 = 2;
}

/// Owner of the browser session.
pub struct Channel {
    launcher: Arc<dyn Launcher>,
    authenticator: Arc<dyn Authenticator>,
    reinit_delay: Duration,

    /// Held for the whole duration of a task. `tokio`'s mutex queues
    /// waiters in FIFO order.
    session: Mutex<Option<Arc<dyn Browser>>>,
}

impl Channel {
    #[must_use]
    pub fn new(
        launcher: Arc<dyn Launcher>,
        authenticator: Arc<dyn Authenticator>,
        reinit_delay: Duration,
    ) -> Self {
        Self {
            launcher,
            authenticator,
            reinit_delay,
            session: Mutex::new(None),
        }
    }

    /// Runs `task` on the session once all earlier submissions completed.
    ///
    /// `task` may be invoked several times; see the module documentation.
    ///
    /// # Errors
    ///
    /// * Non-retryable errors of the task, at once
    /// * The error of the last attempt when all attempts failed
    /// * Errors launching or authenticating a session, including the
    ///   replacement session; these take the place of the task's error
    pub async fn submit<T, F, Fut>(&self, mut task: F) -> Result<T>
    where
        F: FnMut(Arc<dyn Browser>) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let mut slot = self.session.lock().await;
        let mut tier = Tier::First;

        loop {
            let (session, _) = self.ensure_session(&mut slot).await?;
            let e = match task(session).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !e.is_retryable() {
                return Err(e);
            }

            tier = match tier {
                Tier::First => {
                    debug!("automation task failed, retrying: {e}");
                    Tier::Immediate
                }
                Tier::Immediate => {
                    warn!("automation task failed again, reinitializing session: {e}");
                    self.reinitialize_locked(&mut slot).await?;
                    Tier::Reinitialized(Tier::REINITIALIZED_ATTEMPTS)
                }
                Tier::Reinitialized(remaining) => {
                    let remaining = remaining.saturating_sub(1);
                    if remaining == 0 {
                        error!("automation task failed on a fresh session: {e}");
                        return Err(e);
                    }
                    debug!("automation task failed on a fresh session, retrying: {e}");
                    Tier::Reinitialized(remaining)
                }
            };
        }
    }

    /// Makes sure a session is running and authenticated.
    ///
    /// # Errors
    ///
    /// Returns an error if a session cannot be launched or authenticated.
    pub async fn initialize(&self) -> Result<()> {
        let mut slot = self.session.lock().await;
        let (session, fresh) = self.ensure_session(&mut slot).await?;
        if !fresh {
            self.authenticator.initialize(&*session).await?;
        }
        Ok(())
    }

    /// Replaces the session by a new one.
    ///
    /// # Errors
    ///
    /// Returns an error if the new session cannot be launched or
    /// authenticated.
    pub async fn reinitialize(&self) -> Result<()> {
        let mut slot = self.session.lock().await;
        self.reinitialize_locked(&mut slot).await
    }

    /// Quits the session, if any. A later submission starts a new one.
    pub async fn shutdown(&self) {
        let mut slot = self.session.lock().await;
        Self::teardown(&mut slot).await;
    }

    /// Returns the live session, launching and authenticating one if needed.
    /// The flag tells whether the session was just created.
    async fn ensure_session(
        &self,
        slot: &mut MutexGuard<'_, Option<Arc<dyn Browser>>>,
    ) -> Result<(Arc<dyn Browser>, bool)> {
        if let Some(session) = slot.as_ref() {
            return Ok((Arc::clone(session), false));
        }

        info!("launching browser session");
        let session = self.launcher.launch().await?;
        if let Err(e) = self.authenticator.initialize(&*session).await {
            if let Err(quit) = session.quit().await {
                debug!("quitting unusable session failed: {quit}");
            }
            return Err(e);
        }

        **slot = Some(Arc::clone(&session));
        Ok((session, true))
    }

    async fn teardown(slot: &mut MutexGuard<'_, Option<Arc<dyn Browser>>>) {
        if let Some(session) = slot.take() {
            info!("quitting browser session");
            if let Err(e) = session.quit().await {
                warn!("quitting browser session failed: {e}");
            }
        }
    }

    async fn reinitialize_locked(
        &self,
        slot: &mut MutexGuard<'_, Option<Arc<dyn Browser>>>,
    ) -> Result<()> {
        Self::teardown(slot).await;
        tokio::time::sleep(self.reinit_delay).await;
        self.ensure_session(slot).await.map(drop)
    }
}
