//! Mutual exclusion over the shared input device.
//!
//! Only one engine may drive the pointer and keyboard at a time. Each command
//! is dispatched under an [`InputLease`]; acquiring one also brings the
//! engine's window to the front and minimizes every other registered app.

use crate::cancellation::pause;
use crate::errors::EngineError;
use crate::platforms::AppWindow;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

#[derive(Debug)]
struct Holder {
    owner: Uuid,
    app: String,
    acquired: Instant,
}

type Slot = Arc<Mutex<Option<Holder>>>;

fn lock_slot(slot: &Slot) -> MutexGuard<'_, Option<Holder>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Process-wide lock with bounded acquisition and lease expiry.
#[derive(Clone)]
pub struct InputLock {
    slot: Slot,
    acquire_timeout: Duration,
    retry_interval: Duration,
    lease: Duration,
}

impl InputLock {
    pub fn new(acquire_timeout: Duration, retry_interval: Duration, lease: Duration) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            acquire_timeout,
            retry_interval,
            lease,
        }
    }

    /// Polls until the lock is free or the acquire timeout passes. A holder
    /// older than the lease is considered dead and replaced.
    pub async fn acquire(&self, app: &str, token: &CancellationToken) -> Result<InputLease, EngineError> {
        let deadline = Instant::now() + self.acquire_timeout;
        loop {
            if let Some(lease) = self.try_acquire(app) {
                return Ok(lease);
            }
            if Instant::now() >= deadline {
                return Err(EngineError::AcquisitionTimeout(format!(
                    "{app} waited {:?} for the input lock",
                    self.acquire_timeout
                )));
            }
            pause(token, self.retry_interval).await?;
        }
    }

    pub fn try_acquire(&self, app: &str) -> Option<InputLease> {
        let mut slot = lock_slot(&self.slot);
        if let Some(holder) = slot.as_ref() {
            if holder.acquired.elapsed() < self.lease {
                return None;
            }
            warn!(
                "Input lock held by {} expired after {:?}, taking it over for {}",
                holder.app, self.lease, app
            );
        }
        let owner = Uuid::new_v4();
        *slot = Some(Holder {
            owner,
            app: app.to_string(),
            acquired: Instant::now(),
        });
        debug!("Input lock acquired by {} ({})", app, owner);
        Some(InputLease {
            owner,
            slot: Arc::clone(&self.slot),
        })
    }

    pub fn holder(&self) -> Option<String> {
        lock_slot(&self.slot).as_ref().map(|h| h.app.clone())
    }
}

/// Released on drop, unless it expired and was taken over.
#[derive(Debug)]
pub struct InputLease {
    owner: Uuid,
    slot: Slot,
}

impl InputLease {
    /// Restarts the expiry clock. Long commands call this between input
    /// steps so the lock is not mistaken for abandoned.
    ///
    /// Returns `false` once another holder has taken the lock over.
    pub fn renew(&self) -> bool {
        let mut slot = lock_slot(&self.slot);
        match slot.as_mut() {
            Some(holder) if holder.owner == self.owner => {
                holder.acquired = Instant::now();
                true
            }
            _ => false,
        }
    }

    /// Renews the lease, failing when it was lost to another holder.
    pub fn ensure_held(&self) -> Result<(), EngineError> {
        if self.renew() {
            Ok(())
        } else {
            Err(EngineError::AcquisitionTimeout(
                "input lock expired and was taken over".to_string(),
            ))
        }
    }
}

impl Drop for InputLease {
    fn drop(&mut self) {
        let mut slot = lock_slot(&self.slot);
        if slot.as_ref().is_some_and(|h| h.owner == self.owner) {
            *slot = None;
        }
    }
}

/// The input lock plus window scheduling across registered apps.
pub struct InputArbiter {
    lock: InputLock,
    windows: RwLock<BTreeMap<String, Arc<dyn AppWindow>>>,
    foreground: Mutex<Option<String>>,
}

impl InputArbiter {
    pub fn new(lock: InputLock) -> Self {
        Self {
            lock,
            windows: RwLock::new(BTreeMap::new()),
            foreground: Mutex::new(None),
        }
    }

    pub fn register(&self, app: &str, window: Arc<dyn AppWindow>) {
        let mut windows = self.windows.write().unwrap_or_else(|p| p.into_inner());
        windows.insert(app.to_string(), window);
    }

    pub fn lock(&self) -> &InputLock {
        &self.lock
    }

    /// Acquires the input lock for `app` and makes it the only visible app.
    #[instrument(skip(self, token))]
    pub async fn acquire(&self, app: &str, token: &CancellationToken) -> Result<InputLease, EngineError> {
        let lease = self.lock.acquire(app, token).await?;
        self.bring_to_front(app)?;
        Ok(lease)
    }

    /// Forces the next acquisition to re-focus, e.g. after a relaunch.
    pub fn invalidate_foreground(&self, app: &str) {
        let mut foreground = self.foreground.lock().unwrap_or_else(|p| p.into_inner());
        if foreground.as_deref() == Some(app) {
            *foreground = None;
        }
    }

    fn bring_to_front(&self, app: &str) -> Result<(), EngineError> {
        let mut foreground = self.foreground.lock().unwrap_or_else(|p| p.into_inner());
        if foreground.as_deref() == Some(app) {
            return Ok(());
        }
        let windows = self.windows.read().unwrap_or_else(|p| p.into_inner());
        for (other, window) in windows.iter().filter(|(name, _)| name.as_str() != app) {
            if window.is_open() {
                if let Err(e) = window.minimize() {
                    warn!("Could not minimize {}: {}", other, e);
                }
            }
        }
        match windows.get(app) {
            Some(window) => window.restore_and_focus()?,
            None => warn!("{} has no registered window to focus", app),
        }
        *foreground = Some(app.to_string());
        debug!("{} is now in the foreground", app);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock(timeout_ms: u64, lease_ms: u64) -> InputLock {
        InputLock::new(
            Duration::from_millis(timeout_ms),
            Duration::from_millis(5),
            Duration::from_millis(lease_ms),
        )
    }

    #[tokio::test]
    async fn second_holder_times_out() {
        let lock = lock(30, 60_000);
        let token = CancellationToken::new();
        let _held = lock.acquire("pppoker", &token).await.unwrap();
        let err = lock.acquire("supremapoker", &token).await.unwrap_err();
        assert!(matches!(err, EngineError::AcquisitionTimeout(_)));
    }

    #[tokio::test]
    async fn dropping_the_lease_releases() {
        let lock = lock(30, 60_000);
        let token = CancellationToken::new();
        drop(lock.acquire("pppoker", &token).await.unwrap());
        assert!(lock.holder().is_none());
        let lease = lock.acquire("supremapoker", &token).await.unwrap();
        assert_eq!(lock.holder().as_deref(), Some("supremapoker"));
        drop(lease);
    }

    #[tokio::test]
    async fn expired_lease_is_taken_over() {
        let lock = lock(200, 10);
        let token = CancellationToken::new();
        let stale = lock.acquire("pppoker", &token).await.unwrap();
        let fresh = lock.acquire("supremapoker", &token).await.unwrap();
        assert_eq!(lock.holder().as_deref(), Some("supremapoker"));
        drop(stale);
        assert_eq!(lock.holder().as_deref(), Some("supremapoker"));
        drop(fresh);
    }

    #[tokio::test]
    async fn renewed_lease_outlives_its_expiry() {
        let lock = lock(200, 40);
        let token = CancellationToken::new();
        let held = lock.acquire("pppoker", &token).await.unwrap();
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(15)).await;
            assert!(held.renew());
        }
        // 60ms after acquiring, past the 40ms lease, but renewed just now.
        assert!(lock.try_acquire("supremapoker").is_none());
        assert_eq!(lock.holder().as_deref(), Some("pppoker"));

        tokio::time::sleep(Duration::from_millis(60)).await;
        let taken = lock.try_acquire("supremapoker").unwrap();
        assert!(!held.renew());
        assert!(held.ensure_held().is_err());
        drop(held);
        assert_eq!(lock.holder().as_deref(), Some("supremapoker"));
        drop(taken);
    }

    #[tokio::test]
    async fn waiting_for_the_lock_observes_abort() {
        let lock = lock(10_000, 60_000);
        let token = CancellationToken::new();
        let _held = lock.acquire("pppoker", &token).await.unwrap();
        token.cancel();
        let err = lock.acquire("supremapoker", &token).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
