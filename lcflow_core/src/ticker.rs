//! Background timing threads for re-calibration: a cadence ticker that
//! marks when a periodic session is due, and a one-shot timeout guard that
//! releases a stuck session through its `CancelToken`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, TrySendError, bounded};
use lcflow_traits::{CancelToken, Clock};
use tracing::{debug, warn};

use crate::error::Result;

/// Emits one tick per cadence interval on a background thread. Ticks do not
/// pile up: a tick that arrives while the previous one is unconsumed is
/// coalesced.
pub struct RecalTicker {
    rx: Receiver<()>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl RecalTicker {
    pub fn spawn<C>(cadence: Duration, clock: C) -> Result<Self>
    where
        C: Clock + Send + 'static,
    {
        let (tx, rx) = bounded::<()>(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = Arc::clone(&shutdown);

        let join = std::thread::Builder::new()
            .name("recal-ticker".into())
            .spawn(move || {
                loop {
                    clock.sleep(cadence);
                    if thread_shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    match tx.try_send(()) {
                        Ok(()) => {}
                        // Previous tick not consumed yet; coalesce.
                        Err(TrySendError::Full(())) => {}
                        Err(TrySendError::Disconnected(())) => break,
                    }
                }
                debug!("recal ticker stopped");
            })
            .map_err(|e| eyre::eyre!("spawn recal ticker thread: {e}"))?;

        Ok(Self {
            rx,
            shutdown,
            join: Some(join),
        })
    }

    /// True when a cadence interval has elapsed since the last check.
    pub fn due(&self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

impl Drop for RecalTicker {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// One-shot guard that cancels `token` if it is still armed when the
/// timeout elapses. Dropping the guard disarms it.
pub struct TimeoutGuard {
    disarmed: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl TimeoutGuard {
    pub fn arm<C>(timeout: Duration, clock: C, token: CancelToken) -> Result<Self>
    where
        C: Clock + Send + 'static,
    {
        let disarmed = Arc::new(AtomicBool::new(false));
        let thread_disarmed = Arc::clone(&disarmed);

        let join = std::thread::Builder::new()
            .name("recal-timeout".into())
            .spawn(move || {
                clock.sleep(timeout);
                if !thread_disarmed.load(Ordering::Acquire) {
                    warn!(?timeout, "re-calibration timeout guard fired");
                    token.cancel();
                }
            })
            .map_err(|e| eyre::eyre!("spawn recal timeout thread: {e}"))?;

        Ok(Self {
            disarmed,
            join: Some(join),
        })
    }

    /// Disarm without waiting for the deadline.
    pub fn disarm(mut self) {
        self.disarmed.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.disarmed.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lcflow_traits::clock::TestClock;

    #[test]
    fn ticker_emits_and_coalesces() {
        let ticker = RecalTicker::spawn(Duration::from_millis(5), TestClock::new()).unwrap();
        // The simulated clock makes sleep instantaneous, so ticks arrive as
        // fast as the thread can produce them; they must still coalesce to
        // at most one pending tick.
        let mut seen = false;
        for _ in 0..200 {
            if ticker.due() {
                seen = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(seen, "no tick within 200ms");
    }

    #[test]
    fn timeout_guard_cancels_token() {
        let token = CancelToken::new();
        let guard = TimeoutGuard::arm(Duration::from_millis(1), TestClock::new(), token.clone())
            .unwrap();
        let mut cancelled = false;
        for _ in 0..200 {
            if token.is_cancelled() {
                cancelled = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(cancelled, "guard never fired");
        drop(guard);
    }

    #[test]
    fn disarm_joins_cleanly() {
        let token = CancelToken::new();
        let guard =
            TimeoutGuard::arm(Duration::from_secs(3600), MonotonicLike, token.clone()).unwrap();
        guard.disarm();
    }

    /// Clock whose sleep returns immediately, standing in for a real clock
    /// in join tests.
    #[derive(Clone, Copy)]
    struct MonotonicLike;

    impl Clock for MonotonicLike {
        fn now(&self) -> std::time::Instant {
            std::time::Instant::now()
        }

        fn sleep(&self, _d: Duration) {}
    }
}
