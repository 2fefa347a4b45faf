use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use room_core::TickOutcome;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

use crate::room::SharedSession;

/// One tick per elapsed second.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Schedules timer ticks for one session.
///
/// At most one tick task is alive at a time. Every `start`, `pause` and `reset` bumps the
/// generation while holding the session lock, so a tick from a superseded task is dropped
/// before it can touch the countdown.
pub struct TimerDriver {
    session: SharedSession,
    interval: Duration,
    generation: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TimerDriver {
    #[must_use]
    pub fn new(session: SharedSession) -> Self {
        Self::with_interval(session, TICK_INTERVAL)
    }

    #[must_use]
    pub fn with_interval(session: SharedSession, interval: Duration) -> Self {
        Self {
            session,
            interval,
            generation: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn session(&self) -> SharedSession {
        Arc::clone(&self.session)
    }

    /// Start or resume the countdown. Returns `false` when the timer was not startable.
    pub async fn start(&self) -> bool {
        let mut session = self.session.lock().await;
        if !session.start_timer() {
            return false;
        }
        let generation = self.bump();
        self.spawn(generation).await;
        true
    }

    pub async fn pause(&self) -> bool {
        let mut session = self.session.lock().await;
        let paused = session.pause_timer();
        self.bump();
        self.cancel().await;
        paused
    }

    pub async fn reset(&self) {
        let mut session = self.session.lock().await;
        session.reset_timer();
        self.bump();
        self.cancel().await;
    }

    /// Match the schedule to the session after it was changed directly (restart, load).
    pub async fn resync(&self) {
        let session = self.session.lock().await;
        let running = session.state().timer().is_running();
        if running == self.is_ticking().await {
            return;
        }
        let generation = self.bump();
        if running {
            self.spawn(generation).await;
        } else {
            self.cancel().await;
        }
    }

    /// Drop the tick task without touching the countdown.
    pub async fn stop(&self) {
        self.bump();
        self.cancel().await;
    }

    pub async fn is_ticking(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn bump(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn spawn(&self, generation: u64) {
        let task = tokio::spawn(tick_loop(
            Arc::clone(&self.session),
            Arc::clone(&self.generation),
            generation,
            self.interval,
        ));
        if let Some(previous) = self.task.lock().await.replace(task) {
            previous.abort();
        }
    }

    async fn cancel(&self) {
        if let Some(previous) = self.task.lock().await.take() {
            previous.abort();
        }
    }
}

impl Drop for TimerDriver {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

async fn tick_loop(
    session: SharedSession,
    generation: Arc<AtomicU64>,
    mine: u64,
    period: Duration,
) {
    let mut ticks = time::interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticks.tick().await;
        let mut session = session.lock().await;
        if generation.load(Ordering::SeqCst) != mine {
            debug!(generation = mine, "stale tick dropped");
            return;
        }
        match session.tick() {
            TickOutcome::Ticked { .. } => {}
            TickOutcome::Expired | TickOutcome::Ignored => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use room_core::TimerPhase;
    use room_core::model::{LearnerId, StageCatalog};
    use sandbox::Verifier;

    use crate::room::RoomSession;

    fn driver(minutes: u32) -> TimerDriver {
        let session = RoomSession::new(
            Some(LearnerId::parse("learner-timer").unwrap()),
            Arc::new(StageCatalog::standard()),
            Verifier::default(),
            minutes,
        )
        .unwrap()
        .shared();
        TimerDriver::new(session)
    }

    async fn remaining(driver: &TimerDriver) -> u32 {
        driver
            .session
            .lock()
            .await
            .state()
            .timer()
            .remaining_seconds()
    }

    #[tokio::test(start_paused = true)]
    async fn three_seconds_leave_fifty_seven() {
        let driver = driver(1);
        assert!(driver.start().await);
        time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(remaining(&driver).await, 57);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_expires_and_locks() {
        let driver = driver(1);
        driver.start().await;
        time::sleep(Duration::from_secs(61)).await;

        let session = driver.session.lock().await;
        assert_eq!(session.state().timer().phase(), TimerPhase::Expired);
        assert!(session.is_locked());
        drop(session);
        assert!(!driver.is_ticking().await);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_and_start_resumes() {
        let driver = driver(1);
        driver.start().await;
        time::sleep(Duration::from_millis(2_500)).await;
        assert!(driver.pause().await);
        assert!(!driver.pause().await);

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(remaining(&driver).await, 58);

        assert!(driver.start().await);
        time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(remaining(&driver).await, 57);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_never_double_ticks() {
        let driver = driver(1);
        driver.start().await;
        time::sleep(Duration::from_millis(500)).await;
        driver.pause().await;
        driver.start().await;
        time::sleep(Duration::from_millis(1_200)).await;
        assert_eq!(remaining(&driver).await, 59);
    }

    #[tokio::test(start_paused = true)]
    async fn start_while_running_keeps_schedule() {
        let driver = driver(1);
        driver.start().await;
        time::sleep(Duration::from_millis(700)).await;
        assert!(!driver.start().await);
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(remaining(&driver).await, 59);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_returns_to_idle_and_stops_ticking() {
        let driver = driver(1);
        driver.start().await;
        time::sleep(Duration::from_millis(2_500)).await;
        driver.reset().await;
        time::sleep(Duration::from_secs(3)).await;

        let session = driver.session.lock().await;
        assert_eq!(session.state().timer().phase(), TimerPhase::Idle);
        assert_eq!(session.state().timer().remaining_seconds(), 0);
        drop(session);
        assert!(!driver.is_ticking().await);
    }

    #[tokio::test(start_paused = true)]
    async fn resync_cancels_after_direct_reset() {
        let driver = driver(1);
        driver.start().await;
        driver.session.lock().await.reset_progress();
        driver.resync().await;
        assert!(!driver.is_ticking().await);
    }
}
