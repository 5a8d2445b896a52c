//! Rate-limit controller.
//!
//! Throttling is not an error: the run pauses for a fixed cooldown with
//! zero actions, resets its error counters and resumes.

use std::time::Duration;

use crate::error::AppError;
use crate::progress::{ObserverEvent, ProgressReporter, ProgressSnapshot, RunStatus};
use crate::scheduler::RunContext;
use crate::traits::{ObserverChannel, PersistentStore, RenderedListHost};

#[derive(Debug, Clone)]
pub struct RateLimitController {
    cooldown: Duration,
}

impl RateLimitController {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// True if the host is signalling throttling right now.
    pub async fn detect<H: RenderedListHost>(&self, host: &H) -> Result<bool, AppError> {
        host.throttled().await
    }

    /// True if `error` is a throttling signal rather than a failure.
    pub fn is_signal(error: &AppError) -> bool {
        matches!(error, AppError::RateLimitExceeded)
    }

    /// Holds the run in the paused state for the full cooldown.
    ///
    /// `snapshot` carries the counts to report while paused; they are
    /// unchanged by the pause. A stop during the cooldown aborts the wait
    /// with [`AppError::Cancelled`].
    pub async fn pause<S, O>(
        &self,
        ctx: &mut RunContext,
        progress: &ProgressReporter<S, O>,
        snapshot: &ProgressSnapshot,
    ) -> Result<(), AppError>
    where
        S: PersistentStore,
        O: ObserverChannel,
    {
        progress
            .publish(ProgressSnapshot::new(
                RunStatus::PausedRateLimit,
                snapshot.found,
                snapshot.total,
                snapshot.unfollowed,
            ))
            .await;
        progress
            .notify(ObserverEvent::RateLimited {
                cooldown_secs: self.cooldown.as_secs(),
            })
            .await;

        ctx.sleep_exact(self.cooldown).await?;

        ctx.counters.consecutive_errors = 0;
        progress
            .publish(ProgressSnapshot::new(
                RunStatus::Running,
                snapshot.found,
                snapshot.total,
                snapshot.unfollowed,
            ))
            .await;
        Ok(())
    }
}

impl Default for RateLimitController {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::RunCounters;
    use crate::store::MemoryStore;
    use crate::testutil::RecordingObserver;
    use tokio_util::sync::CancellationToken;

    #[tokio::test(start_paused = true)]
    async fn pause_waits_full_cooldown_and_resets_errors() {
        let controller = RateLimitController::default();
        let observer = RecordingObserver::new();
        let progress = ProgressReporter::new(MemoryStore::new(), observer.clone());
        let mut ctx = RunContext::new(CancellationToken::new());
        ctx.counters.consecutive_errors = 4;

        let start = tokio::time::Instant::now();
        controller
            .pause(
                &mut ctx,
                &progress,
                &ProgressSnapshot::new(RunStatus::Running, 5, 5, 2),
            )
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_secs(300));
        assert_eq!(ctx.counters.consecutive_errors, 0);

        let statuses: Vec<_> = observer
            .events()
            .into_iter()
            .filter_map(|e| match e {
                ObserverEvent::Progress(s) => Some((s.status, s.unfollowed)),
                _ => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![(RunStatus::PausedRateLimit, 2), (RunStatus::Running, 2)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aborts_cooldown() {
        let controller = RateLimitController::default();
        let progress = ProgressReporter::new(MemoryStore::new(), RecordingObserver::new());
        let token = CancellationToken::new();
        let mut ctx = RunContext::new(token.clone());
        token.cancel();

        let err = controller
            .pause(&mut ctx, &progress, &ProgressSnapshot::idle())
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(ctx.counters, RunCounters::default());
    }

    #[test]
    fn only_rate_limit_is_a_signal() {
        assert!(RateLimitController::is_signal(&AppError::RateLimitExceeded));
        assert!(!RateLimitController::is_signal(&AppError::Cancelled));
    }
}
