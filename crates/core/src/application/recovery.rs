// Recovery: startup cleanup and the deadline sweeper
use crate::application::executor::constants::{RESTART_DETAILS, TIMEOUT_DETAILS};
use crate::application::executor::ShutdownToken;
use crate::domain::job::internal_owner;
use crate::error::Result;
use crate::port::{JobRepository, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Fails builds that can no longer finish
pub struct RecoveryService {
    jobs: Arc<dyn JobRepository>,
    time: Arc<dyn TimeProvider>,
    sweep_interval: Duration,
}

impl RecoveryService {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        time: Arc<dyn TimeProvider>,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            jobs,
            time,
            sweep_interval,
        }
    }

    /// Fail builds a previous run of this executor left `running`
    ///
    /// Remote builders are not touched; their builds keep running until they
    /// report or their deadline passes.
    pub async fn recover_startup(&self, executor_id: &str) -> Result<usize> {
        let owner = internal_owner(executor_id);
        let failed = self
            .jobs
            .fail_running_owned_by(&owner, RESTART_DETAILS, self.time.now_millis())
            .await?;
        for id in &failed {
            warn!(build_id = %id, owner = %owner, "Orphaned build failed after restart");
        }
        info!(recovered = failed.len(), owner = %owner, "Startup recovery complete");
        Ok(failed.len())
    }

    /// Fail every non-terminal build whose deadline has passed
    pub async fn sweep_overdue(&self) -> Result<usize> {
        let failed = self
            .jobs
            .fail_overdue(TIMEOUT_DETAILS, self.time.now_millis())
            .await?;
        for id in &failed {
            warn!(build_id = %id, "Build deadline elapsed");
        }
        Ok(failed.len())
    }

    /// Sweep on an interval until shutdown
    pub async fn run_deadline_sweeper(&self, mut shutdown: ShutdownToken) {
        info!(interval_ms = self.sweep_interval.as_millis() as u64, "Deadline sweeper started");
        let mut tick = interval(self.sweep_interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.sweep_overdue().await {
                        Ok(0) => {}
                        Ok(n) => debug!(failed = n, "Deadline sweep finished"),
                        Err(e) => error!(error = %e, "Deadline sweep failed"),
                    }
                }
                _ = shutdown.wait() => break,
            }
        }
        info!("Deadline sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::executor::shutdown_channel;
    use crate::domain::job::test_support::publish_config;
    use crate::domain::{BuildStatus, Job};
    use crate::port::job_repository::mocks::InMemoryJobRepository;
    use crate::port::time_provider::mocks::MockTimeProvider;

    fn setup() -> (Arc<InMemoryJobRepository>, Arc<MockTimeProvider>, RecoveryService) {
        let jobs = Arc::new(InMemoryJobRepository::new());
        let time = Arc::new(MockTimeProvider::new(1_000));
        let service = RecoveryService::new(jobs.clone(), time.clone(), Duration::from_millis(10));
        (jobs, time, service)
    }

    fn running(id: &str, owner: &str, deadline: Option<i64>) -> Job {
        let mut job = Job::new(id, 0, publish_config("pkg", id), id).with_deadline(deadline);
        job.start(owner, 10).unwrap();
        job
    }

    #[tokio::test]
    async fn test_startup_fails_only_own_builds() {
        let (jobs, _time, service) = setup();
        jobs.put(running("mine", &internal_owner("exec-1"), None));
        jobs.put(running("other", &internal_owner("exec-2"), None));
        jobs.put(running("remote", "builder-a", None));

        assert_eq!(service.recover_startup("exec-1").await.unwrap(), 1);
        let mine = jobs.find_by_id("mine").await.unwrap().unwrap();
        assert_eq!(mine.status, BuildStatus::Error);
        assert_eq!(mine.details.as_deref(), Some(RESTART_DETAILS));
        let remote = jobs.find_by_id("remote").await.unwrap().unwrap();
        assert_eq!(remote.status, BuildStatus::Running);
    }

    #[tokio::test]
    async fn test_sweep_fails_overdue_builds() {
        let (jobs, time, service) = setup();
        jobs.put(running("late", "builder-a", Some(1_500)));
        jobs.put(running("open", "builder-a", None));
        jobs.put(Job::new("queued", 0, publish_config("pkg", "2"), "fp-q").with_deadline(Some(5_000)));

        assert_eq!(service.sweep_overdue().await.unwrap(), 0);
        time.advance(1_000);
        assert_eq!(service.sweep_overdue().await.unwrap(), 1);

        let late = jobs.find_by_id("late").await.unwrap().unwrap();
        assert_eq!(late.status, BuildStatus::Error);
        assert_eq!(late.details.as_deref(), Some(TIMEOUT_DETAILS));
        // No deadline, never auto-failed
        let open = jobs.find_by_id("open").await.unwrap().unwrap();
        assert_eq!(open.status, BuildStatus::Running);

        time.advance(10_000);
        assert_eq!(service.sweep_overdue().await.unwrap(), 1);
        let queued = jobs.find_by_id("queued").await.unwrap().unwrap();
        assert_eq!(queued.status, BuildStatus::Error);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let (_jobs, _time, service) = setup();
        let (sender, token) = shutdown_channel();
        let handle = tokio::spawn(async move { service.run_deadline_sweeper(token).await });
        sender.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
