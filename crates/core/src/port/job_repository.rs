// Job Record Store Port (Interface)

use crate::domain::{BuildId, BuildStatus, Job};
use crate::error::Result;
use async_trait::async_trait;

/// Repository interface for build job persistence
///
/// Implementations must enforce the fingerprint gate: inserting a job while
/// another job with the same fingerprint is `notStarted` or `running` fails
/// with [`crate::AppError::Conflict`].
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new job
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Find job by ID
    async fn find_by_id(&self, id: &str) -> Result<Option<Job>>;

    /// Find several jobs; missing ids are skipped
    async fn find_by_ids(&self, ids: &[BuildId]) -> Result<Vec<Job>>;

    /// The `notStarted`/`running` job holding the fingerprint, if any
    async fn find_active_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Job>>;

    /// Most recently created job with the fingerprint, any status
    async fn find_latest_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Job>>;

    /// Atomically claim the oldest internal `notStarted` job (CAS to `running`)
    async fn claim_internal(&self, owner: &str, now_millis: i64) -> Result<Option<Job>>;

    /// Atomically claim the oldest client build reserved for `builder_id` (or unreserved)
    async fn claim_for_builder(&self, builder_id: &str, now_millis: i64) -> Result<Option<Job>>;

    /// CAS `running` -> `complete`; false if the job was no longer running
    async fn mark_complete(
        &self,
        id: &str,
        result_ref: Option<&str>,
        now_millis: i64,
    ) -> Result<bool>;

    /// CAS non-terminal -> `error`; false if the job was already terminal
    async fn mark_error(&self, id: &str, details: &str, now_millis: i64) -> Result<bool>;

    /// Fail every non-terminal job whose deadline has passed
    async fn fail_overdue(&self, details: &str, now_millis: i64) -> Result<Vec<BuildId>>;

    /// Fail every `running` job claimed by `owner`
    async fn fail_running_owned_by(
        &self,
        owner: &str,
        details: &str,
        now_millis: i64,
    ) -> Result<Vec<BuildId>>;

    /// Count jobs by status
    async fn count_by_status(&self, status: BuildStatus) -> Result<i64>;

    /// Whether the id is recorded in the prune ledger
    async fn is_pruned(&self, id: &str) -> Result<bool>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::job::bound_details;
    use crate::error::AppError;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// In-memory job store with the same gate and CAS semantics as the SQL store
    #[derive(Default)]
    pub struct InMemoryJobRepository {
        jobs: Mutex<Vec<Job>>,
        pruned: Mutex<HashSet<String>>,
    }

    impl InMemoryJobRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn all(&self) -> Vec<Job> {
            self.jobs.lock().unwrap().clone()
        }

        pub fn len(&self) -> usize {
            self.jobs.lock().unwrap().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        /// Remove a job and record it in the prune ledger
        pub fn prune(&self, id: &str) {
            self.jobs.lock().unwrap().retain(|j| j.id != id);
            self.pruned.lock().unwrap().insert(id.to_string());
        }

        /// Overwrite a stored job (test setup)
        pub fn put(&self, job: Job) {
            let mut jobs = self.jobs.lock().unwrap();
            jobs.retain(|j| j.id != job.id);
            jobs.push(job);
        }
    }

    fn claim(
        jobs: &mut [Job],
        owner: &str,
        now_millis: i64,
        eligible: impl Fn(&Job) -> bool,
    ) -> Option<Job> {
        let job = jobs
            .iter_mut()
            .filter(|j| j.status == BuildStatus::NotStarted && eligible(j))
            .min_by_key(|j| j.created_at)?;
        job.start(owner, now_millis).ok()?;
        Some(job.clone())
    }

    #[async_trait]
    impl JobRepository for InMemoryJobRepository {
        async fn insert(&self, job: &Job) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            if jobs.iter().any(|j| j.id == job.id) {
                return Err(AppError::Conflict(format!("duplicate build id {}", job.id)));
            }
            if !job.status.is_terminal()
                && jobs
                    .iter()
                    .any(|j| j.fingerprint == job.fingerprint && !j.status.is_terminal())
            {
                return Err(AppError::Conflict(format!(
                    "fingerprint {} already in flight",
                    job.fingerprint
                )));
            }
            jobs.push(job.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<Job>> {
            Ok(self.jobs.lock().unwrap().iter().find(|j| j.id == id).cloned())
        }

        async fn find_by_ids(&self, ids: &[BuildId]) -> Result<Vec<Job>> {
            let jobs = self.jobs.lock().unwrap();
            Ok(ids
                .iter()
                .filter_map(|id| jobs.iter().find(|j| &j.id == id).cloned())
                .collect())
        }

        async fn find_active_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Job>> {
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .iter()
                .find(|j| j.fingerprint == fingerprint && !j.status.is_terminal())
                .cloned())
        }

        async fn find_latest_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Job>> {
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .iter()
                .filter(|j| j.fingerprint == fingerprint)
                .max_by_key(|j| j.created_at)
                .cloned())
        }

        async fn claim_internal(&self, owner: &str, now_millis: i64) -> Result<Option<Job>> {
            let mut jobs = self.jobs.lock().unwrap();
            Ok(claim(&mut jobs, owner, now_millis, |j| {
                !j.client_build && j.owner_builder_id.is_none()
            }))
        }

        async fn claim_for_builder(&self, builder_id: &str, now_millis: i64) -> Result<Option<Job>> {
            let mut jobs = self.jobs.lock().unwrap();
            Ok(claim(&mut jobs, builder_id, now_millis, |j| {
                j.client_build
                    && j.requested_builder_id
                        .as_deref()
                        .map_or(true, |b| b == builder_id)
            }))
        }

        async fn mark_complete(
            &self,
            id: &str,
            result_ref: Option<&str>,
            now_millis: i64,
        ) -> Result<bool> {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.iter_mut().find(|j| j.id == id) {
                Some(job) if job.status == BuildStatus::Running => {
                    job.complete(result_ref.map(str::to_string), now_millis)?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn mark_error(&self, id: &str, details: &str, now_millis: i64) -> Result<bool> {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.iter_mut().find(|j| j.id == id) {
                Some(job) if !job.status.is_terminal() => {
                    job.fail(details, now_millis)?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn fail_overdue(&self, details: &str, now_millis: i64) -> Result<Vec<BuildId>> {
            let mut jobs = self.jobs.lock().unwrap();
            let mut failed = Vec::new();
            for job in jobs.iter_mut().filter(|j| j.is_overdue(now_millis)) {
                job.status = BuildStatus::Error;
                job.details = Some(bound_details(details));
                job.finished_at = Some(now_millis);
                failed.push(job.id.clone());
            }
            Ok(failed)
        }

        async fn fail_running_owned_by(
            &self,
            owner: &str,
            details: &str,
            now_millis: i64,
        ) -> Result<Vec<BuildId>> {
            let mut jobs = self.jobs.lock().unwrap();
            let mut failed = Vec::new();
            for job in jobs
                .iter_mut()
                .filter(|j| j.status == BuildStatus::Running && j.is_owned_by(owner))
            {
                job.fail(details, now_millis)?;
                failed.push(job.id.clone());
            }
            Ok(failed)
        }

        async fn count_by_status(&self, status: BuildStatus) -> Result<i64> {
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .iter()
                .filter(|j| j.status == status)
                .count() as i64)
        }

        async fn is_pruned(&self, id: &str) -> Result<bool> {
            Ok(self.pruned.lock().unwrap().contains(id))
        }
    }
}
