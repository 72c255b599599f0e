// Build Job Domain Model

use crate::domain::build::{BuildConfig, VersionStatus};
use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

/// Build ID (UUID v4)
pub type BuildId = String;

/// Maximum stored length of `details`, in characters
pub const MAX_DETAILS_LEN: usize = 1024;

/// Owner prefix stamped on jobs claimed by an internal executor
pub const INTERNAL_OWNER_PREFIX: &str = "internal:";

pub fn internal_owner(executor_id: &str) -> String {
    format!("{}{}", INTERNAL_OWNER_PREFIX, executor_id)
}

/// Build status. Transitions: notStarted -> running -> {complete, error},
/// and notStarted -> error (deadline/recovery).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuildStatus {
    NotStarted,
    Running,
    Complete,
    Error,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::NotStarted => "notStarted",
            BuildStatus::Running => "running",
            BuildStatus::Complete => "complete",
            BuildStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "notStarted" => Some(BuildStatus::NotStarted),
            "running" => Some(BuildStatus::Running),
            "complete" => Some(BuildStatus::Complete),
            "error" => Some(BuildStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildStatus::Complete | BuildStatus::Error)
    }

    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        use BuildStatus::*;
        matches!(
            (self, next),
            (NotStarted, Running) | (NotStarted, Error) | (Running, Complete) | (Running, Error)
        )
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clip to [`MAX_DETAILS_LEN`] characters without splitting a code point
pub fn bound_details(details: &str) -> String {
    match details.char_indices().nth(MAX_DETAILS_LEN) {
        Some((idx, _)) => details[..idx].to_string(),
        None => details.to_string(),
    }
}

/// Build job record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: BuildId,
    pub config: BuildConfig,
    pub fingerprint: String,
    pub status: BuildStatus,
    pub details: Option<String>,

    /// Builder (or `internal:<executor>`) that claimed the job
    pub owner_builder_id: Option<String>,
    /// Builder the submitter designated for a client build
    pub requested_builder_id: Option<String>,
    pub client_build: bool,

    pub created_by: String,
    pub created_at: i64, // epoch ms
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub deadline: Option<i64>, // epoch ms

    /// Artifact key of the uploaded sources archive
    pub sources_ref: Option<String>,
    /// Artifact key of the result archive
    pub result_ref: Option<String>,

    /// Version statuses the submitter may publish into
    pub available_statuses: Vec<VersionStatus>,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        config: BuildConfig,
        fingerprint: impl Into<String>,
    ) -> Self {
        let created_by = config.created_by().to_string();
        Self {
            id: id.into(),
            config,
            fingerprint: fingerprint.into(),
            status: BuildStatus::NotStarted,
            details: None,
            owner_builder_id: None,
            requested_builder_id: None,
            client_build: false,
            created_by,
            created_at,
            started_at: None,
            finished_at: None,
            deadline: None,
            sources_ref: None,
            result_ref: None,
            available_statuses: Vec::new(),
        }
    }

    /// Mark as a client build reserved for `builder_id`
    pub fn for_builder(mut self, builder_id: impl Into<String>) -> Self {
        self.client_build = true;
        self.requested_builder_id = Some(builder_id.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Option<i64>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_sources(mut self, sources_ref: Option<String>) -> Self {
        self.sources_ref = sources_ref;
        self
    }

    pub fn with_available_statuses(mut self, statuses: Vec<VersionStatus>) -> Self {
        self.available_statuses = statuses;
        self
    }

    pub fn is_owned_by(&self, builder_id: &str) -> bool {
        self.owner_builder_id.as_deref() == Some(builder_id)
    }

    fn transition(&mut self, next: BuildStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Transition to running, stamping the owner
    pub fn start(&mut self, owner: impl Into<String>, now_millis: i64) -> Result<()> {
        self.transition(BuildStatus::Running)?;
        self.owner_builder_id = Some(owner.into());
        self.started_at = Some(now_millis);
        Ok(())
    }

    pub fn complete(&mut self, result_ref: Option<String>, now_millis: i64) -> Result<()> {
        self.transition(BuildStatus::Complete)?;
        self.result_ref = result_ref;
        self.finished_at = Some(now_millis);
        Ok(())
    }

    pub fn fail(&mut self, details: &str, now_millis: i64) -> Result<()> {
        self.transition(BuildStatus::Error)?;
        self.details = Some(bound_details(details));
        self.finished_at = Some(now_millis);
        Ok(())
    }

    pub fn is_overdue(&self, now_millis: i64) -> bool {
        !self.status.is_terminal() && matches!(self.deadline, Some(d) if d <= now_millis)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::domain::build::{BuildConfigRequest, PublishConfig};

    pub fn publish_config(package_id: &str, version: &str) -> BuildConfig {
        BuildConfig::Publish(PublishConfig {
            package_id: package_id.to_string(),
            version: version.to_string(),
            previous_version: None,
            previous_version_package_id: None,
            status: VersionStatus::Draft,
            version_labels: Vec::new(),
            refs: Vec::new(),
            created_by: "alice".to_string(),
        })
    }

    pub fn changelog_config(package_id: &str, version: &str, previous: &str) -> BuildConfig {
        BuildConfig::try_from(BuildConfigRequest {
            build_type: Some("changelog".to_string()),
            package_id: Some(package_id.to_string()),
            version: Some(version.to_string()),
            previous_version: Some(previous.to_string()),
            comparison_revision: Some(1),
            comparison_prev_revision: Some(1),
            ..Default::default()
        })
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::publish_config;
    use super::*;

    fn job() -> Job {
        Job::new("b-1", 1000, publish_config("pkg", "v1"), "fp")
    }

    #[test]
    fn test_happy_path() {
        let mut job = job();
        assert_eq!(job.created_by, "alice");
        job.start("internal:node-1", 2000).unwrap();
        assert!(job.is_owned_by("internal:node-1"));
        job.complete(Some("result".into()), 3000).unwrap();
        assert_eq!(job.status, BuildStatus::Complete);
        assert_eq!(job.finished_at, Some(3000));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = job();
        job.fail("boom", 1500).unwrap();
        assert!(job.start("b1", 2000).is_err());
        assert!(job.complete(None, 2000).is_err());
        assert!(job.fail("again", 2000).is_err());
        assert_eq!(job.details.as_deref(), Some("boom"));
    }

    #[test]
    fn test_cannot_complete_unstarted() {
        let mut job = job();
        let err = job.complete(None, 2000).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_details_are_bounded_on_char_boundary() {
        let long = "é".repeat(MAX_DETAILS_LEN + 10);
        let bounded = bound_details(&long);
        assert_eq!(bounded.chars().count(), MAX_DETAILS_LEN);
        assert_eq!(bound_details("short"), "short");
    }

    #[test]
    fn test_overdue() {
        let job = job().with_deadline(Some(5000));
        assert!(!job.is_overdue(4999));
        assert!(job.is_overdue(5000));
        let no_deadline = Job::new("b-2", 0, publish_config("pkg", "v1"), "fp");
        assert!(!no_deadline.is_overdue(i64::MAX));
    }

    #[test]
    fn test_status_round_trip_str() {
        for s in [
            BuildStatus::NotStarted,
            BuildStatus::Running,
            BuildStatus::Complete,
            BuildStatus::Error,
        ] {
            assert_eq!(BuildStatus::parse(s.as_str()), Some(s));
        }
    }
}
