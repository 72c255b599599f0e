// Role Service Port

use crate::domain::{SecurityContext, VersionStatus};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashSet;

/// Answers which version statuses a caller may publish into
#[async_trait]
pub trait RoleService: Send + Sync {
    async fn available_publish_statuses(
        &self,
        ctx: &SecurityContext,
        package_id: &str,
    ) -> Result<Vec<VersionStatus>>;
}

/// Static role table: admins get every status, everyone else the defaults
pub struct ConfigRoleService {
    admins: HashSet<String>,
    default_statuses: Vec<VersionStatus>,
}

impl ConfigRoleService {
    pub fn new(
        admins: impl IntoIterator<Item = String>,
        default_statuses: Vec<VersionStatus>,
    ) -> Self {
        Self {
            admins: admins.into_iter().collect(),
            default_statuses,
        }
    }
}

#[async_trait]
impl RoleService for ConfigRoleService {
    async fn available_publish_statuses(
        &self,
        ctx: &SecurityContext,
        _package_id: &str,
    ) -> Result<Vec<VersionStatus>> {
        let user = ctx.require_user()?;
        if self.admins.contains(user) {
            return Ok(VersionStatus::ALL.to_vec());
        }
        Ok(self.default_statuses.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[tokio::test]
    async fn test_admin_gets_all_statuses() {
        let roles = ConfigRoleService::new(vec!["root".to_string()], vec![VersionStatus::Draft]);
        let admin = roles
            .available_publish_statuses(&SecurityContext::for_user("root"), "pkg")
            .await
            .unwrap();
        assert_eq!(admin.len(), 3);

        let user = roles
            .available_publish_statuses(&SecurityContext::for_user("bob"), "pkg")
            .await
            .unwrap();
        assert_eq!(user, vec![VersionStatus::Draft]);
    }

    #[tokio::test]
    async fn test_anonymous_rejected() {
        let roles = ConfigRoleService::new(Vec::<String>::new(), vec![VersionStatus::Draft]);
        let err = roles
            .available_publish_statuses(&SecurityContext::anonymous(), "pkg")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UserIdNotFound);
    }
}
