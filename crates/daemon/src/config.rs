//! Daemon Configuration
//!
//! Built-in defaults, then an optional TOML file, then `APIHUB__*`
//! environment variables (`APIHUB__SERVER__LISTEN_ADDR=0.0.0.0:9000`).

use apihub_api_http::UploadLimits;
use apihub_core::application::{DispatcherSettings, WsSettings};
use apihub_core::domain::VersionStatus;
use apihub_core::error::{AppError, Result};
use apihub_core::port::MaintenanceConfig;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "APIHUB";
const LIST_KEYS: [&str; 2] = ["roles.admins", "roles.default_publish_statuses"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub artifacts: ArtifactConfig,
    pub builds: BuildsConfig,
    pub limits: LimitsConfig,
    pub ws: WsConfig,
    pub roles: RolesConfig,
    pub rate_limit: RateLimitConfig,
    pub maintenance: MaintenanceSection,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// `host:port` peers use to reach this node; defaults to the bound address
    pub node_addr: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            node_addr: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://~/.apihub/hub.db".to_string(),
            max_connections: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub root: String,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            root: "~/.apihub/artifacts".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuildsConfig {
    /// Internal executor workers; 0 leaves internal builds to other nodes
    pub workers: usize,
    /// Owner stamp of this node's executor; empty means the node address
    pub executor_id: String,
    pub reuse_ttl_secs: u64,
    /// 0 = no deadline
    pub default_deadline_secs: u64,
    pub deadline_sweep_interval_secs: u64,
}

impl Default for BuildsConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            executor_id: String::new(),
            reuse_ttl_secs: 24 * 3600,
            default_deadline_secs: 0,
            deadline_sweep_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub publish_archive_size_limit_mb: u64,
    pub publish_file_size_limit_mb: u64,
    pub branch_content_size_limit_mb: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            publish_archive_size_limit_mb: 50,
            publish_file_size_limit_mb: 15,
            branch_content_size_limit_mb: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WsConfig {
    pub owner_ttl_secs: u64,
    pub heartbeat_interval_secs: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            owner_ttl_secs: 30,
            heartbeat_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RolesConfig {
    pub admins: Vec<String>,
    pub default_publish_statuses: Vec<String>,
}

impl Default for RolesConfig {
    fn default() -> Self {
        Self {
            admins: Vec::new(),
            default_publish_statuses: vec!["draft".to_string(), "release".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub burst: u32,
    pub per_second: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst: 50,
            per_second: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaintenanceSection {
    pub retention_days: i64,
    pub artifact_grace_hours: i64,
    pub interval_hours: u64,
}

impl Default for MaintenanceSection {
    fn default() -> Self {
        Self {
            retention_days: 30,
            artifact_grace_hours: 24,
            interval_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive; `RUST_LOG` wins when set
    pub level: String,
    /// Rolling daily files go here instead of stdout
    pub directory: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            level: "apihub=info,tower_http=info".to_string(),
            directory: None,
        }
    }
}

fn config_error(err: impl std::fmt::Display) -> AppError {
    AppError::Config(err.to_string())
}

fn environment() -> Environment {
    LIST_KEYS.iter().fold(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(","),
        |env, key| env.with_list_parse_key(key),
    )
}

impl AppConfig {
    /// Defaults, then `path` (if any), then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, environment())
    }

    fn load_with(path: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config: AppConfig = builder
            .add_source(env)
            .build()
            .and_then(Config::try_deserialize)
            .map_err(config_error)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let limits = [
            ("limits.publish_archive_size_limit_mb", self.limits.publish_archive_size_limit_mb),
            ("limits.publish_file_size_limit_mb", self.limits.publish_file_size_limit_mb),
            ("limits.branch_content_size_limit_mb", self.limits.branch_content_size_limit_mb),
        ];
        if let Some((name, _)) = limits.iter().find(|(_, v)| *v == 0) {
            return Err(config_error(format!("{} must be greater than 0", name)));
        }
        if self.rate_limit.burst == 0 || self.rate_limit.per_second == 0 {
            return Err(config_error("rate_limit.burst and rate_limit.per_second must be greater than 0"));
        }
        if self.ws.heartbeat_interval_secs == 0
            || self.ws.owner_ttl_secs <= self.ws.heartbeat_interval_secs
        {
            return Err(config_error(
                "ws.owner_ttl_secs must exceed ws.heartbeat_interval_secs (both > 0)",
            ));
        }
        if self.builds.deadline_sweep_interval_secs == 0 || self.maintenance.interval_hours == 0 {
            return Err(config_error("sweep and maintenance intervals must be greater than 0"));
        }
        self.publish_statuses()?;
        Ok(())
    }

    /// Database URL with `~` expanded in the path part
    pub fn database_url(&self) -> String {
        let url = self.database.url.as_str();
        match url.strip_prefix("sqlite://") {
            Some(path) => format!("sqlite://{}", shellexpand::tilde(path)),
            None => shellexpand::tilde(url).into_owned(),
        }
    }

    pub fn artifact_root(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.artifacts.root).into_owned())
    }

    pub fn publish_statuses(&self) -> Result<Vec<VersionStatus>> {
        self.roles
            .default_publish_statuses
            .iter()
            .map(|s| {
                VersionStatus::parse(s.trim()).ok_or_else(|| {
                    config_error(format!("unknown publish status '{}' in roles", s))
                })
            })
            .collect()
    }

    pub fn upload_limits(&self) -> UploadLimits {
        UploadLimits::from_mb(
            self.limits.publish_archive_size_limit_mb,
            self.limits.publish_file_size_limit_mb,
            self.limits.branch_content_size_limit_mb,
        )
    }

    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            reuse_ttl_ms: (self.builds.reuse_ttl_secs * 1000) as i64,
            default_deadline_ms: (self.builds.default_deadline_secs * 1000) as i64,
            max_file_bytes: self.upload_limits().publish_file_bytes,
        }
    }

    pub fn ws_settings(&self, node_addr: &str) -> WsSettings {
        WsSettings {
            node_addr: node_addr.to_string(),
            owner_ttl_ms: (self.ws.owner_ttl_secs * 1000) as i64,
            heartbeat_interval: Duration::from_secs(self.ws.heartbeat_interval_secs),
        }
    }

    pub fn maintenance_config(&self) -> MaintenanceConfig {
        MaintenanceConfig {
            finished_job_retention_days: self.maintenance.retention_days,
            artifact_grace_hours: self.maintenance.artifact_grace_hours,
            ..MaintenanceConfig::default()
        }
    }

    pub fn executor_id<'a>(&'a self, node_addr: &'a str) -> &'a str {
        match self.builds.executor_id.trim() {
            "" => node_addr,
            id => id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(map))
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::load_with(None, env(&[])).unwrap();
        assert_eq!(config.server.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.builds.workers, 2);
        assert_eq!(
            config.publish_statuses().unwrap(),
            vec![VersionStatus::Draft, VersionStatus::Release]
        );
        assert_eq!(config.upload_limits(), UploadLimits::default());
    }

    #[test]
    fn test_file_then_env_override() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[server]\nlisten_addr = \"127.0.0.1:9000\"\n\n[builds]\nworkers = 4\n\n[log]\nformat = \"json\""
        )
        .unwrap();

        let config = AppConfig::load_with(
            Some(file.path()),
            env(&[
                ("APIHUB__BUILDS__WORKERS", "8"),
                ("APIHUB__ROLES__ADMINS", "alice,bob"),
            ]),
        )
        .unwrap();
        assert_eq!(config.server.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.builds.workers, 8);
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.roles.admins, vec!["alice", "bob"]);
    }

    #[test]
    fn test_validation_rejects_zero_limits() {
        let err = AppConfig::load_with(
            None,
            env(&[("APIHUB__LIMITS__PUBLISH_FILE_SIZE_LIMIT_MB", "0")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("limits.publish_file_size_limit_mb"));
    }

    #[test]
    fn test_heartbeat_must_be_shorter_than_owner_ttl() {
        let mut config = AppConfig::default();
        config.ws.heartbeat_interval_secs = config.ws.owner_ttl_secs;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_unknown_publish_status_rejected() {
        let mut config = AppConfig::default();
        config.roles.default_publish_statuses = vec!["published".to_string()];
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_derived_settings() {
        let mut config = AppConfig::default();
        config.database.url = "sqlite::memory:".to_string();
        config.builds.default_deadline_secs = 60;
        assert_eq!(config.database_url(), "sqlite::memory:");
        assert_eq!(config.dispatcher_settings().default_deadline_ms, 60_000);
        assert_eq!(config.executor_id("10.0.0.1:8080"), "10.0.0.1:8080");
        config.builds.executor_id = "builder-a".to_string();
        assert_eq!(config.executor_id("10.0.0.1:8080"), "builder-a");
        assert_eq!(config.ws_settings("n:1").owner_ttl_ms, 30_000);
    }
}
