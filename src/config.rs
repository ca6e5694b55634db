// src/config.rs

//! Manages server configuration: loading, resolving dynamic values, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::time::Duration;

/// Environment variables that override secrets from the configuration file.
pub const ENV_DB_PASSWORD: &str = "COLDSTORED_DB_PASSWORD";
pub const ENV_SSH_PASSWORD: &str = "COLDSTORED_SSH_PASSWORD";
pub const ENV_CLUSTER_TOKEN: &str = "COLDSTORED_CLUSTER_TOKEN";
pub const ENV_S3_SECRET_KEY: &str = "COLDSTORED_S3_SECRET_KEY";

/// A static bearer token identifying an operator and their role.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ApiToken {
    pub token: String,
    pub user_id: String,
    #[serde(default = "default_api_role")]
    pub role: String,
}

fn default_api_role() -> String {
    "operator".to_string()
}

/// Configuration for the HTTP API surface.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ApiConfig {
    #[serde(default)]
    pub tokens: Vec<ApiToken>,
}

/// Connection settings for the application database. The same coordinates
/// feed the sqlx pool, `pg_dump` for snapshots and `psql` for restores.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_db_user")]
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_db_name")]
    pub dbname: String,
    #[serde(default = "default_db_max_connections")]
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Builds a postgres connection URL for the sqlx pool.
    pub fn url(&self) -> String {
        let password = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, password, self.host, self.port, self.dbname
        )
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            user: default_db_user(),
            password: None,
            dbname: default_db_name(),
            max_connections: default_db_max_connections(),
        }
    }
}

fn default_db_host() -> String {
    "127.0.0.1".to_string()
}
fn default_db_port() -> u16 {
    5432
}
fn default_db_user() -> String {
    "coldstore".to_string()
}
fn default_db_name() -> String {
    "coldstore".to_string()
}
fn default_db_max_connections() -> u32 {
    10
}

/// Default SSH credentials for nodes that do not carry their own.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SshConfig {
    #[serde(default = "default_ssh_user")]
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub key_path: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_ssh_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(default = "default_ssh_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_ssh_user(),
            port: default_ssh_port(),
            key_path: None,
            password: None,
            connect_timeout: default_ssh_connect_timeout(),
            command_timeout: default_ssh_command_timeout(),
        }
    }
}

fn default_ssh_user() -> String {
    "root".to_string()
}
fn default_ssh_port() -> u16 {
    22
}
fn default_ssh_connect_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_ssh_command_timeout() -> Duration {
    Duration::from_secs(60)
}

/// A node known ahead of time, imported into the inventory at startup.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SeedNode {
    pub ip: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default = "default_seed_role")]
    pub role: String,
}

fn default_seed_role() -> String {
    "worker".to_string()
}

/// Cluster coordinates: the virtual IP fronting the control plane, the
/// join URL and token handed to agents during provisioning.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ClusterConfig {
    #[serde(default)]
    pub virtual_ip: Option<String>,
    #[serde(default)]
    pub join_url: Option<String>,
    #[serde(default)]
    pub join_token: Option<String>,
    #[serde(default)]
    pub nodes: Vec<SeedNode>,
}

/// Deployment orchestrator settings. Per-application settings (image
/// repository, build context, targets) live in `deployment_configs` rows;
/// these are the process-wide knobs.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DeployConfig {
    /// Directory for locally cached image tarballs before fan-out.
    #[serde(default = "default_image_cache_dir")]
    pub image_cache_dir: String,
    #[serde(default = "default_rollout_timeout", with = "humantime_serde")]
    pub rollout_timeout: Duration,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            image_cache_dir: default_image_cache_dir(),
            rollout_timeout: default_rollout_timeout(),
        }
    }
}

fn default_image_cache_dir() -> String {
    "coldstored_data/images".to_string()
}
fn default_rollout_timeout() -> Duration {
    Duration::from_secs(120)
}

/// An S3-compatible backend: custom endpoint, static credentials,
/// path-style addressing for MinIO-like stores.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct S3BackendConfig {
    pub bucket: String,
    #[serde(default = "default_s3_region")]
    pub region: String,
    pub endpoint: String,
    pub access_key: String,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default = "default_path_style")]
    pub path_style: bool,
}

fn default_s3_region() -> String {
    "auto".to_string()
}
fn default_path_style() -> bool {
    true
}

/// Snapshot and restore settings.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SnapshotConfig {
    /// Directory holding local snapshot files, mirroring the cloud key layout.
    #[serde(default = "default_snapshot_dir")]
    pub local_dir: String,
    #[serde(default = "default_base_prefix")]
    pub base_prefix: String,
    #[serde(default = "default_pre_restore_prefix")]
    pub pre_restore_prefix: String,
    #[serde(default = "default_local_interval", with = "humantime_serde")]
    pub local_interval: Duration,
    #[serde(default = "default_cloud_interval", with = "humantime_serde")]
    pub cloud_interval: Duration,
    #[serde(default)]
    pub s3: Option<S3BackendConfig>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            local_dir: default_snapshot_dir(),
            base_prefix: default_base_prefix(),
            pre_restore_prefix: default_pre_restore_prefix(),
            local_interval: default_local_interval(),
            cloud_interval: default_cloud_interval(),
            s3: None,
        }
    }
}

fn default_snapshot_dir() -> String {
    "coldstored_data/snapshots".to_string()
}
fn default_base_prefix() -> String {
    "base".to_string()
}
fn default_pre_restore_prefix() -> String {
    "pre-restore".to_string()
}
fn default_local_interval() -> Duration {
    Duration::from_secs(15 * 60)
}
fn default_cloud_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

/// A named local storage root scanned on its own cadence.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PoolConfig {
    pub name: String,
    pub root: String,
    #[serde(default = "default_pool_interval", with = "humantime_serde")]
    pub scan_interval: Duration,
}

fn default_pool_interval() -> Duration {
    Duration::from_secs(15 * 60)
}

/// Media and pool sync engine settings.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MediaConfig {
    #[serde(default = "default_sync_workers")]
    pub workers: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
    #[serde(default = "default_worker_tick", with = "humantime_serde")]
    pub worker_tick: Duration,
    /// Root directory that media queue `local_path`s are relative to.
    #[serde(default = "default_media_root")]
    pub media_root: String,
    #[serde(default = "default_pools")]
    pub pools: Vec<PoolConfig>,
    #[serde(default)]
    pub primary: Option<S3BackendConfig>,
    #[serde(default)]
    pub mirror: Option<S3BackendConfig>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            workers: default_sync_workers(),
            max_retries: default_max_retries(),
            worker_tick: default_worker_tick(),
            media_root: default_media_root(),
            pools: default_pools(),
            primary: None,
            mirror: None,
        }
    }
}

fn default_sync_workers() -> usize {
    2
}
fn default_max_retries() -> i32 {
    3
}
fn default_worker_tick() -> Duration {
    Duration::from_secs(5)
}
fn default_media_root() -> String {
    "coldstored_data/media".to_string()
}
fn default_pools() -> Vec<PoolConfig> {
    let pool = |name: &str, secs: u64| PoolConfig {
        name: name.to_string(),
        root: format!("/srv/pools/{name}"),
        scan_interval: Duration::from_secs(secs),
    };
    vec![
        pool("bulk", 15 * 60),
        pool("highspeed", 15 * 60),
        pool("archives", 60 * 60),
        pool("backups", 60 * 60),
    ]
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    8879
}

/// A raw representation of the config file before validation and resolution.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    api: ApiConfig,
    #[serde(default)]
    database: DatabaseConfig,
    #[serde(default)]
    ssh: SshConfig,
    #[serde(default)]
    cluster: ClusterConfig,
    #[serde(default)]
    deploy: DeployConfig,
    #[serde(default)]
    snapshot: SnapshotConfig,
    #[serde(default)]
    media: MediaConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8878
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Represents the final, validated, and resolved server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub deploy: DeployConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            api: ApiConfig::default(),
            database: DatabaseConfig::default(),
            ssh: SshConfig::default(),
            cluster: ClusterConfig::default(),
            deploy: DeployConfig::default(),
            snapshot: SnapshotConfig::default(),
            media: MediaConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Loads, resolves and validates the configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        check_file_permissions(path)?;

        let contents = fs::read_to_string(path)
            .with_context(|| format!("could not read config file at '{path}'"))?;
        let raw: RawConfig =
            toml::from_str(&contents).with_context(|| format!("invalid TOML in '{path}'"))?;

        let mut config = Config {
            host: raw.host,
            port: raw.port,
            log_level: raw.log_level,
            api: raw.api,
            database: raw.database,
            ssh: raw.ssh,
            cluster: raw.cluster,
            deploy: raw.deploy,
            snapshot: raw.snapshot,
            media: raw.media,
            metrics: raw.metrics,
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Secrets may be supplied by environment variables, taking precedence
    /// over anything in the file.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var(ENV_DB_PASSWORD) {
            self.database.password = Some(v);
        }
        if let Ok(v) = env::var(ENV_SSH_PASSWORD) {
            self.ssh.password = Some(v);
        }
        if let Ok(v) = env::var(ENV_CLUSTER_TOKEN) {
            self.cluster.join_token = Some(v);
        }
        if let Ok(v) = env::var(ENV_S3_SECRET_KEY) {
            for backend in [
                self.snapshot.s3.as_mut(),
                self.media.primary.as_mut(),
                self.media.mirror.as_mut(),
            ]
            .into_iter()
            .flatten()
            {
                if backend.secret_key.is_none() {
                    backend.secret_key = Some(v.clone());
                }
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port must not be 0"));
        }
        let mut seen = std::collections::HashSet::new();
        for pool in &self.media.pools {
            if pool.name.is_empty() || pool.name.contains('/') {
                return Err(anyhow!("invalid pool name '{}'", pool.name));
            }
            if !seen.insert(pool.name.as_str()) {
                return Err(anyhow!("duplicate pool name '{}'", pool.name));
            }
        }
        for backend in [
            self.snapshot.s3.as_ref(),
            self.media.primary.as_ref(),
            self.media.mirror.as_ref(),
        ]
        .into_iter()
        .flatten()
        {
            if backend.bucket.is_empty() {
                return Err(anyhow!("object store bucket must not be empty"));
            }
            if backend.secret_key.is_none() {
                return Err(anyhow!(
                    "object store '{}' has no secret key (set {ENV_S3_SECRET_KEY} or the config field)",
                    backend.bucket
                ));
            }
        }
        if self.media.workers == 0 {
            return Err(anyhow!("media.workers must be at least 1"));
        }
        Ok(())
    }

    /// Returns the per-pool scan interval, falling back to the default cadence.
    pub fn pool_interval(&self, pool: &str) -> Duration {
        self.media
            .pools
            .iter()
            .find(|p| p.name == pool)
            .map(|p| p.scan_interval)
            .unwrap_or_else(default_pool_interval)
    }
}

/// Secrets files must not be readable by group or world. Mirrors the 0600
/// contract on the operator's configuration.
#[cfg(unix)]
fn check_file_permissions(path: &str) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = fs::metadata(path)
        .with_context(|| format!("could not stat config file at '{path}'"))?;
    let mode = metadata.permissions().mode();
    if mode & 0o077 != 0 {
        return Err(anyhow!(
            "config file '{path}' is group/world accessible (mode {:o}); chmod it to 0600",
            mode & 0o777
        ));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_file_permissions(_path: &str) -> Result<()> {
    Ok(())
}
