use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Smallest part size accepted by S3 for every part but the last.
pub const MIN_PART_SIZE_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Root of the per-state working directories.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,

    #[serde(default)]
    pub pg_dump: PgDumpConfig,

    #[serde(default)]
    pub postgres: PostgresConfig,

    #[serde(default)]
    pub planet_dump_ng: PlanetDumpNgConfig,

    #[serde(default)]
    pub info: InfoConfig,

    #[serde(default)]
    pub s3: S3Config,

    #[serde(default)]
    pub http_client: HttpClientConfig,

    #[serde(default)]
    pub dump_server: DumpServerConfig,

    #[serde(default)]
    pub action_tracker: ActionTrackerConfig,

    #[serde(default)]
    pub termination: TerminationConfig,
}

fn default_workdir() -> PathBuf {
    PathBuf::from("/tmp/planet-dumper")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workdir: default_workdir(),
            pg_dump: PgDumpConfig::default(),
            postgres: PostgresConfig::default(),
            planet_dump_ng: PlanetDumpNgConfig::default(),
            info: InfoConfig::default(),
            s3: S3Config::default(),
            http_client: HttpClientConfig::default(),
            dump_server: DumpServerConfig::default(),
            action_tracker: ActionTrackerConfig::default(),
            termination: TerminationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PgDumpConfig {
    #[serde(default = "default_pg_dump")]
    pub executable: String,

    #[serde(default)]
    pub verbose: bool,

    /// Value of pg_dump's `--format` flag
    #[serde(default = "default_pg_dump_format")]
    pub format: String,

    /// Appended verbatim after the built-in arguments
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_pg_dump() -> String {
    "pg_dump".to_string()
}

fn default_pg_dump_format() -> String {
    "custom".to_string()
}

impl Default for PgDumpConfig {
    fn default() -> Self {
        Self {
            executable: default_pg_dump(),
            verbose: false,
            format: default_pg_dump_format(),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PostgresConfig {
    /// Authenticate pg_dump with client certificates
    #[serde(default)]
    pub enable_ssl_auth: bool,

    #[serde(default)]
    pub ssl_paths: SslPaths,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SslPaths {
    #[serde(default)]
    pub ca: Option<PathBuf>,

    #[serde(default)]
    pub cert: Option<PathBuf>,

    #[serde(default)]
    pub key: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlanetDumpNgConfig {
    #[serde(default = "default_planet_dump_ng")]
    pub executable: String,

    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_planet_dump_ng() -> String {
    "planet-dump-ng".to_string()
}

impl Default for PlanetDumpNgConfig {
    fn default() -> Self {
        Self {
            executable: default_planet_dump_ng(),
            verbose: false,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InfoConfig {
    #[serde(default = "default_info_tool")]
    pub executable: String,
}

fn default_info_tool() -> String {
    "osmium".to_string()
}

impl Default for InfoConfig {
    fn default() -> Self {
        Self {
            executable: default_info_tool(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct S3Config {
    /// Custom endpoint, e.g. a MinIO deployment. Uses AWS when unset.
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default)]
    pub force_path_style: bool,

    /// Canned ACL applied to uploaded artifacts
    #[serde(default)]
    pub acl: Option<String>,

    #[serde(default)]
    pub upload: UploadConfig,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: default_region(),
            force_path_style: false,
            acl: None,
            upload: UploadConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    /// Parts uploaded in parallel
    #[serde(default = "default_upload_concurrency")]
    pub concurrency: usize,

    /// Size of each multipart part. Smaller files are uploaded in one request.
    #[serde(default = "default_part_size")]
    pub part_size_bytes: u64,

    #[serde(default = "default_true")]
    pub log_progress: bool,
}

fn default_upload_concurrency() -> usize {
    4
}

fn default_part_size() -> u64 {
    64 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency: default_upload_concurrency(),
            part_size_bytes: default_part_size(),
            log_progress: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpClientConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DumpServerConfig {
    #[serde(default)]
    pub token: TokenConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TokenConfig {
    /// Send `Authorization: Bearer <value>` with every registration
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub value: Option<String>,
}

impl TokenConfig {
    /// The token to send, if enabled.
    pub fn bearer(&self) -> Option<&str> {
        if self.enabled {
            self.value.as_deref().filter(|v| !v.is_empty())
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ActionTrackerConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Base URL of the tracking service
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Identifies this tool in created actions
    #[serde(default)]
    pub service_id: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TerminationConfig {
    /// Children still running this long after SIGINT are killed.
    /// Zero disables the forced kill.
    #[serde(default = "default_force_kill_after_ms")]
    pub force_kill_after_ms: u64,
}

fn default_force_kill_after_ms() -> u64 {
    10_000
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            force_kill_after_ms: default_force_kill_after_ms(),
        }
    }
}
