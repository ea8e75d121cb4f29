use crate::services::transfer::CollisionPolicy;
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, path::PathBuf};

const ENV_PREFIX: &str = "FILE_EXCHANGE_";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub destination_dir: PathBuf,
    pub api_key: Option<String>,
    pub admin_password: Option<String>,
    pub collision: CollisionPolicy,
    pub max_upload_mb: usize,
    /// Lowercase extensions accepted by the automated upload; empty accepts all.
    pub allowed_extensions: Vec<String>,
}

const DEFAULT_ALLOWED_EXTENSIONS: &str = "xlsx,txt,csv";

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "LAN file exchange with automated transfer to the maintenance share")]
pub struct Args {
    /// Host to bind to (overrides FILE_EXCHANGE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_EXCHANGE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for web uploads (overrides FILE_EXCHANGE_UPLOAD_DIR)
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,

    /// Directory where automated uploads wait for transfer (overrides FILE_EXCHANGE_STAGING_DIR)
    #[arg(long)]
    pub staging_dir: Option<PathBuf>,

    /// Folder automated uploads are moved into (overrides FILE_EXCHANGE_DESTINATION_DIR)
    #[arg(long)]
    pub destination_dir: Option<PathBuf>,

    /// Key expected in the X-API-Key header (overrides FILE_EXCHANGE_API_KEY)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Password that opens every protected file (overrides FILE_EXCHANGE_ADMIN_PASSWORD)
    #[arg(long)]
    pub admin_password: Option<String>,

    /// Behaviour when the destination already has the file (overrides FILE_EXCHANGE_COLLISION)
    #[arg(long, value_enum)]
    pub collision: Option<CollisionPolicy>,

    /// Largest accepted request body in MiB (overrides FILE_EXCHANGE_MAX_UPLOAD_MB)
    #[arg(long)]
    pub max_upload_mb: Option<usize>,

    /// Comma-separated extensions the automated upload accepts, empty for any
    /// (overrides FILE_EXCHANGE_ALLOWED_EXTENSIONS)
    #[arg(long)]
    pub allowed_extensions: Option<String>,
}

/// Source of environment values, so tests do not have to mutate the process env.
pub trait EnvSource {
    fn get(&self, key: &str) -> Result<Option<String>>;
}

struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match env::var(key) {
            Ok(value) => Ok(Some(value)),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(err) => Err(err).with_context(|| format!("reading {}", key)),
        }
    }
}

fn env_string(source: &dyn EnvSource, name: &str) -> Result<Option<String>> {
    source.get(&format!("{}{}", ENV_PREFIX, name))
}

fn env_parsed<T>(source: &dyn EnvSource, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_string(source, name)? {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {}{} value `{}`", ENV_PREFIX, name, value)),
        None => Ok(None),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Split `"xlsx, .CSV,,txt"` into `["xlsx", "csv", "txt"]`.
fn extension_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::merge(Args::parse(), &ProcessEnv)
    }

    /// Merge parsed flags over environment values over defaults.
    pub fn merge(args: Args, source: &dyn EnvSource) -> Result<Self> {
        let env_host = env_string(source, "HOST")?.unwrap_or_else(|| "0.0.0.0".into());
        let env_port = env_parsed::<u16>(source, "PORT")?.unwrap_or(5000);
        let env_upload = env_string(source, "UPLOAD_DIR")?.unwrap_or_else(|| "./data/uploads".into());
        let env_staging =
            env_string(source, "STAGING_DIR")?.unwrap_or_else(|| "./data/staging".into());
        let env_destination = env_string(source, "DESTINATION_DIR")?
            .unwrap_or_else(|| "./data/maintenance".into());
        let env_collision = match env_string(source, "COLLISION")? {
            Some(value) => CollisionPolicy::from_str(&value, true)
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("parsing {}COLLISION value `{}`", ENV_PREFIX, value))?,
            None => CollisionPolicy::default(),
        };
        let env_max_upload = env_parsed::<usize>(source, "MAX_UPLOAD_MB")?.unwrap_or(1024);
        let env_extensions = env_string(source, "ALLOWED_EXTENSIONS")?
            .unwrap_or_else(|| DEFAULT_ALLOWED_EXTENSIONS.into());

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            upload_dir: args.upload_dir.unwrap_or_else(|| env_upload.into()),
            staging_dir: args.staging_dir.unwrap_or_else(|| env_staging.into()),
            destination_dir: args.destination_dir.unwrap_or_else(|| env_destination.into()),
            api_key: non_empty(args.api_key.or(env_string(source, "API_KEY")?)),
            admin_password: non_empty(
                args.admin_password
                    .or(env_string(source, "ADMIN_PASSWORD")?),
            ),
            collision: args.collision.unwrap_or(env_collision),
            max_upload_mb: args.max_upload_mb.unwrap_or(env_max_upload),
            allowed_extensions: extension_list(
                args.allowed_extensions.as_deref().unwrap_or(&env_extensions),
            ),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}
