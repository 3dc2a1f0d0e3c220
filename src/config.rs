use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, fmt, path::PathBuf, str::FromStr};

use crate::services::{gcs, pubsub, rotator::DEFAULT_JPEG_QUALITY};

/// Which storage and messaging system the pipeline talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Cloud Storage and Pub/Sub over their JSON/REST APIs.
    Gcp,
    /// Objects on disk, metadata and notifications in SQLite.
    Local,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gcp" => Ok(Self::Gcp),
            "local" => Ok(Self::Local),
            other => bail!("unknown backend `{}` (expected `gcp` or `local`)", other),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub notify_topic: Option<String>,
    pub backend: Backend,
    pub staging_dir: PathBuf,
    pub jpeg_quality: u8,
    pub project: Option<String>,
    pub storage_endpoint: String,
    pub pubsub_endpoint: String,
    pub access_token: Option<String>,
    pub storage_dir: String,
    pub database_url: String,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("notify_topic", &self.notify_topic)
            .field("backend", &self.backend)
            .field("staging_dir", &self.staging_dir)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("project", &self.project)
            .field("storage_endpoint", &self.storage_endpoint)
            .field("pubsub_endpoint", &self.pubsub_endpoint)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("storage_dir", &self.storage_dir)
            .field("database_url", &self.database_url)
            .finish()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Rotates uploaded JPEGs to match their EXIF orientation")]
pub struct Args {
    /// Host to bind to (overrides AUTOROTATE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides AUTOROTATE_PORT / PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Topic notified after each replace (overrides IMAGE_ORIENTATION_NOTIFY_TOPIC)
    #[arg(long)]
    pub notify_topic: Option<String>,

    /// Storage and messaging backend (overrides AUTOROTATE_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Scratch directory for staged files (overrides AUTOROTATE_STAGING_DIR)
    #[arg(long)]
    pub staging_dir: Option<PathBuf>,

    /// Re-encode quality, 1-100 (overrides AUTOROTATE_JPEG_QUALITY)
    #[arg(long)]
    pub jpeg_quality: Option<u8>,

    /// Project used to qualify short topic names (overrides GOOGLE_CLOUD_PROJECT)
    #[arg(long)]
    pub project: Option<String>,

    /// Cloud Storage endpoint (overrides STORAGE_EMULATOR_HOST)
    #[arg(long)]
    pub storage_endpoint: Option<String>,

    /// Pub/Sub endpoint (overrides PUBSUB_EMULATOR_HOST)
    #[arg(long)]
    pub pubsub_endpoint: Option<String>,

    /// Static bearer token (overrides GOOGLE_OAUTH_ACCESS_TOKEN)
    #[arg(long)]
    pub access_token: Option<String>,

    /// Directory where local objects are stored (overrides AUTOROTATE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Local database URL (overrides AUTOROTATE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();
        Self::resolve(args, |key| env::var(key).ok())
    }

    /// Merge `args` over the variables returned by `env`, then over defaults.
    pub fn resolve(args: Args, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        // --- Environment fallback ---
        let port_var = var("AUTOROTATE_PORT")
            .map(|v| ("AUTOROTATE_PORT", v))
            .or_else(|| var("PORT").map(|v| ("PORT", v)));
        let env_port = match port_var {
            Some((key, value)) => value
                .parse::<u16>()
                .with_context(|| format!("parsing {} value `{}`", key, value))?,
            None => 8080,
        };
        let env_backend = match var("AUTOROTATE_BACKEND") {
            Some(value) => value
                .parse::<Backend>()
                .context("parsing AUTOROTATE_BACKEND")?,
            None => Backend::Gcp,
        };
        let env_quality = match var("AUTOROTATE_JPEG_QUALITY") {
            Some(value) => value
                .parse::<u8>()
                .with_context(|| format!("parsing AUTOROTATE_JPEG_QUALITY value `{}`", value))?,
            None => DEFAULT_JPEG_QUALITY,
        };

        let jpeg_quality = args.jpeg_quality.unwrap_or(env_quality);
        if !(1..=100).contains(&jpeg_quality) {
            bail!("jpeg quality must be between 1 and 100, got {}", jpeg_quality);
        }

        let storage_override = args.storage_endpoint.or_else(|| var("STORAGE_EMULATOR_HOST"));
        let pubsub_override = args.pubsub_endpoint.or_else(|| var("PUBSUB_EMULATOR_HOST"));

        // --- Merge ---
        Ok(Self {
            host: args
                .host
                .or_else(|| var("AUTOROTATE_HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: args.port.unwrap_or(env_port),
            notify_topic: args
                .notify_topic
                .or_else(|| var("IMAGE_ORIENTATION_NOTIFY_TOPIC")),
            backend: args.backend.unwrap_or(env_backend),
            staging_dir: args
                .staging_dir
                .or_else(|| var("AUTOROTATE_STAGING_DIR").map(PathBuf::from))
                .unwrap_or_else(env::temp_dir),
            jpeg_quality,
            project: args.project.or_else(|| var("GOOGLE_CLOUD_PROJECT")),
            storage_endpoint: storage_override
                .map(|e| with_scheme(&e))
                .unwrap_or_else(|| gcs::DEFAULT_ENDPOINT.into()),
            pubsub_endpoint: pubsub_override
                .map(|e| with_scheme(&e))
                .unwrap_or_else(|| pubsub::DEFAULT_ENDPOINT.into()),
            access_token: args
                .access_token
                .or_else(|| var("GOOGLE_OAUTH_ACCESS_TOKEN")),
            storage_dir: args
                .storage_dir
                .or_else(|| var("AUTOROTATE_STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            database_url: args
                .database_url
                .or_else(|| var("AUTOROTATE_DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/autorotate.db".into()),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Emulator hosts are usually given as `host:port`.
fn with_scheme(endpoint: &str) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(argv: &[&str], vars: &[(&str, &str)]) -> Result<AppConfig> {
        let mut full = vec!["image-autorotate"];
        full.extend_from_slice(argv);
        let args = Args::try_parse_from(full).unwrap();
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::resolve(args, |key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_input() {
        let cfg = resolve(&[], &[]).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:8080");
        assert_eq!(cfg.backend, Backend::Gcp);
        assert_eq!(cfg.notify_topic, None);
        assert_eq!(cfg.jpeg_quality, 100);
        assert_eq!(cfg.storage_endpoint, gcs::DEFAULT_ENDPOINT);
        assert_eq!(cfg.pubsub_endpoint, pubsub::DEFAULT_ENDPOINT);
        assert_eq!(cfg.staging_dir, env::temp_dir());
    }

    #[test]
    fn cli_wins_over_env() {
        let cfg = resolve(
            &["--port", "9000", "--notify-topic", "cli-topic", "--backend", "local"],
            &[
                ("AUTOROTATE_PORT", "7000"),
                ("IMAGE_ORIENTATION_NOTIFY_TOPIC", "env-topic"),
                ("AUTOROTATE_BACKEND", "gcp"),
            ],
        )
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.notify_topic.as_deref(), Some("cli-topic"));
        assert_eq!(cfg.backend, Backend::Local);
    }

    #[test]
    fn port_falls_back_to_plain_port_variable() {
        let cfg = resolve(&[], &[("PORT", "8181")]).unwrap();
        assert_eq!(cfg.port, 8181);

        let cfg = resolve(&[], &[("PORT", "8181"), ("AUTOROTATE_PORT", "8282")]).unwrap();
        assert_eq!(cfg.port, 8282);
    }

    #[test]
    fn blank_topic_is_treated_as_unset() {
        let cfg = resolve(&[], &[("IMAGE_ORIENTATION_NOTIFY_TOPIC", "  ")]).unwrap();
        assert_eq!(cfg.notify_topic, None);
    }

    #[test]
    fn emulator_hosts_get_a_scheme() {
        let cfg = resolve(
            &[],
            &[
                ("STORAGE_EMULATOR_HOST", "localhost:4443"),
                ("PUBSUB_EMULATOR_HOST", "https://pubsub.test/"),
            ],
        )
        .unwrap();
        assert_eq!(cfg.storage_endpoint, "http://localhost:4443");
        assert_eq!(cfg.pubsub_endpoint, "https://pubsub.test");
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(resolve(&[], &[("AUTOROTATE_PORT", "eighty")]).is_err());
        assert!(resolve(&[], &[("AUTOROTATE_BACKEND", "azure")]).is_err());
        assert!(resolve(&[], &[("AUTOROTATE_JPEG_QUALITY", "0")]).is_err());
        assert!(resolve(&["--jpeg-quality", "101"], &[]).is_err());
    }

    #[test]
    fn debug_output_redacts_token() {
        let cfg = resolve(&[], &[("GOOGLE_OAUTH_ACCESS_TOKEN", "ya29.secret")]).unwrap();
        let printed = format!("{:?}", cfg);
        assert!(!printed.contains("ya29.secret"));
        assert!(printed.contains("<redacted>"));
    }
}
