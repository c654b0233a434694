//! Configuration parsing and validation for the gateway binary
//!
//! Options come from the command line (or their environment variables), then from an optional
//! JSON config file, then from the built-in defaults, in that order of precedence.
use anyhow::{Context, anyhow};
use clap::Parser;
use lm_relay::client::PoolConfig;
use lm_relay::cors::AllowedOrigins;
use lm_relay::upstream::{self, Upstream};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// JSON file with any of `listenPort`, `upstreamBaseUrl`, `chatTimeoutMs`, `probeTimeoutMs`.
    #[arg(short = 'f', long, env = "LM_RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// The port on which the gateway will listen. [default: 8080]
    #[arg(short = 'p', long, env = "LM_RELAY_PORT")]
    pub port: Option<u16>,

    /// Base URL of the inference server. [default: http://127.0.0.1:1234]
    #[arg(short = 'u', long, env = "LM_RELAY_UPSTREAM_URL")]
    pub upstream_url: Option<Url>,

    /// How long to wait for a chat completion, in milliseconds. [default: 180000]
    #[arg(long, env = "LM_RELAY_CHAT_TIMEOUT_MS")]
    pub chat_timeout_ms: Option<u64>,

    /// How long the connectivity probe waits, in milliseconds. [default: 5000]
    #[arg(long, env = "LM_RELAY_PROBE_TIMEOUT_MS")]
    pub probe_timeout_ms: Option<u64>,

    /// Browser origin allowed to call the gateway. Repeat for several; none means any origin.
    #[arg(long = "allowed-origin")]
    pub allowed_origins: Vec<String>,

    /// Whether to enable the metrics endpoint.
    #[arg(short = 'm', long, default_value_t = false)]
    pub metrics: bool,

    /// The port on which the metrics server will listen.
    #[arg(long, default_value_t = 9090)]
    pub metrics_port: u16,

    /// The prefix to use for metrics.
    #[arg(long, default_value = "lm_relay")]
    pub metrics_prefix: String,

    /// Maximum number of idle HTTP connections to keep alive to the upstream.
    #[arg(long, default_value_t = 100)]
    pub pool_max_idle_per_host: usize,

    /// How long (in seconds) to keep idle HTTP connections alive.
    #[arg(long, default_value_t = 90)]
    pub pool_idle_timeout_secs: u64,
}

/// The optional JSON config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigFile {
    pub listen_port: Option<u16>,
    pub upstream_base_url: Option<Url>,
    pub chat_timeout_ms: Option<u64>,
    pub probe_timeout_ms: Option<u64>,
}

impl ConfigFile {
    pub async fn from_path(path: &Path) -> Result<Self, anyhow::Error> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSettings {
    pub port: u16,
    pub prefix: String,
}

/// Everything the binary needs, with precedence applied and validated.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub upstream: Upstream,
    pub allowed_origins: AllowedOrigins,
    pub pool: PoolConfig,
    pub metrics: Option<MetricsSettings>,
}

impl Config {
    pub async fn resolve(self) -> Result<Settings, anyhow::Error> {
        let file = match &self.config {
            Some(path) => {
                if !path.exists() {
                    return Err(anyhow!("Config file '{}' does not exist", path.display()));
                }
                ConfigFile::from_path(path).await?
            }
            None => ConfigFile::default(),
        };
        self.merge(file)
    }

    fn merge(self, file: ConfigFile) -> Result<Settings, anyhow::Error> {
        let base_url = match self.upstream_url.or(file.upstream_base_url) {
            Some(url) => url,
            None => upstream::DEFAULT_BASE_URL.parse()?,
        };
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "Upstream URL '{}' must use http or https",
                base_url
            ));
        }

        let chat_timeout = timeout_from(
            "chat timeout",
            self.chat_timeout_ms.or(file.chat_timeout_ms),
            upstream::DEFAULT_CHAT_TIMEOUT,
        )?;
        let probe_timeout = timeout_from(
            "probe timeout",
            self.probe_timeout_ms.or(file.probe_timeout_ms),
            upstream::DEFAULT_PROBE_TIMEOUT,
        )?;

        let allowed_origins = AllowedOrigins::from_origins(&self.allowed_origins)
            .context("Invalid --allowed-origin value")?;

        Ok(Settings {
            port: self.port.or(file.listen_port).unwrap_or(DEFAULT_PORT),
            upstream: Upstream::builder()
                .base_url(base_url)
                .chat_timeout(chat_timeout)
                .probe_timeout(probe_timeout)
                .build(),
            allowed_origins,
            pool: PoolConfig {
                max_idle_per_host: self.pool_max_idle_per_host,
                idle_timeout: Duration::from_secs(self.pool_idle_timeout_secs),
            },
            metrics: self.metrics.then(|| MetricsSettings {
                port: self.metrics_port,
                prefix: self.metrics_prefix.clone(),
            }),
        })
    }
}

fn timeout_from(
    name: &str,
    millis: Option<u64>,
    default: Duration,
) -> Result<Duration, anyhow::Error> {
    match millis {
        Some(0) => Err(anyhow!("The {name} must be greater than zero")),
        Some(ms) => Ok(Duration::from_millis(ms)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("lm-relay").chain(args.iter().copied())).unwrap()
    }

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_defaults() {
        let settings = parse(&[]).resolve().await.unwrap();

        assert_eq!(settings.port, 8080);
        assert_eq!(settings.upstream.base_url_display(), "http://127.0.0.1:1234");
        assert_eq!(settings.upstream.chat_timeout, Duration::from_secs(180));
        assert_eq!(settings.upstream.probe_timeout, Duration::from_secs(5));
        assert_eq!(settings.allowed_origins, AllowedOrigins::Any);
        assert!(settings.metrics.is_none());
    }

    #[tokio::test]
    async fn test_config_file_values_are_used() {
        let file = write_config(
            r#"{"listenPort": 9000, "upstreamBaseUrl": "http://10.0.0.5:1234", "chatTimeoutMs": 60000, "probeTimeoutMs": 1500}"#,
        );
        let settings = parse(&["-f", file.path().to_str().unwrap()])
            .resolve()
            .await
            .unwrap();

        assert_eq!(settings.port, 9000);
        assert_eq!(settings.upstream.base_url_display(), "http://10.0.0.5:1234");
        assert_eq!(settings.upstream.chat_timeout, Duration::from_secs(60));
        assert_eq!(settings.upstream.probe_timeout, Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_command_line_overrides_config_file() {
        let file = write_config(r#"{"listenPort": 9000, "chatTimeoutMs": 60000}"#);
        let settings = parse(&[
            "-f",
            file.path().to_str().unwrap(),
            "--port",
            "7000",
            "--upstream-url",
            "http://localhost:5000",
        ])
        .resolve()
        .await
        .unwrap();

        assert_eq!(settings.port, 7000);
        assert_eq!(settings.upstream.base_url_display(), "http://localhost:5000");
        assert_eq!(settings.upstream.chat_timeout, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_missing_config_file_is_rejected() {
        let err = parse(&["-f", "/definitely/not/here.json"])
            .resolve()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_unknown_config_key_is_rejected() {
        let file = write_config(r#"{"listenPrt": 9000}"#);
        assert!(
            parse(&["-f", file.path().to_str().unwrap()])
                .resolve()
                .await
                .is_err()
        );
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let err = parse(&["--chat-timeout-ms", "0"])
            .merge(ConfigFile::default())
            .unwrap_err();
        assert!(err.to_string().contains("chat timeout"));
    }

    #[test]
    fn test_non_http_upstream_is_rejected() {
        assert!(
            parse(&["--upstream-url", "ftp://127.0.0.1:1234"])
                .merge(ConfigFile::default())
                .is_err()
        );
    }

    #[test]
    fn test_origins_and_metrics() {
        let settings = parse(&[
            "--allowed-origin",
            "http://localhost:3000",
            "--allowed-origin",
            "http://127.0.0.1:3000",
            "--metrics",
            "--metrics-port",
            "9100",
        ])
        .merge(ConfigFile::default())
        .unwrap();

        assert!(matches!(settings.allowed_origins, AllowedOrigins::List(ref l) if l.len() == 2));
        let metrics = settings.metrics.unwrap();
        assert_eq!(metrics.port, 9100);
        assert_eq!(metrics.prefix, "lm_relay");
    }
}
