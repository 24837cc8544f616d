//! Configuration for a benchmark run.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Command-line flags
//! 2. Environment variables prefixed with `SWIFTBENCH__`
//! 3. OpenStack environment variables (`OS_AUTH_URL`, `OS_TENANT_NAME`, `OS_USERNAME`,
//!    `OS_PASSWORD` and `OS_PROXY`)
//! 4. YAML configuration file (specified via `-c` or `--config` flag)
//! 5. Defaults
//!
//! # Environment Variables
//!
//! `SWIFTBENCH__` variables use double underscores (`__`) to denote nested configuration
//! structures. For example:
//!
//! - `SWIFTBENCH__THREADS=32` runs 32 concurrent workers
//! - `SWIFTBENCH__DATA_MODE=zeroes` uploads null bytes
//! - `SWIFTBENCH__LOGGING__LEVEL=debug` raises the log level
//!
//! # YAML Configuration File
//!
//! The above configuration in YAML format would look like this:
//!
//! ```yaml
//! threads: 32
//! data_mode: zeroes
//!
//! logging:
//!   level: debug
//! ```
//!
//! The loaded [`Config`] is validated into an immutable [`BenchmarkConfig`] before a run starts.

use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use bytesize::ByteSize;
use figment::providers::{Env, Format, Serialized, Yaml};
use secrecy::{CloneableSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::payload::DataMode;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "SWIFTBENCH__";

/// Prefix of the standard OpenStack client environment variables.
const OPENSTACK_ENV_PREFIX: &str = "OS_";

/// Fields that default from OpenStack client environment variables.
const OPENSTACK_ENV_KEYS: &[&str] = &["auth_url", "tenant_name", "username", "password", "proxy"];

/// Newtype around `String` that may protect against accidental
/// logging of secrets in our configuration struct. Use with
/// [`secrecy::SecretBox`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ConfigSecret {
    fn from(str: &str) -> Self {
        ConfigSecret(str.to_string())
    }
}

impl std::ops::Deref for ConfigSecret {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "[redacted]")
    }
}

impl CloneableSecret for ConfigSecret {}
impl SerializableSecret for ConfigSecret {}
impl Zeroize for ConfigSecret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// Wraps a plain password into a secret.
pub fn secret(value: &str) -> SecretBox<ConfigSecret> {
    SecretBox::new(Box::new(ConfigSecret::from(value)))
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    #[default]
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    Simplified,

    /// Dump out JSON lines.
    Json,
}

/// The logging format parse error.
#[derive(Clone, Debug)]
pub struct FormatParseError(String);

impl fmt::Display for FormatParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"error parsing "{}" as format: expected one of "auto", "pretty", "simplified", "json""#,
            self.0
        )
    }
}

impl std::str::FromStr for LogFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let result = match s {
            "" => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("auto") => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            s if s.eq_ignore_ascii_case("simplified") => LogFormat::Simplified,
            s if s.eq_ignore_ascii_case("json") => LogFormat::Json,
            s => return Err(FormatParseError(s.into())),
        };

        Ok(result)
    }
}

impl std::error::Error for FormatParseError {}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration.
///
/// Logs are always written to stderr, so that the timing report on stdout stays machine-readable.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// The `RUST_LOG` environment variable takes precedence and provides more granular control
    /// per module if needed. The `debug` flag raises this to at least `DEBUG`.
    ///
    /// # Default
    ///
    /// `INFO`
    ///
    /// # Environment Variable
    ///
    /// `SWIFTBENCH__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    ///
    /// # Default
    ///
    /// `Auto` (pretty for TTY, simplified otherwise)
    ///
    /// # Environment Variable
    ///
    /// `SWIFTBENCH__LOGGING__FORMAT`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Main configuration struct for a benchmark run.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// URL of the identity service, such as `https://identity.example.com:5000/v2.0`.
    ///
    /// # Environment Variables
    ///
    /// `OS_AUTH_URL` or `SWIFTBENCH__AUTH_URL`
    pub auth_url: Option<String>,

    /// Tenant to authenticate against.
    ///
    /// # Environment Variables
    ///
    /// `OS_TENANT_NAME` or `SWIFTBENCH__TENANT_NAME`
    pub tenant_name: Option<String>,

    /// User to authenticate as.
    ///
    /// # Environment Variables
    ///
    /// `OS_USERNAME` or `SWIFTBENCH__USERNAME`
    pub username: Option<String>,

    /// Password of [`username`](Self::username).
    ///
    /// # Environment Variables
    ///
    /// `OS_PASSWORD` or `SWIFTBENCH__PASSWORD`
    pub password: Option<SecretBox<ConfigSecret>>,

    /// Proxy for all requests to the identity and storage services.
    ///
    /// # Default
    ///
    /// `None` (system proxy settings apply)
    pub proxy: Option<String>,

    /// Number of concurrent workers.
    ///
    /// # Default
    ///
    /// `1`
    pub threads: usize,

    /// Number of puts, and of gets, each worker performs.
    ///
    /// # Default
    ///
    /// `1`
    pub iterations: usize,

    /// Size of each worker's object.
    ///
    /// # Default
    ///
    /// `1 KiB`
    pub object_size: ByteSize,

    /// Strategy used to fill objects.
    ///
    /// # Default
    ///
    /// `simple-text`
    pub data_mode: DataMode,

    /// Whether downloaded data is compared with the uploaded data.
    ///
    /// # Default
    ///
    /// `false`
    pub verify_data: bool,

    /// Enables debug output, including the identity service's catalog.
    pub debug: bool,

    /// Upper bound for every request to the identity and storage services.
    ///
    /// # Default
    ///
    /// `None` (requests may block indefinitely)
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,

    /// Logging configuration.
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth_url: None,
            tenant_name: None,
            username: None,
            password: None,
            proxy: None,
            threads: 1,
            iterations: 1,
            object_size: ByteSize::kib(1),
            data_mode: DataMode::default(),
            verify_data: false,
            debug: false,
            request_timeout: None,
            logging: Logging::default(),
        }
    }
}

/// Settings given on the command line, which override every other source.
///
/// Unset fields leave the value from lower-precedence sources untouched.
#[derive(Debug, Default, Serialize)]
pub struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<SecretBox<ConfigSecret>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<usize>,
    /// Object size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_mode: Option<DataMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_data: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
    #[serde(
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub request_timeout: Option<Duration>,
}

impl Config {
    /// Loads configuration from all sources.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if `path` is given)
    /// 3. OpenStack environment variables
    /// 4. Environment variables (prefixed with `SWIFTBENCH__`)
    /// 5. Command-line `overrides`
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The YAML configuration file cannot be read or parsed
    /// - Environment variables contain invalid values
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(OPENSTACK_ENV_PREFIX).only(OPENSTACK_ENV_KEYS))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides))
            .extract()?;

        Ok(config)
    }

    /// Validates the configuration into the immutable settings of one run.
    pub fn benchmark(&self) -> Result<BenchmarkConfig, ConfigError> {
        let threads = NonZeroUsize::new(self.threads).ok_or(ConfigError::Zero("threads"))?;
        let iterations =
            NonZeroUsize::new(self.iterations).ok_or(ConfigError::Zero("iterations"))?;

        Ok(BenchmarkConfig {
            threads,
            iterations,
            object_size: self.object_size.as_u64(),
            data_mode: self.data_mode,
            verify_data: self.verify_data,
            proxy: self.proxy.clone().filter(|proxy| !proxy.is_empty()),
            auth_url: required(&self.auth_url, "auth URL", "OS_AUTH_URL")?,
            tenant_name: required(&self.tenant_name, "tenant name", "OS_TENANT_NAME")?,
            username: required(&self.username, "username", "OS_USERNAME")?,
            password: self
                .password
                .clone()
                .ok_or(ConfigError::Missing("password", "OS_PASSWORD"))?,
            debug: self.debug,
            request_timeout: self.request_timeout,
        })
    }
}

fn required(
    value: &Option<String>,
    name: &'static str,
    env: &'static str,
) -> Result<String, ConfigError> {
    value
        .clone()
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::Missing(name, env))
}

/// Errors when validating a [`Config`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A count that must be positive was zero.
    #[error("{0} must be at least 1")]
    Zero(&'static str),
    /// A required setting was not provided by any source.
    #[error("missing {0}: pass it on the command line or set {1}")]
    Missing(&'static str, &'static str),
}

/// Immutable settings of one benchmark run.
///
/// Built once before the run and shared read-only by every worker.
#[derive(Debug)]
pub struct BenchmarkConfig {
    /// Number of concurrent workers.
    pub threads: NonZeroUsize,
    /// Number of puts, and of gets, per worker.
    pub iterations: NonZeroUsize,
    /// Object size in bytes.
    pub object_size: u64,
    /// Strategy used to fill objects.
    pub data_mode: DataMode,
    /// Whether downloads are verified against the uploaded data.
    pub verify_data: bool,
    /// Proxy for all requests, if any.
    pub proxy: Option<String>,
    /// URL of the identity service.
    pub auth_url: String,
    /// Tenant to authenticate against.
    pub tenant_name: String,
    /// User to authenticate as.
    pub username: String,
    /// Password of the user.
    pub password: SecretBox<ConfigSecret>,
    /// Enables debug output.
    pub debug: bool,
    /// Upper bound for every request, if any.
    pub request_timeout: Option<Duration>,
}

impl BenchmarkConfig {
    /// Creates settings for one worker uploading and downloading a 1 KiB text object once.
    pub fn new(auth_url: &str, tenant_name: &str, username: &str, password: &str) -> Self {
        Self {
            threads: NonZeroUsize::MIN,
            iterations: NonZeroUsize::MIN,
            object_size: ByteSize::kib(1).as_u64(),
            data_mode: DataMode::default(),
            verify_data: false,
            proxy: None,
            auth_url: auth_url.to_owned(),
            tenant_name: tenant_name.to_owned(),
            username: username.to_owned(),
            password: secret(password),
            debug: false,
            request_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use secrecy::ExposeSecret;

    use super::*;

    fn set_credentials(jail: &mut figment::Jail) {
        jail.set_env("OS_AUTH_URL", "https://identity.example.com:5000/v2.0");
        jail.set_env("OS_TENANT_NAME", "bench");
        jail.set_env("OS_USERNAME", "swift");
        jail.set_env("OS_PASSWORD", "hunter2");
    }

    #[test]
    fn uses_defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None, &Overrides::default()).unwrap();

            assert_eq!(config.threads, 1);
            assert_eq!(config.iterations, 1);
            assert_eq!(config.object_size, ByteSize::kib(1));
            assert_eq!(config.data_mode, DataMode::SimpleText);
            assert!(!config.verify_data);
            assert_eq!(config.request_timeout, None);
            assert_eq!(config.logging.level, LevelFilter::INFO);

            Ok(())
        });
    }

    #[test]
    fn credentials_default_from_openstack_env() {
        figment::Jail::expect_with(|jail| {
            set_credentials(jail);
            jail.set_env("OS_PROXY", "socks5://127.0.0.1:8080");
            jail.set_env("OS_REGION_NAME", "RegionOne");

            let config = Config::load(None, &Overrides::default()).unwrap();
            let benchmark = config.benchmark().unwrap();

            assert_eq!(benchmark.auth_url, "https://identity.example.com:5000/v2.0");
            assert_eq!(benchmark.tenant_name, "bench");
            assert_eq!(benchmark.username, "swift");
            assert_eq!(benchmark.password.expose_secret().as_str(), "hunter2");
            assert_eq!(benchmark.proxy.as_deref(), Some("socks5://127.0.0.1:8080"));

            Ok(())
        });
    }

    #[test]
    fn configurable_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("SWIFTBENCH__THREADS", "8");
            jail.set_env("SWIFTBENCH__ITERATIONS", "3");
            jail.set_env("SWIFTBENCH__OBJECT_SIZE", "64 KiB");
            jail.set_env("SWIFTBENCH__DATA_MODE", "random");
            jail.set_env("SWIFTBENCH__VERIFY_DATA", "true");
            jail.set_env("SWIFTBENCH__REQUEST_TIMEOUT", "30s");
            jail.set_env("SWIFTBENCH__LOGGING__LEVEL", "debug");
            jail.set_env("SWIFTBENCH__LOGGING__FORMAT", "json");

            let config = Config::load(None, &Overrides::default()).unwrap();

            assert_eq!(config.threads, 8);
            assert_eq!(config.iterations, 3);
            assert_eq!(config.object_size, ByteSize::kib(64));
            assert_eq!(config.data_mode, DataMode::PseudoRandom);
            assert!(config.verify_data);
            assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
            assert_eq!(config.logging.level, LevelFilter::DEBUG);
            assert_eq!(config.logging.format, LogFormat::Json);

            Ok(())
        });
    }

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            auth_url: http://localhost:5000/v2.0
            tenant_name: yaml-tenant
            username: yaml-user
            password: yaml-password
            threads: 4
            object_size: 1024
            data_mode: all-zero
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path()), &Overrides::default()).unwrap();
            let benchmark = config.benchmark().unwrap();

            assert_eq!(benchmark.threads.get(), 4);
            assert_eq!(benchmark.object_size, 1024);
            assert_eq!(benchmark.data_mode, DataMode::AllZero);
            assert_eq!(benchmark.tenant_name, "yaml-tenant");
            assert_eq!(benchmark.password.expose_secret().as_str(), "yaml-password");

            Ok(())
        });
    }

    #[test]
    fn command_line_overrides_everything() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            tenant_name: yaml-tenant
            threads: 4
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|jail| {
            set_credentials(jail);
            jail.set_env("SWIFTBENCH__THREADS", "8");

            let overrides = Overrides {
                threads: Some(16),
                object_size: Some(1_000_000),
                password: Some(secret("from-cli")),
                verify_data: Some(true),
                ..Default::default()
            };
            let config = Config::load(Some(tempfile.path()), &overrides).unwrap();
            let benchmark = config.benchmark().unwrap();

            // environment beats yaml, command line beats environment
            assert_eq!(benchmark.tenant_name, "bench");
            assert_eq!(benchmark.threads.get(), 16);
            assert_eq!(benchmark.object_size, 1_000_000);
            assert_eq!(benchmark.password.expose_secret().as_str(), "from-cli");
            assert!(benchmark.verify_data);

            Ok(())
        });
    }

    #[test]
    fn rejects_zero_counts() {
        figment::Jail::expect_with(|jail| {
            set_credentials(jail);
            jail.set_env("SWIFTBENCH__ITERATIONS", "0");

            let config = Config::load(None, &Overrides::default()).unwrap();
            let err = config.benchmark().unwrap_err();
            assert!(matches!(err, ConfigError::Zero("iterations")));

            Ok(())
        });
    }

    #[test]
    fn requires_credentials() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("OS_AUTH_URL", "http://localhost:5000/v2.0");
            jail.set_env("OS_TENANT_NAME", "bench");
            jail.set_env("OS_USERNAME", "swift");

            let config = Config::load(None, &Overrides::default()).unwrap();
            let err = config.benchmark().unwrap_err();
            assert!(matches!(err, ConfigError::Missing("password", "OS_PASSWORD")));

            Ok(())
        });
    }

    #[test]
    fn debug_output_hides_password() {
        figment::Jail::expect_with(|jail| {
            set_credentials(jail);

            let config = Config::load(None, &Overrides::default()).unwrap();
            assert!(!format!("{config:?}").contains("hunter2"));
            assert!(!format!("{:?}", config.benchmark().unwrap()).contains("hunter2"));

            Ok(())
        });
    }
}
