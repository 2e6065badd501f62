//! Configuration for the avatar load generator.
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Command line flags
//! 2. Environment variables (prefixed with `AVATAR__`)
//! 3. YAML configuration file (specified via the `--config` flag)
//! 4. Defaults
//!
//! Environment variables use double underscores (`__`) to denote nested configuration
//! structures, for example `AVATAR__LOGGING__LEVEL=debug`.
//!
//! ```yaml
//! host: profile.stage.mozaws.net
//! concurrency: 8
//! count: 0
//! timeout: 30s
//!
//! logging:
//!   level: debug
//!   format: json
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail, ensure};
use figment::providers::{Env, Format, Serialized, Yaml};
use secrecy::{CloneableSecret, ExposeSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::driver::DriverOptions;
use crate::window::DEFAULT_WINDOW_SIZE;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "AVATAR__";

/// Required length of the bearer token.
pub const BEARER_LENGTH: usize = 64;

/// Newtype around `String` that may protect against accidental
/// logging of secrets in our configuration struct. Use with
/// [`secrecy::SecretBox`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    /// Returns the secret as a string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ConfigSecret {
    fn from(str: &str) -> Self {
        ConfigSecret(str.to_string())
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

/// Log output format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    Simplified,

    /// Dump out JSON lines.
    Json,
}

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
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level, unless overridden by `RUST_LOG` or `verbose`.
    ///
    /// Defaults to `info`.
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format. Defaults to `auto`.
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

/// Runtime configuration of the load generator.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Hostname of the profile server. Defaults to `profile.stage.mozaws.net`.
    pub host: String,

    /// URL scheme used to reach `host`. Defaults to `https`.
    pub scheme: String,

    /// OAuth bearer token, exactly 64 characters. Required.
    pub bearer: Option<SecretBox<ConfigSecret>>,

    /// Number of concurrent transactions. Defaults to `2`.
    pub concurrency: usize,

    /// Total number of successful uploads to perform, `0` for unlimited. Defaults to `1000`.
    pub count: u64,

    /// Path to a PNG to upload instead of the bundled sample image.
    pub image: Option<PathBuf>,

    /// Logs every upload and download.
    pub verbose: bool,

    /// Deadline for every request. Unset by default, so requests run to completion.
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// Interval of the status report. Defaults to `2s`; `0s` disables the report.
    #[serde(with = "humantime_serde")]
    pub report_interval: Duration,

    /// Delay between the first uploads of consecutive slots. Defaults to `200ms`.
    #[serde(with = "humantime_serde")]
    pub stagger: Duration,

    /// Number of recent samples used for the rolling averages. Defaults to `10`.
    pub window_size: usize,

    /// Logging configuration.
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        let driver = DriverOptions::default();
        Self {
            host: "profile.stage.mozaws.net".into(),
            scheme: "https".into(),
            bearer: None,
            concurrency: driver.concurrency,
            count: driver.budget,
            image: None,
            verbose: false,
            timeout: None,
            report_interval: driver.report_interval,
            stagger: driver.stagger,
            window_size: DEFAULT_WINDOW_SIZE,
            logging: Logging::default(),
        }
    }
}

/// Values given on the command line, taking precedence over all other sources.
#[derive(Debug, Default, Serialize)]
pub struct Overrides {
    /// See [`Config::host`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// See [`Config::bearer`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer: Option<String>,
    /// See [`Config::concurrency`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    /// See [`Config::count`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// See [`Config::image`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<PathBuf>,
    /// See [`Config::verbose`]. Only overrides when set.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub verbose: bool,
}

impl Config {
    /// Loads the configuration from defaults, the optional YAML file at `path`, the environment
    /// and finally the command line `overrides`.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides))
            .extract()?;

        Ok(config)
    }

    /// Checks the constraints that cannot be expressed in the types.
    pub fn validate(&self) -> Result<()> {
        let Some(bearer) = &self.bearer else {
            bail!("missing option \"bearer\"");
        };
        let length = bearer.expose_secret().as_str().chars().count();
        ensure!(
            length == BEARER_LENGTH,
            "invalid bearer token: expected {BEARER_LENGTH} characters, got {length}"
        );
        ensure!(self.concurrency > 0, "concurrency must be at least 1");
        ensure!(self.window_size > 0, "window_size must be at least 1");
        Ok(())
    }

    /// The bearer token, if configured.
    pub fn bearer(&self) -> Option<&str> {
        self.bearer
            .as_ref()
            .map(|bearer| bearer.expose_secret().as_str())
    }

    /// The options for the [`LoadDriver`](crate::LoadDriver).
    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            concurrency: self.concurrency,
            budget: self.count,
            stagger: self.stagger,
            report_interval: self.report_interval,
            window_size: self.window_size,
        }
    }
}
