use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, fmt, fs, io};

use log::LevelFilter;
use serde::de;
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::constants::*;

//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults;

impl ConfigDefaults {
    fn storage_uri() -> Url {
        // The literal is known to parse.
        Url::parse("local:///var/lib/docsign/").unwrap()
    }

    fn log_level() -> LevelFilter {
        match env::var(DOCSIGN_ENV_LOG_LEVEL) {
            Ok(level) => match LevelFilter::from_str(&level) {
                Ok(level) => level,
                Err(_) => {
                    eprintln!(
                        "Unrecognized value for log level in env var {}",
                        DOCSIGN_ENV_LOG_LEVEL
                    );
                    ::std::process::exit(1);
                }
            },
            _ => LevelFilter::Info,
        }
    }

    fn log_type() -> LogType {
        LogType::Stderr
    }

    fn log_file() -> PathBuf {
        PathBuf::from("./docsign.log")
    }

    fn session_ttl_minutes() -> i64 {
        DEFAULT_SESSION_TTL_MINUTES
    }

    fn session_sweep_seconds() -> u64 {
        DEFAULT_SESSION_SWEEP_SECONDS
    }

    fn max_batch_size() -> usize {
        DEFAULT_MAX_BATCH_SIZE
    }

    fn certificate_expiry_warning_days() -> i64 {
        DEFAULT_EXPIRY_WARNING_DAYS
    }

    fn default_location() -> String {
        DEFAULT_SIGNING_LOCATION.to_string()
    }
}

//------------ Config --------------------------------------------------------

/// Global configuration for docsign.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "ConfigDefaults::storage_uri")]
    pub storage_uri: Url,

    #[serde(
        default = "ConfigDefaults::log_level",
        deserialize_with = "de_level_filter",
        serialize_with = "ser_level_filter"
    )]
    pub log_level: LevelFilter,

    #[serde(default = "ConfigDefaults::log_type")]
    pub log_type: LogType,

    #[serde(default = "ConfigDefaults::log_file")]
    pub log_file: PathBuf,

    #[serde(default = "ConfigDefaults::session_ttl_minutes")]
    pub session_ttl_minutes: i64,

    #[serde(default = "ConfigDefaults::session_sweep_seconds")]
    pub session_sweep_seconds: u64,

    #[serde(default = "ConfigDefaults::max_batch_size")]
    pub max_batch_size: usize,

    #[serde(default = "ConfigDefaults::certificate_expiry_warning_days")]
    pub certificate_expiry_warning_days: i64,

    /// The location put on signatures made in a batch.
    #[serde(default = "ConfigDefaults::default_location")]
    pub default_location: String,

    /// The PKCS#11 libraries of the CA providers, tried in name order.
    #[serde(default)]
    pub ca_providers: BTreeMap<String, CaProviderConfig>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CaProviderConfig {
    pub library_path: PathBuf,

    /// Only use tokens with this label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Config {
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.session_ttl_minutes)
    }

    pub fn session_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.session_sweep_seconds)
    }
}

impl Config {
    /// A configuration for tests: memory storage unless a directory is
    /// given, a 15 minute session life time and logging to stderr.
    pub fn test_config(data_dir: Option<&Path>) -> Self {
        let storage_uri = match data_dir {
            Some(dir) => Url::parse(&format!("local://{}/", dir.display()))
                .unwrap_or_else(|_| Url::parse("memory:").unwrap()),
            None => Url::parse("memory:").unwrap(),
        };

        Config {
            storage_uri,
            log_level: LevelFilter::Debug,
            log_type: LogType::Stderr,
            log_file: ConfigDefaults::log_file(),
            session_ttl_minutes: 15,
            session_sweep_seconds: 60,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            certificate_expiry_warning_days: DEFAULT_EXPIRY_WARNING_DAYS,
            default_location: DEFAULT_SIGNING_LOCATION.to_string(),
            ca_providers: BTreeMap::new(),
        }
    }

    /// Reads, verifies and applies the configuration at start up.
    ///
    /// A missing file is only acceptable if it is the default file, in
    /// which case the defaults are used.
    pub fn create(config_file: &str) -> Result<Self, ConfigError> {
        let config = match Self::read_config(config_file) {
            Ok(config) => config,
            Err(ConfigError::IoError(e))
                if e.kind() == io::ErrorKind::NotFound
                    && config_file == DOCSIGN_DEFAULT_CONFIG_FILE =>
            {
                Self::from_toml("")?
            }
            Err(e) => {
                return Err(ConfigError::Other(format!(
                    "Error parsing config file: {}, error: {}",
                    config_file, e
                )));
            }
        };

        config.init_logging()?;
        info!("{} uses configuration file: {}", DOCSIGN_APP, config_file);

        config.verify().map_err(|e| {
            ConfigError::Other(format!(
                "Error parsing config file: {}, error: {}",
                config_file, e
            ))
        })?;
        Ok(config)
    }

    pub fn verify(&self) -> Result<(), ConfigError> {
        if self.session_ttl_minutes < 1 {
            return Err(ConfigError::other("session_ttl_minutes must be at least 1"));
        }

        if self.session_sweep_seconds < 1 {
            return Err(ConfigError::other("session_sweep_seconds must be at least 1"));
        }

        if self.max_batch_size < 1 {
            return Err(ConfigError::other("max_batch_size must be at least 1"));
        }

        if self.certificate_expiry_warning_days < 0 {
            return Err(ConfigError::other(
                "certificate_expiry_warning_days cannot be negative",
            ));
        }

        match self.storage_uri.scheme() {
            "memory" | "local" | "file" => {}
            scheme => {
                return Err(ConfigError::Other(format!(
                    "unsupported storage_uri scheme '{}'",
                    scheme
                )));
            }
        }

        for (name, provider) in &self.ca_providers {
            if provider.library_path.as_os_str().is_empty() {
                return Err(ConfigError::Other(format!(
                    "ca provider '{}' needs a library_path",
                    name
                )));
            }
        }

        Ok(())
    }

    pub fn read_config(file: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(file)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match self.log_type {
            LogType::File => self.file_logger(&self.log_file),
            LogType::Stderr => self.stderr_logger(),
        }
    }

    /// Creates a stderr logger.
    fn stderr_logger(&self) -> Result<(), ConfigError> {
        self.fern_logger()
            .chain(io::stderr())
            .apply()
            .map_err(|e| ConfigError::Other(format!("Failed to init stderr logging: {}", e)))
    }

    /// Creates a file logger using the file provided by `path`.
    fn file_logger(&self, path: &Path) -> Result<(), ConfigError> {
        let file = match fern::log_file(path) {
            Ok(file) => file,
            Err(err) => {
                let error_string =
                    format!("Failed to open log file '{}': {}", path.display(), err);
                error!("{}", error_string.as_str());
                return Err(ConfigError::Other(error_string));
            }
        };
        self.fern_logger()
            .chain(file)
            .apply()
            .map_err(|e| ConfigError::Other(format!("Failed to init file logging: {}", e)))
    }

    /// Creates and returns a fern logger with log level tweaks
    fn fern_logger(&self) -> fern::Dispatch {
        // suppress overly noisy logging
        let framework_level = self.log_level.min(LevelFilter::Warn);
        let storage_level = self.log_level.min(LevelFilter::Debug);

        let show_target =
            self.log_level == LevelFilter::Trace || self.log_level == LevelFilter::Debug;
        fern::Dispatch::new()
            .format(move |out, message, record| {
                if show_target {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        message
                    ))
                }
            })
            .level(self.log_level)
            .level_for("cryptoki", framework_level)
            .level_for("mio", framework_level)
            .level_for("tokio", framework_level)
            .level_for("docsign::commons::file", storage_level)
            .level_for("docsign::ledger::disk", storage_level)
    }
}

fn de_level_filter<'de, D>(d: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let string = String::deserialize(d)?;
    LevelFilter::from_str(&string)
        .map_err(|_| de::Error::custom(format!("invalid log level '{}'", string)))
}

fn ser_level_filter<S>(level: &LevelFilter, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_str(&level.to_string().to_lowercase())
}

//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    IoError(io::Error),
    TomlError(toml::de::Error),
    Other(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => e.fmt(f),
            ConfigError::TomlError(e) => e.fmt(f),
            ConfigError::Other(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    pub fn other(s: &str) -> ConfigError {
        ConfigError::Other(s.to_string())
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::IoError(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::TomlError(e)
    }
}

//------------ LogType -------------------------------------------------------

/// The target to log to.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Stderr,
    File,
}

impl<'de> Deserialize<'de> for LogType {
    fn deserialize<D>(d: D) -> Result<LogType, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(d)?;
        match string.as_str() {
            "stderr" => Ok(LogType::Stderr),
            "file" => Ok(LogType::File),
            _ => Err(de::Error::custom(format!(
                "expected \"stderr\" or \"file\", found : \"{}\"",
                string
            ))),
        }
    }
}

//------------ Tests ---------------------------------------------------------
