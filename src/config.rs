//! Session settings.
//!
//! [`SessionConfig`] is the immutable record one run is driven by. It is resolved once at
//! startup with precedence CLI overrides > environment > saved settings file > defaults.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::{AddressOptions, Error, Provider, Result};

/// How new messages are printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Boxed, decorated output.
    #[default]
    Rich,
    /// Plain text with separators.
    Plain,
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DisplayMode::Rich => "rich",
            DisplayMode::Plain => "plain",
        })
    }
}

impl FromStr for DisplayMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rich" => Ok(DisplayMode::Rich),
            "plain" => Ok(DisplayMode::Plain),
            other => Err(Error::Config(format!(
                "unknown display mode `{other}` (expected rich or plain)"
            ))),
        }
    }
}

/// Immutable settings for one watch session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    provider: Provider,
    poll_interval: Duration,
    display_mode: DisplayMode,
    persist_history: bool,
    history_path: PathBuf,
    address_options: AddressOptions,
}

impl SessionConfig {
    /// Build a config, rejecting a zero poll interval.
    pub fn new(
        provider: Provider,
        poll_interval_seconds: u64,
        display_mode: DisplayMode,
        persist_history: bool,
        history_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        if poll_interval_seconds == 0 {
            return Err(Error::Config(
                "poll interval must be a positive number of seconds".to_string(),
            ));
        }
        Ok(Self {
            provider,
            poll_interval: Duration::from_secs(poll_interval_seconds),
            display_mode,
            persist_history,
            history_path: history_path.into(),
            address_options: AddressOptions::default(),
        })
    }

    /// Attach provider-specific address options.
    pub fn with_address_options(mut self, options: AddressOptions) -> Self {
        self.address_options = options;
        self
    }

    /// Selected provider.
    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Sleep between poll cycles.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Output style for new messages.
    pub fn display_mode(&self) -> DisplayMode {
        self.display_mode
    }

    /// Whether history is written to disk.
    pub fn persist_history(&self) -> bool {
        self.persist_history
    }

    /// Where history is written when persistence is on.
    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    /// Options passed to every `create_address` call.
    pub fn address_options(&self) -> &AddressOptions {
        &self.address_options
    }
}

/// Values supplied on the command line; `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Provider positional argument.
    pub provider: Option<Provider>,
    /// `--poll`.
    pub poll_interval: Option<u64>,
    /// `--display`.
    pub display_mode: Option<DisplayMode>,
    /// `--no-save`.
    pub no_save: bool,
    /// `--proxy`.
    pub proxy: Option<String>,
    /// `--rush`, `--domain`, `--alias`.
    pub address_options: AddressOptions,
}

/// Saved user preferences (`config.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Provider used when none is given.
    pub default_provider: Provider,
    /// Seconds between polls.
    pub poll_interval: u64,
    /// Persist received messages.
    pub save_messages: bool,
    /// Output style.
    pub display_mode: DisplayMode,
    /// Optional proxy URL for all provider traffic.
    pub proxy: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Most messages kept in the history file across runs.
    pub max_history_entries: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_provider: Provider::MailTm,
            poll_interval: 5,
            save_messages: true,
            display_mode: DisplayMode::Rich,
            proxy: None,
            timeout_secs: 15,
            max_history_entries: 50,
        }
    }
}

impl Settings {
    /// Directory holding `config.json` and `history.json`.
    pub fn config_dir() -> Result<PathBuf> {
        ProjectDirs::from("", "", "tempmail-watcher")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or_else(|| Error::Config("cannot determine a home directory".to_string()))
    }

    /// Load settings from `path`.
    ///
    /// A missing file yields defaults; an unreadable or invalid one is logged and also
    /// yields defaults so a broken file never blocks a run. Out-of-range values fall back
    /// to their defaults individually.
    pub fn load(path: &Path) -> Self {
        let settings: Self = match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => {
                    tracing::debug!(path = %path.display(), "loaded settings");
                    settings
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "invalid settings file, using defaults"
                    );
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "cannot read settings file, using defaults"
                );
                Self::default()
            }
        };
        settings.sanitized()
    }

    fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.poll_interval == 0 {
            tracing::warn!(field = "poll_interval", "ignoring zero value in settings file");
            self.poll_interval = defaults.poll_interval;
        }
        if self.timeout_secs == 0 {
            tracing::warn!(field = "timeout_secs", "ignoring zero value in settings file");
            self.timeout_secs = defaults.timeout_secs;
        }
        if self.max_history_entries == 0 {
            tracing::warn!(field = "max_history_entries", "ignoring zero value in settings file");
            self.max_history_entries = defaults.max_history_entries;
        }
        self
    }

    /// Write settings to `path`, creating its directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Apply `TEMPMAIL_*` environment overrides.
    ///
    /// Takes a resolver so tests need not mutate the process environment.
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("TEMPMAIL_PROVIDER") {
            match v.parse() {
                Ok(p) => self.default_provider = p,
                Err(e) => {
                    tracing::warn!(
                        var = "TEMPMAIL_PROVIDER",
                        error = %e,
                        "ignoring invalid env override"
                    )
                }
            }
        }
        if let Some(v) = env("TEMPMAIL_POLL_INTERVAL") {
            match v.parse::<u64>() {
                Ok(n) if n > 0 => self.poll_interval = n,
                _ => {
                    tracing::warn!(
                        var = "TEMPMAIL_POLL_INTERVAL",
                        value = %v,
                        "ignoring invalid env override"
                    )
                }
            }
        }
        if let Some(v) = env("TEMPMAIL_DISPLAY") {
            match v.parse() {
                Ok(mode) => self.display_mode = mode,
                Err(e) => {
                    tracing::warn!(
                        var = "TEMPMAIL_DISPLAY",
                        error = %e,
                        "ignoring invalid env override"
                    )
                }
            }
        }
        if let Some(v) = env("TEMPMAIL_PROXY") {
            self.proxy = Some(v).filter(|p| !p.trim().is_empty());
        }
    }

    /// Fold CLI overrides into these settings, so they can be saved as the new defaults.
    ///
    /// `--no-save` only affects the run it is given on and is not folded in.
    pub fn merge(&mut self, overrides: &Overrides) {
        if let Some(provider) = overrides.provider {
            self.default_provider = provider;
        }
        if let Some(poll) = overrides.poll_interval {
            self.poll_interval = poll;
        }
        if let Some(mode) = overrides.display_mode {
            self.display_mode = mode;
        }
        if let Some(proxy) = &overrides.proxy {
            self.proxy = Some(proxy.clone());
        }
    }

    /// Produce the session config for this run.
    pub fn resolve(&self, overrides: &Overrides, history_path: PathBuf) -> Result<SessionConfig> {
        let mut merged = self.clone();
        merged.merge(overrides);
        Ok(SessionConfig::new(
            merged.default_provider,
            merged.poll_interval,
            merged.display_mode,
            merged.save_messages && !overrides.no_save,
            history_path,
        )?
        .with_address_options(overrides.address_options.clone()))
    }
}
