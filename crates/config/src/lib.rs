use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Upper bound for every `*_secs` setting in `[dispatch]`.
pub const MAX_DISPATCH_SECS: u64 = 24 * 60 * 60;

// ── Store backend ─────────────────────────────────────────────────────────────

/// Where the watermark document lives.
///
/// | Backend | Behaviour                                                   |
/// |---------|-------------------------------------------------------------|
/// | `gist`  | One file inside a GitHub Gist, replaced wholesale per save. |
/// | `file`  | A local JSON file, replaced atomically per save.            |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Gist,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SquabblesConfig {
    /// API root, without a trailing slash.  Overridden by `SQUABBLES_BASE_URL`.
    pub base_url: String,
    /// Bearer token for the bot account.  Overridden by `SQUABBLES_TOKEN`.
    pub token: String,
    /// User id the bot posts messages as.  Overridden by `NOTIFYBOT_ID`.
    pub bot_user_id: i64,
}

impl Default for SquabblesConfig {
    fn default() -> Self {
        Self {
            base_url: "https://squabblr.co/api".to_string(),
            token: String::new(),
            bot_user_id: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub gist_api_url: String,
    pub gist_id: String,
    pub gist_token: String,
    /// Name of the file inside the gist that holds the watermark document.
    pub gist_filename: String,
    /// Used when `backend = "file"`.
    pub file_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Gist,
            gist_api_url: "https://api.github.com".to_string(),
            gist_id: String::new(),
            gist_token: String::new(),
            gist_filename: "notifybot.json".to_string(),
            file_path: ".notifybot/notifybot.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Minimum spacing between two processing units, in seconds.
    pub cooldown_secs: u64,
    /// Timeout applied to every upstream HTTP call.
    pub request_timeout_secs: u64,
    /// Upper bound on one whole run.  Sources not started before the
    /// deadline are skipped and retried next run.
    pub run_deadline_secs: u64,
    /// Immediate retries after a failed send.  `0` means a single attempt
    /// per (item, watcher) pair.
    pub notify_retries: u32,
    /// Base delay for the exponential retry backoff.
    pub retry_backoff_ms: u64,
    /// Trailing window used to classify chat activity.
    pub chat_window_secs: u64,
    /// Messages inside the window at or above which a chat counts as busy.
    pub busy_threshold: usize,
    /// Advance never-seen sources (watermark 0) to their newest item without
    /// notifying anyone.
    pub prime_new_sources: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 15,
            request_timeout_secs: 30,
            run_deadline_secs: 600,
            notify_retries: 0,
            retry_backoff_ms: 500,
            chat_window_secs: 900,
            busy_threshold: 5,
            prime_new_sources: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// Optional file that receives a copy of every log line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub squabbles: SquabblesConfig,
    pub store: StoreConfig,
    pub dispatch: DispatchConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path.as_ref()) {
            config = toml::from_str(&raw)
                .with_context(|| format!("invalid config file {}", path.as_ref().display()))?;
        }

        config.apply_env_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay credentials and ids from the environment.  Empty values are
    /// ignored so a blank `.env` entry never wipes a configured value.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(token) = get("SQUABBLES_TOKEN") {
            self.squabbles.token = token;
        }
        if let Some(url) = get("SQUABBLES_BASE_URL") {
            self.squabbles.base_url = url;
        }
        if let Some(raw) = get("NOTIFYBOT_ID") {
            self.squabbles.bot_user_id = raw
                .trim()
                .parse()
                .with_context(|| format!("NOTIFYBOT_ID must be an integer, got {raw:?}"))?;
        }
        if let Some(token) = get("NOTIFYBOT_GIST_TOKEN") {
            self.store.gist_token = token;
        }
        if let Some(id) = get("NOTIFYBOT_GIST_ID") {
            self.store.gist_id = id;
        }
        Ok(())
    }

    /// Check that everything a live run needs is present.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.squabbles.token.trim().is_empty() {
            missing.push("squabbles.token (SQUABBLES_TOKEN)");
        }
        if self.squabbles.bot_user_id <= 0 {
            missing.push("squabbles.bot_user_id (NOTIFYBOT_ID)");
        }
        match self.store.backend {
            StoreBackend::Gist => {
                if self.store.gist_id.trim().is_empty() {
                    missing.push("store.gist_id (NOTIFYBOT_GIST_ID)");
                }
                if self.store.gist_token.trim().is_empty() {
                    missing.push("store.gist_token (NOTIFYBOT_GIST_TOKEN)");
                }
            }
            StoreBackend::File => {
                if self.store.file_path.trim().is_empty() {
                    missing.push("store.file_path");
                }
            }
        }
        if !missing.is_empty() {
            bail!("missing configuration: {}", missing.join(", "));
        }
        if self.dispatch.busy_threshold == 0 {
            bail!("dispatch.busy_threshold must be at least 1");
        }
        let bounded = [
            ("dispatch.cooldown_secs", self.dispatch.cooldown_secs),
            ("dispatch.request_timeout_secs", self.dispatch.request_timeout_secs),
            ("dispatch.run_deadline_secs", self.dispatch.run_deadline_secs),
            ("dispatch.chat_window_secs", self.dispatch.chat_window_secs),
        ];
        for (key, secs) in bounded {
            if secs > MAX_DISPATCH_SECS {
                bail!("{key} must be at most {MAX_DISPATCH_SECS}, got {secs}");
            }
        }
        if self.dispatch.chat_window_secs == 0 {
            bail!("dispatch.chat_window_secs must be at least 1");
        }
        Ok(())
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, self.render()?)?;
        Ok(())
    }

    pub fn render(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Copy of the config with every secret blanked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.squabbles.token.is_empty() {
            copy.squabbles.token = "<redacted>".to_string();
        }
        if !copy.store.gist_token.is_empty() {
            copy.store.gist_token = "<redacted>".to_string();
        }
        copy
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
