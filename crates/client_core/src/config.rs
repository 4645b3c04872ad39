use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::{bail, Context};
use url::Url;

use crate::store::DEFAULT_STORE_CAPACITY;
use shared::protocol::DEFAULT_PAGE_LIMIT;

pub const SETTINGS_FILE: &str = "viewer.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub page_limit: u32,
    pub refresh_interval_ms: u64,
    pub store_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".into(),
            page_limit: DEFAULT_PAGE_LIMIT,
            refresh_interval_ms: 2000,
            store_capacity: DEFAULT_STORE_CAPACITY,
        }
    }
}

impl Settings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms.max(1))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let url = Url::parse(&self.server_url)
            .with_context(|| format!("invalid server url '{}'", self.server_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("unsupported server url scheme '{}'", url.scheme());
        }
        if self.page_limit == 0 {
            bail!("page limit must be positive");
        }
        Ok(())
    }
}

/// Defaults, then `viewer.toml` in the working directory, then environment.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        apply_file_overrides(&mut settings, &raw);
    }
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());

    settings
}

pub fn load_settings_from(path: &Path) -> anyhow::Result<Settings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    let mut settings = Settings::default();
    apply_file_overrides(&mut settings, &raw);
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file_overrides(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(raw) else {
        return;
    };

    if let Some(v) = file_cfg.get("server_url").and_then(toml::Value::as_str) {
        settings.server_url = v.to_string();
    }
    if let Some(v) = file_cfg.get("page_limit").and_then(as_number) {
        if let Ok(parsed) = u32::try_from(v) {
            settings.page_limit = parsed;
        }
    }
    if let Some(v) = file_cfg.get("refresh_interval_ms").and_then(as_number) {
        settings.refresh_interval_ms = v;
    }
    if let Some(v) = file_cfg.get("store_capacity").and_then(as_number) {
        if let Ok(parsed) = usize::try_from(v) {
            settings.store_capacity = parsed;
        }
    }
}

fn as_number(value: &toml::Value) -> Option<u64> {
    match value {
        toml::Value::Integer(v) => u64::try_from(*v).ok(),
        toml::Value::String(v) => v.trim().parse().ok(),
        _ => None,
    }
}

fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("EVENT_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = lookup("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = lookup("APP__PAGE_LIMIT") {
        if let Ok(parsed) = v.trim().parse::<u32>() {
            settings.page_limit = parsed;
        }
    }

    if let Some(v) = lookup("APP__REFRESH_INTERVAL_MS") {
        if let Ok(parsed) = v.trim().parse::<u64>() {
            settings.refresh_interval_ms = parsed;
        }
    }

    if let Some(v) = lookup("APP__STORE_CAPACITY") {
        if let Ok(parsed) = v.trim().parse::<usize>() {
            settings.store_capacity = parsed;
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
