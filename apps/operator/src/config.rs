use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::Context;
use client_core::{ChannelConfig, ReconnectPolicy, TriggerOptions};
use serde::Deserialize;
use shared::domain::{DisasterKind, GeoPoint, Severity};
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "operator.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub server_url: String,
    pub channel_path: String,
    pub disaster_type: DisasterKind,
    pub severity: Severity,
    pub location: GeoPoint,
    pub use_real_apis: bool,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    /// Zero disables keepalive pings.
    pub keepalive_secs: u64,
    pub request_timeout_secs: u64,
    pub job_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".into(),
            channel_path: "/ws".into(),
            disaster_type: DisasterKind::Wildfire,
            severity: Severity::High,
            location: GeoPoint::default(),
            use_real_apis: false,
            reconnect_initial_ms: 1_000,
            reconnect_max_ms: 30_000,
            keepalive_secs: 20,
            request_timeout_secs: 15,
            job_timeout_secs: 600,
        }
    }
}

/// Optional overrides read from the TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    server_url: Option<String>,
    channel_path: Option<String>,
    disaster_type: Option<DisasterKind>,
    severity: Option<Severity>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    use_real_apis: Option<bool>,
    reconnect_initial_ms: Option<u64>,
    reconnect_max_ms: Option<u64>,
    keepalive_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    job_timeout_secs: Option<u64>,
}

impl Settings {
    pub fn trigger_options(&self) -> TriggerOptions {
        TriggerOptions {
            kind: self.disaster_type,
            location: self.location,
            severity: self.severity,
            use_real_apis: self.use_real_apis,
            metadata: None,
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
        }
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            path: self.channel_path.clone(),
            keepalive: (self.keepalive_secs > 0).then(|| Duration::from_secs(self.keepalive_secs)),
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_millis(self.reconnect_initial_ms.max(1)),
                max_delay: Duration::from_millis(
                    self.reconnect_max_ms.max(self.reconnect_initial_ms),
                ),
            },
            ..ChannelConfig::default()
        }
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    fn merge_file(&mut self, file: FileSettings) {
        if let Some(v) = file.server_url {
            self.server_url = v;
        }
        if let Some(v) = file.channel_path {
            self.channel_path = v;
        }
        if let Some(v) = file.disaster_type {
            self.disaster_type = v;
        }
        if let Some(v) = file.severity {
            self.severity = v;
        }
        if let Some(v) = file.latitude {
            self.location.lat = v;
        }
        if let Some(v) = file.longitude {
            self.location.lon = v;
        }
        if let Some(v) = file.use_real_apis {
            self.use_real_apis = v;
        }
        if let Some(v) = file.reconnect_initial_ms {
            self.reconnect_initial_ms = v;
        }
        if let Some(v) = file.reconnect_max_ms {
            self.reconnect_max_ms = v;
        }
        if let Some(v) = file.keepalive_secs {
            self.keepalive_secs = v;
        }
        if let Some(v) = file.request_timeout_secs {
            self.request_timeout_secs = v;
        }
        if let Some(v) = file.job_timeout_secs {
            self.job_timeout_secs = v;
        }
    }

    /// Apply environment overrides. `lookup` is `std::env::var` in production.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("RAPID_SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = lookup("APP__SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = lookup("APP__CHANNEL_PATH") {
            self.channel_path = v;
        }
        parse_env(&lookup, "APP__DISASTER_TYPE", &mut self.disaster_type);
        parse_env(&lookup, "APP__SEVERITY", &mut self.severity);
        parse_env(&lookup, "APP__LATITUDE", &mut self.location.lat);
        parse_env(&lookup, "APP__LONGITUDE", &mut self.location.lon);
        parse_env(&lookup, "APP__USE_REAL_APIS", &mut self.use_real_apis);
        parse_env(&lookup, "APP__RECONNECT_INITIAL_MS", &mut self.reconnect_initial_ms);
        parse_env(&lookup, "APP__RECONNECT_MAX_MS", &mut self.reconnect_max_ms);
        parse_env(&lookup, "APP__KEEPALIVE_SECS", &mut self.keepalive_secs);
        parse_env(&lookup, "APP__REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs);
        parse_env(&lookup, "APP__JOB_TIMEOUT_SECS", &mut self.job_timeout_secs);
    }
}

fn parse_env<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => warn!(key, value = %raw, "ignoring unparsable environment override"),
    }
}

/// Defaults, then the TOML file, then the environment.
///
/// A missing file is only an error when the path was given explicitly.
pub fn load_settings(explicit_path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let path = explicit_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    match fs::read_to_string(&path) {
        Ok(raw) => {
            let file: FileSettings = toml::from_str(&raw)
                .with_context(|| format!("invalid settings file '{}'", path.display()))?;
            settings.merge_file(file);
        }
        Err(err) if explicit_path.is_none() && err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read settings file '{}'", path.display()))
        }
    }

    settings.apply_env(|key| std::env::var(key).ok());
    Ok(settings)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
