use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use serde::Deserialize;

/// All configuration for the cinema client.
///
/// Precedence (lowest to highest): defaults → config file → env var → CLI arg.
/// CLI arg merging is done by the caller after `Config::load()`.
#[derive(Debug, Clone)]
pub struct Config {
    // Backend
    pub api_base_url: String,
    pub request_timeout_secs: u64,

    // Logging
    pub log_level: String,
    pub utc: bool,

    // Schedule
    pub timezone: Tz,
    pub reject_stale_saves: bool,
    pub base_price: f64,
    pub base_vip_price: f64,

    // Auth
    pub session_file: PathBuf,

    /// Settings that were ignored while loading; logged once tracing is up.
    pub warnings: Vec<String>,
}

/// Config file layout (~/.cinema/config.toml). All fields optional; they layer
/// on top of compiled-in defaults.
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    api_base_url: Option<String>,
    request_timeout_secs: Option<u64>,
    log_level: Option<String>,
    utc: Option<bool>,
    timezone: Option<String>,
    reject_stale_saves: Option<bool>,
    base_price: Option<f64>,
    base_vip_price: Option<f64>,
    session_file: Option<PathBuf>,
}

impl Config {
    /// Config directory: ~/.cinema/
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cinema")
    }

    /// Config file path: ~/.cinema/config.toml
    pub fn file_path() -> PathBuf {
        Self::dir().join("config.toml")
    }

    /// Load config: defaults → config file → env vars.
    /// CLI args should be merged by the caller afterward.
    pub fn load() -> Self {
        Self::load_from(&Self::file_path())
    }

    /// Same as [`Config::load`] with an explicit config file location.
    pub fn load_from(path: &Path) -> Self {
        let mut config = Self::defaults();

        // Layer 2: config file
        if let Ok(contents) = std::fs::read_to_string(path) {
            if let Ok(file) = toml::from_str::<FileConfig>(&contents) {
                config.apply_file(file);
            }
        }

        // Layer 3: environment variables
        config.apply_env();

        config
    }

    // --- Private helpers ---

    fn defaults() -> Self {
        Self {
            api_base_url: "http://localhost:8080/".to_string(),
            request_timeout_secs: 15,
            log_level: "info".to_string(),
            utc: false,
            timezone: chrono_tz::Europe::Kyiv,
            reject_stale_saves: true,
            base_price: 120.0,
            base_vip_price: 180.0,
            session_file: Self::dir().join("session.json"),
            warnings: Vec::new(),
        }
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.api_base_url { self.api_base_url = v; }
        if let Some(v) = file.request_timeout_secs { self.request_timeout_secs = v; }
        if let Some(v) = file.log_level { self.log_level = v; }
        if let Some(v) = file.utc { self.utc = v; }
        if let Some(v) = file.timezone { self.set_timezone(&v, "config file"); }
        if let Some(v) = file.reject_stale_saves { self.reject_stale_saves = v; }
        if let Some(v) = file.base_price { self.base_price = v; }
        if let Some(v) = file.base_vip_price { self.base_vip_price = v; }
        if let Some(v) = file.session_file { self.session_file = v; }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("CINEMA_API_URL") { self.api_base_url = v; }
        if let Ok(v) = std::env::var("CINEMA_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() { self.request_timeout_secs = n; }
        }
        if let Ok(v) = std::env::var("CINEMA_LOG_LEVEL") { self.log_level = v; }
        if let Ok(v) = std::env::var("CINEMA_UTC") {
            self.utc = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("CINEMA_TIMEZONE") { self.set_timezone(&v, "CINEMA_TIMEZONE"); }
        if let Ok(v) = std::env::var("CINEMA_REJECT_STALE") {
            self.reject_stale_saves = !(v == "0" || v.eq_ignore_ascii_case("false"));
        }
        if let Ok(v) = std::env::var("CINEMA_SESSION_FILE") { self.session_file = PathBuf::from(v); }
    }

    fn set_timezone(&mut self, value: &str, source: &str) {
        match value.parse::<Tz>() {
            Ok(tz) => self.timezone = tz,
            Err(_) => self.warnings.push(format!(
                "Unknown time zone {value:?} in {source}; keeping {}",
                self.timezone
            )),
        }
    }
}
