use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::commands::DEFAULT_ALLOWED_COMMANDS;
use crate::output_log::DEFAULT_MAX_LINES;
use crate::transport::duplex::ReconnectPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalMode {
    /// Request/response runs, input only while a program runs
    Local,
    /// Request/response runs plus allow-listed commands while idle
    Command,
    /// Streaming runs over the duplex channel
    Live,
}

impl FromStr for TerminalMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value {
            "local" => Ok(Self::Local),
            "command" => Ok(Self::Command),
            "live" => Ok(Self::Live),
            other => Err(anyhow::anyhow!(
                "Invalid PRACTICE_TERMINAL_MODE '{other}'. Expected 'local', 'command' or 'live'"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the backend (`/run_code`, `/execute_command`, `/ws/terminal`)
    pub api_base: String,
    pub mode: TerminalMode,
    /// Upper bound on a single request/response run or command
    pub run_timeout: Duration,
    pub allowed_commands: Vec<String>,
    pub reconnect: ReconnectPolicy,
    /// Output log cap; 0 means unbounded
    pub max_log_lines: usize,
    pub start_locked: bool,
    /// Overrides the language inferred from the source file
    pub language: Option<String>,
}

/// Optional TOML file named by `PRACTICE_TERMINAL_CONFIG`. Environment
/// variables win over anything set here.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub api_base: Option<String>,
    pub mode: Option<TerminalMode>,
    pub run_timeout_secs: Option<u64>,
    pub allowed_commands: Option<Vec<String>>,
    pub reconnect_max_attempts: Option<u32>,
    pub reconnect_base_ms: Option<u64>,
    pub reconnect_max_ms: Option<u64>,
    pub max_log_lines: Option<usize>,
    pub start_locked: Option<bool>,
    pub language: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {e}", path.display()))?;
        Self::parse(&raw)
            .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {e}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let file = match std::env::var("PRACTICE_TERMINAL_CONFIG") {
            Ok(path) => FileConfig::load(Path::new(&path))?,
            Err(_) => FileConfig::default(),
        };
        Self::from_file_and_env(file)
    }

    fn from_file_and_env(file: FileConfig) -> anyhow::Result<Self> {
        let mode = match std::env::var("PRACTICE_TERMINAL_MODE") {
            Ok(raw) => raw.parse()?,
            Err(_) => file.mode.unwrap_or(TerminalMode::Local),
        };
        let defaults = ReconnectPolicy::default();

        Ok(Self {
            api_base: env_str(
                "PRACTICE_API_BASE",
                file.api_base.as_deref().unwrap_or("http://127.0.0.1:5000"),
            ),
            mode,
            run_timeout: Duration::from_secs(env_parse(
                "PRACTICE_RUN_TIMEOUT_SECS",
                file.run_timeout_secs.unwrap_or(15),
            )?),
            allowed_commands: match file.allowed_commands {
                Some(list) => env_csv_or("PRACTICE_ALLOWED_COMMANDS", list),
                None => env_csv(
                    "PRACTICE_ALLOWED_COMMANDS",
                    DEFAULT_ALLOWED_COMMANDS,
                ),
            },
            reconnect: ReconnectPolicy {
                max_attempts: env_parse(
                    "PRACTICE_RECONNECT_MAX_ATTEMPTS",
                    file.reconnect_max_attempts.unwrap_or(defaults.max_attempts),
                )?,
                base_delay: Duration::from_millis(env_parse(
                    "PRACTICE_RECONNECT_BASE_MS",
                    file.reconnect_base_ms
                        .unwrap_or(defaults.base_delay.as_millis() as u64),
                )?),
                max_delay: Duration::from_millis(env_parse(
                    "PRACTICE_RECONNECT_MAX_MS",
                    file.reconnect_max_ms
                        .unwrap_or(defaults.max_delay.as_millis() as u64),
                )?),
                jitter: true,
            },
            max_log_lines: env_parse(
                "PRACTICE_MAX_LOG_LINES",
                file.max_log_lines.unwrap_or(DEFAULT_MAX_LINES),
            )?,
            start_locked: env_parse("PRACTICE_START_LOCKED", file.start_locked.unwrap_or(false))?,
            language: std::env::var("PRACTICE_LANGUAGE").ok().or(file.language),
        })
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn env_csv(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => split_csv(&raw),
        Err(_) => default.iter().map(|s| (*s).to_string()).collect(),
    }
}

fn env_csv_or(key: &str, default: Vec<String>) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => split_csv(&raw),
        Err(_) => default,
    }
}
