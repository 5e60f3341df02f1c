#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs, io,
    path::{Path, PathBuf},
};

use crate::download::DEFAULT_MAX_BYTES;
use crate::link::DEFAULT_DRIVE_BASE;
use crate::transcode::DEFAULT_ENCODER;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "127.0.0.1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub ffmpeg: PathBuf,
    /// `None` means the OS temp directory.
    pub temp_dir: Option<PathBuf>,
    pub max_bytes: u64,
    pub drive_base: String,
    pub keep_download: bool,
    pub host: String,
    pub port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from(DEFAULT_ENCODER),
            temp_dir: None,
            max_bytes: DEFAULT_MAX_BYTES,
            drive_base: DEFAULT_DRIVE_BASE.to_string(),
            keep_download: false,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

pub fn load_settings() -> Result<Settings> {
    resolve_settings(SettingsOverrides::default())
}

/// Command-line values; each one beats both the environment and the `.env` file.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub ffmpeg: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub max_bytes: Option<u64>,
    pub keep_download: Option<bool>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_settings(overrides: SettingsOverrides) -> Result<Settings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_settings_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<Settings> {
    build_settings_with_overrides(file_vars, env_lookup, SettingsOverrides::default())
}

fn build_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> Result<Settings> {
    let defaults = Settings::default();
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let ffmpeg = overrides
        .ffmpeg
        .or_else(|| lookup("REENCODE_FFMPEG").map(PathBuf::from))
        .unwrap_or(defaults.ffmpeg);
    let temp_dir = overrides
        .temp_dir
        .or_else(|| lookup("REENCODE_TEMP_DIR").map(PathBuf::from));
    let max_bytes = overrides
        .max_bytes
        .or_else(|| lookup("REENCODE_MAX_BYTES").and_then(|value| value.parse::<u64>().ok()))
        .filter(|value| *value > 0)
        .unwrap_or(defaults.max_bytes);
    let drive_base = lookup("REENCODE_DRIVE_BASE").unwrap_or(defaults.drive_base);
    let keep_download = overrides
        .keep_download
        .or_else(|| lookup("REENCODE_KEEP_DOWNLOAD").and_then(|value| parse_flag(&value)))
        .unwrap_or(defaults.keep_download);
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup("REENCODE_HOST"))
        .unwrap_or(defaults.host);
    let port = overrides
        .port
        .or_else(|| lookup("REENCODE_PORT").and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(defaults.port);

    Ok(Settings {
        ffmpeg,
        temp_dir,
        max_bytes,
        drive_base,
        keep_download,
        host,
        port,
    })
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string())
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .filter(|value| !value.trim().is_empty())
}

/// Reads a `.env`-style settings file into a map. A missing file is not an
/// error; every other read failure is.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("reading settings file {}", path.display()));
        }
    };
    Ok(content.lines().filter_map(parse_env_line).collect())
}

/// `KEY=value`, optionally behind `export`. Comment lines, lines without `=`
/// and keys containing whitespace are skipped.
fn parse_env_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.starts_with('#') {
        return None;
    }
    let line = line
        .strip_prefix("export ")
        .map(str::trim_start)
        .unwrap_or(line);
    let (key, raw) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key.to_string(), unquote(raw.trim())))
}

fn unquote(raw: &str) -> String {
    for quote in ['"', '\''] {
        if let Some(inner) = raw
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner.to_string();
        }
    }
    // Unquoted values may carry a trailing comment.
    match raw.split_once(" #") {
        Some((value, _)) => value.trim_end().to_string(),
        None => raw.to_string(),
    }
}
