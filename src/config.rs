#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_HOST: &str = "127.0.0.1";

pub const DEFAULT_MAX_HEIGHT: u32 = 720;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_SOCKET_TIMEOUT_SECONDS: u64 = 15;
pub const DEFAULT_BACKOFF_SECONDS: u64 = 2;
pub const DEFAULT_MAX_RESULTS: usize = 5;
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &["mp4", "webm", "m4a"];

/// Tuning knobs handed to the orchestrator for every extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionConfig {
    /// Upper bound for the `best[height<=N]` format selector.
    pub max_height: u32,
    /// Total attempt budget, including the first try.
    pub max_retries: u32,
    /// Per-attempt socket timeout passed straight to the extractor.
    pub socket_timeout: Duration,
    /// Fixed delay between failed attempts. Not exponential.
    pub backoff: Duration,
    /// Cap on the returned format list. `None` returns everything.
    pub max_results: Option<usize>,
    /// Container whitelist for normalization. Empty disables the filter.
    pub allowed_extensions: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_height: DEFAULT_MAX_HEIGHT,
            max_retries: DEFAULT_MAX_RETRIES,
            socket_timeout: Duration::from_secs(DEFAULT_SOCKET_TIMEOUT_SECONDS),
            backoff: Duration::from_secs(DEFAULT_BACKOFF_SECONDS),
            max_results: Some(DEFAULT_MAX_RESULTS),
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

/// Everything the backend needs at startup.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub download_root: PathBuf,
    pub port: u16,
    pub host: String,
    pub extraction: ExtractionConfig,
}

pub fn load_runtime_settings() -> Result<RuntimeSettings> {
    resolve_runtime_settings(RuntimeOverrides::default())
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub download_root: Option<PathBuf>,
    pub port: Option<u16>,
    pub host: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_settings(overrides: RuntimeOverrides) -> Result<RuntimeSettings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_runtime_settings_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_runtime_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<RuntimeSettings> {
    build_runtime_settings_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeSettings> {
    let download_root = overrides
        .download_root
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup_value("DOWNLOAD_ROOT", file_vars, &env_lookup))
        .ok_or_else(|| anyhow!("DOWNLOAD_ROOT not set"))?;
    let port = overrides
        .port
        .or_else(|| {
            lookup_value("TUBERELAY_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_PORT);
    let host = overrides
        .host
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() { None } else { Some(trimmed) }
        })
        .or_else(|| lookup_value("TUBERELAY_HOST", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());

    let extraction = build_extraction_config(file_vars, &env_lookup);

    Ok(RuntimeSettings {
        download_root: PathBuf::from(download_root),
        port,
        host,
        extraction,
    })
}

fn build_extraction_config(
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> ExtractionConfig {
    let defaults = ExtractionConfig::default();
    let max_height = lookup_value("MAX_HEIGHT", file_vars, env_lookup)
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(defaults.max_height);
    let max_retries = lookup_value("MAX_RETRIES", file_vars, env_lookup)
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|retries| *retries > 0)
        .unwrap_or(defaults.max_retries);
    let socket_timeout = lookup_value("SOCKET_TIMEOUT", file_vars, env_lookup)
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(defaults.socket_timeout);
    let backoff = lookup_value("BACKOFF_SECONDS", file_vars, env_lookup)
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(defaults.backoff);
    let max_results = match lookup_value("MAX_RESULTS", file_vars, env_lookup) {
        // 0 means uncapped.
        Some(value) => match value.parse::<usize>() {
            Ok(0) => None,
            Ok(cap) => Some(cap),
            Err(_) => defaults.max_results,
        },
        None => defaults.max_results,
    };
    let allowed_extensions = match lookup_value("ALLOWED_EXTENSIONS", file_vars, env_lookup) {
        Some(value) => parse_extension_list(&value),
        None => defaults.allowed_extensions,
    };

    ExtractionConfig {
        max_height,
        max_retries,
        socket_timeout,
        backoff,
        max_results,
        allowed_extensions,
    }
}

/// Splits a comma-separated extension list, dropping blanks and leading
/// dots. An explicitly empty value disables the filter.
fn parse_extension_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn settings_from(contents: &str) -> RuntimeSettings {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_runtime_settings(&vars, |_| None).unwrap()
    }

    #[test]
    fn settings_read_port_and_host() {
        let settings = settings_from(
            "DOWNLOAD_ROOT=\"/dl\"\nTUBERELAY_PORT=\"4242\"\nTUBERELAY_HOST=\"0.0.0.0\"\n",
        );
        assert_eq!(settings.port, 4242);
        assert_eq!(settings.host, "0.0.0.0");
        assert_eq!(settings.download_root, PathBuf::from("/dl"));
    }

    #[test]
    fn settings_default_missing_port_and_host() {
        let settings = settings_from("DOWNLOAD_ROOT=\"/dl\"\n");
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.host, DEFAULT_HOST);
    }

    #[test]
    fn settings_require_download_root() {
        let cfg = make_config("TUBERELAY_PORT=\"8000\"\n");
        let vars = read_env_file(cfg.path()).unwrap();
        let err = build_runtime_settings(&vars, |_| None).unwrap_err();
        assert!(err.to_string().contains("DOWNLOAD_ROOT"));
    }

    #[test]
    fn extraction_defaults_match_constants() {
        let settings = settings_from("DOWNLOAD_ROOT=\"/dl\"\n");
        let extraction = settings.extraction;
        assert_eq!(extraction.max_height, DEFAULT_MAX_HEIGHT);
        assert_eq!(extraction.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(
            extraction.socket_timeout,
            Duration::from_secs(DEFAULT_SOCKET_TIMEOUT_SECONDS)
        );
        assert_eq!(
            extraction.backoff,
            Duration::from_secs(DEFAULT_BACKOFF_SECONDS)
        );
        assert_eq!(extraction.max_results, Some(DEFAULT_MAX_RESULTS));
        assert_eq!(extraction.allowed_extensions, ["mp4", "webm", "m4a"]);
    }

    #[test]
    fn extraction_reads_tuning_values() {
        let settings = settings_from(
            "DOWNLOAD_ROOT=\"/dl\"\nMAX_HEIGHT=\"1080\"\nMAX_RETRIES=\"5\"\n\
             SOCKET_TIMEOUT=\"30\"\nBACKOFF_SECONDS=\"1\"\nMAX_RESULTS=\"3\"\n\
             ALLOWED_EXTENSIONS=\"mp4, .webm\"\n",
        );
        let extraction = settings.extraction;
        assert_eq!(extraction.max_height, 1080);
        assert_eq!(extraction.max_retries, 5);
        assert_eq!(extraction.socket_timeout, Duration::from_secs(30));
        assert_eq!(extraction.backoff, Duration::from_secs(1));
        assert_eq!(extraction.max_results, Some(3));
        assert_eq!(extraction.allowed_extensions, ["mp4", "webm"]);
    }

    #[test]
    fn extraction_zero_retries_falls_back_to_default() {
        let settings = settings_from("DOWNLOAD_ROOT=\"/dl\"\nMAX_RETRIES=\"0\"\n");
        assert_eq!(settings.extraction.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn extraction_zero_max_results_means_uncapped() {
        let settings = settings_from("DOWNLOAD_ROOT=\"/dl\"\nMAX_RESULTS=\"0\"\n");
        assert_eq!(settings.extraction.max_results, None);
    }

    #[test]
    fn extraction_blank_extension_list_disables_filter() {
        let settings = settings_from("DOWNLOAD_ROOT=\"/dl\"\nALLOWED_EXTENSIONS=\"\"\n");
        assert!(settings.extraction.allowed_extensions.is_empty());
    }

    #[test]
    fn build_settings_prefers_env_over_file() {
        let vars = read_env_file(make_config("DOWNLOAD_ROOT=\"/file\"\n").path()).unwrap();
        let settings = build_runtime_settings(&vars, |key| {
            if key == "DOWNLOAD_ROOT" {
                Some("/env".to_string())
            } else {
                None
            }
        })
        .unwrap();
        assert_eq!(settings.download_root, PathBuf::from("/env"));
    }

    #[test]
    fn build_settings_override_precedence() {
        let mut vars = HashMap::new();
        vars.insert("DOWNLOAD_ROOT".to_string(), "/file-dl".to_string());
        vars.insert("TUBERELAY_HOST".to_string(), "file-host".to_string());
        vars.insert("TUBERELAY_PORT".to_string(), "7000".to_string());

        let overrides = RuntimeOverrides {
            download_root: Some(PathBuf::from("/override-dl")),
            port: Some(9000),
            host: Some("override-host".into()),
            env_path: None,
        };

        let settings = build_runtime_settings_with_overrides(
            &vars,
            |key| {
                if key == "TUBERELAY_PORT" {
                    Some("8000".to_string())
                } else {
                    None
                }
            },
            overrides,
        )
        .unwrap();

        assert_eq!(settings.download_root, PathBuf::from("/override-dl"));
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.host, "override-host");
    }

    #[test]
    fn build_settings_ignores_blank_host_override() {
        let vars = read_env_file(make_config("DOWNLOAD_ROOT=\"/dl\"\n").path()).unwrap();
        let settings = build_runtime_settings_with_overrides(
            &vars,
            |_| None,
            RuntimeOverrides {
                host: Some("   ".into()),
                ..RuntimeOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(settings.host, DEFAULT_HOST);
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export DOWNLOAD_ROOT="/media"
            TUBERELAY_HOST =  "0.0.0.0"
            TUBERELAY_PORT=9090
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("DOWNLOAD_ROOT").unwrap(), "/media");
        assert_eq!(vars.get("TUBERELAY_HOST").unwrap(), "0.0.0.0");
        assert_eq!(vars.get("TUBERELAY_PORT").unwrap(), "9090");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }
}
