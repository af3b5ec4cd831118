#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    extract::{DEFAULT_EXTRACT_TIMEOUT, ExtractorSettings},
    proxy::{DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_MAX_IMAGE_BYTES, ExhaustionPolicy, ProxySettings},
    security::HostPolicy,
    store::StoreKind,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_STORE: StoreKind = StoreKind::Json;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub store: StoreKind,
    pub data_path: PathBuf,
    pub proxy: ProxySettings,
    pub extractor: ExtractorSettings,
}

/// Values coming from the command line. They win over the environment and
/// the `.env` file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub store: Option<StoreKind>,
    pub data_path: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_server_config(overrides: ConfigOverrides) -> Result<ServerConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_server_config_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_server_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<ServerConfig> {
    build_server_config_with_overrides(file_vars, env_lookup, ConfigOverrides::default())
}

fn build_server_config_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: ConfigOverrides,
) -> Result<ServerConfig> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let host = overrides
        .host
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        })
        .or_else(|| lookup("VIDEOSITE_HOST"))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| lookup("VIDEOSITE_PORT").and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_PORT);

    let store = match overrides.store {
        Some(kind) => kind,
        None => match lookup("VIDEOSITE_STORE") {
            Some(raw) => StoreKind::parse(&raw)
                .ok_or_else(|| anyhow!("VIDEOSITE_STORE has unknown value {raw:?}"))?,
            None => DEFAULT_STORE,
        },
    };
    let data_path = overrides
        .data_path
        .or_else(|| lookup("VIDEOSITE_DATA_PATH").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(store.default_data_path()));

    let proxy = build_proxy_settings(&lookup)?;
    let extractor = ExtractorSettings {
        timeout: lookup_secs(&lookup, "EXTRACT_TIMEOUT_SECS").unwrap_or(DEFAULT_EXTRACT_TIMEOUT),
    };

    Ok(ServerConfig {
        host,
        port,
        store,
        data_path,
        proxy,
        extractor,
    })
}

fn build_proxy_settings(lookup: &impl Fn(&str) -> Option<String>) -> Result<ProxySettings> {
    let attempt_timeout =
        lookup_secs(lookup, "PROXY_TIMEOUT_SECS").unwrap_or(DEFAULT_ATTEMPT_TIMEOUT);
    let max_bytes = lookup("PROXY_MAX_BYTES")
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_MAX_IMAGE_BYTES);
    let on_exhausted = match lookup("PROXY_ON_EXHAUSTED") {
        Some(raw) => ExhaustionPolicy::parse(&raw)
            .ok_or_else(|| anyhow!("PROXY_ON_EXHAUSTED has unknown value {raw:?}"))?,
        None => ExhaustionPolicy::Placeholder,
    };

    let allowlist_enabled = match lookup("PROXY_ALLOWLIST") {
        Some(raw) => parse_switch(&raw)
            .ok_or_else(|| anyhow!("PROXY_ALLOWLIST expects on/off, got {raw:?}"))?,
        None => true,
    };
    let host_policy = if !allowlist_enabled {
        HostPolicy::AllowAny
    } else if let Some(raw) = lookup("PROXY_ALLOWED_DOMAINS") {
        HostPolicy::allow_list(raw.split(',').map(str::trim))
    } else {
        HostPolicy::default()
    };

    Ok(ProxySettings {
        attempt_timeout,
        max_bytes,
        on_exhausted,
        host_policy,
    })
}

fn lookup_secs(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    lookup(key)
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Some(true),
        "off" | "false" | "0" | "no" => Some(false),
        _ => None,
    }
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

    fn config_from(contents: &str) -> ServerConfig {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_server_config(&vars, |_| None).unwrap()
    }

    #[test]
    fn empty_env_uses_defaults() {
        let config = config_from("");
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.store, StoreKind::Json);
        assert_eq!(config.data_path, PathBuf::from("data/videos.json"));
        assert_eq!(config.proxy.attempt_timeout, DEFAULT_ATTEMPT_TIMEOUT);
        assert_eq!(config.proxy.max_bytes, DEFAULT_MAX_IMAGE_BYTES);
        assert_eq!(config.proxy.on_exhausted, ExhaustionPolicy::Placeholder);
        assert_eq!(config.proxy.host_policy, HostPolicy::default());
        assert_eq!(config.extractor.timeout, DEFAULT_EXTRACT_TIMEOUT);
    }

    #[test]
    fn sqlite_store_gets_its_own_default_path() {
        let config = config_from("VIDEOSITE_STORE=sqlite\n");
        assert_eq!(config.store, StoreKind::Sqlite);
        assert_eq!(config.data_path, PathBuf::from("data/videos.db"));
    }

    #[test]
    fn reads_proxy_and_extract_tuning() {
        let config = config_from(
            "PROXY_TIMEOUT_SECS=3\nPROXY_MAX_BYTES=1024\nPROXY_ON_EXHAUSTED=error\n\
             PROXY_ALLOWED_DOMAINS=\"example.com, cdn.test\"\nEXTRACT_TIMEOUT_SECS=5\n",
        );
        assert_eq!(config.proxy.attempt_timeout, Duration::from_secs(3));
        assert_eq!(config.proxy.max_bytes, 1024);
        assert_eq!(config.proxy.on_exhausted, ExhaustionPolicy::Error);
        assert_eq!(
            config.proxy.host_policy,
            HostPolicy::AllowList(vec!["example.com".into(), "cdn.test".into()])
        );
        assert_eq!(config.extractor.timeout, Duration::from_secs(5));
    }

    #[test]
    fn allowlist_can_be_switched_off() {
        let config = config_from("PROXY_ALLOWLIST=off\nPROXY_ALLOWED_DOMAINS=example.com\n");
        assert_eq!(config.proxy.host_policy, HostPolicy::AllowAny);
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = config_from("VIDEOSITE_PORT=nope\nPROXY_TIMEOUT_SECS=0\nPROXY_MAX_BYTES=-1\n");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.proxy.attempt_timeout, DEFAULT_ATTEMPT_TIMEOUT);
        assert_eq!(config.proxy.max_bytes, DEFAULT_MAX_IMAGE_BYTES);
    }

    #[test]
    fn unknown_enum_values_are_rejected() {
        for contents in [
            "VIDEOSITE_STORE=redis\n",
            "PROXY_ON_EXHAUSTED=maybe\n",
            "PROXY_ALLOWLIST=sometimes\n",
        ] {
            let vars = read_env_file(make_config(contents).path()).unwrap();
            assert!(build_server_config(&vars, |_| None).is_err(), "{contents}");
        }
    }

    #[test]
    fn env_wins_over_file() {
        let vars = read_env_file(make_config("VIDEOSITE_PORT=4000\n").path()).unwrap();
        let config = build_server_config(&vars, |key| {
            if key == "VIDEOSITE_PORT" {
                Some("5000".to_string())
            } else {
                None
            }
        })
        .unwrap();
        assert_eq!(config.port, 5000);
    }

    #[test]
    fn overrides_win_over_env_and_file() {
        let mut vars = HashMap::new();
        vars.insert("VIDEOSITE_HOST".to_string(), "file-host".to_string());
        vars.insert("VIDEOSITE_STORE".to_string(), "json".to_string());
        vars.insert("VIDEOSITE_DATA_PATH".to_string(), "/file/videos.json".to_string());

        let config = build_server_config_with_overrides(
            &vars,
            |key| (key == "VIDEOSITE_PORT").then(|| "8000".to_string()),
            ConfigOverrides {
                host: Some("0.0.0.0".into()),
                port: Some(9000),
                store: Some(StoreKind::Memory),
                data_path: None,
                env_path: None,
            },
        )
        .unwrap();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.data_path, PathBuf::from("/file/videos.json"));
    }

    #[test]
    fn blank_host_override_is_ignored() {
        let config = build_server_config_with_overrides(
            &HashMap::new(),
            |_| None,
            ConfigOverrides {
                host: Some("   ".into()),
                ..ConfigOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(config.host, DEFAULT_HOST);
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export VIDEOSITE_STORE="sqlite"
            VIDEOSITE_DATA_PATH='/srv/videos.db'
            VIDEOSITE_HOST =  "0.0.0.0"
            VIDEOSITE_PORT=9090
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("VIDEOSITE_STORE").unwrap(), "sqlite");
        assert_eq!(vars.get("VIDEOSITE_DATA_PATH").unwrap(), "/srv/videos.db");
        assert_eq!(vars.get("VIDEOSITE_HOST").unwrap(), "0.0.0.0");
        assert_eq!(vars.get("VIDEOSITE_PORT").unwrap(), "9090");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }
}
