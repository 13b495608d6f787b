//! Accelerator configuration switch.
//!
//! The switch is named [`USE_CUDA_KEY`]. It is read from the environment
//! first and then from a JSON config file whose top-level object maps keys to
//! string values:
//!
//! ```json
//! { "FFTFILT_USE_CUDA": "true" }
//! ```
//!
//! The file is `$FFTFILT_CONFIG` when set, else `$HOME/.fftfilt/fftfilt.json`.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::kernel::ConfigError;

/// Name of the switch enabling any attempt at acceleration.
pub const USE_CUDA_KEY: &str = "FFTFILT_USE_CUDA";

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "FFTFILT_CONFIG";

/// Accelerator settings read once by the capability probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccelConfig {
    /// Try to bring up the accelerator. Absent means `false`.
    pub use_cuda: bool,
}

impl AccelConfig {
    /// Load from the process environment and the default config file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(USE_CUDA_KEY) {
            return Ok(Self {
                use_cuda: parse_switch(&raw)?,
            });
        }
        let Some(path) = config_path(&lookup) else {
            return Ok(Self::default());
        };
        match get_config(&path, USE_CUDA_KEY)? {
            Some(raw) => Ok(Self {
                use_cuda: parse_switch(&raw)?,
            }),
            None => Ok(Self::default()),
        }
    }
}

fn config_path<F>(lookup: &F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }
    lookup("HOME").map(|home| Path::new(&home).join(".fftfilt").join("fftfilt.json"))
}

fn parse_switch(raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(ConfigError::InvalidArgument {
            arg: USE_CUDA_KEY,
            reason: "expected one of true/false/1/0/yes/no",
        }),
    }
}

fn read_config_map(path: &Path) -> Result<Map<String, Value>, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidFile {
        path: path.display().to_string(),
        reason,
    };
    let contents = fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
    match serde_json::from_str::<Value>(&contents).map_err(|e| invalid(e.to_string()))? {
        Value::Object(map) => Ok(map),
        _ => Err(invalid("top-level value must be an object".into())),
    }
}

/// Read `key` from the JSON config file at `path`.
///
/// A missing file yields `Ok(None)`. String values are returned as-is and
/// booleans/numbers are rendered to strings.
pub fn get_config(path: &Path, key: &str) -> Result<Option<String>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let map = read_config_map(path)?;
    Ok(map.get(key).and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }))
}

/// Write `key = value` into the JSON config file at `path`, creating the file
/// and its parent directory when needed. `None` removes the key.
pub fn set_config(path: &Path, key: &str, value: Option<&str>) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidFile {
        path: path.display().to_string(),
        reason,
    };
    let mut map = if path.exists() {
        read_config_map(path)?
    } else {
        Map::new()
    };
    match value {
        Some(v) => {
            map.insert(key.to_string(), Value::String(v.to_string()));
        }
        None => {
            map.remove(key);
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| invalid(e.to_string()))?;
    }
    let body =
        serde_json::to_string_pretty(&Value::Object(map)).map_err(|e| invalid(e.to_string()))?;
    fs::write(path, body).map_err(|e| invalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn scratch_dir(tag: &str) -> PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!("fftfilt-config-{tag}-{}-{ts}", std::process::id()))
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn absent_switch_disables_acceleration() {
        let config = AccelConfig::from_lookup(env(&[])).expect("empty env");
        assert!(!config.use_cuda);
    }

    #[test]
    fn environment_switch_is_parsed_case_insensitively() {
        for (raw, expected) in [("true", true), ("TRUE", true), ("1", true), ("no", false)] {
            let config = AccelConfig::from_lookup(env(&[(USE_CUDA_KEY, raw)])).expect("valid");
            assert_eq!(config.use_cuda, expected, "{raw}");
        }
    }

    #[test]
    fn garbage_switch_is_rejected() {
        let err = AccelConfig::from_lookup(env(&[(USE_CUDA_KEY, "maybe")])).expect_err("invalid");
        assert!(matches!(err, ConfigError::InvalidArgument { arg, .. } if arg == USE_CUDA_KEY));
    }

    #[test]
    fn config_file_is_consulted_when_env_is_silent() {
        let dir = scratch_dir("file");
        let path = dir.join("fftfilt.json");
        set_config(&path, USE_CUDA_KEY, Some("true")).expect("write config");

        let path_str = path.display().to_string();
        let config = AccelConfig::from_lookup(env(&[(CONFIG_PATH_ENV, path_str.as_str())]))
            .expect("load config");
        assert!(config.use_cuda);

        let overridden = AccelConfig::from_lookup(env(&[
            (CONFIG_PATH_ENV, path_str.as_str()),
            (USE_CUDA_KEY, "false"),
        ]))
        .expect("env wins");
        assert!(!overridden.use_cuda);

        set_config(&path, USE_CUDA_KEY, None).expect("remove key");
        assert_eq!(get_config(&path, USE_CUDA_KEY).expect("read"), None);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn home_directory_file_is_the_fallback() {
        let home = scratch_dir("home");
        let path = home.join(".fftfilt").join("fftfilt.json");
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, r#"{ "FFTFILT_USE_CUDA": true }"#).expect("write");

        let home_str = home.display().to_string();
        let config = AccelConfig::from_lookup(env(&[("HOME", home_str.as_str())])).expect("load");
        assert!(config.use_cuda);
        let _ = fs::remove_dir_all(home);
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = scratch_dir("bad");
        fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join("fftfilt.json");
        fs::write(&path, "[1, 2").expect("write");

        let err = get_config(&path, USE_CUDA_KEY).expect_err("malformed");
        assert!(matches!(err, ConfigError::InvalidFile { .. }));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_file_means_unset() {
        let path = scratch_dir("missing").join("nope.json");
        assert_eq!(get_config(&path, USE_CUDA_KEY).expect("missing is fine"), None);
    }
}
