//! Persisted startup defaults (capture flag, state broadcasting, thresholds,
//! pacing delay).
//!
//! Values are stored as strings so the store stays agnostic of the key's
//! type; callers parse with [`get_bool`] and [`get_f32`].

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Values used for any key the store has never seen.
pub const BUILTIN: &[(&str, &str)] = &[
    ("allow_capture", "true"),
    ("send_states", "true"),
    ("param_1_th", "0.0"),
    ("param_2_th", "0.0"),
    ("min_delay", "0.1"),
];

#[derive(Debug, thiserror::Error)]
pub enum DefaultsError {
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    Write(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub trait Defaults: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), DefaultsError>;
}

fn builtin(key: &str) -> Option<String> {
    BUILTIN
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.to_string())
}

/// Accepts `true`/`false` and `1`/`0`.
pub fn get_bool(store: &dyn Defaults, key: &str) -> Option<bool> {
    match store.get(key)?.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

pub fn get_f32(store: &dyn Defaults, key: &str) -> Option<f32> {
    store.get(key)?.trim().parse().ok()
}

// ── File-backed ───────────────────────────────────────────────────────────────

/// A flat TOML table of string values. Every `set` rewrites the file.
pub struct FileDefaults {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FileDefaults {
    pub fn open(path: &Path) -> Result<Self, DefaultsError> {
        let values = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| DefaultsError::Read(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| DefaultsError::Parse(path.to_path_buf(), e))?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            values,
        })
    }

    fn save(&self) -> Result<(), DefaultsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DefaultsError::Write(self.path.clone(), e))?;
        }
        let text = toml::to_string(&self.values)?;
        std::fs::write(&self.path, text).map_err(|e| DefaultsError::Write(self.path.clone(), e))
    }
}

impl Defaults for FileDefaults {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned().or_else(|| builtin(key))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), DefaultsError> {
        self.values.insert(key.to_string(), value.to_string());
        self.save()?;
        tracing::debug!(path = %self.path.display(), key, value, "default persisted");
        Ok(())
    }
}

// ── In-memory ─────────────────────────────────────────────────────────────────

/// Non-persistent store that records every write, for tests and for nodes
/// run without a defaults file.
#[derive(Debug, Default)]
pub struct MemoryDefaults {
    values: HashMap<String, String>,
    pub writes: Vec<(String, String)>,
}

impl MemoryDefaults {
    pub fn with(pairs: &[(&str, &str)]) -> Self {
        Self {
            values: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            writes: Vec::new(),
        }
    }
}

impl Defaults for MemoryDefaults {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned().or_else(|| builtin(key))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), DefaultsError> {
        self.values.insert(key.to_string(), value.to_string());
        self.writes.push((key.to_string(), value.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_fill_missing_keys() {
        let store = MemoryDefaults::default();
        assert_eq!(get_bool(&store, "allow_capture"), Some(true));
        assert_eq!(get_f32(&store, "min_delay"), Some(0.1));
        assert_eq!(store.get("nope"), None);
    }

    #[test]
    fn bool_accepts_digits() {
        let store = MemoryDefaults::with(&[("send_states", "0")]);
        assert_eq!(get_bool(&store, "send_states"), Some(false));
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cfg").join("defaults.toml");

        let mut store = FileDefaults::open(&path).unwrap();
        store.set("min_delay", "0.25").unwrap();
        store.set("allow_capture", "false").unwrap();

        let reopened = FileDefaults::open(&path).unwrap();
        assert_eq!(get_f32(&reopened, "min_delay"), Some(0.25));
        assert_eq!(get_bool(&reopened, "allow_capture"), Some(false));
        assert_eq!(get_bool(&reopened, "send_states"), Some(true));
    }

    #[test]
    fn memory_store_records_writes() {
        let mut store = MemoryDefaults::default();
        store.set("param_1_th", "1.5").unwrap();
        assert_eq!(store.writes, vec![("param_1_th".to_string(), "1.5".to_string())]);
    }
}
