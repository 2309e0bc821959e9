//! Persisted listener preferences (mute + volume).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;

pub const KEY_MUTED: &str = "radio:muted";
pub const KEY_VOLUME: &str = "radio:volume";
pub const DEFAULT_VOLUME: f32 = 0.9;

/// String-keyed JSON storage.
pub trait PreferenceStore: Send {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&mut self, key: &str, value: Value);
}

/// In-memory store.
#[derive(Debug, Default, Clone)]
pub struct MemoryPrefs {
    values: HashMap<String, Value>,
}

impl MemoryPrefs {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPrefs {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }
}

/// JSON-file backed store; the whole map is rewritten on every change.
#[derive(Debug)]
pub struct JsonFilePrefs {
    path: PathBuf,
    values: HashMap<String, Value>,
}

impl JsonFilePrefs {
    /// Open (or lazily create) the store at `path`. A missing or corrupt file
    /// yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match read_map(&path) {
            Ok(values) => values,
            Err(e) => {
                tracing::debug!(path = %path.display(), "prefs not loaded: {e:#}");
                HashMap::new()
            }
        };
        Self { path, values }
    }

    /// `<config dir>/radio-player/prefs.json`, if a config dir exists.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("radio-player").join("prefs.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create prefs dir {:?}", parent))?;
        }
        let raw = serde_json::to_vec_pretty(&self.values)?;
        std::fs::write(&self.path, raw).with_context(|| format!("write prefs {:?}", self.path))
    }
}

impl PreferenceStore for JsonFilePrefs {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
        if let Err(e) = self.flush() {
            tracing::debug!("prefs write failed: {e:#}");
        }
    }
}

fn read_map(path: &Path) -> Result<HashMap<String, Value>> {
    let raw = std::fs::read(path).with_context(|| format!("read prefs {:?}", path))?;
    let values = serde_json::from_slice(&raw).with_context(|| format!("parse prefs {:?}", path))?;
    Ok(values)
}

/// Clamp to `0.0..=1.0`; non-finite input maps to full volume.
pub fn clamp_volume(volume: f32) -> f32 {
    if !volume.is_finite() {
        return 1.0;
    }
    volume.clamp(0.0, 1.0)
}

/// Restore `(muted, volume)` with defaults for missing or malformed entries.
pub fn load_audio_prefs(store: &dyn PreferenceStore) -> (bool, f32) {
    let muted = store
        .get(KEY_MUTED)
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let volume = store
        .get(KEY_VOLUME)
        .and_then(|v| v.as_f64())
        .map(|v| clamp_volume(v as f32))
        .unwrap_or(DEFAULT_VOLUME);
    (muted, volume)
}
