//! JSON snapshots under `saved_dir`.

use std::path::{Path, PathBuf};

use kairos_core::{config::CURRENT_SNAPSHOT, io::atomic_write};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::Dispatcher;
use crate::{
    error::{DispatchError, EntityKind, Result},
    resolver::Resolver,
};

fn check_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(DispatchError::Validation(format!("invalid snapshot name: {name:?}")))
    }
}

fn snapshot_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.json"))
}

impl Dispatcher {
    pub fn saved_dir(&self) -> Option<PathBuf> {
        self.inner.saved_dir.lock().clone()
    }

    pub fn set_saved_dir(&self, dir: Option<PathBuf>) {
        info!(dir = ?dir, "saved_dir set");
        *self.inner.saved_dir.lock() = dir;
    }

    fn require_saved_dir(&self) -> Result<PathBuf> {
        self.saved_dir()
            .ok_or_else(|| DispatchError::Validation("saved_dir is not set".to_string()))
    }

    /// The full state as JSON: inventories plus scheduling tables.
    pub fn to_json(&self) -> Result<Value> {
        let state = self.snapshot();
        Ok(serde_json::to_value(&state)?)
    }

    /// Write `saved_dir/<name>.json`.
    pub fn save(&self, name: &str) -> Result<PathBuf> {
        check_name(name)?;
        let dir = self.require_saved_dir()?;
        let path = snapshot_path(&dir, name);

        // persist, then state: writers must not interleave snapshot and write
        let _guard = self.inner.persist.lock();
        let body = serde_json::to_vec_pretty(&self.snapshot())?;
        atomic_write(&path, &body)?;
        debug!(path = %path.display(), bytes = body.len(), "snapshot written");
        Ok(path)
    }

    /// Replace the whole state with `saved_dir/<name>.json` and bring its
    /// bindings back to life.
    pub fn load(&self, name: &str) -> Result<()> {
        check_name(name)?;
        let dir = self.require_saved_dir()?;
        let path = snapshot_path(&dir, name);
        if !path.exists() {
            return Err(DispatchError::not_found(EntityKind::Snapshot, name));
        }

        let raw: Value = serde_json::from_slice(&std::fs::read(&path)?)?;
        let state = Resolver::new().state(raw)?;
        self.replace_all(state);
        let rescheduled = self.reschedule_all_schedulers();
        info!(snapshot = %name, rescheduled, "snapshot loaded");
        Ok(())
    }

    /// Load `current.json` when present. Returns whether anything was loaded.
    pub fn restore(&self) -> Result<bool> {
        let Some(dir) = self.saved_dir() else {
            return Ok(false);
        };
        if !snapshot_path(&dir, CURRENT_SNAPSHOT).exists() {
            return Ok(false);
        }
        self.load(CURRENT_SNAPSHOT)?;
        Ok(true)
    }

    /// Names of the snapshots in `saved_dir`, sorted.
    pub fn list_saved(&self) -> Result<Vec<String>> {
        let dir = self.require_saved_dir()?;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Write `current.json` when autosave is on. Failures are logged.
    pub(super) fn autosave(&self) {
        if !self.inner.autosave || self.saved_dir().is_none() {
            return;
        }
        if let Err(e) = self.save(CURRENT_SNAPSHOT) {
            warn!(error = %e, "autosave failed");
        }
    }
}
