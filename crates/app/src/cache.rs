//! On-disk cache holding the serialized session snapshot.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct SnapshotCache {
    path: PathBuf,
}

impl SnapshotCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `None` when no cache has been written yet.
    pub fn load(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Writes through a sibling temp file so a crash never leaves a torn cache.
    pub fn save(&self, raw: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), bytes = raw.len(), "cache saved");
        Ok(())
    }

    pub fn clear(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> SnapshotCache {
        let dir = std::env::temp_dir().join(format!("envelopes-{}", uuid::Uuid::new_v4()));
        SnapshotCache::new(dir.join("nested").join("cache.json"))
    }

    #[test]
    fn missing_cache_loads_as_none() {
        let cache = scratch();
        assert_eq!(cache.load().unwrap(), None);
        assert!(!cache.clear().unwrap());
    }

    #[test]
    fn save_then_load_then_clear() {
        let cache = scratch();
        cache.save(r#"{"version":2}"#).unwrap();
        cache.save(r#"{"version":3}"#).unwrap();
        assert_eq!(cache.load().unwrap().as_deref(), Some(r#"{"version":3}"#));

        assert!(cache.clear().unwrap());
        assert_eq!(cache.load().unwrap(), None);
        if let Some(dir) = cache.path().parent().and_then(Path::parent) {
            let _ = fs::remove_dir_all(dir);
        }
    }
}
