//! Purpose: Persist emitted plans addressable by cache key for ahead-of-time reuse.
//! Exports: `ArtifactStore`, `DirArtifacts`.
//! Role: Export sink collaborator; a later process preloads these instead of regenerating.
//! Invariants: A key's dotted segments mirror the directory layout under the store root.
//! Invariants: `load` distinguishes "absent" from "unreadable"; absent is not an error.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::core::error::{Error, ErrorKind};
use crate::core::plan::Plan;

pub trait ArtifactStore: Send + Sync {
    fn store(&self, key: &str, plan: &Plan) -> Result<(), Error>;
    fn load(&self, key: &str) -> Result<Option<Plan>, Error>;
    fn keys(&self) -> Result<Vec<String>, Error>;
}

/// Plan files under a root directory, one `<key>.json` per exported type.
#[derive(Clone, Debug)]
pub struct DirArtifacts {
    root: PathBuf,
}

impl DirArtifacts {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in key.split('.') {
            path.push(segment);
        }
        path.set_extension("json");
        path
    }

    fn key_for(path: &Path, root: &Path) -> Option<String> {
        let relative = path.strip_prefix(root).ok()?;
        let mut segments = Vec::new();
        for component in relative.components() {
            segments.push(component.as_os_str().to_str()?.to_string());
        }
        let last = segments.pop()?;
        segments.push(last.strip_suffix(".json")?.to_string());
        Some(segments.join("."))
    }
}

impl ArtifactStore for DirArtifacts {
    fn store(&self, key: &str, plan: &Plan) -> Result<(), Error> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to create artifact directory")
                    .with_path(parent)
                    .with_source(err)
            })?;
        }
        let rendered = serde_json::to_vec_pretty(plan).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to serialize plan")
                .with_key(key)
                .with_source(err)
        })?;
        fs::write(&path, rendered).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to write artifact")
                .with_path(path.clone())
                .with_source(err)
        })
    }

    fn load(&self, key: &str) -> Result<Option<Plan>, Error> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(Error::new(ErrorKind::Io)
                    .with_message("failed to read artifact")
                    .with_path(path.clone())
                    .with_source(err));
            }
        };
        let plan = serde_json::from_slice(&bytes).map_err(|err| {
            Error::new(ErrorKind::Generation)
                .with_message("malformed artifact")
                .with_key(key)
                .with_path(path.clone())
                .with_source(err)
        })?;
        Ok(Some(plan))
    }

    fn keys(&self) -> Result<Vec<String>, Error> {
        let mut keys = Vec::new();
        if !self.root.exists() {
            return Ok(keys);
        }
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let entries = fs::read_dir(&dir).map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to list artifacts")
                    .with_path(dir.clone())
                    .with_source(err)
            })?;
            for entry in entries {
                let entry = entry.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to list artifacts")
                        .with_path(dir.clone())
                        .with_source(err)
                })?;
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                } else if path.extension().is_some_and(|ext| ext == "json") {
                    if let Some(key) = Self::key_for(&path, &self.root) {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
