//! Bootstrap script sources.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use crate::error::{PlatformError, PlatformResult};

/// Reads script sources by identifier.
pub trait ResourceReader: Send + Sync {
    fn read_resource(&self, name: &str) -> PlatformResult<String>;
}

/// Sources stored as files under a root directory.
#[derive(Debug, Clone)]
pub struct DirectoryResources {
    root: PathBuf,
}

impl DirectoryResources {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ResourceReader for DirectoryResources {
    fn read_resource(&self, name: &str) -> PlatformResult<String> {
        let relative = Path::new(name);
        // Identifiers may not escape the root.
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
        {
            return Err(PlatformError::ResourceNotFound(name.to_owned()));
        }
        match std::fs::read_to_string(self.root.join(relative)) {
            Ok(source) => Ok(source),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(PlatformError::ResourceNotFound(name.to_owned()))
            }
            Err(error) => Err(error.into()),
        }
    }
}

/// Sources held in memory.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedResources {
    sources: HashMap<String, String>,
}

impl EmbeddedResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.sources.insert(name.into(), source.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.sources.insert(name.into(), source.into());
    }
}

impl ResourceReader for EmbeddedResources {
    fn read_resource(&self, name: &str) -> PlatformResult<String> {
        self.sources
            .get(name)
            .cloned()
            .ok_or_else(|| PlatformError::ResourceNotFound(name.to_owned()))
    }
}
