use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use path_clean::PathClean;
use tracing::debug;

use crate::config::Config;
use crate::error::LoadError;

/// Resolves the names used by `{% include %}` and `{% extends %}`.
pub trait TemplateLoader {
    fn load(&self, name: &str) -> Result<String, LoadError>;
}

/// Loads templates from a directory, `package_name/template_directory` by
/// default.
#[derive(Debug, Clone)]
pub struct FileSystemLoader {
    root: PathBuf,
}

impl FileSystemLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.template_root())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Template names never escape the root directory.
    fn resolve(&self, name: &str) -> Result<PathBuf, LoadError> {
        let relative = Path::new(name).clean();
        let escapes = relative.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(LoadError::NotFound {
                name: name.to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

impl TemplateLoader for FileSystemLoader {
    fn load(&self, name: &str) -> Result<String, LoadError> {
        let path = self.resolve(name)?;
        debug!(template = name, path = %path.display(), "reading template");
        fs::read_to_string(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => LoadError::NotFound {
                name: name.to_string(),
            },
            _ => LoadError::Io {
                name: name.to_string(),
                source,
            },
        })
    }
}

/// Templates held in memory, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    templates: HashMap<String, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(name, source);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.templates.insert(name.into(), source.into());
    }
}

impl TemplateLoader for MemoryLoader {
    fn load(&self, name: &str) -> Result<String, LoadError> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| LoadError::NotFound {
                name: name.to_string(),
            })
    }
}

/// A loader that knows no templates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLoader;

impl TemplateLoader for NullLoader {
    fn load(&self, name: &str) -> Result<String, LoadError> {
        Err(LoadError::NotFound {
            name: name.to_string(),
        })
    }
}
