//! Compiled collections, loaded once at startup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tessera_engine::{compile, CollectionDefinition, CollectionKey, CompiledCollection, DefinitionParseError};

use crate::error::AppError;

/// Errors while loading collection definitions.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid collection definition {path}: {source}")]
    Definition {
        path: PathBuf,
        source: DefinitionParseError,
    },

    #[error("collection '{0}' is defined more than once")]
    Duplicate(CollectionKey),

    #[error(transparent)]
    Compile(#[from] tessera_engine::Error),
}

/// Every known collection, compiled.
#[derive(Debug, Default)]
pub struct Registry {
    collections: BTreeMap<CollectionKey, Arc<CompiledCollection>>,
}

impl Registry {
    /// Compile a set of definitions.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = CollectionDefinition>,
    ) -> Result<Self, RegistryError> {
        let mut collections = BTreeMap::new();
        for definition in definitions {
            let compiled = compile(&definition)?;
            let key = compiled.key().clone();
            if collections.insert(key.clone(), Arc::new(compiled)).is_some() {
                return Err(RegistryError::Duplicate(key));
            }
        }
        Ok(Self { collections })
    }

    /// Load and compile every `*.json` file in `dir`, in file name order.
    /// A missing directory yields an empty registry.
    pub fn load_dir(dir: &Path) -> Result<Self, RegistryError> {
        let io = |path: &Path, source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        };

        if !dir.exists() {
            tracing::warn!(dir = %dir.display(), "collections directory does not exist");
            return Ok(Self::default());
        }

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(|e| io(dir, e))? {
            let path = entry.map_err(|e| io(dir, e))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut definitions = Vec::with_capacity(paths.len());
        for path in paths {
            let json = std::fs::read_to_string(&path).map_err(|e| io(&path, e))?;
            let definition = CollectionDefinition::from_json(&json)
                .map_err(|source| RegistryError::Definition {
                    path: path.clone(),
                    source,
                })?;
            tracing::info!(collection = %definition.key, path = %path.display(), "loaded collection");
            definitions.push(definition);
        }

        Self::from_definitions(definitions)
    }

    pub fn get(&self, key: &str) -> Option<Arc<CompiledCollection>> {
        self.collections.get(key).cloned()
    }

    /// Like [`Registry::get`], as a handler error.
    pub fn require(&self, key: &str) -> Result<Arc<CompiledCollection>, AppError> {
        self.get(key)
            .ok_or_else(|| AppError::NotFound(format!("collection '{}'", key)))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}
