use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use cloister_addon_api::Addon;
use parking_lot::RwLock;

/// A module compiled into (or otherwise living inside) the host process,
/// registered so domains can resolve it without touching the filesystem.
pub trait NativeModule: Send + Sync {
    fn name(&self) -> &str;

    fn type_names(&self) -> Vec<String>;

    fn create(&self, type_name: &str) -> Result<Box<dyn Addon>>;
}

#[derive(Clone)]
pub enum HostModuleHit {
    Native(Arc<dyn NativeModule>),
    Library { name: String, path: PathBuf },
}

impl std::fmt::Debug for HostModuleHit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostModuleHit::Native(module) => f
                .debug_tuple("Native")
                .field(&module.name())
                .finish(),
            HostModuleHit::Library { name, path } => f
                .debug_struct("Library")
                .field("name", name)
                .field("path", path)
                .finish(),
        }
    }
}

struct HostModuleEntry {
    name: String,
    source: HostModuleSource,
}

enum HostModuleSource {
    Native(Arc<dyn NativeModule>),
    Library(PathBuf),
}

/// Ordered store of modules the host already knows about.
///
/// Built explicitly and passed into whatever needs it; there is no
/// process-wide registry.
#[derive(Default)]
pub struct HostModuleRegistry {
    entries: RwLock<Vec<HostModuleEntry>>,
}

impl HostModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_native(&self, module: Arc<dyn NativeModule>) {
        let name = module.name().to_string();
        self.entries.write().push(HostModuleEntry {
            name,
            source: HostModuleSource::Native(module),
        });
    }

    /// Record a library the host has already loaded (or vouches for), so
    /// resolution can hand its path to a domain.
    pub fn record_library(&self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.entries.write().push(HostModuleEntry {
            name: name.into(),
            source: HostModuleSource::Library(path.into()),
        });
    }

    /// Scan registered modules, in registration order, for the first whose
    /// name is a case-insensitive prefix of `requested`.
    ///
    /// First match wins: registering the same name again from a different
    /// location never displaces the earlier entry, so a lookup always
    /// returns the first-registered module. Known, relied-upon behavior;
    /// do not "fix" it to reload by path.
    pub fn resolve_loaded(&self, requested: &str) -> Option<HostModuleHit> {
        let requested = requested.trim().to_ascii_lowercase();
        if requested.is_empty() {
            return None;
        }
        let entries = self.entries.read();
        for entry in entries.iter() {
            if requested.starts_with(&entry.name.to_ascii_lowercase()) {
                return Some(match &entry.source {
                    HostModuleSource::Native(module) => HostModuleHit::Native(Arc::clone(module)),
                    HostModuleSource::Library(path) => HostModuleHit::Library {
                        name: entry.name.clone(),
                        path: path.clone(),
                    },
                });
            }
        }
        None
    }

    pub fn module_names(&self) -> Vec<String> {
        self.entries.read().iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
