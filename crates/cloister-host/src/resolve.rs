use std::path::{Path, PathBuf};

use crate::config::PROBE_PATH_SEPARATOR;
use crate::error::{Error, Result};
use crate::registry::{HostModuleHit, HostModuleRegistry};

/// Where a module reference points before it is loaded into a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleLocation {
    /// Bare name, resolved through the host registry and probe paths.
    Name(String),
    /// Explicit library path, loaded as-is.
    Path(PathBuf),
}

impl ModuleLocation {
    /// Interpret a configuration string: anything that looks like a path
    /// (separator or dynamic-library extension) is taken literally,
    /// everything else is a resolvable name.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let looks_like_path = raw.contains('/')
            || raw.contains('\\')
            || Path::new(raw)
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| {
                    e.eq_ignore_ascii_case("so")
                        || e.eq_ignore_ascii_case("dll")
                        || e.eq_ignore_ascii_case("dylib")
                })
                .unwrap_or(false);
        if looks_like_path {
            Self::Path(PathBuf::from(raw))
        } else {
            Self::Name(raw.to_string())
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            Self::Name(name) => name.clone(),
            Self::Path(path) => module_name_for_path(path),
        }
    }
}

/// Outcome of a successful resolution.
#[derive(Clone, Debug)]
pub enum ResolvedModule {
    /// Already present in the host; no loading required.
    Host(HostModuleHit),
    /// A library file to load into the requesting domain.
    Library { name: String, path: PathBuf },
}

/// Locate `requested`, first match wins:
///
/// 1. modules already registered/loaded in the host (registration order,
///    case-insensitive name-prefix match);
/// 2. `base_dir/requested[.ext]`;
/// 3. each probe directory, in list order.
///
/// Any filesystem error while checking a candidate counts as "no match for
/// that candidate" and the scan continues; only total exhaustion is
/// reported, as `ModuleNotFound` naming everything that was searched.
pub fn resolve(
    requested: &str,
    base_dir: &Path,
    probe_paths: &str,
    registry: &HostModuleRegistry,
) -> Result<ResolvedModule> {
    let requested = requested.trim();
    let mut searched = vec!["host-loaded modules".to_string()];

    if let Some(hit) = registry.resolve_loaded(requested) {
        return Ok(ResolvedModule::Host(hit));
    }

    searched.push(base_dir.display().to_string());
    if let Some(path) = candidate_in_dir(base_dir, requested) {
        return Ok(ResolvedModule::Library {
            name: module_name_for_path(&path),
            path,
        });
    }

    for dir in split_probe_paths(probe_paths) {
        searched.push(dir.display().to_string());
        if let Some(path) = candidate_in_dir(&dir, requested) {
            return Ok(ResolvedModule::Library {
                name: module_name_for_path(&path),
                path,
            });
        }
    }

    Err(Error::module_not_found(requested, &searched))
}

/// Split a semicolon-delimited probe-path string, skipping blank segments.
pub fn split_probe_paths(probe_paths: &str) -> Vec<PathBuf> {
    probe_paths
        .split(PROBE_PATH_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Platform extension for loadable library files.
pub fn dynamic_library_ext() -> &'static str {
    match std::env::consts::OS {
        "windows" => "dll",
        "macos" => "dylib",
        _ => "so",
    }
}

pub fn is_dynamic_library_file(path: &Path) -> bool {
    path.extension()
        .and_then(|value| value.to_str())
        .map(|value| value.eq_ignore_ascii_case(dynamic_library_ext()))
        .unwrap_or(false)
}

/// List loadable library candidates below `dir` (a couple of levels deep),
/// skipping anything unreadable.
pub fn discover_library_files(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if !dir.is_dir() {
        return out;
    }
    for entry in walkdir::WalkDir::new(dir)
        .follow_links(false)
        .max_depth(3)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if entry.file_type().is_file() && is_dynamic_library_file(path) {
            out.push(path.to_path_buf());
        }
    }
    out.sort();
    out
}

/// Module name a loaded library file goes by: its file stem.
pub fn module_name_for_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown-module")
        .to_string()
}

fn candidate_in_dir(dir: &Path, requested: &str) -> Option<PathBuf> {
    if requested.is_empty() || dir.as_os_str().is_empty() {
        return None;
    }
    // Dotted module names ("demo.lib") are whole names, not stems: the
    // platform extension is appended unless already present.
    let ext = dynamic_library_ext();
    let file_name = if requested
        .rsplit('.')
        .next()
        .map(|tail| tail.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
    {
        requested.to_string()
    } else {
        format!("{requested}.{ext}")
    };
    let candidate = dir.join(file_name);
    // Errors (permission, broken links, ...) mean "not this candidate".
    match std::fs::metadata(&candidate) {
        Ok(meta) if meta.is_file() => Some(candidate),
        _ => None,
    }
}
