//! Manifest preprocessing
//!
//! Finds `add_files` entries that point at files on this machine, checks
//! that their source paths are safe, and rewrites them so the remote build
//! only ever sees paths under the shared workspace root.

use crate::config::ManifestPolicy;
use crate::error::{CaibError, Result};
use crate::types::{LocalFileReference, Upload};
use serde_yaml::{Mapping, Value};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

const PATH_KEY: &str = "path";
const SOURCE_PATH_KEY: &str = "source_path";
const SOURCE_KEY: &str = "source";

/// Result of preprocessing a manifest
#[derive(Debug, Clone)]
pub struct PreparedManifest {
    /// Manifest text to submit
    pub content: String,
    /// Local files that must be uploaded before the build can run
    pub references: Vec<LocalFileReference>,
    /// Whether `content` differs from the input
    pub rewritten: bool,
}

impl PreparedManifest {
    /// Upload batch for all references
    pub fn uploads(&self, workspace_root: &str) -> Vec<Upload> {
        self.references
            .iter()
            .map(|r| r.upload(workspace_root))
            .collect()
    }
}

/// Walks a parsed manifest and rewrites its local file references
pub struct ManifestPreprocessor<'a> {
    policy: &'a ManifestPolicy,
    base_dir: PathBuf,
}

impl<'a> ManifestPreprocessor<'a> {
    /// `base_dir` anchors relative source paths on this machine, normally
    /// the directory holding the manifest.
    pub fn new(policy: &'a ManifestPolicy, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            policy,
            base_dir: base_dir.into(),
        }
    }

    pub fn process(&self, raw: &str) -> Result<PreparedManifest> {
        let mut doc: Value = serde_yaml::from_str(raw)
            .map_err(|e| CaibError::Manifest(format!("failed to parse manifest YAML: {}", e)))?;

        let mut references = Vec::new();
        let mut changed = false;

        for location in &self.policy.add_files_locations {
            let Some(entries) = list_at_mut(&mut doc, location) else {
                continue;
            };
            for entry in entries.iter_mut() {
                let Some(mut entry) = AddFileEntry::from_value(entry) else {
                    continue;
                };
                if let Some(reference) = self.rewrite_entry(&mut entry, &mut changed)? {
                    debug!(
                        source = %reference.source,
                        resolved = %reference.resolved,
                        "Found local file reference"
                    );
                    references.push(reference);
                }
            }
        }

        let content = if changed {
            serde_yaml::to_string(&doc)?
        } else {
            raw.to_string()
        };

        Ok(PreparedManifest {
            content,
            references,
            rewritten: changed,
        })
    }

    fn rewrite_entry(
        &self,
        entry: &mut AddFileEntry<'_>,
        changed: &mut bool,
    ) -> Result<Option<LocalFileReference>> {
        let Some(image_path) = entry.text(PATH_KEY).map(str::to_string) else {
            return Ok(None);
        };
        let (key, source) = match (entry.text(SOURCE_PATH_KEY), entry.text(SOURCE_KEY)) {
            (Some(s), _) => (SOURCE_PATH_KEY, s.to_string()),
            (None, Some(s)) => (SOURCE_KEY, s.to_string()),
            (None, None) => return Ok(None),
        };

        let (resolved, local_path) = self.resolve(&source)?;

        if key == SOURCE_KEY {
            entry.remove(SOURCE_KEY);
        }
        if key == SOURCE_KEY || source != resolved {
            entry.set(SOURCE_PATH_KEY, &resolved);
            *changed = true;
        }

        Ok(Some(LocalFileReference {
            image_path,
            source,
            resolved,
            local_path,
        }))
    }

    /// Validate a source path and compute (remote path, local path)
    fn resolve(&self, source: &str) -> Result<(String, PathBuf)> {
        let unsafe_path = |reason: &str| CaibError::UnsafePath {
            path: source.to_string(),
            reason: reason.to_string(),
        };

        if source.trim().is_empty() || source == "/" {
            return Err(unsafe_path("empty or root path is not allowed"));
        }
        let path = Path::new(source);
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(unsafe_path("directory traversal detected"));
        }

        let root = self.policy.workspace_root.trim_end_matches('/');

        if path.is_absolute() {
            // Already rewritten by an earlier pass
            if let Some(rest) = source.strip_prefix(root).and_then(|r| r.strip_prefix('/')) {
                let relative = normalize(Path::new(rest));
                if relative.is_empty() {
                    return Err(unsafe_path("empty or root path is not allowed"));
                }
                return Ok((format!("{}/{}", root, relative), self.base_dir.join(&relative)));
            }

            let in_safe_dir = self
                .policy
                .safe_directories
                .iter()
                .any(|dir| path.starts_with(dir) && path != dir.as_path());
            if !in_safe_dir {
                return Err(unsafe_path("absolute path outside safe directories"));
            }
            return Ok((
                format!("{}/{}", root, normalize(path)),
                path.to_path_buf(),
            ));
        }

        let relative = normalize(path);
        if relative.is_empty() {
            return Err(unsafe_path("empty or root path is not allowed"));
        }
        Ok((format!("{}/{}", root, relative), self.base_dir.join(&relative)))
    }
}

/// Join the normal components of a path with `/`
fn normalize(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Sequence found at a key path, if every step is a mapping
fn list_at_mut<'v>(doc: &'v mut Value, location: &[String]) -> Option<&'v mut Vec<Value>> {
    let mut node = doc;
    for key in location {
        node = node.as_mapping_mut()?.get_mut(key.as_str())?;
    }
    node.as_sequence_mut()
}

/// Typed view over one `add_files` item
struct AddFileEntry<'v> {
    map: &'v mut Mapping,
}

impl<'v> AddFileEntry<'v> {
    fn from_value(value: &'v mut Value) -> Option<Self> {
        value.as_mapping_mut().map(|map| Self { map })
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.map.get(key).and_then(Value::as_str)
    }

    fn set(&mut self, key: &str, value: &str) {
        self.map
            .insert(Value::String(key.to_string()), Value::String(value.to_string()));
    }

    fn remove(&mut self, key: &str) {
        self.map.remove(key);
    }
}
