//! Mapping between caller-supplied paths and repository keys
//!
//! A key is the POSIX-style path of a file relative to the repository root.
//! Keys are what the manifest stores; paths relative to the caller's working
//! directory only ever appear in output.

use std::collections::{BTreeSet, HashSet};
use std::path::{Component, Path, PathBuf};

use glob::{MatchOptions, Pattern};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::HoardError;
use crate::types::Manifest;

const GLOB_CHARS: &[char] = &['*', '?', '['];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Whether `key` is a well-formed repository key
pub fn is_valid_manifest_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('/')
        && !key.contains('\\')
        && key.split('/').all(|c| !c.is_empty() && c != "." && c != "..")
}

pub fn is_glob(arg: &str) -> bool {
    arg.contains(GLOB_CHARS)
}

/// Resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Relative path from directory `from` to `to`; both absolute and normalized
fn relative_to(to: &Path, from: &Path) -> PathBuf {
    let to: Vec<Component> = to.components().collect();
    let from: Vec<Component> = from.components().collect();
    let common = to.iter().zip(from.iter()).take_while(|(a, b)| a == b).count();

    let mut out = PathBuf::new();
    for _ in common..from.len() {
        out.push("..");
    }
    for component in &to[common..] {
        out.push(component.as_os_str());
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Resolves files, directories and glob patterns to repository keys
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    cwd: PathBuf,
    ignored: HashSet<String>,
}

impl PathResolver {
    /// `root` must exist; `cwd` is where relative arguments are anchored
    pub fn new(root: &Path, cwd: &Path) -> Result<Self, HoardError> {
        let root = root.canonicalize()?;
        let cwd = match cwd.canonicalize() {
            Ok(cwd) => cwd,
            Err(_) => normalize(&root.join(cwd)),
        };
        Ok(Self {
            root,
            cwd,
            ignored: HashSet::new(),
        })
    }

    /// Keys that filesystem expansion never yields (the manifest itself, its lock)
    pub fn with_ignored<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Key for a path, if it lies inside the repository
    pub fn key_for_path(&self, path: &Path) -> Option<String> {
        let relative = self.anchor(path).strip_prefix(&self.root).ok()?.to_path_buf();
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    /// Key for a caller argument; errors if it points outside the repository
    pub fn key_for(&self, arg: &str) -> Result<String, HoardError> {
        self.key_for_path(Path::new(arg)).ok_or_else(|| {
            HoardError::InvalidArgs(format!(
                "'{}' is outside the repository at {}",
                arg,
                self.root.display()
            ))
        })
    }

    /// Absolute working-tree path of a key
    pub fn absolute(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.root.clone(), |p, c| p.join(c))
    }

    /// A key as seen from the caller's working directory
    pub fn display(&self, key: &str) -> String {
        relative_to(&self.absolute(key), &self.cwd)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Expand arguments against the working tree
    ///
    /// Directories expand recursively (skipping `.git`), patterns are globbed.
    /// An argument that names nothing is an error; nothing is returned partially.
    pub fn resolve_files(&self, args: &[String]) -> Result<BTreeSet<String>, HoardError> {
        let mut keys = BTreeSet::new();
        for arg in args {
            let before = keys.len();
            if is_glob(arg) {
                self.expand_glob(arg, &mut keys)?;
            } else {
                let path = self.anchor(Path::new(arg));
                if path.is_dir() {
                    self.key_for(arg)?;
                    self.expand_dir(&path, &mut keys)?;
                } else if path.is_file() {
                    let key = self.key_for(arg)?;
                    if !self.ignored.contains(&key) {
                        keys.insert(key);
                    }
                } else {
                    return Err(HoardError::NotFound(format!("no such file or directory '{}'", arg)));
                }
            }
            debug!(arg = %arg, matched = keys.len() - before, "resolved working-tree argument");
        }
        Ok(keys)
    }

    /// Expand arguments against the keys of a manifest
    ///
    /// Each argument is an exact key, a directory prefix, or a glob pattern.
    pub fn resolve_tracked(&self, manifest: &Manifest, args: &[String]) -> Result<BTreeSet<String>, HoardError> {
        let mut keys = BTreeSet::new();
        for arg in args {
            let matched: Vec<&String> = if is_glob(arg) {
                let pattern_key = self.key_for(arg)?;
                let pattern = Pattern::new(&pattern_key)
                    .map_err(|e| HoardError::InvalidArgs(format!("bad pattern '{}': {}", arg, e)))?;
                manifest
                    .files
                    .keys()
                    .filter(|k| pattern.matches_with(k, MATCH_OPTIONS))
                    .collect()
            } else {
                let key = self.key_for(arg)?;
                if key.is_empty() {
                    manifest.files.keys().collect()
                } else if let Some((exact, _)) = manifest.files.get_key_value(&key) {
                    vec![exact]
                } else {
                    let dir = format!("{}/", key);
                    manifest
                        .files
                        .range(dir.clone()..)
                        .take_while(|(k, _)| k.starts_with(&dir))
                        .map(|(k, _)| k)
                        .collect()
                }
            };
            if matched.is_empty() {
                return Err(HoardError::untracked(arg));
            }
            keys.extend(matched.into_iter().cloned());
        }
        Ok(keys)
    }

    fn anchor(&self, path: &Path) -> PathBuf {
        let absolute = if path.is_absolute() {
            normalize(path)
        } else {
            normalize(&self.cwd.join(path))
        };
        if absolute.starts_with(&self.root) {
            return absolute;
        }
        // Absolute arguments may reach the root through a symlinked ancestor
        match (absolute.parent(), absolute.file_name()) {
            (Some(parent), Some(name)) => match parent.canonicalize() {
                Ok(parent) => parent.join(name),
                Err(_) => absolute,
            },
            _ => absolute.canonicalize().unwrap_or(absolute),
        }
    }

    fn expand_dir(&self, dir: &Path, keys: &mut BTreeSet<String>) -> Result<(), HoardError> {
        let walker = WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git");
        for entry in walker {
            let entry = entry.map_err(|e| HoardError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(key) = self.key_for_path(entry.path()) {
                if !self.ignored.contains(&key) {
                    keys.insert(key);
                }
            }
        }
        Ok(())
    }

    fn expand_glob(&self, arg: &str, keys: &mut BTreeSet<String>) -> Result<(), HoardError> {
        let pattern = self.anchor(Path::new(arg));
        let pattern = pattern
            .to_str()
            .ok_or_else(|| HoardError::InvalidArgs(format!("pattern '{}' is not valid UTF-8", arg)))?;
        let paths = glob::glob_with(pattern, MATCH_OPTIONS)
            .map_err(|e| HoardError::InvalidArgs(format!("bad pattern '{}': {}", arg, e)))?;

        let mut matched = false;
        for path in paths {
            let path = path.map_err(|e| HoardError::Io(e.into_error()))?;
            if path.components().any(|c| c.as_os_str() == ".git") {
                continue;
            }
            let Some(key) = self.key_for_path(&path) else {
                return Err(HoardError::InvalidArgs(format!(
                    "'{}' matches paths outside the repository",
                    arg
                )));
            };
            if path.is_dir() {
                matched = true;
                self.expand_dir(&path, keys)?;
            } else if path.is_file() && !self.ignored.contains(&key) {
                matched = true;
                keys.insert(key);
            }
        }
        if !matched {
            return Err(HoardError::NotFound(format!("no files match '{}'", arg)));
        }
        Ok(())
    }
}
