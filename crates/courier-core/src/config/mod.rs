//! Layered configuration resolution.
//!
//! A component configuration is resolved from three layers with fixed
//! precedence: caller-supplied overrides, then a file-backed layer, then the
//! type's defaults. A field counts as "unset" in an overlay when it is empty
//! (strings, collections), zero (numerics, durations), or `None`; the
//! [`overlay`] helpers encode these rules so `Merge` implementations stay
//! field-by-field declarative.

mod center;
pub use center::{component_path, spawn_watch, ConfigCenter, Snapshot};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Categorized, Category};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config file {path}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}")]
    ParseFile {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("config file {path} has an unsupported extension (expected .json, .yaml or .yml)")]
    UnsupportedExtension { path: PathBuf },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Categorized for Error {
    fn category(&self) -> Category {
        Category::Config
    }
}

/// Deployment profile selecting a family of defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Small pools, verbose logging, short timeouts, conveniences enabled.
    Development,
    /// Larger pools, warn-level logging, long connection lifetimes.
    Production,
}

impl std::str::FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(Error::Invalid(format!("unknown environment '{other}'"))),
        }
    }
}

/// Which layers contributed to a resolved configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Default,
    File,
    User,
    Mixed,
}

/// An immutable, validated configuration snapshot. Never mutated post-build;
/// hot reload swaps whole snapshots through [`Snapshot`].
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    value: T,
    source: Source,
}

impl<T> Resolved<T> {
    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> std::ops::Deref for Resolved<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Overlay another instance of the same configuration onto `self`.
/// Set fields of `other` win; unset fields leave `self` untouched.
pub trait Merge {
    fn merge(&mut self, other: Self);
}

/// Check a configuration, repairing out-of-range scalars to documented
/// defaults (logged at warn), and erroring only on semantically undecidable
/// fields. Must be idempotent: validating an already-valid value is a no-op.
pub trait Validate {
    fn validate(&mut self) -> Result<(), Error>;
}

/// Resolve a configuration named `name` from defaults, an optional config
/// file, and an optional caller override, in ascending precedence.
///
/// When `file_path` is None the well-known locations `<name>.json`,
/// `<name>.yaml`, `<name>.yml`, and the same three under `config/` are
/// searched in order. A missing file is not an error; an unparseable one is.
pub fn resolve<T>(name: &str, user: Option<T>, file_path: Option<&Path>) -> Result<Resolved<T>, Error>
where
    T: Default + DeserializeOwned + Merge + Validate,
{
    resolve_from(T::default(), name, user, file_path)
}

/// Like [`resolve`], but layering on top of caller-chosen defaults, such as
/// an [`Environment`] profile.
pub fn resolve_from<T>(
    defaults: T,
    name: &str,
    user: Option<T>,
    file_path: Option<&Path>,
) -> Result<Resolved<T>, Error>
where
    T: DeserializeOwned + Merge + Validate,
{
    let from_file: Option<T> = match file_path {
        Some(path) => load_path(path)?,
        None => {
            let mut found = None;
            for path in candidate_paths(name) {
                if let Some(value) = load_path(&path)? {
                    tracing::debug!(path = %path.display(), "loaded configuration file");
                    found = Some(value);
                    break;
                }
            }
            found
        }
    };

    let mut value = defaults;
    let mut source = Source::Default;

    if let Some(file) = from_file {
        value.merge(file);
        source = Source::File;
    }
    if let Some(user) = user {
        value.merge(user);
        source = match source {
            Source::File => Source::Mixed,
            _ => Source::User,
        };
    }

    value.validate()?;
    Ok(Resolved { value, source })
}

fn candidate_paths(name: &str) -> Vec<PathBuf> {
    let mut paths = Vec::with_capacity(6);
    for dir in ["", "config"] {
        for ext in ["json", "yaml", "yml"] {
            let mut path = PathBuf::from(dir);
            path.push(format!("{name}.{ext}"));
            paths.push(path);
        }
    }
    paths
}

/// Load and parse `path`, dispatching on its extension.
/// Returns None when the file does not exist.
fn load_path<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, Error> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(Error::ReadFile {
                path: path.to_owned(),
                source,
            })
        }
    };

    let parsed = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_slice(&raw).map_err(|err| Error::ParseFile {
            path: path.to_owned(),
            source: err.into(),
        })?,
        Some("yaml") | Some("yml") => {
            serde_yaml::from_slice(&raw).map_err(|err| Error::ParseFile {
                path: path.to_owned(),
                source: err.into(),
            })?
        }
        _ => {
            return Err(Error::UnsupportedExtension {
                path: path.to_owned(),
            })
        }
    };
    Ok(Some(parsed))
}

/// Field-level overlay rules shared by `Merge` implementations.
pub mod overlay {
    use std::collections::HashMap;
    use std::time::Duration;

    /// Numerics and other scalars: the field-type default means "unset".
    pub fn scalar<T: PartialEq + Default>(dst: &mut T, src: T) {
        if src != T::default() {
            *dst = src;
        }
    }

    pub fn string(dst: &mut String, src: String) {
        if !src.is_empty() {
            *dst = src;
        }
    }

    pub fn vec<T>(dst: &mut Vec<T>, src: Vec<T>) {
        if !src.is_empty() {
            *dst = src;
        }
    }

    /// Maps are extended key-wise rather than replaced.
    pub fn map<K: std::hash::Hash + Eq, V>(dst: &mut HashMap<K, V>, src: HashMap<K, V>) {
        dst.extend(src);
    }

    pub fn duration(dst: &mut Duration, src: Duration) {
        if !src.is_zero() {
            *dst = src;
        }
    }

    /// Tri-state fields (bools, enums) where the unset state must be
    /// distinguishable from every set value.
    pub fn option<T>(dst: &mut Option<T>, src: Option<T>) {
        if src.is_some() {
            *dst = src;
        }
    }
}
