//! Artifact path derivation.
//!
//! The on-disk cache layout is
//!
//! ```text
//! <base_dir>/<crs>/<transform>/<shape>/<operation_name>/<key=value>.../<loader_name>.tif
//! ```
//!
//! and is the public contract for tooling that inspects or prunes the cache.
//! Layouts written by earlier schemes (name-only keys, dtype or subset baked
//! into the entry) are not recognized.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::errors::{GeodataError, Result};
use crate::key::KeyParams;
use crate::spec::SpatialSpec;

/// Extension of every artifact.
pub const ARTIFACT_EXTENSION: &str = "tif";

fn check_component(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() || value == "." || value == ".." || value.contains(['/', '\\']) {
        return Err(GeodataError::Configuration(format!(
            "Invalid {kind} '{value}' for an artifact path"
        )));
    }
    Ok(())
}

/// Compute the artifact path without touching the filesystem.
///
/// An empty `operation_name` is omitted from the path.
pub fn artifact_path(
    base_dir: &Path,
    spec: &SpatialSpec,
    operation_name: &str,
    params: &KeyParams,
    loader_name: &str,
) -> Result<PathBuf> {
    check_component("loader name", loader_name)?;
    if !operation_name.is_empty() {
        check_component("operation name", operation_name)?;
    }

    let mut path = base_dir.to_path_buf();
    for fragment in spec.key_fragments() {
        path.push(fragment);
    }
    if !operation_name.is_empty() {
        path.push(operation_name);
    }
    for fragment in params.fragments()? {
        path.push(fragment);
    }
    path.push(format!("{loader_name}.{ARTIFACT_EXTENSION}"));
    Ok(path)
}

/// Compute the artifact path and make sure its parent directory exists.
///
/// Safe to call concurrently from several processes: a directory created by
/// someone else in the meantime is not an error. The artifact itself is never
/// created here.
pub fn resolve(
    base_dir: &Path,
    spec: &SpatialSpec,
    operation_name: &str,
    params: &KeyParams,
    loader_name: &str,
) -> Result<PathBuf> {
    let path = artifact_path(base_dir, spec, operation_name, params, loader_name)?;
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    Ok(path)
}

/// `create_dir_all` that treats a concurrent creation as success.
pub(crate) fn ensure_dir(dir: &Path) -> Result<()> {
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(e) => Err(e.into()),
    }
}
