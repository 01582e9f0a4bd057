//! Atomic artifact creation.
//!
//! Artifacts are written to a temporary file next to their destination and
//! moved into place with a no-clobber rename. Readers therefore see either
//! nothing or a complete file. When two producers race for the same
//! destination the first move wins and the loser's file is discarded.

use std::fs;
use std::io;
use std::path::Path;

use tempfile::TempPath;
use tracing::debug;

use crate::errors::{GeodataError, Result};
use crate::paths::{ensure_dir, ARTIFACT_EXTENSION};

fn parent_dir(dst: &Path) -> &Path {
    match dst.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Fails with [`GeodataError::ArtifactExists`] if something is at `dst`.
/// A dangling symlink left behind by a deleted source is removed.
fn ensure_absent(dst: &Path) -> Result<()> {
    let Ok(meta) = fs::symlink_metadata(dst) else {
        return Ok(());
    };
    if meta.file_type().is_symlink() && fs::metadata(dst).is_err() {
        debug!(path = %dst.display(), "Removing dangling artifact link");
        return match fs::remove_file(dst) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        };
    }
    Err(GeodataError::ArtifactExists(dst.to_path_buf()))
}

fn commit(temp: TempPath, dst: &Path) -> Result<()> {
    match temp.persist_noclobber(dst) {
        Ok(()) => Ok(()),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
            // dropping `e.path` removes our copy
            debug!(path = %dst.display(), "Artifact was produced concurrently, discarding ours");
            Ok(())
        }
        Err(e) => Err(e.error.into()),
    }
}

/// Create `dst` through `write`, which receives the temporary path to fill.
///
/// The temporary file lives in the destination directory so the final move
/// never crosses devices. A `write` that leaves the file empty is an error.
pub fn write_atomic<F>(dst: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    ensure_absent(dst)?;
    let dir = parent_dir(dst);
    ensure_dir(dir)?;

    let temp = tempfile::Builder::new()
        .prefix(".~")
        .suffix(&format!(".{ARTIFACT_EXTENSION}"))
        .tempfile_in(dir)?
        .into_temp_path();
    write(&temp)?;

    let written = fs::metadata(&temp).map(|m| m.len()).unwrap_or(0);
    if written == 0 {
        return Err(GeodataError::raster_io(dst, "operation wrote no data"));
    }
    commit(temp, dst)
}

/// Point `dst` at `src` with a symbolic link.
///
/// Link creation is itself atomic and never replaces an existing entry.
/// Platforms without symlinks get an atomic copy instead.
#[cfg(unix)]
pub fn symlink_noclobber(src: &Path, dst: &Path) -> Result<()> {
    ensure_absent(dst)?;
    ensure_dir(parent_dir(dst))?;
    let target = fs::canonicalize(src).map_err(|e| GeodataError::raster_io(src, e))?;
    match std::os::unix::fs::symlink(&target, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            debug!(path = %dst.display(), "Artifact was linked concurrently");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(unix))]
pub fn symlink_noclobber(src: &Path, dst: &Path) -> Result<()> {
    write_atomic(dst, |tmp| {
        fs::copy(src, tmp).map_err(|e| GeodataError::raster_io(src, e))?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TempFixture;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn writes_through_temporary_file() {
        let fixture = TempFixture::empty("out.tif");
        write_atomic(fixture.path(), |tmp| {
            assert_ne!(tmp, fixture.path());
            assert_eq!(tmp.parent(), fixture.path().parent());
            fs::write(tmp, b"pixels")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(fs::read(fixture.path()).unwrap(), b"pixels");
        assert_eq!(entries(fixture.path().parent().unwrap()), vec!["out.tif"]);
    }

    #[test]
    fn creates_missing_directories() {
        let fixture = TempFixture::empty("root");
        let dst = fixture.path().join("a").join("b").join("out.tif");
        write_atomic(&dst, |tmp| Ok(fs::write(tmp, b"x")?)).unwrap();
        assert!(dst.is_file());
    }

    #[test]
    fn existing_destination_is_an_error() {
        let fixture = TempFixture::empty("out.tif");
        fs::write(fixture.path(), b"old").unwrap();
        let result = write_atomic(fixture.path(), |_| panic!("must not run"));
        assert!(matches!(result, Err(GeodataError::ArtifactExists(_))));
        assert_eq!(fs::read(fixture.path()).unwrap(), b"old");
    }

    #[test]
    fn failed_write_leaves_nothing_behind() {
        let fixture = TempFixture::empty("out.tif");
        let result = write_atomic(fixture.path(), |tmp| {
            fs::write(tmp, b"partial")?;
            Err(GeodataError::BadArgument("boom".to_string()))
        });
        assert!(matches!(result, Err(GeodataError::BadArgument(_))));
        assert!(entries(fixture.path().parent().unwrap()).is_empty());
    }

    #[test]
    fn empty_output_is_an_error() {
        let fixture = TempFixture::empty("out.tif");
        let result = write_atomic(fixture.path(), |_| Ok(()));
        assert!(matches!(result, Err(GeodataError::RasterIo { .. })));
        assert!(!fixture.path().exists());
    }

    #[test]
    fn racing_peer_wins_quietly() {
        let fixture = TempFixture::empty("out.tif");
        write_atomic(fixture.path(), |tmp| {
            fs::write(tmp, b"ours")?;
            // a peer process finishes first
            fs::write(fixture.path(), b"theirs")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(fs::read(fixture.path()).unwrap(), b"theirs");
        assert_eq!(entries(fixture.path().parent().unwrap()), vec!["out.tif"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_points_at_source() {
        let source = TempFixture::empty("source.tif");
        fs::write(source.path(), b"data").unwrap();
        let dst = source.path().with_file_name("link.tif");
        symlink_noclobber(source.path(), &dst).unwrap();
        assert!(fs::symlink_metadata(&dst).unwrap().file_type().is_symlink());
        assert_eq!(fs::read(&dst).unwrap(), b"data");
        assert!(matches!(
            symlink_noclobber(source.path(), &dst),
            Err(GeodataError::ArtifactExists(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn dangling_link_is_replaced() {
        let fixture = TempFixture::empty("out.tif");
        let gone = fixture.path().with_file_name("gone.tif");
        std::os::unix::fs::symlink(&gone, fixture.path()).unwrap();
        write_atomic(fixture.path(), |tmp| Ok(fs::write(tmp, b"fresh")?)).unwrap();
        assert_eq!(fs::read(fixture.path()).unwrap(), b"fresh");
    }
}
