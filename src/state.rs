//! Processing state of artifacts.
//!
//! An artifact is either missing or processed; the state is derived from
//! the filesystem on every query and never invalidated by the crate.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use once_cell::sync::Lazy;
use tracing::debug;

use crate::errors::Result;

/// Whether the artifact at `path` exists.
///
/// Symlinks are followed: a link to an existing file counts as processed, a
/// dangling link does not.
pub fn is_processed(path: &Path) -> bool {
    fs::metadata(path).is_ok()
}

static PATH_LOCKS: Lazy<Mutex<HashMap<PathBuf, Weak<Mutex<()>>>>> = Lazy::new(Default::default);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic inside an operation must not wedge later callers.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn path_lock(path: &Path) -> Arc<Mutex<()>> {
    let mut locks = lock(&PATH_LOCKS);
    if let Some(existing) = locks.get(path).and_then(Weak::upgrade) {
        return existing;
    }
    locks.retain(|_, weak| weak.strong_count() > 0);
    let created = Arc::new(Mutex::new(()));
    locks.insert(path.to_path_buf(), Arc::downgrade(&created));
    created
}

/// Run `produce` unless `path` is already processed.
///
/// Calls for the same path are serialized within the process, so concurrent
/// threads never produce the same artifact twice; distinct paths proceed in
/// parallel. Returns whether `produce` ran.
pub fn ensure_processed<F>(path: &Path, produce: F) -> Result<bool>
where
    F: FnOnce() -> Result<()>,
{
    if is_processed(path) {
        debug!(path = %path.display(), "Artifact already processed");
        return Ok(false);
    }

    let gate = path_lock(path);
    let _held = lock(&gate);
    if is_processed(path) {
        debug!(path = %path.display(), "Artifact produced while waiting");
        return Ok(false);
    }
    produce()?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GeodataError;
    use crate::test_utils::TempFixture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn missing_then_processed() {
        let fixture = TempFixture::empty("artifact.tif");
        assert!(!is_processed(fixture.path()));
        fs::write(fixture.path(), b"data").unwrap();
        assert!(is_processed(fixture.path()));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_followed() {
        let fixture = TempFixture::empty("target.tif");
        let link = fixture.path().with_file_name("link.tif");
        std::os::unix::fs::symlink(fixture.path(), &link).unwrap();
        assert!(!is_processed(&link), "dangling link counts as missing");
        fs::write(fixture.path(), b"data").unwrap();
        assert!(is_processed(&link));
    }

    #[test]
    fn skips_processed_artifacts() {
        let fixture = TempFixture::empty("artifact.tif");
        fs::write(fixture.path(), b"data").unwrap();
        let ran = ensure_processed(fixture.path(), || panic!("must not run")).unwrap();
        assert!(!ran);
    }

    #[test]
    fn propagates_errors() {
        let fixture = TempFixture::empty("artifact.tif");
        let result = ensure_processed(fixture.path(), || {
            Err(GeodataError::NotImplementedOperation("nothing".into()))
        });
        assert!(matches!(
            result,
            Err(GeodataError::NotImplementedOperation(_))
        ));
        assert!(!is_processed(fixture.path()));
    }

    #[test]
    fn concurrent_callers_produce_once() {
        let fixture = TempFixture::empty("artifact.tif");
        let calls = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = fixture.path().to_path_buf();
                let calls = calls.clone();
                thread::spawn(move || {
                    ensure_processed(&path, || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        fs::write(&path, b"data")?;
                        Ok(())
                    })
                    .unwrap()
                })
            })
            .collect();
        let produced = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ran| *ran)
            .count();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(produced, 1);
    }
}
