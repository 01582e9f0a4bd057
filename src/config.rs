//! Runtime configuration.
//!
//! Configuration is an explicit [`Config`] value. Code that does not carry
//! one around reads the ambient configuration with [`current`]: the
//! innermost override installed on this thread by [`scoped`], or else the
//! process-wide default, which is read from the environment on first use.
//!
//! ```
//! use geodata::config;
//!
//! let before = config::current();
//! let mut overrides = before.clone();
//! overrides.set("num_threads", "4").unwrap();
//!
//! config::with_config(overrides, || {
//!     assert_eq!(config::current().num_threads, 4);
//! });
//! assert_eq!(config::current(), before);
//! ```
//!
//! Environment variables read by [`Config::from_env`]:
//!
//! | Variable | Field |
//! |---|---|
//! | `GEODATA_PATH_DATA_PROCESSED` | `path_data_processed` |
//! | `GEODATA_NUM_THREADS` | `num_threads` |
//! | `GEODATA_WARP_MEM_LIMIT` | `warp_mem_limit` |

use std::cell::RefCell;
use std::env;
use std::ffi::c_void;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use tracing::warn;

use crate::errors::{GeodataError, Result};
use crate::options::RasterCreationOptions;
use crate::spec::{Crs, TargetSpec};

pub const ENV_PATH_DATA_PROCESSED: &str = "GEODATA_PATH_DATA_PROCESSED";
pub const ENV_NUM_THREADS: &str = "GEODATA_NUM_THREADS";
pub const ENV_WARP_MEM_LIMIT: &str = "GEODATA_WARP_MEM_LIMIT";

/// Settings shared by every loader and operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Root of the artifact cache.
    pub path_data_processed: PathBuf,
    /// Worker threads handed to the warper.
    pub num_threads: usize,
    /// Warp memory limit in bytes. `0` selects the warper default.
    pub warp_mem_limit: usize,
    /// Target grid used when a load request does not give one.
    pub spec: Option<TargetSpec>,
    pub raster_creation_options: RasterCreationOptions,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            path_data_processed: PathBuf::from("data_processed"),
            num_threads: 1,
            warp_mem_limit: 0,
            spec: None,
            raster_creation_options: RasterCreationOptions::default(),
        }
    }
}

fn parse_usize(key: &str, value: &str) -> Result<usize> {
    value.trim().parse().map_err(|_| {
        GeodataError::Configuration(format!(
            "Invalid value '{value}' for config key '{key}', expected a non-negative integer"
        ))
    })
}

impl Config {
    /// Defaults overridden by the `GEODATA_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        for (var, key) in [
            (ENV_PATH_DATA_PROCESSED, "path_data_processed"),
            (ENV_NUM_THREADS, "num_threads"),
            (ENV_WARP_MEM_LIMIT, "warp_mem_limit"),
        ] {
            if let Ok(value) = env::var(var) {
                config.set(key, &value)?;
            }
        }
        Ok(config)
    }

    /// Set a field from its string form.
    ///
    /// `spec` takes a CRS definition and sets a CRS-only target. Unknown keys
    /// are a configuration error.
    pub fn set(&mut self, key: &str, value: &str) -> Result<&mut Self> {
        match key {
            "path_data_processed" => {
                if value.is_empty() {
                    return Err(GeodataError::Configuration(
                        "path_data_processed must not be empty".to_string(),
                    ));
                }
                self.path_data_processed = PathBuf::from(value);
            }
            "num_threads" => {
                let threads = parse_usize(key, value)?;
                if threads == 0 {
                    return Err(GeodataError::Configuration(
                        "num_threads must be at least 1".to_string(),
                    ));
                }
                self.num_threads = threads;
            }
            "warp_mem_limit" => self.warp_mem_limit = parse_usize(key, value)?,
            "spec" => self.spec = Some(TargetSpec::new().with_crs(Crs::new(value)?)),
            _ => {
                return Err(GeodataError::Configuration(format!(
                    "Invalid config key: {key}"
                )))
            }
        }
        Ok(self)
    }

    pub fn with_path_data_processed(mut self, path: impl Into<PathBuf>) -> Self {
        self.path_data_processed = path.into();
        self
    }

    pub fn with_spec(mut self, spec: impl Into<TargetSpec>) -> Self {
        self.spec = Some(spec.into());
        self
    }

    pub fn with_raster_creation_options(mut self, options: RasterCreationOptions) -> Self {
        self.raster_creation_options = options;
        self
    }
}

static DEFAULT_CONFIG: Lazy<Mutex<Config>> = Lazy::new(|| {
    let config = Config::from_env().unwrap_or_else(|e| {
        warn!(error = %e, "Ignoring invalid configuration from environment");
        Config::default()
    });
    Mutex::new(config)
});

thread_local! {
    static OVERRIDES: RefCell<Vec<Config>> = const { RefCell::new(Vec::new()) };
}

/// The configuration in effect on this thread.
pub fn current() -> Config {
    OVERRIDES
        .with(|stack| stack.borrow().last().cloned())
        .unwrap_or_else(|| match DEFAULT_CONFIG.lock() {
            Ok(config) => config.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        })
}

/// Replace the process-wide default. Thread-local overrides keep
/// precedence.
pub fn set_default(config: Config) {
    match DEFAULT_CONFIG.lock() {
        Ok(mut default) => *default = config,
        Err(poisoned) => *poisoned.into_inner() = config,
    }
}

/// Install `config` as this thread's configuration until the returned guard
/// is dropped.
///
/// Guards nest; dropping one restores whatever was in effect when it was
/// created, also when the scope unwinds.
pub fn scoped(config: Config) -> ConfigGuard {
    let depth = OVERRIDES.with(|stack| {
        let mut stack = stack.borrow_mut();
        stack.push(config);
        stack.len()
    });
    ConfigGuard {
        depth,
        _private: PhantomData,
    }
}

/// Run `f` with `config` installed on this thread.
pub fn with_config<T>(config: Config, f: impl FnOnce() -> T) -> T {
    let _guard = scoped(config);
    f()
}

/// Restores the previous configuration on drop.
#[must_use = "the override is removed as soon as the guard is dropped"]
pub struct ConfigGuard {
    depth: usize,
    // Make !Send: the override lives in a thread local.
    _private: PhantomData<*mut c_void>,
}

impl Drop for ConfigGuard {
    fn drop(&mut self) {
        OVERRIDES.with(|stack| stack.borrow_mut().truncate(self.depth - 1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.path_data_processed, PathBuf::from("data_processed"));
        assert_eq!(config.num_threads, 1);
        assert_eq!(config.warp_mem_limit, 0);
        assert!(config.spec.is_none());
    }

    #[test]
    fn set_known_keys() {
        let mut config = Config::default();
        config
            .set("num_threads", "8")
            .unwrap()
            .set("warp_mem_limit", "1024")
            .unwrap()
            .set("path_data_processed", "/tmp/cache")
            .unwrap()
            .set("spec", "EPSG:3035")
            .unwrap();
        assert_eq!(config.num_threads, 8);
        assert_eq!(config.warp_mem_limit, 1024);
        assert_eq!(config.path_data_processed, PathBuf::from("/tmp/cache"));
        assert_eq!(
            config.spec,
            Some(TargetSpec::new().with_crs(Crs::from_epsg(3035)))
        );
    }

    #[test]
    fn set_rejects_unknown_and_invalid() {
        let mut config = Config::default();
        assert!(matches!(
            config.set("num_thread", "8"),
            Err(GeodataError::Configuration(_))
        ));
        assert!(config.set("num_threads", "many").is_err());
        assert!(config.set("num_threads", "0").is_err());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn scoped_nests_and_restores() {
        let outer = Config::default().with_path_data_processed("outer");
        let inner = Config::default().with_path_data_processed("inner");
        let before = current();
        {
            let _outer = scoped(outer);
            assert_eq!(current().path_data_processed, PathBuf::from("outer"));
            with_config(inner, || {
                assert_eq!(current().path_data_processed, PathBuf::from("inner"));
            });
            assert_eq!(current().path_data_processed, PathBuf::from("outer"));
        }
        assert_eq!(current(), before);
    }

    #[test]
    fn scoped_restores_on_panic() {
        let before = current();
        let result = panic::catch_unwind(|| {
            with_config(Config::default().with_path_data_processed("panicking"), || {
                panic!("boom");
            })
        });
        assert!(result.is_err());
        assert_eq!(current(), before);
    }

    #[test]
    fn overrides_are_thread_local() {
        let _guard = scoped(Config::default().with_path_data_processed("here"));
        let other = std::thread::spawn(|| current().path_data_processed)
            .join()
            .unwrap();
        assert_ne!(other, PathBuf::from("here"));
    }
}
