//! Loaders bind an operation to a cache identity.
//!
//! A loader knows how to turn a (possibly partial) target grid into an
//! artifact path, whether that artifact exists, how to produce it and how
//! to read it back. [`DataLoader`] is the stock implementation; anything
//! implementing [`RasterLoader`] can take part in [stacks](crate::stack).
//!
//! ```
//! use geodata::loader::{DataLoader, RasterLoader};
//!
//! let loader = DataLoader::new("USGSElevationLoader").with_param("resolution", 30);
//! assert_eq!(loader.class_name(), "USGSElevation");
//! assert_eq!(loader.name(), "usgs_elevation");
//! assert_eq!(loader.to_string(), "USGSElevation(resolution=30)");
//! ```

use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::config::{self, Config};
use crate::engine::Engine;
use crate::errors::{GeodataError, Result};
use crate::key::{KeyParams, ParamValue};
use crate::operation::{Operation, OperationContext};
use crate::paths;
use crate::raster::Raster;
use crate::spec::{SpatialSpec, TargetSpec};
use crate::state;

/// The capabilities every loader offers.
pub trait RasterLoader: Display + Send + Sync {
    /// File-system friendly identity of the loader, also the artifact file
    /// stem and the name of loaded rasters.
    fn name(&self) -> String;

    /// Kind of the operation behind the loader.
    fn kind(&self) -> &str;

    /// Whether the loader yields single-band rasters that can be stacked.
    fn stackable(&self) -> bool;

    /// Complete a partial target grid.
    fn parse_target_spec(&self, target: &TargetSpec) -> Result<SpatialSpec>;

    /// Path of the artifact for `spec`. Creates its parent directory.
    fn processed_path(&self, spec: &SpatialSpec) -> Result<PathBuf>;

    fn is_processed(&self, spec: &SpatialSpec) -> Result<bool> {
        Ok(state::is_processed(&self.processed_path(spec)?))
    }

    /// Produce the artifact for `spec` unless it exists.
    fn process(&self, spec: &SpatialSpec) -> Result<()>;

    /// Produce the artifact if needed and read it.
    fn load(&self, spec: &SpatialSpec) -> Result<Raster>;
}

/// `USGSElevation` → `usgs_elevation`.
///
/// An uppercase letter gets an underscore in front when it ends a run of
/// capitals and starts a word (`XMLFile` → `XML_File`), or when it follows
/// a lowercase letter or digit (`myData` → `my_Data`). The result is
/// lowercased.
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next = chars.get(i + 1).copied();
            let starts_word =
                prev.is_ascii_uppercase() && next.is_some_and(|n| n.is_ascii_lowercase());
            let after_word = prev.is_ascii_lowercase() || prev.is_ascii_digit();
            if starts_word || after_word {
                out.push('_');
            }
        }
        out.push(c.to_ascii_lowercase());
    }
    out
}

/// A loader described by a type name, an optional operation and declared
/// key parameters.
///
/// Artifacts live under `<config.path_data_processed>/<spec>/<class_name>/
/// <params>/<name>.tif`, where the parameters are the loader's own merged
/// with the operation's [key parameters](Operation::key_params).
#[derive(Clone)]
pub struct DataLoader {
    type_name: String,
    operation: Option<Arc<dyn Operation>>,
    params: KeyParams,
    engine: Engine,
    config: Option<Config>,
}

impl DataLoader {
    pub fn new(type_name: impl Into<String>) -> Self {
        DataLoader {
            type_name: type_name.into(),
            operation: None,
            params: KeyParams::new(),
            engine: Engine::default(),
            config: None,
        }
    }

    pub fn with_operation(mut self, operation: impl Operation + 'static) -> Self {
        self.operation = Some(Arc::new(operation));
        self
    }

    pub fn with_shared_operation(mut self, operation: Arc<dyn Operation>) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Declare a loader parameter taking part in the cache key.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key, value);
        self
    }

    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    /// Pin the configuration instead of following [`config::current`].
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Type name without `Loader`.
    pub fn class_name(&self) -> String {
        self.type_name.replace("Loader", "")
    }

    pub fn operation(&self) -> Option<&dyn Operation> {
        self.operation.as_deref()
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> Config {
        self.config.clone().unwrap_or_else(config::current)
    }

    /// Loader parameters merged with the operation's key parameters.
    pub fn params(&self) -> Result<KeyParams> {
        let mut params = self.params.clone();
        if let Some(operation) = &self.operation {
            params.merge(&operation.key_params())?;
        }
        Ok(params)
    }

    fn context(&self) -> OperationContext {
        OperationContext::new(self.engine.clone(), self.config())
    }

    fn require_operation(&self) -> Result<&dyn Operation> {
        self.operation().ok_or_else(|| {
            GeodataError::NotImplementedOperation(format!(
                "{} has no operation bound",
                self.class_name()
            ))
        })
    }
}

impl Display for DataLoader {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let params = self.params().unwrap_or_else(|_| self.params.clone());
        write!(f, "{}({params})", self.class_name())
    }
}

impl fmt::Debug for DataLoader {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataLoader")
            .field("type_name", &self.type_name)
            .field("operation", &self.operation)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl RasterLoader for DataLoader {
    fn name(&self) -> String {
        snake_case(&self.class_name())
    }

    fn kind(&self) -> &str {
        self.operation.as_ref().map_or("none", |op| op.kind())
    }

    fn stackable(&self) -> bool {
        self.operation.as_ref().is_some_and(|op| op.stackable())
    }

    /// Fill in the grid from, in order: `target`, the configured default
    /// spec and the operation's source.
    fn parse_target_spec(&self, target: &TargetSpec) -> Result<SpatialSpec> {
        let config = self.config();
        let target = if *target == TargetSpec::default() {
            config.spec.clone().unwrap_or_default()
        } else {
            target.clone()
        };
        if let Some(spec) = target.complete()? {
            return Ok(spec);
        }

        let source = match &self.operation {
            Some(op) => op.source_metadata(&OperationContext::new(self.engine.clone(), config))?,
            None => None,
        };
        let Some(source) = source else {
            return Err(GeodataError::Configuration(format!(
                "No spatial specification provided or present in config for {self}"
            )));
        };
        target.resolve(&source, None, self.engine.warper.as_ref())
    }

    fn processed_path(&self, spec: &SpatialSpec) -> Result<PathBuf> {
        paths::resolve(
            &self.config().path_data_processed,
            spec,
            &self.class_name(),
            &self.params()?,
            &self.name(),
        )
    }

    fn process(&self, spec: &SpatialSpec) -> Result<()> {
        let path = self.processed_path(spec)?;
        let produced = state::ensure_processed(&path, || {
            let operation = self.require_operation()?;
            operation.materialize(&path, spec, &self.context())
        })?;
        if produced {
            debug!(loader = %self, path = %path.display(), "Artifact produced");
        }
        Ok(())
    }

    fn load(&self, spec: &SpatialSpec) -> Result<Raster> {
        self.process(spec)?;
        let path = self.processed_path(spec)?;
        Ok(self.engine.driver.read(&path)?.rename(self.name()))
    }
}
