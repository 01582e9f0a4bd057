//! Operations produce artifacts.
//!
//! An [`Operation`] writes the artifact for one [`SpatialSpec`] to a path it
//! is given. Operations never decide whether work is needed; that is the
//! job of the [loader](crate::loader). They do guarantee that a
//! half-written artifact is never visible at the destination, see
//! [`atomic`].

pub mod atomic;
mod generate;
mod rasterize;
mod reproject;

pub use generate::{GeneratorOperation, SourceOrGenerate};
pub use rasterize::{Rasterizer, TableLoader};
pub use reproject::Reprojector;

use std::fmt::Debug;
use std::path::Path;

use crate::config::Config;
use crate::engine::Engine;
use crate::errors::Result;
use crate::key::KeyParams;
use crate::raster::RasterMetadata;
use crate::spec::SpatialSpec;

/// What an operation gets to work with.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub engine: Engine,
    pub config: Config,
}

impl OperationContext {
    pub fn new(engine: Engine, config: Config) -> Self {
        OperationContext { engine, config }
    }
}

/// A unit of work materializing an artifact at a given path.
pub trait Operation: Debug + Send + Sync {
    /// Short name of the operation type, e.g. `"reproject"`.
    fn kind(&self) -> &'static str;

    /// Parameters that change the produced data and therefore take part in
    /// the cache key. Parameters that only affect how the work is done
    /// (thread count, memory limit, compression) are left out.
    fn key_params(&self) -> KeyParams {
        KeyParams::new()
    }

    /// Whether artifacts of this operation are single-band rasters that can
    /// be stacked with others.
    fn stackable(&self) -> bool;

    /// Metadata of the source, used to infer a target grid when none is
    /// given. `None` when the operation has no raster source.
    fn source_metadata(&self, _ctx: &OperationContext) -> Result<Option<RasterMetadata>> {
        Ok(None)
    }

    /// Write the artifact for `spec` to `dst`.
    ///
    /// Fails with [`ArtifactExists`](crate::errors::GeodataError::ArtifactExists)
    /// if `dst` is already present.
    fn materialize(&self, dst: &Path, spec: &SpatialSpec, ctx: &OperationContext) -> Result<()>;
}
