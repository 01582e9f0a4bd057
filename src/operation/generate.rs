use std::fmt::{self, Debug, Formatter};
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::errors::{GeodataError, Result};
use crate::key::{KeyParams, ParamValue};
use crate::operation::atomic;
use crate::operation::{Operation, OperationContext, Reprojector};
use crate::raster::RasterMetadata;
use crate::spec::SpatialSpec;

/// Signature of a generator: write the artifact for the spec to the path.
pub type GenerateFn =
    Arc<dyn Fn(&Path, &SpatialSpec, &OperationContext) -> Result<()> + Send + Sync>;

/// Runs a user function to produce the artifact.
///
/// The function is handed a temporary path next to the destination; the
/// result is moved into place once it returns. Parameters influencing the
/// output must be declared with [`with_param`](Self::with_param) to keep
/// their artifacts apart.
#[derive(Clone)]
pub struct GeneratorOperation {
    generate: GenerateFn,
    params: KeyParams,
}

impl GeneratorOperation {
    pub fn new<F>(generate: F) -> Self
    where
        F: Fn(&Path, &SpatialSpec, &OperationContext) -> Result<()> + Send + Sync + 'static,
    {
        GeneratorOperation {
            generate: Arc::new(generate),
            params: KeyParams::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key, value);
        self
    }
}

impl Debug for GeneratorOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorOperation")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl Operation for GeneratorOperation {
    fn kind(&self) -> &'static str {
        "generate"
    }

    fn key_params(&self) -> KeyParams {
        self.params.clone()
    }

    fn stackable(&self) -> bool {
        false
    }

    fn materialize(&self, dst: &Path, spec: &SpatialSpec, ctx: &OperationContext) -> Result<()> {
        if dst.exists() {
            return Err(GeodataError::ArtifactExists(dst.to_path_buf()));
        }
        info!(dst = %dst.display(), "Generating");
        atomic::write_atomic(dst, |tmp| (self.generate)(tmp, spec, ctx))
    }
}

/// Reprojects a source file when it exists and falls back to a generator
/// otherwise.
///
/// With neither available, materializing fails with
/// [`NotImplementedOperation`](GeodataError::NotImplementedOperation).
#[derive(Debug, Clone)]
pub struct SourceOrGenerate {
    source: Option<Reprojector>,
    generator: Option<GeneratorOperation>,
}

impl SourceOrGenerate {
    /// Both halves contribute their key parameters; a key declared by both
    /// is a configuration error.
    pub fn new(source: Option<Reprojector>, generator: Option<GeneratorOperation>) -> Result<Self> {
        let op = SourceOrGenerate { source, generator };
        op.merged_params()?;
        Ok(op)
    }

    fn merged_params(&self) -> Result<KeyParams> {
        let mut params = KeyParams::new();
        if let Some(source) = &self.source {
            params.merge(&source.key_params())?;
        }
        if let Some(generator) = &self.generator {
            params.merge(&generator.key_params())?;
        }
        Ok(params)
    }

    fn existing_source(&self) -> Option<&Reprojector> {
        self.source
            .as_ref()
            .filter(|source| source.src_path().exists())
    }
}

impl Operation for SourceOrGenerate {
    fn kind(&self) -> &'static str {
        "source_or_generate"
    }

    fn key_params(&self) -> KeyParams {
        // checked in `new`
        self.merged_params().unwrap_or_default()
    }

    /// Not stackable: the artifact may come from the generator.
    fn stackable(&self) -> bool {
        false
    }

    fn source_metadata(&self, ctx: &OperationContext) -> Result<Option<RasterMetadata>> {
        match self.existing_source() {
            Some(source) => source.source_metadata(ctx),
            None => Ok(None),
        }
    }

    fn materialize(&self, dst: &Path, spec: &SpatialSpec, ctx: &OperationContext) -> Result<()> {
        if let Some(source) = self.existing_source() {
            return source.materialize(dst, spec, ctx);
        }
        match &self.generator {
            Some(generator) => generator.materialize(dst, spec, ctx),
            None => Err(GeodataError::NotImplementedOperation(format!(
                "source {} not found and no generator given",
                self.source
                    .as_ref()
                    .map_or_else(|| "<none>".to_string(), |s| s.src_path().display().to_string())
            ))),
        }
    }
}
