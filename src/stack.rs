//! Stacking single-band loaders into one multi-variable raster.

use std::collections::HashSet;

use ndarray::{concatenate, Array3, Axis};
use tracing::{debug, warn};

use crate::errors::{GeodataError, Result};
use crate::loader::RasterLoader;
use crate::raster::{DataType, Raster};
use crate::spec::{SpatialSpec, TargetSpec};

/// What to do when stack members resolve to different grids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SpecPolicy {
    /// Warn and load every member on the first member's grid.
    #[default]
    Lenient,
    /// Fail with [`GeodataError::Stack`].
    Strict,
}

/// What to do with members resolving to the same artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Duplicates {
    /// Keep one variable per artifact.
    #[default]
    Dedupe,
    /// Keep one variable per member.
    Keep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackOptions {
    pub spec_policy: SpecPolicy,
    pub duplicates: Duplicates,
    /// Return a plain single-band raster, without variable labels, when
    /// only one variable is left.
    pub collapse_single: bool,
}

impl Default for StackOptions {
    fn default() -> Self {
        StackOptions {
            spec_policy: SpecPolicy::default(),
            duplicates: Duplicates::default(),
            collapse_single: true,
        }
    }
}

impl StackOptions {
    pub fn strict() -> Self {
        StackOptions {
            spec_policy: SpecPolicy::Strict,
            ..Default::default()
        }
    }

    pub fn with_duplicates(mut self, duplicates: Duplicates) -> Self {
        self.duplicates = duplicates;
        self
    }

    pub fn with_collapse_single(mut self, collapse_single: bool) -> Self {
        self.collapse_single = collapse_single;
        self
    }
}

fn consensus_spec(
    loaders: &[&dyn RasterLoader],
    target: &TargetSpec,
    policy: SpecPolicy,
) -> Result<SpatialSpec> {
    let first = loaders[0].parse_target_spec(target)?;
    for loader in &loaders[1..] {
        let spec = loader.parse_target_spec(target)?;
        if spec.same_grid(&first) {
            continue;
        }
        match policy {
            SpecPolicy::Strict => {
                return Err(GeodataError::Stack(format!(
                    "{loader} resolves to {spec}, {} to {first}",
                    loaders[0]
                )))
            }
            SpecPolicy::Lenient => warn!(
                loader = %loader,
                spec = %spec,
                first = %first,
                "Stack members disagree on the target grid, taking the first one"
            ),
        }
    }
    Ok(first)
}

/// Variable labels: loader names, or the full loader description where
/// names repeat.
fn labels(members: &[(&dyn RasterLoader, Raster)]) -> Vec<String> {
    let names: Vec<String> = members.iter().map(|(loader, _)| loader.name()).collect();
    names
        .iter()
        .zip(members)
        .map(|(name, (loader, _))| {
            if names.iter().filter(|n| *n == name).count() > 1 {
                loader.to_string()
            } else {
                name.clone()
            }
        })
        .collect()
}

struct Combined {
    data: Array3<f64>,
    dtype: DataType,
    nodata: Option<f64>,
    scales: Vec<f64>,
    offsets: Vec<f64>,
}

/// Members sharing storage conventions are stacked as stored; otherwise
/// every member is unscaled and masked into `Float64` with NaN nodata.
fn combine(members: &[(&dyn RasterLoader, Raster)]) -> Result<Combined> {
    let first = &members[0].1;
    let same_nodata = |r: &Raster| match (r.nodata(), first.nodata()) {
        (Some(a), Some(b)) => a == b || (a.is_nan() && b.is_nan()),
        (a, b) => a.is_none() && b.is_none(),
    };
    let uniform = members.iter().all(|(_, r)| {
        r.dtype() == first.dtype()
            && same_nodata(r)
            && r.scales() == first.scales()
            && r.offsets() == first.offsets()
    });

    let count = members.len();
    if uniform {
        let views: Vec<_> = members.iter().map(|(_, r)| r.data().view()).collect();
        let data = concatenate(Axis(0), &views)?;
        return Ok(Combined {
            data,
            dtype: first.dtype(),
            nodata: first.nodata(),
            scales: vec![first.scales()[0]; count],
            offsets: vec![first.offsets()[0]; count],
        });
    }

    let masked: Vec<Array3<f64>> = members.iter().map(|(_, r)| r.masked()).collect();
    let views: Vec<_> = masked.iter().map(|m| m.view()).collect();
    let data = concatenate(Axis(0), &views)?;
    Ok(Combined {
        data,
        dtype: DataType::Float64,
        nodata: Some(f64::NAN),
        scales: vec![1.0; count],
        offsets: vec![0.0; count],
    })
}

/// Load `loaders` on one grid and stack them along a variable axis.
///
/// Every loader must be [stackable](RasterLoader::stackable) and yield a
/// single band. The result is named after the first loader.
pub fn load_stack(
    loaders: &[&dyn RasterLoader],
    target: &TargetSpec,
    options: &StackOptions,
) -> Result<Raster> {
    let Some(first) = loaders.first() else {
        return Err(GeodataError::Stack("No loaders to stack".to_string()));
    };
    if let Some(loader) = loaders.iter().find(|l| !l.stackable()) {
        return Err(GeodataError::Stack(format!(
            "Attempting to stack non-stackable loader {loader}"
        )));
    }
    if let Some(loader) = loaders.iter().find(|l| l.kind() != first.kind()) {
        warn!(
            loader = %loader,
            first = %first,
            "Not all stacked loaders are of the same kind"
        );
    }

    let spec = consensus_spec(loaders, target, options.spec_policy)?;

    let mut seen = HashSet::new();
    let mut members = Vec::with_capacity(loaders.len());
    for loader in loaders {
        let path = loader.processed_path(&spec)?;
        if options.duplicates == Duplicates::Dedupe && !seen.insert(path.clone()) {
            debug!(loader = %loader, path = %path.display(), "Skipping duplicate stack member");
            continue;
        }
        let raster = loader.load(&spec)?;
        if raster.band_count() != 1 {
            return Err(GeodataError::Stack(format!(
                "{loader} yields {} bands, stacking needs single-band rasters",
                raster.band_count()
            )));
        }
        members.push((*loader, raster));
    }

    let name = first.name();
    let labels = labels(&members);
    let combined = combine(&members)?;
    let stacked = Raster::new(name, combined.data, spec, combined.dtype)?
        .with_nodata(combined.nodata)
        .with_scales_offsets(combined.scales, combined.offsets)?;

    if options.collapse_single && labels.len() == 1 {
        return Ok(stacked);
    }
    stacked.with_variables(labels)
}
