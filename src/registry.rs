//! Named loaders.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::{GeodataError, Result};
use crate::load;
use crate::loader::RasterLoader;
use crate::raster::Raster;
use crate::spec::TargetSpec;
use crate::stack::{self, StackOptions};

/// Loaders looked up by name.
///
/// A name is registered once, and so is a loader instance.
#[derive(Default, Clone)]
pub struct LoaderRegistry {
    loaders: BTreeMap<String, Arc<dyn RasterLoader>>,
}

fn same_instance(a: &Arc<dyn RasterLoader>, b: &Arc<dyn RasterLoader>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, loader: Arc<dyn RasterLoader>) -> Result<()> {
        let name = name.into();
        if self.loaders.contains_key(&name) {
            return Err(GeodataError::Configuration(format!(
                "Name already registered: '{name}'"
            )));
        }
        if let Some((other, _)) = self
            .loaders
            .iter()
            .find(|(_, existing)| same_instance(existing, &loader))
        {
            return Err(GeodataError::Configuration(format!(
                "Loader {loader} already registered as '{other}'"
            )));
        }
        self.loaders.insert(name, loader);
        Ok(())
    }

    /// Register under the loader's own name.
    pub fn register_loader(&mut self, loader: impl RasterLoader + 'static) -> Result<()> {
        let name = loader.name();
        self.register(name, Arc::new(loader))
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn RasterLoader>> {
        self.loaders
            .get(name)
            .cloned()
            .ok_or_else(|| GeodataError::Configuration(format!("No such loader: '{name}'")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.loaders.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.loaders.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }

    pub fn load(&self, name: &str, target: &TargetSpec) -> Result<Raster> {
        load::load(self.get(name)?.as_ref(), target)
    }

    pub fn load_stack(
        &self,
        names: &[&str],
        target: &TargetSpec,
        options: &StackOptions,
    ) -> Result<Raster> {
        let loaders = names
            .iter()
            .map(|name| self.get(name))
            .collect::<Result<Vec<_>>>()?;
        let refs: Vec<&dyn RasterLoader> = loaders.iter().map(|l| l.as_ref()).collect();
        stack::load_stack(&refs, target, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::Engine;
    use crate::loader::DataLoader;
    use crate::spec::{Crs, GeoTransform, GeoTransformEx, Shape, SpatialSpec};
    use crate::test_utils::{CountingOperation, TempFixture};

    #[test]
    fn rejects_duplicates() {
        let mut registry = LoaderRegistry::new();
        let loader: Arc<dyn RasterLoader> = Arc::new(DataLoader::new("TempLoader"));
        registry.register("temp", loader.clone()).unwrap();
        assert!(matches!(
            registry.register("temp", Arc::new(DataLoader::new("OtherLoader"))),
            Err(GeodataError::Configuration(_))
        ));
        assert!(matches!(
            registry.register("temp2", loader),
            Err(GeodataError::Configuration(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup_and_load() {
        let fixture = TempFixture::empty("cache");
        let config = Config::default().with_path_data_processed(fixture.path());
        let mut registry = LoaderRegistry::new();
        for (type_name, value) in [("RainLoader", 1.0), ("TempLoader", 2.0)] {
            registry
                .register_loader(
                    DataLoader::new(type_name)
                        .with_operation(CountingOperation::new(value))
                        .with_engine(Engine::native())
                        .with_config(config.clone()),
                )
                .unwrap();
        }
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["rain", "temp"]);
        assert!(registry.contains("rain"));
        assert!(registry.get("snow").is_err());

        let spec: TargetSpec = SpatialSpec::new(
            Crs::from_epsg(3035),
            GeoTransform::from_origin(0.0, 1.0, 1.0, 1.0),
            Shape::new(1, 1).unwrap(),
        )
        .unwrap()
        .into();
        let temp = registry.load("temp", &spec).unwrap();
        assert_eq!(temp.data()[[0, 0, 0]], 2.0);

        let stacked = registry
            .load_stack(&["temp", "rain"], &spec, &StackOptions::default())
            .unwrap();
        assert_eq!(stacked.variables().unwrap(), &["temp", "rain"]);
    }
}
