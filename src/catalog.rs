use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{
    foundation::error::{ForgeError, ForgeResult},
    store::{self, KvStore},
};

pub mod ingest;

/// One selectable visual element within a layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trait {
    /// Unique within its layer.
    pub name: String,
    /// Encoded raster bytes (any format `image` can decode).
    #[serde(with = "store::base64_bytes")]
    pub image: Vec<u8>,
}

impl Trait {
    pub fn new(name: impl Into<String>, image: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            image,
        }
    }
}

/// Ordered traits of one catalog layer. `index` is the catalog position, which is also
/// the paint order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layer {
    pub index: usize,
    pub traits: Vec<Trait>,
}

impl Layer {
    pub fn new(index: usize, traits: Vec<Trait>) -> Self {
        Self { index, traits }
    }

    pub fn is_empty(&self) -> bool {
        self.traits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.traits.len()
    }
}

/// Read side of the trait catalog. The engine never writes through this.
pub trait TraitCatalog {
    /// Layer indices present in the catalog, ascending.
    fn layer_indices(&self) -> ForgeResult<Vec<usize>>;

    /// Traits of layer `index` in their stored order. Missing layers read as empty.
    fn layer(&self, index: usize) -> ForgeResult<Layer>;

    fn layers(&self) -> ForgeResult<Vec<Layer>> {
        self.layer_indices()?
            .into_iter()
            .map(|i| self.layer(i))
            .collect()
    }
}

impl TraitCatalog for [Layer] {
    fn layer_indices(&self) -> ForgeResult<Vec<usize>> {
        let mut out: Vec<usize> = self.iter().map(|l| l.index).collect();
        out.sort_unstable();
        Ok(out)
    }

    fn layer(&self, index: usize) -> ForgeResult<Layer> {
        Ok(self
            .iter()
            .find(|l| l.index == index)
            .cloned()
            .unwrap_or_else(|| Layer::new(index, Vec::new())))
    }
}

impl TraitCatalog for Vec<Layer> {
    fn layer_indices(&self) -> ForgeResult<Vec<usize>> {
        self.as_slice().layer_indices()
    }

    fn layer(&self, index: usize) -> ForgeResult<Layer> {
        self.as_slice().layer(index)
    }
}

/// Catalog backed by `layer_<index>` records in a [`KvStore`].
#[derive(Debug)]
pub struct StoreCatalog<S> {
    store: S,
}

impl<S: KvStore> StoreCatalog<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Replace the trait list of layer `index`.
    pub fn put_layer(&self, index: usize, traits: &[Trait]) -> ForgeResult<()> {
        let bytes = serde_json::to_vec(traits)?;
        self.store.put(&store::layer_key(index), &bytes)
    }

    pub fn remove_layer(&self, index: usize) -> ForgeResult<()> {
        self.store.remove(&store::layer_key(index))
    }
}

impl<S: KvStore> TraitCatalog for StoreCatalog<S> {
    fn layer_indices(&self) -> ForgeResult<Vec<usize>> {
        let mut out: Vec<usize> = self
            .store
            .keys_with_prefix(store::layer_prefix())?
            .iter()
            .filter_map(|k| store::parse_layer_key(k))
            .collect();
        out.sort_unstable();
        Ok(out)
    }

    fn layer(&self, index: usize) -> ForgeResult<Layer> {
        let traits = match self.store.get(&store::layer_key(index))? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => Vec::new(),
        };
        Ok(Layer::new(index, traits))
    }
}

/// Layers taking part in generation: non-empty catalog layers in catalog order.
///
/// Fails when nothing participates or when a layer repeats a trait name, since either
/// would make the combination space meaningless.
pub fn participating_layers(catalog: &(impl TraitCatalog + ?Sized)) -> ForgeResult<Vec<Layer>> {
    let layers: Vec<Layer> = catalog
        .layers()?
        .into_iter()
        .filter(|l| !l.is_empty())
        .collect();

    if layers.is_empty() {
        return Err(ForgeError::configuration(
            "no participating layers: every layer is empty",
        ));
    }

    for layer in &layers {
        let mut seen = HashSet::with_capacity(layer.len());
        for t in &layer.traits {
            if !seen.insert(t.name.as_str()) {
                return Err(ForgeError::configuration(format!(
                    "layer {} has duplicate trait name '{}'",
                    layer.index, t.name
                )));
            }
        }
    }

    Ok(layers)
}

/// Number of distinct compositions over `layers`, saturating at `u128::MAX`.
pub fn combination_space(layers: &[Layer]) -> u128 {
    layers
        .iter()
        .fold(1u128, |acc, l| acc.saturating_mul(l.len() as u128))
}
