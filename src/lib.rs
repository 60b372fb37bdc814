//! Layerforge builds collections of unique layered images.
//!
//! One trait is drawn at random from every non-empty catalog layer, the combination is
//! checked against everything the collection has already produced, and accepted
//! combinations are flattened onto a square canvas in layer order:
//!
//! - Read layers through a [`TraitCatalog`]
//! - Run batches with [`Collection::generate`]
//! - Export the [`ArtifactRegistry`] with [`export_to_paths`] or any [`ArtifactSink`]
#![forbid(unsafe_code)]

pub mod catalog;
pub mod collection;
pub mod combinator;
pub mod config;
pub mod export;
mod foundation;
pub mod registry;
pub mod render;
pub mod store;

pub use crate::catalog::{Layer, StoreCatalog, Trait, TraitCatalog};
pub use crate::collection::{Collection, GenerationOutcome, GenerationReport, SpaceSummary};
pub use crate::combinator::{Combinator, Composition, DedupSet, Signature};
pub use crate::config::{ForgeConfig, GenerateRequest};
pub use crate::export::{ArtifactSink, CsvMetadataSink, ZipImageSink, export_all, export_to_paths};
pub use crate::foundation::cancel::CancelToken;
pub use crate::foundation::error::{ForgeError, ForgeResult};
pub use crate::registry::{Artifact, ArtifactRegistry};
pub use crate::render::Compositor;
pub use crate::store::{FsStore, KvStore, MemoryStore};
