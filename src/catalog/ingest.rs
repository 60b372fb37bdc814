use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::{
    catalog::{StoreCatalog, Trait},
    foundation::error::{ForgeError, ForgeResult},
    store::KvStore,
};

/// Image files directly inside `dir`, sorted by file name.
pub fn image_files(dir: &Path) -> ForgeResult<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("read layer dir '{}'", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("read layer dir '{}'", dir.display()))?
            .path();
        if path.is_file() && image::ImageFormat::from_path(&path).is_ok() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Load every image in `dir` as a trait named by its file name.
pub fn load_traits(dir: &Path) -> ForgeResult<Vec<Trait>> {
    let mut traits = Vec::new();
    for path in image_files(dir)? {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                ForgeError::configuration(format!("non-utf8 file name '{}'", path.display()))
            })?
            .to_string();
        let bytes =
            std::fs::read(&path).with_context(|| format!("read trait '{}'", path.display()))?;
        traits.push(Trait::new(name, bytes));
    }
    Ok(traits)
}

/// Ingest each directory as one layer, in argument order starting at layer 0. Existing
/// layers beyond the new count are removed so the catalog matches the arguments.
pub fn ingest_dirs<S: KvStore>(
    catalog: &StoreCatalog<S>,
    dirs: &[PathBuf],
) -> ForgeResult<Vec<usize>> {
    use crate::catalog::TraitCatalog as _;

    let mut counts = Vec::with_capacity(dirs.len());
    for (index, dir) in dirs.iter().enumerate() {
        let traits = load_traits(dir)?;
        if traits.is_empty() {
            tracing::warn!(layer = index, dir = %dir.display(), "layer has no images");
        }
        catalog.put_layer(index, &traits)?;
        counts.push(traits.len());
    }

    for stale in catalog.layer_indices()? {
        if stale >= dirs.len() {
            catalog.remove_layer(stale)?;
        }
    }

    tracing::info!(layers = dirs.len(), traits = counts.iter().sum::<usize>(), "ingested");
    Ok(counts)
}
