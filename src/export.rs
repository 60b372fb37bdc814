use std::{
    fs::File,
    io::{BufWriter, Seek, Write},
    path::Path,
};

use anyhow::Context;

use crate::{
    foundation::error::{ForgeError, ForgeResult},
    registry::Artifact,
};

/// Header row of the metadata file.
pub const CSV_HEADER: &str = "id,traits";

/// Archive entry name for artifact `id`.
pub fn image_entry_name(id: u64) -> String {
    format!("nft_{id}.png")
}

/// Metadata row for one artifact: `id,"a|b|c"`, embedded quotes doubled.
pub fn csv_row(artifact: &Artifact) -> String {
    let joined = artifact.traits.join("|").replace('"', "\"\"");
    format!("{},\"{joined}\"", artifact.id)
}

/// Consumer of artifacts during export.
///
/// Ordering contract: `push` is called in strictly increasing id order.
pub trait ArtifactSink {
    /// Called once before any artifact is pushed.
    fn begin(&mut self, count: usize) -> ForgeResult<()>;
    fn push(&mut self, artifact: &Artifact) -> ForgeResult<()>;
    /// Called once after the last artifact.
    fn end(&mut self) -> ForgeResult<()>;
}

/// Writes one PNG entry per artifact into a zip archive.
pub struct ZipImageSink<W: Write + Seek> {
    writer: Option<zip::ZipWriter<W>>,
    finished: Option<W>,
}

impl<W: Write + Seek> ZipImageSink<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: Some(zip::ZipWriter::new(inner)),
            finished: None,
        }
    }

    /// The underlying writer, available after `end`.
    pub fn into_inner(self) -> Option<W> {
        self.finished
    }

    fn writer(&mut self) -> ForgeResult<&mut zip::ZipWriter<W>> {
        self.writer
            .as_mut()
            .ok_or_else(|| ForgeError::storage("zip archive already finished"))
    }
}

impl<W: Write + Seek> std::fmt::Debug for ZipImageSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipImageSink")
            .field("open", &self.writer.is_some())
            .finish()
    }
}

impl<W: Write + Seek> ArtifactSink for ZipImageSink<W> {
    fn begin(&mut self, _count: usize) -> ForgeResult<()> {
        self.writer().map(|_| ())
    }

    fn push(&mut self, artifact: &Artifact) -> ForgeResult<()> {
        let opts = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        let name = image_entry_name(artifact.id);
        let zw = self.writer()?;
        zw.start_file(name.as_str(), opts)
            .map_err(|e| ForgeError::storage(format!("start zip entry '{name}': {e}")))?;
        zw.write_all(&artifact.image)
            .map_err(|e| ForgeError::storage(format!("write zip entry '{name}': {e}")))
    }

    fn end(&mut self) -> ForgeResult<()> {
        let zw = self
            .writer
            .take()
            .ok_or_else(|| ForgeError::storage("zip archive already finished"))?;
        let inner = zw
            .finish()
            .map_err(|e| ForgeError::storage(format!("finish zip archive: {e}")))?;
        self.finished = Some(inner);
        Ok(())
    }
}

/// Writes the `id,traits` metadata table, rows separated by `\n`.
#[derive(Debug)]
pub struct CsvMetadataSink<W: Write> {
    out: W,
}

impl<W: Write> CsvMetadataSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ArtifactSink for CsvMetadataSink<W> {
    fn begin(&mut self, _count: usize) -> ForgeResult<()> {
        self.out
            .write_all(CSV_HEADER.as_bytes())
            .map_err(|e| ForgeError::storage(format!("write csv header: {e}")))
    }

    fn push(&mut self, artifact: &Artifact) -> ForgeResult<()> {
        write!(self.out, "\n{}", csv_row(artifact))
            .map_err(|e| ForgeError::storage(format!("write csv row {}: {e}", artifact.id)))
    }

    fn end(&mut self) -> ForgeResult<()> {
        self.out
            .flush()
            .map_err(|e| ForgeError::storage(format!("flush csv: {e}")))
    }
}

/// Feed `artifacts` to every sink in id order.
pub fn export_all(artifacts: &[Artifact], sinks: &mut [&mut dyn ArtifactSink]) -> ForgeResult<()> {
    if let Some(pair) = artifacts.windows(2).find(|w| w[1].id <= w[0].id) {
        return Err(ForgeError::Other(anyhow::anyhow!(
            "artifacts out of id order: {} before {}",
            pair[0].id,
            pair[1].id
        )));
    }

    for sink in sinks.iter_mut() {
        sink.begin(artifacts.len())?;
    }
    for artifact in artifacts {
        for sink in sinks.iter_mut() {
            sink.push(artifact)?;
        }
    }
    for sink in sinks.iter_mut() {
        sink.end()?;
    }
    Ok(())
}

/// Write the archive and metadata files next to each other on disk.
pub fn export_to_paths(artifacts: &[Artifact], zip_path: &Path, csv_path: &Path) -> ForgeResult<()> {
    for parent in [zip_path.parent(), csv_path.parent()].into_iter().flatten() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create output dir '{}'", parent.display()))?;
        }
    }

    let zip_file =
        File::create(zip_path).with_context(|| format!("create '{}'", zip_path.display()))?;
    let csv_file =
        File::create(csv_path).with_context(|| format!("create '{}'", csv_path.display()))?;

    let mut zip_sink = ZipImageSink::new(BufWriter::new(zip_file));
    let mut csv_sink = CsvMetadataSink::new(BufWriter::new(csv_file));
    export_all(artifacts, &mut [&mut zip_sink, &mut csv_sink])?;

    if let Some(mut w) = zip_sink.into_inner() {
        w.flush()
            .with_context(|| format!("flush '{}'", zip_path.display()))?;
    }
    tracing::info!(
        count = artifacts.len(),
        zip = %zip_path.display(),
        csv = %csv_path.display(),
        "exported"
    );
    Ok(())
}
