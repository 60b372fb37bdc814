use std::{fs::File, io::BufReader, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    foundation::error::{ForgeError, ForgeResult},
    render::MAX_CANVAS_SIZE,
};

pub const DEFAULT_CANVAS_SIZE: u32 = 512;
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 500;
pub const DEFAULT_DUPLICATE_BUDGET: u32 = 64;

/// Generation settings as read from a JSON file. Missing fields take defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForgeConfig {
    pub canvas_size: u32,
    pub batch_size: usize,
    /// Requests above this are clamped.
    pub max_batch_size: usize,
    /// Fixed RNG seed for reproducible batches; entropy when absent.
    pub seed: Option<u64>,
    /// Consecutive duplicate draws tolerated before drawing from the free set directly.
    pub duplicate_budget: u32,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            canvas_size: DEFAULT_CANVAS_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            seed: None,
            duplicate_budget: DEFAULT_DUPLICATE_BUDGET,
        }
    }
}

impl ForgeConfig {
    pub fn from_json_str(text: &str) -> ForgeResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: &Path) -> ForgeResult<Self> {
        let f = File::open(path).with_context(|| format!("open config '{}'", path.display()))?;
        let cfg = serde_json::from_reader(BufReader::new(f))
            .with_context(|| format!("parse config '{}'", path.display()))?;
        Ok(cfg)
    }

    pub fn request(&self) -> ForgeResult<GenerateRequest> {
        GenerateRequest {
            canvas_size: self.canvas_size,
            batch_size: self.batch_size,
            max_batch_size: self.max_batch_size,
            seed: self.seed,
            duplicate_budget: self.duplicate_budget,
        }
        .validated()
    }
}

/// One generation batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerateRequest {
    pub canvas_size: u32,
    pub batch_size: usize,
    pub max_batch_size: usize,
    pub seed: Option<u64>,
    pub duplicate_budget: u32,
}

impl GenerateRequest {
    pub fn new(canvas_size: u32, batch_size: usize) -> Self {
        let defaults = ForgeConfig::default();
        Self {
            canvas_size,
            batch_size,
            max_batch_size: defaults.max_batch_size,
            seed: None,
            duplicate_budget: defaults.duplicate_budget,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Reject non-positive sizes and clamp the batch to `max_batch_size`.
    pub fn validated(mut self) -> ForgeResult<Self> {
        if self.canvas_size == 0 {
            return Err(ForgeError::configuration("canvas size must be positive"));
        }
        if self.canvas_size > MAX_CANVAS_SIZE {
            return Err(ForgeError::configuration(format!(
                "canvas size {} exceeds {MAX_CANVAS_SIZE}",
                self.canvas_size
            )));
        }
        if self.batch_size == 0 {
            return Err(ForgeError::configuration("batch size must be positive"));
        }
        if self.max_batch_size == 0 {
            return Err(ForgeError::configuration("max batch size must be positive"));
        }
        if self.batch_size > self.max_batch_size {
            tracing::warn!(
                requested = self.batch_size,
                max = self.max_batch_size,
                "batch size clamped"
            );
            self.batch_size = self.max_batch_size;
        }
        Ok(self)
    }
}
