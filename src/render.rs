use std::{collections::HashMap, io::Cursor, sync::Arc};

use crate::{
    catalog::Layer,
    combinator::Composition,
    foundation::{
        cancel::CancelToken,
        error::{ForgeError, ForgeResult},
    },
};

pub mod blend;
pub mod decode;

use decode::PreparedTrait;

/// Largest accepted canvas edge in pixels.
pub const MAX_CANVAS_SIZE: u32 = 8192;

/// Flattens compositions onto a single owned `N × N` surface.
///
/// Rendering borrows the compositor mutably, so at most one composition is ever drawn
/// into the surface at a time. Decoded traits are cached for the compositor's lifetime,
/// including decode failures.
#[derive(Debug)]
pub struct Compositor {
    size: u32,
    /// Premultiplied RGBA8.
    surface: Vec<u8>,
    cache: HashMap<(usize, usize), Result<PreparedTrait, String>>,
}

impl Compositor {
    pub fn new(size: u32) -> ForgeResult<Self> {
        if size == 0 || size > MAX_CANVAS_SIZE {
            return Err(ForgeError::configuration(format!(
                "canvas size must be in 1..={MAX_CANVAS_SIZE}, got {size}"
            )));
        }
        let len = (size as usize) * (size as usize) * 4;
        Ok(Self {
            size,
            surface: vec![0u8; len],
            cache: HashMap::new(),
        })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Current surface contents, premultiplied RGBA8.
    pub fn surface(&self) -> &[u8] {
        &self.surface
    }

    /// Clear the surface, paint each chosen trait in layer order, and encode a PNG.
    ///
    /// Each trait is fully decoded before it is drawn and before the next layer starts.
    pub fn render(
        &mut self,
        layers: &[Layer],
        comp: &Composition,
        cancel: &CancelToken,
    ) -> ForgeResult<Vec<u8>> {
        self.surface.fill(0);

        for ((layer, t), &pick) in comp.traits(layers).zip(comp.picks()) {
            cancel.check()?;
            let size = self.size;
            let prepared = self
                .cache
                .entry((layer.index, pick))
                .or_insert_with(|| {
                    decode::decode_scaled(&t.image, size).map_err(|e| format!("{e:#}"))
                })
                .as_ref()
                .map_err(|reason| ForgeError::decode(layer.index, t.name.clone(), reason))?;
            let src = Arc::clone(&prepared.rgba8_premul);
            blend::over_in_place(&mut self.surface, &src)?;
        }

        self.encode_png()
    }

    fn encode_png(&self) -> ForgeResult<Vec<u8>> {
        let mut straight = self.surface.clone();
        blend::unpremultiply_in_place(&mut straight);
        let img = image::RgbaImage::from_raw(self.size, self.size, straight).ok_or_else(|| {
            ForgeError::Other(anyhow::anyhow!("surface length does not match canvas"))
        })?;

        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .map_err(|e| ForgeError::Other(anyhow::Error::new(e).context("encode png")))?;
        Ok(buf)
    }
}
