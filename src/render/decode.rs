use std::sync::Arc;

use anyhow::Context;

use crate::render::blend::premultiply_in_place;

/// Trait image decoded and scaled to fill the canvas, premultiplied RGBA8.
#[derive(Clone, Debug)]
pub struct PreparedTrait {
    pub size: u32,
    /// Row-major, tightly packed, `size * size * 4` bytes.
    pub rgba8_premul: Arc<Vec<u8>>,
}

/// Decode `bytes` and stretch the result to exactly `size × size`.
///
/// Scaling happens on premultiplied pixels so transparent edges do not bleed color.
pub fn decode_scaled(bytes: &[u8], size: u32) -> anyhow::Result<PreparedTrait> {
    let dyn_img = image::load_from_memory(bytes).context("decode image from memory")?;
    let rgba = dyn_img.to_rgba8();
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        anyhow::bail!("image has zero size ({width}x{height})");
    }

    let mut raw = rgba.into_raw();
    premultiply_in_place(&mut raw);

    let rgba8_premul = if width == size && height == size {
        raw
    } else {
        let premul = image::RgbaImage::from_raw(width, height, raw)
            .context("rebuild premultiplied image buffer")?;
        image::imageops::resize(&premul, size, size, image::imageops::FilterType::Triangle)
            .into_raw()
    };

    Ok(PreparedTrait {
        size,
        rgba8_premul: Arc::new(rgba8_premul),
    })
}
