#![allow(dead_code)]

use std::io::Cursor;

use layerforge::{Layer, Trait};

pub fn png(size: u32, px: [u8; 4]) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(size, size, image::Rgba(px));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

/// Layers of solid-color traits; `sizes[i]` traits in layer `i`, named `L{i}T{j}`.
pub fn solid_layers(sizes: &[usize]) -> Vec<Layer> {
    sizes
        .iter()
        .enumerate()
        .map(|(i, &n)| {
            let traits = (0..n)
                .map(|j| {
                    let shade = (j * 37 % 256) as u8;
                    Trait::new(format!("L{i}T{j}"), png(2, [shade, i as u8 * 40, 90, 255]))
                })
                .collect();
            Layer::new(i, traits)
        })
        .collect()
}

pub fn named_layer(index: usize, names: &[&str]) -> Layer {
    Layer::new(
        index,
        names
            .iter()
            .enumerate()
            .map(|(j, n)| Trait::new(*n, png(2, [j as u8 * 60, 0, 0, 255])))
            .collect(),
    )
}
