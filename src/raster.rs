//! Turns the VIP image area into one bitmap for OCR.

use std::io::Cursor;

use anyhow::Context as _;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use kuchikiki::NodeRef;
use kuchikiki::iter::NodeIterator as _;

use crate::{data_url, site};

pub trait Rasterizer {
    /// Renders `container` and returns the bitmap as a PNG data URL.
    fn rasterize(&self, container: &NodeRef) -> anyhow::Result<String>;
}

/// Stacks the inline images of a container top to bottom on a solid background.
///
/// Only data-URL images are drawn. Anything still pointing at the network, or whose bytes are
/// not an image, is skipped, which leaves a visible gap in the capture instead of failing the
/// chapter.
#[derive(Debug, Clone)]
pub struct CompositeRasterizer {
    background: Rgba<u8>,
}

impl Default for CompositeRasterizer {
    fn default() -> Self {
        Self {
            background: Rgba([255, 255, 255, 255]),
        }
    }
}

impl CompositeRasterizer {
    pub fn with_background(background: Rgba<u8>) -> Self {
        Self { background }
    }
}

impl Rasterizer for CompositeRasterizer {
    fn rasterize(&self, container: &NodeRef) -> anyhow::Result<String> {
        let mut tiles = Vec::new();
        for source in image_sources(container) {
            if !source.starts_with("data:") {
                tracing::warn!(source = %source, "skipping image that was not inlined");
                continue;
            }
            match decode_tile(&source) {
                Ok(tile) => tiles.push(tile),
                Err(err) => {
                    tracing::warn!(error = %format!("{err:#}"), "skipping undecodable image");
                }
            }
        }

        if tiles.is_empty() {
            anyhow::bail!("container has no inline images to render");
        }

        let width = tiles.iter().map(RgbaImage::width).max().unwrap_or(0);
        let height: u32 = tiles.iter().map(RgbaImage::height).sum();
        if width == 0 || height == 0 {
            anyhow::bail!("rendered image is empty");
        }

        let mut canvas = RgbaImage::from_pixel(width, height, self.background);
        let mut top = 0i64;
        for tile in &tiles {
            image::imageops::overlay(&mut canvas, tile, 0, top);
            top += i64::from(tile.height());
        }
        tracing::debug!(tiles = tiles.len(), width, height, "rasterized container");

        let mut png = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(canvas)
            .write_to(&mut png, ImageFormat::Png)
            .context("encode png")?;
        Ok(data_url::encode("image/png", &png.into_inner()))
    }
}

fn decode_tile(source: &str) -> anyhow::Result<RgbaImage> {
    let (_, bytes) = data_url::decode(source).context("decode inline image")?;
    let tile = image::load_from_memory(&bytes).context("decode inline image bytes")?;
    Ok(tile.to_rgba8())
}

/// Image references of the subtree in document order: `<img src>` and inline
/// `background-image` declarations.
fn image_sources(container: &NodeRef) -> Vec<String> {
    let mut sources = Vec::new();
    for element in container.inclusive_descendants().elements() {
        let attributes = element.attributes.borrow();
        let source = if &*element.name.local == "img" {
            attributes.get("src").map(str::to_owned)
        } else {
            attributes
                .get("style")
                .and_then(|style| site::style_declaration(style, "background-image"))
                .and_then(site::extract_css_url)
        };
        if let Some(source) = source {
            sources.push(source);
        }
    }
    sources
}
