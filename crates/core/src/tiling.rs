//! Image tiling - cuts a flowchart image into overlapping sections
//!
//! Sections follow a `rows x cols` grid. Every cell is grown by `overlap`
//! pixels; cells whose grown box touches drawn content are grown by
//! `overlap` once more, so strokes near a grid line end up whole in at
//! least one section.
//!
//! Content detection: grayscale, inverted local-mean adaptive threshold,
//! bounding boxes of 8-connected foreground blobs, then a square dilation
//! of size `overlap` over those boxes.

use crate::{CoreError, Result};
use base64::Engine;
use image::{DynamicImage, GrayImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::debug;

/// Side of the square window used for the local mean
const THRESHOLD_BLOCK_SIZE: u32 = 11;

/// Offset subtracted from the local mean
const THRESHOLD_OFFSET: f64 = 2.0;

/// Grid and margin settings for one tiling run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TilingParams {
    pub rows: u32,
    pub cols: u32,
    /// Margin in pixels, also the dilation kernel size
    pub overlap: u32,
}

impl Default for TilingParams {
    fn default() -> Self {
        Self {
            rows: 2,
            cols: 2,
            overlap: 50,
        }
    }
}

/// Half-open pixel rectangle `[x1, x2) x [y1, y2)` in original image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn contains(&self, other: &BoundingBox) -> bool {
        self.x1 <= other.x1 && self.y1 <= other.y1 && other.x2 <= self.x2 && other.y2 <= self.y2
    }

    pub fn contains_point(&self, x: u32, y: u32) -> bool {
        self.x1 <= x && x < self.x2 && self.y1 <= y && y < self.y2
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.x1 < other.x2 && other.x1 < self.x2 && self.y1 < other.y2 && other.y1 < self.y2
    }

    /// Grow by `before` on the left/top and `after` on the right/bottom,
    /// clamped to a `width x height` image.
    pub fn expand(&self, before: u32, after: u32, width: u32, height: u32) -> Self {
        Self {
            x1: self.x1.saturating_sub(before),
            y1: self.y1.saturating_sub(before),
            x2: self.x2.saturating_add(after).min(width),
            y2: self.y2.saturating_add(after).min(height),
        }
    }

    /// Grow by `margin` on every side, clamped to the image
    pub fn grow(&self, margin: u32, width: u32, height: u32) -> Self {
        self.expand(margin, margin, width, height)
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {}, {})", self.x1, self.y1, self.x2, self.y2)
    }
}

/// An image crop plus where it came from. Never persisted.
#[derive(Debug, Clone)]
pub struct Section {
    pub image: DynamicImage,
    pub bounds: BoundingBox,
}

impl Section {
    /// JPEG-encode the crop and return it as base64
    pub fn to_jpeg_base64(&self) -> Result<String> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(self.image.to_rgb8())
            .write_to(&mut buf, ImageFormat::Jpeg)
            .map_err(|e| CoreError::ImageEncode(e.to_string()))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(buf.into_inner()))
    }
}

/// Decode a base64 image, with or without a `data:<mime>;base64,` prefix
pub fn decode_base64_image(payload: &str) -> Result<DynamicImage> {
    let trimmed = payload.trim();
    let encoded = match trimmed.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| CoreError::ImageDecode("malformed data URL".into()))?,
        None => trimmed,
    };

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| CoreError::ImageDecode(format!("invalid base64: {e}")))?;

    image::load_from_memory(&bytes).map_err(|e| CoreError::ImageDecode(e.to_string()))
}

/// Decode and tile a base64 image
pub fn tile_base64(payload: &str, params: TilingParams) -> Result<Vec<Section>> {
    debug!("Decoding and analyzing the image");
    let image = decode_base64_image(payload)?;
    tile_image(&image, params)
}

/// Split an image into overlapping, content-aware sections (row-major order)
pub fn tile_image(image: &DynamicImage, params: TilingParams) -> Result<Vec<Section>> {
    let gray = image.to_luma8();
    let regions = content_regions(&gray);
    let boxes = section_boxes(image.width(), image.height(), params, &regions)?;

    debug!(
        sections = boxes.len(),
        regions = regions.len(),
        "Image divided using adaptive thresholding"
    );

    Ok(boxes
        .into_iter()
        .map(|bounds| Section {
            image: image.crop_imm(bounds.x1, bounds.y1, bounds.width(), bounds.height()),
            bounds,
        })
        .collect())
}

/// Compute section boxes for a `width x height` image given its content
/// regions (undilated blob bounding boxes).
pub fn section_boxes(
    width: u32,
    height: u32,
    params: TilingParams,
    regions: &[BoundingBox],
) -> Result<Vec<BoundingBox>> {
    let TilingParams { rows, cols, overlap } = params;

    if width == 0 || height == 0 {
        return Err(CoreError::InvalidTiling("image has no pixels".into()));
    }
    if rows == 0 || cols == 0 {
        return Err(CoreError::InvalidTiling(format!(
            "grid must have at least one row and column, got {rows}x{cols}"
        )));
    }
    if rows > height || cols > width {
        return Err(CoreError::InvalidTiling(format!(
            "{rows}x{cols} grid does not fit a {width}x{height} image"
        )));
    }

    // The content mask covers each blob box plus one pixel right and below.
    let filled: Vec<BoundingBox> = regions
        .iter()
        .map(|region| region.expand(0, 1, width, height))
        .collect();
    let dilated = dilate(&filled, overlap, width, height);

    let step_h = height / rows;
    let step_w = width / cols;
    let mut boxes = Vec::with_capacity((rows * cols) as usize);

    for r in 0..rows {
        for c in 0..cols {
            // The last row/column absorbs the division remainder.
            let y2 = if r + 1 == rows { height } else { (r + 1) * step_h };
            let x2 = if c + 1 == cols { width } else { (c + 1) * step_w };
            let cell = BoundingBox::new(c * step_w, r * step_h, x2, y2);

            let mut bounds = cell.grow(overlap, width, height);
            if dilated.iter().any(|region| region.intersects(&bounds)) {
                bounds = bounds.grow(overlap, width, height);
            }
            boxes.push(bounds);
        }
    }

    Ok(boxes)
}

/// Dilate rectangles by a centred square kernel of side `kernel`
fn dilate(regions: &[BoundingBox], kernel: u32, width: u32, height: u32) -> Vec<BoundingBox> {
    if kernel == 0 {
        return regions.to_vec();
    }
    let anchor = kernel / 2;
    regions
        .iter()
        .map(|region| region.expand(kernel - 1 - anchor, anchor, width, height))
        .collect()
}

/// Bounding boxes of foreground blobs (drawn strokes) in a grayscale image
pub fn content_regions(gray: &GrayImage) -> Vec<BoundingBox> {
    let width = gray.width() as usize;
    let height = gray.height() as usize;
    let foreground = adaptive_threshold_inv(gray);

    let mut visited = vec![false; width * height];
    let mut regions = Vec::new();
    let mut stack = Vec::new();

    for start in 0..width * height {
        if !foreground[start] || visited[start] {
            continue;
        }

        visited[start] = true;
        stack.push(start);
        let (mut min_x, mut min_y) = (start % width, start / width);
        let (mut max_x, mut max_y) = (min_x, min_y);

        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % width, idx / width);
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);

            for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                    let n = ny * width + nx;
                    if foreground[n] && !visited[n] {
                        visited[n] = true;
                        stack.push(n);
                    }
                }
            }
        }

        regions.push(BoundingBox::new(
            min_x as u32,
            min_y as u32,
            max_x as u32 + 1,
            max_y as u32 + 1,
        ));
    }

    regions
}

/// Inverted adaptive threshold: a pixel is foreground when it is darker
/// than its local mean minus the offset. The window is clamped at borders.
fn adaptive_threshold_inv(gray: &GrayImage) -> Vec<bool> {
    let width = gray.width() as usize;
    let height = gray.height() as usize;
    let radius = (THRESHOLD_BLOCK_SIZE / 2) as usize;

    // Summed-area table with a zero row/column in front
    let stride = width + 1;
    let mut integral = vec![0u64; stride * (height + 1)];
    for y in 0..height {
        let mut row_sum = 0u64;
        for x in 0..width {
            row_sum += u64::from(gray.get_pixel(x as u32, y as u32)[0]);
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row_sum;
        }
    }

    let mut mask = vec![false; width * height];
    for y in 0..height {
        let y0 = y.saturating_sub(radius);
        let y1 = (y + radius).min(height - 1) + 1;
        for x in 0..width {
            let x0 = x.saturating_sub(radius);
            let x1 = (x + radius).min(width - 1) + 1;

            let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
                - integral[y0 * stride + x1]
                - integral[y1 * stride + x0];
            let count = ((x1 - x0) * (y1 - y0)) as f64;
            let mean = sum as f64 / count;

            let value = f64::from(gray.get_pixel(x as u32, y as u32)[0]);
            mask[y * width + x] = value <= mean - THRESHOLD_OFFSET;
        }
    }

    mask
}
