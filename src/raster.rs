//! Offscreen rasterization of text/shape/solid layers to RGBA images.
//!
//! Media layers (video, image files, audio) go straight into the encoder;
//! everything the editor draws itself is rendered here to a PNG-sized
//! buffer first and then fed to the encoder as a looped image input.

use std::sync::Arc;

use crate::error::{MontageError, MontageResult};
use crate::model::{ObjectKind, ShapeKind, TimelineObject};

/// Upper bound on raster dimensions. Callers needing larger layers should
/// change their render strategy explicitly.
const MAX_DIM: u32 = 16_384;

/// What to draw, at an already-resolved pixel size.
#[derive(Clone, Debug)]
pub struct RasterRequest {
    pub width: u32,
    pub height: u32,
    pub content: RasterContent,
}

#[derive(Clone, Debug)]
pub enum RasterContent {
    Solid {
        color: String,
    },
    Text {
        text: String,
        font_family: String,
        font_size: f64,
        color: String,
    },
    Shape {
        shape: ShapeKind,
        fill: String,
    },
}

impl RasterRequest {
    pub fn solid(width: u32, height: u32, color: impl Into<String>) -> Self {
        Self {
            width,
            height,
            content: RasterContent::Solid {
                color: color.into(),
            },
        }
    }

    /// Build the request for a raster-rendered timeline object. Media kinds
    /// have a backing file and never come through here.
    pub fn for_object(object: &TimelineObject) -> MontageResult<Self> {
        let width = object.width.round().max(1.0) as u32;
        let height = object.height.round().max(1.0) as u32;
        let content = match &object.kind {
            ObjectKind::Text(text) => RasterContent::Text {
                text: text.text.clone(),
                font_family: text.font_family.clone(),
                font_size: text.font_size,
                color: text.color.clone(),
            },
            ObjectKind::Shape(shape) => RasterContent::Shape {
                shape: shape.shape,
                fill: shape.fill.clone(),
            },
            ObjectKind::Image(_) | ObjectKind::Video(_) | ObjectKind::Audio(_) => {
                return Err(MontageError::render(format!(
                    "object '{}' is not raster-rendered",
                    object.id
                )));
            }
        };
        Ok(Self {
            width,
            height,
            content,
        })
    }
}

/// Boundary to the offscreen renderer. The shipped implementation draws
/// through SVG; tests may substitute their own.
pub trait LayerRasterizer {
    fn rasterize(&self, request: &RasterRequest) -> MontageResult<image::RgbaImage>;
}

/// Renders text and shapes by building a small SVG document and rasterizing
/// it with `resvg`; solid fills bypass SVG entirely.
pub struct SvgRasterizer {
    fontdb: Arc<usvg::fontdb::Database>,
}

impl SvgRasterizer {
    pub fn new() -> Self {
        let mut db = usvg::fontdb::Database::new();
        db.load_system_fonts();
        Self {
            fontdb: Arc::new(db),
        }
    }
}

impl Default for SvgRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerRasterizer for SvgRasterizer {
    fn rasterize(&self, request: &RasterRequest) -> MontageResult<image::RgbaImage> {
        check_raster_size(request.width, request.height)?;

        match &request.content {
            RasterContent::Solid { color } => {
                let rgba = parse_hex_rgba(color)?;
                Ok(image::RgbaImage::from_pixel(
                    request.width,
                    request.height,
                    image::Rgba(rgba),
                ))
            }
            RasterContent::Text { .. } | RasterContent::Shape { .. } => {
                let svg = build_svg_markup(request)?;
                self.rasterize_svg(&svg, request.width, request.height)
            }
        }
    }
}

impl SvgRasterizer {
    fn rasterize_svg(&self, svg: &str, width: u32, height: u32) -> MontageResult<image::RgbaImage> {
        let opts = usvg::Options {
            fontdb: self.fontdb.clone(),
            ..Default::default()
        };
        let tree = usvg::Tree::from_str(svg, &opts)
            .map_err(|e| MontageError::render(format!("failed to parse layer svg: {e}")))?;

        let mut pixmap = resvg::tiny_skia::Pixmap::new(width, height)
            .ok_or_else(|| MontageError::render("failed to allocate layer pixmap"))?;
        resvg::render(
            &tree,
            resvg::tiny_skia::Transform::identity(),
            &mut pixmap.as_mut(),
        );

        // tiny-skia pixels are premultiplied; PNG wants straight alpha.
        let mut out = image::RgbaImage::new(width, height);
        for (pixel, dst) in pixmap.pixels().iter().zip(out.pixels_mut()) {
            let c = pixel.demultiply();
            *dst = image::Rgba([c.red(), c.green(), c.blue(), c.alpha()]);
        }
        Ok(out)
    }
}

fn check_raster_size(width: u32, height: u32) -> MontageResult<()> {
    if width == 0 || height == 0 {
        return Err(MontageError::render("raster size must be non-zero"));
    }
    if width > MAX_DIM || height > MAX_DIM {
        return Err(MontageError::render(format!(
            "raster size too large: {width}x{height} (max {MAX_DIM}x{MAX_DIM})"
        )));
    }
    Ok(())
}

fn build_svg_markup(request: &RasterRequest) -> MontageResult<String> {
    let (w, h) = (request.width, request.height);
    let body = match &request.content {
        RasterContent::Text {
            text,
            font_family,
            font_size,
            color,
        } => {
            let (fill, opacity) = svg_fill(color)?;
            format!(
                "<text x=\"50%\" y=\"50%\" font-family=\"{}\" font-size=\"{}\" \
                 fill=\"{fill}\" fill-opacity=\"{opacity}\" text-anchor=\"middle\" \
                 dominant-baseline=\"central\">{}</text>",
                escape_xml(font_family),
                font_size,
                escape_xml(text),
            )
        }
        RasterContent::Shape { shape, fill } => {
            let (fill, opacity) = svg_fill(fill)?;
            match shape {
                ShapeKind::Rectangle => format!(
                    "<rect x=\"0\" y=\"0\" width=\"{w}\" height=\"{h}\" \
                     fill=\"{fill}\" fill-opacity=\"{opacity}\"/>"
                ),
                ShapeKind::Ellipse => format!(
                    "<ellipse cx=\"{}\" cy=\"{}\" rx=\"{}\" ry=\"{}\" \
                     fill=\"{fill}\" fill-opacity=\"{opacity}\"/>",
                    w as f64 / 2.0,
                    h as f64 / 2.0,
                    w as f64 / 2.0,
                    h as f64 / 2.0,
                ),
            }
        }
        RasterContent::Solid { .. } => {
            return Err(MontageError::render("solid fills do not go through svg"));
        }
    };

    Ok(format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w}\" height=\"{h}\" \
         viewBox=\"0 0 {w} {h}\">{body}</svg>"
    ))
}

fn svg_fill(color: &str) -> MontageResult<(String, f64)> {
    let [r, g, b, a] = parse_hex_rgba(color)?;
    Ok((
        format!("#{r:02x}{g:02x}{b:02x}"),
        f64::from(a) / 255.0,
    ))
}

/// Parse `#rrggbb` or `#rrggbbaa` into straight-alpha RGBA bytes.
pub fn parse_hex_rgba(color: &str) -> MontageResult<[u8; 4]> {
    let hex = color
        .strip_prefix('#')
        .ok_or_else(|| MontageError::validation(format!("color '{color}' must start with '#'")))?;
    if hex.len() != 6 && hex.len() != 8 {
        return Err(MontageError::validation(format!(
            "color '{color}' must be #rrggbb or #rrggbbaa"
        )));
    }

    let byte = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&hex[range], 16)
            .map_err(|_| MontageError::validation(format!("color '{color}' has invalid hex digits")))
    };

    let r = byte(0..2)?;
    let g = byte(2..4)?;
    let b = byte(4..6)?;
    let a = if hex.len() == 8 { byte(6..8)? } else { 255 };
    Ok([r, g, b, a])
}

fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
