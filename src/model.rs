use std::path::PathBuf;

use crate::error::{MontageError, MontageResult};

/// A project ready for export: canvas, background, and the ordered object
/// list. List order is compositing order — later objects overlay earlier
/// ones.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Project {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub background: Background,
    pub objects: Vec<TimelineObject>,
}

/// Full-viewport layer behind every object.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum Background {
    /// Solid fill, `#rrggbb` or `#rrggbbaa`.
    Color(String),
    Image(PathBuf),
}

/// One timeline entry. Geometry and timing arrive already resolved — the
/// interactive editor's keyframe engine has been applied before export.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TimelineObject {
    pub id: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub kind: ObjectKind,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum ObjectKind {
    Text(TextLayer),
    Image(ImageLayer),
    Shape(ShapeLayer),
    Video(VideoLayer),
    Audio(AudioLayer),
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TextLayer {
    pub text: String,
    #[serde(default = "default_font_family")]
    pub font_family: String,
    pub font_size: f64,
    pub color: String,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ImageLayer {
    pub path: PathBuf,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ShapeLayer {
    pub shape: ShapeKind,
    pub fill: String,
}

#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub enum ShapeKind {
    Rectangle,
    Ellipse,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct VideoLayer {
    pub path: PathBuf,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct AudioLayer {
    pub path: PathBuf,
    #[serde(default = "default_volume")]
    pub volume: f64,
}

fn default_font_family() -> String {
    "sans-serif".to_string()
}

fn default_volume() -> f64 {
    1.0
}

impl Project {
    pub fn validate(&self) -> MontageResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(MontageError::validation("canvas width/height must be > 0"));
        }
        if !self.width.is_multiple_of(2) || !self.height.is_multiple_of(2) {
            // Output targets yuv420p, which needs even dimensions.
            return Err(MontageError::validation(
                "canvas width/height must be even (required for yuv420p output)",
            ));
        }
        if self.fps == 0 {
            return Err(MontageError::validation("fps must be > 0"));
        }
        if let Background::Color(color) = &self.background {
            validate_color(color, "background")?;
        }

        for object in &self.objects {
            object.validate()?;
        }

        Ok(())
    }

    /// Export duration: the latest object end, in milliseconds. Zero for a
    /// project with no objects (background-only export).
    pub fn duration_ms(&self) -> u64 {
        self.objects.iter().map(|o| o.end_ms).max().unwrap_or(0)
    }
}

impl TimelineObject {
    pub fn validate(&self) -> MontageResult<()> {
        if self.end_ms <= self.start_ms {
            return Err(MontageError::validation(format!(
                "object '{}' has end_ms <= start_ms",
                self.id
            )));
        }
        if !self.width.is_finite() || !self.height.is_finite() {
            return Err(MontageError::validation(format!(
                "object '{}' has non-finite size",
                self.id
            )));
        }
        if self.kind.is_visual() && (self.width <= 0.0 || self.height <= 0.0) {
            return Err(MontageError::validation(format!(
                "object '{}' must have positive width/height",
                self.id
            )));
        }

        match &self.kind {
            ObjectKind::Text(text) => {
                if text.text.is_empty() {
                    return Err(MontageError::validation(format!(
                        "text object '{}' has empty text",
                        self.id
                    )));
                }
                if text.font_size <= 0.0 {
                    return Err(MontageError::validation(format!(
                        "text object '{}' must have positive font_size",
                        self.id
                    )));
                }
                validate_color(&text.color, &self.id)?;
            }
            ObjectKind::Shape(shape) => validate_color(&shape.fill, &self.id)?,
            ObjectKind::Audio(audio) => {
                if audio.volume < 0.0 || !audio.volume.is_finite() {
                    return Err(MontageError::validation(format!(
                        "audio object '{}' must have volume >= 0",
                        self.id
                    )));
                }
            }
            ObjectKind::Image(_) | ObjectKind::Video(_) => {}
        }

        Ok(())
    }

    pub fn start_s(&self) -> f64 {
        self.start_ms as f64 / 1000.0
    }

    pub fn end_s(&self) -> f64 {
        self.end_ms as f64 / 1000.0
    }
}

impl ObjectKind {
    /// Whether the object contributes to the video track.
    pub fn is_visual(&self) -> bool {
        !matches!(self, ObjectKind::Audio(_))
    }
}

fn validate_color(color: &str, owner: &str) -> MontageResult<()> {
    crate::raster::parse_hex_rgba(color)
        .map_err(|_| MontageError::validation(format!("'{owner}' has invalid color '{color}'")))?;
    Ok(())
}
