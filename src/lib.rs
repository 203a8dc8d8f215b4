//! Montage compiles a timed stack of timeline objects — text, images,
//! shapes, video and audio clips — into a single FFmpeg `-filter_complex`
//! invocation and drives the encoder to an MP4.
//!
//! The pipeline is: [`Project`] → per-object layer compilation into a
//! [`FilterGraph`] → source collection and serialization → one
//! [`EncoderCommand`] → blocking encode.
#![forbid(unsafe_code)]

pub mod command;
pub mod compiler;
pub mod encode;
pub mod error;
pub mod graph;
pub mod layers;
pub mod model;
pub mod raster;
pub mod workspace;

pub use command::{CompiledExport, EncoderCommand, EncoderInput};
pub use compiler::compile;
pub use encode::{EncoderBinary, ExportOpts, ExportReport, export_project};
pub use error::{MontageError, MontageResult};
pub use graph::{FilterGraph, MediaKind, NodeId};
pub use layers::Frontier;
pub use model::{
    AudioLayer, Background, ImageLayer, ObjectKind, Project, ShapeKind, ShapeLayer, TextLayer,
    TimelineObject, VideoLayer,
};
pub use raster::{LayerRasterizer, RasterRequest, SvgRasterizer};
pub use workspace::Workspace;
