//! Per-object-kind translation from timeline objects into filter-graph
//! chains, threading the {video, audio} frontier across the object fold.

use anyhow::Context as _;

use crate::error::{MontageError, MontageResult};
use crate::graph::{FilterGraph, MediaKind, NodeId};
use crate::model::{Background, ObjectKind, Project, TimelineObject};
use crate::raster::{LayerRasterizer, RasterRequest};
use crate::workspace::Workspace;

/// The rolling top of the graph for the video and audio tracks. Updated by
/// replacement only; each fold step returns a new value.
#[derive(Clone, Copy, Debug, Default)]
pub struct Frontier {
    pub video: Option<NodeId>,
    pub audio: Option<NodeId>,
}

/// Everything a layer compilation step may touch besides the graph.
pub struct LayerCtx<'a> {
    pub project: &'a Project,
    pub workspace: &'a Workspace,
    pub rasterizer: &'a dyn LayerRasterizer,
}

/// Build the background source and scale it to the full canvas. This is the
/// initial video frontier; every visual object composites on top of it.
pub fn compile_background(ctx: &LayerCtx<'_>, graph: &mut FilterGraph) -> MontageResult<NodeId> {
    let source = match &ctx.project.background {
        Background::Color(color) => {
            let request = RasterRequest::solid(ctx.project.width, ctx.project.height, color);
            let image = ctx.rasterizer.rasterize(&request)?;
            let path = ctx.workspace.layer_png("background");
            image
                .save(&path)
                .with_context(|| format!("write background png '{}'", path.display()))?;
            graph.add_source(path, true, MediaKind::Video)
        }
        Background::Image(path) => graph.add_source(path.clone(), true, MediaKind::Video),
    };
    Ok(graph.add_scale(
        source,
        f64::from(ctx.project.width),
        f64::from(ctx.project.height),
    ))
}

/// Extend the graph with one timeline object and return the new frontier.
/// Exhaustive over [`ObjectKind`]; a kind that cannot be compiled does not
/// exist.
pub fn compile_object(
    ctx: &LayerCtx<'_>,
    graph: &mut FilterGraph,
    object: &TimelineObject,
    frontier: Frontier,
) -> MontageResult<Frontier> {
    match &object.kind {
        ObjectKind::Text(_) | ObjectKind::Shape(_) => {
            let source = rastered_source(ctx, graph, object)?;
            Ok(visual_chain(graph, object, source, frontier))
        }
        ObjectKind::Image(image) => {
            let source = graph.add_source(image.path.clone(), true, MediaKind::Video);
            Ok(visual_chain(graph, object, source, frontier))
        }
        ObjectKind::Video(video) => {
            let source = graph.add_source(video.path.clone(), false, MediaKind::Video);
            Ok(visual_chain(graph, object, source, frontier))
        }
        ObjectKind::Audio(audio) => {
            let source = graph.add_source(audio.path.clone(), false, MediaKind::Audio);
            let trimmed = graph.add_audio_trim(source, object.start_s(), object.end_s());
            let leveled = graph.add_volume(trimmed, audio.volume);
            // Audio layers replace the frontier (last-wins); they are not
            // mixed. See DESIGN.md.
            Ok(Frontier {
                video: frontier.video,
                audio: Some(leveled),
            })
        }
    }
}

/// Render the object offscreen, persist the PNG into the workspace, and wrap
/// it as a looped image source. The render is awaited before the node is
/// created; renders happen one object at a time in list order.
fn rastered_source(
    ctx: &LayerCtx<'_>,
    graph: &mut FilterGraph,
    object: &TimelineObject,
) -> MontageResult<NodeId> {
    let request = RasterRequest::for_object(object)?;
    let image = ctx.rasterizer.rasterize(&request)?;
    if image.width() == 0 || image.height() == 0 {
        return Err(MontageError::render(format!(
            "rasterizer returned an empty image for object '{}'",
            object.id
        )));
    }

    let path = ctx.workspace.layer_png(&object.id);
    image
        .save(&path)
        .with_context(|| format!("write layer png '{}'", path.display()))?;
    Ok(graph.add_source(path, true, MediaKind::Video))
}

/// trim → scale → overlay onto the current video frontier, gated to the
/// object's active window. The first visual layer becomes the frontier
/// directly.
fn visual_chain(
    graph: &mut FilterGraph,
    object: &TimelineObject,
    source: NodeId,
    frontier: Frontier,
) -> Frontier {
    let trimmed = graph.add_trim(source, object.start_s(), object.end_s());
    let scaled = graph.add_scale(trimmed, object.width, object.height);
    let video = match frontier.video {
        Some(base) => graph.add_overlay(
            base,
            scaled,
            object.x,
            object.y,
            object.start_s(),
            object.end_s(),
        ),
        None => scaled,
    };
    Frontier {
        video: Some(video),
        audio: frontier.audio,
    }
}
