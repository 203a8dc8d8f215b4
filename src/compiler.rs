//! The top of the export pipeline: fold the ordered object list into a
//! filter graph and assemble the encoder invocation.

use std::path::Path;

use crate::command::{CompiledExport, assemble};
use crate::error::MontageResult;
use crate::graph::FilterGraph;
use crate::layers::{Frontier, LayerCtx, compile_background, compile_object};
use crate::model::Project;
use crate::raster::LayerRasterizer;
use crate::workspace::Workspace;

/// Compile `project` into a single encoder invocation.
///
/// The object fold runs strictly in list order — list order is compositing
/// order, and reordering it changes visual stacking. Raster layers write
/// their PNGs into `workspace` as a side effect.
#[tracing::instrument(skip_all)]
pub fn compile(
    project: &Project,
    workspace: &Workspace,
    rasterizer: &dyn LayerRasterizer,
    encoder_program: &Path,
    out_path: &Path,
) -> MontageResult<CompiledExport> {
    project.validate()?;

    let ctx = LayerCtx {
        project,
        workspace,
        rasterizer,
    };
    let mut graph = FilterGraph::new();

    let background = compile_background(&ctx, &mut graph)?;
    let mut frontier = Frontier {
        video: Some(background),
        audio: None,
    };

    for object in &project.objects {
        frontier = compile_object(&ctx, &mut graph, object, frontier)?;
    }

    assemble(project, &graph, frontier, encoder_program, out_path)
}
