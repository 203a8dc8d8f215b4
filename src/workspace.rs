use std::cell::Cell;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::error::MontageResult;

/// Scratch directory for one export: rasterized layer PNGs and the staged
/// output file live here. Backed by a temp dir that is removed when the
/// workspace is dropped, on success and failure alike.
pub struct Workspace {
    dir: tempfile::TempDir,
    next_slot: Cell<u32>,
}

impl Workspace {
    pub fn create() -> MontageResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix("montage-export-")
            .tempdir()
            .context("failed to create export workspace")?;
        Ok(Self {
            dir,
            next_slot: Cell::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Allocate a fresh PNG path for a rasterized layer. The slot counter
    /// keeps paths unique even if two objects share an id.
    pub fn layer_png(&self, id: &str) -> PathBuf {
        let slot = self.next_slot.get();
        self.next_slot.set(slot + 1);
        self.dir
            .path()
            .join(format!("layer_{slot:03}_{}.png", sanitize(id)))
    }

    /// Where the encoder writes before the result is copied into place.
    pub fn staged_output(&self) -> PathBuf {
        self.dir.path().join("output.mp4")
    }
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
