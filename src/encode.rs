//! Encoder discovery and the blocking export entry point.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::Context as _;

use crate::command::CompiledExport;
use crate::compiler::compile;
use crate::error::{MontageError, MontageResult};
use crate::model::Project;
use crate::raster::LayerRasterizer;
use crate::workspace::Workspace;

/// A usable encoder binary: resolved path plus its `-version` banner line.
#[derive(Clone, Debug)]
pub struct EncoderBinary {
    pub path: PathBuf,
    pub version: String,
}

impl EncoderBinary {
    /// Probe `ffmpeg` from `PATH`.
    pub fn locate() -> MontageResult<Self> {
        Self::probe(Path::new("ffmpeg"))
    }

    /// Probe a specific binary by running `-version`.
    pub fn probe(path: &Path) -> MontageResult<Self> {
        let output = Command::new(path)
            .arg("-version")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .map_err(|e| {
                MontageError::encode(format!(
                    "failed to run encoder '{}' (is ffmpeg installed and on PATH?): {e}",
                    path.display()
                ))
            })?;
        if !output.status.success() {
            return Err(MontageError::encode(format!(
                "encoder '{}' exited with status {} during probe",
                path.display(),
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let version = stdout.lines().next().unwrap_or_default().trim().to_string();
        Ok(Self {
            path: path.to_path_buf(),
            version,
        })
    }
}

#[derive(Clone, Debug)]
pub struct ExportOpts {
    pub overwrite: bool,
    /// Explicit encoder binary; `None` probes `ffmpeg` from `PATH`.
    pub encoder: Option<PathBuf>,
}

impl Default for ExportOpts {
    fn default() -> Self {
        Self {
            overwrite: true,
            encoder: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ExportReport {
    pub out_path: PathBuf,
    pub duration_s: f64,
    pub input_count: usize,
    pub encoder_version: String,
}

/// Compile and encode `project` to `out_path`.
///
/// The encoder writes into the scratch workspace; the result is copied into
/// place only after a clean exit, so no output file appears on failure. The
/// workspace itself is removed on every exit path.
#[tracing::instrument(skip_all)]
pub fn export_project(
    project: &Project,
    out_path: &Path,
    opts: &ExportOpts,
    rasterizer: &dyn LayerRasterizer,
) -> MontageResult<ExportReport> {
    if !opts.overwrite && out_path.exists() {
        return Err(MontageError::validation(format!(
            "output file '{}' already exists",
            out_path.display()
        )));
    }

    let encoder = match &opts.encoder {
        Some(path) => EncoderBinary::probe(path)?,
        None => EncoderBinary::locate()?,
    };

    let workspace = Workspace::create()?;
    let staged = workspace.staged_output();
    let compiled = compile(project, &workspace, rasterizer, &encoder.path, &staged)?;

    run_encoder(&compiled)?;

    ensure_parent_dir(out_path)?;
    std::fs::copy(&staged, out_path)
        .with_context(|| format!("copy encoded output to '{}'", out_path.display()))?;

    Ok(ExportReport {
        out_path: out_path.to_path_buf(),
        duration_s: compiled.duration_s,
        input_count: compiled.inputs.len(),
        encoder_version: encoder.version,
    })
}

/// Run the assembled invocation to completion. Cancellation is not
/// supported; the child either exits cleanly or its stderr becomes the
/// error.
fn run_encoder(compiled: &CompiledExport) -> MontageResult<()> {
    let mut cmd = compiled.command.to_process_command();
    cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::piped());

    let child = cmd.spawn().map_err(|e| {
        MontageError::encode(format!(
            "failed to spawn encoder '{}': {e}",
            compiled.command.program.display()
        ))
    })?;
    let output = child
        .wait_with_output()
        .map_err(|e| MontageError::encode(format!("failed to wait for encoder: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MontageError::encode(format!(
            "encoder exited with status {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> MontageResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Background;
    use crate::raster::RasterRequest;

    struct NoopRasterizer;

    impl LayerRasterizer for NoopRasterizer {
        fn rasterize(&self, request: &RasterRequest) -> MontageResult<image::RgbaImage> {
            Ok(image::RgbaImage::new(request.width, request.height))
        }
    }

    #[test]
    fn probe_of_missing_binary_is_an_encode_error() {
        let err = EncoderBinary::probe(Path::new("/definitely/not/ffmpeg")).unwrap_err();
        assert!(matches!(err, MontageError::Encode(_)));
    }

    #[test]
    fn failed_export_produces_no_output_file() {
        let project = Project {
            name: "t".to_string(),
            width: 64,
            height: 64,
            fps: 30,
            background: Background::Color("#000000".to_string()),
            objects: vec![],
        };
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp4");

        let opts = ExportOpts {
            overwrite: true,
            encoder: Some(PathBuf::from("/definitely/not/ffmpeg")),
        };
        let err = export_project(&project, &out, &opts, &NoopRasterizer).unwrap_err();
        assert!(matches!(err, MontageError::Encode(_)));
        assert!(!out.exists());
    }

    #[test]
    fn overwrite_false_refuses_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp4");
        std::fs::write(&out, b"existing").unwrap();

        let project = Project {
            name: "t".to_string(),
            width: 64,
            height: 64,
            fps: 30,
            background: Background::Color("#000000".to_string()),
            objects: vec![],
        };
        let opts = ExportOpts {
            overwrite: false,
            encoder: Some(PathBuf::from("/definitely/not/ffmpeg")),
        };
        let err = export_project(&project, &out, &opts, &NoopRasterizer).unwrap_err();
        assert!(matches!(err, MontageError::Validation(_)));
    }

    #[test]
    fn ensure_parent_dir_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b").join("out.mp4");
        ensure_parent_dir(&nested).unwrap();
        assert!(nested.parent().unwrap().is_dir());
    }
}
