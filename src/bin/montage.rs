use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "montage", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile and encode a project to MP4 (requires `ffmpeg` on PATH).
    Export(ExportArgs),
    /// Compile a project and print the encoder invocation without running it.
    Plan(PlanArgs),
}

#[derive(Parser, Debug)]
struct ExportArgs {
    /// Input project JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output MP4 path.
    #[arg(long)]
    out: PathBuf,

    /// Fail instead of overwriting an existing output file.
    #[arg(long)]
    no_overwrite: bool,

    /// Explicit encoder binary (defaults to `ffmpeg` from PATH).
    #[arg(long)]
    encoder: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct PlanArgs {
    /// Input project JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output path to assemble the command against.
    #[arg(long, default_value = "out.mp4")]
    out: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Export(args) => cmd_export(args),
        Command::Plan(args) => cmd_plan(args),
    }
}

fn read_project_json(path: &Path) -> anyhow::Result<montage::Project> {
    let f = File::open(path).with_context(|| format!("open project '{}'", path.display()))?;
    let r = BufReader::new(f);
    let project: montage::Project =
        serde_json::from_reader(r).with_context(|| "parse project JSON")?;
    Ok(project)
}

fn cmd_export(args: ExportArgs) -> anyhow::Result<()> {
    let project = read_project_json(&args.in_path)?;

    let opts = montage::ExportOpts {
        overwrite: !args.no_overwrite,
        encoder: args.encoder,
    };
    let rasterizer = montage::SvgRasterizer::new();
    let report = montage::export_project(&project, &args.out, &opts, &rasterizer)?;

    eprintln!(
        "wrote {} ({} inputs, {:.3}s, {})",
        report.out_path.display(),
        report.input_count,
        report.duration_s,
        report.encoder_version
    );
    Ok(())
}

fn cmd_plan(args: PlanArgs) -> anyhow::Result<()> {
    let project = read_project_json(&args.in_path)?;

    // Raster layers still render into a workspace so the command references
    // real file paths; the directory disappears when the plan is printed.
    let workspace = montage::Workspace::create()?;
    let rasterizer = montage::SvgRasterizer::new();
    let compiled = montage::compile(
        &project,
        &workspace,
        &rasterizer,
        Path::new("ffmpeg"),
        &args.out,
    )?;

    println!("{}", compiled.command.shell_line());
    Ok(())
}
