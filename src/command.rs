//! Assembly of the final encoder invocation from a compiled filter graph.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{MontageError, MontageResult};
use crate::graph::{FilterGraph, NodeId, format_seconds};
use crate::layers::Frontier;
use crate::model::Project;

/// One `-i` argument: a distinct source file, with its loop flag.
#[derive(Clone, Debug)]
pub struct EncoderInput {
    pub path: PathBuf,
    pub loop_input: bool,
}

/// A fully assembled encoder invocation.
#[derive(Clone, Debug)]
pub struct EncoderCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl EncoderCommand {
    pub fn to_process_command(&self) -> std::process::Command {
        let mut cmd = std::process::Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    /// Single-line rendering for logs and the `plan` subcommand. Arguments
    /// with shell-special characters are single-quoted.
    pub fn shell_line(&self) -> String {
        let mut parts = vec![shell_quote(&self.program.to_string_lossy())];
        parts.extend(self.args.iter().map(|a| shell_quote(a)));
        parts.join(" ")
    }
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=+,".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

/// The result of compiling a project: the command plus the pieces callers
/// want to inspect without re-parsing argv.
#[derive(Clone, Debug)]
pub struct CompiledExport {
    pub command: EncoderCommand,
    pub filter_expr: String,
    pub inputs: Vec<EncoderInput>,
    pub duration_s: f64,
}

/// Platform-conditional H.264 encoder: hardware on macOS, software x264
/// elsewhere.
pub fn video_codec() -> &'static str {
    if cfg!(target_os = "macos") {
        "h264_videotoolbox"
    } else {
        "libx264"
    }
}

/// Linearize the graph reachable from `frontier` and lay out the full
/// argument vector:
///
/// `-y -loglevel error -framerate F (-loop 1)? -i src.. -filter_complex E
///  -t D -map [v] (-map [a])? <codec flags> out`
pub fn assemble(
    project: &Project,
    graph: &FilterGraph,
    frontier: Frontier,
    encoder_program: &Path,
    out_path: &Path,
) -> MontageResult<CompiledExport> {
    let roots: Vec<NodeId> = [frontier.video, frontier.audio]
        .into_iter()
        .flatten()
        .collect();

    let sources = graph.collect_sources(&roots);
    let mut input_refs: HashMap<NodeId, String> = HashMap::with_capacity(sources.len());
    let mut inputs: Vec<EncoderInput> = Vec::with_capacity(sources.len());
    for (index, &id) in sources.iter().enumerate() {
        let spec = graph.source_spec(id).ok_or_else(|| {
            MontageError::compile(format!(
                "input enumeration returned non-source node '{}'",
                graph.label(id)
            ))
        })?;
        input_refs.insert(id, format!("{index}:{}", spec.media.stream_selector()));
        inputs.push(EncoderInput {
            path: spec.path.clone(),
            loop_input: spec.loop_input,
        });
    }

    let filter_expr = graph.serialize(&roots, &input_refs)?;
    let duration_s = project.duration_ms() as f64 / 1000.0;

    let mut args: Vec<String> = vec![
        "-y".into(),
        "-loglevel".into(),
        "error".into(),
        "-framerate".into(),
        project.fps.to_string(),
    ];

    for input in &inputs {
        if input.loop_input {
            args.push("-loop".into());
            args.push("1".into());
        }
        args.push("-i".into());
        args.push(input.path.to_string_lossy().into_owned());
    }

    args.push("-filter_complex".into());
    args.push(filter_expr.clone());

    args.push("-t".into());
    args.push(format_seconds(duration_s));

    // Frontier nodes are always filter outputs here (the background is
    // scaled, audio is leveled), so `-map` always takes a graph label.
    let has_audio_map = frontier.audio.is_some();
    for root in [frontier.video, frontier.audio].into_iter().flatten() {
        args.push("-map".into());
        args.push(format!("[{}]", graph.label(root)));
    }

    args.extend(
        [
            "-c:v",
            video_codec(),
            "-pix_fmt",
            "yuv420p",
            "-b:v",
            "6M",
            "-g",
            "60",
        ]
        .map(String::from),
    );
    if has_audio_map {
        args.push("-c:a".into());
        args.push("aac".into());
    }
    args.push("-movflags".into());
    args.push("+faststart".into());
    args.push(out_path.to_string_lossy().into_owned());

    Ok(CompiledExport {
        command: EncoderCommand {
            program: encoder_program.to_path_buf(),
            args,
        },
        filter_expr,
        inputs,
        duration_s,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MediaKind;
    use crate::model::Background;

    fn project(fps: u32) -> Project {
        Project {
            name: "t".to_string(),
            width: 640,
            height: 360,
            fps,
            background: Background::Color("#000000".to_string()),
            objects: vec![],
        }
    }

    fn position(args: &[String], needle: &str) -> usize {
        args.iter()
            .position(|a| a == needle)
            .unwrap_or_else(|| panic!("'{needle}' not in {args:?}"))
    }

    #[test]
    fn loop_flag_precedes_its_input() {
        let mut graph = FilterGraph::new();
        let looped = graph.add_source("still.png", true, MediaKind::Video);
        let plain = graph.add_source("clip.mp4", false, MediaKind::Video);
        let scaled = graph.add_scale(looped, 640.0, 360.0);
        let trimmed = graph.add_trim(plain, 0.0, 1.0);
        let over = graph.add_overlay(scaled, trimmed, 0.0, 0.0, 0.0, 1.0);

        let frontier = Frontier {
            video: Some(over),
            audio: None,
        };
        let compiled = assemble(
            &project(30),
            &graph,
            frontier,
            Path::new("ffmpeg"),
            Path::new("out.mp4"),
        )
        .unwrap();

        let args = &compiled.command.args;
        let loop_pos = position(args, "-loop");
        let first_i = position(args, "-i");
        assert_eq!(args[loop_pos + 1], "1");
        assert_eq!(first_i, loop_pos + 2);
        assert_eq!(args[first_i + 1], "still.png");

        // The second input is not looped: exactly one -loop flag.
        assert_eq!(args.iter().filter(|a| *a == "-loop").count(), 1);
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 2);
    }

    #[test]
    fn maps_follow_frontier_labels() {
        let mut graph = FilterGraph::new();
        let bg = graph.add_source("bg.png", true, MediaKind::Video);
        let video = graph.add_scale(bg, 640.0, 360.0);
        let song = graph.add_source("song.mp3", false, MediaKind::Audio);
        let trimmed = graph.add_audio_trim(song, 0.0, 2.0);
        let audio = graph.add_volume(trimmed, 1.0);

        let compiled = assemble(
            &project(24),
            &graph,
            Frontier {
                video: Some(video),
                audio: Some(audio),
            },
            Path::new("ffmpeg"),
            Path::new("out.mp4"),
        )
        .unwrap();

        let args = &compiled.command.args;
        let maps: Vec<&String> = args
            .iter()
            .enumerate()
            .filter(|(i, _)| *i > 0 && args[i - 1] == "-map")
            .map(|(_, a)| a)
            .collect();
        assert_eq!(maps, ["[scale_0]", "[volume_0]"]);
        assert!(args.contains(&"-c:a".to_string()));
        assert_eq!(args[position(args, "-framerate") + 1], "24");
    }

    #[test]
    fn video_only_export_has_no_audio_codec() {
        let mut graph = FilterGraph::new();
        let bg = graph.add_source("bg.png", true, MediaKind::Video);
        let video = graph.add_scale(bg, 640.0, 360.0);

        let compiled = assemble(
            &project(30),
            &graph,
            Frontier {
                video: Some(video),
                audio: None,
            },
            Path::new("ffmpeg"),
            Path::new("out.mp4"),
        )
        .unwrap();

        let args = &compiled.command.args;
        assert!(!args.contains(&"-c:a".to_string()));
        assert_eq!(args.iter().filter(|a| *a == "-map").count(), 1);
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn duration_uses_three_decimal_seconds() {
        let mut graph = FilterGraph::new();
        let bg = graph.add_source("bg.png", true, MediaKind::Video);
        let video = graph.add_scale(bg, 640.0, 360.0);

        let mut project = project(30);
        project.objects.push(crate::model::TimelineObject {
            id: "o".to_string(),
            start_ms: 0,
            end_ms: 4_321,
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
            kind: crate::model::ObjectKind::Image(crate::model::ImageLayer {
                path: "x.png".into(),
            }),
        });

        let compiled = assemble(
            &project,
            &graph,
            Frontier {
                video: Some(video),
                audio: None,
            },
            Path::new("ffmpeg"),
            Path::new("out.mp4"),
        )
        .unwrap();

        let args = &compiled.command.args;
        assert_eq!(args[position(args, "-t") + 1], "4.321");
        assert!((compiled.duration_s - 4.321).abs() < 1e-9);
    }

    #[test]
    fn shell_line_quotes_filter_expression() {
        let cmd = EncoderCommand {
            program: "ffmpeg".into(),
            args: vec![
                "-filter_complex".to_string(),
                "[0:v]trim=0.000:1.000[trim_0]".to_string(),
            ],
        };
        assert_eq!(
            cmd.shell_line(),
            "ffmpeg -filter_complex '[0:v]trim=0.000:1.000[trim_0]'"
        );
    }
}
