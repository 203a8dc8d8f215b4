//! The filter graph: labeled nodes, typed operations, and the linearization
//! into a single `-filter_complex` expression.
//!
//! The graph is an arena built forward-only during compilation. Nodes and
//! operations are addressed by integer handles; an operation's inputs always
//! refer to nodes created earlier, so the structure is acyclic by
//! construction.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::{MontageError, MontageResult};

/// Handle to a [`Node`] in its owning [`FilterGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Handle to an [`Operation`] in its owning [`FilterGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OpId(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    /// Stream selector used in encoder input references (`[0:v]`, `[0:a]`).
    pub fn stream_selector(self) -> char {
        match self {
            MediaKind::Video => 'v',
            MediaKind::Audio => 'a',
        }
    }
}

/// Leaf payload: an external media file plus per-source encoder options.
#[derive(Clone, Debug)]
pub struct SourceSpec {
    pub path: PathBuf,
    pub loop_input: bool,
    pub media: MediaKind,
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    Source(SourceSpec),
    Derived(OpId),
}

/// A labeled output socket. A source node has no producer; a derived node is
/// the output of exactly one operation.
#[derive(Clone, Debug)]
pub struct Node {
    pub label: String,
    pub kind: NodeKind,
}

/// Typed filter parameters. Time values serialize at fixed 3-decimal
/// precision; pixel coordinates are rounded to integers at construction —
/// a deliberate, lossy export-time snap that never affects preview.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterSpec {
    Trim { start_s: f64, end_s: f64 },
    AudioTrim { start_s: f64, end_s: f64 },
    Scale { width: i64, height: i64 },
    Volume { level: f64 },
    Overlay {
        x: i64,
        y: i64,
        enable_start_s: f64,
        enable_end_s: f64,
    },
}

impl FilterSpec {
    /// Filter name; also the label prefix for the output node.
    pub fn kind(&self) -> &'static str {
        match self {
            FilterSpec::Trim { .. } => "trim",
            FilterSpec::AudioTrim { .. } => "atrim",
            FilterSpec::Scale { .. } => "scale",
            FilterSpec::Volume { .. } => "volume",
            FilterSpec::Overlay { .. } => "overlay",
        }
    }

    fn args(&self) -> String {
        match self {
            FilterSpec::Trim { start_s, end_s } | FilterSpec::AudioTrim { start_s, end_s } => {
                format!("{}:{}", format_seconds(*start_s), format_seconds(*end_s))
            }
            FilterSpec::Scale { width, height } => format!("{width}:{height}"),
            FilterSpec::Volume { level } => format!("{level:.3}"),
            FilterSpec::Overlay {
                x,
                y,
                enable_start_s,
                enable_end_s,
            } => format!(
                "{x}:{y}:enable='between(t,{},{})'",
                format_seconds(*enable_start_s),
                format_seconds(*enable_end_s)
            ),
        }
    }
}

/// A typed transform consuming one or two nodes and producing exactly one.
#[derive(Clone, Debug)]
pub struct Operation {
    pub inputs: Vec<NodeId>,
    pub output: NodeId,
    pub filter: FilterSpec,
}

/// Per-kind monotone counters for node labels. One allocator lives inside
/// each graph, so labels never leak across compile invocations.
#[derive(Debug, Default)]
pub struct LabelAllocator {
    counters: HashMap<&'static str, u64>,
}

impl LabelAllocator {
    pub fn next(&mut self, kind: &'static str) -> String {
        let counter = self.counters.entry(kind).or_insert(0);
        let label = format!("{kind}_{counter}");
        *counter += 1;
        label
    }
}

#[derive(Debug, Default)]
pub struct FilterGraph {
    nodes: Vec<Node>,
    ops: Vec<Operation>,
    labels: LabelAllocator,
}

impl FilterGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh source node. Every call returns a node with a fresh
    /// label, even for a path that is already in the graph; the same file
    /// referenced twice yields two distinct sources. De-duplication happens
    /// at the input-enumeration stage, never here.
    pub fn add_source(
        &mut self,
        path: impl Into<PathBuf>,
        loop_input: bool,
        media: MediaKind,
    ) -> NodeId {
        let label = self.labels.next("source");
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            label,
            kind: NodeKind::Source(SourceSpec {
                path: path.into(),
                loop_input,
                media,
            }),
        });
        id
    }

    pub fn add_trim(&mut self, input: NodeId, start_s: f64, end_s: f64) -> NodeId {
        self.push_op(vec![input], FilterSpec::Trim { start_s, end_s })
    }

    pub fn add_audio_trim(&mut self, input: NodeId, start_s: f64, end_s: f64) -> NodeId {
        self.push_op(vec![input], FilterSpec::AudioTrim { start_s, end_s })
    }

    /// Scale to pixel size; fractional dimensions are rounded.
    pub fn add_scale(&mut self, input: NodeId, width: f64, height: f64) -> NodeId {
        self.push_op(
            vec![input],
            FilterSpec::Scale {
                width: width.round() as i64,
                height: height.round() as i64,
            },
        )
    }

    pub fn add_volume(&mut self, input: NodeId, level: f64) -> NodeId {
        self.push_op(vec![input], FilterSpec::Volume { level })
    }

    /// Composite `top` over `base` at a rounded pixel offset, visible only
    /// inside the `[start, end]` second window.
    pub fn add_overlay(
        &mut self,
        base: NodeId,
        top: NodeId,
        x: f64,
        y: f64,
        enable_start_s: f64,
        enable_end_s: f64,
    ) -> NodeId {
        self.push_op(
            vec![base, top],
            FilterSpec::Overlay {
                x: x.round() as i64,
                y: y.round() as i64,
                enable_start_s,
                enable_end_s,
            },
        )
    }

    fn push_op(&mut self, inputs: Vec<NodeId>, filter: FilterSpec) -> NodeId {
        let label = self.labels.next(filter.kind());
        let op_id = OpId(self.ops.len());
        let output = NodeId(self.nodes.len());
        self.nodes.push(Node {
            label,
            kind: NodeKind::Derived(op_id),
        });
        self.ops.push(Operation {
            inputs,
            output,
            filter,
        });
        output
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn label(&self, id: NodeId) -> &str {
        &self.nodes[id.0].label
    }

    pub fn source_spec(&self, id: NodeId) -> Option<&SourceSpec> {
        match &self.nodes[id.0].kind {
            NodeKind::Source(spec) => Some(spec),
            NodeKind::Derived(_) => None,
        }
    }

    pub fn source_path(&self, id: NodeId) -> Option<&Path> {
        self.source_spec(id).map(|s| s.path.as_path())
    }

    /// Collect the distinct source nodes reachable from `roots`, in
    /// first-seen depth-first order. Identity is per node, not per path:
    /// two sources wrapping the same file stay distinct. A single visited
    /// set spans all roots, so a source reachable from both the video and
    /// audio frontiers is returned once.
    pub fn collect_sources(&self, roots: &[NodeId]) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for &root in roots {
            self.collect_sources_into(root, &mut seen, &mut out);
        }
        out
    }

    fn collect_sources_into(
        &self,
        id: NodeId,
        seen: &mut HashSet<NodeId>,
        out: &mut Vec<NodeId>,
    ) {
        if !seen.insert(id) {
            return;
        }
        match &self.nodes[id.0].kind {
            NodeKind::Source(_) => out.push(id),
            NodeKind::Derived(op) => {
                for &input in &self.ops[op.0].inputs {
                    self.collect_sources_into(input, seen, out);
                }
            }
        }
    }

    /// Serialize every operation reachable from `roots` into one filter
    /// expression: clauses `[in..]name=args[out]` joined with `; `, each
    /// operation emitted exactly once, inputs always before consumers.
    /// Source nodes contribute no clause; references to them are resolved
    /// through `input_refs` (encoder input syntax, e.g. `0:v`).
    pub fn serialize(
        &self,
        roots: &[NodeId],
        input_refs: &HashMap<NodeId, String>,
    ) -> MontageResult<String> {
        let mut emitted = HashSet::new();
        let mut clauses = Vec::new();
        for &root in roots {
            self.emit_node(root, input_refs, &mut emitted, &mut clauses)?;
        }
        Ok(clauses.join("; "))
    }

    fn emit_node(
        &self,
        id: NodeId,
        input_refs: &HashMap<NodeId, String>,
        emitted: &mut HashSet<OpId>,
        clauses: &mut Vec<String>,
    ) -> MontageResult<()> {
        let NodeKind::Derived(op_id) = &self.nodes[id.0].kind else {
            return Ok(());
        };
        let op_id = *op_id;
        if !emitted.insert(op_id) {
            return Ok(());
        }

        let op = &self.ops[op_id.0];
        for &input in &op.inputs {
            self.emit_node(input, input_refs, emitted, clauses)?;
        }

        let mut clause = String::new();
        for &input in &op.inputs {
            let reference = self.input_reference(input, input_refs)?;
            clause.push_str(&format!("[{reference}]"));
        }
        clause.push_str(&format!(
            "{}={}[{}]",
            op.filter.kind(),
            op.filter.args(),
            self.nodes[op.output.0].label
        ));
        clauses.push(clause);
        Ok(())
    }

    fn input_reference<'a>(
        &'a self,
        id: NodeId,
        input_refs: &'a HashMap<NodeId, String>,
    ) -> MontageResult<&'a str> {
        match &self.nodes[id.0].kind {
            NodeKind::Derived(_) => Ok(self.nodes[id.0].label.as_str()),
            NodeKind::Source(_) => input_refs
                .get(&id)
                .map(String::as_str)
                .ok_or_else(|| {
                    MontageError::compile(format!(
                        "source node '{}' has no encoder input index",
                        self.nodes[id.0].label
                    ))
                }),
        }
    }
}

/// Fixed 3-decimal formatting, matching the encoder's expected syntax for
/// seconds (`trim=1.500:2.000`).
pub fn format_seconds(value: f64) -> String {
    format!("{value:.3}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_unique_per_kind() {
        let mut graph = FilterGraph::new();
        let src = graph.add_source("clip.mp4", false, MediaKind::Video);
        let mut labels = HashSet::new();
        for i in 0..32 {
            let node = graph.add_trim(src, i as f64, i as f64 + 1.0);
            assert!(labels.insert(graph.label(node).to_string()));
        }
        assert_eq!(labels.len(), 32);
    }

    #[test]
    fn counters_are_scoped_per_kind() {
        let mut graph = FilterGraph::new();
        let src = graph.add_source("clip.mp4", false, MediaKind::Video);
        let trimmed = graph.add_trim(src, 0.0, 1.0);
        let scaled = graph.add_scale(trimmed, 100.0, 100.0);
        // Different kinds may share the numeric suffix but never the label.
        assert_eq!(graph.label(trimmed), "trim_0");
        assert_eq!(graph.label(scaled), "scale_0");
    }

    #[test]
    fn fresh_graph_restarts_counters() {
        let mut a = FilterGraph::new();
        let src_a = a.add_source("x.mp4", false, MediaKind::Video);
        a.add_trim(src_a, 0.0, 1.0);

        let mut b = FilterGraph::new();
        let src_b = b.add_source("x.mp4", false, MediaKind::Video);
        let trimmed = b.add_trim(src_b, 0.0, 1.0);
        assert_eq!(b.label(trimmed), "trim_0");
    }

    #[test]
    fn same_path_yields_distinct_sources() {
        let mut graph = FilterGraph::new();
        let a = graph.add_source("same.png", true, MediaKind::Video);
        let b = graph.add_source("same.png", true, MediaKind::Video);
        assert_ne!(a, b);
        assert_ne!(graph.label(a), graph.label(b));

        let ta = graph.add_trim(a, 0.0, 1.0);
        let tb = graph.add_trim(b, 0.0, 1.0);
        let over = graph.add_overlay(ta, tb, 0.0, 0.0, 0.0, 1.0);
        let sources = graph.collect_sources(&[over]);
        assert_eq!(sources, vec![a, b]);
    }

    #[test]
    fn collect_sources_dedups_across_roots() {
        let mut graph = FilterGraph::new();
        let shared = graph.add_source("movie.mp4", false, MediaKind::Video);
        let video = graph.add_trim(shared, 0.0, 2.0);
        let audio = graph.add_audio_trim(shared, 0.0, 2.0);
        let sources = graph.collect_sources(&[video, audio]);
        assert_eq!(sources, vec![shared]);
    }

    #[test]
    fn collect_sources_keeps_first_seen_order() {
        let mut graph = FilterGraph::new();
        let bg = graph.add_source("bg.png", true, MediaKind::Video);
        let clip = graph.add_source("clip.mp4", false, MediaKind::Video);
        let song = graph.add_source("song.mp3", false, MediaKind::Audio);

        let trimmed = graph.add_trim(clip, 0.0, 2.0);
        let over = graph.add_overlay(bg, trimmed, 0.0, 0.0, 0.0, 2.0);
        let atrimmed = graph.add_audio_trim(song, 0.0, 2.0);

        let sources = graph.collect_sources(&[over, atrimmed]);
        assert_eq!(sources, vec![bg, clip, song]);
    }

    fn refs_for(graph: &FilterGraph, sources: &[NodeId]) -> HashMap<NodeId, String> {
        sources
            .iter()
            .enumerate()
            .map(|(index, &id)| {
                let selector = graph.source_spec(id).unwrap().media.stream_selector();
                (id, format!("{index}:{selector}"))
            })
            .collect()
    }

    #[test]
    fn trim_serializes_with_three_decimals() {
        let mut graph = FilterGraph::new();
        let src = graph.add_source("clip.mp4", false, MediaKind::Video);
        let trimmed = graph.add_trim(src, 1.5, 2.0);
        let refs = refs_for(&graph, &[src]);
        let expr = graph.serialize(&[trimmed], &refs).unwrap();
        assert_eq!(expr, "[0:v]trim=1.500:2.000[trim_0]");
    }

    #[test]
    fn pixel_coordinates_round_to_integers() {
        let mut graph = FilterGraph::new();
        let bg = graph.add_source("bg.png", true, MediaKind::Video);
        let top = graph.add_source("top.png", true, MediaKind::Video);
        let scaled = graph.add_scale(top, 319.6, 240.4);
        let over = graph.add_overlay(bg, scaled, 10.5, -3.2, 0.0, 1.0);
        let refs = refs_for(&graph, &[bg, top]);
        let expr = graph.serialize(&[over], &refs).unwrap();
        assert!(expr.contains("scale=320:240"));
        assert!(expr.contains("overlay=11:-3:enable='between(t,0.000,1.000)'"));
    }

    #[test]
    fn shared_subgraph_emits_each_clause_once() {
        let mut graph = FilterGraph::new();
        let bg = graph.add_source("bg.png", true, MediaKind::Video);
        let top = graph.add_source("top.png", true, MediaKind::Video);
        // `scaled` feeds two overlays; its clause must still appear once.
        let scaled = graph.add_scale(top, 100.0, 100.0);
        let first = graph.add_overlay(bg, scaled, 0.0, 0.0, 0.0, 1.0);
        let second = graph.add_overlay(first, scaled, 50.0, 50.0, 1.0, 2.0);

        let sources = graph.collect_sources(&[second]);
        let refs = refs_for(&graph, &sources);
        let expr = graph.serialize(&[second], &refs).unwrap();

        assert_eq!(expr.matches("scale=100:100").count(), 1);
        assert_eq!(expr.matches("overlay=").count(), 2);
    }

    #[test]
    fn serialized_expression_has_no_forward_references() {
        let mut graph = FilterGraph::new();
        let bg = graph.add_source("bg.png", true, MediaKind::Video);
        let clip = graph.add_source("clip.mp4", false, MediaKind::Video);
        let trimmed = graph.add_trim(clip, 0.5, 4.0);
        let scaled = graph.add_scale(trimmed, 640.0, 360.0);
        let over = graph.add_overlay(bg, scaled, 20.0, 20.0, 0.5, 4.0);

        let sources = graph.collect_sources(&[over]);
        let refs = refs_for(&graph, &sources);
        let expr = graph.serialize(&[over], &refs).unwrap();

        let mut defined: HashSet<String> = HashSet::new();
        for clause in expr.split("; ") {
            let open = clause.rfind('[').unwrap();
            let out_label = clause[open + 1..clause.len() - 1].to_string();
            // Every non-encoder input must reference an earlier clause.
            for part in clause[..open].split(']') {
                let Some(reference) = part.strip_prefix('[') else {
                    continue;
                };
                if reference.contains(':') {
                    continue; // raw encoder input
                }
                assert!(
                    defined.contains(reference),
                    "forward reference to '{reference}' in '{clause}'"
                );
            }
            assert!(defined.insert(out_label));
        }
    }

    #[test]
    fn sources_contribute_no_clause() {
        let mut graph = FilterGraph::new();
        let src = graph.add_source("only.png", true, MediaKind::Video);
        let expr = graph.serialize(&[src], &HashMap::new()).unwrap();
        assert!(expr.is_empty());
    }

    #[test]
    fn serialize_rejects_unindexed_source() {
        let mut graph = FilterGraph::new();
        let src = graph.add_source("clip.mp4", false, MediaKind::Video);
        let trimmed = graph.add_trim(src, 0.0, 1.0);
        let err = graph.serialize(&[trimmed], &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("encoder input index"));
    }

    #[test]
    fn format_seconds_pads_to_three_decimals() {
        assert_eq!(format_seconds(1.5), "1.500");
        assert_eq!(format_seconds(2.0), "2.000");
        assert_eq!(format_seconds(0.0), "0.000");
        assert_eq!(format_seconds(10.12345), "10.123");
    }
}
