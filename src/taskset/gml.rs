//! Task-graph ingestion from `.gml` files.
//!
//! A task set lives at `{root}/data-multi-m{cpus}-u{util}/{idx}/` as one
//! `Tau_*.gml` file per DAG. The header carries `Index`, `U` (utilization),
//! `T` (period, stringified float) and `W` (relative deadline); nodes carry
//! `id` and `type` (the workload name); edges carry `source` and `target`.

use crate::prelude::*;

pub mod prelude {
    pub use super::{
        GmlGraph,
        GmlNode,
        GmlError,
        parse_gml,
        build_dag,
        load_taskset,
    };
}

#[derive(Debug)]
pub struct GmlNode {
    pub id: u32,
    pub workload: String,
}

/// A parsed `.gml` task graph, before workload profiles are attached.
#[derive(Debug)]
pub struct GmlGraph {
    pub index: u32,
    pub util: f64,
    pub period: f64,
    pub deadline: f64,
    pub nodes: Vec<GmlNode>,
    pub edges: Vec<(u32, u32)>,
}

#[derive(Debug)]
pub enum GmlError {
    IOError(std::io::Error),
    ParseError(String),
    CyclicGraph(String),
    ProfileError(ProfileError),
}

// =============================================================================

pub fn parse_gml(content: &str) -> Result<GmlGraph, GmlError> {
    let mut tokens = content.split_whitespace().peekable();

    let mut index = None;
    let mut util = None;
    let mut period = None;
    let mut deadline = None;
    let mut nodes = Vec::new();
    let mut edges = Vec::new();

    while let Some(token) = tokens.next() {
        match token {
            "Index" => index = Some(next_value(&mut tokens, "Index")?),
            "U" => util = Some(next_value(&mut tokens, "U")?),
            "T" => period = Some(next_value(&mut tokens, "T")?),
            "W" => deadline = Some(next_value(&mut tokens, "W")?),
            "node" => nodes.push(parse_node(&mut tokens)?),
            "edge" => edges.push(parse_edge(&mut tokens)?),
            _ => {},
        }
    }

    if nodes.is_empty() {
        return Err(GmlError::ParseError("task graph has no nodes".to_string()));
    }

    let period: f64 = period
        .ok_or_else(|| GmlError::ParseError("missing header field T".to_string()))?;
    if period <= 0.0 {
        return Err(GmlError::ParseError(format!("non-positive period {period}")));
    }

    Ok(GmlGraph {
        index: index.unwrap_or(0),
        util: util
            .ok_or_else(|| GmlError::ParseError("missing header field U".to_string()))?,
        period,
        deadline: deadline.unwrap_or(period),
        nodes,
        edges,
    })
}

fn next_value<'a, T: std::str::FromStr>(
    tokens: &mut impl Iterator<Item = &'a str>,
    key: &str,
) -> Result<T, GmlError> {
    tokens.next()
        .map(|token| token.trim_matches('"'))
        .and_then(|token| token.parse().ok())
        .ok_or_else(|| GmlError::ParseError(format!("bad value for field {key}")))
}

fn parse_node<'a>(
    tokens: &mut std::iter::Peekable<impl Iterator<Item = &'a str>>,
) -> Result<GmlNode, GmlError> {
    let mut id = None;
    let mut workload = None;

    parse_block(tokens, |key, tokens| {
        match key {
            "id" => id = Some(next_value(tokens, "id")?),
            "type" => workload = Some(next_value::<String>(tokens, "type")?),
            // label, rank and C are present but unused
            _ => { tokens.next(); },
        }
        Ok(())
    })?;

    Ok(GmlNode {
        id: id.ok_or_else(|| GmlError::ParseError("node without id".to_string()))?,
        workload: workload
            .ok_or_else(|| GmlError::ParseError("node without a workload type".to_string()))?,
    })
}

fn parse_edge<'a>(
    tokens: &mut std::iter::Peekable<impl Iterator<Item = &'a str>>,
) -> Result<(u32, u32), GmlError> {
    let mut source = None;
    let mut target = None;

    parse_block(tokens, |key, tokens| {
        match key {
            "source" => source = Some(next_value(tokens, "source")?),
            "target" => target = Some(next_value(tokens, "target")?),
            _ => { tokens.next(); },
        }
        Ok(())
    })?;

    match (source, target) {
        (Some(source), Some(target)) => Ok((source, target)),
        _ => Err(GmlError::ParseError("edge without source or target".to_string())),
    }
}

fn parse_block<'a, I: Iterator<Item = &'a str>>(
    tokens: &mut std::iter::Peekable<I>,
    mut on_key: impl FnMut(&str, &mut std::iter::Peekable<I>) -> Result<(), GmlError>,
) -> Result<(), GmlError> {
    if tokens.next() != Some("[") {
        return Err(GmlError::ParseError("expected a [ block".to_string()));
    }

    while let Some(&token) = tokens.peek() {
        if token == "]" {
            tokens.next();
            return Ok(());
        }
        tokens.next();
        on_key(token, tokens)?;
    }

    Err(GmlError::ParseError("unterminated [ block".to_string()))
}

/// Attach workload profiles and turn a parsed graph into a [`DagTask`] whose
/// subtask uids continue from `uid_offset`.
pub fn build_dag(
    graph: &GmlGraph,
    uid_offset: u32,
    platform: &Platform,
    profiles: &mut ProfileStore,
) -> Result<DagTask, GmlError> {
    let mut order: Vec<usize> = (0..graph.nodes.len()).collect();
    order.sort_by_key(|&at| graph.nodes[at].id);

    let mut index_of = std::collections::HashMap::new();
    for (subtask_idx, &at) in order.iter().enumerate() {
        if index_of.insert(graph.nodes[at].id, subtask_idx).is_some() {
            return Err(GmlError::ParseError(
                format!("duplicate node id {}", graph.nodes[at].id)
            ));
        }
    }

    let period = Time::nanos(graph.period as i64);
    let mut subtasks = Vec::with_capacity(order.len());
    for &at in &order {
        let node = &graph.nodes[at];
        let (wcets, max_insn) = profiles.wcets(&node.workload)?.clone();

        subtasks.push(Subtask::new(
            node.id + uid_offset,
            node.workload.clone(),
            period,
            max_insn,
            wcets,
            platform,
        ));
    }

    for &(source, target) in &graph.edges {
        let unknown = |id| GmlError::ParseError(format!("edge references unknown node {id}"));
        let source = *index_of.get(&source).ok_or_else(|| unknown(source))?;
        let target = *index_of.get(&target).ok_or_else(|| unknown(target))?;

        if !subtasks[source].children.contains(&target) {
            subtasks[source].children.push(target);
            subtasks[target].parents.push(source);
        }
    }

    let dag = DagTask { subtasks };
    if dag.topological_order().is_none() {
        return Err(GmlError::CyclicGraph(
            format!("task graph {} contains a cycle", graph.index)
        ));
    }

    Ok(dag)
}

/// Load the task set at `{root}/data-multi-m{cpus}-u{util}/{idx}/`.
///
/// Returns the task set and the summed per-DAG utilization from the `.gml`
/// headers. Subtask uids are unique across the whole task set.
pub fn load_taskset(
    root: &std::path::Path,
    util: f64,
    idx: usize,
    platform: &Platform,
    profiles: &mut ProfileStore,
) -> Result<(Taskset, f64), GmlError> {
    let dir = root
        .join(format!("data-multi-m{}-u{util:.1}", platform.num_cpus))
        .join(idx.to_string());

    let mut files: Vec<std::path::PathBuf> = std::fs::read_dir(&dir)?
        .filter_map(|dirent| dirent.ok().map(|dirent| dirent.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("Tau_") && name.ends_with(".gml"))
        })
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(GmlError::ParseError(
            format!("no Tau_*.gml files in {}", dir.display())
        ));
    }

    let mut taskset = Taskset::default();
    let mut uid_offset = 0;
    let mut util_sum = 0.0;

    for path in files {
        let content = std::fs::read_to_string(&path)?;
        let graph = parse_gml(&content)?;
        let dag = build_dag(&graph, uid_offset, platform, profiles)?;

        uid_offset += dag.subtasks.len() as u32;
        util_sum += graph.util;
        taskset.dags.push(dag);
    }

    Ok((taskset, util_sum))
}

// =============================================================================

impl std::fmt::Display for GmlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Taskset Parse Error, ")?;
        match self {
            GmlError::IOError(error) => write!(f, "IO: {error}")?,
            GmlError::ParseError(error) => write!(f, "GML: {error}")?,
            GmlError::CyclicGraph(error) => write!(f, "{error}")?,
            GmlError::ProfileError(error) => write!(f, "{error}")?,
        };

        Ok(())
    }
}

impl std::error::Error for GmlError {}

impl From<std::io::Error> for GmlError {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}

impl From<ProfileError> for GmlError {
    fn from(value: ProfileError) -> Self {
        Self::ProfileError(value)
    }
}

// Tests -----------------------------------------------------------------------

#[cfg(test)]
const SAMPLE_GML: &str = r#"
graph [
  Index 3
  U 1.2
  T "10000.0"
  W 10000.0
  node [
    id 0
    label "0"
    rank 0
    C 100.0
    type "canneal"
  ]
  node [
    id 1
    label "1"
    C 40.0
    type "fft"
  ]
  node [
    id 2
    label "2"
    C 60.0
    type "dedup"
  ]
  edge [
    source 0
    target 1
    label "0"
  ]
  edge [
    source 0
    target 2
    label "1"
  ]
]
"#;

#[test]
fn sample_graph_parses() {
    let graph = parse_gml(SAMPLE_GML).unwrap();

    assert_eq!(graph.index, 3);
    assert_eq!(graph.util, 1.2);
    assert_eq!(graph.period, 10000.0);
    assert_eq!(graph.deadline, 10000.0);
    assert_eq!(graph.nodes.len(), 3);
    assert_eq!(graph.nodes[1].workload, "fft");
    assert_eq!(graph.edges, vec![(0, 1), (0, 2)]);
}

#[test]
fn headerless_graphs_are_rejected() {
    assert!(matches!(
        parse_gml("graph [ node [ id 0 type \"fft\" ] ]"),
        Err(GmlError::ParseError(_))
    ));
    assert!(matches!(
        parse_gml("graph [ Index 0 U 1.0 T \"100.0\" W 100.0 ]"),
        Err(GmlError::ParseError(_))
    ));
}
