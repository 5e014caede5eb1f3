//! Origin stories: the provenance graph of a handle, without forcing.
//!
//! Traverses the recipe depth first through argument values, collecting one
//! node per reachable handle and one edge per dependency. A visited set
//! guards the walk, so a handle shared by several consumers is rendered
//! once and any back-edge is harmless. Rendering to mermaid or DOT is the
//! caller's concern; this is data only.

use std::collections::HashSet;
use std::sync::Arc;

use pocket_core::{canonical_string, id_of, Fingerprint, HandleState, LazyValue, Value};

use crate::handle::Cached;

/// One handle in the provenance graph.
#[derive(Debug, Clone)]
pub struct StoryNode {
    /// Name of the producing callable.
    pub fn_name: String,
    /// Human-readable canonical identifier of the producing call.
    pub id: String,
    /// Fingerprint the node is cached under.
    pub fingerprint: Fingerprint,
    /// Diagnostic state at traversal time. Traversal never forces.
    pub state: HandleState,
    /// Canonical renderings of the non-handle arguments, in call order.
    pub literal_args: Vec<String>,
}

/// A dependency edge: `dependent` consumes the result of `dependency`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryEdge {
    /// The downstream handle.
    pub dependent: Fingerprint,
    /// The upstream handle it consumes.
    pub dependency: Fingerprint,
}

/// The transitive dependency graph of one handle.
#[derive(Debug, Clone)]
pub struct OriginStory {
    /// Fingerprint of the handle the story was asked about.
    pub root: Fingerprint,
    /// One node per reachable handle, root first, dependencies in
    /// depth-first discovery order.
    pub nodes: Vec<StoryNode>,
    /// Every dependency edge between reachable handles.
    pub edges: Vec<StoryEdge>,
}

impl OriginStory {
    /// Number of reachable handles, the root included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Look up a node by fingerprint.
    pub fn node(&self, fp: &Fingerprint) -> Option<&StoryNode> {
        self.nodes.iter().find(|n| n.fingerprint == *fp)
    }

    /// The upstream fingerprints a node depends on directly.
    pub fn dependencies_of(&self, fp: &Fingerprint) -> Vec<Fingerprint> {
        self.edges
            .iter()
            .filter(|e| e.dependent == *fp)
            .map(|e| e.dependency)
            .collect()
    }
}

/// Collect every handle reachable inside a value, without forcing.
fn reachable_handles(value: &Value, out: &mut Vec<Arc<dyn LazyValue>>) {
    match value {
        Value::Lazy(handle) => out.push(handle.clone()),
        Value::List(items) | Value::Set(items) => {
            for item in items {
                reachable_handles(item, out);
            }
        }
        Value::Map(entries) => {
            for (k, v) in entries {
                reachable_handles(k, out);
                reachable_handles(v, out);
            }
        }
        _ => {}
    }
}

fn render_literal(value: &Value) -> String {
    match id_of(value) {
        Ok(id) => canonical_string(&id),
        // Arguments were identifiable at wrap time; this only fires if a
        // hook was unregistered since.
        Err(_) => format!("<opaque {value:?}>"),
    }
}

fn visit(handle: &Arc<dyn LazyValue>, visited: &mut HashSet<Fingerprint>, story: &mut OriginStory) {
    let fp = *handle.fingerprint();
    if !visited.insert(fp) {
        return;
    }

    let mut literal_args = Vec::new();
    let mut dependencies = Vec::new();
    for arg in handle.recipe_args() {
        let mut found = Vec::new();
        reachable_handles(arg, &mut found);
        if found.is_empty() {
            literal_args.push(render_literal(arg));
        }
        dependencies.extend(found);
    }

    story.nodes.push(StoryNode {
        fn_name: handle.fn_name(),
        id: canonical_string(handle.identity()),
        fingerprint: fp,
        state: handle.state(),
        literal_args,
    });

    let mut seen = HashSet::new();
    for dep in dependencies {
        // One edge per distinct dependency, even when a handle is passed
        // as several arguments.
        if seen.insert(*dep.fingerprint()) {
            story.edges.push(StoryEdge { dependent: fp, dependency: *dep.fingerprint() });
            visit(&dep, visited, story);
        }
    }
}

/// Build the provenance graph of a handle without forcing any node.
pub fn origin_story(handle: &Cached) -> OriginStory {
    let mut story = OriginStory {
        root: *handle.fingerprint(),
        nodes: Vec::new(),
        edges: Vec::new(),
    };
    let mut visited = HashSet::new();
    let as_lazy: Arc<dyn LazyValue> = Arc::new(handle.clone());
    visit(&as_lazy, &mut visited, &mut story);
    story
}

impl Cached {
    /// The provenance graph of this handle. See [`origin_story`].
    pub fn origin_story(&self) -> OriginStory {
        origin_story(self)
    }
}
