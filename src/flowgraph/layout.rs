//! Deterministic 2-D layout of a grouped flow forest.
//!
//! Pure functions only: every call builds a fresh [`FlowLayout`] from the
//! input forest, so concurrent render passes can share the engine freely.
//! Text measurement is a fixed per-character approximation, which keeps the
//! whole pipeline a function of the input values.
//!
//! Geometry conventions: y grows downward, every edge is a single S-curve
//! from a parent's bottom-center to a child's top-center, and subgraph
//! rectangles wrap the indented child region of a subagent invocation.

use serde::{Deserialize, Serialize};

use super::{group_children, ChildGroup, FlowKind, FlowNode};

/// Fixed node height in pixels.
pub const NODE_HEIGHT: f32 = 40.0;
/// Narrowest a node box gets, regardless of label length.
pub const MIN_NODE_WIDTH: f32 = 150.0;
/// Approximate width of one label character.
pub const CHAR_WIDTH: f32 = 7.5;
/// Horizontal text inset inside a node box.
pub const NODE_TEXT_PAD: f32 = 14.0;
/// Horizontal gap between parallel siblings.
pub const H_GAP: f32 = 48.0;
/// Vertical gap between sequential steps.
pub const V_GAP: f32 = 32.0;
/// Indentation of a subagent's child region.
pub const SUBGRAPH_INDENT: f32 = 28.0;
/// Header band at the top of a subgraph rectangle (label strip).
pub const SUBGRAPH_HEADER: f32 = 30.0;
/// Inner padding of a subgraph rectangle.
pub const SUBGRAPH_PAD: f32 = 14.0;
/// Outer canvas margin applied on all sides.
pub const CANVAS_MARGIN: f32 = 24.0;

/// One node with absolute pixel geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutNode {
    pub id: String,
    pub kind: FlowKind,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sublabel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Directed curve endpoints, parent bottom edge to child top edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayoutEdge {
    pub from_x: f32,
    pub from_y: f32,
    pub to_x: f32,
    pub to_y: f32,
}

impl LayoutEdge {
    /// Cubic control points for the S-curve: both sit at the vertical
    /// midpoint, directly under the start and above the end.
    pub fn control_points(&self) -> ((f32, f32), (f32, f32)) {
        let mid_y = (self.from_y + self.to_y) / 2.0;
        ((self.from_x, mid_y), (self.to_x, mid_y))
    }
}

/// Bounding box drawn around a subagent's children, nested by `depth`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubgraphRect {
    pub label: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub depth: usize,
}

/// Complete, immutable layout output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowLayout {
    pub nodes: Vec<LayoutNode>,
    pub edges: Vec<LayoutEdge>,
    pub subgraphs: Vec<SubgraphRect>,
    pub width: f32,
    pub height: f32,
}

/// Connection point on a fragment boundary (center-x plus top or bottom y).
#[derive(Debug, Clone, Copy)]
struct Port {
    x: f32,
    y: f32,
}

/// Intermediate result of laying out one subtree or group, in its own
/// coordinate space with the origin at the top-left.
#[derive(Debug, Default)]
struct Fragment {
    nodes: Vec<LayoutNode>,
    edges: Vec<LayoutEdge>,
    subgraphs: Vec<SubgraphRect>,
    width: f32,
    height: f32,
    entries: Vec<Port>,
    exits: Vec<Port>,
}

impl Fragment {
    fn translate(&mut self, dx: f32, dy: f32) {
        for node in &mut self.nodes {
            node.x += dx;
            node.y += dy;
        }
        for edge in &mut self.edges {
            edge.from_x += dx;
            edge.from_y += dy;
            edge.to_x += dx;
            edge.to_y += dy;
        }
        for rect in &mut self.subgraphs {
            rect.x += dx;
            rect.y += dy;
        }
        for port in self.entries.iter_mut().chain(self.exits.iter_mut()) {
            port.x += dx;
            port.y += dy;
        }
    }

    fn absorb(&mut self, other: Fragment) {
        self.nodes.extend(other.nodes);
        self.edges.extend(other.edges);
        self.subgraphs.extend(other.subgraphs);
    }
}

/// Lay out an ordered forest of flow nodes.
///
/// The forest's roots are grouped exactly like any sibling list, composed
/// top-to-bottom, and finally translated so the bounding box is centered
/// between the canvas margins. An empty forest yields a zero-size layout.
pub fn layout(roots: &[FlowNode]) -> FlowLayout {
    if roots.is_empty() {
        return FlowLayout::default();
    }
    let groups = group_children(roots);
    let mut frag = layout_groups(&groups, 0);

    let min_x = frag
        .nodes
        .iter()
        .map(|n| n.x)
        .chain(frag.subgraphs.iter().map(|r| r.x))
        .fold(f32::INFINITY, f32::min);
    let max_x = frag
        .nodes
        .iter()
        .map(|n| n.x + n.width)
        .chain(frag.subgraphs.iter().map(|r| r.x + r.width))
        .fold(f32::NEG_INFINITY, f32::max);
    let bbox_width = (max_x - min_x).max(0.0);

    let width = bbox_width + 2.0 * CANVAS_MARGIN;
    let height = frag.height + 2.0 * CANVAS_MARGIN;
    let dx = (width - bbox_width) / 2.0 - min_x;
    frag.translate(dx, CANVAS_MARGIN);

    FlowLayout {
        nodes: frag.nodes,
        edges: frag.edges,
        subgraphs: frag.subgraphs,
        width,
        height,
    }
}

/// Pure approximation of a node box width from its two text lines.
fn node_width(label: &str, sublabel: Option<&str>) -> f32 {
    let line = |text: &str| text.chars().count() as f32 * CHAR_WIDTH + 2.0 * NODE_TEXT_PAD;
    let sublabel_width = sublabel.map(line).unwrap_or(0.0);
    MIN_NODE_WIDTH.max(line(label)).max(sublabel_width)
}

/// Lay out one node and, for subagent invocations, its nested children
/// inside a subgraph rectangle. `depth` increases only at subagent
/// boundaries.
fn layout_subtree(node: &FlowNode, depth: usize) -> Fragment {
    let width = node_width(&node.label, node.sublabel.as_deref());
    let boxed = LayoutNode {
        id: node.id.clone(),
        kind: node.kind,
        label: node.label.clone(),
        sublabel: node.sublabel.clone(),
        tooltip: node.tooltip.clone(),
        is_error: node.is_error,
        x: 0.0,
        y: 0.0,
        width,
        height: NODE_HEIGHT,
    };
    let root_entry = Port {
        x: width / 2.0,
        y: 0.0,
    };
    let root_exit = Port {
        x: width / 2.0,
        y: NODE_HEIGHT,
    };

    if node.kind != FlowKind::SubagentInvocation || node.children.is_empty() {
        return Fragment {
            nodes: vec![boxed],
            edges: Vec::new(),
            subgraphs: Vec::new(),
            width,
            height: NODE_HEIGHT,
            entries: vec![root_entry],
            exits: vec![root_exit],
        };
    }

    let groups = group_children(&node.children);
    let mut inner = layout_groups(&groups, depth + 1);
    let rect_y = NODE_HEIGHT + V_GAP;
    inner.translate(SUBGRAPH_INDENT + SUBGRAPH_PAD, rect_y + SUBGRAPH_HEADER);

    let rect = SubgraphRect {
        label: node.label.clone(),
        x: SUBGRAPH_INDENT,
        y: rect_y,
        width: inner.width + 2.0 * SUBGRAPH_PAD,
        height: SUBGRAPH_HEADER + inner.height + SUBGRAPH_PAD,
        depth,
    };

    let mut frag = Fragment {
        nodes: vec![boxed],
        edges: Vec::new(),
        subgraphs: vec![rect.clone()],
        width: width.max(rect.x + rect.width),
        height: rect.y + rect.height,
        entries: vec![root_entry],
        // Successors continue from wherever the nested flow ends.
        exits: inner.exits.clone(),
    };
    for entry in &inner.entries {
        frag.edges.push(LayoutEdge {
            from_x: root_exit.x,
            from_y: root_exit.y,
            to_x: entry.x,
            to_y: entry.y,
        });
    }
    frag.absorb(inner);
    frag
}

/// Members laid out independently at x = 0, then concatenated left-to-right
/// with a fixed gap. Entries are every member's root; exits are the union of
/// member exits.
fn layout_parallel(nodes: &[FlowNode], depth: usize) -> Fragment {
    let mut out = Fragment::default();
    let mut x = 0.0;
    for (i, node) in nodes.iter().enumerate() {
        let mut member = layout_subtree(node, depth);
        if i > 0 {
            x += H_GAP;
        }
        member.translate(x, 0.0);
        x += member.width;
        out.height = out.height.max(member.height);
        out.entries.extend(member.entries.iter().copied());
        out.exits.extend(member.exits.iter().copied());
        out.absorb(member);
    }
    out.width = x;
    out
}

fn group_fragment(group: &ChildGroup, depth: usize) -> Fragment {
    match group {
        ChildGroup::Sequential(nodes) => {
            stack(nodes.iter().map(|n| layout_subtree(n, depth)).collect())
        }
        ChildGroup::Parallel(nodes) => layout_parallel(nodes, depth),
    }
}

/// Compose ordered groups top-to-bottom with a complete bipartite edge set
/// between each group's exits and the next group's entries.
fn layout_groups(groups: &[ChildGroup], depth: usize) -> Fragment {
    stack(groups.iter().map(|g| group_fragment(g, depth)).collect())
}

/// Vertical composition: advance a y-cursor by each fragment's height plus
/// the fixed gap, fanning every previous exit into every next entry.
fn stack(fragments: Vec<Fragment>) -> Fragment {
    let mut out = Fragment::default();
    let mut y = 0.0;
    let mut prev_exits: Vec<Port> = Vec::new();
    for (i, mut frag) in fragments.into_iter().enumerate() {
        if i > 0 {
            y += V_GAP;
        }
        frag.translate(0.0, y);
        for exit in &prev_exits {
            for entry in &frag.entries {
                out.edges.push(LayoutEdge {
                    from_x: exit.x,
                    from_y: exit.y,
                    to_x: entry.x,
                    to_y: entry.y,
                });
            }
        }
        if i == 0 {
            out.entries = frag.entries.clone();
        }
        prev_exits = frag.exits.clone();
        y += frag.height;
        out.width = out.width.max(frag.width);
        out.absorb(frag);
    }
    out.height = y;
    out.exits = prev_exits;
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_width_is_pure_and_floored() {
        assert_eq!(node_width("ab", None), MIN_NODE_WIDTH);
        let long = "x".repeat(40);
        let expected = 40.0 * CHAR_WIDTH + 2.0 * NODE_TEXT_PAD;
        assert_eq!(node_width(&long, None), expected);
        // Sublabel can dominate.
        assert_eq!(node_width("ab", Some(&long)), expected);
        assert_eq!(node_width(&long, None), node_width(&long, None));
    }

    #[test]
    fn leaf_subtree_has_single_entry_and_exit() {
        let node = FlowNode::tool_call("t", "tool").with_created_ms(0);
        let frag = layout_subtree(&node, 0);
        assert_eq!(frag.nodes.len(), 1);
        assert_eq!(frag.entries.len(), 1);
        assert_eq!(frag.exits.len(), 1);
        assert_eq!(frag.exits[0].y, NODE_HEIGHT);
    }

    #[test]
    fn subagent_children_sit_inside_rect() {
        let child = FlowNode::tool_call("c", "child").with_created_ms(10);
        let node = FlowNode::subagent("s", "agent")
            .with_created_ms(0)
            .with_children(vec![child]);
        let frag = layout_subtree(&node, 0);
        assert_eq!(frag.subgraphs.len(), 1);
        let rect = &frag.subgraphs[0];
        assert_eq!(rect.depth, 0);
        let inner = frag.nodes.iter().find(|n| n.id == "c").unwrap();
        assert!(inner.x >= rect.x && inner.x + inner.width <= rect.x + rect.width);
        assert!(inner.y >= rect.y && inner.y + inner.height <= rect.y + rect.height);
        // Parent connects into the child, successor leaves from the child.
        assert_eq!(frag.edges.len(), 1);
        assert_eq!(frag.exits.len(), 1);
        assert_eq!(frag.exits[0].y, inner.y + inner.height);
    }

    #[test]
    fn nested_subagent_rect_depth_increments() {
        let grandchild = FlowNode::tool_call("g", "leaf").with_created_ms(2);
        let inner_agent = FlowNode::subagent("inner", "inner")
            .with_created_ms(1)
            .with_children(vec![grandchild]);
        let outer = FlowNode::subagent("outer", "outer")
            .with_created_ms(0)
            .with_children(vec![inner_agent]);
        let frag = layout_subtree(&outer, 0);
        let mut depths: Vec<usize> = frag.subgraphs.iter().map(|r| r.depth).collect();
        depths.sort_unstable();
        assert_eq!(depths, vec![0, 1]);
    }

    #[test]
    fn edge_control_points_sit_at_vertical_midpoint() {
        let edge = LayoutEdge {
            from_x: 10.0,
            from_y: 0.0,
            to_x: 50.0,
            to_y: 100.0,
        };
        let ((c1x, c1y), (c2x, c2y)) = edge.control_points();
        assert_eq!((c1x, c1y), (10.0, 50.0));
        assert_eq!((c2x, c2y), (50.0, 50.0));
    }
}
