//! Integration tests for the flow-graph layout engine: parallel clustering,
//! geometric invariants, edge fan-in/fan-out, and the JSON shape a viewer
//! consumes.

use traceview::flowgraph::layout::{
    layout, CANVAS_MARGIN, H_GAP, MIN_NODE_WIDTH, NODE_HEIGHT,
};
use traceview::flowgraph::{FlowKind, FlowNode};

fn sub(id: &str, at: i64) -> FlowNode {
    FlowNode::subagent(id, id).with_created_ms(at)
}

#[test]
fn empty_forest_yields_zero_size_layout() {
    let result = layout(&[]);
    assert!(result.nodes.is_empty());
    assert!(result.edges.is_empty());
    assert!(result.subgraphs.is_empty());
    assert_eq!(result.width, 0.0);
    assert_eq!(result.height, 0.0);
}

#[test]
fn parallel_siblings_sit_side_by_side_without_overlap() {
    let result = layout(&[sub("s1", 0), sub("s2", 500)]);
    assert_eq!(result.nodes.len(), 2);

    let n1 = &result.nodes[0];
    let n2 = &result.nodes[1];
    assert_eq!(n1.y, n2.y);
    // Disjoint x-ranges with the fixed gap between them.
    assert_eq!(n2.x, n1.x + n1.width + H_GAP);
    // Group width is the sum of both subtree widths plus the gap.
    assert_eq!(
        result.width,
        2.0 * MIN_NODE_WIDTH + H_GAP + 2.0 * CANVAS_MARGIN
    );
}

#[test]
fn window_threshold_splits_late_subagent_into_next_row() {
    // 0 and 1000 are concurrent; 10000 trails by 9000ms and runs after.
    let result = layout(&[sub("s1", 0), sub("s2", 1_000), sub("s3", 10_000)]);
    let s1 = result.nodes.iter().find(|n| n.id == "s1").unwrap();
    let s2 = result.nodes.iter().find(|n| n.id == "s2").unwrap();
    let s3 = result.nodes.iter().find(|n| n.id == "s3").unwrap();
    assert_eq!(s1.y, s2.y);
    assert!(s3.y > s1.y + NODE_HEIGHT);
    // Fan-in: both parallel exits connect to the sequential successor.
    let into_s3 = result
        .edges
        .iter()
        .filter(|e| e.to_x == s3.x + s3.width / 2.0 && e.to_y == s3.y)
        .count();
    assert_eq!(into_s3, 2);
}

#[test]
fn sequential_flow_connects_consecutive_steps() {
    let roots = vec![
        FlowNode::user_message("u", "ask").with_created_ms(0),
        FlowNode::model_turn("m", "think").with_created_ms(10),
        FlowNode::agent_response("r", "answer").with_created_ms(20),
    ];
    let result = layout(&roots);
    assert_eq!(result.nodes.len(), 3);
    assert_eq!(result.edges.len(), 2);
    let ys: Vec<f32> = result.nodes.iter().map(|n| n.y).collect();
    assert!(ys[0] < ys[1] && ys[1] < ys[2]);
    // Edges leave a bottom edge and land on a top edge.
    for edge in &result.edges {
        assert!(edge.from_y < edge.to_y);
    }
}

#[test]
fn fan_out_and_fan_in_around_a_parallel_group() {
    let roots = vec![
        FlowNode::user_message("u", "ask").with_created_ms(0),
        sub("s1", 100),
        sub("s2", 200),
        FlowNode::agent_response("r", "answer").with_created_ms(20_000),
    ];
    let result = layout(&roots);
    // 1 exit x 2 entries, then 2 exits x 1 entry.
    assert_eq!(result.edges.len(), 4);
}

#[test]
fn subagent_children_get_a_nested_subgraph() {
    let child_a = FlowNode::tool_call("t1", "read file").with_created_ms(100);
    let child_b = FlowNode::tool_call("t2", "write file").with_created_ms(200);
    let roots = vec![sub("outer", 0).with_children(vec![child_a, child_b])];
    let result = layout(&roots);

    assert_eq!(result.subgraphs.len(), 1);
    let rect = &result.subgraphs[0];
    assert_eq!(rect.depth, 0);
    assert_eq!(rect.label, "outer");
    for id in ["t1", "t2"] {
        let node = result.nodes.iter().find(|n| n.id == id).unwrap();
        assert!(node.x >= rect.x);
        assert!(node.x + node.width <= rect.x + rect.width);
        assert!(node.y >= rect.y);
        assert!(node.y + node.height <= rect.y + rect.height);
    }
}

#[test]
fn nested_subagents_nest_their_rectangles() {
    let leaf = FlowNode::tool_call("leaf", "probe").with_created_ms(3);
    let inner = sub("inner", 2).with_children(vec![leaf]);
    let outer = sub("outer", 1).with_children(vec![inner]);
    let result = layout(&[outer]);

    assert_eq!(result.subgraphs.len(), 2);
    let outer_rect = result.subgraphs.iter().find(|r| r.label == "outer").unwrap();
    let inner_rect = result.subgraphs.iter().find(|r| r.label == "inner").unwrap();
    assert_eq!(outer_rect.depth, 0);
    assert_eq!(inner_rect.depth, 1);
    assert!(inner_rect.x > outer_rect.x);
    assert!(inner_rect.x + inner_rect.width <= outer_rect.x + outer_rect.width);
}

#[test]
fn everything_stays_inside_the_canvas() {
    let roots = vec![
        FlowNode::user_message("u", "a fairly long opening user message").with_created_ms(0),
        sub("s1", 100).with_children(vec![
            FlowNode::tool_call("t", "grep").with_created_ms(150)
        ]),
        sub("s2", 200),
        FlowNode::agent_response("r", "done").with_created_ms(30_000),
    ];
    let result = layout(&roots);
    for node in &result.nodes {
        assert!(node.x >= 0.0 && node.x + node.width <= result.width);
        assert!(node.y >= 0.0 && node.y + node.height <= result.height);
    }
    for rect in &result.subgraphs {
        assert!(rect.x >= 0.0 && rect.x + rect.width <= result.width);
        assert!(rect.y >= 0.0 && rect.y + rect.height <= result.height);
    }
}

#[test]
fn identical_input_produces_identical_layout() {
    let roots = vec![
        FlowNode::user_message("u", "ask").with_created_ms(0),
        sub("s1", 100),
        sub("s2", 200),
    ];
    let a = serde_json::to_value(layout(&roots)).unwrap();
    let b = serde_json::to_value(layout(&roots)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn layout_serializes_with_kebab_case_kinds() {
    let roots = vec![FlowNode::new("u", FlowKind::SubagentInvocation, "agent").with_created_ms(0)];
    let value = serde_json::to_value(layout(&roots)).unwrap();
    assert_eq!(value["nodes"][0]["kind"], "subagent-invocation");
    assert!(value["width"].as_f64().unwrap() > 0.0);
    assert!(value.get("edges").is_some());
    assert!(value.get("subgraphs").is_some());
}
