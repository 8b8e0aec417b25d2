//! Flow-graph model for causally-ordered execution traces.
//!
//! An external aggregator collapses a flat timestamped event log (user
//! messages, model turns, tool call start/complete pairs, subagent
//! invocations) into an ordered forest of [`FlowNode`]s. This module derives
//! structure from that forest: contiguous runs of subagent invocations whose
//! creation times fall inside a fixed window are clustered into parallel
//! groups, everything else stays sequential. The companion [`layout`] module
//! turns the grouped forest into absolute geometry.

pub mod layout;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Subagent siblings whose creation times are within this window of the
/// previous subagent's are considered concurrent. Tuning knob.
pub const PARALLEL_WINDOW_MS: i64 = 5_000;

/// Closed set of trace event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlowKind {
    UserMessage,
    ModelTurn,
    ToolCall,
    SubagentInvocation,
    AgentResponse,
    Generic,
}

/// One node of the input forest. Immutable once built; the layout engine
/// never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: String,
    pub kind: FlowKind,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sublabel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    /// Creation time, epoch milliseconds.
    pub created_ms: i64,
    #[serde(default)]
    pub children: Vec<FlowNode>,
}

impl FlowNode {
    pub fn new(id: impl Into<String>, kind: FlowKind, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            label: label.into(),
            sublabel: None,
            tooltip: None,
            is_error: false,
            created_ms: Utc::now().timestamp_millis(),
            children: Vec::new(),
        }
    }

    pub fn user_message(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(id, FlowKind::UserMessage, label)
    }

    pub fn model_turn(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(id, FlowKind::ModelTurn, label)
    }

    pub fn tool_call(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(id, FlowKind::ToolCall, label)
    }

    pub fn subagent(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(id, FlowKind::SubagentInvocation, label)
    }

    pub fn agent_response(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(id, FlowKind::AgentResponse, label)
    }

    pub fn with_sublabel(mut self, sublabel: impl Into<String>) -> Self {
        self.sublabel = Some(sublabel.into());
        self
    }

    pub fn with_tooltip(mut self, tooltip: impl Into<String>) -> Self {
        self.tooltip = Some(tooltip.into());
        self
    }

    pub fn with_error(mut self, is_error: bool) -> Self {
        self.is_error = is_error;
        self
    }

    pub fn with_created_ms(mut self, created_ms: i64) -> Self {
        self.created_ms = created_ms;
        self
    }

    pub fn with_children(mut self, children: Vec<FlowNode>) -> Self {
        self.children = children;
        self
    }

    fn is_subagent(&self) -> bool {
        self.kind == FlowKind::SubagentInvocation
    }
}

/// A contiguous slice of siblings tagged with how it executes.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildGroup {
    Sequential(Vec<FlowNode>),
    Parallel(Vec<FlowNode>),
}

impl ChildGroup {
    pub fn nodes(&self) -> &[FlowNode] {
        match self {
            ChildGroup::Sequential(nodes) | ChildGroup::Parallel(nodes) => nodes,
        }
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, ChildGroup::Parallel(_))
    }
}

/// Cluster a sibling list into sequential and parallel groups.
///
/// Fewer than two subagent siblings means no concurrency is possible and the
/// whole list is one sequential group. Otherwise subagents are chained into
/// clusters wherever each one's `created_ms` is within
/// [`PARALLEL_WINDOW_MS`] of the previous subagent's; clusters of size two or
/// more become parallel groups. Non-subagent nodes that sit inside a
/// cluster's index range are peeled off into a sequential setup group emitted
/// just before the parallel group. Every input node appears in exactly one
/// group.
pub fn group_children(siblings: &[FlowNode]) -> Vec<ChildGroup> {
    if siblings.is_empty() {
        return Vec::new();
    }

    let subagent_idx: Vec<usize> = siblings
        .iter()
        .enumerate()
        .filter(|(_, n)| n.is_subagent())
        .map(|(i, _)| i)
        .collect();
    if subagent_idx.len() < 2 {
        return vec![ChildGroup::Sequential(siblings.to_vec())];
    }

    // Chain subagents into clusters by creation-time gap, then keep only the
    // clusters that actually hold concurrency (size >= 2).
    let mut clusters: Vec<Vec<usize>> = Vec::new();
    for &idx in &subagent_idx {
        let chained = clusters
            .last()
            .and_then(|c| c.last())
            .map_or(false, |&prev| {
                siblings[idx].created_ms - siblings[prev].created_ms <= PARALLEL_WINDOW_MS
            });
        if chained {
            if let Some(cluster) = clusters.last_mut() {
                cluster.push(idx);
            }
        } else {
            clusters.push(vec![idx]);
        }
    }
    clusters.retain(|c| c.len() >= 2);

    let mut groups: Vec<ChildGroup> = Vec::new();
    let mut sequential: Vec<FlowNode> = Vec::new();
    let mut i = 0;
    while i < siblings.len() {
        let cluster = clusters.iter().find(|c| c[0] == i);
        if let Some(cluster) = cluster {
            let end = *cluster.last().unwrap_or(&i);
            // Setup nodes interleaved with the cluster run precede it.
            for j in i..=end {
                if !siblings[j].is_subagent() {
                    sequential.push(siblings[j].clone());
                }
            }
            if !sequential.is_empty() {
                groups.push(ChildGroup::Sequential(std::mem::take(&mut sequential)));
            }
            groups.push(ChildGroup::Parallel(
                cluster.iter().map(|&j| siblings[j].clone()).collect(),
            ));
            i = end + 1;
        } else {
            sequential.push(siblings[i].clone());
            i += 1;
        }
    }
    if !sequential.is_empty() {
        groups.push(ChildGroup::Sequential(sequential));
    }
    groups
}
