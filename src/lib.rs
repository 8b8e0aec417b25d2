//! traceview - event correlation and flow-graph layout for agent debug tooling.
//!
//! Two independent engines live here:
//!
//! - [`correlator`] pairs logical view identifiers announced over editor IPC
//!   with out-of-process automation page handles, by strict arrival order,
//!   with timeout-bounded waiters and scan-based recovery for pages created
//!   through out-of-band paths.
//! - [`flowgraph`] converts an ordered forest of timestamped execution-trace
//!   events into a deterministic 2-D layout (absolute-positioned nodes, curved
//!   edges, nested subgraph rectangles) suitable for any rendering backend.
//!
//! Neither engine knows about the other and neither holds global state.

pub mod correlator;
pub mod flowgraph;

pub use correlator::{
    CorrelatorCounts, CorrelatorError, PageCorrelator, PageRealm, PageRef, PageSource, RemotePage,
    ViewCommander, ViewId,
};
pub use flowgraph::layout::{layout, FlowLayout, LayoutEdge, LayoutNode, SubgraphRect};
pub use flowgraph::{group_children, ChildGroup, FlowKind, FlowNode};
