//! Generic workflow engine.
//!
//! Work is expressed as [`Node`]s with a prepare/execute/postprocess
//! lifecycle and wired into a [`Flow`], whose edges are a static transition
//! function over a closed action enum. Batch adaptors fan a node's execute
//! phase out over many items, sequentially or on a bounded [`WorkerPool`].
//!
//! Shared state is only ever touched in prepare and postprocess, on the
//! driving task. Workers receive owned inputs and return plain values.

pub mod batch;
pub mod flow;
pub mod node;
pub mod pool;

pub use batch::{Batch, BatchNode, ParallelBatch};
pub use flow::{BatchFlow, BatchFlowNode, Flow, MergeBranches, ParallelBatchFlow, Step, Transition};
pub use node::{Node, NodeRunner, Runnable, run_node};
pub use pool::{Fanout, WorkerPool};
