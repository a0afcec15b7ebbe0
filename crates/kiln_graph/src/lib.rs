//! Module dependency graph for incremental rebuilds.
//!
//! Nodes are modules, edges are "depends on" relationships discovered while
//! transforming. The graph keeps a reverse index so that the set of modules
//! affected by a change can be found without scanning, and tolerates cycles
//! throughout. [`plan`] turns an affected set into waves of strongly connected
//! components for the scheduler.

#![warn(missing_docs)]

pub mod graph;
pub mod node;
pub mod plan;

pub use graph::{DependencyChange, DependencyGraph, GraphSnapshot};
pub use node::{ModuleNode, ModuleStatus};
pub use plan::{plan, Component};
