//! Graph execution: named nodes over a shared state, one edge per node.
//!
//! [`Graph`] is the generic executor. [`agent`] builds the tool-using agent
//! on top of it.

pub mod agent;
pub mod executor;

pub use agent::{Agent, AgentOutcome, AgentSettings, AgentState, Analysis};
pub use executor::{Edge, Graph, GraphRun, Node, Transition};
