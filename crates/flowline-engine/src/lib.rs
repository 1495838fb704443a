//! Orchestration patterns over model calls.
//!
//! Every pattern is built from [`Step`]s run through [`step::execute`], which
//! applies timeouts and contains panics. The model client and tool registry
//! are passed in explicitly.

pub mod augmented;
pub mod convergence;
pub mod dispatch;
pub mod fanout;
pub mod graph;
pub mod log;
pub mod planner;
pub mod router;
pub mod sequential;
pub mod state;
pub mod step;

pub use augmented::{Augmented, ToolLoop};
pub use convergence::{
    ConvergenceLoop, ConvergenceReport, ConvergenceSettings, Critique, Improvement,
    PerspectiveCritique, TargetedRefinement, TargetedReport,
};
pub use dispatch::dispatch_tool_calls;
pub use fanout::FanOut;
pub use graph::{Agent, AgentOutcome, AgentSettings, Graph, Transition};
pub use log::ConversationLog;
pub use planner::{parse_plan, Orchestration, PlannerWorker, TaskOutcome};
pub use router::{Routed, RoutedPipelines, Router};
pub use sequential::{Chain, InputMapping};
pub use state::WorkflowState;
pub use step::{execute, FnStep, ModelStep, Step};
