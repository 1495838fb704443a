use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use tracing::{debug, error, info};

use flowline_core::error::{FlowError, Result};

/// A named unit of work over the workflow state `S`.
pub trait Node<S>: Send + Sync {
    fn name(&self) -> &str;

    fn run<'a>(&'a self, state: &'a mut S) -> BoxFuture<'a, Result<()>>;
}

/// Where control goes after a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    To(String),
    End,
}

impl Transition {
    pub fn to(node: impl Into<String>) -> Self {
        Self::To(node.into())
    }
}

type Predicate<S> = Box<dyn Fn(&S) -> Transition + Send + Sync>;

/// The single outgoing edge of a node.
pub enum Edge<S> {
    Always(Transition),
    Conditional(Predicate<S>),
}

impl<S> Edge<S> {
    fn next(&self, state: &S) -> Transition {
        match self {
            Edge::Always(t) => t.clone(),
            Edge::Conditional(decide) => decide(state),
        }
    }
}

/// Final state of a graph run and the nodes visited, in order.
#[derive(Debug)]
pub struct GraphRun<S> {
    pub state: S,
    pub path: Vec<String>,
    pub elapsed_ms: u64,
}

/// Walks named nodes from an entry node, following one edge per node.
///
/// A node without an edge ends the run. `max_steps` bounds the number of
/// node executions so a misconfigured cycle fails instead of spinning.
pub struct Graph<S> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    edges: HashMap<String, Edge<S>>,
    entry: String,
    max_steps: usize,
}

impl<S: Send> Graph<S> {
    pub fn new(entry: impl Into<String>, max_steps: usize) -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            entry: entry.into(),
            max_steps,
        }
    }

    pub fn add_node(mut self, node: impl Node<S> + 'static) -> Self {
        self.nodes.insert(node.name().to_string(), Arc::new(node));
        self
    }

    pub fn add_edge(mut self, from: impl Into<String>, to: Transition) -> Self {
        self.edges.insert(from.into(), Edge::Always(to));
        self
    }

    pub fn add_conditional_edge(
        mut self,
        from: impl Into<String>,
        decide: impl Fn(&S) -> Transition + Send + Sync + 'static,
    ) -> Self {
        self.edges
            .insert(from.into(), Edge::Conditional(Box::new(decide)));
        self
    }

    pub async fn run(&self, mut state: S) -> Result<GraphRun<S>> {
        let start = Instant::now();
        let mut path = Vec::new();
        let mut current = Transition::To(self.entry.clone());

        while let Transition::To(node_id) = current {
            if path.len() >= self.max_steps {
                error!(node_id = %node_id, max_steps = self.max_steps, "Graph step limit reached");
                return Err(FlowError::Internal(format!(
                    "graph exceeded {} steps (next node '{}')",
                    self.max_steps, node_id
                )));
            }

            let node = self.nodes.get(&node_id).ok_or_else(|| {
                FlowError::Internal(format!("node '{}' not found in graph", node_id))
            })?;

            info!(node_id = %node_id, step = path.len() + 1, "Executing graph node");
            let node_start = Instant::now();
            node.run(&mut state).await?;
            debug!(
                node_id = %node_id,
                elapsed_ms = node_start.elapsed().as_millis() as u64,
                "Node execution complete"
            );

            current = match self.edges.get(&node_id) {
                Some(edge) => edge.next(&state),
                None => Transition::End,
            };
            path.push(node_id);
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(steps = path.len(), elapsed_ms, "Graph complete");
        Ok(GraphRun {
            state,
            path,
            elapsed_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bump(&'static str);

    impl Node<Vec<String>> for Bump {
        fn name(&self) -> &str {
            self.0
        }

        fn run<'a>(&'a self, state: &'a mut Vec<String>) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                state.push(self.0.to_string());
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn follows_edges_until_end() {
        let graph = Graph::new("a", 10)
            .add_node(Bump("a"))
            .add_node(Bump("b"))
            .add_edge("a", Transition::to("b"))
            .add_edge("b", Transition::End);

        let run = graph.run(Vec::new()).await.unwrap();
        assert_eq!(run.state, vec!["a", "b"]);
        assert_eq!(run.path, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn conditional_edge_loops_until_predicate_ends() {
        let graph = Graph::new("a", 20)
            .add_node(Bump("a"))
            .add_conditional_edge("a", |s: &Vec<String>| {
                if s.len() < 3 {
                    Transition::to("a")
                } else {
                    Transition::End
                }
            });
        let run = graph.run(Vec::new()).await.unwrap();
        assert_eq!(run.state.len(), 3);
    }

    #[tokio::test]
    async fn node_without_edge_ends_run() {
        let graph = Graph::new("only", 5).add_node(Bump("only"));
        assert_eq!(graph.run(Vec::new()).await.unwrap().path, vec!["only"]);
    }

    #[tokio::test]
    async fn unbounded_cycle_hits_step_limit() {
        let graph = Graph::new("a", 4)
            .add_node(Bump("a"))
            .add_edge("a", Transition::to("a"));
        let err = graph.run(Vec::new()).await.unwrap_err();
        assert_eq!(err.kind(), flowline_core::ErrorKind::InternalError);
    }

    #[tokio::test]
    async fn unknown_node_is_internal_error() {
        let graph = Graph::new("a", 5)
            .add_node(Bump("a"))
            .add_edge("a", Transition::to("missing"));
        let err = graph.run(Vec::new()).await.unwrap_err();
        assert!(matches!(err, FlowError::Internal(ref m) if m.contains("missing")));
    }
}
