//! Directed graphs of runnables, and batch flows over parameter sets.

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, warn};

use super::node::{Node, NodeRunner, Runnable};
use super::pool::WorkerPool;
use crate::error::{FlowError, Result};

/// Static routing table: where to go after `node` yields `action`.
/// `None` ends the flow with that action.
pub type Transition<K, A> = fn(K, A) -> Option<K>;

/// One executed step: the node that ran and the action it yielded.
pub type Step<K, A> = (K, A);

/// A graph of runnables keyed by `K`, routed by actions of type `A`.
pub struct Flow<S, K, A> {
    name: String,
    start: K,
    nodes: Vec<(K, Box<dyn Runnable<S, A>>)>,
    transitions: Transition<K, A>,
    max_steps: usize,
}

impl<S, K, A> Flow<S, K, A>
where
    S: Send + Sync + 'static,
    K: Copy + Eq + Debug + Send + Sync + 'static,
    A: Copy + Debug + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, start: K, transitions: Transition<K, A>) -> Self {
        Self {
            name: name.into(),
            start,
            nodes: Vec::new(),
            transitions,
            max_steps: 64,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Register a node under `key`, replacing any previous registration.
    pub fn node<N>(self, key: K, node: N) -> Self
    where
        N: Node<S, A> + 'static,
    {
        self.runnable(key, Box::new(NodeRunner::new(node)))
    }

    /// Register any runnable (a nested flow, for instance) under `key`.
    pub fn runnable(mut self, key: K, runnable: Box<dyn Runnable<S, A>>) -> Self {
        self.nodes.retain(|(k, _)| *k != key);
        self.nodes.push((key, runnable));
        self
    }

    fn lookup(&self, key: K) -> Option<&dyn Runnable<S, A>> {
        self.nodes
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, r)| r.as_ref())
    }

    /// Run to completion and also return every step taken.
    pub async fn run_traced(&self, state: &mut S) -> Result<(A, Vec<Step<K, A>>)> {
        let mut current = self.start;
        let mut trace = Vec::new();

        loop {
            if trace.len() >= self.max_steps {
                warn!(flow = %self.name, limit = self.max_steps, "Step limit reached");
                return Err(FlowError::StepLimitExceeded {
                    flow: self.name.clone(),
                    limit: self.max_steps,
                }
                .into());
            }

            let runnable = self.lookup(current).ok_or_else(|| FlowError::MissingNode {
                flow: self.name.clone(),
                node: format!("{current:?}"),
            })?;

            let action = runnable.run(state).await?;
            trace.push((current, action));
            debug!(
                flow = %self.name,
                step = trace.len(),
                node = ?current,
                action = ?action,
                "Flow step"
            );

            match (self.transitions)(current, action) {
                Some(next) => current = next,
                None => return Ok((action, trace)),
            }
        }
    }
}

#[async_trait]
impl<S, K, A> Runnable<S, A> for Flow<S, K, A>
where
    S: Send + Sync + 'static,
    K: Copy + Eq + Debug + Send + Sync + 'static,
    A: Copy + Debug + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, state: &mut S) -> Result<A> {
        self.run_traced(state).await.map(|(action, _)| action)
    }
}

/// Parameter source for [`BatchFlow`] and [`ParallelBatchFlow`].
#[async_trait]
pub trait BatchFlowNode<S, A>: Send + Sync + 'static
where
    S: Send + Sync + 'static,
    A: Send + 'static,
{
    type Params: Send + Sync + 'static;

    /// One entry per run of the inner flow.
    async fn prep(&self, state: &S) -> Result<Vec<Self::Params>>;

    /// Install one parameter set into the state before the inner flow runs.
    fn apply(&self, state: &mut S, params: &Self::Params);

    /// Combine the inner flows' final actions into this flow's action.
    async fn post(&self, state: &mut S, actions: Vec<A>) -> Result<A>;
}

/// Runs an inner flow once per parameter set, sequentially, on the shared state.
pub struct BatchFlow<S, A, N> {
    name: String,
    node: N,
    inner: Box<dyn Runnable<S, A>>,
}

impl<S, A, N> BatchFlow<S, A, N> {
    pub fn new(name: impl Into<String>, node: N, inner: Box<dyn Runnable<S, A>>) -> Self {
        Self {
            name: name.into(),
            node,
            inner,
        }
    }
}

#[async_trait]
impl<S, A, N> Runnable<S, A> for BatchFlow<S, A, N>
where
    S: Send + Sync + 'static,
    A: Send + 'static,
    N: BatchFlowNode<S, A>,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, state: &mut S) -> Result<A> {
        let params = self.node.prep(state).await?;
        debug!(flow = %self.name, runs = params.len(), "Batch flow");
        let mut actions = Vec::with_capacity(params.len());
        for p in &params {
            self.node.apply(state, p);
            actions.push(self.inner.run(state).await?);
        }
        self.node.post(state, actions).await
    }
}

/// Merge step for [`ParallelBatchFlow`].
#[async_trait]
pub trait MergeBranches<S, A>: BatchFlowNode<S, A>
where
    S: Send + Sync + 'static,
    A: Send + 'static,
{
    /// Fold the per-branch states back into the shared state. Branches
    /// arrive in parameter order.
    async fn merge(&self, state: &mut S, branches: Vec<S>) -> Result<()>;
}

/// Runs an inner flow per parameter set on its own worker, each against a
/// private clone of the state. The clones are merged single-threaded.
pub struct ParallelBatchFlow<S, A, N> {
    name: String,
    node: Arc<N>,
    inner: Arc<dyn Runnable<S, A>>,
    pool: WorkerPool,
}

impl<S, A, N> ParallelBatchFlow<S, A, N> {
    pub fn new(
        name: impl Into<String>,
        node: N,
        inner: Arc<dyn Runnable<S, A>>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            name: name.into(),
            node: Arc::new(node),
            inner,
            pool,
        }
    }
}

#[async_trait]
impl<S, A, N> Runnable<S, A> for ParallelBatchFlow<S, A, N>
where
    S: Clone + Send + Sync + 'static,
    A: Send + 'static,
    N: MergeBranches<S, A>,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, state: &mut S) -> Result<A> {
        let params = self.node.prep(state).await?;
        debug!(flow = %self.name, runs = params.len(), "Parallel batch flow");

        let jobs: Vec<(S, N::Params)> = params.into_iter().map(|p| (state.clone(), p)).collect();
        let node = self.node.clone();
        let inner = self.inner.clone();
        let results = self
            .pool
            .map(&self.name, jobs, move |(mut branch, p)| {
                let node = node.clone();
                let inner = inner.clone();
                async move {
                    node.apply(&mut branch, &p);
                    let action = inner.run(&mut branch).await?;
                    Ok::<_, crate::error::DeepdiveError>((branch, action))
                }
            })
            .await?;

        let mut branches = Vec::with_capacity(results.len());
        let mut actions = Vec::with_capacity(results.len());
        for result in results {
            let (branch, action) = result?;
            branches.push(branch);
            actions.push(action);
        }
        self.node.merge(state, branches).await?;
        self.node.post(state, actions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeepdiveError;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Key {
        Count,
        Check,
        Stop,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Act {
        Again,
        Enough,
        Halt,
    }

    #[derive(Debug, Clone, Default)]
    struct Counter {
        value: u32,
        target: u32,
        log: Vec<String>,
    }

    struct Increment;

    #[async_trait]
    impl Node<Counter, Act> for Increment {
        type Prep = u32;
        type Exec = u32;

        fn name(&self) -> &'static str {
            "increment"
        }
        async fn prep(&self, state: &Counter) -> Result<u32> {
            Ok(state.value)
        }
        async fn exec(&self, v: u32) -> Result<u32> {
            Ok(v + 1)
        }
        async fn post(&self, state: &mut Counter, v: u32) -> Result<Act> {
            state.value = v;
            state.log.push(format!("inc {v}"));
            Ok(Act::Again)
        }
    }

    struct Check;

    #[async_trait]
    impl Node<Counter, Act> for Check {
        type Prep = (u32, u32);
        type Exec = bool;

        fn name(&self) -> &'static str {
            "check"
        }
        async fn prep(&self, state: &Counter) -> Result<(u32, u32)> {
            Ok((state.value, state.target))
        }
        async fn exec(&self, (v, t): (u32, u32)) -> Result<bool> {
            Ok(v >= t)
        }
        async fn post(&self, _state: &mut Counter, done: bool) -> Result<Act> {
            Ok(if done { Act::Enough } else { Act::Again })
        }
    }

    struct Stop;

    #[async_trait]
    impl Node<Counter, Act> for Stop {
        type Prep = ();
        type Exec = ();

        fn name(&self) -> &'static str {
            "stop"
        }
        async fn prep(&self, _state: &Counter) -> Result<()> {
            Ok(())
        }
        async fn exec(&self, _: ()) -> Result<()> {
            Ok(())
        }
        async fn post(&self, state: &mut Counter, _: ()) -> Result<Act> {
            state.log.push("stop".into());
            Ok(Act::Halt)
        }
    }

    fn route(key: Key, act: Act) -> Option<Key> {
        match (key, act) {
            (Key::Count, Act::Again) => Some(Key::Check),
            (Key::Check, Act::Again) => Some(Key::Count),
            (Key::Check, Act::Enough) => Some(Key::Stop),
            _ => None,
        }
    }

    fn counting_flow() -> Flow<Counter, Key, Act> {
        Flow::new("counting", Key::Count, route)
            .node(Key::Count, Increment)
            .node(Key::Check, Check)
            .node(Key::Stop, Stop)
    }

    #[tokio::test]
    async fn test_flow_runs_until_no_edge() {
        let mut state = Counter {
            target: 3,
            ..Default::default()
        };
        let (action, trace) = counting_flow().run_traced(&mut state).await.unwrap();
        assert_eq!(action, Act::Halt);
        assert_eq!(state.value, 3);
        assert_eq!(trace.len(), 7);
        assert_eq!(trace.last(), Some(&(Key::Stop, Act::Halt)));
        assert_eq!(state.log, vec!["inc 1", "inc 2", "inc 3", "stop"]);
    }

    #[tokio::test]
    async fn test_flow_step_limit() {
        let mut state = Counter {
            target: 1_000,
            ..Default::default()
        };
        let err = counting_flow()
            .with_max_steps(10)
            .run(&mut state)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeepdiveError::Flow(FlowError::StepLimitExceeded { limit: 10, .. })
        ));
    }

    #[tokio::test]
    async fn test_flow_missing_node() {
        let flow = Flow::new("broken", Key::Count, route).node(Key::Count, Increment);
        let mut state = Counter::default();
        let err = flow.run(&mut state).await.unwrap_err();
        assert!(matches!(
            err,
            DeepdiveError::Flow(FlowError::MissingNode { .. })
        ));
    }

    #[tokio::test]
    async fn test_nested_flow() {
        fn outer_route(key: Key, act: Act) -> Option<Key> {
            match (key, act) {
                (Key::Count, Act::Halt) => Some(Key::Stop),
                _ => None,
            }
        }
        let outer = Flow::new("outer", Key::Count, outer_route)
            .runnable(Key::Count, Box::new(counting_flow()))
            .node(Key::Stop, Stop);
        let mut state = Counter {
            target: 1,
            ..Default::default()
        };
        assert_eq!(outer.run(&mut state).await.unwrap(), Act::Halt);
        assert_eq!(state.log, vec!["inc 1", "stop", "stop"]);
    }

    /// Runs the counting flow once per target.
    struct Targets(Vec<u32>);

    #[async_trait]
    impl BatchFlowNode<Counter, Act> for Targets {
        type Params = u32;

        async fn prep(&self, _state: &Counter) -> Result<Vec<u32>> {
            Ok(self.0.clone())
        }
        fn apply(&self, state: &mut Counter, target: &u32) {
            state.value = 0;
            state.target = *target;
        }
        async fn post(&self, _state: &mut Counter, actions: Vec<Act>) -> Result<Act> {
            assert!(actions.iter().all(|a| *a == Act::Halt));
            Ok(Act::Halt)
        }
    }

    #[async_trait]
    impl MergeBranches<Counter, Act> for Targets {
        async fn merge(&self, state: &mut Counter, branches: Vec<Counter>) -> Result<()> {
            for branch in branches {
                state.log.push(format!("branch {}", branch.value));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_batch_flow_sequential_on_shared_state() {
        let flow = BatchFlow::new("targets", Targets(vec![2, 1]), Box::new(counting_flow()));
        let mut state = Counter::default();
        flow.run(&mut state).await.unwrap();
        assert_eq!(state.log, vec!["inc 1", "inc 2", "stop", "inc 1", "stop"]);
    }

    #[tokio::test]
    async fn test_parallel_batch_flow_merges_in_order() {
        let flow = ParallelBatchFlow::new(
            "targets",
            Targets(vec![3, 1, 2]),
            Arc::new(counting_flow()),
            WorkerPool::new(3),
        );
        let mut state = Counter::default();
        flow.run(&mut state).await.unwrap();
        // Branches never write to the shared state directly.
        assert_eq!(state.value, 0);
        assert_eq!(state.log, vec!["branch 3", "branch 1", "branch 2"]);
    }
}
