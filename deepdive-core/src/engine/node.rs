//! The unit of work and its object-safe runner.

use async_trait::async_trait;

use crate::error::Result;

/// A unit of work with a three-phase lifecycle.
///
/// `prep` reads the shared state and builds an owned work item, `exec`
/// performs the side-effecting part without access to the state, and `post`
/// merges the result back and picks the routing action.
#[async_trait]
pub trait Node<S, A>: Send + Sync
where
    S: Send + Sync + 'static,
    A: Send + 'static,
{
    type Prep: Send;
    type Exec: Send;

    /// Name used in logs and error messages.
    fn name(&self) -> &'static str;

    async fn prep(&self, state: &S) -> Result<Self::Prep>;

    async fn exec(&self, prep: Self::Prep) -> Result<Self::Exec>;

    async fn post(&self, state: &mut S, exec: Self::Exec) -> Result<A>;
}

/// Anything that can run against a state and yield an action: wrapped
/// nodes, flows and batch flows.
#[async_trait]
pub trait Runnable<S, A>: Send + Sync
where
    S: Send + Sync + 'static,
    A: Send + 'static,
{
    fn name(&self) -> &str;

    async fn run(&self, state: &mut S) -> Result<A>;
}

/// Adapts a [`Node`] into a [`Runnable`].
pub struct NodeRunner<N> {
    node: N,
}

impl<N> NodeRunner<N> {
    pub fn new(node: N) -> Self {
        Self { node }
    }

    pub fn inner(&self) -> &N {
        &self.node
    }
}

#[async_trait]
impl<S, A, N> Runnable<S, A> for NodeRunner<N>
where
    S: Send + Sync + 'static,
    A: Send + 'static,
    N: Node<S, A>,
{
    fn name(&self) -> &str {
        self.node.name()
    }

    async fn run(&self, state: &mut S) -> Result<A> {
        run_node(&self.node, state).await
    }
}

/// Run one node through prep, exec and post.
pub async fn run_node<S, A, N>(node: &N, state: &mut S) -> Result<A>
where
    S: Send + Sync + 'static,
    A: Send + 'static,
    N: Node<S, A> + ?Sized,
{
    let prep = node.prep(state).await?;
    let exec = node.exec(prep).await?;
    node.post(state, exec).await
}
