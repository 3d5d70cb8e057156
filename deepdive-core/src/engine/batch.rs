//! Batch nodes: one prepare, many executes, one aggregate.
//!
//! A [`BatchNode`] is turned into a regular [`Node`] by one of two adaptors:
//! [`Batch`] executes items one after another, [`ParallelBatch`] hands each
//! item to its own worker. Both pass outputs to `post` in input order.
//!
//! The phase split of [`Node`] holds here too: `prep` only reads state into
//! an owned source, and `split` turns that source into items at the start of
//! the execute phase, so any external call needed to find the items happens
//! there.

use async_trait::async_trait;
use std::sync::Arc;

use super::node::Node;
use super::pool::WorkerPool;
use crate::error::Result;

#[async_trait]
pub trait BatchNode<S, A>: Send + Sync + 'static
where
    S: Send + Sync + 'static,
    A: Send + 'static,
{
    type Source: Send + 'static;
    type Item: Send + 'static;
    type Output: Send + 'static;

    fn name(&self) -> &'static str;

    async fn prep(&self, state: &S) -> Result<Self::Source>;

    /// Expand the prepared source into work items, once per run.
    async fn split(&self, source: Self::Source) -> Result<Vec<Self::Item>>;

    async fn exec_item(&self, item: Self::Item) -> Result<Self::Output>;

    async fn post(&self, state: &mut S, outputs: Vec<Self::Output>) -> Result<A>;
}

/// Sequential adaptor.
pub struct Batch<N> {
    inner: N,
}

impl<N> Batch<N> {
    pub fn new(inner: N) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S, A, N> Node<S, A> for Batch<N>
where
    S: Send + Sync + 'static,
    A: Send + 'static,
    N: BatchNode<S, A>,
{
    type Prep = N::Source;
    type Exec = Vec<N::Output>;

    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn prep(&self, state: &S) -> Result<Self::Prep> {
        self.inner.prep(state).await
    }

    async fn exec(&self, source: Self::Prep) -> Result<Self::Exec> {
        let items = self.inner.split(source).await?;
        let mut outputs = Vec::with_capacity(items.len());
        for item in items {
            outputs.push(self.inner.exec_item(item).await?);
        }
        Ok(outputs)
    }

    async fn post(&self, state: &mut S, outputs: Self::Exec) -> Result<A> {
        self.inner.post(state, outputs).await
    }
}

/// Concurrent adaptor backed by a [`WorkerPool`].
pub struct ParallelBatch<N> {
    inner: Arc<N>,
    pool: WorkerPool,
}

impl<N> ParallelBatch<N> {
    pub fn new(inner: N, pool: WorkerPool) -> Self {
        Self {
            inner: Arc::new(inner),
            pool,
        }
    }
}

#[async_trait]
impl<S, A, N> Node<S, A> for ParallelBatch<N>
where
    S: Send + Sync + 'static,
    A: Send + 'static,
    N: BatchNode<S, A>,
{
    type Prep = N::Source;
    type Exec = Vec<N::Output>;

    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn prep(&self, state: &S) -> Result<Self::Prep> {
        self.inner.prep(state).await
    }

    async fn exec(&self, source: Self::Prep) -> Result<Self::Exec> {
        let items = self.inner.split(source).await?;
        let inner = self.inner.clone();
        let results = self
            .pool
            .map(self.inner.name(), items, move |item| {
                let inner = inner.clone();
                async move { inner.exec_item(item).await }
            })
            .await?;
        results.into_iter().collect()
    }

    async fn post(&self, state: &mut S, outputs: Self::Exec) -> Result<A> {
        self.inner.post(state, outputs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::node::run_node;
    use crate::error::{DeepdiveError, FlowError};
    use std::time::Duration;

    #[derive(Default)]
    struct Tally {
        words: Vec<String>,
        lengths: Vec<usize>,
    }

    struct Lengths;

    #[async_trait]
    impl BatchNode<Tally, usize> for Lengths {
        type Source = Vec<String>;
        type Item = String;
        type Output = usize;

        fn name(&self) -> &'static str {
            "lengths"
        }

        async fn prep(&self, state: &Tally) -> Result<Vec<String>> {
            Ok(state.words.clone())
        }

        async fn split(&self, words: Vec<String>) -> Result<Vec<String>> {
            Ok(words.into_iter().filter(|w| !w.is_empty()).collect())
        }

        async fn exec_item(&self, item: String) -> Result<usize> {
            // Shorter words take longer so completion order differs from input order.
            tokio::time::sleep(Duration::from_millis(30 / item.len().max(1) as u64)).await;
            if item == "boom" {
                return Err(DeepdiveError::Flow(FlowError::WorkerFailed {
                    node: "lengths".into(),
                    message: "bad word".into(),
                }));
            }
            Ok(item.len())
        }

        async fn post(&self, state: &mut Tally, outputs: Vec<usize>) -> Result<usize> {
            let total = outputs.iter().sum();
            state.lengths = outputs;
            Ok(total)
        }
    }

    fn tally(words: &[&str]) -> Tally {
        Tally {
            words: words.iter().map(|w| w.to_string()).collect(),
            lengths: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_sequential_batch() {
        let mut state = tally(&["a", "abc", "ab"]);
        let total = run_node(&Batch::new(Lengths), &mut state).await.unwrap();
        assert_eq!(total, 6);
        assert_eq!(state.lengths, vec![1, 3, 2]);
    }

    #[tokio::test]
    async fn test_parallel_batch_keeps_input_order() {
        let mut state = tally(&["a", "abcdef", "ab", "abcd", "abc"]);
        let node = ParallelBatch::new(Lengths, WorkerPool::new(4));
        let total = run_node(&node, &mut state).await.unwrap();
        assert_eq!(total, 16);
        assert_eq!(state.lengths, vec![1, 6, 2, 4, 3]);
    }

    #[tokio::test]
    async fn test_parallel_batch_propagates_item_error() {
        let mut state = tally(&["ok", "boom"]);
        let node = ParallelBatch::new(Lengths, WorkerPool::new(2));
        assert!(run_node(&node, &mut state).await.is_err());
        assert!(state.lengths.is_empty());
    }

    #[tokio::test]
    async fn test_split_filters_items_before_execution() {
        let mut state = tally(&["ab", "", "abcd"]);
        let node = ParallelBatch::new(Lengths, WorkerPool::new(2));
        assert_eq!(run_node(&node, &mut state).await.unwrap(), 6);
        assert_eq!(state.lengths, vec![2, 4]);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let mut state = tally(&[]);
        let total = run_node(&Batch::new(Lengths), &mut state).await.unwrap();
        assert_eq!(total, 0);
    }
}
