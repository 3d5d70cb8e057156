//! # Deepdive Core
//!
//! Core library for deepdive, an iterative research agent over a corpus of
//! conversations. Provides the generic workflow engine, the research
//! pipeline built on it, collaborator interfaces with HTTP adapters and test
//! doubles, configuration, and fundamental types.

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod providers;
pub mod services;
pub mod types;

// Re-export commonly used types at the crate root.
pub use config::{DeepdiveConfig, ResearchConfig};
pub use context::{ResearchContext, ResearchStats};
pub use engine::{Flow, Node, Runnable, WorkerPool};
pub use error::{DeepdiveError, Result};
pub use pipeline::{Action, ResearchOutcome, ResearchPipeline, Stage};
pub use services::{
    AnswerFile, ClarificationSource, ConversationFetcher, LlmInvoker, SearchProvider, Services,
    SkipClarification,
};
pub use types::{ConversationHit, LlmPurpose, PlanningMode, SearchMode, SearchPlan};
