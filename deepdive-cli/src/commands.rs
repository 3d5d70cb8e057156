//! Subcommand handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use deepdive_core::config::{self, DeepdiveConfig};
use deepdive_core::providers::create_services;
use deepdive_core::{
    AnswerFile, ClarificationSource, PlanningMode, ResearchOutcome, ResearchPipeline,
    SkipClarification,
};
use tracing::info;

use crate::clarify::EditorClarifier;

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// The research request
    pub request: String,

    /// Corpus to search (overrides research.corpus)
    #[arg(long)]
    pub corpus: Option<String>,

    /// Maximum planner/retriever iterations
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Query planning mode: semantic, keyword or hybrid
    #[arg(long)]
    pub mode: Option<PlanningMode>,

    /// Read clarification answers from a file instead of the editor
    #[arg(long, conflicts_with = "no_clarify")]
    pub answers: Option<PathBuf>,

    /// Skip clarifying questions entirely
    #[arg(long)]
    pub no_clarify: bool,

    /// Run the retriever and verifier without the worker pool
    #[arg(long)]
    pub sequential: bool,

    /// Write the report to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl RunArgs {
    /// Fold command-line flags over the loaded configuration.
    pub fn apply(&self, config: &mut DeepdiveConfig) {
        let research = &mut config.research;
        if let Some(corpus) = &self.corpus {
            research.corpus = corpus.clone();
        }
        if let Some(depth) = self.max_depth {
            research.max_depth = depth;
        }
        if let Some(mode) = self.mode {
            research.search_mode = mode;
        }
        if self.sequential {
            research.parallel = false;
        }
    }

    pub fn clarifier(&self) -> Arc<dyn ClarificationSource> {
        match (&self.answers, self.no_clarify) {
            (Some(path), _) => Arc::new(AnswerFile::new(path)),
            (None, true) => Arc::new(SkipClarification),
            (None, false) => Arc::new(EditorClarifier),
        }
    }
}

pub async fn run(args: RunArgs, workspace: &Path, quiet: bool) -> anyhow::Result<()> {
    let mut config = config::load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    args.apply(&mut config);

    if config.research.corpus.trim().is_empty() {
        anyhow::bail!("No corpus configured. Pass --corpus or set research.corpus.");
    }
    config.research.validate()?;

    let services = create_services(&config)?;
    let pipeline =
        ResearchPipeline::new(config.research.clone(), services).with_clarifier(args.clarifier());

    let outcome = pipeline.run(&args.request).await?;
    info!(
        run_id = %outcome.stats.run_id,
        steps = outcome.trace.len(),
        elapsed_secs = outcome.stats.elapsed_secs,
        "Research run finished"
    );

    match &args.output {
        Some(path) => {
            std::fs::write(path, &outcome.report)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            if !quiet {
                println!("Report written to {}", path.display());
                print_summary(&outcome);
            }
        }
        None => println!("{}", outcome.report),
    }
    Ok(())
}

fn print_summary(outcome: &ResearchOutcome) {
    let stats = &outcome.stats;
    println!(
        "  {} conversations, {} iterations, {} claims checked ({} unverified)",
        stats.hits, stats.iterations, stats.claims_checked, stats.claims_unsupported
    );
}

pub fn config_show(workspace: &Path) -> anyhow::Result<()> {
    let config = config::load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{}", toml_str);
    Ok(())
}

pub fn config_init(workspace: &Path) -> anyhow::Result<()> {
    let path = config::workspace_config_path(workspace);
    if path.exists() {
        println!("Configuration file already exists at: {}", path.display());
        return Ok(());
    }
    let path = config::write_default_config(workspace)?;
    println!("Created default configuration at: {}", path.display());
    Ok(())
}
