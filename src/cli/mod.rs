//! CLI module for the lineage binary.
//!
//! Commands:
//! - Graph: build, stats
//! - Query: trace, path
//! - Analysis: analyze
//! - Rules: rules
//!
//! Every command prints one JSON document on stdout.

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::analysis::{analyze, AnalysisKind};
use crate::config::{LineageConfig, CONFIG_FILE};
use crate::error::{LineageError, Result};
use crate::extract::{RuleSet, SkippedRule};
use crate::graph::{build_graph, BuildResult, CatalogDocument, LineageGraph};

#[derive(Parser, Debug)]
#[command(name = "lineage")]
#[command(about = "Schema lineage graphs from catalog metadata")]
#[command(override_help = HELP_TEXT)]
pub struct Cli {
    /// Catalog document (JSON with `objects` and `dependencies`)
    #[arg(short, long, default_value = "catalog.json")]
    pub catalog: PathBuf,

    /// Rule document; overrides `rules_path` from the config file
    #[arg(short, long)]
    pub rules: Option<PathBuf>,

    /// Config file
    #[arg(long, default_value = CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

const HELP_TEXT: &str = "
lineage - schema lineage graphs from catalog metadata

Graph:
  build                         Nodes, edges, diagnostics and warnings
  stats                         Graph statistics

Query:
  trace <node>                  Upstream/downstream lineage of a node
        --up <N> --down <N>     Trace depths (default from config)
        --show-co-writers       Keep sibling writers of the same tables
  path <from> <to>              Shortest path in either direction

Analysis:
  analyze <kind>                islands | hubs | orphans | longest-path | cycles

Rules:
  rules                         Validated extraction rules and rejected ones

Options:
  -c, --catalog <PATH>          Catalog document (default: catalog.json)
  -r, --rules <PATH>            Rule document (.toml, .json, .yaml)
      --config <PATH>           Config file (default: lineage.toml)
";

#[derive(Subcommand, Debug)]
pub enum Commands {
    // ─── Graph ──────────────────────────────────────────────────
    /// Build the graph and print nodes, edges and diagnostics
    Build,

    /// Show graph statistics
    Stats,

    // ─── Query ──────────────────────────────────────────────────
    /// Trace lineage around a node
    Trace {
        /// Node name, any qualified spelling
        node: String,

        /// Upstream depth (0 disables)
        #[arg(long)]
        up: Option<usize>,

        /// Downstream depth (0 disables)
        #[arg(long)]
        down: Option<usize>,

        /// Keep nodes that only write the same tables as the origin
        #[arg(long)]
        show_co_writers: bool,
    },

    /// Shortest path between two nodes
    Path { from: String, to: String },

    // ─── Analysis ───────────────────────────────────────────────
    /// Run a topology analysis
    Analyze {
        /// islands, hubs, orphans, longest-path or cycles
        kind: AnalysisKind,
    },

    // ─── Rules ──────────────────────────────────────────────────
    /// Show the validated extraction rule set
    Rules,
}

/// Execute a parsed command line and return its JSON output.
pub fn execute(cli: &Cli) -> Result<Value> {
    let config = LineageConfig::load(&cli.config);
    let rules = load_rules(cli, &config)?;

    let output = match &cli.command {
        Commands::Rules => serde_json::to_value(RulesReport::new(&rules))?,
        Commands::Build => serde_json::to_value(load_graph(&cli.catalog, &rules)?.0)?,
        Commands::Stats => {
            let (result, graph) = load_graph(&cli.catalog, &rules)?;
            serde_json::to_value(StatsReport {
                stats: graph.stats(),
                references_found: result.diagnostics.references_found,
                references_resolved: result.diagnostics.references_resolved,
                unresolved: result.diagnostics.unresolved_references.len(),
                warnings: &result.warnings,
            })?
        }
        Commands::Trace {
            node,
            up,
            down,
            show_co_writers,
        } => {
            let (_, graph) = load_graph(&cli.catalog, &rules)?;
            let up = up.unwrap_or(config.trace.upstream_depth);
            let down = down.unwrap_or(config.trace.downstream_depth);
            let hide = config.trace.hide_co_writers && !show_co_writers;
            serde_json::to_value(graph.trace(node, up, down, hide)?)?
        }
        Commands::Path { from, to } => {
            let (_, graph) = load_graph(&cli.catalog, &rules)?;
            serde_json::to_value(graph.shortest_path(from, to)?)?
        }
        Commands::Analyze { kind } => {
            let (_, graph) = load_graph(&cli.catalog, &rules)?;
            serde_json::to_value(analyze(&graph, *kind, &config.analysis))?
        }
    };
    Ok(output)
}

fn load_rules(cli: &Cli, config: &LineageConfig) -> Result<RuleSet> {
    if let Some(path) = &cli.rules {
        debug!(path = %path.display(), "loading rules from command line");
        return RuleSet::load(path);
    }
    let base_dir = cli
        .config
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    config.rule_set(base_dir)
}

/// Load the catalog document, build the graph and index it.
fn load_graph(path: &Path, rules: &RuleSet) -> Result<(BuildResult, LineageGraph)> {
    if !path.exists() {
        return Err(LineageError::Config(format!(
            "catalog document not found: {}",
            path.display()
        )));
    }
    let catalog = CatalogDocument::load(path)?;
    info!(
        objects = catalog.objects.len(),
        dependencies = catalog.dependencies.len(),
        "catalog loaded"
    );
    let result = build_graph(&catalog.objects, &catalog.dependencies, rules);
    let graph = LineageGraph::from_build(&result);
    Ok((result, graph))
}

#[derive(Serialize)]
struct StatsReport<'a> {
    #[serde(flatten)]
    stats: crate::graph::GraphStats,
    references_found: usize,
    references_resolved: usize,
    unresolved: usize,
    warnings: &'a [String],
}

#[derive(Serialize)]
struct RulesReport<'a> {
    used_defaults: bool,
    rules: Vec<RuleSummary<'a>>,
    skipped: &'a [SkippedRule],
}

#[derive(Serialize)]
struct RuleSummary<'a> {
    name: &'a str,
    category: String,
    priority: i32,
    pattern: &'a str,
}

impl<'a> RulesReport<'a> {
    fn new(rules: &'a RuleSet) -> Self {
        Self {
            used_defaults: rules.used_defaults(),
            rules: rules
                .rules()
                .iter()
                .map(|r| RuleSummary {
                    name: &r.name,
                    category: r.category.to_string(),
                    priority: r.priority,
                    pattern: r.regex.as_str(),
                })
                .collect(),
            skipped: rules.skipped(),
        }
    }
}
