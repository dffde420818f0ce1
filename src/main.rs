//! CLI entry point for the embedding index.
//!
//! Opens the disk-synchronized index configured in `.embindex/settings.toml`,
//! applies one command and leaves the files in step with memory.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use embindex::{
    BlockingEmbeddingIndex, Embedding, EmbeddingSearchIndex, EntityId, IndexError, ScoredText,
    Settings, logging,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct IndexInfo {
    index_path: PathBuf,
    entries: usize,
    dimensions: usize,
    limit: Option<usize>,
    memory_bytes: u64,
    can_add: bool,
}

#[derive(Debug, Serialize)]
struct ErrorReport {
    status: String,
    message: String,
    suggestions: Vec<&'static str>,
}

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

#[derive(Parser)]
#[command(
    name = "embindex",
    version,
    about = "Disk-backed embedding search index",
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to a settings.toml (defaults to the nearest .embindex/settings.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the index directory
    #[arg(long, global = true, env = "EMBINDEX_INDEX_PATH")]
    index_path: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show entry count, limit and memory estimate
    Info {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Register one occurrence of an id
    #[command(after_help = "Examples:\n  embindex add src/lib.rs::parse --vector 0.1,0.7,0.2")]
    Add {
        id: String,
        /// Comma-separated values or a JSON array
        #[arg(long, value_parser = parse_vector)]
        vector: Components,
        /// L2-normalize before storing
        #[arg(long)]
        normalize: bool,
    },

    /// Drop one occurrence of an id
    Remove {
        id: String,
        /// Remove every occurrence
        #[arg(long)]
        all: bool,
    },

    /// Replace an id and its embedding
    Rename {
        id: String,
        new_id: String,
        #[arg(long, value_parser = parse_vector)]
        vector: Components,
        #[arg(long)]
        normalize: bool,
    },

    /// Nearest neighbours of a query vector
    Search {
        #[arg(long, value_parser = parse_vector)]
        vector: Components,
        /// Number of results (defaults to search.top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Only return scores above this value
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Normalize the query first
        #[arg(long)]
        normalize: bool,
        #[arg(long)]
        json: bool,
    },

    /// Set or clear the capacity limit, evicting from the tail
    Limit {
        /// New limit; omit to clear
        limit: Option<usize>,
        /// Derive the limit from a memory budget in bytes
        #[arg(long, conflicts_with = "limit")]
        memory: Option<u64>,
    },

    /// Keep only ids listed in a JSON object of id -> occurrence count
    Filter { counts: PathBuf },
}

/// Vector components parsed from a single argument.
type Components = Vec<f32>;

/// Accepts `0.1,0.2` or `[0.1, 0.2]`.
fn parse_vector(raw: &str) -> Result<Components, String> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| format!("invalid JSON array: {e}"));
    }
    trimmed
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .map_err(|e| format!("invalid component '{part}': {e}"))
        })
        .collect()
}

fn embedding(values: Vec<f32>, normalize: bool) -> Embedding {
    let embedding = Embedding::from(values);
    if normalize {
        embedding.normalized()
    } else {
        embedding
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .map_err(|e| anyhow!("loading configuration from {}: {e}", path.display()))?,
        None => Settings::load().map_err(|e| anyhow!("loading configuration: {e}"))?,
    };
    if let Some(index_path) = &cli.index_path {
        settings.index_path = index_path.clone();
    }
    Ok(settings)
}

fn print_hits(hits: &[ScoredText], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(hits)?);
        return Ok(());
    }
    if hits.is_empty() {
        println!("No matches");
    }
    for hit in hits {
        println!("{:>8.4}  {}", hit.score, hit.id);
    }
    Ok(())
}

fn run(cli: Cli, settings: Settings) -> Result<()> {
    let index = BlockingEmbeddingIndex::from_settings(&settings)?;
    index.load_from_disk()?;

    match cli.command {
        Commands::Info { json } => {
            let info = IndexInfo {
                index_path: settings.index_path.clone(),
                entries: index.size(),
                dimensions: index.dimensions(),
                limit: index.limit(),
                memory_bytes: index.estimate_memory_usage(),
                can_add: index.check_can_add_entry(),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("Index:      {}", info.index_path.display());
                println!("Entries:    {}", info.entries);
                println!("Dimensions: {}", info.dimensions);
                match info.limit {
                    Some(limit) => println!("Limit:      {limit}"),
                    None => println!("Limit:      none"),
                }
                println!("Memory:     {} bytes", info.memory_bytes);
            }
        }

        Commands::Add {
            id,
            vector,
            normalize,
        } => {
            if !index.add_entry(id.as_str(), embedding(vector, normalize))? {
                bail!("index is full; '{id}' was not added");
            }
            println!("Added {id} ({} occurrence(s))", index.ref_count(&id).unwrap_or(0));
        }

        Commands::Remove { id, all } => {
            if !index.contains(&id) {
                bail!("'{id}' is not in the index");
            }
            loop {
                index.delete_entry(&id)?;
                if !all || !index.contains(&id) {
                    break;
                }
            }
            println!("Removed {id}");
        }

        Commands::Rename {
            id,
            new_id,
            vector,
            normalize,
        } => {
            index.update_entry(&id, new_id.as_str(), embedding(vector, normalize))?;
            println!("Renamed {id} -> {new_id}");
        }

        Commands::Search {
            vector,
            top_k,
            threshold,
            normalize,
            json,
        } => {
            let query = embedding(vector, normalize);
            if query.dimensions() != index.dimensions() {
                return Err(IndexError::DimensionMismatch {
                    expected: index.dimensions(),
                    actual: query.dimensions(),
                }
                .into());
            }
            let hits = index.find_closest(
                &query,
                top_k.unwrap_or(settings.search.top_k),
                threshold.or(settings.search.threshold),
            );
            print_hits(&hits, json)?;
        }

        Commands::Limit { limit, memory } => {
            let limit = memory
                .map(|bytes| index.estimate_limit_by_memory(bytes))
                .or(limit);
            let before = index.size();
            index.set_limit(limit)?;
            println!(
                "Limit set to {}; {} entr(ies) evicted",
                limit.map_or_else(|| "none".to_string(), |l| l.to_string()),
                before - index.size()
            );
        }

        Commands::Filter { counts } => {
            let raw = std::fs::read_to_string(&counts)
                .with_context(|| format!("reading {}", counts.display()))?;
            let parsed: HashMap<String, u32> = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", counts.display()))?;
            let counts: HashMap<EntityId, u32> = parsed
                .into_iter()
                .map(|(id, count)| (Arc::from(id), count))
                .collect();
            index.filter_ids_to(&counts)?;
            println!("Kept {} entr(ies)", index.size());
        }
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {e:#}");
            std::process::exit(2);
        }
    };
    logging::init(cli.verbose, &settings.logging.level);

    if let Err(e) = run(cli, settings) {
        if let Some(index_error) = e.downcast_ref::<IndexError>() {
            let report = ErrorReport {
                status: index_error.status_code(),
                message: index_error.to_string(),
                suggestions: index_error.recovery_suggestions(),
            };
            eprintln!("Error [{}]: {}", report.status, report.message);
            for suggestion in &report.suggestions {
                eprintln!("  - {suggestion}");
            }
        } else {
            eprintln!("Error: {e:#}");
        }
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vector_formats() {
        assert_eq!(parse_vector("1, 2.5,-3").unwrap(), vec![1.0, 2.5, -3.0]);
        assert_eq!(parse_vector("[0.5, 0.25]").unwrap(), vec![0.5, 0.25]);
        assert!(parse_vector("1,abc").is_err());
        assert!(parse_vector("[1,").is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "embindex", "search", "--vector", "1,0", "-k", "3", "--threshold", "0.2",
        ])
        .unwrap();
        match cli.command {
            Commands::Search {
                vector,
                top_k,
                threshold,
                ..
            } => {
                assert_eq!(vector, vec![1.0, 0.0]);
                assert_eq!(top_k, Some(3));
                assert_eq!(threshold, Some(0.2));
            }
            _ => panic!("expected search command"),
        }
    }
}
