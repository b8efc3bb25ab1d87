use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use pressdex_core::{
    build_index, build_index_throttled, query_and, DocumentStore, InvertedIndex, LimiterConfig, RateLimiter,
    RunHook, TokenSequenceBuilder, Tokenizer, TracingHook,
};
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build the in-memory inverted index from the document store and run AND queries", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index and print its statistics
    Build {
        #[command(flatten)]
        source: SourceArgs,
        /// Also list the N terms with the longest posting lists
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Documents containing every given term
    Query {
        #[command(flatten)]
        source: SourceArgs,
        /// Query terms; each is normalized like document text
        #[arg(required = true)]
        terms: Vec<String>,
    },
    /// Look a stored document up by external id
    Show {
        #[arg(long, default_value = "./storage/articles.db")]
        store: PathBuf,
        id: String,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// Document store directory
    #[arg(long, default_value = "./storage/articles.db")]
    store: PathBuf,
    /// Pace row reads through a rate limiter (one read per --delay-ms)
    #[arg(long, default_value_t = false)]
    throttle: bool,
    #[arg(long, default_value_t = 1000)]
    delay_ms: u64,
}

#[derive(Serialize)]
struct BuildStats<'a> {
    num_docs: u32,
    num_terms: usize,
    built_at: String,
    took_s: f64,
    top_terms: Vec<(&'a str, usize)>,
}

#[derive(Serialize)]
struct QueryHit {
    doc_key: u64,
    external_id: String,
    title: String,
    url: String,
    section: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { source, top } => {
            let store = DocumentStore::open(&source.store)?;
            let start = Instant::now();
            let index = load_index(&store, &source).await?;
            print_stats(&index, top, start.elapsed())
        }
        Commands::Query { source, terms } => {
            let store = DocumentStore::open(&source.store)?;
            let index = load_index(&store, &source).await?;
            run_query(&store, &index, &terms)
        }
        Commands::Show { store, id } => {
            let store = DocumentStore::open(&store)?;
            let doc = store.get_by_external_id(&id)?.ok_or_else(|| anyhow!("no document with id {id}"))?;
            println!("{}", serde_json::to_string_pretty(&doc.document)?);
            Ok(())
        }
    }
}

async fn load_index(store: &DocumentStore, args: &SourceArgs) -> Result<InvertedIndex> {
    let hook = TracingHook;
    let sequencer = TokenSequenceBuilder::default();
    hook.started("index build");
    let start = Instant::now();
    let index = if args.throttle {
        let limiter = RateLimiter::new(LimiterConfig {
            min_delay: Duration::from_millis(args.delay_ms),
            ..LimiterConfig::store_scan()
        });
        build_index_throttled(store, &sequencer, &limiter).await?
    } else {
        build_index(store, &sequencer)?
    };
    hook.finished("index build", start.elapsed());
    Ok(index)
}

fn print_stats(index: &InvertedIndex, top: usize, took: Duration) -> Result<()> {
    let mut top_terms: Vec<(&str, usize)> = index.terms().map(|(t, keys)| (t, keys.len())).collect();
    top_terms.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    top_terms.truncate(top);

    let stats = BuildStats {
        num_docs: index.num_docs(),
        num_terms: index.num_terms(),
        built_at: time::OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
        took_s: took.as_secs_f64(),
        top_terms,
    };
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn run_query(store: &DocumentStore, index: &InvertedIndex, raw_terms: &[String]) -> Result<()> {
    let sequencer = TokenSequenceBuilder::default();
    let terms: Vec<String> = raw_terms.iter().flat_map(|t| sequencer.tokenizer().tokenize(t)).collect();
    let keys = if terms.is_empty() { Vec::new() } else { query_and(&terms, index) };
    tracing::info!(?terms, hits = keys.len(), "query evaluated");

    let mut hits = Vec::with_capacity(keys.len());
    for key in keys {
        if let Some(stored) = store.get(key)? {
            let doc = stored.document;
            hits.push(QueryHit {
                doc_key: key,
                external_id: doc.external_id,
                title: doc.title,
                url: doc.url,
                section: doc.section,
            });
        }
    }
    println!("{}", serde_json::to_string_pretty(&hits)?);
    Ok(())
}
