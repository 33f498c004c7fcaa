use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::EnvFilter;

use secdoc_core::{OutputFormat, RankedChunk, SecdocConfig};
use secdoc_retrieval::{
    BuildOutcome, Engine, HttpEmbedder, HttpRelevanceScorer, IndexStats, IndexStore,
};

#[derive(Parser)]
#[command(
    name = "secdoc",
    version,
    about = "Hybrid retrieval over Thai/English cybersecurity standards",
    long_about = "secdoc indexes page-level text from security standards and answers questions\n\
                   with citation-backed evidence chunks.\n\n\
                   Each query runs against a BM25 index (with Thai word segmentation) and an\n\
                   embedding index, fuses both result lists, and reranks the merged candidates\n\
                   with a cross-encoder.\n\n\
                   Examples:\n  \
                     secdoc init                            Create a .secdoc.toml config file\n  \
                     secdoc build --input pages.json        Build and persist the index\n  \
                     secdoc search 'firewall rules for DMZ' Search the active index\n  \
                     secdoc status                          Show the active index generation\n  \
                     secdoc doctor                          Check setup and environment"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (default: .secdoc.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text      Human-readable summaries (default)\n  \
                         json      Machine-readable JSON with camelCase keys\n  \
                         markdown  GitHub-flavored Markdown"
    )]
    format: OutputFormat,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// When to use colors
    #[arg(long, global = true, default_value = "auto")]
    color: ColorChoice,
}

#[derive(Subcommand)]
enum Command {
    /// Build a new index generation from ingested pages
    #[command(long_about = "Build a new index generation from ingested pages.\n\n\
        Reads the ingestion pipeline's JSON export, splits pages into overlapping\n\
        chunks, builds the BM25 and embedding indexes, and persists both as a new\n\
        generation under the index root. The previous generation stays active if\n\
        anything fails.\n\n\
        Examples:\n  secdoc build --input data/pages.json")]
    Build {
        /// Page export (JSON array of {content, metadata})
        #[arg(long)]
        input: PathBuf,
    },
    /// Search the index
    #[command(long_about = "Search the index with a natural-language query.\n\n\
        Loads the active index generation. With --input, builds one from the given\n\
        page export when no usable index exists yet.\n\n\
        Examples:\n  secdoc search 'password complexity'\n  secdoc search 'ไฟร์วอลล์' --format json\n  secdoc search 'MFA' --input data/pages.json")]
    Search {
        /// Query text (Thai, English, or mixed)
        query: String,

        /// Page export to build from if no index exists
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Show the active index generation
    Status,
    /// Create a default .secdoc.toml configuration file
    #[command(long_about = "Create a default .secdoc.toml configuration file.\n\n\
        Generates a commented-out template with all available options.\n\
        Fails if .secdoc.toml already exists.")]
    Init,
    /// Check your secdoc setup and environment
    #[command(long_about = "Check your secdoc setup and environment.\n\n\
        Runs diagnostics for the config file, model endpoints, tokenizer dictionary,\n\
        and the persisted index. Use --format json for machine-readable output.")]
    Doctor,
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, PartialEq, Eq, ValueEnum)]
enum ColorChoice {
    /// Auto-detect based on terminal
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

type HttpEngine = Engine<HttpEmbedder, HttpRelevanceScorer>;

fn print_welcome(use_color: bool) {
    let version = env!("CARGO_PKG_VERSION");

    if use_color {
        println!("\x1b[1msecdoc\x1b[0m v{version} — grounded search over security standards\n");

        println!("Quick start:");
        println!("  \x1b[36msecdoc init\x1b[0m                      Create a .secdoc.toml config file");
        println!("  \x1b[36msecdoc build --input pages.json\x1b[0m  Build the index");
        println!("  \x1b[36msecdoc search 'MFA policy'\x1b[0m       Search it\n");

        println!("All commands:");
        println!("  \x1b[32mbuild\x1b[0m     Chunk, index, and persist ingested pages");
        println!("  \x1b[32msearch\x1b[0m    Hybrid BM25 + embedding search with reranking");
        println!("  \x1b[32mstatus\x1b[0m    Show the active index generation");
        println!("  \x1b[32mdoctor\x1b[0m    Check your setup and environment");
        println!("  \x1b[32minit\x1b[0m      Create default configuration\n");
    } else {
        println!("secdoc v{version} — grounded search over security standards\n");

        println!("Quick start:");
        println!("  secdoc init                      Create a .secdoc.toml config file");
        println!("  secdoc build --input pages.json  Build the index");
        println!("  secdoc search 'MFA policy'       Search it\n");

        println!("All commands:");
        println!("  build     Chunk, index, and persist ingested pages");
        println!("  search    Hybrid BM25 + embedding search with reranking");
        println!("  status    Show the active index generation");
        println!("  doctor    Check your setup and environment");
        println!("  init      Create default configuration\n");
    }

    println!("Run 'secdoc <command> --help' for details.");
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<SecdocConfig> {
    let mut config = match path {
        Some(path) => SecdocConfig::from_file(path)?,
        None => {
            let default_path = Path::new(".secdoc.toml");
            if default_path.exists() {
                SecdocConfig::from_file(default_path)?
            } else {
                SecdocConfig::default()
            }
        }
    };
    config.apply_env()?;
    tracing::debug!(
        root = %config.index.root.display(),
        embedding = %config.embedding.model,
        reranker = %config.reranker.model,
        "configuration loaded"
    );
    Ok(config)
}

fn http_engine(config: &SecdocConfig) -> Result<HttpEngine> {
    let embedder = HttpEmbedder::with_config(&config.embedding)?;
    let scorer = HttpRelevanceScorer::with_config(&config.reranker)?;
    Ok(Engine::new(config, embedder, scorer)?)
}

fn spinner(message: &'static str) -> Option<indicatif::ProgressBar> {
    if !std::io::stderr().is_terminal() {
        return None;
    }
    let pb = indicatif::ProgressBar::new_spinner();
    if let Ok(style) = indicatif::ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    Some(pb)
}

fn print_stats(stats: &IndexStats, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(stats).into_diagnostic()?);
        }
        OutputFormat::Markdown => {
            println!("| generation | chunks | sources | dimensions |");
            println!("|---|---|---|---|");
            println!(
                "| `{}` | {} | {} | {} |",
                stats.generation, stats.total_chunks, stats.total_sources, stats.dimensions
            );
        }
        OutputFormat::Text => {
            println!("generation  {}", stats.generation);
            println!("chunks      {}", stats.total_chunks);
            println!("sources     {}", stats.total_sources);
            println!("dimensions  {}", stats.dimensions);
        }
    }
    Ok(())
}

fn print_results(results: &[RankedChunk], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(results).into_diagnostic()?);
        }
        OutputFormat::Markdown => {
            if results.is_empty() {
                println!("No results found.");
            } else {
                println!("# Search Results\n");
                for (i, r) in results.iter().enumerate() {
                    println!(
                        "## {}. {} (score: {:.4})\n\n> {}\n",
                        i + 1,
                        r.chunk.citation(),
                        r.score,
                        r.chunk.content.replace('\n', "\n> "),
                    );
                }
            }
        }
        OutputFormat::Text => {
            if results.is_empty() {
                println!("No results found.");
            } else {
                for (i, r) in results.iter().enumerate() {
                    println!(
                        "{}. {} [{}] (score: {:.4})",
                        i + 1,
                        r.chunk.citation(),
                        r.chunk.language,
                        r.score,
                    );
                    let preview: String = r
                        .chunk
                        .content
                        .lines()
                        .filter(|l| !l.trim().is_empty())
                        .take(3)
                        .map(|l| format!("   {l}"))
                        .collect::<Vec<_>>()
                        .join("\n");
                    println!("{preview}\n");
                }
            }
        }
    }
    Ok(())
}

#[derive(serde::Serialize)]
struct CheckResult {
    name: &'static str,
    status: &'static str,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

impl CheckResult {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: "pass",
            detail: detail.into(),
            hint: None,
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name,
            status: "fail",
            detail: detail.into(),
            hint: Some(hint.into()),
        }
    }

    fn info(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: "info",
            detail: detail.into(),
            hint: None,
        }
    }

    fn symbol(&self) -> &'static str {
        match self.status {
            "pass" => "\u{2713}",
            "fail" => "\u{2717}",
            _ => "~",
        }
    }

    fn colored_symbol(&self) -> String {
        match self.status {
            "pass" => "\x1b[32m\u{2713}\x1b[0m".into(),
            "fail" => "\x1b[31m\u{2717}\x1b[0m".into(),
            _ => "\x1b[33m~\x1b[0m".into(),
        }
    }
}

fn run_doctor(
    config: &SecdocConfig,
    config_path: &Path,
    format: OutputFormat,
    use_color: bool,
) -> Result<()> {
    let mut checks: Vec<CheckResult> = Vec::new();

    // 1. Config file
    if config_path.exists() {
        checks.push(CheckResult::pass(
            "config_file",
            format!("{} found", config_path.display()),
        ));
    } else {
        checks.push(CheckResult::fail(
            "config_file",
            format!("{} not found", config_path.display()),
            "run 'secdoc init' to create a default config",
        ));
    }
    match config.validate() {
        Ok(()) => checks.push(CheckResult::pass(
            "config_values",
            format!(
                "chunk_size {}, overlap {}, retrieval_k {}, top_n {}",
                config.chunking.chunk_size,
                config.chunking.overlap,
                config.retrieval.retrieval_k,
                config.retrieval.rerank_top_n
            ),
        )),
        Err(e) => checks.push(CheckResult::fail(
            "config_values",
            e.to_string(),
            "fix the value in .secdoc.toml or the environment",
        )),
    }

    // 2. Model endpoints
    checks.push(CheckResult::info(
        "embedding_model",
        format!("{} at {}", config.embedding.model, config.embedding.base_url),
    ));
    checks.push(CheckResult::info(
        "reranker_model",
        format!("{} at {}", config.reranker.model, config.reranker.base_url),
    ));

    // 3. Tokenizer dictionary
    match &config.tokenizer.dictionary {
        Some(path) if path.exists() => checks.push(CheckResult::pass(
            "thai_dictionary",
            format!("built-in + {}", path.display()),
        )),
        Some(path) => checks.push(CheckResult::fail(
            "thai_dictionary",
            format!("{} not found", path.display()),
            "fix [tokenizer] dictionary in .secdoc.toml",
        )),
        None => checks.push(CheckResult::info("thai_dictionary", "built-in word list")),
    }

    // 4. Persisted index
    let store = IndexStore::new(config.index.root.clone());
    match store.load() {
        Ok(Some(pair)) => {
            let stats = pair.stats();
            checks.push(CheckResult::pass(
                "index",
                format!(
                    "{} ({} chunks from {} sources)",
                    stats.generation, stats.total_chunks, stats.total_sources
                ),
            ));
        }
        Ok(None) => checks.push(CheckResult::info(
            "index",
            format!(
                "none under {} (run 'secdoc build --input <pages.json>')",
                store.root().display()
            ),
        )),
        Err(e) => checks.push(CheckResult::fail(
            "index",
            e.to_string(),
            "run 'secdoc build --input <pages.json>' to write a fresh generation",
        )),
    }

    match format {
        OutputFormat::Json => {
            let version = env!("CARGO_PKG_VERSION");
            let json = serde_json::json!({
                "version": version,
                "checks": checks,
            });
            println!("{}", serde_json::to_string_pretty(&json).into_diagnostic()?);
        }
        _ => {
            let version = env!("CARGO_PKG_VERSION");
            println!("secdoc v{version} — Environment Check\n");

            for check in &checks {
                let sym = if use_color {
                    check.colored_symbol()
                } else {
                    check.symbol().to_string()
                };
                let label = check.name.replace('_', " ");
                println!("  {sym} {label:<20} {}", check.detail);
                if let Some(hint) = &check.hint {
                    println!("    hint: {hint}");
                }
            }

            let passed = checks.iter().filter(|c| c.status == "pass").count();
            let failed = checks.iter().filter(|c| c.status == "fail").count();
            let info = checks.iter().filter(|c| c.status == "info").count();
            println!("\n{passed} checks passed, {failed} failed, {info} info");
        }
    }

    Ok(())
}

const DEFAULT_CONFIG: &str = r#"# secdoc configuration
# Environment variables override these values:
# DATABASE_PATH, CHUNK_SIZE, CHUNK_OVERLAP, RETRIEVAL_K, RERANK_TOP_N,
# EMBEDDING_MODEL_NAME, RERANKER_MODEL_NAME, EMBEDDING_BATCH_SIZE

[index]
# root = "database"

[chunking]
# chunk_size = 1100
# overlap = 200

[retrieval]
# retrieval_k = 15
# rerank_top_n = 5
# lexical_weight = 0.4
# semantic_weight = 0.6
# fusion = "reciprocal_rank"   # or "min_max"
# rank_constant = 60

[embedding]
# OpenAI-compatible /embeddings endpoint
# base_url = "http://localhost:8080/v1"
# model = "intfloat/multilingual-e5-small"
# api_key = ""                 # or EMBEDDING_API_KEY
# batch_size = 32
# timeout_secs = 120

[reranker]
# text-embeddings-inference style /rerank endpoint
# base_url = "http://localhost:8081"
# model = "BAAI/bge-reranker-base"
# api_key = ""                 # or RERANKER_API_KEY
# timeout_secs = 120

[tokenizer]
# Extra Thai words, one per line
# dictionary = "thai_terms.txt"
"#;

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .expect("miette handler");
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let use_color = match cli.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => std::io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    };

    match cli.command {
        None => {
            print_welcome(use_color);
        }
        Some(Command::Init) => {
            let path = Path::new(".secdoc.toml");
            if path.exists() {
                miette::bail!(".secdoc.toml already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created .secdoc.toml with default configuration");
        }
        Some(Command::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "secdoc", &mut std::io::stdout());
        }
        Some(Command::Doctor) => {
            let config = load_config(cli.config.as_deref())?;
            let config_path = cli
                .config
                .clone()
                .unwrap_or_else(|| PathBuf::from(".secdoc.toml"));
            run_doctor(&config, &config_path, cli.format, use_color)?;
        }
        Some(Command::Status) => {
            let config = load_config(cli.config.as_deref())?;
            let store = IndexStore::new(config.index.root.clone());
            match store.load()? {
                Some(pair) => print_stats(&pair.stats(), cli.format)?,
                None => {
                    return Err(miette::miette!(
                        help = "run 'secdoc build --input <pages.json>' to create one",
                        "no index found under {}",
                        store.root().display()
                    ));
                }
            }
        }
        Some(Command::Build { ref input }) => {
            let config = load_config(cli.config.as_deref())?;
            let engine = http_engine(&config)?;
            let pages = secdoc_retrieval::ingest::load_pages(input)?;

            let pb = spinner("Embedding and indexing pages...");
            let outcome = engine.build(&pages).await;
            if let Some(pb) = pb {
                pb.finish_and_clear();
            }

            match outcome? {
                BuildOutcome::Built(stats) => print_stats(&stats, cli.format)?,
                BuildOutcome::SkippedEmpty => {
                    eprintln!("{} contains no page content; index unchanged", input.display());
                }
            }
        }
        Some(Command::Search {
            ref query,
            ref input,
        }) => {
            let config = load_config(cli.config.as_deref())?;
            let engine = http_engine(&config)?;

            let ready = match input {
                Some(path) => {
                    let pb = spinner("Loading or building index...");
                    let ready = engine.init_or_build(path).await;
                    if let Some(pb) = pb {
                        pb.finish_and_clear();
                    }
                    ready?
                }
                None => engine.try_load()?,
            };
            if !ready {
                return Err(miette::miette!(
                    help = "run 'secdoc build --input <pages.json>' or pass --input",
                    "no index found under {}",
                    config.index.root.display()
                ));
            }

            let results = engine.search_with_scores(query).await?;
            print_results(&results, cli.format)?;
        }
    }

    Ok(())
}
