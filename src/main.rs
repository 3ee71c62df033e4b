//! CLI entry point for the passage retrieval pipeline.
//!
//! Commands: `init`, `ingest`, `build`, `query`, `info` and `config`.
//! Every failure is mapped to a stable [`ExitCode`].

use clap::{
    ArgAction, Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use quarry::config::CONFIG_DIR;
use quarry::display::{
    THEME, create_index_table, create_ingest_table, create_progress_bar, create_results_table,
    create_spinner,
};
use quarry::{
    ExitCode, FastEmbedGenerator, JsonPassageStore, PassageId, PassageStore, Pipeline,
    PromptAssembler, QuarryError, QuarryResult, RetrievedPassage, Retriever, Settings,
    VectorSearchEngine, ingest_directory,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt};

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Compressed passage retrieval for RAG
#[derive(Parser)]
#[command(
    name = "quarry",
    version = env!("CARGO_PKG_VERSION"),
    about = "Compressed passage retrieval for RAG",
    long_about = "Ingest documents, build an IVF-PQ index over their passages, and retrieve context for questions.",
    after_help = "Quick Start:\n  $ quarry init\n  $ quarry ingest data/\n  $ quarry build\n  $ quarry query \"When are tuition fees due?\" --prompt",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Log at debug level (same as `debug = true` in settings)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Initialize project
    #[command(about = "Set up .quarry directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Chunk documents into the passage store
    #[command(
        about = "Load text documents into the passage store",
        after_help = "Examples:\n  quarry ingest\n  quarry ingest handbook/ --append"
    )]
    Ingest {
        /// Directory to scan (overrides [ingest] data_dir)
        dir: Option<PathBuf>,

        /// Keep existing passages instead of replacing them
        #[arg(long)]
        append: bool,
    },

    /// Train and save the index
    #[command(about = "Embed every stored passage and build the IVF-PQ index")]
    Build {
        /// Number of threads to use (overrides config)
        #[arg(short, long)]
        threads: Option<usize>,

        /// Number of inverted lists (overrides config)
        #[arg(long)]
        nlist: Option<usize>,
    },

    /// Retrieve passages for a question
    #[command(
        about = "Retrieve the passages closest to a question",
        after_help = "Examples:\n  quarry query \"library opening hours\"\n  quarry query \"exam dates\" -k 10 --nprobe 4\n  quarry query \"exam dates\" --json | jq '.passages[].passage.doc_id'"
    )]
    Query {
        /// Question text
        query: String,

        /// Passages to return (overrides [retrieval] top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Inverted lists to probe (overrides [retrieval] nprobe)
        #[arg(short, long)]
        nprobe: Option<usize>,

        /// Print the assembled generation prompt
        #[arg(long)]
        prompt: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show index statistics
    #[command(about = "Display the saved index geometry and list balance")]
    Info {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show current configuration settings
    #[command(about = "Display active settings from .quarry/settings.toml")]
    Config,
}

#[derive(Debug, Serialize)]
struct QueryOutput<'a> {
    query: &'a str,
    top_k: usize,
    nprobe: usize,
    passages: &'a [RetrievedPassage],
    dropped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ErrorOutput<'a> {
    status: &'static str,
    code: &'static str,
    message: String,
    suggestions: Vec<&'a str>,
}

fn main() {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => match Settings::load_from(path) {
            Ok(settings) => settings,
            Err(e) => {
                let error = QuarryError::ConfigLoad(e);
                report_error(&error, false);
                std::process::exit(ExitCode::from_error(&error).into());
            }
        },
        None => Settings::load().unwrap_or_else(|e| {
            eprintln!("Configuration error: {e}");
            eprintln!("Using default configuration.");
            Settings::default()
        }),
    };

    init_logging(cli.verbose, cli.debug || settings.debug);

    let json = matches!(
        cli.command,
        Commands::Query { json: true, .. } | Commands::Info { json: true }
    );
    let exit_code = match run(cli.command, settings) {
        Ok(code) => code,
        Err(error) => {
            report_error(&error, json);
            ExitCode::from_error(&error)
        }
    };
    std::process::exit(exit_code.into());
}

fn init_logging(verbose: u8, debug: bool) {
    let filter = match (verbose, debug) {
        (_, true) | (2.., _) => EnvFilter::new("debug"),
        (1, _) => EnvFilter::new("info"),
        _ => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn report_error(error: &QuarryError, json: bool) {
    let suggestions = error.recovery_suggestions();
    if json {
        let output = ErrorOutput {
            status: "error",
            code: error.status_code(),
            message: error.to_string(),
            suggestions,
        };
        match serde_json::to_string_pretty(&output) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("Error serializing output: {e}"),
        }
        return;
    }

    eprintln!("{}", THEME.error_with_icon(&error.to_string()));
    for suggestion in suggestions {
        eprintln!("  {}", THEME.apply(&THEME.dim, format!("- {suggestion}")));
    }
}

fn run(command: Commands, mut settings: Settings) -> QuarryResult<ExitCode> {
    match command {
        Commands::Init { force } => run_init(force),
        Commands::Config => {
            println!("Current Configuration:");
            println!("{}", "=".repeat(50));
            match toml::to_string_pretty(&settings) {
                Ok(toml_str) => println!("{toml_str}"),
                Err(e) => eprintln!("Error displaying config: {e}"),
            }
            Ok(ExitCode::Success)
        }
        Commands::Ingest { dir, append } => {
            if let Some(dir) = dir {
                settings.ingest.data_dir = dir;
            }
            run_ingest(&settings, append)
        }
        Commands::Build { threads, nlist } => {
            if let Some(threads) = threads {
                settings.index.training_threads = threads;
            }
            if nlist.is_some() {
                settings.index.nlist = nlist;
            }
            run_build(&settings)
        }
        Commands::Query {
            query,
            top_k,
            nprobe,
            prompt,
            json,
        } => {
            if let Some(top_k) = top_k {
                settings.retrieval.top_k = top_k;
            }
            if let Some(nprobe) = nprobe {
                settings.retrieval.nprobe = nprobe;
            }
            run_query(&settings, &query, prompt, json)
        }
        Commands::Info { json } => run_info(&settings, json),
    }
}

fn run_init(force: bool) -> QuarryResult<ExitCode> {
    let config_path = PathBuf::from(CONFIG_DIR).join("settings.toml");

    if config_path.exists() && !force {
        eprintln!(
            "Configuration file already exists at: {}",
            config_path.display()
        );
        eprintln!("Use --force to overwrite");
        return Ok(ExitCode::GeneralError);
    }

    let path = Settings::init_config_file(force).map_err(|e| QuarryError::InvalidConfig {
        reason: e.to_string(),
    })?;
    println!(
        "{}",
        THEME.success_with_icon(&format!("Created configuration file at: {}", path.display()))
    );
    println!("Edit this file to customize your settings.");
    Ok(ExitCode::Success)
}

fn run_ingest(settings: &Settings, append: bool) -> QuarryResult<ExitCode> {
    settings.validate()?;

    let mut ingest = settings.ingest.clone();
    ingest.data_dir = settings.resolve(&ingest.data_dir);
    let store_path = settings.resolve(&settings.store_path);

    let store = JsonPassageStore::open(&store_path)?;
    if !append && !store.is_empty() {
        eprintln!("Replacing {} existing passages", store.len());
        store.clear();
    }

    let start = Instant::now();
    let spinner = create_spinner(&format!("Scanning {}", ingest.data_dir.display()));
    let report = ingest_directory(&ingest, &store, |path, count| {
        spinner.set_message(format!("{} ({count} passages)", path.display()));
    });
    spinner.finish_and_clear();
    let report = report?;
    store.flush()?;

    println!("{}", create_ingest_table(&report, start.elapsed()));
    println!(
        "Passage store: {}",
        THEME.apply(&THEME.path, store_path.display())
    );
    if report.passages > 0 {
        println!("Run 'quarry build' to index the new passages.");
    }
    Ok(ExitCode::Success)
}

fn load_embedder(settings: &Settings, show_progress: bool) -> QuarryResult<FastEmbedGenerator> {
    let cache_dir = settings.resolve(&settings.embedding.cache_dir());
    Ok(FastEmbedGenerator::new(
        &settings.embedding.model,
        cache_dir,
        show_progress,
    )?)
}

fn run_build(settings: &Settings) -> QuarryResult<ExitCode> {
    settings.validate()?;

    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.index.training_threads)
        .build_global()
    {
        warn!("could not configure thread pool: {e}");
    }

    let store_path = settings.resolve(&settings.store_path);
    let store = JsonPassageStore::open(&store_path)?;
    let passages = store.passages()?;
    if passages.is_empty() {
        return Err(QuarryError::EmptyStore { path: store_path });
    }

    let embedder = load_embedder(settings, true)?;
    let inputs: Vec<(PassageId, &str)> =
        passages.iter().map(|p| (p.id, p.text.as_str())).collect();

    let start = Instant::now();
    let total = inputs.len();
    let pb = create_progress_bar(total as u64, "embedding passages");
    let built = VectorSearchEngine::build(
        &inputs,
        &embedder,
        settings.index.params(),
        settings.embedding.batch_size,
        |done| {
            pb.set_position(done as u64);
            if done == total {
                pb.set_message("training quantizers");
            }
        },
    );
    pb.finish_and_clear();
    let mut engine = built?;

    let index_dir = settings.resolve(&settings.index_path);
    engine.save(&index_dir)?;

    println!(
        "{}",
        THEME.success_with_icon(&format!(
            "Indexed {} passages in {:.2?}",
            engine.len(),
            start.elapsed()
        ))
    );
    println!("{}", create_index_table(&engine));
    println!("Index: {}", THEME.apply(&THEME.path, index_dir.display()));
    Ok(ExitCode::Success)
}

fn open_engine(settings: &Settings) -> QuarryResult<VectorSearchEngine> {
    let index_dir = settings.resolve(&settings.index_path);
    if !VectorSearchEngine::exists(&index_dir) {
        return Err(QuarryError::IndexNotFound { path: index_dir });
    }
    Ok(VectorSearchEngine::open(&index_dir)?)
}

fn run_query(settings: &Settings, query: &str, show_prompt: bool, json: bool) -> QuarryResult<ExitCode> {
    settings.validate()?;

    let engine = open_engine(settings)?;
    let store = JsonPassageStore::open(settings.resolve(&settings.store_path))?;
    let embedder = load_embedder(settings, !json)?;

    let retriever = Retriever::new(
        Arc::new(engine),
        Arc::new(embedder),
        Arc::new(store),
        &settings.retrieval,
    )?;
    let pipeline = Pipeline::retrieval_only(
        retriever,
        PromptAssembler::default(),
        settings.retrieval.top_k,
    );
    let prepared = pipeline.prepare(query)?;

    if json {
        let output = QueryOutput {
            query,
            top_k: pipeline.top_k(),
            nprobe: pipeline.retriever().nprobe(),
            passages: &prepared.passages,
            dropped: prepared.dropped,
            prompt: Some(prepared.prompt.as_str()),
        };
        match serde_json::to_string_pretty(&output) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("Error serializing output: {e}"),
        }
    } else {
        if prepared.is_empty() {
            println!("No passages found for: {query}");
        } else {
            println!("{}", create_results_table(&prepared.passages));
        }
        if prepared.dropped > 0 {
            eprintln!(
                "{}",
                THEME.warning_with_icon(&format!(
                    "{} hits had no passage in the store; run 'quarry build' to resync",
                    prepared.dropped
                ))
            );
        }
        if show_prompt {
            println!("{}", THEME.apply(&THEME.header, "Prompt:"));
            println!("{}", prepared.prompt);
        }
    }

    if prepared.is_empty() {
        Ok(ExitCode::NotFound)
    } else {
        Ok(ExitCode::Success)
    }
}

fn run_info(settings: &Settings, json: bool) -> QuarryResult<ExitCode> {
    let engine = open_engine(settings)?;
    if json {
        match serde_json::to_string_pretty(engine.metadata()) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("Error serializing output: {e}"),
        }
    } else {
        println!("{}", create_index_table(&engine));
    }
    Ok(ExitCode::Success)
}
