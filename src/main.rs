use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use litera::io::{combine_reference_files, count_characters, read_article};
use litera::stages::analyze_reference;
use litera::{
    find_mechanical_words, AdvanceOutcome, AppConfig, ArtifactStore, ChatClient, ChatConfig,
    CompletionProvider, FsArtifactStore, MemoryArtifactStore, ReferenceKind, ReferenceMaterial,
    SessionMachine, StageEvent, StageObserver,
};

#[derive(Parser)]
#[command(name = "litera")]
#[command(author, version, about = "Multi-expert article revision pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum RefKindArg {
    Document,
    Article,
}

impl From<RefKindArg> for ReferenceKind {
    fn from(kind: RefKindArg) -> Self {
        match kind {
            RefKindArg::Document => ReferenceKind::Document,
            RefKindArg::Article => ReferenceKind::Article,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Revise an article through the expert rounds and print the final result
    Polish {
        /// Article to revise (UTF-8 text)
        #[arg(short, long)]
        input: PathBuf,

        /// Reference files whose style should guide the revision
        #[arg(short, long)]
        reference: Vec<PathBuf>,

        /// How to treat the reference files
        #[arg(long, value_enum, default_value = "article")]
        reference_kind: RefKindArg,

        /// Style summary to use instead of (or without) reference analysis
        #[arg(long)]
        style: Option<String>,

        /// Number of rounds (defaults to the configured value)
        #[arg(long)]
        rounds: Option<u32>,

        /// Configuration file
        #[arg(short, long, default_value = "litera.json")]
        config: PathBuf,

        /// Write the final polished article here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory for per-stage artifacts
        #[arg(long, default_value = "agent_outputs")]
        artifacts_dir: PathBuf,

        /// Keep artifacts in memory only
        #[arg(long, conflicts_with = "artifacts_dir")]
        no_artifacts: bool,

        /// Wait for complete responses instead of streaming
        #[arg(long)]
        no_stream: bool,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// List configured stock phrases that occur in a text
    Scan {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long, default_value = "litera.json")]
        config: PathBuf,
    },

    /// Replace the configured stock phrases with those listed in a file, one per line
    SetPhrases {
        #[arg(short, long)]
        from: PathBuf,

        #[arg(short, long, default_value = "litera.json")]
        config: PathBuf,
    },

    /// Write the default configuration file
    InitConfig {
        #[arg(short, long, default_value = "litera.json")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Polish {
            input,
            reference,
            reference_kind,
            style,
            rounds,
            config,
            output,
            artifacts_dir,
            no_artifacts,
            no_stream,
            verbose,
        } => {
            setup_logging(verbose);
            let artifacts: Arc<dyn ArtifactStore> = if no_artifacts {
                Arc::new(MemoryArtifactStore::new())
            } else {
                Arc::new(FsArtifactStore::new(artifacts_dir))
            };
            polish(PolishArgs {
                input,
                reference,
                reference_kind: reference_kind.into(),
                style,
                rounds,
                config,
                output,
                artifacts,
                stream: !no_stream,
            })
            .await
        }
        Commands::Scan { input, config } => {
            setup_logging(false);
            scan(&input, &config)
        }
        Commands::SetPhrases { from, config } => {
            setup_logging(false);
            set_phrases(&from, &config)
        }
        Commands::InitConfig { path } => {
            setup_logging(false);
            AppConfig::default().save(&path)?;
            println!("Wrote default configuration to {}", path.display());
            Ok(())
        }
    }
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

struct PolishArgs {
    input: PathBuf,
    reference: Vec<PathBuf>,
    reference_kind: ReferenceKind,
    style: Option<String>,
    rounds: Option<u32>,
    config: PathBuf,
    output: Option<PathBuf>,
    artifacts: Arc<dyn ArtifactStore>,
    stream: bool,
}

/// Prints streamed expert output to stdout, one header per stage
#[derive(Default)]
struct ConsoleObserver {
    current: Mutex<Option<(u32, String)>>,
}

impl StageObserver for ConsoleObserver {
    fn on_stage_event(&self, event: &StageEvent) {
        let Ok(mut current) = self.current.lock() else {
            return;
        };
        let key = (event.round_number, event.stage_name.clone());
        let mut stdout = std::io::stdout().lock();

        if current.as_ref() != Some(&key) {
            let _ = writeln!(stdout, "\n== Round {} | {} ==", event.round_number, event.stage_name);
            *current = Some(key);
            // Non-streamed stages arrive only as a completion event
            if !event.is_chunk {
                let _ = writeln!(stdout, "{}", event.content);
            }
        }

        if event.is_chunk {
            if let Some(delta) = &event.delta {
                let _ = write!(stdout, "{}", delta);
            }
        } else if event.is_error {
            let _ = writeln!(stdout, "\n[stage failed] {}", event.content);
        }
        let _ = stdout.flush();
    }
}

async fn polish(args: PolishArgs) -> Result<()> {
    let mut config = AppConfig::load(&args.config).context("Failed to load configuration")?;
    config.streaming = config.streaming && args.stream;

    let article = read_article(&args.input)?;
    if article.trim().is_empty() {
        bail!("Article {:?} is empty", args.input);
    }

    let chat_config = ChatConfig::from_settings(&config.api)?;
    info!("Using model {}", chat_config.model);
    let client: Arc<dyn CompletionProvider> = Arc::new(ChatClient::new(chat_config)?);

    let mut article_ref = None;
    let mut document_ref = None;
    if !args.reference.is_empty() {
        let combined = combine_reference_files(&args.reference)?;
        match analyze_reference(client.as_ref(), args.reference_kind, &combined).await {
            Ok(Some(reference)) => match args.reference_kind {
                ReferenceKind::Document => document_ref = Some(reference),
                _ => article_ref = Some(reference),
            },
            Ok(None) => warn!("Reference files were empty; using the article itself"),
            Err(e) => warn!("Reference analysis failed, continuing without it: {}", e),
        }
    }
    let reference = ReferenceMaterial::select(article_ref, document_ref, &article, args.style.as_deref());

    let machine = Arc::new(
        SessionMachine::new(config, client, args.artifacts)?
            .with_observer(Arc::new(ConsoleObserver::default())),
    );

    // Ctrl-C lets the in-flight round finish
    let stopper = Arc::clone(&machine);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping after the current round");
            stopper.request_stop();
        }
    });

    let outcome = machine.run_to_completion(&article, reference, args.rounds).await;
    println!();

    let (artifact, history) = match outcome {
        AdvanceOutcome::Final { artifact, history } => (artifact, history),
        AdvanceOutcome::Declined(reason) => {
            let snapshot = machine.snapshot();
            bail!(
                "Session declined after {}/{} rounds: {}",
                snapshot.current_round,
                snapshot.max_rounds,
                reason
            )
        }
        AdvanceOutcome::Round(_) => bail!("Session ended before finalization"),
    };

    for round in history.iter().filter(|r| r.is_error()) {
        warn!(
            "Round {} had an error: {}",
            round.round_number,
            round.error_message.as_deref().unwrap_or_default()
        );
    }
    if let Some(error) = &artifact.error_message {
        warn!("Final synthesis failed ({}); the original article is returned", error);
    }

    println!("== Final polished result ==\n");
    println!("{}", artifact.final_result);
    println!(
        "\nOriginal: {} characters | Polished: {} characters | Rounds: {}",
        count_characters(&article),
        count_characters(&artifact.final_result),
        history.len()
    );

    if let Some(output) = &args.output {
        write_output(output, &artifact.final_result)?;
        info!("Final result written to {:?}", output);
    }

    Ok(())
}

fn write_output(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).with_context(|| format!("Failed to write file: {:?}", path))
}

fn scan(input: &Path, config: &Path) -> Result<()> {
    let config = AppConfig::load(config).context("Failed to load configuration")?;
    let text = read_article(input)?;
    let found = find_mechanical_words(&text, &config.mechanical_words);

    println!("Found {} stock phrases", found.len());
    for phrase in found {
        println!("- {}", phrase);
    }
    Ok(())
}

fn set_phrases(from: &Path, config_path: &Path) -> Result<()> {
    let mut config = AppConfig::load(config_path).context("Failed to load configuration")?;
    let list = read_article(from)?;

    let count = config.set_mechanical_words_from_lines(&list);
    config.save(config_path)?;

    println!("Saved {} stock phrases to {}", count, config_path.display());
    Ok(())
}
