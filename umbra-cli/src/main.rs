//! Umbra CLI
//!
//! Anonymized dark web investigations from the command line.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;

use umbra_core::{engines_by_weight, CacheLayer, CancellationToken, Investigation, InvestigationStatus, UmbraConfig};
use umbra_runtime::InvestigationRunner;
use umbra_stages::{
    create_anthropic_backend, create_backend, AnthropicConfig, CapabilityRegistry, OpenAIBackendConfig, SharedBackend,
};
use umbra_tor::{check_connection, SocksTransport, TransportManager};

#[derive(Parser)]
#[command(name = "umbra")]
#[command(author, version, about = "Umbra: anonymized dark web investigations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (0-3)
    #[arg(short, long, default_value = "1")]
    verbose: u8,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "UMBRA_CONFIG")]
    config: Option<PathBuf>,

    /// SOCKS proxy address, overrides the config file
    #[arg(long, global = true, env = "UMBRA_SOCKS_ADDR")]
    socks: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an investigation
    Investigate {
        /// The search query
        #[arg(short, long)]
        query: String,

        /// Comma-separated engine names (default: all)
        #[arg(long, value_delimiter = ',')]
        engines: Vec<String>,

        /// Maximum merged search results
        #[arg(long)]
        limit: Option<usize>,

        #[command(flatten)]
        summary: SummaryArgs,

        /// Output file for the investigation JSON (default: investigation_<timestamp>.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Continue a saved, unfinished investigation
    Resume {
        /// Investigation JSON written by `investigate`
        file: PathBuf,

        #[command(flatten)]
        summary: SummaryArgs,

        /// Output file (default: overwrite the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check the SOCKS proxy and onion reachability
    Status,

    /// List search engines and their merge weights
    Engines,
}

#[derive(Clone, Copy, ValueEnum)]
enum Provider {
    Anthropic,
    Openai,
    Openrouter,
}

impl Provider {
    fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Openai => "openai",
            Self::Openrouter => "openrouter",
        }
    }
}

#[derive(Args)]
struct SummaryArgs {
    /// Skip the LLM summary
    #[arg(long)]
    no_summary: bool,

    /// Completion provider
    #[arg(long, value_enum, default_value = "anthropic")]
    provider: Provider,

    /// LLM model to use
    #[arg(short, long, default_value = "claude-sonnet-4-20250514")]
    model: String,

    /// Anthropic API key (or set ANTHROPIC_API_KEY env var)
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    anthropic_key: Option<String>,

    /// OpenAI API key (or set OPENAI_API_KEY env var)
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// OpenRouter API key (or set OPENROUTER_API_KEY env var)
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    openrouter_key: Option<String>,
}

impl SummaryArgs {
    /// None when summaries are off or the provider has no key
    fn backend(&self) -> Result<Option<SharedBackend>> {
        if self.no_summary {
            return Ok(None);
        }

        let key = match self.provider {
            Provider::Anthropic => self.anthropic_key.as_deref(),
            Provider::Openai => self.api_key.as_deref(),
            Provider::Openrouter => self.openrouter_key.as_deref(),
        };
        let Some(key) = key else {
            warn!("No API key for {}, continuing without a summary", self.provider.as_str());
            return Ok(None);
        };

        let backend = match self.provider {
            Provider::Anthropic => create_anthropic_backend(AnthropicConfig::new(key, &self.model))?,
            Provider::Openai => create_backend(OpenAIBackendConfig::openai(key, &self.model))?,
            Provider::Openrouter => create_backend(OpenAIBackendConfig::openrouter(key, &self.model))?,
        };
        Ok(Some(backend))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let mut config = match &cli.config {
        Some(path) => UmbraConfig::load(path)?,
        None => UmbraConfig::default(),
    };
    if let Some(socks) = cli.socks {
        config.transport.socks_addr = socks;
    }

    match cli.command {
        Commands::Investigate {
            query,
            engines,
            limit,
            summary,
            output,
        } => {
            if !engines.is_empty() {
                config.search.engines = engines;
            }
            if let Some(limit) = limit {
                config.search.limit = limit;
            }
            config.validate()?;

            let output = output.unwrap_or_else(|| {
                let timestamp = chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S");
                PathBuf::from(format!("investigation_{}.json", timestamp))
            });
            investigate(config, Pending::Query(query), &summary, &output).await?;
        }
        Commands::Resume { file, summary, output } => {
            let saved = fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let investigation: Investigation = serde_json::from_str(&saved)?;
            let output = output.unwrap_or(file);
            investigate(config, Pending::Saved(Box::new(investigation)), &summary, &output).await?;
        }
        Commands::Status => check_status(&config).await?,
        Commands::Engines => list_engines(&config),
    }

    Ok(())
}

enum Pending {
    Query(String),
    Saved(Box<Investigation>),
}

async fn investigate(mut config: UmbraConfig, pending: Pending, summary: &SummaryArgs, output: &Path) -> Result<()> {
    println!("🕵️ Umbra - Anonymized Dark Web Investigation\n");

    let transport = Arc::new(TransportManager::new(
        Arc::new(SocksTransport::new(&config.transport)),
        config.transport.clone(),
    ));
    let cache = Arc::new(CacheLayer::new(&config.cache));
    let mut registry = CapabilityRegistry::with_default_engines(transport.clone());

    match summary.backend()? {
        Some(backend) => {
            println!("📡 Provider: {} | Model: {}", summary.provider.as_str(), backend.model_name());
            registry.register_backend(summary.provider.as_str(), backend);
            config.summarizer.provider = Some(summary.provider.as_str().to_string());
        }
        None => config.summarizer.enabled = false,
    }
    println!("🔌 Proxy: {}", config.transport.socks_addr);

    let runner = InvestigationRunner::new(config, transport.clone(), cache, &registry)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n⚠️  Interrupted, cancelling investigation...");
            on_interrupt.cancel();
        }
    });

    let investigation = match pending {
        Pending::Query(query) => {
            println!("🔍 Query: {}\n", query);
            runner.run(&query, &cancel).await
        }
        Pending::Saved(saved) => {
            println!("🔁 Resuming {} at {}\n", saved.id(), saved.status());
            runner.resume(*saved, &cancel).await?
        }
    };
    transport.shutdown();

    fs::write(output, serde_json::to_string_pretty(&investigation)?)
        .with_context(|| format!("writing {}", output.display()))?;

    report(&investigation);
    println!("📄 Investigation saved to: {}", output.display());
    Ok(())
}

fn report(investigation: &Investigation) {
    let marker = if investigation.status() == InvestigationStatus::Completed {
        "✅"
    } else {
        "❌"
    };
    println!("\n{} Investigation {}: {}", marker, investigation.id(), investigation.status());
    println!(
        "   {} results, {} pages, {} entities",
        investigation.results().len(),
        investigation.contents().len(),
        investigation.entities().len()
    );
    if let Some(assessment) = investigation.assessment() {
        println!("   Threat score: {}/10 ({:?})", assessment.score, assessment.level);
        println!("   {}", assessment.rationale);
    }

    let warnings = investigation.warnings().count();
    println!(
        "   Errors: {} | Warnings: {}",
        investigation.errors().len() - warnings,
        warnings
    );
    for error in investigation.errors() {
        println!(
            "   - [{}] {:?}{}: {}",
            error.stage,
            error.kind,
            error.subject.as_deref().map(|s| format!(" ({})", s)).unwrap_or_default(),
            error.message
        );
    }

    if let Some(summary) = investigation.summary() {
        println!("\n{}", "=".repeat(60));
        let preview: String = summary.chars().take(1000).collect();
        println!("{}", preview);
        if summary.chars().count() > 1000 {
            println!("...\n[truncated - see full summary in output file]");
        }
    }
}

async fn check_status(config: &UmbraConfig) -> Result<()> {
    println!("🔌 Checking anonymity proxy...\n");

    match check_connection(&config.transport).await {
        Ok(true) => {
            println!("✅ Tor is running and onion services are reachable");
            println!("   Proxy: {}", config.transport.socks_addr);
        }
        Ok(false) => {
            println!("⚠️  Proxy answers but the probe onion did not");
            println!("   Proxy: {}", config.transport.socks_addr);
        }
        Err(e) => {
            println!("❌ Proxy not accessible: {}", e);
            println!("   Expected proxy at: {}", config.transport.socks_addr);
            println!("\n   To install Tor:");
            println!("   - Linux: sudo apt install tor");
            println!("   - Mac: brew install tor");
            println!("   - Then start: sudo systemctl start tor (or brew services start tor)");
        }
    }

    Ok(())
}

fn list_engines(config: &UmbraConfig) {
    println!("🔎 Search engines (merge weight):\n");
    for engine in engines_by_weight() {
        let weight = config
            .search
            .engine_weights
            .get(engine.name)
            .copied()
            .unwrap_or(engine.weight);
        println!("   {:<18} {:.2}", engine.name, weight);
    }
}
