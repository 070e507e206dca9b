//! pr-engine - preview and integrate branches of local git repositories

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use pr_engine::types::IntegrationStrategy;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cli;

/// pr-engine - pull request integration engine
#[derive(Parser, Debug)]
#[command(name = "pr-engine")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file (default: platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace); `RUST_LOG` wins when set
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Preview integrating a source branch into a target branch
    Preview {
        #[command(flatten)]
        request: RequestArgs,

        /// Keep the pull request refs in the target repository
        #[arg(long)]
        keep_refs: bool,
    },

    /// Integrate a source branch into a target branch
    Integrate {
        #[command(flatten)]
        request: RequestArgs,

        /// Comment recorded with the integration
        #[arg(short = 'm', long)]
        comment: Option<String>,

        /// Preview only; don't move any branch
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Args, Debug)]
struct RequestArgs {
    /// Path to the target repository
    #[arg(short, long, default_value = ".")]
    path: PathBuf,

    /// Branch to integrate
    #[arg(short, long)]
    source: String,

    /// Branch to integrate into
    #[arg(short, long)]
    target: String,

    /// Repository holding the source branch (default: the target repository)
    #[arg(long)]
    source_repo: Option<PathBuf>,

    /// Integration strategy (default: first applicable policy strategy)
    #[arg(long)]
    strategy: Option<IntegrationStrategy>,

    /// Pull request title
    #[arg(long)]
    title: Option<String>,

    /// Acting user (default: $USER)
    #[arg(long)]
    user: Option<String>,
}

impl RequestArgs {
    fn into_options(self) -> cli::RequestOptions {
        cli::RequestOptions {
            path: self.path,
            source_repo: self.source_repo,
            source: self.source,
            target: self.target,
            strategy: self.strategy,
            title: self.title,
            user: self.user.or_else(|| std::env::var("USER").ok()),
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "pr_engine=debug,info",
        _ => "pr_engine=trace,debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli.config.or_else(pr_engine::config::default_config_path);

    match cli.command {
        Commands::Preview { request, keep_refs } => {
            cli::run_preview(
                config_path.as_deref(),
                request.into_options(),
                cli::PreviewOptions { keep_refs },
            )
            .await?;
        }
        Commands::Integrate {
            request,
            comment,
            dry_run,
        } => {
            cli::run_integrate(
                config_path.as_deref(),
                request.into_options(),
                cli::IntegrateOptions { comment, dry_run },
            )
            .await?;
        }
    }

    Ok(())
}
