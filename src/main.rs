use clap::{Parser, Subcommand};
use scan_service::TrackerService;
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracker_core::{CoreError, ErrorExt, TrackerConfig};

const DEFAULT_LOG_FILTER: &str =
    "sentiment_tracker=info,scan_service=info,sentiment_analysis=info,reddit_client=info,llm_interface=info,tracker_core=info";

#[derive(Parser, Debug)]
#[command(name = "sentiment-tracker", version, about = "Game community sentiment from Reddit")]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(long, global = true, env = "SENTIMENT_TRACKER_CONFIG")]
    config: Option<PathBuf>,

    /// Print mirror request metrics as JSON on stderr when done
    #[arg(long, global = true)]
    mirror_stats: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze up to five subreddits as one community
    Scan {
        #[arg(required = true, num_args = 1..)]
        subreddits: Vec<String>,

        #[arg(long, default_value = "")]
        game: String,

        #[arg(long, default_value = "")]
        keywords: String,

        /// Skip the per-subreddit breakdown
        #[arg(long)]
        no_breakdown: bool,

        /// Include the sampled posts and comments in the output
        #[arg(long)]
        include_internal: bool,
    },
    /// Analyze a single subreddit
    ScanOne { subreddit: String },
    /// Fetch ranked posts for one or more subreddits
    Posts {
        #[arg(required = true, num_args = 1..)]
        subreddits: Vec<String>,

        #[arg(long, default_value_t = 25)]
        limit: usize,

        /// Cap across all subreddits when more than one is given
        #[arg(long, default_value_t = 150)]
        total: usize,
    },
    /// Fetch the top comments of a post
    Comments {
        post_id: String,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Find subreddits for a game
    Discover {
        game: String,

        #[arg(long, default_value_t = 5)]
        max: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::debug!("Running {:?}", cli.command);
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            e.log_error();
            eprintln!("[{}] {}", e.error_code(), e.user_friendly_message());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CoreError> {
    let config = TrackerConfig::load(cli.config.as_deref())?;
    let service = TrackerService::from_config(&config)?;

    let mirror_stats = cli.mirror_stats;
    let output = match cli.command {
        Command::Scan {
            subreddits,
            game,
            keywords,
            no_breakdown,
            include_internal,
        } => serde_json::to_value(
            service
                .scan_multiple(&subreddits, &game, &keywords, !no_breakdown, include_internal)
                .await?,
        )?,
        Command::ScanOne { subreddit } => serde_json::to_value(service.scan_subreddit(&subreddit).await?)?,
        Command::Posts {
            subreddits,
            limit,
            total,
        } => {
            let posts = match subreddits.as_slice() {
                [single] => service.fetch_posts(single, limit).await?,
                many => service.fetch_posts_for_subreddits(many, limit, total).await,
            };
            serde_json::to_value(posts)?
        }
        Command::Comments { post_id, limit } => {
            serde_json::to_value(service.fetch_comments(&post_id, limit).await?)?
        }
        Command::Discover { game, max } => serde_json::to_value(service.discover(&game, max).await)?,
    };

    print_json(&output)?;

    service.log_mirror_summary().await;
    if mirror_stats {
        if let Some(exported) = service.export_mirror_metrics().await? {
            eprintln!("{}", exported);
        }
    }
    Ok(())
}

fn print_json(value: &Value) -> Result<(), CoreError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
