use clap::{Parser, Subcommand, builder::styling};
use eyre::Result;
use owo_colors::OwoColorize;
use shardflow::{cli, config::load_dotenv};
use tokio_util::sync::CancellationToken;

// CLI Styling
const STYLES: styling::Styles = styling::Styles::styled()
    .header(styling::AnsiColor::BrightWhite.on_default())
    .usage(styling::AnsiColor::BrightWhite.on_default())
    .literal(styling::AnsiColor::Green.on_default())
    .placeholder(styling::AnsiColor::Cyan.on_default());

/// shardflow: fan in rows from sharded databases and upsert them into one table
#[derive(Parser)]
#[command(name = "shardflow", version, styles = STYLES)]
struct Cli {
    /// The dotenv file to source credentials from
    #[arg(short, long, global = true, default_value = ".env")]
    env: String,

    /// More verbose logging
    #[arg(long, global = true)]
    debug: bool,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline until it succeeds or runs out of retries
    Run {
        /// Pipeline configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },

    /// Check a pipeline configuration without connecting to anything
    Validate {
        /// Pipeline configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },

    /// Scaffold a new pipeline under pipelines/<name>
    Generate {
        /// Name of the pipeline directory to create
        #[arg(short, long)]
        name: String,

        /// Project directory to create pipelines/ in
        #[arg(long, default_value = ".")]
        dir: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.debug {
        true => "debug",
        false => "info",
    };
    let env = env_logger::Env::default().filter_or("LOG_LEVEL", log_level);
    env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .init();

    load_dotenv(&cli.env)?;

    match cli.command {
        Commands::Run { config } => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("Interrupt received, stopping pipeline");
                    on_signal.cancel();
                }
            });

            cli::run_pipeline(&config, &cancel).await?;
        }
        Commands::Validate { config } => {
            let parsed = cli::validate_config(&config)?;
            log::info!(
                "✓ Configuration {} is valid (pipeline {}, {} shard(s), {} transformation(s))",
                config.bright_black(),
                parsed.pipeline.name.bright_white(),
                parsed.source.servers.len(),
                parsed.transformations.len()
            );
        }
        Commands::Generate { name, dir } => {
            cli::generate_pipeline(&dir, &name)?;
        }
    }

    Ok(())
}
