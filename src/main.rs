use anyhow::{anyhow, Context as _, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use serde_json::Value;
use std::path::PathBuf;

use cadence_rs::cadence::config::EngineConfig;
use cadence_rs::cadence::server;
use cadence_rs::cadence::workflow::engine::Engine;
use cadence_rs::cadence::workflow::expression;
use cadence_rs::cadence::workflow::loader::WorkflowLoader;
use cadence_rs::cadence::workflow::state::Context;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check a workflow definition without running it
    Validate {
        /// Path to the workflow file
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Run a workflow from a file until it finishes or first waits
    Run {
        /// Path to the workflow file
        #[arg(short, long)]
        file: PathBuf,

        /// Initial context as a JSON object
        #[arg(short, long, default_value = "{}")]
        input: String,
    },
    /// Evaluate an expression against a JSON context
    Eval {
        #[arg(short, long)]
        expr: String,

        #[arg(short, long, default_value = "{}")]
        context: String,
    },
    /// Serve the admin API with every workflow in a directory registered
    Serve {
        /// Directory of workflow definitions
        #[arg(short, long, default_value = "workflows")]
        dir: PathBuf,

        /// Overrides CADENCE_PORT
        #[arg(short, long)]
        port: Option<u16>,

        /// Persist runs here; overrides CADENCE_STATE_DIR
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::Validate { file } => {
            let def = WorkflowLoader::new()
                .load_workflow(&file)
                .with_context(|| format!("loading {}", file.display()))?;
            let engine = Engine::builder().build().await?;
            let id = def.id.clone();
            let version = engine.register(def).await?;
            println!("{}: workflow '{}' is valid (version {})", file.display(), id, version);
        }
        Commands::Run { file, input } => {
            let def = WorkflowLoader::new()
                .load_workflow(&file)
                .with_context(|| format!("loading {}", file.display()))?;
            let input: Value = serde_json::from_str(&input).context("--input must be JSON")?;

            let config = EngineConfig::from_env()?;
            let engine = Engine::builder().config(config).build().await?;
            let id = def.id.clone();
            engine.register(def).await?;

            println!("Running workflow: {}", id);
            let run_id = engine.start(&id, input).await?;
            let run = engine.run(&run_id).await?;
            println!("{}", serde_json::to_string_pretty(&run)?);
        }
        Commands::Eval { expr, context } => {
            let context: Value =
                serde_json::from_str(&context).context("--context must be JSON")?;
            let context = Context::from_value(context)?;
            let value = expression::evaluate_str(&expr, &context)?;
            println!("{}", value);
        }
        Commands::Serve {
            dir,
            port,
            state_dir,
        } => {
            let mut config = EngineConfig::from_env()?;
            if let Some(port) = port {
                config.bind_port = port;
            }
            if state_dir.is_some() {
                config.state_dir = state_dir;
            }
            let port = config.bind_port;

            let engine = Engine::builder().config(config).build().await?;
            let defs = WorkflowLoader::new()
                .load_dir(&dir)
                .with_context(|| format!("loading workflows from {}", dir.display()))?;
            for def in defs {
                let id = def.id.clone();
                engine
                    .register(def)
                    .await
                    .with_context(|| format!("registering '{}'", id))?;
            }
            engine.recover().await?;

            let handle = engine.spawn();
            tokio::select! {
                served = server::serve(engine.clone(), port) => {
                    served.map_err(|e| anyhow!(e))?;
                }
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Interrupted, shutting down");
                }
            }
            handle.shutdown().await;
        }
    }

    Ok(())
}
