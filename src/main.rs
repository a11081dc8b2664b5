//! ontokg CLI: create runs, resume them and inspect their progress.

use anyhow::Result;
use clap::{Parser, Subcommand};
use ontokg::llm::{LlmClient, OpenAiClient, ReplayClient};
use ontokg::pipeline::ScenarioOutcome;
use ontokg::{logging, Config, Pipeline, RunContext, RunManager, ScenarioFile};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "ontokg", version, about = "Ontology synthesis and knowledge graph extraction runs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new run and execute every scenario in the scenarios file.
    Run {
        /// Scenarios file (TOML, one [[scenario]] table per scenario).
        #[arg(long)]
        scenarios: PathBuf,

        /// Configuration file (default: $ONTOKG_CONFIG or ./config.toml).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Answer LLM calls from a recorded fixture instead of the API.
        #[arg(long)]
        replay: Option<PathBuf>,
    },
    /// Continue an interrupted run with its frozen configuration.
    Resume {
        run_dir: PathBuf,

        #[arg(long)]
        scenarios: PathBuf,

        #[arg(long)]
        replay: Option<PathBuf>,
    },
    /// Print per-scenario state reconstructed from the run's checkpoints.
    Status { run_dir: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            scenarios,
            config,
            replay,
        } => {
            let _ = dotenv::dotenv();
            let config = match config {
                Some(path) => Config::from_path(&path)?,
                None => Config::load()?,
            };
            logging::init(&config.run.log_level);
            let run = RunManager::from_config(&config).create_run(&config)?;
            execute(&run, &scenarios, replay.as_deref()).await
        }
        Command::Resume {
            run_dir,
            scenarios,
            replay,
        } => {
            let _ = dotenv::dotenv();
            let run = RunManager::resume_run(&run_dir)?;
            logging::init(&run.config().run.log_level);
            execute(&run, &scenarios, replay.as_deref()).await
        }
        Command::Status { run_dir } => {
            logging::init("warn");
            let run = RunManager::resume_run(&run_dir)?;
            println!("Run {} ({})", run.id(), run.root().display());
            let states = run.states();
            if states.is_empty() {
                println!("  no scenarios started");
            }
            for (scenario, state) in states {
                println!("  {:<24} {}", scenario, state);
            }
            Ok(())
        }
    }
}

fn build_llm(config: &Config, replay: Option<&Path>) -> Result<Arc<dyn LlmClient>> {
    if let Some(path) = replay {
        log::info!("Replaying LLM responses from {}", path.display());
        return Ok(Arc::new(ReplayClient::from_file(path)?));
    }
    let api_key = config.api_key()?;
    Ok(Arc::new(OpenAiClient::new(api_key, &config.llm)?))
}

async fn execute(run: &RunContext, scenarios: &Path, replay: Option<&Path>) -> Result<()> {
    logging::attach_run_log(&run.log_file())?;
    log::info!("ontokg v{} run {}", env!("CARGO_PKG_VERSION"), run.id());

    let file = ScenarioFile::load(scenarios)?;
    let scenarios = file.scenarios(&run.config().extraction)?;
    let llm = build_llm(run.config(), replay)?;
    let pipeline = Pipeline::new(llm);

    let result = pipeline.run_all(run, &scenarios).await;
    logging::detach_run_log();
    let outcomes = match result {
        Ok(outcomes) => outcomes,
        Err(e) => {
            eprintln!("Run {} stopped: {}", run.id(), e);
            eprintln!("Continue with: ontokg resume {} --scenarios <file>", run.root().display());
            return Err(e.into());
        }
    };

    print_summary(run, &outcomes);
    Ok(())
}

fn print_summary(run: &RunContext, outcomes: &[ScenarioOutcome]) {
    println!("\nRun {} ({})", run.id(), run.root().display());
    println!(
        "{:<24} {:<14} {:>9} {:>8} {:>10} {:>7} {:>7}",
        "scenario", "state", "entities", "triples", "questions", "EM", "F1"
    );
    for outcome in outcomes {
        println!(
            "{:<24} {:<14} {:>9} {:>8} {:>10} {:>7.3} {:>7.3}",
            outcome.scenario,
            outcome.state.to_string(),
            outcome.entities,
            outcome.triples,
            outcome.evaluation.questions,
            outcome.evaluation.exact_match,
            outcome.evaluation.f1
        );
    }
}
