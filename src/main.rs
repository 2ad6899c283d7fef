//! Drover command-line interface.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, warn};

use drover::config::Config;
use drover::git::GitCleaner;
use drover::notify::{DisabledNotifier, TelegramNotifier};
use drover::pipeline::{PipelineConfig, ShutdownSignal, TaskPipeline};
use drover::recovery::RecoveryConfig;
use drover::testing::Notify;
use drover::{expand_task_ranges, CliAgentRunner, CliHealthProbe, DroverError};

#[derive(Parser)]
#[command(name = "drover")]
#[command(author, version, about = "Drives a coding agent through a task queue")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent over a queue of tasks
    Implement {
        /// Project the tasks belong to
        project: String,

        /// Task numbers and ranges, e.g. "1-4 6 8-10"
        #[arg(required = true)]
        tasks: Vec<String>,

        /// Directory the agent works in
        #[arg(short = 'w', long, default_value = ".")]
        working_dir: PathBuf,

        /// Cost ceiling per attempt, in USD
        #[arg(long)]
        max_budget: Option<f64>,

        /// Disable retry and backoff; every failure is final
        #[arg(long)]
        no_recovery: bool,

        /// Skip the batch verification pass after the queue
        #[arg(long)]
        no_batch_check: bool,

        /// Config file path (defaults to ~/.config/drover/config.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Probe whether the agent backend is usable right now
    Health {
        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show how task numbers and ranges expand
    Expand {
        /// Task numbers and ranges
        #[arg(required = true)]
        tasks: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "drover=debug,info"
    } else {
        "drover=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            eprintln!("{} {e}", "error:".red().bold());
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32, DroverError> {
    match cli.command {
        Commands::Implement {
            project,
            tasks,
            working_dir,
            max_budget,
            no_recovery,
            no_batch_check,
            config,
        } => {
            run_implement(
                project,
                tasks,
                working_dir,
                max_budget,
                no_recovery,
                no_batch_check,
                config,
            )
            .await
        }
        Commands::Health { config } => {
            let config = Config::load(config.as_deref())?;
            let probe = CliHealthProbe::new(&config.agent)?;
            let status = probe.probe().await;
            match status.exit_code() {
                0 => println!("{} agent is {status}", "ok:".green().bold()),
                _ => println!("{} agent is {status}", "warning:".yellow().bold()),
            }
            Ok(status.exit_code())
        }
        Commands::Expand { tasks } => {
            let numbers = expand_task_ranges(&tasks);
            if numbers.is_empty() {
                return Err(DroverError::EmptyTaskList {
                    input: tasks.join(" "),
                });
            }
            let list: Vec<String> = numbers.iter().map(ToString::to_string).collect();
            println!("{}", list.join(" "));
            Ok(0)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_implement(
    project: String,
    tasks: Vec<String>,
    working_dir: PathBuf,
    max_budget: Option<f64>,
    no_recovery: bool,
    no_batch_check: bool,
    config_path: Option<PathBuf>,
) -> Result<i32, DroverError> {
    let mut config = Config::load(config_path.as_deref())?;
    if no_recovery {
        config.recovery.enabled = false;
    }

    let numbers = expand_task_ranges(&tasks);
    if numbers.is_empty() {
        return Err(DroverError::EmptyTaskList {
            input: tasks.join(" "),
        });
    }

    let working_dir = working_dir.canonicalize()?;

    let agent = Arc::new(CliAgentRunner::new(&config.agent)?);
    let probe = Arc::new(CliHealthProbe::new(&config.agent)?);
    let notifier: Arc<dyn Notify> = match TelegramNotifier::from_config(&config.telegram) {
        Some(telegram) => Arc::new(telegram),
        None => {
            warn!("Telegram not configured, notifications disabled");
            Arc::new(DisabledNotifier)
        }
    };

    let shutdown = Arc::new(ShutdownSignal::new());
    let signal = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}", "interrupt received, stopping after cleanup".yellow());
            signal.trigger();
        }
    });

    let pipeline = TaskPipeline::new(
        agent,
        probe,
        notifier,
        Arc::new(GitCleaner),
        Arc::clone(&shutdown),
    );

    let run_config = PipelineConfig {
        project: project.clone(),
        tasks: numbers,
        working_dir,
        log_dir: config.paths.log_dir.clone(),
        implement_skill: config.agent.implement_skill.clone(),
        batch_check_skill: config.agent.batch_check_skill.clone(),
        attempt_timeout: config.attempt_timeout(),
        max_budget_usd: max_budget,
        recovery: RecoveryConfig::from_section(&config.recovery),
        run_batch_check: !no_batch_check,
    };

    let report = pipeline.run(&run_config).await?;

    println!();
    println!("{}", format!("=== {project} ===").bold());
    println!(
        "{} {}",
        "completed:".green().bold(),
        format_list(&report.completed)
    );
    println!(
        "{} {}",
        "on hold:  ".yellow().bold(),
        format_list(&report.on_hold)
    );
    if report.failed.is_empty() {
        println!("{} none", "failed:   ".green().bold());
    } else {
        println!("{}", "failed:".red().bold());
        for (task, reason) in &report.failed {
            println!("  #{task}: {reason}");
        }
    }
    if report.halted {
        println!("{}", "queue halted before all tasks ran".red());
    }

    Ok(report.exit_code())
}

fn format_list(tasks: &[u32]) -> String {
    if tasks.is_empty() {
        "none".to_string()
    } else {
        tasks
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}
