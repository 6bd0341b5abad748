//! PerfectNet unified CLI.
//!
//! Distributed search for perfect numbers via Mersenne primes.
//!
//! # Quick Start
//!
//! ```bash
//! # Start a coordinator and queue every prime exponent up to 10000
//! perfectnet serve --seed 2:10000
//!
//! # Contribute compute (new terminal)
//! perfectnet work --worker alice
//!
//! # Check on the search
//! perfectnet admin stats
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

/// PerfectNet - distributed search for perfect numbers.
#[derive(Parser)]
#[command(name = "perfectnet")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory holding perfectnet.toml.
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator.
    Serve {
        /// Address to bind to (port only: 7420, or full: 0.0.0.0:7420).
        #[arg(short, long)]
        bind: Option<String>,

        /// Address for the HTTP stats sidecar.
        #[arg(long)]
        http: Option<String>,

        /// Directory for the journal and snapshots.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Token required for admin requests.
        #[arg(long, env = "PERFECTNET_ADMIN_TOKEN", hide_env_values = true)]
        admin_token: Option<String>,

        /// Queue every prime exponent in START:END at startup.
        #[arg(long, value_name = "START:END")]
        seed: Option<String>,
    },

    /// Contribute compute to a coordinator.
    Work {
        /// Coordinator address.
        #[arg(short, long)]
        server: Option<String>,

        /// Worker identity to credit results to.
        #[arg(short, long)]
        worker: Option<String>,

        /// API key issued by `perfectnet admin register`.
        #[arg(long, env = "PERFECTNET_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Directory for in-progress checkpoints.
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,

        /// Stop after one completed assignment.
        #[arg(long)]
        once: bool,

        /// Exit instead of waiting when the queue is empty.
        #[arg(long)]
        exit_when_idle: bool,
    },

    /// Run the Lucas-Lehmer test on one exponent locally.
    Verify {
        /// Exponent p of the Mersenne number 2^p - 1.
        exponent: u64,
    },

    /// Measure local Lucas-Lehmer throughput.
    Bench {
        /// Which exponents to time.
        #[arg(value_enum, default_value_t = Suite::Quick)]
        suite: Suite,

        /// Also estimate the wall time for this exponent.
        #[arg(long)]
        target: Option<u64>,
    },

    /// Configuration management.
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Coordinator administration.
    Admin(AdminArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum Suite {
    Quick,
    Medium,
    Large,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration.
    Show {
        /// Output format.
        #[arg(short, long, default_value = "toml")]
        format: String,
    },
}

#[derive(clap::Args)]
struct AdminArgs {
    /// Coordinator address. Defaults to worker.server_addr.
    #[arg(short, long, global = true)]
    server: Option<String>,

    /// Admin token. Defaults to coordinator.admin_token.
    #[arg(long, global = true, env = "PERFECTNET_ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,

    #[command(subcommand)]
    command: AdminCommands,
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Queue one exponent.
    AddWork {
        exponent: u64,

        /// Queue priority; higher is leased first.
        #[arg(short, long, default_value = "100")]
        priority: u32,
    },

    /// Queue every prime exponent in an inclusive range.
    AddRange { start: u64, end: u64 },

    /// Remove a queued exponent.
    Withdraw { exponent: u64 },

    /// Reclaim expired leases now.
    Sweep,

    /// Return every lease held by a worker to the queue.
    ClearWorker { worker: String },

    /// Issue an API key for a worker.
    Register {
        worker: String,

        /// Replace an existing key.
        #[arg(long)]
        rotate: bool,
    },

    /// Show search statistics.
    Stats,

    /// List perfect numbers found so far.
    Discoveries,

    /// List active leases.
    Leases,

    /// List contributors.
    Users {
        /// Only the top N by completed candidates.
        #[arg(long)]
        top: Option<u32>,
    },

    /// Show recently recorded results.
    Recent {
        #[arg(short = 'n', long, default_value = "10")]
        limit: u32,
    },

    /// Write the result ledger as CSV, reading the data directory directly.
    Export {
        /// Data directory. Defaults to coordinator.data_dir.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Output file. Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let project = cli.project;

    match cli.command {
        Commands::Serve {
            bind,
            http,
            data_dir,
            admin_token,
            seed,
        } => commands::serve::run(
            &project,
            commands::serve::Overrides {
                bind,
                http,
                data_dir,
                admin_token,
                seed,
            },
        ),
        Commands::Work {
            server,
            worker,
            api_key,
            checkpoint_dir,
            once,
            exit_when_idle,
        } => commands::work::run(
            &project,
            commands::work::Overrides {
                server,
                worker,
                api_key,
                checkpoint_dir,
                once,
                exit_when_idle,
            },
        ),
        Commands::Verify { exponent } => commands::verify::run(exponent),
        Commands::Bench { suite, target } => {
            let suite = match suite {
                Suite::Quick => perfectnet_engine::bench::BenchSuite::Quick,
                Suite::Medium => perfectnet_engine::bench::BenchSuite::Medium,
                Suite::Large => perfectnet_engine::bench::BenchSuite::Large,
            };
            commands::bench::run(suite, target)
        }
        Commands::Config(cmd) => match cmd {
            ConfigCommands::Show { format } => commands::config::show(&project, &format),
        },
        Commands::Admin(args) => {
            let target = commands::admin::Target::resolve(&project, args.server, args.admin_token)?;
            match args.command {
                AdminCommands::AddWork { exponent, priority } => {
                    commands::admin::add_work(&target, exponent, priority)
                }
                AdminCommands::AddRange { start, end } => {
                    commands::admin::add_range(&target, start, end)
                }
                AdminCommands::Withdraw { exponent } => commands::admin::withdraw(&target, exponent),
                AdminCommands::Sweep => commands::admin::sweep(&target),
                AdminCommands::ClearWorker { worker } => {
                    commands::admin::clear_worker(&target, &worker)
                }
                AdminCommands::Register { worker, rotate } => {
                    commands::admin::register(&target, &worker, rotate)
                }
                AdminCommands::Stats => commands::admin::stats(&target),
                AdminCommands::Discoveries => commands::admin::discoveries(&target),
                AdminCommands::Leases => commands::admin::leases(&target),
                AdminCommands::Users { top } => commands::admin::users(&target, top),
                AdminCommands::Recent { limit } => commands::admin::recent(&target, limit),
                AdminCommands::Export { data_dir, output } => {
                    commands::admin::export(&project, data_dir, output)
                }
            }
        }
    }
}
