//! oppnet-sim - opportunistic routing simulator
//!
//! Runs a built-in or file-based scenario and prints the run's statistics.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use oppnet_logging::{FileConfig, LogConfig, OppnetSubscriberBuilder, RotationStrategy};
use oppnet_routing::RoutingConfig;

use oppnet_simulation::{RandomParams, Scenario, Simulation};

#[derive(Parser)]
#[command(
    name = "oppnet-sim",
    about = "Opportunistic network routing simulator",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log JSON lines instead of pretty console output
    #[arg(long, global = true)]
    json_logs: bool,

    /// Also write JSONL logs to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Router every host runs (defaults to the scenario's)
    #[arg(short, long, global = true, value_enum)]
    router: Option<RouterChoice>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Spray one message across four hosts
    Relay,

    /// Run seeded random contacts and traffic
    Random {
        #[arg(long, default_value = "20")]
        hosts: u32,

        #[arg(long, default_value = "200")]
        contacts: usize,

        #[arg(long, default_value = "50")]
        messages: usize,

        /// Simulated seconds
        #[arg(long, default_value = "3600")]
        duration: f64,

        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Run a scenario from a JSON file
    Run {
        file: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RouterChoice {
    SprayAndWait,
    ProphetSpray,
    UtilitySpray,
}

impl RouterChoice {
    fn preset(self) -> RoutingConfig {
        match self {
            RouterChoice::SprayAndWait => RoutingConfig::spray_and_wait(),
            RouterChoice::ProphetSpray => RoutingConfig::prophet_spray(),
            RouterChoice::UtilitySpray => RoutingConfig::utility_spray(),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut scenario = match cli.command {
        Commands::Relay => Scenario::relay(),
        Commands::Random {
            hosts,
            contacts,
            messages,
            duration,
            seed,
        } => Scenario::random(RandomParams {
            hosts,
            contacts,
            messages,
            duration,
            seed,
            ..Default::default()
        }),
        Commands::Run { file } => Scenario::from_file(file)?,
    };
    if let Some(router) = cli.router {
        scenario.routing.protocol = router.preset().protocol;
    }

    let mut logging = OppnetSubscriberBuilder::new()
        .with_config(if cli.json_logs {
            LogConfig::default()
        } else {
            LogConfig::development()
        })
        .with_level(if cli.verbose { "debug" } else { "info" });
    if let Some(directory) = cli.log_dir {
        logging = logging.with_file_output(FileConfig {
            directory,
            prefix: scenario.name.clone(),
            rotation: RotationStrategy::Never,
        });
    }
    let _guard = logging.try_init()?;

    let mut sim = Simulation::new(&scenario)?;
    let run_id = sim.run_id();
    let stats = sim.run()?;

    println!("scenario:          {}", scenario.name);
    println!("run id:            {run_id}");
    println!("{stats}");
    Ok(())
}
