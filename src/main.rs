mod bp_config;
mod bp_controllers;
mod bp_models;
mod bp_planner;
mod bp_views;

use std::path::PathBuf;
use std::process::exit;

use bp_config::AppConfig;
use bp_controllers::BPControllers;
use bp_models::StationSource;
use bp_planner::{DEFAULT_CHUNK_SIZE, DisabledEquipment};
use bp_views::ExportTargets;
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{LevelFilter, error};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Truck rebalancing planner for the Barcelona Bicing bike-share system"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
enum Commands {
    #[command(about = "Plan delivery routes for empty stations")]
    Supply(SupplyArgs),

    #[command(about = "Plan routes moving bikes from full stations to empty ones")]
    Reallocate(ReallocateArgs),

    #[command(about = "Group stations with disabled bikes or docks into maintenance rounds")]
    Disabled(DisabledArgs),

    #[command(about = "Show an overview of the current station snapshot")]
    Stations(SourceArgs),
}

#[derive(Args, Clone, Debug)]
struct SourceArgs {
    #[arg(
        short = 'i',
        long,
        help = "Read stations from this JSON file (snapshot, merged station array or GBFS document) instead of the live feed."
    )]
    input: Option<PathBuf>,

    #[arg(long, help = "Ignore the cached snapshot and fetch the live feed.")]
    refresh: bool,
}

impl SourceArgs {
    fn to_source(&self) -> StationSource {
        StationSource {
            input: self.input.clone(),
            refresh: self.refresh,
        }
    }
}

#[derive(Args, Clone, Debug)]
struct ExportArgs {
    #[arg(long, help = "Write the plan as CSV, one row per stop.")]
    csv: Option<PathBuf>,

    #[arg(long, help = "Write the plan as a GeoJSON FeatureCollection.")]
    geojson: Option<PathBuf>,

    #[arg(long, help = "Write the full plan report as JSON.")]
    json: Option<PathBuf>,
}

impl ExportArgs {
    fn to_targets(&self) -> ExportTargets {
        ExportTargets {
            csv: self.csv.clone(),
            geojson: self.geojson.clone(),
            json: self.json.clone(),
        }
    }
}

#[derive(Args, Clone, Debug)]
struct PlanArgs {
    #[arg(
        short = 'f',
        long,
        default_value_t = 50.0,
        allow_negative_numbers = true,
        help = "Target fill level of each station, in percent of bikes plus free docks."
    )]
    fill_percentage: f64,

    #[arg(
        short = 'c',
        long,
        default_value_t = 20,
        allow_negative_numbers = true,
        help = "Number of bikes a truck can carry."
    )]
    capacity: i64,

    #[clap(flatten)]
    source: SourceArgs,

    #[clap(flatten)]
    export: ExportArgs,
}

#[derive(Args, Clone, Debug)]
struct SupplyArgs {
    #[clap(flatten)]
    plan: PlanArgs,

    #[arg(
        long,
        help = "Deliver to every station below the target fill level, not only empty ones in service."
    )]
    all_imbalanced: bool,
}

#[derive(Args, Clone, Debug)]
struct ReallocateArgs {
    #[clap(flatten)]
    plan: PlanArgs,

    #[arg(
        long,
        help = "Use every station with spare bikes as a source and every station short of bikes as a target, not only full and empty ones."
    )]
    all_imbalanced: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum EquipmentKind {
    Bikes,
    Docks,
}

impl From<EquipmentKind> for DisabledEquipment {
    fn from(kind: EquipmentKind) -> Self {
        match kind {
            EquipmentKind::Bikes => DisabledEquipment::Bikes,
            EquipmentKind::Docks => DisabledEquipment::Docks,
        }
    }
}

#[derive(Args, Clone, Debug)]
struct DisabledArgs {
    #[arg(long, value_enum, default_value_t = EquipmentKind::Bikes)]
    kind: EquipmentKind,

    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, help = "Stations per maintenance round.")]
    chunk_size: usize,

    #[clap(flatten)]
    source: SourceArgs,

    #[clap(flatten)]
    export: ExportArgs,
}

fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\n{}", "═".repeat(70));
        eprintln!("❌ PLANNER PANIC");
        eprintln!("{}", "═".repeat(70));
        eprintln!("\n{}", panic_info);
        eprintln!("\n{}", "═".repeat(70));
    }));

    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_env("LOG")
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env();

    let outcome = match &cli.command {
        Commands::Supply(args) => BPControllers::supply(
            &config,
            &args.plan.source.to_source(),
            args.plan.fill_percentage,
            args.plan.capacity,
            args.all_imbalanced,
            &args.plan.export.to_targets(),
        )
        .map(|_| ()),
        Commands::Reallocate(args) => BPControllers::reallocate(
            &config,
            &args.plan.source.to_source(),
            args.plan.fill_percentage,
            args.plan.capacity,
            args.all_imbalanced,
            &args.plan.export.to_targets(),
        )
        .map(|_| ()),
        Commands::Disabled(args) => BPControllers::disabled(
            &config,
            &args.source.to_source(),
            args.kind.into(),
            args.chunk_size,
            &args.export.to_targets(),
        )
        .map(|_| ()),
        Commands::Stations(args) => {
            BPControllers::stations(&config, &args.to_source()).map(|_| ())
        }
    };

    if let Err(e) = outcome {
        error!("{:#}", e);
        exit(1);
    }
}
