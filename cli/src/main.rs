#[macro_use]
extern crate log;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use structopt::StructOpt;

use model::Config;
use routes::RouteSkeletons;

#[derive(StructOpt)]
#[structopt(
    name = "fleet_clean",
    about = "Clean raw bus GPS files and match each vehicle to a route"
)]
struct Args {
    /// A JSON file overriding any of the default settings
    #[structopt(long)]
    config: Option<PathBuf>,
    /// Directory with the raw GPS files
    #[structopt(long)]
    raw_dir: Option<PathBuf>,
    /// Where cleaned GPS files are written
    #[structopt(long)]
    output_dir: Option<PathBuf>,
    /// Directory with one subdirectory per route
    #[structopt(long)]
    route_dir: Option<PathBuf>,
    /// Log debug output
    #[structopt(short, long)]
    verbose: bool,
    #[structopt(subcommand)]
    cmd: Option<Command>,
}

#[derive(StructOpt)]
enum Command {
    /// Sort, reconstruct speeds, drop overnight pings and trim idle ends
    Clean,
    /// Collapse repeated parked states in the cleaned files, in place
    Compress,
    /// Assign each vehicle in the cleaned files to a route
    Match,
    /// Only build the route skeletons, optionally exporting them as GeoJSON
    Routes {
        #[structopt(long)]
        geojson: Option<PathBuf>,
    },
    /// Clean, compress, then match
    All,
}

impl Args {
    fn config(&self) -> Result<Config> {
        let mut config = match self.config {
            Some(ref path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(ref dir) = self.raw_dir {
            config.raw_dir = dir.clone();
        }
        if let Some(ref dir) = self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(ref dir) = self.route_dir {
            config.route_dir = dir.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() {
    let args = Args::from_args();
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if let Err(err) = run(args) {
        error!("{err:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = args.config()?;
    let start = Instant::now();
    match args.cmd.unwrap_or(Command::All) {
        Command::Clean => {
            model::run_cleaning(&config)?;
        }
        Command::Compress => {
            model::run_compression(&config)?;
        }
        Command::Match => {
            model::run_matching(&config)?;
        }
        Command::Routes { geojson } => {
            let skeletons = RouteSkeletons::load_from_dir(&config.route_dir)?;
            for skeleton in skeletons.iter() {
                info!(
                    "Route {}: {} stops from {}",
                    skeleton.route_no,
                    skeleton.stops.len(),
                    skeleton.folder.display()
                );
            }
            if let Some(path) = geojson.or(config.skeleton_geojson) {
                skeletons.write_geojson(&path)?;
            }
        }
        Command::All => {
            let cleaned = model::run_cleaning(&config)?;
            let raw_rows: usize = cleaned.done().map(|(_, stats)| stats.raw_rows).sum();
            let kept_rows: usize = cleaned.done().map(|(_, stats)| stats.kept_rows).sum();
            info!("Phase 1 kept {kept_rows} of {raw_rows} rows");

            let compressed = model::run_compression(&config)?;
            let before: usize = compressed.done().map(|(_, stats)| stats.before).sum();
            let after: usize = compressed.done().map(|(_, stats)| stats.after).sum();
            info!("Phase 2 reduced {before} rows to {after}");

            model::run_matching(&config)?;
        }
    }
    info!("Done in {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}
