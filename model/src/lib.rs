#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

pub mod avl;
mod batch;
mod clean;
mod config;
mod dist;
mod matching;
mod trajectory;

use serde::{Deserialize, Serialize};

pub use self::batch::{process_files, write_atomic, BatchReport, FilePattern, Outcome};
pub use self::clean::{
    backward_reachable, clean_file, compress, compress_file, filter_service_hours,
    forward_reachable, in_service, keep_mask, moving_flags, run_cleaning, run_compression,
    smart_trim, CleanStats, CompressStats, StateSignature,
};
pub use self::config::Config;
pub use self::dist::{haversine_many, haversine_meters};
pub use self::matching::{
    best_route, classify, match_file, match_vehicle, run_matching, sample_positions,
    write_mapping, write_mapping_file, FileMatches, MappingRecord, Prediction, UNMATCHED,
};
pub use self::trajectory::{
    group_in_order, normalize, observed_speed, reconcile_speed, reconstruct_speeds, GpsPing,
    Trajectories, Trajectory,
};

/// The anonymized vehicle identifier from the fleet feed
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VehicleName(pub String);
