// Figure out which route each vehicle served on a given day, purely from how close its pings are
// to each route's stop geometry.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::Serialize;

use routes::{RouteNo, RouteSkeletons};

use crate::batch::{process_files, write_atomic, BatchReport, FilePattern, Outcome};
use crate::{avl, Config, VehicleName};

pub const UNMATCHED: &str = "Off-Duty/Unknown";

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Prediction {
    Route(RouteNo),
    Unmatched,
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Prediction::Route(route) => write!(f, "{route}"),
            Prediction::Unmatched => write!(f, "{UNMATCHED}"),
        }
    }
}

/// One vehicle on one day
#[derive(Clone, Debug, PartialEq)]
pub struct MappingRecord {
    pub source_file: String,
    pub vehicle: VehicleName,
    pub prediction: Prediction,
    /// Average distance in degrees from the sampled pings to the best route. Lower is better.
    pub confidence: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FileMatches {
    pub records: Vec<MappingRecord>,
    pub skipped_vehicles: usize,
}

impl FileMatches {
    pub fn matched(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.prediction != Prediction::Unmatched)
            .count()
    }

    pub fn unmatched(&self) -> usize {
        self.records.len() - self.matched()
    }
}

/// Load the routes, match every cleaned file, and write one mapping file for the whole run.
pub fn run_matching(config: &Config) -> Result<BatchReport<FileMatches>> {
    let start = Instant::now();
    let skeletons = RouteSkeletons::load_from_dir(&config.route_dir)?;
    if skeletons.is_empty() {
        bail!(
            "No usable route definitions in {}",
            config.route_dir.display()
        );
    }
    if let Some(ref path) = config.skeleton_geojson {
        skeletons.write_geojson(path)?;
    }

    if !config.output_dir.is_dir() {
        bail!(
            "Cleaned GPS directory {} doesn't exist",
            config.output_dir.display()
        );
    }
    let files = FilePattern::new(&config.clean_pattern)?.find_in(&config.output_dir)?;
    info!("Matching vehicles in {} files", files.len());

    let report = process_files(config, files, |path| match_file(config, &skeletons, path))?;
    report.log_summary("match");

    let mut records: Vec<MappingRecord> = report
        .done()
        .flat_map(|(_, matches)| matches.records.iter().cloned())
        .collect();
    records.sort_by(|a, b| {
        (&a.source_file, &a.vehicle).cmp(&(&b.source_file, &b.vehicle))
    });
    // Written even when empty, so a mapping from an earlier run never survives
    write_mapping_file(&config.mapping_output, &records)?;
    if records.is_empty() {
        warn!(
            "No vehicles identified; {} only has a header",
            config.mapping_output.display()
        );
    } else {
        let matched: usize = report.done().map(|(_, matches)| matches.matched()).sum();
        let unmatched: usize = report.done().map(|(_, matches)| matches.unmatched()).sum();
        info!(
            "Identified {matched} of {} vehicle-days ({unmatched} unmatched), written to {}",
            records.len(),
            config.mapping_output.display()
        );
    }
    info!("Matching took {:.2}s", start.elapsed().as_secs_f64());
    Ok(report)
}

pub fn match_file(
    config: &Config,
    skeletons: &RouteSkeletons,
    path: &Path,
) -> Result<Outcome<FileMatches>> {
    let file_name = path
        .file_name()
        .and_then(|x| x.to_str())
        .ok_or_else(|| anyhow!("{} has no usable file name", path.display()))?
        .to_string();
    let file = fs_err::File::open(path)?;
    let positions =
        avl::load_positions(file).with_context(|| format!("reading {}", path.display()))?;
    if positions.is_empty() {
        return Ok(Outcome::skip("no valid rows"));
    }

    let mut per_vehicle: BTreeMap<VehicleName, Vec<(f64, f64)>> = BTreeMap::new();
    for (vehicle, lng, lat) in positions {
        per_vehicle
            .entry(vehicle)
            .or_insert_with(Vec::new)
            .push((lng, lat));
    }
    info!("{file_name}: matching {} vehicles", per_vehicle.len());

    let outcomes: Vec<Outcome<MappingRecord>> = per_vehicle
        .par_iter()
        .map(|(vehicle, positions)| {
            match_vehicle(config, skeletons, &file_name, vehicle, positions)
        })
        .collect();

    let mut matches = FileMatches::default();
    for outcome in outcomes {
        match outcome {
            Outcome::Done(record) => matches.records.push(record),
            Outcome::Skipped(reason) => {
                debug!("{file_name}: {reason}");
                matches.skipped_vehicles += 1;
            }
        }
    }
    Ok(Outcome::Done(matches))
}

pub fn match_vehicle(
    config: &Config,
    skeletons: &RouteSkeletons,
    source_file: &str,
    vehicle: &VehicleName,
    positions: &[(f64, f64)],
) -> Outcome<MappingRecord> {
    let seed = sample_seed(config.sample_seed, source_file, vehicle);
    let sample = sample_positions(positions, config.sample_size, seed);
    match classify(&sample, skeletons, config.match_threshold) {
        Some((prediction, score)) => Outcome::Done(MappingRecord {
            source_file: source_file.to_string(),
            vehicle: vehicle.clone(),
            prediction,
            confidence: round6(score),
        }),
        None => Outcome::skip(format!("{:?} has nothing to compare", vehicle)),
    }
}

/// Up to `size` positions without replacement, in their original order. Everything if there
/// aren't more than `size`.
pub fn sample_positions(positions: &[(f64, f64)], size: usize, seed: u64) -> Vec<(f64, f64)> {
    if positions.len() <= size {
        return positions.to_vec();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut indices = rand::seq::index::sample(&mut rng, positions.len(), size).into_vec();
    indices.sort_unstable();
    indices.into_iter().map(|i| positions[i]).collect()
}

/// The route with the lowest average distance to the sample, and that distance. Ties go to the
/// lower route number. None if there's no sample or no route.
pub fn best_route(sample: &[(f64, f64)], skeletons: &RouteSkeletons) -> Option<(RouteNo, f64)> {
    if sample.is_empty() {
        return None;
    }
    let mut best: Option<(RouteNo, f64)> = None;
    for skeleton in skeletons.iter() {
        let total: f64 = sample
            .iter()
            .map(|(lng, lat)| skeleton.distance_to(*lng, *lat))
            .sum();
        let score = total / sample.len() as f64;
        if !score.is_finite() {
            continue;
        }
        if best.as_ref().map(|(_, x)| score < *x).unwrap_or(true) {
            best = Some((skeleton.route_no.clone(), score));
        }
    }
    best
}

/// Like `best_route`, but a best match that isn't strictly closer than the threshold is
/// `Unmatched`. The score is reported either way.
pub fn classify(
    sample: &[(f64, f64)],
    skeletons: &RouteSkeletons,
    threshold: f64,
) -> Option<(Prediction, f64)> {
    let (route, score) = best_route(sample, skeletons)?;
    if score < threshold {
        Some((Prediction::Route(route), score))
    } else {
        Some((Prediction::Unmatched, score))
    }
}

pub fn write_mapping<W: std::io::Write>(writer: W, records: &[MappingRecord]) -> Result<()> {
    // The header goes in by hand so that an empty mapping still has one
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    writer.write_record(MAPPING_HEADER)?;
    for record in records {
        writer.serialize(MappingRow {
            date_file: &record.source_file,
            vehicle_id: &record.vehicle.0,
            predicted_route_no: record.prediction.to_string(),
            confidence_score: record.confidence,
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_mapping_file(path: &Path, records: &[MappingRecord]) -> Result<()> {
    let mut out = Vec::new();
    write_mapping(&mut out, records)?;
    if let Some(dir) = path.parent().filter(|x| !x.as_os_str().is_empty()) {
        fs_err::create_dir_all(dir)?;
    }
    write_atomic(path, &out)
}

// Depends only on the inputs, never on which worker or in what order vehicles are processed
fn sample_seed(seed: u64, source_file: &str, vehicle: &VehicleName) -> u64 {
    let mut hash = fnv1a(0xcbf2_9ce4_8422_2325, source_file.as_bytes());
    hash = fnv1a(hash, &[0]);
    hash = fnv1a(hash, vehicle.0.as_bytes());
    hash ^ seed
}

fn fnv1a(mut hash: u64, bytes: &[u8]) -> u64 {
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

fn round6(x: f64) -> f64 {
    (x * 1e6).round_ties_even() / 1e6
}

const MAPPING_HEADER: [&str; 4] = [
    "Date_File",
    "Vehicle_ID",
    "Predicted_Route_No",
    "Confidence_Score",
];

#[derive(Serialize)]
// Same order as MAPPING_HEADER
struct MappingRow<'a> {
    date_file: &'a str,
    vehicle_id: &'a str,
    predicted_route_no: String,
    confidence_score: f64,
}
