// The two cleaning phases. Phase 1 turns each raw day file into a cleaned trajectory file; phase 2
// squeezes repeated parked states out of the cleaned files in place.

mod compress;
mod service_hours;
mod trim;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use rayon::prelude::*;

pub use compress::{compress, StateSignature};
pub use service_hours::{filter_service_hours, in_service};
pub use trim::{backward_reachable, forward_reachable, keep_mask, moving_flags, smart_trim};

use crate::batch::{process_files, BatchReport, FilePattern, Outcome};
use crate::trajectory::{group_in_order, normalize};
use crate::{avl, Config};

#[derive(Clone, Debug, PartialEq)]
pub struct CleanStats {
    pub output: PathBuf,
    pub raw_rows: usize,
    pub dropped_rows: usize,
    pub vehicles: usize,
    pub kept_rows: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompressStats {
    pub before: usize,
    pub after: usize,
}

/// Phase 1 over every raw file. Only an unusable configuration is an error.
pub fn run_cleaning(config: &Config) -> Result<BatchReport<CleanStats>> {
    let start = Instant::now();
    if !config.raw_dir.is_dir() {
        bail!("Raw GPS directory {} doesn't exist", config.raw_dir.display());
    }
    fs_err::create_dir_all(&config.output_dir)?;

    let files = FilePattern::new(&config.raw_pattern)?.find_in(&config.raw_dir)?;
    if files.is_empty() {
        warn!(
            "No files matching {} in {}",
            config.raw_pattern,
            config.raw_dir.display()
        );
    }
    let report = process_files(config, files, |path| clean_file(config, path))?;
    report.log_summary("clean");
    info!("Cleaning took {:.2}s", start.elapsed().as_secs_f64());
    Ok(report)
}

/// Phase 2 over every cleaned file, overwriting each one.
pub fn run_compression(config: &Config) -> Result<BatchReport<CompressStats>> {
    let start = Instant::now();
    if !config.output_dir.is_dir() {
        bail!(
            "Cleaned GPS directory {} doesn't exist",
            config.output_dir.display()
        );
    }

    let files = FilePattern::new(&config.clean_pattern)?.find_in(&config.output_dir)?;
    if files.is_empty() {
        warn!(
            "No files matching {} in {}",
            config.clean_pattern,
            config.output_dir.display()
        );
    }
    let report = process_files(config, files, |path| compress_file(config, path))?;
    report.log_summary("compress");
    info!("Compression took {:.2}s", start.elapsed().as_secs_f64());
    Ok(report)
}

/// Sort, reconstruct speeds, drop overnight pings, trim idle ends, and write the result.
pub fn clean_file(config: &Config, path: &Path) -> Result<Outcome<CleanStats>> {
    let file_name = path
        .file_name()
        .and_then(|x| x.to_str())
        .ok_or_else(|| anyhow!("{} has no usable file name", path.display()))?;
    let output = config.output_dir.join(config.clean_name(file_name));
    if same_file(&output, path) {
        return Ok(Outcome::skip(format!(
            "the cleaned name for {file_name} is the same file; it has no {:?} to replace",
            config.raw_marker
        )));
    }

    let loaded = avl::load_file(path).with_context(|| format!("reading {}", path.display()))?;
    if loaded.dropped_rows > 0 {
        warn!(
            "{file_name}: dropped {} of {} rows with bad fields",
            loaded.dropped_rows, loaded.total_rows
        );
    }
    if loaded.rows.is_empty() {
        return Ok(Outcome::skip("no valid rows"));
    }
    let (raw_rows, dropped_rows) = (loaded.total_rows, loaded.dropped_rows);

    let mut trajectories = normalize(loaded.rows);
    let vehicles = trajectories.len();
    trajectories.par_iter_mut().for_each(|(_, trajectory)| {
        // Speeds were already computed using the pings this removes
        filter_service_hours(trajectory, config);
        smart_trim(trajectory, config.moving_speed_kmh);
    });
    trajectories.retain(|_, trajectory| !trajectory.is_empty());
    let kept_rows = trajectories.values().map(|t| t.len()).sum();

    avl::write_file(&output, &trajectories)
        .with_context(|| format!("writing {}", output.display()))?;
    info!(
        "{file_name}: cleaned {} vehicles, {kept_rows} of {raw_rows} rows kept -> {}",
        vehicles,
        output.display()
    );
    Ok(Outcome::Done(CleanStats {
        output,
        raw_rows,
        dropped_rows,
        vehicles,
        kept_rows,
    }))
}

/// Collapse repeated states and overwrite the file.
pub fn compress_file(config: &Config, path: &Path) -> Result<Outcome<CompressStats>> {
    let loaded = avl::load_file(path).with_context(|| format!("reading {}", path.display()))?;
    if loaded.rows.is_empty() {
        return Ok(Outcome::skip("no rows to compress"));
    }
    let before = loaded.total_rows;

    // Already sorted by phase 1, so don't re-normalize; that would recompute speeds
    let mut trajectories = group_in_order(loaded.rows);
    trajectories.par_iter_mut().for_each(|(_, trajectory)| {
        compress(trajectory, config.signature_decimals);
    });
    let after = trajectories.values().map(|t| t.len()).sum();

    avl::write_file(path, &trajectories)
        .with_context(|| format!("writing {}", path.display()))?;
    info!(
        "{}: compressed from {before} to {after} rows",
        path.display()
    );
    Ok(Outcome::Done(CompressStats { before, after }))
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
