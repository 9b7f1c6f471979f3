use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Everything the pipeline needs to know about where files live and how to clean them. Any
/// subset of fields may be given in a JSON file; the rest keep their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub raw_dir: PathBuf,
    pub output_dir: PathBuf,
    pub route_dir: PathBuf,

    pub raw_pattern: String,
    pub clean_pattern: String,
    /// Cleaned file names are the raw names with this replaced by `clean_marker`
    pub raw_marker: String,
    pub clean_marker: String,

    pub mapping_output: PathBuf,
    pub skeleton_geojson: Option<PathBuf>,

    /// A ping is moving if its speed is strictly greater than this
    pub moving_speed_kmh: f64,
    /// Pings from this hour until `service_start_hour` are dropped
    pub service_end_hour: u32,
    pub service_start_hour: u32,
    pub signature_decimals: u32,

    pub sample_size: usize,
    /// In degrees. The best average distance must be strictly below this to count as a match.
    pub match_threshold: f64,
    pub sample_seed: u64,

    /// None means one worker per core
    pub threads: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("raw_GPS"),
            output_dir: PathBuf::from("processed_GPS"),
            route_dir: PathBuf::from("HCMC_bus_routes"),

            raw_pattern: "anonymized_raw_*.csv".to_string(),
            clean_pattern: "anonymized_final_clean_*.csv".to_string(),
            raw_marker: "_raw".to_string(),
            clean_marker: "_final_clean".to_string(),

            mapping_output: PathBuf::from("Master_Vehicle_Route_Mapping.csv"),
            skeleton_geojson: None,

            moving_speed_kmh: 3.0,
            service_end_hour: 23,
            service_start_hour: 4,
            signature_decimals: 5,

            sample_size: 50,
            match_threshold: 0.003,
            sample_seed: 0,

            threads: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs_err::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("invalid config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.service_end_hour > 24 || self.service_start_hour > 24 {
            bail!(
                "Service hours must be within 0..=24, got {} and {}",
                self.service_end_hour,
                self.service_start_hour
            );
        }
        if self.signature_decimals > 9 {
            bail!("signature_decimals {} is too precise", self.signature_decimals);
        }
        if !(self.match_threshold > 0.0) {
            bail!("match_threshold must be positive");
        }
        if self.raw_marker.is_empty() {
            bail!("raw_marker can't be empty");
        }
        Ok(())
    }

    /// The name a raw file's cleaned output gets
    pub fn clean_name(&self, raw_name: &str) -> String {
        raw_name.replace(&self.raw_marker, &self.clean_marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json() {
        let config: Config =
            serde_json::from_str(r#"{"raw_dir": "/data/raw", "sample_seed": 42}"#).unwrap();
        assert_eq!(config.raw_dir, PathBuf::from("/data/raw"));
        assert_eq!(config.sample_seed, 42);
        assert_eq!(config.sample_size, 50);
        assert_eq!(config.moving_speed_kmh, 3.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn clean_name() {
        let config = Config::default();
        assert_eq!(
            config.clean_name("anonymized_raw_2025-04-01.csv"),
            "anonymized_final_clean_2025-04-01.csv"
        );
        assert_eq!(config.clean_name("other.csv"), "other.csv");
    }

    #[test]
    fn bad_hours() {
        let config = Config {
            service_end_hour: 25,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
