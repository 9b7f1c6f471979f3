// Reading and writing ping files. Raw files come straight from the fleet; cleaned files use the
// same columns, minus anything extra.

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::batch::write_atomic;
use crate::{GpsPing, Trajectories, VehicleName};

const REQUIRED_COLUMNS: [&str; 4] = ["anonymized_vehicle", "datetime", "lat", "lng"];

/// The usable rows of a file, plus how many were thrown away.
pub struct LoadedPings {
    pub rows: Vec<(VehicleName, GpsPing)>,
    pub total_rows: usize,
    pub dropped_rows: usize,
}

pub fn load<R: std::io::Read>(reader: R) -> Result<LoadedPings> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    check_columns(reader.headers()?, &REQUIRED_COLUMNS)?;

    let mut loaded = LoadedPings {
        rows: Vec::new(),
        total_rows: 0,
        dropped_rows: 0,
    };
    for rec in reader.deserialize::<AVL>() {
        loaded.total_rows += 1;
        let parsed = rec.map_err(anyhow::Error::from).and_then(AVL::parse);
        match parsed {
            Ok(row) => loaded.rows.push(row),
            Err(err) => {
                if loaded.dropped_rows == 0 {
                    debug!("Dropping bad row {}: {err}", loaded.total_rows);
                }
                loaded.dropped_rows += 1;
            }
        }
    }
    Ok(loaded)
}

pub fn load_file(path: &Path) -> Result<LoadedPings> {
    load(fs_err::File::open(path)?)
}

/// Only the columns needed to place vehicles, for files that may have lost other columns.
pub fn load_positions<R: std::io::Read>(reader: R) -> Result<Vec<(VehicleName, f64, f64)>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    check_columns(reader.headers()?, &["anonymized_vehicle", "lat", "lng"])?;

    let mut results = Vec::new();
    let mut dropped = 0;
    for rec in reader.deserialize::<Position>() {
        let rec = match rec {
            Ok(rec) => rec,
            Err(_) => {
                dropped += 1;
                continue;
            }
        };
        match (
            rec.vehicle.filter(|x| !x.is_empty()),
            parse_coordinate(rec.lng.as_deref()),
            parse_coordinate(rec.lat.as_deref()),
        ) {
            (Some(vehicle), Some(lng), Some(lat)) => {
                results.push((VehicleName(vehicle), lng, lat));
            }
            _ => {
                dropped += 1;
            }
        }
    }
    if dropped > 0 {
        debug!("Dropped {dropped} rows without a vehicle or coordinates");
    }
    Ok(results)
}

/// Vehicles in order, each vehicle's pings in order.
pub fn write<W: std::io::Write>(writer: W, trajectories: &Trajectories) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    // An empty file still gets a header
    writer.write_record(COLUMNS)?;
    for trajectory in trajectories.values() {
        for ping in &trajectory.pings {
            writer.serialize(CleanRow {
                anonymized_vehicle: &trajectory.vehicle.0,
                datetime: format_datetime(&ping.time),
                lat: ping.lat,
                lng: ping.lng,
                speed: ping.speed,
                door_up: ping.door_up.map(format_door),
                door_down: ping.door_down.map(format_door),
            })?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn write_file(path: &Path, trajectories: &Trajectories) -> Result<()> {
    let mut out = Vec::new();
    write(&mut out, trajectories)?;
    write_atomic(path, &out)
}

const COLUMNS: [&str; 7] = [
    "anonymized_vehicle",
    "datetime",
    "lat",
    "lng",
    "speed",
    "door_up",
    "door_down",
];

fn check_columns(headers: &csv::StringRecord, required: &[&str]) -> Result<()> {
    let missing: Vec<&str> = required
        .iter()
        .filter(|col| !headers.iter().any(|h| h == **col))
        .cloned()
        .collect();
    if !missing.is_empty() {
        bail!("Missing columns: {}", missing.join(", "));
    }
    Ok(())
}

pub fn parse_datetime(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    // The wall-clock time is what matters, so a UTC marker is just dropped
    let naive = raw.strip_suffix('Z').unwrap_or(raw);
    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Ok(dt);
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Ok(dt.naive_local());
        }
    }
    bail!("Unknown datetime format: {raw}")
}

pub fn format_datetime(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()
}

fn parse_coordinate(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|x| x.parse::<f64>().ok())
        .filter(|x| x.is_finite())
}

// Unknown door state is None
fn parse_door(raw: Option<&str>) -> Option<bool> {
    match raw?.to_ascii_lowercase().as_str() {
        "true" | "1" | "1.0" => Some(true),
        "false" | "0" | "0.0" => Some(false),
        _ => None,
    }
}

fn format_door(x: bool) -> &'static str {
    if x {
        "True"
    } else {
        "False"
    }
}

// Everything is read as text, so one bad field doesn't lose the whole row before we look at it
#[derive(Deserialize)]
struct AVL {
    #[serde(default)]
    anonymized_vehicle: Option<String>,
    #[serde(default)]
    datetime: Option<String>,
    #[serde(default)]
    lat: Option<String>,
    #[serde(default)]
    lng: Option<String>,
    #[serde(default)]
    speed: Option<String>,
    #[serde(default)]
    door_up: Option<String>,
    #[serde(default)]
    door_down: Option<String>,
}

impl AVL {
    fn parse(self) -> Result<(VehicleName, GpsPing)> {
        let vehicle = match self.anonymized_vehicle {
            Some(x) if !x.is_empty() => VehicleName(x),
            _ => bail!("no vehicle"),
        };
        let time = match self.datetime {
            Some(ref x) if !x.is_empty() => parse_datetime(x)?,
            _ => bail!("no datetime"),
        };
        let lat = parse_coordinate(self.lat.as_deref()).ok_or_else(|| anyhow!("bad lat"))?;
        let lng = parse_coordinate(self.lng.as_deref()).ok_or_else(|| anyhow!("bad lng"))?;
        // A broken speed is the same as a missing one
        let speed = parse_coordinate(self.speed.as_deref());
        Ok((
            vehicle,
            GpsPing {
                time,
                lat,
                lng,
                speed,
                door_up: parse_door(self.door_up.as_deref()),
                door_down: parse_door(self.door_down.as_deref()),
            },
        ))
    }
}

#[derive(Deserialize)]
struct Position {
    #[serde(rename = "anonymized_vehicle", default)]
    vehicle: Option<String>,
    #[serde(default)]
    lat: Option<String>,
    #[serde(default)]
    lng: Option<String>,
}

#[derive(Serialize)]
struct CleanRow<'a> {
    anonymized_vehicle: &'a str,
    datetime: String,
    lat: f64,
    lng: f64,
    speed: Option<f64>,
    door_up: Option<&'static str>,
    door_down: Option<&'static str>,
}
