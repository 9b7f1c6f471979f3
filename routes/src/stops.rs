use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{Direction, StopID};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub stop_id: Option<StopID>,
    pub name: Option<String>,
    pub direction: Direction,
    pub lng: f64,
    pub lat: f64,
}

/// Reads one ordered stop file. Rows without usable coordinates are dropped; the file order is
/// the order along the route.
pub fn load<R: std::io::Read>(reader: R, direction: Direction) -> Result<Vec<Stop>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = reader.headers()?.clone();
    for required in ["Lat", "Lng"] {
        if !headers.iter().any(|h| h == required) {
            bail!("{} has no {required} column", direction.stops_file());
        }
    }

    let mut stops = Vec::new();
    let mut skipped = 0;
    for rec in reader.deserialize() {
        let rec: Record = match rec {
            Ok(rec) => rec,
            Err(err) => {
                debug!("Skipping stop row: {err}");
                skipped += 1;
                continue;
            }
        };
        match (rec.lng, rec.lat) {
            (Some(lng), Some(lat)) if lng.is_finite() && lat.is_finite() => {
                stops.push(Stop {
                    stop_id: rec.stop_id.filter(|x| !x.is_empty()).map(StopID),
                    name: rec.name.filter(|x| !x.is_empty()),
                    direction,
                    lng,
                    lat,
                });
            }
            _ => {
                skipped += 1;
            }
        }
    }
    if skipped > 0 {
        warn!(
            "Skipped {skipped} stop rows without coordinates in {}",
            direction.stops_file()
        );
    }
    Ok(stops)
}

#[derive(Deserialize)]
struct Record {
    #[serde(rename = "StopId")]
    stop_id: Option<String>,
    #[serde(rename = "Name")]
    name: Option<String>,
    #[serde(rename = "Lat")]
    lat: Option<f64>,
    #[serde(rename = "Lng")]
    lng: Option<f64>,
}
