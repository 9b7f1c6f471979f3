use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::dist::haversine_many;
use crate::VehicleName;

/// One position sample. The vehicle lives on the owning `Trajectory`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GpsPing {
    pub time: NaiveDateTime,
    pub lat: f64,
    pub lng: f64,
    /// km/h
    pub speed: Option<f64>,
    pub door_up: Option<bool>,
    pub door_down: Option<bool>,
}

/// The pings of one vehicle. Every cleaning stage only removes pings or fills in speeds; the order
/// is never changed after `normalize`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub vehicle: VehicleName,
    pub pings: Vec<GpsPing>,
}

pub type Trajectories = BTreeMap<VehicleName, Trajectory>;

impl Trajectory {
    pub fn new(vehicle: VehicleName) -> Self {
        Self {
            vehicle,
            pings: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.pings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pings.is_empty()
    }

    /// Keep only the pings whose flag is set. The mask must line up with the pings.
    pub fn retain_mask(&mut self, keep: &[bool]) {
        assert_eq!(keep.len(), self.pings.len());
        let mut idx = 0;
        self.pings.retain(|_| {
            let result = keep[idx];
            idx += 1;
            result
        });
    }
}

/// Groups rows by vehicle, keeping the rows' relative order. Used for files that were already
/// normalized.
pub fn group_in_order(rows: Vec<(VehicleName, GpsPing)>) -> Trajectories {
    let mut per_vehicle = Trajectories::new();
    for (vehicle, ping) in rows {
        per_vehicle
            .entry(vehicle.clone())
            .or_insert_with(|| Trajectory::new(vehicle))
            .pings
            .push(ping);
    }
    per_vehicle
}

/// Turns unordered raw rows into one trajectory per vehicle: sorted by time, with only the first
/// ping kept for a repeated timestamp, and speeds reconciled with the speed implied by position.
pub fn normalize(rows: Vec<(VehicleName, GpsPing)>) -> Trajectories {
    let mut per_vehicle = group_in_order(rows);
    for trajectory in per_vehicle.values_mut() {
        // Stable, so the first row in the file wins among equal timestamps
        trajectory.pings.sort_by_key(|ping| ping.time);
        trajectory.pings.dedup_by_key(|ping| ping.time);
        reconstruct_speeds(&mut trajectory.pings);
    }
    per_vehicle
}

/// Assumes the pings are sorted by time.
pub fn reconstruct_speeds(pings: &mut [GpsPing]) {
    if pings.len() < 2 {
        return;
    }
    let lngs: Vec<f64> = pings.iter().map(|p| p.lng).collect();
    let lats: Vec<f64> = pings.iter().map(|p| p.lat).collect();
    let n = pings.len();
    let dists = haversine_many(&lngs[..n - 1], &lats[..n - 1], &lngs[1..], &lats[1..]);

    for (i, dist) in dists.into_iter().enumerate() {
        let elapsed = pings[i + 1].time - pings[i].time;
        let seconds = elapsed.num_milliseconds() as f64 / 1000.0;
        let observed = observed_speed(dist, seconds);
        let ping = &mut pings[i + 1];
        ping.speed = reconcile_speed(ping.speed, observed);
    }
}

/// km/h, or None if no time passed
pub fn observed_speed(meters: f64, seconds: f64) -> Option<f64> {
    if seconds <= 0.0 {
        return None;
    }
    let kmh = meters / seconds * 3.6;
    if kmh.is_finite() {
        Some(kmh)
    } else {
        None
    }
}

/// Both sources are noisy, so average them when both exist.
pub fn reconcile_speed(reported: Option<f64>, observed: Option<f64>) -> Option<f64> {
    match (reported, observed) {
        (Some(reported), Some(observed)) => Some((reported + observed) / 2.0),
        (Some(reported), None) => Some(reported),
        (None, observed) => observed,
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 4, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn ping(time: NaiveDateTime, lng: f64, speed: Option<f64>) -> GpsPing {
        GpsPing {
            time,
            lat: 10.0,
            lng,
            speed,
            door_up: None,
            door_down: None,
        }
    }

    fn v(name: &str) -> VehicleName {
        VehicleName(name.to_string())
    }

    #[test]
    fn sorted_and_deduplicated_per_vehicle() {
        let rows = vec![
            (v("B"), ping(at(8, 0, 30), 106.0, None)),
            (v("A"), ping(at(8, 2, 0), 106.2, Some(1.0))),
            (v("A"), ping(at(8, 0, 0), 106.0, Some(2.0))),
            (v("A"), ping(at(8, 1, 0), 106.1, Some(3.0))),
            (v("A"), ping(at(8, 1, 0), 106.9, Some(4.0))),
            (v("B"), ping(at(8, 0, 0), 106.0, None)),
        ];
        let trajectories = normalize(rows);
        assert_eq!(trajectories.len(), 2);

        for trajectory in trajectories.values() {
            for pair in trajectory.pings.windows(2) {
                assert!(pair[0].time < pair[1].time);
            }
        }
        let a = &trajectories[&v("A")];
        assert_eq!(a.len(), 3);
        // The first of the duplicated rows survives
        assert_eq!(a.pings[1].lng, 106.1);
        assert_eq!(trajectories[&v("B")].len(), 2);
    }

    #[test]
    fn speed_reconciliation() {
        let rows = vec![
            (v("A"), ping(at(8, 0, 0), 106.0, Some(10.0))),
            (v("A"), ping(at(8, 0, 10), 106.001, None)),
            (v("A"), ping(at(8, 0, 20), 106.002, Some(50.0))),
        ];
        let a = &normalize(rows)[&v("A")];

        // The first ping has nothing to compare against
        assert_eq!(a.pings[0].speed, Some(10.0));

        let meters = crate::dist::haversine_meters(106.0, 10.0, 106.001, 10.0);
        let observed = meters / 10.0 * 3.6;
        let speed = a.pings[1].speed.unwrap();
        assert!((speed - observed).abs() < 1e-9);

        let speed = a.pings[2].speed.unwrap();
        assert!((speed - (50.0 + observed) / 2.0).abs() < 1e-6);
    }

    #[test]
    fn lone_ping_without_speed() {
        let a = &normalize(vec![(v("A"), ping(at(8, 0, 0), 106.0, None))])[&v("A")];
        assert_eq!(a.pings[0].speed, None);
    }

    #[test]
    fn degenerate_elapsed_time() {
        assert_eq!(observed_speed(100.0, 0.0), None);
        assert_eq!(observed_speed(100.0, -5.0), None);
        assert_eq!(observed_speed(0.0, 10.0), Some(0.0));
        assert_eq!(reconcile_speed(None, None), None);
        assert_eq!(reconcile_speed(Some(4.0), None), Some(4.0));
        assert_eq!(reconcile_speed(None, Some(6.0)), Some(6.0));
        assert_eq!(reconcile_speed(Some(4.0), Some(6.0)), Some(5.0));
    }

    #[test]
    fn retain_mask() {
        let mut t = Trajectory::new(v("A"));
        for i in 0..4 {
            t.pings.push(ping(at(8, i, 0), 106.0 + i as f64, None));
        }
        t.retain_mask(&[true, false, false, true]);
        assert_eq!(t.len(), 2);
        assert_eq!(t.pings[1].lng, 109.0);
    }
}
