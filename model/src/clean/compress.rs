// Run-length reduction of parked vehicles: consecutive pings with the same rounded position and
// door states collapse into the first one.

use crate::{GpsPing, Trajectory};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateSignature {
    lng: i64,
    lat: i64,
    door_up: Option<bool>,
    door_down: Option<bool>,
}

impl StateSignature {
    pub fn new(ping: &GpsPing, decimals: u32) -> Self {
        // Halves go to the even neighbour
        let scale = 10f64.powi(decimals as i32);
        Self {
            lng: (ping.lng * scale).round_ties_even() as i64,
            lat: (ping.lat * scale).round_ties_even() as i64,
            door_up: ping.door_up,
            door_down: ping.door_down,
        }
    }
}

/// The first ping always stays, marking where the trajectory starts.
pub fn compress(trajectory: &mut Trajectory, decimals: u32) {
    let mut prev: Option<StateSignature> = None;
    trajectory.pings.retain(|ping| {
        let signature = StateSignature::new(ping, decimals);
        let keep = prev != Some(signature);
        prev = Some(signature);
        keep
    });
}
