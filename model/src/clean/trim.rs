// Smart trim: drop the idle stretch before a vehicle first moves and after it last moves, keeping
// one sample of context on either side.

use crate::{GpsPing, Trajectory};

pub fn moving_flags(pings: &[GpsPing], moving_speed_kmh: f64) -> Vec<bool> {
    pings
        .iter()
        .map(|ping| matches!(ping.speed, Some(speed) if speed > moving_speed_kmh))
        .collect()
}

/// True from the first moving ping onwards
pub fn forward_reachable(moving: &[bool]) -> Vec<bool> {
    let mut seen = false;
    moving
        .iter()
        .map(|x| {
            seen |= *x;
            seen
        })
        .collect()
}

/// True up to and including the last moving ping
pub fn backward_reachable(moving: &[bool]) -> Vec<bool> {
    let mut result = vec![false; moving.len()];
    let mut seen = false;
    for (i, x) in moving.iter().enumerate().rev() {
        seen |= *x;
        result[i] = seen;
    }
    result
}

/// Which pings survive: the core (first through last movement) plus one ping on each side.
pub fn keep_mask(pings: &[GpsPing], moving_speed_kmh: f64) -> Vec<bool> {
    let moving = moving_flags(pings, moving_speed_kmh);
    let forward = forward_reachable(&moving);
    let backward = backward_reachable(&moving);
    let core: Vec<bool> = forward
        .iter()
        .zip(backward.iter())
        .map(|(f, b)| *f && *b)
        .collect();

    let n = core.len();
    (0..n)
        .map(|i| {
            let before_core = i + 1 < n && core[i + 1];
            let after_core = i > 0 && core[i - 1];
            core[i] || before_core || after_core
        })
        .collect()
}

/// A vehicle that never moves ends up empty.
pub fn smart_trim(trajectory: &mut Trajectory, moving_speed_kmh: f64) {
    let keep = keep_mask(&trajectory.pings, moving_speed_kmh);
    trajectory.retain_mask(&keep);
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::VehicleName;

    fn trajectory(speeds: &[Option<f64>]) -> Trajectory {
        let start = NaiveDate::from_ymd_opt(2025, 4, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let mut t = Trajectory::new(VehicleName("V1".to_string()));
        for (i, speed) in speeds.iter().enumerate() {
            t.pings.push(GpsPing {
                time: start + chrono::Duration::minutes(i as i64),
                lat: 10.0,
                lng: 106.0 + i as f64 * 0.001,
                speed: *speed,
                door_up: None,
                door_down: None,
            });
        }
        t
    }

    fn speeds(t: &Trajectory) -> Vec<Option<f64>> {
        t.pings.iter().map(|p| p.speed).collect()
    }

    #[test]
    fn worked_example() {
        let t = trajectory(&[Some(0.0), Some(0.0), Some(20.0), Some(0.0)]);
        let moving = moving_flags(&t.pings, 3.0);
        assert_eq!(moving, vec![false, false, true, false]);
        assert_eq!(forward_reachable(&moving), vec![false, false, true, true]);
        assert_eq!(backward_reachable(&moving), vec![true, true, true, false]);
        assert_eq!(keep_mask(&t.pings, 3.0), vec![false, true, true, true]);
    }

    #[test]
    fn trims_idle_ends() {
        let mut t = trajectory(&[
            Some(0.0),
            Some(1.0),
            None,
            Some(2.0),
            Some(15.0),
            Some(0.0),
            Some(30.0),
            Some(2.9),
            Some(0.0),
            Some(0.0),
        ]);
        smart_trim(&mut t, 3.0);
        assert_eq!(
            speeds(&t),
            vec![Some(2.0), Some(15.0), Some(0.0), Some(30.0), Some(2.9)]
        );
    }

    #[test]
    fn threshold_is_strict() {
        let mut t = trajectory(&[Some(3.0), Some(3.0), Some(3.0)]);
        smart_trim(&mut t, 3.0);
        assert!(t.is_empty());
    }

    #[test]
    fn never_moving_is_emptied() {
        let mut t = trajectory(&[None, Some(0.0), None]);
        smart_trim(&mut t, 3.0);
        assert!(t.is_empty());

        let mut t = trajectory(&[]);
        smart_trim(&mut t, 3.0);
        assert!(t.is_empty());
    }

    #[test]
    fn moving_at_the_edges() {
        let mut t = trajectory(&[Some(10.0), Some(0.0), Some(0.0), Some(10.0)]);
        smart_trim(&mut t, 3.0);
        assert_eq!(t.len(), 4);

        let mut t = trajectory(&[Some(10.0)]);
        smart_trim(&mut t, 3.0);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn idempotent() {
        let cases: Vec<Vec<Option<f64>>> = vec![
            vec![Some(0.0), Some(0.0), Some(20.0), Some(0.0)],
            vec![Some(0.0), Some(0.0), Some(0.0), Some(5.0), Some(0.0), Some(0.0), Some(0.0)],
            vec![None, Some(9.0), None, None, Some(9.0), None, None],
            vec![Some(1.0), Some(2.0)],
        ];
        for case in cases {
            let mut once = trajectory(&case);
            smart_trim(&mut once, 3.0);
            let mut twice = once.clone();
            smart_trim(&mut twice, 3.0);
            assert_eq!(once, twice);
        }
    }
}
