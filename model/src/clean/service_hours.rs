use chrono::{NaiveDateTime, Timelike};

use crate::{Config, Trajectory};

/// Buses don't run overnight; anything recorded then is depot noise.
pub fn in_service(time: &NaiveDateTime, config: &Config) -> bool {
    let hour = time.hour();
    let (end, start) = (config.service_end_hour, config.service_start_hour);
    let out_of_service = if end > start {
        // The quiet window wraps past midnight, like 23:00 to 04:00
        hour >= end || hour < start
    } else {
        hour >= end && hour < start
    };
    !out_of_service
}

pub fn filter_service_hours(trajectory: &mut Trajectory, config: &Config) {
    trajectory
        .pings
        .retain(|ping| in_service(&ping.time, config));
}
