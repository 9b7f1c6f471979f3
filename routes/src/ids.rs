use std::fmt;

use serde::{Deserialize, Serialize};

/// The public route number ("01", "152"), independent of the folder a route is stored in.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RouteNo(pub String);

impl RouteNo {
    pub fn new<S: Into<String>>(x: S) -> Self {
        Self(x.into())
    }
}

impl fmt::Display for RouteNo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StopID(pub String);

/// Which stop file a stop came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    Outbound,
    Inbound,
}

impl Direction {
    pub fn all() -> Vec<Self> {
        vec![Direction::Outbound, Direction::Inbound]
    }

    pub fn stops_file(self) -> &'static str {
        match self {
            Direction::Outbound => "stops_by_var.csv",
            Direction::Inbound => "rev_stops_by_var.csv",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Direction::Outbound => write!(f, "outbound"),
            Direction::Inbound => write!(f, "inbound"),
        }
    }
}
