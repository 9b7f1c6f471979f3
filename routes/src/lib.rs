#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

mod ids;
mod stops;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use geo::{EuclideanDistance, LineString, Point};
use serde::Deserialize;

pub use ids::{Direction, RouteNo, StopID};
pub use stops::Stop;

const ROUTE_INFO_FILE: &str = "route_by_id.csv";

/// The reference geometry of one route: outbound stops followed by inbound stops, as one
/// polyline in (lng, lat) degrees. Direction of travel doesn't matter for telling routes apart,
/// so both directions are glued together.
#[derive(Clone, Debug)]
pub struct RouteSkeleton {
    pub route_no: RouteNo,
    pub folder: PathBuf,
    pub stops: Vec<Stop>,
    pub line: LineString<f64>,
}

impl RouteSkeleton {
    /// None if there aren't at least 2 points to form a line
    pub fn new(route_no: RouteNo, folder: PathBuf, stops: Vec<Stop>) -> Option<Self> {
        if stops.len() < 2 {
            return None;
        }
        let line = LineString::from(
            stops
                .iter()
                .map(|stop| (stop.lng, stop.lat))
                .collect::<Vec<_>>(),
        );
        Some(Self {
            route_no,
            folder,
            stops,
            line,
        })
    }

    /// Planar distance in degrees from a position to the closest point on the skeleton.
    pub fn distance_to(&self, lng: f64, lat: f64) -> f64 {
        Point::new(lng, lat).euclidean_distance(&self.line)
    }
}

/// Every known route, keyed by route number. Built once per run and only read afterwards.
#[derive(Clone, Debug, Default)]
pub struct RouteSkeletons {
    pub routes: BTreeMap<RouteNo, RouteSkeleton>,
}

impl RouteSkeletons {
    pub fn empty() -> Self {
        Self {
            routes: BTreeMap::new(),
        }
    }

    /// Scans every subdirectory of `route_dir`. A broken route folder is logged and skipped; only
    /// a missing `route_dir` is an error.
    pub fn load_from_dir(route_dir: &Path) -> Result<Self> {
        if !route_dir.is_dir() {
            bail!("Route directory {} doesn't exist", route_dir.display());
        }

        let mut folders = Vec::new();
        for entry in fs_err::read_dir(route_dir)? {
            let path = entry?.path();
            if path.is_dir() {
                folders.push(path);
            }
        }
        // read_dir order is platform-dependent; make duplicate resolution stable
        folders.sort();

        let mut skeletons = Self::empty();
        for folder in folders {
            match load_route(&folder) {
                Ok(Some(skeleton)) => {
                    let route_no = skeleton.route_no.clone();
                    if !skeletons.insert(skeleton) {
                        warn!(
                            "Route {route_no} from {} is already defined; ignoring it",
                            folder.display()
                        );
                    }
                }
                Ok(None) => {
                    warn!(
                        "Route folder {} has fewer than 2 stops; skipping",
                        folder.display()
                    );
                }
                Err(err) => {
                    warn!("Couldn't read route folder {}: {err:#}", folder.display());
                }
            }
        }
        info!(
            "Built {} route skeletons from {}",
            skeletons.len(),
            route_dir.display()
        );
        Ok(skeletons)
    }

    /// Returns false (and keeps the existing one) if the route number is already present.
    pub fn insert(&mut self, skeleton: RouteSkeleton) -> bool {
        if self.routes.contains_key(&skeleton.route_no) {
            return false;
        }
        self.routes.insert(skeleton.route_no.clone(), skeleton);
        true
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteSkeleton> {
        self.routes.values()
    }

    /// One LineString per route, plus one Point per stop.
    pub fn to_geojson(&self) -> geojson::GeoJson {
        use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, Value};

        let mut features = Vec::new();
        for skeleton in self.iter() {
            let mut properties = JsonObject::new();
            properties.insert("route_no".to_string(), skeleton.route_no.0.clone().into());
            features.push(Feature {
                bbox: None,
                geometry: Some(Geometry::new(Value::LineString(
                    skeleton.line.coords().map(|c| vec![c.x, c.y]).collect(),
                ))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            });

            for stop in &skeleton.stops {
                let mut properties = JsonObject::new();
                properties.insert("route_no".to_string(), skeleton.route_no.0.clone().into());
                properties.insert("direction".to_string(), stop.direction.to_string().into());
                if let Some(ref id) = stop.stop_id {
                    properties.insert("stop_id".to_string(), id.0.clone().into());
                }
                if let Some(ref name) = stop.name {
                    properties.insert("name".to_string(), name.clone().into());
                }
                features.push(Feature {
                    bbox: None,
                    geometry: Some(Geometry::new(Value::Point(vec![stop.lng, stop.lat]))),
                    id: None,
                    properties: Some(properties),
                    foreign_members: None,
                });
            }
        }

        GeoJson::FeatureCollection(FeatureCollection {
            features,
            bbox: None,
            foreign_members: None,
        })
    }

    pub fn write_geojson(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string(&self.to_geojson())?;
        fs_err::write(path, contents)?;
        info!("Wrote route skeletons to {}", path.display());
        Ok(())
    }
}

fn load_route(folder: &Path) -> Result<Option<RouteSkeleton>> {
    let folder_name = folder
        .file_name()
        .map(|x| x.to_string_lossy().to_string())
        .ok_or_else(|| anyhow!("{} has no folder name", folder.display()))?;

    let info_path = folder.join(ROUTE_INFO_FILE);
    let from_info = if info_path.exists() {
        read_route_no(&info_path)?
    } else {
        None
    };
    let route_no = from_info.unwrap_or_else(|| RouteNo(folder_name));

    let mut stops = Vec::new();
    for direction in Direction::all() {
        let path = folder.join(direction.stops_file());
        if !path.exists() {
            continue;
        }
        // A broken file for one direction still leaves the other one usable
        match fs_err::File::open(&path)
            .map_err(anyhow::Error::from)
            .and_then(|file| stops::load(file, direction))
        {
            Ok(loaded) => stops.extend(loaded),
            Err(err) => warn!("Skipping {}: {err:#}", path.display()),
        }
    }

    Ok(RouteSkeleton::new(route_no, folder.to_path_buf(), stops))
}

// The route number is in the first row. An empty file or an empty value means "use the folder
// name".
fn read_route_no(path: &Path) -> Result<Option<RouteNo>> {
    let file = fs_err::File::open(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file);
    match reader.deserialize::<RouteInfo>().next() {
        Some(rec) => {
            let rec = rec.with_context(|| path.display().to_string())?;
            Ok(rec.route_no.filter(|x| !x.is_empty()).map(RouteNo))
        }
        None => Ok(None),
    }
}

#[derive(Deserialize)]
struct RouteInfo {
    #[serde(rename = "RouteNo")]
    route_no: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop(lng: f64, lat: f64, direction: Direction) -> Stop {
        Stop {
            stop_id: None,
            name: None,
            direction,
            lng,
            lat,
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("routes-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn too_few_points() {
        assert!(RouteSkeleton::new(
            RouteNo::new("1"),
            PathBuf::new(),
            vec![stop(106.0, 10.0, Direction::Outbound)]
        )
        .is_none());
    }

    #[test]
    fn distance_to_line() {
        let skeleton = RouteSkeleton::new(
            RouteNo::new("1"),
            PathBuf::new(),
            vec![
                stop(106.0, 10.0, Direction::Outbound),
                stop(106.1, 10.0, Direction::Outbound),
            ],
        )
        .unwrap();
        assert!(skeleton.distance_to(106.05, 10.0) < 1e-12);
        assert!((skeleton.distance_to(106.05, 10.002) - 0.002).abs() < 1e-9);
        // Past the end, the distance is to the endpoint
        assert!((skeleton.distance_to(106.1, 10.003) - 0.003).abs() < 1e-9);
    }

    #[test]
    fn load_routes_from_folders() {
        let dir = scratch_dir("load");

        // Route number comes from the metadata, outbound then inbound
        let a = dir.join("a_folder");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::write(a.join(ROUTE_INFO_FILE), "RouteId,RouteNo\n7,01\n").unwrap();
        std::fs::write(
            a.join("stops_by_var.csv"),
            "StopId,Name,Lat,Lng\n1,A,10.0,106.0\n2,B,10.0,106.1\n",
        )
        .unwrap();
        std::fs::write(
            a.join("rev_stops_by_var.csv"),
            "StopId,Name,Lat,Lng\n3,C,10.01,106.1\n",
        )
        .unwrap();

        // No metadata, so the folder name is used
        let b = dir.join("152");
        std::fs::create_dir_all(&b).unwrap();
        std::fs::write(
            b.join("rev_stops_by_var.csv"),
            "Lat,Lng\n10.5,106.5\n10.6,106.6\n",
        )
        .unwrap();

        // Only one stop
        let c = dir.join("lonely");
        std::fs::create_dir_all(&c).unwrap();
        std::fs::write(c.join("stops_by_var.csv"), "Lat,Lng\n10.5,106.5\n").unwrap();

        // Same route number as a_folder
        let d = dir.join("z_duplicate");
        std::fs::create_dir_all(&d).unwrap();
        std::fs::write(d.join(ROUTE_INFO_FILE), "RouteNo\n01\n").unwrap();
        std::fs::write(d.join("stops_by_var.csv"), "Lat,Lng\n1.0,1.0\n2.0,2.0\n").unwrap();

        let skeletons = RouteSkeletons::load_from_dir(&dir).unwrap();
        assert_eq!(skeletons.len(), 2);

        let route = &skeletons.routes[&RouteNo::new("01")];
        assert_eq!(route.folder, a);
        assert_eq!(route.stops.len(), 3);
        assert_eq!(route.stops[2].direction, Direction::Inbound);
        assert_eq!(route.line.0.len(), 3);
        assert!(skeletons.routes.contains_key(&RouteNo::new("152")));

        let gj = skeletons.to_geojson().to_string();
        assert!(gj.contains("LineString"));
        assert!(gj.contains("\"route_no\":\"152\""));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn one_broken_direction_keeps_the_other() {
        let dir = scratch_dir("broken-direction");
        let a = dir.join("route_a");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::write(
            a.join("stops_by_var.csv"),
            "StopId,Name,Lat,Lng\n1,A,10.0,106.0\n2,B,10.0,106.1\n",
        )
        .unwrap();
        std::fs::write(a.join("rev_stops_by_var.csv"), "StopId,Name\n3,C\n").unwrap();

        let skeletons = RouteSkeletons::load_from_dir(&dir).unwrap();
        assert_eq!(skeletons.len(), 1);
        let route = &skeletons.routes[&RouteNo::new("route_a")];
        assert_eq!(route.stops.len(), 2);
        assert!(route
            .stops
            .iter()
            .all(|stop| stop.direction == Direction::Outbound));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_route_dir() {
        assert!(RouteSkeletons::load_from_dir(Path::new("/definitely/not/here")).is_err());
    }
}
