// Truck rebalancing planner for Bicing stations
//
// Routes are built greedily: every trip grows by visiting the single nearest
// remaining station, with no look-ahead and no backtracking. Two runs over the
// same snapshot always produce the same routes.
use crate::bp_models::Station;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Number of stations per disabled-equipment group.
pub const DEFAULT_CHUNK_SIZE: usize = 5;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum PlannerError {
    InvalidCapacity(i64),
    InvalidStationData { station_id: String, reason: String },
}

impl std::fmt::Display for PlannerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlannerError::InvalidCapacity(capacity) => {
                write!(f, "Invalid truck capacity {}: must be greater than zero", capacity)
            }
            PlannerError::InvalidStationData { station_id, reason } => {
                write!(f, "Invalid station data for {}: {}", station_id, reason)
            }
        }
    }
}

impl std::error::Error for PlannerError {}

/// Rejects non-positive truck capacities before any routing happens.
pub fn ensure_capacity(capacity: i64) -> Result<(), PlannerError> {
    if capacity <= 0 {
        return Err(PlannerError::InvalidCapacity(capacity));
    }
    Ok(())
}

// ============================================================================
// Distance & Demand
// ============================================================================

/// Great-circle distance in kilometres (haversine, mean Earth radius 6371 km).
///
/// Callers are expected to have rejected NaN or out-of-range coordinates.
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

fn station_distance(a: &Station, b: &Station) -> f64 {
    distance_km(a.lat, a.lon, b.lat, b.lon)
}

/// Bikes the station should hold at the given fill level.
///
/// The fill percentage is not clamped: values outside 0..=100 flow through
/// unchanged. Extreme values saturate at the `i64` bounds.
fn target_bikes(station: &Station, fill_percentage: f64) -> i64 {
    ((fill_percentage / 100.0) * station.effective_capacity() as f64).ceil() as i64
}

/// Bikes missing to reach the target fill level, never negative.
pub fn compute_need(station: &Station, fill_percentage: f64) -> i64 {
    target_bikes(station, fill_percentage)
        .saturating_sub(station.num_bikes_available as i64)
        .max(0)
}

/// Bikes above the target fill level, never negative.
pub fn compute_excess(station: &Station, fill_percentage: f64) -> i64 {
    (station.num_bikes_available as i64)
        .saturating_sub(target_bikes(station, fill_percentage))
        .max(0)
}

/// A station paired with the number of bikes it needs (deficit side) or can
/// give away (surplus side).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DemandStation {
    pub station: Station,
    pub amount: i64,
}

impl DemandStation {
    pub fn new(station: Station, amount: i64) -> Self {
        DemandStation { station, amount }
    }
}

/// Stations with a positive need, in input order.
pub fn deficit_stations(stations: &[Station], fill_percentage: f64) -> Vec<DemandStation> {
    stations
        .iter()
        .map(|s| DemandStation::new(s.clone(), compute_need(s, fill_percentage)))
        .filter(|d| d.amount > 0)
        .collect()
}

/// Stations with a positive excess, in input order.
pub fn surplus_stations(stations: &[Station], fill_percentage: f64) -> Vec<DemandStation> {
    stations
        .iter()
        .map(|s| DemandStation::new(s.clone(), compute_excess(s, fill_percentage)))
        .filter(|d| d.amount > 0)
        .collect()
}

/// Index of the candidate closest to `from`. On ties the first one wins.
fn nearest_index(from: &Station, candidates: &[DemandStation]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, candidate) in candidates.iter().enumerate() {
        let distance = station_distance(from, &candidate.station);
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((idx, distance)),
        }
    }
    best.map(|(idx, _)| idx)
}

// ============================================================================
// Route Shapes
// ============================================================================

/// One delivery trip: stations visited in order, each receiving its full need.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupplyRoute {
    pub stops: Vec<DemandStation>,
    pub load: i64,
}

impl SupplyRoute {
    pub fn station_ids(&self) -> Vec<&str> {
        self.stops.iter().map(|d| d.station.station_id.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Delivery {
    /// Target as it was when the delivery was recorded.
    pub target: DemandStation,
    pub delivered: i64,
}

/// One pickup at a surplus station followed by drops at nearby deficit stations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReallocationRoute {
    pub source: DemandStation,
    pub deliveries: Vec<Delivery>,
}

impl ReallocationRoute {
    pub fn total_delivered(&self) -> i64 {
        self.deliveries.iter().map(|d| d.delivered).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DisabledEquipment {
    Bikes,
    Docks,
}

impl DisabledEquipment {
    pub fn count(self, station: &Station) -> u32 {
        match self {
            DisabledEquipment::Bikes => station.num_bikes_disabled,
            DisabledEquipment::Docks => station.num_docks_disabled,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DisabledEquipment::Bikes => "disabled bikes",
            DisabledEquipment::Docks => "disabled docks",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisabledGroup {
    pub kind: DisabledEquipment,
    pub stations: Vec<Station>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "route_type", rename_all = "snake_case")]
pub enum RoutePlan {
    Supply(SupplyRoute),
    Reallocation(ReallocationRoute),
    Disabled(DisabledGroup),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StopRole {
    Deliver,
    Pickup,
    Disabled,
}

impl StopRole {
    pub fn as_str(self) -> &'static str {
        match self {
            StopRole::Deliver => "deliver",
            StopRole::Pickup => "pickup",
            StopRole::Disabled => "disabled",
        }
    }
}

/// A single visit on a route, flattened for display and export.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanStop<'a> {
    pub station: &'a Station,
    pub role: StopRole,
    pub bikes: i64,
}

impl RoutePlan {
    pub fn stops(&self) -> Vec<PlanStop<'_>> {
        match self {
            RoutePlan::Supply(route) => route
                .stops
                .iter()
                .map(|d| PlanStop {
                    station: &d.station,
                    role: StopRole::Deliver,
                    bikes: d.amount,
                })
                .collect(),
            RoutePlan::Reallocation(route) => {
                let mut stops = vec![PlanStop {
                    station: &route.source.station,
                    role: StopRole::Pickup,
                    bikes: route.total_delivered(),
                }];
                stops.extend(route.deliveries.iter().map(|d| PlanStop {
                    station: &d.target.station,
                    role: StopRole::Deliver,
                    bikes: d.delivered,
                }));
                stops
            }
            RoutePlan::Disabled(group) => group
                .stations
                .iter()
                .map(|s| PlanStop {
                    station: s,
                    role: StopRole::Disabled,
                    bikes: group.kind.count(s) as i64,
                })
                .collect(),
        }
    }

    /// Bikes moved by the truck on this route (or equipment to service).
    pub fn total_bikes(&self) -> i64 {
        match self {
            RoutePlan::Supply(route) => route.load,
            RoutePlan::Reallocation(route) => route.total_delivered(),
            RoutePlan::Disabled(group) => group
                .stations
                .iter()
                .map(|s| group.kind.count(s) as i64)
                .sum(),
        }
    }
}

impl From<SupplyRoute> for RoutePlan {
    fn from(route: SupplyRoute) -> Self {
        RoutePlan::Supply(route)
    }
}

impl From<ReallocationRoute> for RoutePlan {
    fn from(route: ReallocationRoute) -> Self {
        RoutePlan::Reallocation(route)
    }
}

impl From<DisabledGroup> for RoutePlan {
    fn from(group: DisabledGroup) -> Self {
        RoutePlan::Disabled(group)
    }
}

// ============================================================================
// Route Stitching
// ============================================================================

/// Computes each station's need and chains the deficit stations into
/// delivery routes. Stations without need never appear in a route.
pub fn plan_supply_routes(
    stations: &[Station],
    fill_percentage: f64,
    capacity: i64,
) -> Result<Vec<SupplyRoute>, PlannerError> {
    ensure_capacity(capacity)?;
    stitch_supply_routes(deficit_stations(stations, fill_percentage), capacity)
}

/// Grows each route from its tail: the next stop is always the remaining
/// station nearest to the last one added. A route closes as soon as that
/// nearest station does not fit, even if a farther one would.
pub fn stitch_supply_routes(
    stations: Vec<DemandStation>,
    capacity: i64,
) -> Result<Vec<SupplyRoute>, PlannerError> {
    ensure_capacity(capacity)?;

    let mut worklist = stations;
    let mut routes = Vec::new();

    while !worklist.is_empty() {
        let seed = worklist.remove(0);
        let mut load = seed.amount;
        let mut stops = vec![seed];

        while load < capacity && !worklist.is_empty() {
            let tail = &stops[stops.len() - 1].station;
            let Some(idx) = nearest_index(tail, &worklist) else {
                break;
            };
            let fits = load
                .checked_add(worklist[idx].amount)
                .is_some_and(|sum| sum <= capacity);
            if !fits {
                break;
            }
            let next = worklist.remove(idx);
            load += next.amount;
            stops.push(next);
        }

        routes.push(SupplyRoute { stops, load });
    }

    Ok(routes)
}

/// Computes excess for `sources` and need for `targets`, then pairs each
/// source with the targets nearest to it.
pub fn plan_reallocation_routes(
    sources: &[Station],
    targets: &[Station],
    fill_percentage: f64,
    capacity: i64,
) -> Result<Vec<ReallocationRoute>, PlannerError> {
    ensure_capacity(capacity)?;
    stitch_reallocation_routes(
        surplus_stations(sources, fill_percentage),
        deficit_stations(targets, fill_percentage),
        capacity,
    )
}

/// Each source fills the truck with `min(excess, capacity)` bikes and drops
/// them at targets picked by distance from the source itself. Partially served
/// targets stay in the pool with their reduced need.
pub fn stitch_reallocation_routes(
    sources: Vec<DemandStation>,
    targets: Vec<DemandStation>,
    capacity: i64,
) -> Result<Vec<ReallocationRoute>, PlannerError> {
    ensure_capacity(capacity)?;

    let mut sources = sources;
    let mut targets = targets;
    let mut routes = Vec::new();

    while !sources.is_empty() && !targets.is_empty() {
        let source = sources.remove(0);
        let mut bikes_to_move = source.amount.min(capacity);
        let mut deliveries = Vec::new();

        while bikes_to_move > 0 && !targets.is_empty() {
            let Some(idx) = nearest_index(&source.station, &targets) else {
                break;
            };
            let delivered = targets[idx].amount.min(bikes_to_move).min(capacity);
            if delivered <= 0 {
                break;
            }

            deliveries.push(Delivery {
                target: targets[idx].clone(),
                delivered,
            });
            bikes_to_move -= delivered;

            if delivered >= targets[idx].amount {
                targets.remove(idx);
            } else {
                targets[idx].amount -= delivered;
            }
        }

        if !deliveries.is_empty() {
            routes.push(ReallocationRoute { source, deliveries });
        }
    }

    Ok(routes)
}

/// Stations with disabled equipment of the given kind, in fixed-size groups.
/// A chunk size of zero is treated as one.
pub fn group_disabled(
    stations: &[Station],
    kind: DisabledEquipment,
    chunk_size: usize,
) -> Vec<Vec<Station>> {
    let disabled: Vec<Station> = stations
        .iter()
        .filter(|s| kind.count(s) > 0)
        .cloned()
        .collect();

    disabled
        .chunks(chunk_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

// ============================================================================
// Severity & Colours
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Yellow,
    Amber,
    Red,
}

impl Severity {
    pub fn color(self) -> &'static str {
        match self {
            Severity::Yellow => "#facc15",
            Severity::Amber => "#f59e0b",
            Severity::Red => "#ef4444",
        }
    }
}

/// `None` means nothing is broken and the station is not shown.
pub fn classify_severity(disabled_count: u32) -> Option<Severity> {
    match disabled_count {
        0 => None,
        1 => Some(Severity::Yellow),
        2..=4 => Some(Severity::Amber),
        _ => Some(Severity::Red),
    }
}

/// Zips route indices with the palette. Routes past the end of the palette
/// get no colour; the palette does not wrap around.
pub fn assign_route_colors(route_count: usize, palette: &[String]) -> Vec<Option<String>> {
    (0..route_count).map(|idx| palette.get(idx).cloned()).collect()
}

// ============================================================================
// Plan Report
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColoredRoute {
    pub index: usize,
    pub color: Option<String>,
    pub plan: RoutePlan,
}

/// The output of one planning run.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub plan_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub fill_percentage: Option<f64>,
    pub capacity: Option<i64>,
    pub routes: Vec<ColoredRoute>,
}

impl PlanReport {
    pub fn new(plans: Vec<RoutePlan>, palette: &[String]) -> Self {
        let colors = assign_route_colors(plans.len(), palette);
        let routes = plans
            .into_iter()
            .zip(colors)
            .enumerate()
            .map(|(index, (plan, color))| ColoredRoute { index, color, plan })
            .collect();

        PlanReport {
            plan_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            fill_percentage: None,
            capacity: None,
            routes,
        }
    }

    pub fn with_parameters(mut self, fill_percentage: Option<f64>, capacity: Option<i64>) -> Self {
        self.fill_percentage = fill_percentage;
        self.capacity = capacity;
        self
    }

    pub fn total_bikes(&self) -> i64 {
        self.routes
            .iter()
            .fold(0i64, |acc, r| acc.saturating_add(r.plan.total_bikes()))
    }

    pub fn stop_count(&self) -> usize {
        self.routes.iter().map(|r| r.plan.stops().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn station(id: &str, lat: f64, lon: f64, bikes: u32, docks: u32) -> Station {
        Station {
            station_id: id.to_string(),
            name: format!("Station {}", id),
            lat,
            lon,
            num_bikes_available: bikes,
            num_docks_available: docks,
            status: Some("IN_SERVICE".to_string()),
            ..Station::default()
        }
    }

    fn demand(id: &str, lat: f64, lon: f64, amount: i64) -> DemandStation {
        DemandStation::new(station(id, lat, lon, 0, 0), amount)
    }

    /// Point roughly `km` kilometres north of (41.40, 2.17).
    fn north_of_base(id: &str, km: f64, amount: i64) -> DemandStation {
        demand(id, 41.40 + km / 111.195, 2.17, amount)
    }

    #[test]
    fn distance_is_symmetric_and_zero_on_same_point() {
        let points = [
            (41.3874, 2.1686),
            (41.4036, 2.1744),
            (-33.8688, 151.2093),
            (0.0001, -179.9),
        ];
        for &(lat1, lon1) in &points {
            assert_eq!(distance_km(lat1, lon1, lat1, lon1), 0.0);
            for &(lat2, lon2) in &points {
                let ab = distance_km(lat1, lon1, lat2, lon2);
                let ba = distance_km(lat2, lon2, lat1, lon1);
                assert!((ab - ba).abs() < 1e-9, "{} vs {}", ab, ba);
            }
        }
    }

    #[test]
    fn distance_matches_known_value() {
        // One degree of latitude on a 6371 km sphere.
        let d = distance_km(41.0, 2.0, 42.0, 2.0);
        assert!((d - 111.194_926_6).abs() < 1e-3, "got {}", d);
    }

    #[test]
    fn need_and_excess_follow_target_fill() {
        let s = station("1", 41.4, 2.17, 3, 17);
        // target = ceil(0.5 * 20) = 10
        assert_eq!(compute_need(&s, 50.0), 7);
        assert_eq!(compute_excess(&s, 50.0), 0);

        let full = station("2", 41.4, 2.17, 18, 2);
        assert_eq!(compute_need(&full, 50.0), 0);
        assert_eq!(compute_excess(&full, 50.0), 8);
    }

    #[test]
    fn target_fill_rounds_up() {
        // ceil(0.33 * 10) = 4
        let s = station("1", 41.4, 2.17, 0, 10);
        assert_eq!(compute_need(&s, 33.0), 4);
        let s = station("2", 41.4, 2.17, 10, 0);
        assert_eq!(compute_excess(&s, 33.0), 6);
    }

    #[test]
    fn demand_computation_is_idempotent() {
        let s = station("1", 41.4, 2.17, 4, 23);
        for fill in [0.0, 12.5, 50.0, 77.0, 100.0] {
            assert_eq!(compute_need(&s, fill), compute_need(&s, fill));
            assert_eq!(compute_excess(&s, fill), compute_excess(&s, fill));
        }
    }

    #[test]
    fn fill_percentage_outside_range_is_not_clamped() {
        let s = station("1", 41.4, 2.17, 5, 5);
        // target = ceil(1.5 * 10) = 15, more than the station can hold
        assert_eq!(compute_need(&s, 150.0), 10);
        // target = ceil(-0.5 * 10) = -5
        assert_eq!(compute_excess(&s, -50.0), 10);
        assert_eq!(compute_need(&s, -50.0), 0);
    }

    #[test]
    fn extreme_fill_saturates_instead_of_overflowing() {
        let s = station("1", 41.4, 2.17, 5, 5);
        assert_eq!(compute_need(&s, 1e30), i64::MAX - 5);
        assert_eq!(compute_excess(&s, -1e30), i64::MAX);
        assert_eq!(compute_need(&s, -1e30), 0);
    }

    #[test]
    fn huge_needs_never_exceed_capacity() {
        let a = station("a", 41.400, 2.17, 5, 5);
        let b = station("b", 41.401, 2.17, 5, 5);

        let routes = plan_supply_routes(&[a, b], 1e30, i64::MAX).unwrap();

        // Each need is close to i64::MAX, so the two cannot share a truck.
        assert_eq!(routes.len(), 2);
        for route in &routes {
            assert_eq!(route.stops.len(), 1);
            assert_eq!(route.load, i64::MAX - 5);
        }

        let report = PlanReport::new(
            routes.into_iter().map(RoutePlan::from).collect(),
            &[],
        );
        assert_eq!(report.total_bikes(), i64::MAX);
    }

    #[test]
    fn zero_demand_stations_are_filtered() {
        let stations = vec![
            station("empty", 41.40, 2.17, 0, 20),
            station("balanced", 41.41, 2.17, 10, 10),
            station("full", 41.42, 2.17, 20, 0),
        ];
        let deficit = deficit_stations(&stations, 50.0);
        assert_eq!(deficit.len(), 1);
        assert_eq!(deficit[0].station.station_id, "empty");

        let surplus = surplus_stations(&stations, 50.0);
        assert_eq!(surplus.len(), 1);
        assert_eq!(surplus[0].station.station_id, "full");
    }

    #[test]
    fn supply_rejects_non_positive_capacity() {
        let stations = vec![station("1", 41.4, 2.17, 0, 10)];
        assert_eq!(
            plan_supply_routes(&stations, 50.0, 0),
            Err(PlannerError::InvalidCapacity(0))
        );
        assert_eq!(
            plan_supply_routes(&stations, 50.0, -3),
            Err(PlannerError::InvalidCapacity(-3))
        );
        assert_eq!(
            stitch_supply_routes(Vec::new(), 0),
            Err(PlannerError::InvalidCapacity(0))
        );
    }

    #[test]
    fn supply_route_closes_when_nearest_does_not_fit() {
        let a = demand("A", 41.40, 2.17, 10);
        let b = demand("B", 41.41, 2.18, 15);
        let c = demand("C", 45.0, 9.0, 5);

        let routes = stitch_supply_routes(vec![a, b, c], 20).unwrap();

        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].station_ids(), vec!["A"]);
        assert_eq!(routes[0].load, 10);
        assert_eq!(routes[1].station_ids(), vec!["B", "C"]);
        assert_eq!(routes[1].load, 20);
    }

    #[test]
    fn supply_chain_grows_from_tail() {
        // A at 0 km, B at 3 km, C at 4 km, D at 1.5 km.
        // From A the nearest is D, from D the nearest is B (1.5) not C (2.5),
        // from B it is C.
        let a = north_of_base("A", 0.0, 1);
        let b = north_of_base("B", 3.0, 1);
        let c = north_of_base("C", 4.0, 1);
        let d = north_of_base("D", 1.5, 1);

        let routes = stitch_supply_routes(vec![a, b, c, d], 100).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].station_ids(), vec!["A", "D", "B", "C"]);
    }

    #[test]
    fn supply_does_not_look_past_nearest_candidate() {
        // B is nearest to A but too big; C would fit but is never considered.
        let a = north_of_base("A", 0.0, 5);
        let b = north_of_base("B", 1.0, 9);
        let c = north_of_base("C", 2.0, 1);

        let routes = stitch_supply_routes(vec![a, b, c], 10).unwrap();
        let ids: Vec<Vec<&str>> = routes.iter().map(|r| r.station_ids()).collect();
        assert_eq!(ids, vec![vec!["A"], vec!["B", "C"]]);
    }

    #[test]
    fn supply_ties_go_to_first_candidate() {
        let a = demand("A", 41.40, 2.0, 1);
        let east = demand("E", 41.40, 2.5, 1);
        let west = demand("W", 41.40, 1.5, 1);

        let routes = stitch_supply_routes(vec![a.clone(), east.clone(), west.clone()], 2).unwrap();
        assert_eq!(routes[0].station_ids(), vec!["A", "E"]);

        let routes = stitch_supply_routes(vec![a, west, east], 2).unwrap();
        assert_eq!(routes[0].station_ids(), vec!["A", "W"]);
    }

    #[test]
    fn supply_route_stops_growing_at_capacity() {
        let a = north_of_base("A", 0.0, 10);
        let b = north_of_base("B", 0.1, 1);

        let routes = stitch_supply_routes(vec![a, b], 10).unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].load, 10);
    }

    #[test]
    fn supply_routes_respect_capacity_and_cover_every_station() {
        let mut stations = Vec::new();
        for i in 0..40u32 {
            let lat = 41.35 + (i % 7) as f64 * 0.013;
            let lon = 2.10 + (i % 11) as f64 * 0.009;
            let bikes = i % 5;
            let docks = 10 + (i * 3) % 17;
            stations.push(station(&format!("s{}", i), lat, lon, bikes, docks));
        }
        let fill = 60.0;
        let capacity = 25;
        let expected: HashSet<String> = deficit_stations(&stations, fill)
            .into_iter()
            .map(|d| d.station.station_id)
            .collect();
        assert!(!expected.is_empty());

        let routes = plan_supply_routes(&stations, fill, capacity).unwrap();

        let mut seen = HashSet::new();
        for route in &routes {
            assert!(!route.stops.is_empty());
            let sum: i64 = route.stops.iter().map(|d| d.amount).sum();
            assert_eq!(sum, route.load);
            assert!(route.load <= capacity);
            for stop in &route.stops {
                assert!(stop.amount > 0);
                assert!(seen.insert(stop.station.station_id.clone()), "duplicate stop");
            }
        }
        assert_eq!(seen, expected);
    }

    #[test]
    fn reallocation_rejects_non_positive_capacity() {
        let sources = vec![station("S", 41.4, 2.17, 20, 0)];
        let targets = vec![station("T", 41.41, 2.17, 0, 20)];
        assert_eq!(
            plan_reallocation_routes(&sources, &targets, 50.0, 0),
            Err(PlannerError::InvalidCapacity(0))
        );
    }

    #[test]
    fn reallocation_serves_nearest_targets_from_source() {
        let s = north_of_base("S", 0.0, 12);
        let t1 = north_of_base("T1", 0.5, 5);
        let t2 = north_of_base("T2", 2.0, 10);

        let routes = stitch_reallocation_routes(vec![s], vec![t2, t1], 10).unwrap();

        assert_eq!(routes.len(), 1);
        let route = &routes[0];
        assert_eq!(route.source.station.station_id, "S");
        let served: Vec<(&str, i64)> = route
            .deliveries
            .iter()
            .map(|d| (d.target.station.station_id.as_str(), d.delivered))
            .collect();
        assert_eq!(served, vec![("T1", 5), ("T2", 5)]);
        assert_eq!(route.total_delivered(), 10);
    }

    #[test]
    fn reallocation_keeps_partially_served_target() {
        let s = north_of_base("S", 0.0, 12);
        let t1 = north_of_base("T1", 0.5, 5);
        let t2 = north_of_base("T2", 2.0, 10);
        // Second source far to the north; T2 is the only target left for it.
        let s2 = north_of_base("S2", 50.0, 8);

        let routes = stitch_reallocation_routes(vec![s, s2], vec![t1, t2], 10).unwrap();

        assert_eq!(routes.len(), 2);
        let second = &routes[1];
        assert_eq!(second.source.station.station_id, "S2");
        assert_eq!(second.deliveries.len(), 1);
        assert_eq!(second.deliveries[0].target.station.station_id, "T2");
        assert_eq!(second.deliveries[0].target.amount, 5);
        assert_eq!(second.deliveries[0].delivered, 5);
    }

    #[test]
    fn reallocation_distance_is_measured_from_source() {
        // Seen from the source: near (1 km), south (2 km), north (2.5 km).
        // Chaining from the tail would visit north (1.5 km from near) first.
        let s = north_of_base("S", 0.0, 30);
        let near = north_of_base("near", 1.0, 2);
        let south = north_of_base("south", -2.0, 2);
        let north = north_of_base("north", 2.5, 2);

        let routes = stitch_reallocation_routes(vec![s], vec![north, south, near], 30).unwrap();
        let order: Vec<&str> = routes[0]
            .deliveries
            .iter()
            .map(|d| d.target.station.station_id.as_str())
            .collect();
        assert_eq!(order, vec!["near", "south", "north"]);
    }

    #[test]
    fn reallocation_stops_when_targets_run_out() {
        let s1 = north_of_base("S1", 0.0, 10);
        let s2 = north_of_base("S2", 1.0, 10);
        let t = north_of_base("T", 0.5, 4);

        let routes = stitch_reallocation_routes(vec![s1, s2], vec![t], 10).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].source.station.station_id, "S1");
        assert_eq!(routes[0].total_delivered(), 4);
    }

    #[test]
    fn reallocation_from_raw_stations() {
        let sources = vec![station("S", 41.40, 2.17, 20, 0)];
        let targets = vec![
            station("T1", 41.401, 2.17, 0, 20),
            station("balanced", 41.4005, 2.17, 10, 10),
        ];
        // excess = 20 - 10 = 10, need = 10 - 0 = 10
        let routes = plan_reallocation_routes(&sources, &targets, 50.0, 6).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].deliveries.len(), 1);
        assert_eq!(routes[0].deliveries[0].delivered, 6);
    }

    #[test]
    fn disabled_groups_are_chunked_in_order() {
        let mut stations = Vec::new();
        for i in 0..13u32 {
            let mut s = station(&format!("d{}", i), 41.4, 2.17, 5, 5);
            s.num_bikes_disabled = if i % 3 == 0 { 0 } else { i };
            s.num_docks_disabled = if i == 4 { 2 } else { 0 };
            stations.push(s);
        }

        let groups = group_disabled(&stations, DisabledEquipment::Bikes, DEFAULT_CHUNK_SIZE);
        let sizes: Vec<usize> = groups.iter().map(|g| g.len()).collect();
        assert_eq!(sizes, vec![5, 3]);
        assert_eq!(groups[0][0].station_id, "d1");
        assert_eq!(groups[0][1].station_id, "d2");
        assert_eq!(groups[0][2].station_id, "d4");

        let docks = group_disabled(&stations, DisabledEquipment::Docks, DEFAULT_CHUNK_SIZE);
        assert_eq!(docks.len(), 1);
        assert_eq!(docks[0][0].station_id, "d4");
    }

    #[test]
    fn disabled_grouping_with_zero_chunk_size() {
        let mut s = station("x", 41.4, 2.17, 5, 5);
        s.num_bikes_disabled = 1;
        let groups = group_disabled(&[s.clone(), s], DisabledEquipment::Bikes, 0);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn severity_boundaries() {
        assert_eq!(classify_severity(0), None);
        assert_eq!(classify_severity(1), Some(Severity::Yellow));
        assert_eq!(classify_severity(2), Some(Severity::Amber));
        assert_eq!(classify_severity(4), Some(Severity::Amber));
        assert_eq!(classify_severity(5), Some(Severity::Red));
        assert_eq!(classify_severity(u32::MAX), Some(Severity::Red));
    }

    #[test]
    fn route_colors_do_not_wrap_past_palette() {
        let palette = vec!["#111111".to_string(), "#222222".to_string()];
        let colors = assign_route_colors(4, &palette);
        assert_eq!(
            colors,
            vec![
                Some("#111111".to_string()),
                Some("#222222".to_string()),
                None,
                None
            ]
        );
        assert!(assign_route_colors(0, &palette).is_empty());
    }

    #[test]
    fn report_assigns_colors_by_index() {
        let palette = vec!["#abcdef".to_string()];
        let routes = stitch_supply_routes(
            vec![north_of_base("A", 0.0, 5), north_of_base("B", 100.0, 5)],
            5,
        )
        .unwrap();
        let report = PlanReport::new(routes.into_iter().map(RoutePlan::from).collect(), &palette)
            .with_parameters(Some(50.0), Some(5));

        assert_eq!(report.routes.len(), 2);
        assert_eq!(report.routes[0].color.as_deref(), Some("#abcdef"));
        assert_eq!(report.routes[1].color, None);
        assert_eq!(report.routes[1].index, 1);
        assert_eq!(report.total_bikes(), 10);
        assert_eq!(report.stop_count(), 2);
    }

    #[test]
    fn reallocation_stops_start_with_pickup() {
        let route = ReallocationRoute {
            source: north_of_base("S", 0.0, 9),
            deliveries: vec![
                Delivery { target: north_of_base("T1", 1.0, 3), delivered: 3 },
                Delivery { target: north_of_base("T2", 2.0, 6), delivered: 4 },
            ],
        };
        let plan = RoutePlan::from(route);
        let stops = plan.stops();
        assert_eq!(stops.len(), 3);
        assert_eq!(stops[0].role, StopRole::Pickup);
        assert_eq!(stops[0].bikes, 7);
        assert_eq!(stops[2].role, StopRole::Deliver);
        assert_eq!(stops[2].bikes, 4);
        assert_eq!(plan.total_bikes(), 7);
    }
}
