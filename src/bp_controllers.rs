// Controllers for the Bicing rebalancing planner
use crate::bp_config::AppConfig;
use crate::bp_models::{BPModels, Station, StationSource, StationStatus, StationSummary};
use crate::bp_planner::{self, DisabledEquipment, DisabledGroup, PlanReport, RoutePlan};
use crate::bp_views::{BPViews, ExportTargets};
use anyhow::{Context, Result};
use log::{info, warn};

pub struct BPControllers;

impl BPControllers {
    /// Delivery routes for stations below the target fill level
    pub fn supply(
        config: &AppConfig,
        source: &StationSource,
        fill_percentage: f64,
        capacity: i64,
        all_imbalanced: bool,
        exports: &ExportTargets,
    ) -> Result<PlanReport> {
        bp_planner::ensure_capacity(capacity)?;
        Self::warn_on_fill_range(fill_percentage);

        let stations = Self::load_valid_stations(config, source)?;
        let candidates = Self::supply_candidates(&stations, all_imbalanced);
        info!("{} candidate stations for supply", candidates.len());

        let routes = bp_planner::plan_supply_routes(&candidates, fill_percentage, capacity)?;
        info!("Planned {} supply routes", routes.len());

        let report = PlanReport::new(
            routes.into_iter().map(RoutePlan::from).collect(),
            &config.route_palette,
        )
        .with_parameters(Some(fill_percentage), Some(capacity));

        Self::finish("SUPPLY PLAN", &report, exports)?;
        Ok(report)
    }

    /// Pickup-and-drop routes moving bikes from surplus to deficit stations
    pub fn reallocate(
        config: &AppConfig,
        source: &StationSource,
        fill_percentage: f64,
        capacity: i64,
        all_imbalanced: bool,
        exports: &ExportTargets,
    ) -> Result<PlanReport> {
        bp_planner::ensure_capacity(capacity)?;
        Self::warn_on_fill_range(fill_percentage);

        let stations = Self::load_valid_stations(config, source)?;
        let (sources, targets) = Self::reallocation_candidates(&stations, all_imbalanced);
        info!("{} candidate sources, {} candidate targets", sources.len(), targets.len());

        let routes =
            bp_planner::plan_reallocation_routes(&sources, &targets, fill_percentage, capacity)?;
        info!("Planned {} reallocation routes", routes.len());

        let report = PlanReport::new(
            routes.into_iter().map(RoutePlan::from).collect(),
            &config.route_palette,
        )
        .with_parameters(Some(fill_percentage), Some(capacity));

        Self::finish("REALLOCATION PLAN", &report, exports)?;
        Ok(report)
    }

    /// Maintenance rounds for stations with disabled bikes or docks
    pub fn disabled(
        config: &AppConfig,
        source: &StationSource,
        kind: DisabledEquipment,
        chunk_size: usize,
        exports: &ExportTargets,
    ) -> Result<PlanReport> {
        let stations = Self::load_valid_stations(config, source)?;
        let groups = bp_planner::group_disabled(&stations, kind, chunk_size);
        info!("Grouped stations with {} into {} rounds", kind.label(), groups.len());

        let report = PlanReport::new(
            groups
                .into_iter()
                .map(|stations| RoutePlan::from(DisabledGroup { kind, stations }))
                .collect(),
            &config.route_palette,
        );

        Self::finish("DISABLED EQUIPMENT", &report, exports)?;
        Ok(report)
    }

    /// Station overview for the current snapshot
    pub fn stations(config: &AppConfig, source: &StationSource) -> Result<StationSummary> {
        let snapshot = BPModels::load_snapshot(config, source)
            .context("Could not load station snapshot")?;
        let summary = StationSummary::of(&snapshot.stations);
        BPViews::show_station_summary(&snapshot, &summary);
        Ok(summary)
    }

    /// Only empty stations that are in service get deliveries, unless
    /// `all_imbalanced` hands every station to the planner.
    pub fn supply_candidates(stations: &[Station], all_imbalanced: bool) -> Vec<Station> {
        if all_imbalanced {
            return stations.to_vec();
        }
        stations
            .iter()
            .filter(|s| StationStatus::of(s) == StationStatus::Empty)
            .cloned()
            .collect()
    }

    /// Full stations give bikes to empty ones. With `all_imbalanced`, every
    /// station is offered on both sides and demand decides.
    pub fn reallocation_candidates(
        stations: &[Station],
        all_imbalanced: bool,
    ) -> (Vec<Station>, Vec<Station>) {
        if all_imbalanced {
            return (stations.to_vec(), stations.to_vec());
        }

        let sources = stations
            .iter()
            .filter(|s| StationStatus::of(s) == StationStatus::Full)
            .cloned()
            .collect();
        let targets = stations
            .iter()
            .filter(|s| StationStatus::of(s) == StationStatus::Empty)
            .cloned()
            .collect();
        (sources, targets)
    }

    fn load_valid_stations(config: &AppConfig, source: &StationSource) -> Result<Vec<Station>> {
        let snapshot = BPModels::load_snapshot(config, source)
            .context("Could not load station snapshot")?;
        let (valid, rejected) = BPModels::validate_stations(snapshot.stations);
        BPViews::show_rejected_stations(rejected.len());
        info!("{} stations ready for planning", valid.len());
        Ok(valid)
    }

    fn warn_on_fill_range(fill_percentage: f64) {
        if !(0.0..=100.0).contains(&fill_percentage) {
            warn!(
                "Fill percentage {} is outside 0-100; target levels may exceed station capacity",
                fill_percentage
            );
        }
    }

    fn finish(title: &str, report: &PlanReport, exports: &ExportTargets) -> Result<()> {
        BPViews::show_report(title, report);
        BPViews::export(report, exports).context("Could not export plan")?;
        Ok(())
    }
}
