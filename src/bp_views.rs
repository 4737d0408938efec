// Views for the Bicing rebalancing planner
use crate::bp_models::{BPError, BPModels, Result, StationSnapshot, StationStatus, StationSummary};
use crate::bp_planner::{
    classify_severity, ColoredRoute, PlanReport, PlanStop, RoutePlan, StopRole,
};
use chrono::Utc;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject};
use log::info;
use serde::Serialize;
use serde_json::json;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

/// Files a plan report should be written to, if any.
#[derive(Debug, Clone, Default)]
pub struct ExportTargets {
    pub csv: Option<PathBuf>,
    pub geojson: Option<PathBuf>,
    pub json: Option<PathBuf>,
}

#[derive(Serialize)]
struct CsvRow<'a> {
    route: usize,
    color: &'a str,
    role: &'static str,
    station_id: &'a str,
    name: &'a str,
    lat: f64,
    lon: f64,
    bikes: i64,
}

pub struct BPViews;

impl BPViews {
    /// Print a plan report, one block per route
    pub fn show_report(title: &str, report: &PlanReport) {
        println!("\n{}", "═".repeat(60));
        println!("  🚚 {}", title);
        println!("{}", "═".repeat(60));
        println!("  🆔 Plan: {}", report.plan_id);
        println!("  🕒 Generated: {}", BPModels::format_timestamp(report.generated_at.timestamp()));
        if let Some(fill) = report.fill_percentage {
            println!("  🎯 Target fill: {}%", fill);
        }
        if let Some(capacity) = report.capacity {
            println!("  📦 Truck capacity: {} bikes", capacity);
        }

        if report.routes.is_empty() {
            println!("\n  ✓ Nothing to do: no station needs a visit");
            println!("{}", "═".repeat(60));
            return;
        }

        for route in &report.routes {
            Self::show_route(route);
        }

        println!("\n{}", "─".repeat(60));
        println!(
            "  {} routes, {} stops, {} bikes in total",
            report.routes.len(),
            report.stop_count(),
            report.total_bikes()
        );
        println!("{}", "═".repeat(60));
    }

    fn show_route(route: &ColoredRoute) {
        println!(
            "\n  Route {} {}: {} bikes",
            route.index + 1,
            Self::colorize_dot(route.color.as_deref()),
            route.plan.total_bikes()
        );

        for stop in route.plan.stops() {
            println!("     • {}", Self::stop_line(&route.plan, &stop));
        }
    }

    fn stop_line(plan: &RoutePlan, stop: &PlanStop<'_>) -> String {
        let name = stop.station.display_name();
        match (plan, stop.role) {
            (_, StopRole::Pickup) => format!("{} - {} bikes", name, stop.bikes.abs()),
            (_, StopRole::Deliver) => format!("{} + {} bikes", name, stop.bikes),
            (RoutePlan::Disabled(group), StopRole::Disabled) => {
                let severity = classify_severity(stop.bikes as u32)
                    .map(|s| Self::colorize_dot(Some(s.color())))
                    .unwrap_or_default();
                format!("{} {} - {} {}", severity, name, stop.bikes, group.kind.label())
            }
            (_, StopRole::Disabled) => format!("{} - {}", name, stop.bikes),
        }
    }

    /// Print the station overview for a snapshot
    pub fn show_station_summary(snapshot: &StationSnapshot, summary: &StationSummary) {
        println!("\n{}", "═".repeat(60));
        println!("  🚲 BICING STATIONS");
        println!("{}", "═".repeat(60));
        println!(
            "  🕒 Snapshot: {} ({}s old)",
            BPModels::format_timestamp(snapshot.fetched_at.timestamp()),
            snapshot.age_secs(Utc::now())
        );
        println!("\n  📊 {} stations", summary.total);
        println!("     {} Empty:     {}", Self::colorize_dot(Some(StationStatus::Empty.color())), summary.empty);
        println!("     {} Full:      {}", Self::colorize_dot(Some(StationStatus::Full.color())), summary.full);
        println!("     {} Available: {}", Self::colorize_dot(Some(StationStatus::Available.color())), summary.available);
        println!("     {} Offline:   {}", Self::colorize_dot(Some(StationStatus::Offline.color())), summary.offline);
        println!(
            "\n  🚲 {} bikes available, {} docks free",
            summary.bikes_available, summary.docks_available
        );
        println!(
            "  🔧 {} bikes disabled, {} docks disabled",
            summary.bikes_disabled, summary.docks_disabled
        );
        println!("{}", "═".repeat(60));
    }

    pub fn show_rejected_stations(count: usize) {
        if count > 0 {
            println!("\n⚠️  {} stations skipped because of invalid coordinates", count);
        }
    }

    /// Route dot in the route's colour. Routes without a colour get a hollow dot.
    fn colorize_dot(color: Option<&str>) -> String {
        match color {
            Some(hex) => {
                let (r, g, b) = Self::parse_hex_color(hex);
                format!("\x1b[38;2;{};{};{}m●\x1b[0m", r, g, b)
            }
            None => "○".to_string(),
        }
    }

    pub fn parse_hex_color(hex_color: &str) -> (u8, u8, u8) {
        let hex = hex_color.trim_start_matches('#');
        if hex.len() == 6 && hex.is_ascii() {
            if let (Ok(r), Ok(g), Ok(b)) = (
                u8::from_str_radix(&hex[0..2], 16),
                u8::from_str_radix(&hex[2..4], 16),
                u8::from_str_radix(&hex[4..6], 16),
            ) {
                return (r, g, b);
            }
        }
        // Grey when any channel is malformed
        (128, 128, 128)
    }

    // ========================================================================
    // Exports
    // ========================================================================

    pub fn export(report: &PlanReport, targets: &ExportTargets) -> Result<()> {
        if let Some(path) = &targets.csv {
            let file = File::create(path)
                .map_err(|e| BPError::FileError(format!("Failed to create {:?}: {}", path, e)))?;
            Self::write_csv(report, BufWriter::new(file))?;
            info!("Wrote CSV plan to {:?}", path);
        }

        if let Some(path) = &targets.geojson {
            let collection = Self::geojson_collection(report);
            Self::write_json_file(path, &collection)?;
            info!("Wrote GeoJSON plan to {:?}", path);
        }

        if let Some(path) = &targets.json {
            Self::write_json_file(path, report)?;
            info!("Wrote JSON plan to {:?}", path);
        }

        Ok(())
    }

    fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| BPError::FileError(format!("Failed to serialize plan: {}", e)))?;
        std::fs::write(path, json)
            .map_err(|e| BPError::FileError(format!("Failed to write {:?}: {}", path, e)))
    }

    /// One row per stop, routes numbered from 1.
    pub fn write_csv<W: io::Write>(report: &PlanReport, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);

        for route in &report.routes {
            for stop in route.plan.stops() {
                csv_writer
                    .serialize(CsvRow {
                        route: route.index + 1,
                        color: route.color.as_deref().unwrap_or(""),
                        role: stop.role.as_str(),
                        station_id: &stop.station.station_id,
                        name: &stop.station.name,
                        lat: stop.station.lat,
                        lon: stop.station.lon,
                        bikes: stop.bikes,
                    })
                    .map_err(|e| BPError::FileError(format!("Failed to write CSV row: {}", e)))?;
            }
        }

        csv_writer
            .flush()
            .map_err(|e| BPError::FileError(format!("Failed to flush CSV: {}", e)))
    }

    /// A LineString per route with at least two stops, and a Point per stop.
    pub fn geojson_collection(report: &PlanReport) -> FeatureCollection {
        let mut features = Vec::new();

        for route in &report.routes {
            let stops = route.plan.stops();
            let color = route.color.clone().map_or(serde_json::Value::Null, serde_json::Value::from);

            if stops.len() >= 2 {
                let line: geo_types::LineString<f64> = stops
                    .iter()
                    .map(|s| (s.station.lon, s.station.lat))
                    .collect::<Vec<_>>()
                    .into();
                let mut properties = JsonObject::new();
                properties.insert("route".to_string(), json!(route.index + 1));
                properties.insert("color".to_string(), color.clone());
                properties.insert("bikes".to_string(), json!(route.plan.total_bikes()));
                features.push(Self::feature(geojson::Value::from(&line), properties));
            }

            for (order, stop) in stops.iter().enumerate() {
                let point = geo_types::Point::new(stop.station.lon, stop.station.lat);
                let mut properties = JsonObject::new();
                properties.insert("route".to_string(), json!(route.index + 1));
                properties.insert("order".to_string(), json!(order + 1));
                properties.insert("color".to_string(), color.clone());
                properties.insert("role".to_string(), json!(stop.role.as_str()));
                properties.insert(
                    "marker_color".to_string(),
                    json!(StationStatus::marker_color(stop.station, route.color.as_deref())),
                );
                properties.insert("station_id".to_string(), json!(stop.station.station_id));
                properties.insert("name".to_string(), json!(stop.station.name));
                properties.insert("bikes".to_string(), json!(stop.bikes));
                features.push(Self::feature(geojson::Value::from(&point), properties));
            }
        }

        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }

    fn feature(value: geojson::Value, properties: JsonObject) -> Feature {
        Feature {
            bbox: None,
            geometry: Some(Geometry::new(value)),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        }
    }
}
