//! Text rendering of telemetry snapshots, one scenario at a time.

use crate::reading::{ObstacleReading, ReadingValue, Scenario, SignalReading};
use crate::store::{AlertRecord, SeriesKey, TelemetrySnapshot};
use std::fmt::Write;

pub const NO_DATA: &str = "no data yet";
const ALERT_ROWS: usize = 5;

/// Which scenario a dashboard is looking at. `None` shows every scenario.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScenarioView {
    scenario: Option<Scenario>,
}

impl ScenarioView {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn scenario(scenario: Scenario) -> Self {
        Self {
            scenario: Some(scenario),
        }
    }

    pub fn selected(&self) -> Option<Scenario> {
        self.scenario
    }

    pub fn select(&mut self, scenario: Option<Scenario>) {
        self.scenario = scenario;
    }

    /// Scenarios to render. Generic is only listed once it has data.
    fn scenarios(&self, snapshot: &TelemetrySnapshot) -> Vec<Scenario> {
        match self.scenario {
            Some(scenario) => vec![scenario],
            None => Scenario::ALL
                .into_iter()
                .filter(|scenario| {
                    !scenario.is_single_scenario()
                        || snapshot.series.iter().any(|s| s.scenario == *scenario)
                })
                .collect(),
        }
    }

    pub fn render(&self, snapshot: &TelemetrySnapshot) -> String {
        let mut out = String::new();
        for scenario in self.scenarios(snapshot) {
            let _ = writeln!(out, "[{scenario}]");
            for &sensor_type in scenario.sensor_types() {
                let line = snapshot
                    .series_for(SeriesKey::new(scenario, sensor_type))
                    .and_then(|series| series.latest().map(|latest| (series.readings.len(), latest)))
                    .map_or_else(
                        || NO_DATA.to_string(),
                        |(count, latest)| {
                            format!(
                                "{} ({} readings, last {} at {})",
                                format_value(&latest.value),
                                count,
                                latest.sensor_id,
                                latest.timestamp.format("%H:%M:%S")
                            )
                        },
                    );
                let _ = writeln!(out, "  {:<18} {line}", sensor_type.as_str());
            }
        }

        let alerts: Vec<&AlertRecord> = snapshot
            .alerts
            .iter()
            .filter(|record| self.scenario.map_or(true, |scenario| record.scenario == scenario))
            .take(ALERT_ROWS)
            .collect();
        let _ = writeln!(out, "[alerts]");
        if alerts.is_empty() {
            let _ = writeln!(out, "  {NO_DATA}");
        }
        for record in alerts {
            let _ = writeln!(out, "  {}", format_alert(record));
        }
        out
    }
}

pub fn format_alert(record: &AlertRecord) -> String {
    format!(
        "{} {} {}: {}",
        record.event.timestamp.format("%H:%M:%S"),
        record.scenario,
        record.event.sensor_id,
        record.event.message
    )
}

/// Short human form of a reading value.
pub fn format_value(value: &ReadingValue) -> String {
    match value {
        ReadingValue::Scalar(v) => format!("{v:.2}"),
        ReadingValue::Flag(true) => "detected".to_string(),
        ReadingValue::Flag(false) => "clear".to_string(),
        ReadingValue::BloodPressure(bp) => format!("{:.0}/{:.0} mmHg", bp.systolic, bp.diastolic),
        ReadingValue::Lidar(ranges) => ranges
            .values()
            .copied()
            .reduce(f64::min)
            .map_or_else(|| "no returns".to_string(), |closest| {
                format!("closest {closest:.1} m over {} bearings", ranges.len())
            }),
        ReadingValue::Obstacle(obstacle) => format_obstacle(obstacle),
        ReadingValue::Signal(signal) => format_signal(signal),
        ReadingValue::Radar(contacts) if contacts.is_empty() => "no contacts".to_string(),
        ReadingValue::Radar(contacts) => format!("{} contacts", contacts.len()),
    }
}

fn format_obstacle(obstacle: &ObstacleReading) -> String {
    match (obstacle.detected, obstacle.distance) {
        (false, _) => "clear".to_string(),
        (true, Some(distance)) => match obstacle.kind {
            Some(kind) => format!("{kind:?} at {distance:.1} m").to_lowercase(),
            None => format!("obstacle at {distance:.1} m"),
        },
        (true, None) => "obstacle".to_string(),
    }
}

fn format_signal(signal: &SignalReading) -> String {
    if !signal.detected {
        return "quiet".to_string();
    }
    match (signal.frequency, signal.strength) {
        (Some(frequency), Some(strength)) => format!("{frequency:.1} MHz at {strength:.1} dBm"),
        _ => "signal".to_string(),
    }
}
