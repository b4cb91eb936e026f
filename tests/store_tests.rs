use chrono::{NaiveDate, NaiveDateTime};
use sensorbus::broker::{publish_json, Broker, HandlerError, Message, MessageBus, MessageHandler};
use sensorbus::reading::{AlertEvent, Reading, ReadingValue, Scenario, SensorIdentity, SensorType};
use sensorbus::store::{
    AlertRecord, SeriesKey, TelemetryStore, ALERT_LOG_CAPACITY, DEFAULT_SERIES_CAPACITY,
};
use sensorbus::topic;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn at(minute: u32, second: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 1)
        .and_then(|date| date.and_hms_opt(9, minute, second))
        .unwrap()
}

fn temperature(sensor_id: &str, scenario: Scenario, value: f64, timestamp: NaiveDateTime) -> Reading {
    Reading::new(
        &SensorIdentity::new(sensor_id, SensorType::Temperature, scenario),
        ReadingValue::Scalar(value),
        timestamp,
    )
}

fn alert(sensor_id: &str, message: &str, timestamp: NaiveDateTime) -> AlertEvent {
    AlertEvent {
        sensor_id: sensor_id.to_string(),
        message: message.to_string(),
        value: None,
        timestamp,
    }
}

#[test]
fn test_store_keeps_last_capacity_readings() {
    let store = TelemetryStore::new(10);
    for n in 0..25 {
        store.record_reading(temperature("temp_001", Scenario::HomeIot, f64::from(n), at(0, n)));
    }

    let series = store
        .series(SeriesKey::new(Scenario::HomeIot, SensorType::Temperature))
        .unwrap();
    assert_eq!(series.len(), 10);
    let values: Vec<f64> = series.iter().filter_map(|r| r.value.as_scalar()).collect();
    assert_eq!(values, (15..25).map(f64::from).collect::<Vec<_>>());

    let stats = store.stats();
    assert_eq!(stats.readings, 25);
    assert_eq!(stats.evicted, 15);
}

#[test]
fn test_series_are_keyed_by_scenario_and_type() {
    let store = TelemetryStore::default();
    assert_eq!(store.capacity(), DEFAULT_SERIES_CAPACITY);

    store.record_reading(temperature("temp_001", Scenario::HomeIot, 22.1, at(0, 0)));
    store.record_reading(temperature("temp_002", Scenario::Generic, 31.0, at(0, 1)));
    store.record_reading(temperature("temp_002", Scenario::Generic, 32.0, at(0, 2)));

    let home = store
        .series(SeriesKey::new(Scenario::HomeIot, SensorType::Temperature))
        .unwrap();
    let generic = store
        .series(SeriesKey::new(Scenario::Generic, SensorType::Temperature))
        .unwrap();
    assert_eq!(home.len(), 1);
    assert_eq!(generic.len(), 2);
    assert!(store
        .series(SeriesKey::new(Scenario::HomeIot, SensorType::Humidity))
        .is_none());
}

#[test]
fn test_alert_log_newest_first() {
    let store = TelemetryStore::default();
    for n in 0..(ALERT_LOG_CAPACITY as u32 + 10) {
        store.record_alert(AlertRecord {
            scenario: Scenario::HomeIot,
            sensor_type: "motion".to_string(),
            event: alert(&format!("mot_{n:03}"), "Motion detected", at(n / 60, n % 60)),
        });
    }

    let alerts = store.alerts();
    assert_eq!(alerts.len(), ALERT_LOG_CAPACITY);
    assert_eq!(alerts[0].event.sensor_id, "mot_059");
    assert_eq!(alerts[ALERT_LOG_CAPACITY - 1].event.sensor_id, "mot_010");
    assert!(alerts.windows(2).all(|w| w[0].event.timestamp >= w[1].event.timestamp));
}

#[test]
fn test_handler_routes_readings_and_alerts() {
    let store = TelemetryStore::default();
    let reading = temperature("temp_002", Scenario::Generic, 34.5, at(1, 0));
    store
        .handle(&Message {
            topic: topic::reading_topic(Scenario::Generic, SensorType::Temperature),
            payload: serde_json::to_string(&reading).unwrap(),
        })
        .unwrap();
    store
        .handle(&Message {
            topic: topic::alert_topic(Scenario::Generic, SensorType::Temperature),
            payload: serde_json::to_string(&alert("temp_002", "High temperature detected", at(1, 0))).unwrap(),
        })
        .unwrap();

    let snapshot = store.snapshot();
    let series = snapshot
        .series_for(SeriesKey::new(Scenario::Generic, SensorType::Temperature))
        .unwrap();
    assert_eq!(series.latest(), Some(&reading));
    assert_eq!(snapshot.alerts.len(), 1);
    assert_eq!(snapshot.alerts[0].scenario, Scenario::Generic);
    assert_eq!(snapshot.alerts[0].sensor_type, "temperature");
}

#[test]
fn test_handler_ignores_unknown_classes_and_rejects_garbage() {
    let store = TelemetryStore::default();

    let unknown = Message {
        topic: "sensor/home_iot/co2".to_string(),
        payload: r#"{"sensor_id":"co2_001","type":"co2","scenario":"home_iot","value":900,"timestamp":"2024-05-01 09:00:00"}"#
            .to_string(),
    };
    store.handle(&unknown).unwrap();
    store
        .handle(&Message {
            topic: "telemetry/raw/extra/levels".to_string(),
            payload: "{}".to_string(),
        })
        .unwrap();
    assert_eq!(store.stats().ignored, 2);
    assert!(store.snapshot().is_empty());

    let garbage = Message {
        topic: "sensor/temperature".to_string(),
        payload: "{".to_string(),
    };
    assert!(matches!(store.handle(&garbage), Err(HandlerError::Payload(_))));
}

#[test]
fn test_scenario_snapshot_filters() {
    let store = TelemetryStore::default();
    store.record_reading(temperature("temp_001", Scenario::HomeIot, 21.0, at(2, 0)));
    store.record_reading(temperature("temp_002", Scenario::Generic, 29.0, at(2, 1)));
    store.record_alert(AlertRecord {
        scenario: Scenario::Generic,
        sensor_type: "motion".to_string(),
        event: alert("mot_002", "Motion detected", at(2, 2)),
    });

    let home = store.scenario_snapshot(Scenario::HomeIot);
    assert_eq!(home.series.len(), 1);
    assert_eq!(home.series[0].scenario, Scenario::HomeIot);
    assert!(home.alerts.is_empty());

    let generic = store.scenario_snapshot(Scenario::Generic);
    assert_eq!(generic.series.len(), 1);
    assert_eq!(generic.alerts.len(), 1);
}

#[test]
fn test_snapshot_is_a_copy() {
    let store = TelemetryStore::new(5);
    store.record_reading(temperature("temp_001", Scenario::HomeIot, 21.0, at(3, 0)));
    let before = store.snapshot();

    store.record_reading(temperature("temp_001", Scenario::HomeIot, 21.5, at(3, 1)));
    assert_eq!(before.series[0].readings.len(), 1);
    assert_eq!(store.snapshot().series[0].readings.len(), 2);
}

#[test]
fn test_snapshot_is_a_single_point_in_time() {
    let store = Arc::new(TelemetryStore::new(10));
    let writer = {
        let store = Arc::clone(&store);
        std::thread::spawn(move || {
            for n in 0..2000u32 {
                let timestamp = at((n / 60) % 60, n % 60);
                store.record_reading(temperature("temp_002", Scenario::Generic, f64::from(n), timestamp));
                store.record_alert(AlertRecord {
                    scenario: Scenario::Generic,
                    sensor_type: "temperature".to_string(),
                    event: AlertEvent {
                        value: Some(json!(n)),
                        ..alert("temp_002", "High temperature detected", timestamp)
                    },
                });
            }
        })
    };

    let key = SeriesKey::new(Scenario::Generic, SensorType::Temperature);
    while !writer.is_finished() {
        let snapshot = store.snapshot();
        let newest_alert = snapshot
            .alerts
            .first()
            .and_then(|record| record.event.value.as_ref())
            .and_then(serde_json::Value::as_f64);
        if let Some(alerted) = newest_alert {
            let newest_reading = snapshot
                .series_for(key)
                .and_then(|series| series.latest())
                .and_then(|reading| reading.value.as_scalar())
                .unwrap();
            assert!(newest_reading >= alerted, "alert {alerted} ahead of reading {newest_reading}");
        }
    }
    writer.join().unwrap();
    assert_eq!(store.stats().readings, 2000);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_attached_store_receives_bus_traffic() {
    let broker = Broker::new();
    let store = TelemetryStore::new(20).attach(&broker).unwrap();

    for n in 0..30 {
        let reading = temperature("temp_001", Scenario::HomeIot, 20.0 + f64::from(n) / 10.0, at(4, n));
        publish_json(&broker, &topic::reading_topic(Scenario::HomeIot, SensorType::Temperature), &reading).unwrap();
    }
    publish_json(
        &broker,
        &topic::alert_topic(Scenario::HomeIot, SensorType::Motion),
        &alert("mot_001", "Motion detected", at(4, 59)),
    )
    .unwrap();

    for _ in 0..200 {
        if store.stats().readings == 30 && store.stats().alerts == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let series = store
        .series(SeriesKey::new(Scenario::HomeIot, SensorType::Temperature))
        .unwrap();
    assert_eq!(series.len(), 20);
    assert!(series.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(series.last().unwrap().timestamp, at(4, 29));

    let alerts = store.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].sensor_type, "motion");
    assert_eq!(alerts[0].scenario, Scenario::HomeIot);

    broker.close();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_store_subscribes_to_both_roots() {
    let broker = Broker::new();
    let _store = TelemetryStore::default().attach(&broker).unwrap();
    assert_eq!(broker.subscriber_count(), 2);
    assert_eq!(broker.publish("other/topic", "{}".into()).unwrap(), 0);
}
