use chrono::NaiveDate;
use sensorbus::broker::{Broker, HandlerError, Message, MessageBus};
use sensorbus::reading::{
    AlertEvent, BloodPressure, ObstacleKind, ObstacleReading, RadarContact, Reading, ReadingValue, Scenario,
    SensorIdentity, SensorType, SignalKind, SignalReading,
};
use sensorbus::rules::{AlertRuleEngine, AlertThresholds, RuleTable};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn engine() -> AlertRuleEngine {
    AlertRuleEngine::new(Arc::new(Broker::new()), AlertThresholds::default())
}

fn reading(sensor_id: &str, sensor_type: SensorType, scenario: Scenario, value: ReadingValue) -> Reading {
    let timestamp = NaiveDate::from_ymd_opt(2024, 6, 1)
        .and_then(|date| date.and_hms_opt(12, 0, 0))
        .unwrap();
    Reading::new(&SensorIdentity::new(sensor_id, sensor_type, scenario), value, timestamp)
}

fn message_for(reading: &Reading) -> Message {
    Message {
        topic: sensorbus::topic::reading_topic(reading.scenario, reading.sensor_type),
        payload: serde_json::to_string(reading).unwrap(),
    }
}

#[test]
fn test_high_temperature_raises_one_alert() {
    let engine = engine();
    let hot = reading("temp_002", SensorType::Temperature, Scenario::Generic, ReadingValue::Scalar(35.0));

    let alert = engine.process(&message_for(&hot)).unwrap().expect("alert");
    assert_eq!(alert.sensor_id, "temp_002");
    assert_eq!(alert.message, "High temperature detected");
    assert_eq!(alert.value, Some(json!(35.0)));

    let stats = engine.stats();
    assert_eq!(stats.evaluated, 1);
    assert_eq!(stats.alerts_raised, 1);
}

#[test]
fn test_normal_temperature_raises_nothing() {
    let engine = engine();
    let mild = reading("temp_002", SensorType::Temperature, Scenario::Generic, ReadingValue::Scalar(25.0));
    assert!(engine.process(&message_for(&mild)).unwrap().is_none());

    // Threshold is exclusive
    let edge = reading("temp_001", SensorType::Temperature, Scenario::HomeIot, ReadingValue::Scalar(30.0));
    assert!(engine.evaluate(&edge).is_none());
    assert_eq!(engine.stats().alerts_raised, 0);
}

#[test]
fn test_home_and_generic_rules() {
    let engine = engine();

    let humid = reading("hum_001", SensorType::Humidity, Scenario::HomeIot, ReadingValue::Scalar(85.0));
    assert_eq!(engine.evaluate(&humid).unwrap().message, "High humidity detected");

    let motion = reading("mot_002", SensorType::Motion, Scenario::Generic, ReadingValue::Flag(true));
    let alert = engine.evaluate(&motion).unwrap();
    assert_eq!(alert.message, "Motion detected");
    assert_eq!(alert.value, None);

    let still = reading("mot_002", SensorType::Motion, Scenario::Generic, ReadingValue::Flag(false));
    assert!(engine.evaluate(&still).is_none());

    let power = reading("pwr_001", SensorType::Power, Scenario::HomeIot, ReadingValue::Scalar(5000.0));
    assert!(engine.evaluate(&power).is_none());
}

#[test]
fn test_healthcare_rules() {
    let engine = engine();

    let fast = reading("hr_001", SensorType::HeartRate, Scenario::Healthcare, ReadingValue::Scalar(110.0));
    assert_eq!(engine.evaluate(&fast).unwrap().message, "High heart rate detected");

    let slow = reading("hr_001", SensorType::HeartRate, Scenario::Healthcare, ReadingValue::Scalar(45.0));
    assert_eq!(engine.evaluate(&slow).unwrap().message, "Low heart rate detected");

    let resting = reading("hr_001", SensorType::HeartRate, Scenario::Healthcare, ReadingValue::Scalar(72.0));
    assert!(engine.evaluate(&resting).is_none());

    let hypoxic = reading("spo2_001", SensorType::OxygenSaturation, Scenario::Healthcare, ReadingValue::Scalar(88.0));
    assert_eq!(engine.evaluate(&hypoxic).unwrap().message, "Low oxygen saturation detected");

    let pressure = ReadingValue::BloodPressure(BloodPressure {
        systolic: 150.0,
        diastolic: 85.0,
    });
    let high = reading("bp_001", SensorType::BloodPressure, Scenario::Healthcare, pressure);
    let alert = engine.evaluate(&high).unwrap();
    assert_eq!(alert.message, "High blood pressure detected");
    assert_eq!(alert.value, Some(json!({"systolic": 150.0, "diastolic": 85.0})));
}

#[test]
fn test_vehicle_and_defense_rules() {
    let engine = engine();

    let near = ReadingValue::Obstacle(ObstacleReading {
        detected: true,
        distance: Some(6.5),
        kind: Some(ObstacleKind::Pedestrian),
    });
    let near = reading("obs_001", SensorType::Obstacle, Scenario::AutonomousVehicle, near);
    assert_eq!(
        engine.evaluate(&near).unwrap().message,
        "Obstacle detected within safety margin"
    );

    let far = ReadingValue::Obstacle(ObstacleReading {
        detected: true,
        distance: Some(25.0),
        kind: Some(ObstacleKind::Vehicle),
    });
    let far = reading("obs_001", SensorType::Obstacle, Scenario::AutonomousVehicle, far);
    assert!(engine.evaluate(&far).is_none());

    let contacts = ReadingValue::Radar(vec![RadarContact {
        range: 12_000.0,
        bearing: 270.5,
        altitude: 8_000.0,
        speed: 640.0,
    }]);
    let contacts = reading("rad_001", SensorType::Radar, Scenario::Defense, contacts);
    assert_eq!(engine.evaluate(&contacts).unwrap().message, "Radar contact detected");

    let empty = reading("rad_001", SensorType::Radar, Scenario::Defense, ReadingValue::Radar(Vec::new()));
    assert!(engine.evaluate(&empty).is_none());

    let signal = ReadingValue::Signal(SignalReading {
        detected: true,
        frequency: Some(144.2),
        strength: Some(-61.0),
        kind: Some(SignalKind::Communication),
    });
    let signal = reading("sig_001", SensorType::Signal, Scenario::Defense, signal);
    assert_eq!(engine.evaluate(&signal).unwrap().message, "RF signal detected");

    let hot = reading("ir_001", SensorType::Infrared, Scenario::Defense, ReadingValue::Scalar(48.2));
    assert_eq!(engine.evaluate(&hot).unwrap().message, "Thermal signature detected");
}

#[test]
fn test_speed_and_lidar_have_no_rules() {
    let engine = engine();
    let speed = reading("spd_001", SensorType::Speed, Scenario::AutonomousVehicle, ReadingValue::Scalar(119.0));
    assert!(engine.process(&message_for(&speed)).unwrap().is_none());
    assert_eq!(engine.stats().evaluated, 1);
    assert_eq!(engine.stats().alerts_raised, 0);
}

#[test]
fn test_unknown_sensor_class_is_ignored() {
    let engine = engine();
    let message = Message {
        topic: "sensor/home_iot/co2".to_string(),
        payload: r#"{"sensor_id":"co2_001","type":"co2","scenario":"home_iot","value":900,"timestamp":"2024-06-01 12:00:00"}"#
            .to_string(),
    };

    assert!(engine.process(&message).unwrap().is_none());
    assert_eq!(engine.stats().ignored, 1);
    assert_eq!(engine.stats().evaluated, 0);
}

#[test]
fn test_malformed_payload_is_a_handler_error() {
    let engine = engine();
    let message = Message {
        topic: "sensor/temperature".to_string(),
        payload: "not json".to_string(),
    };
    assert!(matches!(engine.process(&message), Err(HandlerError::Payload(_))));

    // Known class, wrong value shape
    let message = Message {
        topic: "sensor/temperature".to_string(),
        payload: r#"{"sensor_id":"temp_002","type":"temperature","value":{"x":1},"timestamp":"2024-06-01 12:00:00"}"#
            .to_string(),
    };
    assert!(matches!(engine.process(&message), Err(HandlerError::Payload(_))));
}

#[test]
fn test_custom_thresholds_and_rules() {
    let thresholds = AlertThresholds {
        temperature_high_c: 40.0,
        ..AlertThresholds::default()
    };
    let engine = AlertRuleEngine::new(Arc::new(Broker::new()), thresholds);
    let warm = reading("temp_002", SensorType::Temperature, Scenario::Generic, ReadingValue::Scalar(35.0));
    assert!(engine.evaluate(&warm).is_none());
    assert_eq!(engine.thresholds().temperature_high_c, 40.0);

    let engine = AlertRuleEngine::new(Arc::new(Broker::new()), AlertThresholds::default())
        .with_rules(RuleTable::empty());
    assert!(engine.evaluate(&warm).is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_attached_engine_publishes_alerts() {
    let broker = Broker::new();
    let bus: Arc<dyn MessageBus> = Arc::new(broker.clone());
    let engine = AlertRuleEngine::new(bus, AlertThresholds::default()).attach().unwrap();

    let alerts: Arc<Mutex<Vec<Message>>> = Arc::default();
    let sink = alerts.clone();
    broker
        .subscribe(
            "alerts/#",
            Arc::new(move |message: &Message| -> Result<(), HandlerError> {
                sink.lock().unwrap().push(message.clone());
                Ok(())
            }),
        )
        .unwrap();

    let hot = reading("temp_002", SensorType::Temperature, Scenario::Generic, ReadingValue::Scalar(35.0));
    let mild = reading("temp_002", SensorType::Temperature, Scenario::Generic, ReadingValue::Scalar(25.0));
    let fast = reading("hr_001", SensorType::HeartRate, Scenario::Healthcare, ReadingValue::Scalar(130.0));
    for r in [&hot, &mild, &fast] {
        let message = message_for(r);
        broker.publish(&message.topic, message.payload).unwrap();
    }

    for _ in 0..200 {
        if alerts.lock().unwrap().len() >= 2 && engine.stats().evaluated == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let alerts = alerts.lock().unwrap().clone();
    assert_eq!(alerts.len(), 2);
    let topics: Vec<&str> = alerts.iter().map(|m| m.topic.as_str()).collect();
    assert!(topics.contains(&"alerts/temperature"));
    assert!(topics.contains(&"alerts/healthcare/heart_rate"));

    let temperature = alerts.iter().find(|m| m.topic == "alerts/temperature").unwrap();
    let event: AlertEvent = temperature.decode().unwrap();
    assert_eq!(event.message, "High temperature detected");
    assert_eq!(event.value, Some(json!(35.0)));

    let raw: serde_json::Value = serde_json::from_str(&temperature.payload).unwrap();
    assert_eq!(raw["alert"], "High temperature detected");

    broker.close();
}
