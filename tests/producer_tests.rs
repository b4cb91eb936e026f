use sensorbus::broker::{Broker, HandlerError, Message, MessageBus};
use sensorbus::config::ConfigError;
use sensorbus::controller::ControlError;
use sensorbus::generators::GeneratorTable;
use sensorbus::producer::{Producer, ProducerState, PublishInterval};
use sensorbus::reading::{Reading, Scenario, SensorIdentity, SensorType, WireReading};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const FAST: Duration = Duration::from_millis(5);

fn producer(bus: &Broker, sensor_id: &str, sensor_type: SensorType, scenario: Scenario) -> Producer {
    let bus: Arc<dyn MessageBus> = Arc::new(bus.clone());
    Producer::new(
        SensorIdentity::new(sensor_id, sensor_type, scenario),
        &GeneratorTable::default(),
        bus,
        PublishInterval::fixed(FAST),
    )
    .unwrap()
    .with_seed(42)
}

fn collect(bus: &Broker, pattern: &str) -> Arc<Mutex<Vec<Message>>> {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    bus.subscribe(
        pattern,
        Arc::new(move |message: &Message| -> Result<(), HandlerError> {
            sink.lock().unwrap().push(message.clone());
            Ok(())
        }),
    )
    .unwrap();
    received
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_producer_publishes_on_its_topic() {
    let bus = Broker::new();
    let received = collect(&bus, "sensor/#");
    let mut hr = producer(&bus, "hr_001", SensorType::HeartRate, Scenario::Healthcare);

    assert_eq!(hr.topic(), "sensor/healthcare/heart_rate");
    assert_eq!(hr.state(), ProducerState::Stopped);
    assert_eq!(hr.start().unwrap(), ProducerState::Running);

    assert!(wait_until(|| received.lock().unwrap().len() >= 3).await);
    hr.stop().await.unwrap();

    let messages = received.lock().unwrap().clone();
    for message in &messages {
        assert_eq!(message.topic, "sensor/healthcare/heart_rate");
        let wire: WireReading = message.decode().unwrap();
        let reading = Reading::try_from(wire).unwrap();
        assert_eq!(reading.sensor_id, "hr_001");
        assert_eq!(reading.sensor_type, SensorType::HeartRate);
        assert_eq!(reading.scenario, Scenario::Healthcare);
        assert!(reading.value.as_scalar().is_some());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_generic_producer_uses_short_topic() {
    let bus = Broker::new();
    let received = collect(&bus, "sensor/temperature");
    let mut temp = producer(&bus, "temp_002", SensorType::Temperature, Scenario::Generic);

    temp.start().unwrap();
    assert!(wait_until(|| !received.lock().unwrap().is_empty()).await);
    temp.stop().await.unwrap();

    let payload: serde_json::Value = serde_json::from_str(&received.lock().unwrap()[0].payload).unwrap();
    assert_eq!(payload["sensor_id"], "temp_002");
    assert_eq!(payload["type"], "temperature");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_is_idempotent() {
    let bus = Broker::new();
    let mut power = producer(&bus, "pwr_001", SensorType::Power, Scenario::HomeIot);

    assert_eq!(power.start().unwrap(), ProducerState::Running);
    assert_eq!(power.start().unwrap(), ProducerState::Running);
    assert_eq!(power.state(), ProducerState::Running);

    assert_eq!(power.stop().await.unwrap(), ProducerState::Stopped);
    assert_eq!(power.stop().await.unwrap(), ProducerState::Stopped);
    assert_eq!(power.state(), ProducerState::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_nothing_published_after_stop_returns() {
    let bus = Broker::new();
    let received = collect(&bus, "#");
    let mut radar = producer(&bus, "rad_001", SensorType::Radar, Scenario::Defense);

    radar.start().unwrap();
    radar.stop().await.unwrap();
    let published = radar.published();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(radar.published(), published);
    assert!(wait_until(|| received.lock().unwrap().len() as u64 == published).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_isolation_suppresses_and_recover_resumes() {
    let bus = Broker::new();
    let received = collect(&bus, "sensor/defense/#");
    let mut ir = producer(&bus, "ir_001", SensorType::Infrared, Scenario::Defense);

    ir.start().unwrap();
    assert!(wait_until(|| ir.published() >= 2).await);

    assert_eq!(ir.isolate().unwrap(), ProducerState::Isolated);
    assert_eq!(ir.state(), ProducerState::Isolated);
    let published = ir.published();

    assert!(wait_until(|| ir.suppressed() >= 5).await);
    assert_eq!(ir.published(), published);
    assert!(wait_until(|| received.lock().unwrap().len() as u64 == published).await);

    assert_eq!(ir.recover().unwrap(), ProducerState::Running);
    assert!(wait_until(|| ir.published() >= published + 3).await);

    let status = ir.status();
    assert_eq!(status.sensor_id, "ir_001");
    assert_eq!(status.state, ProducerState::Running);
    assert!(status.suppressed >= 5);

    ir.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_isolate_requires_running_producer() {
    let bus = Broker::new();
    let speed = producer(&bus, "spd_001", SensorType::Speed, Scenario::AutonomousVehicle);

    assert!(matches!(speed.isolate(), Err(ControlError::NotRunning(id)) if id == "spd_001"));
    assert!(matches!(speed.recover(), Err(ControlError::NotRunning(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_restart_clears_isolation() {
    let bus = Broker::new();
    let mut motion = producer(&bus, "mot_001", SensorType::Motion, Scenario::HomeIot);

    motion.start().unwrap();
    motion.isolate().unwrap();
    motion.stop().await.unwrap();

    assert_eq!(motion.start().unwrap(), ProducerState::Running);
    assert_eq!(motion.state(), ProducerState::Running);
    assert!(wait_until(|| motion.published() > 0).await);
    motion.stop().await.unwrap();
}

#[test]
fn test_undeclared_sensor_type_is_rejected() {
    let bus: Arc<dyn MessageBus> = Arc::new(Broker::new());
    let result = Producer::new(
        SensorIdentity::new("rad_009", SensorType::Radar, Scenario::Healthcare),
        &GeneratorTable::default(),
        bus,
        PublishInterval::fixed(FAST),
    );
    assert!(matches!(result, Err(ConfigError::UnknownSensorType { .. })));
}

#[test]
fn test_start_requires_runtime() {
    let bus = Broker::new();
    let mut lidar = producer(&bus, "lid_001", SensorType::Lidar, Scenario::AutonomousVehicle);
    assert!(matches!(lidar.start(), Err(ControlError::NoRuntime)));
    assert_eq!(lidar.state(), ProducerState::Stopped);
}
