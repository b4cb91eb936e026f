use sensorbus::broker::{Broker, BusError, HandlerError, Message, MessageBus, MessageHandler};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records every message it receives.
#[derive(Default)]
struct Collector {
    received: Mutex<Vec<Message>>,
}

impl Collector {
    fn topics(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.topic.clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

impl MessageHandler for Collector {
    fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        self.received.lock().unwrap().push(message.clone());
        Ok(())
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exact_topic_routing() {
    let broker = Broker::new();
    let collector = Arc::new(Collector::default());
    broker
        .subscribe("sensor/healthcare/heart_rate", collector.clone())
        .unwrap();

    assert_eq!(broker.publish("sensor/healthcare/heart_rate", "72".into()).unwrap(), 1);
    assert_eq!(broker.publish("sensor/healthcare/blood_pressure", "{}".into()).unwrap(), 0);

    assert!(wait_until(|| collector.len() == 1).await);
    assert_eq!(collector.topics(), vec!["sensor/healthcare/heart_rate"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_scenario_wildcard_does_not_leak() {
    let broker = Broker::new();
    let everything = Arc::new(Collector::default());
    let healthcare = Arc::new(Collector::default());
    broker.subscribe("sensor/#", everything.clone()).unwrap();
    broker.subscribe("sensor/healthcare/#", healthcare.clone()).unwrap();

    broker.publish("sensor/healthcare/heart_rate", "80".into()).unwrap();
    broker.publish("sensor/defense/radar", "[]".into()).unwrap();
    broker.publish("sensor/temperature", "{}".into()).unwrap();
    broker.publish("alerts/healthcare/heart_rate", "{}".into()).unwrap();

    assert!(wait_until(|| everything.len() == 3).await);
    assert!(wait_until(|| healthcare.len() == 1).await);

    // Give stray deliveries a chance to show up
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(everything.len(), 3);
    assert_eq!(healthcare.topics(), vec!["sensor/healthcare/heart_rate"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_publish_without_subscribers_is_a_no_op() {
    let broker = Broker::new();
    assert_eq!(broker.publish("sensor/home_iot/power", "1000".into()).unwrap(), 0);

    let stats = broker.stats();
    assert_eq!(stats.published, 1);
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.dropped, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_topics_and_patterns_are_rejected() {
    let broker = Broker::new();
    let collector = Arc::new(Collector::default());

    assert!(matches!(broker.publish("", "1".into()), Err(BusError::InvalidTopic(_))));
    assert!(matches!(broker.publish("sensor//x", "1".into()), Err(BusError::InvalidTopic(_))));
    assert!(matches!(broker.publish("sensor/#", "1".into()), Err(BusError::InvalidTopic(_))));
    assert!(matches!(
        broker.subscribe("sensor/#/radar", collector.clone()),
        Err(BusError::InvalidPattern(_))
    ));
    assert_eq!(broker.subscriber_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_panicking_handler_is_isolated() {
    let broker = Broker::new();
    let healthy = Arc::new(Collector::default());

    broker
        .subscribe(
            "sensor/#",
            Arc::new(|_: &Message| -> Result<(), HandlerError> { panic!("handler bug") }),
        )
        .unwrap();
    broker
        .subscribe(
            "sensor/#",
            Arc::new(|_: &Message| -> Result<(), HandlerError> {
                Err(HandlerError::Failed("rejected".to_string()))
            }),
        )
        .unwrap();
    broker.subscribe("sensor/#", healthy.clone()).unwrap();

    for i in 0..5 {
        broker.publish("sensor/temperature", format!("{i}")).unwrap();
    }

    assert!(wait_until(|| healthy.len() == 5).await);
    assert!(wait_until(|| broker.stats().handler_failures == 10).await);

    // The panicking subscription keeps receiving after its first failure
    broker.publish("sensor/humidity", "50".into()).unwrap();
    assert!(wait_until(|| broker.stats().handler_failures == 12).await);
    assert!(wait_until(|| healthy.len() == 6).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_subscriber_does_not_block_others() {
    let broker = Broker::with_queue_capacity(4);
    let fast = Arc::new(Collector::default());
    let slow_seen = Arc::new(AtomicUsize::new(0));

    let seen = slow_seen.clone();
    broker
        .subscribe(
            "sensor/#",
            Arc::new(move |_: &Message| -> Result<(), HandlerError> {
                std::thread::sleep(Duration::from_millis(50));
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();
    broker.subscribe("sensor/#", fast.clone()).unwrap();

    let start = std::time::Instant::now();
    for i in 0..40 {
        broker.publish("sensor/motion", format!("{}", i % 2 == 0)).unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    // Publishing never waits on the slow handler
    assert!(start.elapsed() < Duration::from_secs(1));

    assert!(wait_until(|| fast.len() == 40).await);
    assert!(broker.stats().dropped > 0);
    assert!(slow_seen.load(Ordering::SeqCst) < 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_handlers_do_not_stall_delivery() {
    let broker = Broker::with_queue_capacity(4);
    let fast = Arc::new(Collector::default());

    // One blocking handler per worker thread
    for _ in 0..2 {
        broker
            .subscribe(
                "sensor/#",
                Arc::new(|_: &Message| -> Result<(), HandlerError> {
                    std::thread::sleep(Duration::from_millis(300));
                    Ok(())
                }),
            )
            .unwrap();
    }
    broker.subscribe("sensor/#", fast.clone()).unwrap();

    for i in 0..4 {
        broker.publish("sensor/motion", format!("{}", i % 2 == 0)).unwrap();
    }
    assert!(wait_until(|| fast.len() == 4).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let start = std::time::Instant::now();
    broker.publish("sensor/motion", "true".into()).unwrap();
    while fast.len() < 5 && start.elapsed() < Duration::from_secs(2) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let waited = start.elapsed();
    assert_eq!(fast.len(), 5);
    assert!(waited < Duration::from_millis(250), "fast subscriber waited {waited:?}");

    broker.close();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unsubscribe_stops_delivery() {
    let broker = Broker::new();
    let collector = Arc::new(Collector::default());
    let id = broker.subscribe("alerts/#", collector.clone()).unwrap();

    broker.publish("alerts/temperature", "{}".into()).unwrap();
    assert!(wait_until(|| collector.len() == 1).await);

    assert!(broker.unsubscribe(id));
    assert!(!broker.unsubscribe(id));
    assert_eq!(broker.publish("alerts/temperature", "{}".into()).unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(collector.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_closed_broker_rejects_traffic() {
    let broker = Broker::new();
    let collector = Arc::new(Collector::default());
    broker.subscribe("#", collector.clone()).unwrap();

    broker.close();
    assert!(broker.is_closed());
    assert_eq!(broker.subscriber_count(), 0);
    assert!(matches!(broker.publish("sensor/motion", "true".into()), Err(BusError::Closed)));
    assert!(matches!(broker.subscribe("#", collector), Err(BusError::Closed)));
}

#[test]
fn test_subscribe_requires_runtime() {
    let broker = Broker::new();
    let collector = Arc::new(Collector::default());
    assert!(matches!(broker.subscribe("#", collector), Err(BusError::NoRuntime)));
}
