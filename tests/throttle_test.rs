use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tg_fetchbot::registry::UserRegistry;
use tg_fetchbot::throttle::{DescriptionPublisher, DescriptionThrottler, DEFAULT_UPDATE_INTERVAL};
use tokio::sync::Mutex;

async fn setup_registry() -> UserRegistry {
    UserRegistry::initialize("sqlite::memory:").await.unwrap()
}

#[derive(Clone, Default)]
struct RecordingPublisher {
    calls: Arc<Mutex<Vec<String>>>,
    fail: bool,
    delay: Option<Duration>,
}

impl RecordingPublisher {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl DescriptionPublisher for RecordingPublisher {
    async fn publish(&self, description: &str) -> Result<()> {
        self.calls.lock().await.push(description.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(anyhow!("Too Many Requests: retry after 30"));
        }
        Ok(())
    }
}

#[tokio::test]
async fn first_call_publishes_then_cooldown_applies() {
    let registry = setup_registry().await;
    let throttler = DescriptionThrottler::new(registry.clone(), DEFAULT_UPDATE_INTERVAL);
    let publisher = RecordingPublisher::default();

    assert!(throttler.maybe_update_description(&publisher).await);
    assert!(!throttler.maybe_update_description(&publisher).await);
    assert_eq!(publisher.calls().await.len(), 1);
}

#[tokio::test]
async fn cooldown_window_of_ten_units() {
    let registry = setup_registry().await;
    let throttler = DescriptionThrottler::new(registry, Duration::from_secs(10));
    let publisher = RecordingPublisher::default();
    let t0 = Instant::now();

    assert!(throttler.maybe_update_description_at(t0, &publisher).await);
    assert!(!throttler.is_eligible_at(t0 + Duration::from_secs(5)));
    assert!(
        !throttler
            .maybe_update_description_at(t0 + Duration::from_secs(5), &publisher)
            .await
    );
    assert!(throttler.is_eligible_at(t0 + Duration::from_secs(10)));
    assert!(
        throttler
            .maybe_update_description_at(t0 + Duration::from_secs(11), &publisher)
            .await
    );

    // the 5s attempt never reached the publisher
    assert_eq!(publisher.calls().await.len(), 2);
}

#[tokio::test]
async fn failed_publish_does_not_consume_cooldown() {
    let registry = setup_registry().await;
    let throttler = DescriptionThrottler::new(registry, Duration::from_secs(10));
    let publisher = RecordingPublisher::failing();
    let t0 = Instant::now();

    assert!(!throttler.maybe_update_description_at(t0, &publisher).await);
    assert!(throttler.is_eligible_at(t0 + Duration::from_secs(1)));
    assert!(
        !throttler
            .maybe_update_description_at(t0 + Duration::from_secs(1), &publisher)
            .await
    );
    assert_eq!(publisher.calls().await.len(), 2);

    // a later success still goes through immediately
    let ok = RecordingPublisher::default();
    assert!(
        throttler
            .maybe_update_description_at(t0 + Duration::from_secs(2), &ok)
            .await
    );
}

#[tokio::test]
async fn description_reflects_current_user_count() {
    let registry = setup_registry().await;
    let throttler = DescriptionThrottler::new(registry.clone(), Duration::from_secs(10));
    let publisher = RecordingPublisher::default();
    let t0 = Instant::now();

    assert!(throttler.maybe_update_description_at(t0, &publisher).await);
    registry.add_user(101, Some("Ana"), Some("ana_u")).await;
    registry.add_user(102, None, None).await;
    registry.add_user(101, Some("Ana"), Some("ana_u")).await;
    assert!(
        throttler
            .maybe_update_description_at(t0 + Duration::from_secs(10), &publisher)
            .await
    );

    assert_eq!(
        publisher.calls().await,
        vec!["👥 Users: 0".to_string(), "👥 Users: 2".to_string()]
    );
}

#[tokio::test]
async fn concurrent_callers_publish_once() {
    let registry = setup_registry().await;
    let throttler = DescriptionThrottler::new(registry, Duration::from_secs(60));
    let publisher = RecordingPublisher::slow(Duration::from_millis(50));
    let now = Instant::now();

    let (a, b) = tokio::join!(
        throttler.maybe_update_description_at(now, &publisher),
        throttler.maybe_update_description_at(now, &publisher),
    );

    assert!(a ^ b, "exactly one caller should win: {a} {b}");
    assert_eq!(publisher.calls().await.len(), 1);
    assert!(!throttler.is_eligible_at(now + Duration::from_secs(1)));
}

#[tokio::test]
async fn restart_resets_cooldown() {
    let registry = setup_registry().await;
    let publisher = RecordingPublisher::default();

    let throttler = DescriptionThrottler::new(registry.clone(), DEFAULT_UPDATE_INTERVAL);
    assert!(throttler.maybe_update_description(&publisher).await);
    drop(throttler);

    let restarted = DescriptionThrottler::new(registry, DEFAULT_UPDATE_INTERVAL);
    assert!(restarted.maybe_update_description(&publisher).await);
    assert_eq!(publisher.calls().await.len(), 2);
}
