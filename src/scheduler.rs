//! Due-slot publication.
//!
//! A tick loads the page credential and every slot, then publishes each slot
//! whose schedule has passed. Two guards keep a slot from being published twice:
//! an in-process claim set (one attempt per slot id at a time, re-checked
//! against the store after claiming) and conditional writes in the slot queries
//! (`WHERE published = 0`) for stores shared between processes.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::domain::page::{self, PageCredential};
use crate::domain::slots::{Slot, queries as slots};
use crate::services::facebook::{PublishError, Publisher};
use crate::services::notifier::{EventNotifier, SlotEvent};

#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error("failed to load page credential: {0}")]
    Credential(#[source] sqlx::Error),
    #[error("failed to load slots: {0}")]
    Slots(#[source] sqlx::Error),
}

/// Why a manual publish did not happen
#[derive(Debug, thiserror::Error)]
pub enum PublishNowError {
    #[error("Slot not found")]
    NotFound,
    #[error("Slot already published")]
    AlreadyPublished,
    #[error("No page credentials available to publish")]
    NotConfigured,
    #[error("Slot is already being published")]
    InProgress,
    #[error("Publish failed: {0}")]
    Failed(PublishError),
    #[error("Slot store error: {0}")]
    Store(#[from] sqlx::Error),
}

/// Summary of one tick, returned to the admin trigger
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub configured: bool,
    pub due: usize,
    pub published: usize,
    pub failed: usize,
    pub skipped: usize,
}

enum Attempt {
    Published(Value),
    Failed(PublishError),
    /// Another writer recorded the slot as published first
    Lost,
    Store(sqlx::Error),
}

pub struct Scheduler {
    db: SqlitePool,
    publisher: Arc<dyn Publisher>,
    notifier: EventNotifier,
    in_flight: Mutex<HashSet<String>>,
}

/// Releases a slot claim when dropped
struct Claim<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    slot_id: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.slot_id);
    }
}

impl Scheduler {
    pub fn new(db: SqlitePool, publisher: Arc<dyn Publisher>, notifier: EventNotifier) -> Self {
        Self {
            db,
            publisher,
            notifier,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn claim(&self, slot_id: &str) -> Option<Claim<'_>> {
        let inserted = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(slot_id.to_string());

        inserted.then(|| Claim {
            in_flight: &self.in_flight,
            slot_id: slot_id.to_string(),
        })
    }

    /// Timer entry point: runs a tick and logs the outcome, never fails.
    pub async fn run_due_slot_publication(&self) {
        match self.run_tick().await {
            Ok(report) if report.due > 0 => tracing::info!(
                due = report.due,
                published = report.published,
                failed = report.failed,
                skipped = report.skipped,
                "Scheduled publish tick finished"
            ),
            Ok(report) => tracing::debug!(configured = report.configured, "Nothing due"),
            Err(e) => tracing::error!(error = %e, "Scheduled publish tick aborted"),
        }
    }

    pub async fn run_tick(&self) -> Result<TickReport, TickError> {
        self.tick_at(Utc::now()).await
    }

    pub(crate) async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport, TickError> {
        let mut report = TickReport::default();

        let Some(credential) = page::active_credential(&self.db)
            .await
            .map_err(TickError::Credential)?
        else {
            return Ok(report);
        };
        report.configured = true;

        let all = slots::list_slots(&self.db).await.map_err(TickError::Slots)?;

        for slot in all.iter().filter(|s| s.is_due(now)) {
            report.due += 1;

            let Some(_claim) = self.claim(&slot.id) else {
                tracing::debug!(slot_id = %slot.id, "Slot already being published, skipping");
                report.skipped += 1;
                continue;
            };

            // The list may be stale by now; only the stored row is authoritative.
            let fresh = match slots::get_slot(&self.db, &slot.id).await {
                Ok(Some(fresh)) if fresh.is_due(now) => fresh,
                Ok(_) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(slot_id = %slot.id, error = %e, "Failed to reload slot");
                    report.failed += 1;
                    continue;
                }
            };

            match self.attempt(&fresh, &credential).await {
                Attempt::Published(_) => report.published += 1,
                Attempt::Lost => report.skipped += 1,
                Attempt::Failed(_) | Attempt::Store(_) => report.failed += 1,
            }
        }

        Ok(report)
    }

    /// Publish one slot immediately, regardless of its schedule.
    pub async fn publish_slot_now(&self, slot_id: &str) -> Result<Value, PublishNowError> {
        let slot = slots::get_slot(&self.db, slot_id)
            .await?
            .ok_or(PublishNowError::NotFound)?;
        if slot.published {
            return Err(PublishNowError::AlreadyPublished);
        }

        let credential = page::active_credential(&self.db)
            .await?
            .ok_or(PublishNowError::NotConfigured)?;

        let _claim = self.claim(slot_id).ok_or(PublishNowError::InProgress)?;

        let slot = slots::get_slot(&self.db, slot_id)
            .await?
            .ok_or(PublishNowError::NotFound)?;
        if slot.published {
            return Err(PublishNowError::AlreadyPublished);
        }

        match self.attempt(&slot, &credential).await {
            Attempt::Published(result) => Ok(result),
            Attempt::Failed(e) => Err(PublishNowError::Failed(e)),
            Attempt::Lost => Err(PublishNowError::AlreadyPublished),
            Attempt::Store(e) => Err(PublishNowError::Store(e)),
        }
    }

    /// One publish call plus the state write and notification that follow it.
    /// The caller must hold the slot's claim.
    async fn attempt(&self, slot: &Slot, credential: &PageCredential) -> Attempt {
        let result = self
            .publisher
            .publish(
                &credential.page_id,
                &credential.access_token,
                Some(slot.post_text()),
                Some(slot.image_url.as_deref().unwrap_or("")),
            )
            .await;

        match result {
            Ok(confirmation) => {
                match slots::mark_slot_published(&self.db, &slot.id, Utc::now(), &confirmation).await
                {
                    Ok(true) => {
                        tracing::info!(slot_id = %slot.id, "Slot published");
                        self.notifier.emit(SlotEvent::Published {
                            slot_id: slot.id.clone(),
                            result: confirmation.clone(),
                        });
                        Attempt::Published(confirmation)
                    }
                    Ok(false) => {
                        tracing::warn!(
                            slot_id = %slot.id,
                            "Slot was recorded as published by another writer; post may be duplicated"
                        );
                        Attempt::Lost
                    }
                    Err(e) => {
                        tracing::error!(
                            slot_id = %slot.id,
                            error = %e,
                            "Slot published but the result could not be saved"
                        );
                        Attempt::Store(e)
                    }
                }
            }
            Err(err) => {
                tracing::warn!(
                    slot_id = %slot.id,
                    attempts = slot.publish_attempts + 1,
                    error = %err,
                    "Failed to publish slot"
                );
                if let Err(e) = slots::record_publish_error(&self.db, &slot.id, &err.message).await {
                    tracing::error!(slot_id = %slot.id, error = %e, "Failed to record publish error");
                }
                Attempt::Failed(err)
            }
        }
    }
}

/// Run a tick every `period` until `shutdown` flips to true.
/// The first tick happens one period after start-up.
pub async fn start_background_scheduler(
    scheduler: Arc<Scheduler>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(period_secs = period.as_secs(), "Publish scheduler started");

    loop {
        tokio::select! {
            _ = interval.tick() => scheduler.run_due_slot_publication().await,
            _ = shutdown.changed() => break,
        }
    }

    tracing::info!("Publish scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::slots::queries::NewSlot;
    use crate::services::db::test_pool;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records every call; fails when the message starts with "fail".
    #[derive(Default)]
    struct FakePublisher {
        calls: Mutex<Vec<(String, String, Option<String>, Option<String>)>>,
        counter: AtomicUsize,
        delay: Option<Duration>,
    }

    impl FakePublisher {
        fn calls(&self) -> Vec<(String, String, Option<String>, Option<String>)> {
            self.calls.lock().unwrap().clone()
        }

        fn messages(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .map(|(_, _, message, _)| message.unwrap_or_default())
                .collect()
        }
    }

    #[async_trait]
    impl Publisher for FakePublisher {
        async fn publish(
            &self,
            page_id: &str,
            access_token: &str,
            message: Option<&str>,
            image_url: Option<&str>,
        ) -> Result<Value, PublishError> {
            self.calls.lock().unwrap().push((
                page_id.to_string(),
                access_token.to_string(),
                message.map(str::to_string),
                image_url.map(str::to_string),
            ));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if message.is_some_and(|m| m.starts_with("fail")) {
                return Err(PublishError {
                    message: "Facebook API error: {\"error\":{\"code\":190}}".to_string(),
                    details: Some(json!({ "error": { "code": 190 } })),
                });
            }
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "id": format!("123_{}", n) }))
        }
    }

    struct Harness {
        pool: SqlitePool,
        publisher: Arc<FakePublisher>,
        notifier: EventNotifier,
        scheduler: Scheduler,
    }

    async fn harness_with(publisher: FakePublisher, configured: bool) -> Harness {
        let pool = test_pool().await;
        if configured {
            page::set_page(
                &pool,
                &PageCredential {
                    page_id: "123".to_string(),
                    page_name: "Carp King".to_string(),
                    access_token: "tok".to_string(),
                },
            )
            .await
            .unwrap();
        }
        let publisher = Arc::new(publisher);
        let notifier = EventNotifier::new(16);
        let scheduler = Scheduler::new(pool.clone(), publisher.clone(), notifier.clone());
        Harness {
            pool,
            publisher,
            notifier,
            scheduler,
        }
    }

    async fn harness() -> Harness {
        harness_with(FakePublisher::default(), true).await
    }

    async fn add_slot(pool: &SqlitePool, id: &str, content: &str, scheduled_at: Option<&str>) {
        slots::insert_slot(
            pool,
            &NewSlot {
                id: id.to_string(),
                content: Some(content.to_string()),
                image_url: None,
                message: None,
                ab_timing: None,
                scheduled_at: scheduled_at.map(str::to_string),
                created_at: Utc::now(),
            },
        )
        .await
        .unwrap();
    }

    async fn load(pool: &SqlitePool, id: &str) -> Slot {
        slots::get_slot(pool, id).await.unwrap().unwrap()
    }

    fn jan_2() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_due_slot_is_published_and_announced() {
        let h = harness().await;
        add_slot(&h.pool, "s1", "hello", Some("2024-01-01T00:00:00Z")).await;
        let mut events = h.notifier.subscribe();

        let report = h.scheduler.tick_at(jan_2()).await.unwrap();
        assert_eq!(report.published, 1);

        let calls = h.publisher.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            (
                "123".to_string(),
                "tok".to_string(),
                Some("hello".to_string()),
                Some(String::new())
            )
        );

        let slot = load(&h.pool, "s1").await;
        assert!(slot.published);
        assert!(slot.published_at.is_some());
        assert_eq!(slot.fb_result.unwrap().0, json!({ "id": "123_0" }));

        match events.try_recv().unwrap() {
            SlotEvent::Published { slot_id, result } => {
                assert_eq!(slot_id, "s1");
                assert_eq!(result, json!({ "id": "123_0" }));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failure_is_recorded_and_retried() {
        let h = harness().await;
        add_slot(&h.pool, "s1", "fail please", Some("2024-01-01T00:00:00Z")).await;
        let mut events = h.notifier.subscribe();

        let report = h.scheduler.tick_at(jan_2()).await.unwrap();
        assert_eq!(report.failed, 1);

        let slot = load(&h.pool, "s1").await;
        assert!(!slot.published);
        assert!(slot.publish_error.as_deref().unwrap().contains("190"));
        assert_eq!(slot.publish_attempts, 1);
        assert!(events.try_recv().is_err());

        h.scheduler.tick_at(jan_2()).await.unwrap();
        assert_eq!(h.publisher.calls().len(), 2);
        assert_eq!(load(&h.pool, "s1").await.publish_attempts, 2);
    }

    #[tokio::test]
    async fn test_only_due_unpublished_slots_are_attempted() {
        let h = harness().await;
        add_slot(&h.pool, "due", "due", Some("2024-01-01T00:00:00Z")).await;
        add_slot(&h.pool, "exact", "exact", Some("2024-01-02T00:00:00Z")).await;
        add_slot(&h.pool, "future", "future", Some("2099-01-01T00:00:00Z")).await;
        add_slot(&h.pool, "unscheduled", "unscheduled", None).await;
        add_slot(&h.pool, "invalid", "invalid", Some("not a date")).await;
        add_slot(&h.pool, "done", "done", Some("2023-01-01T00:00:00Z")).await;
        slots::mark_slot_published(&h.pool, "done", Utc::now(), &json!({}))
            .await
            .unwrap();

        let report = h.scheduler.tick_at(jan_2()).await.unwrap();
        assert_eq!(report.due, 2);

        let mut messages = h.publisher.messages();
        messages.sort();
        assert_eq!(messages, ["due", "exact"]);
    }

    #[tokio::test]
    async fn test_published_slot_is_never_retried() {
        let h = harness().await;
        add_slot(&h.pool, "s1", "hello", Some("2024-01-01T00:00:00Z")).await;

        for _ in 0..3 {
            h.scheduler.tick_at(jan_2()).await.unwrap();
        }
        assert_eq!(h.publisher.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_block_other_slots() {
        let h = harness().await;
        add_slot(&h.pool, "a", "fail a", Some("2024-01-01T00:00:00Z")).await;
        add_slot(&h.pool, "b", "ok b", Some("2024-01-01T00:00:00Z")).await;

        let report = h.scheduler.tick_at(jan_2()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.published, 1);
        assert!(!load(&h.pool, "a").await.published);
        assert!(load(&h.pool, "b").await.published);
    }

    #[tokio::test]
    async fn test_unconfigured_tick_is_a_no_op() {
        let h = harness_with(FakePublisher::default(), false).await;
        add_slot(&h.pool, "s1", "hello", Some("2024-01-01T00:00:00Z")).await;

        let report = h.scheduler.tick_at(jan_2()).await.unwrap();
        assert_eq!(report, TickReport::default());
        assert!(h.publisher.calls().is_empty());

        // a page without a token is still "not configured"
        page::set_page(
            &h.pool,
            &PageCredential {
                page_id: "123".to_string(),
                page_name: "Carp King".to_string(),
                access_token: String::new(),
            },
        )
        .await
        .unwrap();
        let report = h.scheduler.tick_at(jan_2()).await.unwrap();
        assert!(!report.configured);
        assert!(h.publisher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_publish_now_distinct_failures() {
        let h = harness().await;
        add_slot(&h.pool, "done", "done", None).await;
        slots::mark_slot_published(&h.pool, "done", Utc::now(), &json!({}))
            .await
            .unwrap();

        assert!(matches!(
            h.scheduler.publish_slot_now("missing-id").await,
            Err(PublishNowError::NotFound)
        ));
        assert!(matches!(
            h.scheduler.publish_slot_now("done").await,
            Err(PublishNowError::AlreadyPublished)
        ));

        let unconfigured = harness_with(FakePublisher::default(), false).await;
        add_slot(&unconfigured.pool, "s1", "hello", None).await;
        assert!(matches!(
            unconfigured.scheduler.publish_slot_now("s1").await,
            Err(PublishNowError::NotConfigured)
        ));

        assert!(h.publisher.calls().is_empty());
        assert!(unconfigured.publisher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_publish_now_ignores_schedule() {
        let h = harness().await;
        add_slot(&h.pool, "s3", "no schedule", None).await;

        // never picked up by the timer
        h.scheduler.tick_at(jan_2()).await.unwrap();
        assert!(h.publisher.calls().is_empty());

        let result = h.scheduler.publish_slot_now("s3").await.unwrap();
        assert_eq!(result, json!({ "id": "123_0" }));
        assert!(load(&h.pool, "s3").await.published);
    }

    #[tokio::test]
    async fn test_empty_content_publishes_message() {
        let h = harness().await;
        slots::insert_slot(
            &h.pool,
            &NewSlot {
                id: "s4".to_string(),
                content: Some(String::new()),
                image_url: None,
                message: Some("from the message field".to_string()),
                ab_timing: None,
                scheduled_at: Some("2024-01-01T00:00:00.000Z".to_string()),
                created_at: Utc::now(),
            },
        )
        .await
        .unwrap();

        h.scheduler.tick_at(jan_2()).await.unwrap();

        let calls = h.publisher.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].2.as_deref(), Some("from the message field"));
        assert!(load(&h.pool, "s4").await.published);
    }

    #[tokio::test]
    async fn test_publish_now_failure_is_reported() {
        let h = harness().await;
        add_slot(&h.pool, "s1", "fail now", None).await;

        let err = h.scheduler.publish_slot_now("s1").await.unwrap_err();
        assert!(matches!(err, PublishNowError::Failed(_)));
        let slot = load(&h.pool, "s1").await;
        assert!(!slot.published);
        assert!(slot.publish_error.is_some());
    }

    #[tokio::test]
    async fn test_claimed_slot_is_skipped() {
        let h = harness().await;
        add_slot(&h.pool, "s1", "hello", Some("2024-01-01T00:00:00Z")).await;

        let claim = h.scheduler.claim("s1").unwrap();
        let report = h.scheduler.tick_at(jan_2()).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert!(matches!(
            h.scheduler.publish_slot_now("s1").await,
            Err(PublishNowError::InProgress)
        ));
        assert!(h.publisher.calls().is_empty());

        drop(claim);
        h.scheduler.tick_at(jan_2()).await.unwrap();
        assert_eq!(h.publisher.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_triggers_publish_once() {
        let publisher = FakePublisher {
            delay: Some(Duration::from_millis(50)),
            ..FakePublisher::default()
        };
        let h = harness_with(publisher, true).await;
        add_slot(&h.pool, "s1", "hello", Some("2024-01-01T00:00:00Z")).await;

        let (manual, tick) = tokio::join!(
            h.scheduler.publish_slot_now("s1"),
            h.scheduler.tick_at(jan_2())
        );

        assert_eq!(h.publisher.calls().len(), 1);
        let tick = tick.unwrap();
        assert_eq!(manual.is_ok() as usize + tick.published, 1);
        assert!(load(&h.pool, "s1").await.published);
    }

    #[tokio::test]
    async fn test_background_scheduler_stops_on_shutdown() {
        let h = harness().await;
        let scheduler = Arc::new(h.scheduler);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(start_background_scheduler(
            scheduler,
            Duration::from_secs(3600),
            rx,
        ));
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_timed_out_publish_is_a_retryable_failure() {
        use crate::services::facebook::FacebookClient;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/123/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "id": "123_1" }))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let h = harness().await;
        let client =
            FacebookClient::new(&server.uri(), None, Duration::from_millis(300)).unwrap();
        let scheduler = Scheduler::new(h.pool.clone(), Arc::new(client), h.notifier.clone());
        add_slot(&h.pool, "s1", "slow", Some("2024-01-01T00:00:00Z")).await;

        let report = scheduler.tick_at(jan_2()).await.unwrap();
        assert_eq!(report.due, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.published, 0);

        let slot = load(&h.pool, "s1").await;
        assert!(!slot.published);
        assert!(slot.publish_error.clone().unwrap().contains("timed out"));
        assert!(slot.is_due(jan_2()));
    }
}
