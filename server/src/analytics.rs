use std::sync::Arc;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, SecondsFormat, Utc};
use serde_json::Value;

use crate::{
    models::ClickAnalytics,
    store::{from_document, to_document, DocKey, Document, DocumentStore, FieldValue, StoreError},
    subscription::Subscription,
};

pub const ANALYTICS_COLLECTION: &str = "analytics";
pub const ANALYTICS_DOC_ID: &str = "click-analytics";

// ── Window rollover ────────────────────────────────────────────────────────

/// Which window counters the current click opens afresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rollover {
    pub new_day: bool,
    pub new_week: bool,
    pub new_month: bool,
}

impl Rollover {
    /// Compare the calendar positions of the previous and the current click.
    /// Weeks are ISO-8601 weeks (Monday first, week 1 holds the year's first
    /// Thursday) and are compared together with their ISO year.
    pub fn between(last: NaiveDate, now: NaiveDate) -> Self {
        Self {
            new_day: last != now,
            new_week: last.iso_week() != now.iso_week(),
            new_month: (last.year(), last.month()) != (now.year(), now.month()),
        }
    }

    /// The update applied by one click: totals and timestamp always move,
    /// a window counter restarts at 1 when its window rolled over and is
    /// incremented in the store otherwise.
    fn updates(&self, now: DateTime<Utc>) -> Vec<(String, FieldValue)> {
        let window = |rolled: bool| {
            if rolled {
                FieldValue::Set(Value::from(1))
            } else {
                FieldValue::Increment(1)
            }
        };

        vec![
            ("totalClicks".into(), FieldValue::Increment(1)),
            (
                "lastClickedAt".into(),
                FieldValue::Set(Value::String(
                    now.to_rfc3339_opts(SecondsFormat::Millis, true),
                )),
            ),
            ("clicksToday".into(), window(self.new_day)),
            ("clicksThisWeek".into(), window(self.new_week)),
            ("clicksThisMonth".into(), window(self.new_month)),
        ]
    }
}

// ── ClickCounter ───────────────────────────────────────────────────────────

/// Records outbound link clicks into the singleton analytics document.
///
/// Day, week and month boundaries are taken in `calendar`, a fixed UTC
/// offset, so every server instance buckets clicks the same way.
///
/// Two clicks racing across a window boundary both decide on rollover from
/// their own earlier read and may both reset the counter to 1. The same holds
/// for two racing first clicks. Increments outside those two cases are done
/// by the store and are never lost.
#[derive(Clone)]
pub struct ClickCounter {
    store: Arc<dyn DocumentStore>,
    calendar: FixedOffset,
}

impl ClickCounter {
    pub fn new(store: Arc<dyn DocumentStore>, calendar: FixedOffset) -> Self {
        Self { store, calendar }
    }

    fn key() -> DocKey {
        DocKey::new(ANALYTICS_COLLECTION, ANALYTICS_DOC_ID)
    }

    /// Record one click now. Returns `false` (after logging) if the store
    /// could not be updated; the click is then simply not counted.
    pub async fn record_click(&self) -> bool {
        self.record_click_at(Utc::now()).await
    }

    pub async fn record_click_at(&self, now: DateTime<Utc>) -> bool {
        match self.try_record(now).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Error tracking click: {}", e);
                false
            }
        }
    }

    async fn try_record(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        let snapshot = self.store.get(&Self::key()).await?;
        let Some(doc) = snapshot.data else {
            return self.seed(now).await;
        };

        let rollover = Rollover::between(
            last_clicked_at(&doc).with_timezone(&self.calendar).date_naive(),
            now.with_timezone(&self.calendar).date_naive(),
        );
        tracing::debug!(?rollover, "Recording click");

        match self.store.update(&Self::key(), rollover.updates(now)).await {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound { .. }) => self.seed(now).await,
            Err(e) => Err(e),
        }
    }

    async fn seed(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        let doc = to_document(&ClickAnalytics::first_click(now))?;
        self.store.set(&Self::key(), doc, false).await?;
        tracing::info!("Click analytics started");
        Ok(())
    }

    /// Current counters, zeroed when nothing was recorded yet or the store
    /// cannot be read.
    pub async fn get_analytics(&self) -> ClickAnalytics {
        match self.store.get(&Self::key()).await {
            Ok(snapshot) => analytics_from(snapshot.data.as_ref()),
            Err(e) => {
                tracing::error!("Error fetching click analytics: {}", e);
                ClickAnalytics::zeroed(Utc::now())
            }
        }
    }

    /// Call `callback` with the counters now and again after every change.
    pub async fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(ClickAnalytics) + Send + 'static,
    {
        Subscription::open(self.store.clone(), Self::key(), analytics_from, callback).await
    }
}

fn analytics_from(doc: Option<&Document>) -> ClickAnalytics {
    match doc.map(from_document::<ClickAnalytics>) {
        Some(Ok(analytics)) => analytics,
        Some(Err(e)) => {
            tracing::warn!("Malformed click analytics document: {}", e);
            ClickAnalytics::zeroed(Utc::now())
        }
        None => ClickAnalytics::zeroed(Utc::now()),
    }
}

/// A missing or unreadable timestamp counts as the epoch, so every window
/// rolls over.
fn last_clicked_at(doc: &Document) -> DateTime<Utc> {
    doc.get("lastClickedAt")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|at| at.with_timezone(&Utc))
        .unwrap_or_default()
}
