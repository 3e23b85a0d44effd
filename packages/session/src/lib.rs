#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Session state shared across components.
//!
//! [`SessionStore`] holds the current [`ScoreRecord`] and notifies
//! subscribers on every write. Readers get snapshots; there is no
//! history. The only way to write the record is through
//! [`SessionScoreSync::publish`], which replaces it wholesale.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use opportunity_map_scoring::OpportunityScore;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// The score portion of the session, as downstream consumers see it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRecord {
    /// 0-10 opportunity score, `None` when no tract or income is known.
    pub opportunity_score: Option<u8>,
    /// Household income the score was derived from, as text.
    pub income: Option<String>,
}

/// Last-write-wins store with subscribe/notify.
#[derive(Debug)]
pub struct SessionStore {
    current: watch::Sender<ScoreRecord>,
    writes: AtomicU64,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self {
            current: watch::Sender::new(ScoreRecord::default()),
            writes: AtomicU64::new(0),
        }
    }
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The current record.
    #[must_use]
    pub fn snapshot(&self) -> ScoreRecord {
        self.current.borrow().clone()
    }

    /// A receiver that observes every subsequent write.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ScoreRecord> {
        self.current.subscribe()
    }

    /// Number of writes since creation.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn replace(&self, record: ScoreRecord) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.current.send_replace(record);
    }
}

/// The single writer of the session score.
#[derive(Debug, Clone)]
pub struct SessionScoreSync {
    store: Arc<SessionStore>,
}

impl SessionScoreSync {
    #[must_use]
    pub const fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Overwrites the score record. Nothing from the previous record
    /// survives.
    pub fn publish(&self, score: Option<OpportunityScore>, income: Option<f64>) {
        let record = ScoreRecord {
            opportunity_score: score.map(OpportunityScore::value),
            income: income.map(|income| income.to_string()),
        };
        log::debug!("Publishing session score {record:?}");
        self.store.replace(record);
    }
}

#[cfg(test)]
mod tests {
    use opportunity_map_scoring::score_from_income;

    use super::*;

    fn sync() -> (Arc<SessionStore>, SessionScoreSync) {
        let store = SessionStore::new();
        (store.clone(), SessionScoreSync::new(store))
    }

    #[test]
    fn starts_empty() {
        let store = SessionStore::new();
        assert_eq!(store.snapshot(), ScoreRecord::default());
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn publish_replaces_whole_record() {
        let (store, sync) = sync();

        sync.publish(score_from_income(Some(36000.0)), Some(36000.0));
        assert_eq!(
            store.snapshot(),
            ScoreRecord {
                opportunity_score: Some(6),
                income: Some("36000".to_string()),
            }
        );

        sync.publish(None, None);
        assert_eq!(store.snapshot(), ScoreRecord::default());
        assert_eq!(store.write_count(), 2);
    }

    #[test]
    fn fractional_income_is_kept() {
        let (store, sync) = sync();
        sync.publish(score_from_income(Some(28500.5)), Some(28500.5));
        assert_eq!(store.snapshot().income.as_deref(), Some("28500.5"));
        assert_eq!(store.snapshot().opportunity_score, Some(3));
    }

    #[test]
    fn serializes_for_consumers() {
        let (store, sync) = sync();
        sync.publish(score_from_income(Some(45001.0)), Some(45001.0));
        let value = serde_json::to_value(store.snapshot()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "opportunityScore": 10, "income": "45001" })
        );
    }

    #[tokio::test]
    async fn subscribers_see_latest_value() {
        let (store, sync) = sync();
        let mut rx = store.subscribe();

        sync.publish(score_from_income(Some(12000.0)), Some(12000.0));
        sync.publish(score_from_income(Some(39000.0)), Some(39000.0));

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().opportunity_score, Some(8));
        assert!(!rx.has_changed().unwrap());
    }
}
