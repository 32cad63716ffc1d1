//! In-memory provider event ledger

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;

use super::MemoryStore;
use crate::error::{DbError, DbResult};
use crate::repo::{ClaimOutcome, EventState, ProcessedEvent, ProcessedEventRepository};

/// In-memory event ledger
#[derive(Clone)]
pub struct MemoryProcessedEventRepository {
    store: MemoryStore,
}

impl MemoryProcessedEventRepository {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProcessedEventRepository for MemoryProcessedEventRepository {
    async fn claim(
        &self,
        event_id: &str,
        event_type: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> DbResult<ClaimOutcome> {
        self.store.record("events.claim")?;
        let fresh = ProcessedEvent {
            event_id: event_id.to_string(),
            event_type: event_type.to_string(),
            state: EventState::Processing,
            outcome: None,
            claimed_at: now,
            completed_at: None,
        };

        match self.store.inner.events.entry(event_id.to_string()) {
            Entry::Vacant(e) => {
                e.insert(fresh);
                Ok(ClaimOutcome::Claimed)
            }
            Entry::Occupied(mut e) => {
                let (state, claimed_at) = (e.get().state, e.get().claimed_at);
                match state {
                    EventState::Completed => Ok(ClaimOutcome::AlreadyCompleted),
                    EventState::Processing if now - claimed_at >= stale_after => {
                        tracing::warn!(event_id, "taking over stale event claim");
                        e.insert(fresh);
                        Ok(ClaimOutcome::Claimed)
                    }
                    EventState::Processing => Ok(ClaimOutcome::InProgress),
                }
            }
        }
    }

    async fn complete(&self, event_id: &str, outcome: &str, now: DateTime<Utc>) -> DbResult<()> {
        self.store.record("events.complete")?;
        let mut row = self
            .store
            .inner
            .events
            .get_mut(event_id)
            .ok_or(DbError::NotFound)?;
        row.state = EventState::Completed;
        row.outcome = Some(outcome.to_string());
        row.completed_at = Some(now);
        Ok(())
    }

    async fn release(&self, event_id: &str) -> DbResult<()> {
        self.store.record("events.release")?;
        self.store
            .inner
            .events
            .remove_if(event_id, |_, row| row.state == EventState::Processing);
        Ok(())
    }

    async fn find(&self, event_id: &str) -> DbResult<Option<ProcessedEvent>> {
        self.store.record("events.find")?;
        Ok(self
            .store
            .inner
            .events
            .get(event_id)
            .map(|row| row.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> MemoryProcessedEventRepository {
        MemoryProcessedEventRepository::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn test_claim_then_complete() {
        let repo = ledger();
        let now = Utc::now();
        let stale = Duration::minutes(5);

        assert_eq!(
            repo.claim("evt_1", "invoice.payment_succeeded", now, stale).await.unwrap(),
            ClaimOutcome::Claimed
        );
        assert_eq!(
            repo.claim("evt_1", "invoice.payment_succeeded", now, stale).await.unwrap(),
            ClaimOutcome::InProgress
        );

        repo.complete("evt_1", "applied", now).await.unwrap();
        assert_eq!(
            repo.claim("evt_1", "invoice.payment_succeeded", now, stale).await.unwrap(),
            ClaimOutcome::AlreadyCompleted
        );

        let row = repo.find("evt_1").await.unwrap().unwrap();
        assert_eq!(row.state, EventState::Completed);
        assert_eq!(row.outcome.as_deref(), Some("applied"));
    }

    #[tokio::test]
    async fn test_stale_claim_is_taken_over() {
        let repo = ledger();
        let then = Utc::now();
        let stale = Duration::minutes(5);
        repo.claim("evt_1", "customer.updated", then, stale).await.unwrap();

        let later = then + Duration::minutes(6);
        assert_eq!(
            repo.claim("evt_1", "customer.updated", later, stale).await.unwrap(),
            ClaimOutcome::Claimed
        );
        assert_eq!(repo.find("evt_1").await.unwrap().unwrap().claimed_at, later);
    }

    #[tokio::test]
    async fn test_release_keeps_completed_rows() {
        let repo = ledger();
        let now = Utc::now();
        let stale = Duration::minutes(5);

        repo.claim("evt_1", "customer.updated", now, stale).await.unwrap();
        repo.release("evt_1").await.unwrap();
        assert!(repo.find("evt_1").await.unwrap().is_none());

        repo.claim("evt_2", "customer.updated", now, stale).await.unwrap();
        repo.complete("evt_2", "applied", now).await.unwrap();
        repo.release("evt_2").await.unwrap();
        assert!(repo.find("evt_2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_complete_unknown_event() {
        let err = ledger().complete("evt_x", "applied", Utc::now()).await.unwrap_err();
        assert_eq!(err, DbError::NotFound);
    }
}
