//! services/client/src/sync/schedule.rs
//!
//! Mirrors the user's schedule sub-collection into local state. Every snapshot
//! rebuilds the whole entry list with expired entries filtered out; writes are
//! fire-and-report, with no local rollback.

use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use futures::StreamExt;
use std::sync::Arc;
use study_sync_core::domain::{ScheduleDraft, ScheduleEntry};
use study_sync_core::ports::{CollectionPath, CollectionSnapshot, DocumentStore};
use study_sync_core::schema;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::SyncError;

/// How many entries the upcoming view shows.
pub const UPCOMING_LIMIT: usize = 5;

struct ActiveSchedule {
    user_id: String,
    epoch: u64,
    token: CancellationToken,
}

pub struct ScheduleSync {
    store: Arc<dyn DocumentStore>,
    entries: watch::Sender<Vec<ScheduleEntry>>,
    active: Mutex<Option<ActiveSchedule>>,
}

impl ScheduleSync {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let (entries, _) = watch::channel(Vec::new());
        Self { store, entries, active: Mutex::new(None) }
    }

    /// The live entries of the last snapshot, in store order.
    pub fn entries(&self) -> Vec<ScheduleEntry> {
        self.entries.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Vec<ScheduleEntry>> {
        self.entries.subscribe()
    }

    pub fn upcoming(&self, now: DateTime<Local>) -> Vec<ScheduleEntry> {
        upcoming(&self.entries.borrow(), now)
    }

    pub fn daily(&self, date: NaiveDate, now: DateTime<Utc>) -> Vec<ScheduleEntry> {
        daily(&self.entries.borrow(), date, now)
    }

    /// Starts listening to `user_id`'s schedules for session scope `epoch`.
    pub async fn subscribe(self: &Arc<Self>, user_id: &str, epoch: u64, token: CancellationToken) {
        let collection = CollectionPath::schedules(user_id);
        {
            let mut active = self.active.lock().await;
            if let Some(previous) = active.take() {
                previous.token.cancel();
            }
            *active = Some(ActiveSchedule { user_id: user_id.to_string(), epoch, token: token.clone() });
            self.entries.send_replace(Vec::new());
        }

        let mut stream = self.store.watch_collection(&collection);
        let sync = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = token.cancelled() => break,
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(snapshot)) => sync.apply_snapshot(epoch, snapshot).await,
                    Some(Err(e)) => error!("Schedule snapshot error: {}", e),
                    None => break,
                }
            }
            debug!("Schedule listener for scope {} stopped.", epoch);
        });
        info!("Schedule subscription started for {} (scope {})", collection, epoch);
    }

    async fn apply_snapshot(&self, epoch: u64, snapshot: CollectionSnapshot) {
        let active = self.active.lock().await;
        if active.as_ref().map(|a| a.epoch) != Some(epoch) {
            debug!("Ignoring stale schedule snapshot from scope {}", epoch);
            return;
        }
        let now = Utc::now();
        let entries = snapshot
            .documents
            .iter()
            .filter_map(|doc| match schema::decode_schedule_entry(&doc.id, &doc.data) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping schedule document: {}", e);
                    None
                }
            })
            .filter(|entry| entry.is_live(now))
            .collect();
        self.entries.send_replace(entries);
    }

    /// Stops the current subscription and clears the entries.
    pub async fn unsubscribe(&self) {
        if let Some(previous) = self.active.lock().await.take() {
            previous.token.cancel();
            info!("Schedule subscription for scope {} torn down.", previous.epoch);
        }
        self.entries.send_replace(Vec::new());
    }

    async fn collection(&self) -> Result<CollectionPath, SyncError> {
        let active = self.active.lock().await;
        let active = active.as_ref().ok_or(SyncError::NoSession)?;
        Ok(CollectionPath::schedules(&active.user_id))
    }

    /// Creates the entry when the draft has no id, otherwise merge-writes the
    /// existing document. Returns the id of the written document.
    pub async fn upsert(&self, draft: ScheduleDraft) -> Result<String, SyncError> {
        if draft.title.trim().is_empty() {
            return Err(SyncError::Validation("Title is required.".to_string()));
        }
        let collection = self.collection().await?;
        let expires_at = end_of_day(draft.date)?;

        let result = match &draft.id {
            Some(id) => {
                let payload = schema::encode_schedule_entry(&draft, None, expires_at);
                self.store.merge(&collection.doc(id), payload).await.map(|()| id.clone())
            }
            None => {
                let payload = schema::encode_schedule_entry(&draft, Some(Utc::now()), expires_at);
                self.store.add(&collection, payload).await
            }
        };
        result.map_err(|e| {
            error!("Error saving schedule: {}", e);
            SyncError::Port(e)
        })
    }

    pub async fn remove(&self, id: &str) -> Result<(), SyncError> {
        let collection = self.collection().await?;
        self.store.delete(&collection.doc(id)).await.map_err(|e| {
            error!("Error deleting schedule {}: {}", id, e);
            SyncError::Port(e)
        })
    }
}

/// The last representable local instant of `date`.
fn end_of_day(date: NaiveDate) -> Result<DateTime<Utc>, SyncError> {
    let last_milli = NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
        .ok_or_else(|| SyncError::Validation("invalid end-of-day time".to_string()))?;
    Local
        .from_local_datetime(&date.and_time(last_milli))
        .earliest()
        .map(|at| at.with_timezone(&Utc))
        .ok_or_else(|| SyncError::Validation(format!("{} has no local end of day", date)))
}

/// Live entries starting strictly after `now`, soonest first, at most five.
pub fn upcoming(entries: &[ScheduleEntry], now: DateTime<Local>) -> Vec<ScheduleEntry> {
    let utc_now = now.with_timezone(&Utc);
    let wall_clock = now.naive_local();
    let mut next: Vec<ScheduleEntry> = entries
        .iter()
        .filter(|entry| entry.is_live(utc_now) && entry.starts_at() > wall_clock)
        .cloned()
        .collect();
    next.sort_by_key(ScheduleEntry::starts_at);
    next.truncate(UPCOMING_LIMIT);
    next
}

/// Live entries on `date`, in store order.
pub fn daily(entries: &[ScheduleEntry], date: NaiveDate, now: DateTime<Utc>) -> Vec<ScheduleEntry> {
    entries
        .iter()
        .filter(|entry| entry.date == date && entry.is_live(now))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{test_map, MemoryStore};
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use study_sync_core::domain::{EntryType, Expiry, Timestamp};
    use study_sync_core::ports::PortError;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn entry(id: &str, date: NaiveDate, start: NaiveTime, expires_at: Option<Expiry>) -> ScheduleEntry {
        ScheduleEntry {
            id: id.into(),
            date,
            title: format!("Entry {}", id),
            start_time: start,
            end_time: time(23, 0),
            entry_type: EntryType::Reading,
            created_at: None,
            expires_at,
        }
    }

    fn draft(id: Option<&str>, date: NaiveDate, title: &str) -> ScheduleDraft {
        ScheduleDraft {
            id: id.map(str::to_string),
            date,
            title: title.into(),
            start_time: time(9, 0),
            end_time: time(10, 0),
            entry_type: EntryType::Practice,
        }
    }

    async fn subscribed(store: &MemoryStore) -> Arc<ScheduleSync> {
        let sync = Arc::new(ScheduleSync::new(Arc::new(store.clone())));
        sync.subscribe("u1", 1, CancellationToken::new()).await;
        sync
    }

    #[test]
    fn entries_that_expired_yesterday_never_show() {
        let now = Local::now();
        let today = now.date_naive();
        let yesterday = today - ChronoDuration::days(1);
        let tomorrow = today + ChronoDuration::days(1);
        let yesterday_expiry = Expiry::Text(yesterday.format("%Y-%m-%d").to_string());
        let expired_ts = Expiry::Timestamp(Timestamp::from_datetime(Utc::now() - ChronoDuration::days(1)));

        let entries = vec![
            entry("expired-text", tomorrow, time(9, 0), Some(yesterday_expiry)),
            entry("expired-ts", today, time(23, 59), Some(expired_ts)),
            entry("live", tomorrow, time(8, 0), None),
        ];

        let ids = |list: Vec<ScheduleEntry>| list.into_iter().map(|e| e.id).collect::<Vec<_>>();
        assert_eq!(ids(upcoming(&entries, now)), vec!["live".to_string()]);
        assert!(daily(&entries, today, Utc::now()).is_empty());
        assert_eq!(ids(daily(&entries, tomorrow, Utc::now())), vec!["live".to_string()]);
    }

    #[test]
    fn upcoming_is_sorted_and_capped() {
        let now = Local::now();
        let base = now.date_naive() + ChronoDuration::days(1);
        let entries: Vec<ScheduleEntry> = (0..7)
            .rev()
            .map(|i| entry(&i.to_string(), base + ChronoDuration::days(i), time(10, 0), None))
            .collect();
        let ids: Vec<String> = upcoming(&entries, now).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn entries_already_started_are_not_upcoming() {
        let now = Local::now();
        let yesterday = now.date_naive() - ChronoDuration::days(1);
        let entries = vec![entry("past", yesterday, time(9, 0), None)];
        assert!(upcoming(&entries, now).is_empty());
    }

    #[tokio::test]
    async fn upsert_without_id_always_creates_a_new_document() {
        let store = MemoryStore::new();
        let sync = subscribed(&store).await;
        let date = Local::now().date_naive() + ChronoDuration::days(2);

        let first = sync.upsert(draft(None, date, "Algebra")).await.unwrap();
        let second = sync.upsert(draft(None, date, "Biology")).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(store.count(&CollectionPath::schedules("u1")), 2);
        let stored = store.get(&CollectionPath::schedules("u1").doc(&first)).await.unwrap().unwrap();
        assert!(stored.contains_key("createdAt"));
        assert!(stored.contains_key("expiresAt"));
        assert_eq!(stored["date"], json!(date.format("%Y-%m-%d").to_string()));
    }

    #[tokio::test]
    async fn upsert_with_id_modifies_exactly_that_document() {
        let store = MemoryStore::new();
        let collection = CollectionPath::schedules("u1");
        let sync = subscribed(&store).await;
        let date = Local::now().date_naive() + ChronoDuration::days(2);

        let keep = sync.upsert(draft(None, date, "Keep")).await.unwrap();
        let edit = sync.upsert(draft(None, date, "Old")).await.unwrap();
        let created_at = store.get(&collection.doc(&edit)).await.unwrap().unwrap()["createdAt"].clone();

        let written = sync.upsert(draft(Some(&edit), date, "New")).await.unwrap();

        assert_eq!(written, edit);
        assert_eq!(store.count(&collection), 2);
        let edited = store.get(&collection.doc(&edit)).await.unwrap().unwrap();
        assert_eq!(edited["title"], json!("New"));
        assert_eq!(edited["createdAt"], created_at);
        let untouched = store.get(&collection.doc(&keep)).await.unwrap().unwrap();
        assert_eq!(untouched["title"], json!("Keep"));
    }

    #[tokio::test]
    async fn snapshots_skip_malformed_documents() {
        let store = MemoryStore::new();
        let collection = CollectionPath::schedules("u1");
        store.add(&collection, test_map(json!({"title": "No date"}))).await.unwrap();
        let sync = subscribed(&store).await;
        let mut rx = sync.watch();

        let date = Local::now().date_naive() + ChronoDuration::days(1);
        let id = sync.upsert(draft(None, date, "Chemistry")).await.unwrap();
        rx.wait_for(|entries| !entries.is_empty()).await.unwrap();

        let entries = sync.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].title, "Chemistry");
    }

    #[tokio::test]
    async fn blank_titles_are_rejected_before_any_write() {
        let store = MemoryStore::new();
        let sync = subscribed(&store).await;
        let result = sync.upsert(draft(None, Local::now().date_naive(), "   ")).await;
        assert!(matches!(result, Err(SyncError::Validation(_))));
        assert_eq!(store.count(&CollectionPath::schedules("u1")), 0);
    }

    #[tokio::test]
    async fn write_failures_are_reported() {
        let store = MemoryStore::new();
        let sync = subscribed(&store).await;
        store.fail_writes(Some("offline"));
        assert_eq!(
            sync.remove("missing").await,
            Err(SyncError::Port(PortError::Unavailable("offline".into())))
        );
    }

    #[tokio::test]
    async fn writes_need_a_session() {
        let sync = ScheduleSync::new(Arc::new(MemoryStore::new()));
        let result = sync.upsert(draft(None, Local::now().date_naive(), "Read")).await;
        assert_eq!(result, Err(SyncError::NoSession));
    }

    #[test]
    fn expiry_is_the_last_millisecond_of_the_local_day() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let at = end_of_day(date).unwrap().with_timezone(&Local);
        assert_eq!(at.date_naive(), date);
        assert_eq!(at.time(), NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap());
    }
}
