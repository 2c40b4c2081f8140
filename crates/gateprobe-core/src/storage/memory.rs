use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use crate::model::HistoryRunRow;
use crate::storage::{HistoryStore, StoreError};

/// In-memory [`HistoryStore`], used by tests and by hosts that run without a
/// database. Ids are globally monotonic so insertion order is recoverable
/// even across providers.
#[derive(Default)]
pub struct MemoryHistoryStore {
    rows: Mutex<HashMap<String, Vec<HistoryRunRow>>>,
    next_id: AtomicI64,
    unavailable: AtomicBool,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing the storage environment. Every call afterwards
    /// returns [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, value: bool) {
        self.unavailable.store(value, Ordering::SeqCst);
    }

    fn guard(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(
        &self,
        provider_id: &str,
        request_json: &str,
        result_json: &str,
    ) -> Result<(), StoreError> {
        self.guard()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let row = HistoryRunRow {
            id,
            created_at: Utc::now().to_rfc3339(),
            request_json: request_json.to_string(),
            result_json: result_json.to_string(),
        };
        let mut rows = self.rows.lock().unwrap();
        rows.entry(provider_id.to_string()).or_default().push(row);
        Ok(())
    }

    async fn list(&self, provider_id: &str, limit: u32) -> Result<Vec<HistoryRunRow>, StoreError> {
        self.guard()?;
        let rows = self.rows.lock().unwrap();
        let mut out = rows.get(provider_id).cloned().unwrap_or_default();
        out.sort_by_key(|r| std::cmp::Reverse(r.id));
        out.truncate(limit as usize);
        Ok(out)
    }

    async fn clear(&self, provider_id: &str) -> Result<bool, StoreError> {
        self.guard()?;
        let mut rows = self.rows.lock().unwrap();
        Ok(rows.remove(provider_id).map(|v| !v.is_empty()).unwrap_or(false))
    }
}
