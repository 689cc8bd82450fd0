use crate::{
    llm::Role,
    store::{KvStore, StoreError},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: Role,
    pub content: String,
    pub at: DateTime<Utc>,
}

impl ChatEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            at: Utc::now(),
        }
    }
}

pub fn history_key(session_id: &str) -> String {
    format!("chat:history:{session_id}")
}

/// Per-session transcript kept in a [`KvStore`] as one JSON array.
///
/// Appends to one session are serialized within this process, so concurrent
/// requests never overwrite each other's exchange.
#[derive(Clone)]
pub struct ChatHistory {
    store: Arc<dyn KvStore>,
    limit: usize,
    writers: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl ChatHistory {
    pub fn new(store: Arc<dyn KvStore>, limit: usize) -> Self {
        Self {
            store,
            limit: limit.max(1),
            writers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn load(&self, session_id: &str) -> Result<Vec<ChatEntry>, StoreError> {
        let key = history_key(session_id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(err) => {
                warn!(target = "storeops.chat", session_id, error = %err, "discarding unreadable chat history");
                Ok(Vec::new())
            }
        }
    }

    /// Appends and keeps only the newest `limit` entries.
    pub async fn append(
        &self,
        session_id: &str,
        new_entries: Vec<ChatEntry>,
    ) -> Result<Vec<ChatEntry>, StoreError> {
        let writer = self.writer(session_id).await;
        let guard = writer.lock().await;
        let result = self.write(session_id, new_entries).await;
        drop(guard);
        self.release(session_id, writer).await;
        result
    }

    async fn write(
        &self,
        session_id: &str,
        new_entries: Vec<ChatEntry>,
    ) -> Result<Vec<ChatEntry>, StoreError> {
        let mut entries = self.load(session_id).await?;
        entries.extend(new_entries);
        if entries.len() > self.limit {
            let excess = entries.len() - self.limit;
            entries.drain(..excess);
        }
        let raw = serde_json::to_string(&entries).unwrap_or_else(|_| "[]".to_string());
        self.store.set(&history_key(session_id), raw).await?;
        Ok(entries)
    }

    async fn writer(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.writers
            .lock()
            .await
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    // Drops the session's lock once no other append holds or waits on it.
    async fn release(&self, session_id: &str, writer: Arc<Mutex<()>>) {
        let mut writers = self.writers.lock().await;
        drop(writer);
        if writers
            .get(session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            writers.remove(session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn append_trims_to_limit() {
        let history = ChatHistory::new(Arc::new(MemoryStore::new()), 3);
        for n in 0..5 {
            history
                .append("s1", vec![ChatEntry::new(Role::User, format!("m{n}"))])
                .await
                .expect("append");
        }
        let entries = history.load("s1").await.expect("load");
        let contents: Vec<&str> = entries.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
        assert!(history.load("other").await.expect("load").is_empty());
    }

    /// Yields to the scheduler before every read, so concurrent appends
    /// interleave the way they do against a networked store.
    struct YieldingStore(MemoryStore);

    impl KvStore for YieldingStore {
        fn get<'a>(
            &'a self,
            key: &'a str,
        ) -> futures::future::BoxFuture<'a, Result<Option<String>, StoreError>> {
            Box::pin(async move {
                tokio::task::yield_now().await;
                self.0.get(key).await
            })
        }

        fn set<'a>(
            &'a self,
            key: &'a str,
            value: String,
        ) -> futures::future::BoxFuture<'a, Result<(), StoreError>> {
            self.0.set(key, value)
        }
    }

    #[tokio::test]
    async fn concurrent_appends_keep_both_exchanges() {
        let history = ChatHistory::new(Arc::new(YieldingStore(MemoryStore::new())), 10);
        let (first, second) = tokio::join!(
            history.append("s1", vec![ChatEntry::new(Role::User, "a")]),
            history.append("s1", vec![ChatEntry::new(Role::User, "b")]),
        );
        first.expect("append");
        second.expect("append");

        let mut contents: Vec<String> = history
            .load("s1")
            .await
            .expect("load")
            .into_iter()
            .map(|e| e.content)
            .collect();
        contents.sort();
        assert_eq!(contents, vec!["a", "b"]);
        assert!(history.writers.lock().await.is_empty());
    }

    #[tokio::test]
    async fn unreadable_history_starts_fresh() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(&history_key("s1"), "not json".into())
            .await
            .expect("set");
        let history = ChatHistory::new(store, 10);
        assert!(history.load("s1").await.expect("load").is_empty());
    }
}
