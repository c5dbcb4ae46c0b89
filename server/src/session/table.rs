use crate::error::{CoreError, CoreResult};
use crate::session::SessionId;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Repository for one kind of session record.
/// Each operation takes and releases the table lock itself, and only
/// accepts synchronous closures, so no caller holds it across an await.
pub struct SessionTable<T> {
    kind: &'static str,
    entries: RwLock<HashMap<SessionId, T>>,
}

impl<T> SessionTable<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, session_id: &str, value: T) -> CoreResult<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(session_id) {
            return Err(CoreError::conflict(format!("{} {} already exists", self.kind, session_id)));
        }
        entries.insert(session_id.to_string(), value);
        Ok(())
    }

    /// Take a record out; the first caller wins, later ones get None
    pub async fn remove(&self, session_id: &str) -> Option<T> {
        self.entries.write().await.remove(session_id)
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.entries.read().await.contains_key(session_id)
    }

    pub async fn read<R>(&self, session_id: &str, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.entries.read().await.get(session_id).map(f)
    }

    /// Remove and return every record matching `pred`
    pub async fn drain_where(&self, pred: impl Fn(&T) -> bool) -> Vec<(SessionId, T)> {
        let mut entries = self.entries.write().await;
        let ids: Vec<SessionId> = entries
            .iter()
            .filter(|(_, v)| pred(v))
            .map(|(id, _)| id.clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| entries.remove(&id).map(|v| (id, v)))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_duplicate_insert_conflicts() {
        let table = SessionTable::new("battle");
        table.insert("battle:1", 1u32).await.unwrap();

        let err = table.insert("battle:1", 2).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
        assert_eq!(table.read("battle:1", |v| *v).await, Some(1));
    }

    #[tokio::test]
    async fn test_second_remove_is_noop() {
        let table = SessionTable::new("trade");
        table.insert("trade:1", "x").await.unwrap();

        assert_eq!(table.remove("trade:1").await, Some("x"));
        assert_eq!(table.remove("trade:1").await, None);
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn test_drain_where() {
        let table = SessionTable::new("battle");
        for i in 0..6u32 {
            table.insert(&format!("battle:{}", i), i).await.unwrap();
        }

        let mut drained = table.drain_where(|v| v % 2 == 0).await;
        drained.sort();

        assert_eq!(drained.iter().map(|(_, v)| *v).collect::<Vec<_>>(), vec![0, 2, 4]);
        assert_eq!(table.len().await, 3);
        assert!(!table.contains("battle:2").await);
    }

    #[tokio::test]
    async fn test_concurrent_remove_has_single_winner() {
        let table = Arc::new(SessionTable::new("battle"));
        table.insert("battle:1", ()).await.unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let table = table.clone();
                tokio::spawn(async move { table.remove("battle:1").await.is_some() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
