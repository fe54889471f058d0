//! reactions.json：filename → emoji → 计数与去重用的 (ip, uuid) 列表。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

use crate::document::JsonDocument;
use crate::error::StoreError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reactor {
    pub ip: String,
    pub uuid: String,
}

/// `count` 始终等于 `reactors.len()`。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionEntry {
    pub count: u64,
    #[serde(rename = "users", default)]
    pub reactors: Vec<Reactor>,
}

impl ReactionEntry {
    fn has_reactor(&self, ip: &str, uuid: &str) -> bool {
        self.reactors
            .iter()
            .any(|reactor| reactor.ip == ip && reactor.uuid == uuid)
    }
}

pub type ReactionMap = BTreeMap<String, BTreeMap<String, ReactionEntry>>;

/// 对外展示用的计数，不含 ip。
pub type ReactionCounts = BTreeMap<String, BTreeMap<String, u64>>;

#[derive(Debug)]
pub struct ReactionStore {
    document: JsonDocument<ReactionMap>,
}

impl ReactionStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            document: JsonDocument::new(path),
        }
    }

    pub async fn load(&self) -> ReactionMap {
        self.document.load().await
    }

    pub async fn counts(&self) -> ReactionCounts {
        self.load()
            .await
            .into_iter()
            .map(|(filename, emojis)| {
                let counts = emojis
                    .into_iter()
                    .map(|(emoji, entry)| (emoji, entry.count))
                    .collect();
                (filename, counts)
            })
            .collect()
    }

    /// 记录一次反应并返回当前计数；同一 (ip, uuid) 重复提交不改变状态。
    pub async fn record_reaction(
        &self,
        filename: &str,
        emoji: &str,
        ip: &str,
        uuid: &str,
    ) -> Result<u64, StoreError> {
        let mut txn = self.document.begin().await;
        if let Some(entry) = txn.get(filename).and_then(|emojis| emojis.get(emoji))
            && entry.has_reactor(ip, uuid)
        {
            debug!(filename, emoji, "duplicate reaction ignored");
            return Ok(entry.count);
        }

        let entry = txn
            .entry(filename.to_string())
            .or_default()
            .entry(emoji.to_string())
            .or_default();
        entry.reactors.push(Reactor {
            ip: ip.to_string(),
            uuid: uuid.to_string(),
        });
        entry.count = entry.reactors.len() as u64;
        let count = entry.count;
        txn.commit().await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::ReactionStore;
    use tempfile::tempdir;

    fn make_store() -> (tempfile::TempDir, ReactionStore) {
        let temp = tempdir().expect("tempdir");
        let store = ReactionStore::new(temp.path().join("reactions.json"));
        (temp, store)
    }

    #[tokio::test]
    async fn same_reactor_is_counted_once() {
        let (_temp, store) = make_store();
        let first = store
            .record_reaction("sunset.jpg", "👍", "A", "X")
            .await
            .expect("react");
        let second = store
            .record_reaction("sunset.jpg", "👍", "A", "X")
            .await
            .expect("react");
        assert_eq!((first, second), (1, 1));

        let third = store
            .record_reaction("sunset.jpg", "👍", "A", "Y")
            .await
            .expect("react");
        assert_eq!(third, 2);
    }

    #[tokio::test]
    async fn duplicate_does_not_rewrite_document() {
        let (temp, store) = make_store();
        store
            .record_reaction("a.jpg", "🔥", "10.0.0.1", "u1")
            .await
            .expect("react");
        let path = temp.path().join("reactions.json");
        let modified = std::fs::metadata(&path).expect("meta").modified().expect("mtime");
        let before = std::fs::read(&path).expect("read");

        store
            .record_reaction("a.jpg", "🔥", "10.0.0.1", "u1")
            .await
            .expect("react");

        let after = std::fs::metadata(&path).expect("meta").modified().expect("mtime");
        assert_eq!(modified, after);
        assert_eq!(std::fs::read(&path).expect("read"), before);
    }

    #[tokio::test]
    async fn document_uses_users_field_and_counts_projection_hides_ips() {
        let (temp, store) = make_store();
        store
            .record_reaction("a.jpg", "😂", "1.2.3.4", "u1")
            .await
            .expect("react");
        store
            .record_reaction("b.mp4", "😂", "1.2.3.4", "u1")
            .await
            .expect("react");

        let raw: serde_json::Value = serde_json::from_slice(
            &std::fs::read(temp.path().join("reactions.json")).expect("read"),
        )
        .expect("json");
        assert_eq!(raw["a.jpg"]["😂"]["count"], 1);
        assert_eq!(raw["a.jpg"]["😂"]["users"][0]["ip"], "1.2.3.4");

        let counts = store.counts().await;
        assert_eq!(counts["a.jpg"]["😂"], 1);
        assert_eq!(counts["b.mp4"]["😂"], 1);
    }

    #[tokio::test]
    async fn different_emoji_tracked_separately() {
        let (_temp, store) = make_store();
        store.record_reaction("a.jpg", "👍", "A", "X").await.expect("react");
        let count = store.record_reaction("a.jpg", "❤️", "A", "X").await.expect("react");
        assert_eq!(count, 1);
        assert_eq!(store.load().await["a.jpg"].len(), 2);
    }
}
