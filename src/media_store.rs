//! media.json：有序的媒体记录列表。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::document::{DocumentTxn, JsonDocument};
use crate::error::StoreError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub filename: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug)]
pub struct MediaStore {
    document: JsonDocument<Vec<MediaRecord>>,
}

impl MediaStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            document: JsonDocument::new(path),
        }
    }

    pub async fn load(&self) -> Vec<MediaRecord> {
        self.document.load().await
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub async fn save(&self, records: &[MediaRecord]) -> Result<(), StoreError> {
        self.document.save(records).await
    }

    /// 开启一次写会话，整批修改只写回一次。
    pub async fn begin(&self) -> DocumentTxn<'_, Vec<MediaRecord>> {
        self.document.begin().await
    }

    /// 文档损坏时返回错误，供一次性迁移使用。
    pub async fn begin_strict(&self) -> Result<DocumentTxn<'_, Vec<MediaRecord>>, StoreError> {
        self.document.begin_strict().await
    }

    /// 追加一批记录，单次读-改-写。
    pub async fn append(&self, records: Vec<MediaRecord>) -> Result<(), StoreError> {
        let mut txn = self.begin().await;
        txn.extend(records);
        txn.commit().await?;
        Ok(())
    }
}
