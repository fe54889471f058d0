//! 单文件 JSON 文档：整体读取、内存修改、整体写回。
//!
//! 同一进程内的写入者通过文档锁串行化，读取不加锁。跨进程写入（例如服务运行期间
//! 执行 `migrate`）仍然是后写者覆盖。

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::atomic::write_atomic;
use crate::error::StoreError;

#[derive(Debug)]
pub struct JsonDocument<T> {
    path: PathBuf,
    writer: Mutex<()>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> JsonDocument<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            writer: Mutex::new(()),
            _marker: std::marker::PhantomData,
        }
    }

    /// 读取文档；缺失或无法解析时返回默认值。
    pub async fn load(&self) -> T {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = ?self.path, "document absent, starting empty");
                return T::default();
            }
            Err(err) => {
                warn!(path = ?self.path, error = %err, "document unreadable, treating as empty");
                return T::default();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(err) => {
                warn!(path = ?self.path, error = %err, "document malformed, treating as empty");
                T::default()
            }
        }
    }

    /// 以两空格缩进写回整个文档（临时文件 + 重命名）。
    pub async fn save<V>(&self, value: &V) -> Result<(), StoreError>
    where
        V: Serialize + ?Sized,
    {
        let bytes = serde_json::to_vec_pretty(value)?;
        write_atomic(&self.path, &bytes).await?;
        Ok(())
    }

    /// 严格读取：缺失时返回默认值，无法读取或解析时返回错误。
    pub async fn load_strict(&self) -> Result<T, StoreError> {
        match fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(StoreError::Malformed),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(T::default()),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    /// 获取写锁并读取文档，修改后调用 [`DocumentTxn::commit`] 写回。
    pub async fn begin(&self) -> DocumentTxn<'_, T> {
        let guard = self.writer.lock().await;
        let value = self.load().await;
        DocumentTxn {
            document: self,
            _guard: guard,
            value,
        }
    }

    /// 同 [`Self::begin`]，但文档损坏时直接失败，不会用空文档覆盖它。
    pub async fn begin_strict(&self) -> Result<DocumentTxn<'_, T>, StoreError> {
        let guard = self.writer.lock().await;
        let value = self.load_strict().await?;
        Ok(DocumentTxn {
            document: self,
            _guard: guard,
            value,
        })
    }
}

/// 持有文档写锁的读-改-写会话。
pub struct DocumentTxn<'a, T>
where
    T: Serialize + DeserializeOwned + Default,
{
    document: &'a JsonDocument<T>,
    _guard: MutexGuard<'a, ()>,
    value: T,
}

impl<T> DocumentTxn<'_, T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub async fn commit(self) -> Result<T, StoreError> {
        self.document.save(&self.value).await?;
        Ok(self.value)
    }
}

impl<T> Deref for DocumentTxn<'_, T>
where
    T: Serialize + DeserializeOwned + Default,
{
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for DocumentTxn<'_, T>
where
    T: Serialize + DeserializeOwned + Default,
{
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

#[cfg(test)]
mod tests {
    use super::JsonDocument;
    use crate::error::StoreError;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn malformed_document_loads_as_default() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("doc.json");
        std::fs::write(&path, b"{ not json").expect("seed");

        let document: JsonDocument<Vec<String>> = JsonDocument::new(path);
        assert!(document.load().await.is_empty());
    }

    #[tokio::test]
    async fn strict_begin_refuses_malformed_document() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("doc.json");
        std::fs::write(&path, b"[1, 2,").expect("seed");

        let document: JsonDocument<Vec<u32>> = JsonDocument::new(path.clone());
        assert!(matches!(
            document.begin_strict().await,
            Err(StoreError::Malformed(_))
        ));
        assert_eq!(std::fs::read(&path).expect("read"), b"[1, 2,");

        let missing: JsonDocument<Vec<u32>> = JsonDocument::new(temp.path().join("none.json"));
        assert!(missing.begin_strict().await.expect("absent is empty").is_empty());
    }

    #[tokio::test]
    async fn concurrent_transactions_do_not_lose_updates() {
        let temp = tempdir().expect("tempdir");
        let document: Arc<JsonDocument<Vec<u32>>> =
            Arc::new(JsonDocument::new(temp.path().join("doc.json")));

        let mut tasks = Vec::new();
        for n in 0..16 {
            let document = document.clone();
            tasks.push(tokio::spawn(async move {
                let mut txn = document.begin().await;
                txn.push(n);
                txn.commit().await.expect("commit");
            }));
        }
        for task in tasks {
            task.await.expect("join");
        }

        let mut values = document.load().await;
        values.sort_unstable();
        assert_eq!(values, (0..16).collect::<Vec<_>>());
    }
}
