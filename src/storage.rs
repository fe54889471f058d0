//! 上传目录：单层平铺目录，文件名即记录标识。

use chrono::Utc;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::ErrorKind;

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 把记录中的文件名解析为目录内路径，拒绝任何子目录或上跳。
    pub fn resolve(&self, filename: &str) -> Result<PathBuf, StorageError> {
        let mut components = Path::new(filename).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => Ok(self.root.join(name)),
            _ => Err(StorageError::InvalidName),
        }
    }

    pub async fn exists(&self, filename: &str) -> Result<bool, StorageError> {
        let path = self.resolve(filename)?;
        match fs::symlink_metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// 生成 `<毫秒时间戳>-<原文件名>` 形式的新文件名，重名时插入序号。
    ///
    /// 返回前以空占位文件占住该名字，并发请求不会拿到同一个名字；
    /// 调用方随后原子替换它，失败时负责删除。
    pub async fn allocate_name(&self, original: &str) -> Result<String, StorageError> {
        let safe = sanitize_filename(original);
        let stamp = Utc::now().timestamp_millis();
        let mut candidate = format!("{stamp}-{safe}");
        let mut counter = 1u32;
        loop {
            let path = self.resolve(&candidate)?;
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => return Ok(candidate),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    candidate = format!("{stamp}-{counter}-{safe}");
                    counter += 1;
                }
                Err(err) => return Err(StorageError::Io(err)),
            }
        }
    }

    pub async fn remove(&self, filename: &str) -> Result<(), StorageError> {
        let path = self.resolve(filename)?;
        fs::remove_file(path).await?;
        Ok(())
    }
}

/// 只保留最后一个路径段，去掉控制字符与前导点。
pub fn sanitize_filename(original: &str) -> String {
    let last = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim().trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// 小写扩展名（不含点）。
pub fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

#[derive(Debug)]
pub enum StorageError {
    InvalidName,
    Io(io::Error),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::InvalidName => write!(f, "invalid filename"),
            StorageError::Io(err) => write!(f, "{err}"),
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}
