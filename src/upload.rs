//! 多文件上传：落盘、HEIC 即时转码、一次性追加到 media.json。

use axum::extract::multipart::Field;
use axum::extract::{Extension, Multipart};
use axum::response::{Html, Redirect};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::atomic::AtomicFile;
use crate::convert::{Converter, LegacyFormat};
use crate::error::ApiError;
use crate::media_store::{MediaRecord, MediaStore};
use crate::pages::UPLOAD_PAGE;
use crate::storage::Storage;

#[derive(Debug)]
pub struct UploadConfig {
    pub max_files: usize,
}

/// 归一化后的一次上传：已落盘的文件名与按序排列的描述。
#[derive(Debug, Default)]
pub struct UploadBatch {
    pub stored: Vec<String>,
    pub descriptions: Vec<String>,
}

pub async fn upload_page() -> Html<&'static str> {
    Html(UPLOAD_PAGE)
}

/// 处理 `media` 文件字段与 `description` 文本字段，完成后跳转首页。
pub async fn upload_media(
    Extension(store): Extension<Arc<MediaStore>>,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(converter): Extension<Arc<Converter>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
    multipart: Multipart,
) -> Result<Redirect, ApiError> {
    let batch = receive_batch(&storage, &upload, multipart).await?;
    let records = commit_batch(&store, &storage, &converter, batch).await?;
    info!(count = records.len(), "upload committed");
    Ok(Redirect::to("/"))
}

async fn receive_batch(
    storage: &Storage,
    upload: &UploadConfig,
    mut multipart: Multipart,
) -> Result<UploadBatch, ApiError> {
    let mut batch = UploadBatch::default();
    let result: Result<(), ApiError> = async {
        while let Some(mut field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "media" => {
                    let Some(original) = field
                        .file_name()
                        .map(str::to_string)
                        .filter(|value| !value.is_empty())
                    else {
                        continue;
                    };
                    if batch.stored.len() >= upload.max_files {
                        return Err(ApiError::BadRequest(format!(
                            "at most {} files per upload",
                            upload.max_files
                        )));
                    }
                    let stored = persist_field(storage, &original, &mut field).await?;
                    batch.stored.push(stored);
                }
                "description" => batch.descriptions.push(field.text().await?),
                _ => {}
            }
        }
        Ok(())
    }
    .await;

    if let Err(err) = result {
        discard(storage, &batch.stored).await;
        return Err(err);
    }
    Ok(batch)
}

async fn persist_field(
    storage: &Storage,
    original: &str,
    field: &mut Field<'_>,
) -> Result<String, ApiError> {
    let filename = storage.allocate_name(original).await?;
    if let Err(err) = stream_field(storage, &filename, field).await {
        discard(storage, std::slice::from_ref(&filename)).await;
        return Err(err);
    }
    debug!(original, filename, "upload stored");
    Ok(filename)
}

/// 流式写入临时文件，完成后替换 `allocate_name` 留下的占位文件。
async fn stream_field(
    storage: &Storage,
    filename: &str,
    field: &mut Field<'_>,
) -> Result<(), ApiError> {
    let target = storage.resolve(filename)?;
    let mut file = AtomicFile::new(&target)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    let mut written: u64 = 0;
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(err) => {
                file.cleanup().await;
                return Err(err.into());
            }
        };
        if let Err(err) = file.write_all(&chunk).await {
            file.cleanup().await;
            return Err(ApiError::Internal(err.to_string()));
        }
        written += chunk.len() as u64;
    }
    file.finalize()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    debug!(filename, bytes = written, "upload streamed");
    Ok(())
}

async fn discard(storage: &Storage, stored: &[String]) {
    for filename in stored {
        if let Err(err) = storage.remove(filename).await {
            warn!(filename, error = %err, "failed to discard partial upload");
        }
    }
}

/// 逐个转码 HEIC（失败保留原名），然后整批追加记录。
pub async fn commit_batch(
    store: &MediaStore,
    storage: &Storage,
    converter: &Converter,
    batch: UploadBatch,
) -> Result<Vec<MediaRecord>, ApiError> {
    let UploadBatch {
        stored,
        descriptions,
    } = batch;
    let mut records = Vec::with_capacity(stored.len());
    for (index, filename) in stored.into_iter().enumerate() {
        let filename = converter
            .convert(storage, &filename, LegacyFormat::Heic)
            .await
            .filename()
            .to_string();
        records.push(MediaRecord {
            filename,
            description: descriptions.get(index).cloned().unwrap_or_default(),
        });
    }

    if let Err(err) = store.append(records.clone()).await {
        // 文件已在上传目录中，但不会出现在图库里。
        for record in &records {
            warn!(filename = record.filename, error = %err, "upload not recorded, file left on disk");
        }
        return Err(err.into());
    }
    Ok(records)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::convert::tests::{copying_converter, failing_converter};
    use axum::body::Body;
    use axum::extract::FromRequest;
    use axum::http::Request;
    use tempfile::tempdir;

    const BOUNDARY: &str = "gallery-boundary";

    enum Part<'a> {
        File(&'a str, &'a str),
        Description(&'a str),
    }

    async fn multipart(parts: &[Part<'_>]) -> Multipart {
        let mut body = String::new();
        for part in parts {
            body.push_str(&format!("--{BOUNDARY}\r\n"));
            match part {
                Part::File(filename, content) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"media\"; filename=\"{filename}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n{content}\r\n"
                )),
                Part::Description(text) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"description\"\r\n\r\n{text}\r\n"
                )),
            }
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .expect("request");
        Multipart::from_request(request, &())
            .await
            .unwrap_or_else(|_| panic!("multipart"))
    }

    fn uploaded_files(temp: &tempfile::TempDir) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(temp.path().join("uploads"))
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn setup() -> (tempfile::TempDir, MediaStore, Storage) {
        let temp = tempdir().expect("tempdir");
        let uploads = temp.path().join("uploads");
        std::fs::create_dir_all(&uploads).expect("uploads");
        let store = MediaStore::new(temp.path().join("media.json"));
        (temp, store, Storage::new(uploads))
    }

    async fn stage(storage: &Storage, original: &str) -> String {
        let filename = storage.allocate_name(original).await.expect("name");
        std::fs::write(storage.resolve(&filename).expect("path"), b"bytes").expect("write");
        filename
    }

    #[tokio::test]
    async fn heic_upload_is_recorded_as_jpeg() {
        let (_temp, store, storage) = setup();
        let staged = stage(&storage, "name.heic").await;

        let records = commit_batch(
            &store,
            &storage,
            &copying_converter(),
            UploadBatch {
                stored: vec![staged.clone()],
                descriptions: vec!["sunset".into()],
            },
        )
        .await
        .expect("commit");

        assert_eq!(records.len(), 1);
        assert!(records[0].filename.ends_with("-name.jpg"));
        assert_eq!(records[0].description, "sunset");
        assert!(!storage.resolve(&staged).expect("path").exists());
        assert_eq!(store.load().await, records);
    }

    #[tokio::test]
    async fn failed_heic_conversion_keeps_original_name() {
        let (_temp, store, storage) = setup();
        let staged = stage(&storage, "name.HEIC").await;

        let records = commit_batch(
            &store,
            &storage,
            &failing_converter(),
            UploadBatch {
                stored: vec![staged.clone()],
                descriptions: Vec::new(),
            },
        )
        .await
        .expect("commit");

        assert_eq!(records[0].filename, staged);
        assert_eq!(records[0].description, "");
        assert!(storage.resolve(&staged).expect("path").exists());
    }

    #[tokio::test]
    async fn descriptions_align_by_index_and_batch_appends_once() {
        let (_temp, store, storage) = setup();
        store
            .append(vec![MediaRecord {
                filename: "0-old.jpg".into(),
                description: "old".into(),
            }])
            .await
            .expect("seed");
        let a = stage(&storage, "a.jpg").await;
        let b = stage(&storage, "b.mov").await;
        let c = stage(&storage, "c.png").await;

        commit_batch(
            &store,
            &storage,
            &copying_converter(),
            UploadBatch {
                stored: vec![a.clone(), b.clone(), c.clone()],
                descriptions: vec!["first".into(), "second".into()],
            },
        )
        .await
        .expect("commit");

        let loaded = store.load().await;
        let pairs: Vec<_> = loaded
            .iter()
            .map(|r| (r.filename.as_str(), r.description.as_str()))
            .collect();
        assert_eq!(
            pairs,
            [
                ("0-old.jpg", "old"),
                (a.as_str(), "first"),
                (b.as_str(), "second"),
                (c.as_str(), ""),
            ]
        );
    }

    #[tokio::test]
    async fn too_many_files_are_rejected_and_removed() {
        let (temp, _store, storage) = setup();
        let form = multipart(&[
            Part::File("a.jpg", "AAA"),
            Part::File("b.jpg", "BBB"),
            Part::File("c.jpg", "CCC"),
        ])
        .await;

        let result = receive_batch(&storage, &UploadConfig { max_files: 2 }, form).await;

        assert!(matches!(result, Err(ApiError::BadRequest(msg)) if msg.contains("at most 2")));
        assert!(uploaded_files(&temp).is_empty());
    }

    #[tokio::test]
    async fn empty_file_parts_are_skipped_and_descriptions_keep_order() {
        let (temp, _store, storage) = setup();
        let form = multipart(&[
            Part::File("a.jpg", "AAA"),
            Part::Description("first"),
            Part::File("", ""),
            Part::File("b.png", "BBB"),
            Part::Description("second"),
            Part::Description("third"),
        ])
        .await;

        let batch = receive_batch(&storage, &UploadConfig { max_files: 2 }, form)
            .await
            .unwrap_or_else(|_| panic!("receive"));

        assert_eq!(batch.stored.len(), 2);
        assert!(batch.stored[0].ends_with("-a.jpg"));
        assert!(batch.stored[1].ends_with("-b.png"));
        assert_eq!(batch.descriptions, ["first", "second", "third"]);
        assert_eq!(uploaded_files(&temp).len(), 2);
        let stored = storage.resolve(&batch.stored[1]).expect("path");
        assert_eq!(std::fs::read(stored).expect("read"), b"BBB");
    }

    #[tokio::test]
    async fn failed_append_is_reported_and_leaves_files() {
        let temp = tempdir().expect("tempdir");
        let uploads = temp.path().join("uploads");
        std::fs::create_dir_all(&uploads).expect("uploads");
        let storage = Storage::new(uploads);
        let store = MediaStore::new(temp.path().join("missing-dir").join("media.json"));
        let staged = stage(&storage, "a.jpg").await;

        let result = commit_batch(
            &store,
            &storage,
            &copying_converter(),
            UploadBatch {
                stored: vec![staged.clone()],
                descriptions: Vec::new(),
            },
        )
        .await;

        assert!(matches!(result, Err(ApiError::Internal(_))));
        assert!(storage.resolve(&staged).expect("path").exists());
        assert!(store.load().await.is_empty());
    }
}
