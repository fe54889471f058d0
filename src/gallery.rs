//! `GET /`：媒体列表与反应计数的合并视图。

use axum::extract::Extension;
use axum::response::Json as JsonResponse;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::media_store::{MediaRecord, MediaStore};
use crate::reaction_store::{ReactionCounts, ReactionStore};
use crate::storage::extension_of;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn of(filename: &str) -> Self {
        match extension_of(filename).as_deref() {
            Some("mp4" | "webm" | "ogg") => MediaKind::Video,
            _ => MediaKind::Image,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GalleryItem {
    pub filename: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub url: String,
    pub reactions: BTreeMap<String, u64>,
}

pub fn build_gallery(records: Vec<MediaRecord>, counts: ReactionCounts) -> Vec<GalleryItem> {
    records
        .into_iter()
        .map(|record| {
            let reactions = counts.get(&record.filename).cloned().unwrap_or_default();
            GalleryItem {
                kind: MediaKind::of(&record.filename),
                url: format!("/uploads/{}", record.filename),
                filename: record.filename,
                description: record.description,
                reactions,
            }
        })
        .collect()
}

pub async fn list_gallery(
    Extension(store): Extension<Arc<MediaStore>>,
    Extension(reactions): Extension<Arc<ReactionStore>>,
) -> JsonResponse<Vec<GalleryItem>> {
    let records = store.load().await;
    let counts = reactions.counts().await;
    JsonResponse(build_gallery(records, counts))
}
