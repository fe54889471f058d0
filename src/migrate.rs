//! 一次性迁移：转换 media.json 中遗留的 HEIC / MOV 文件并整体写回。

use serde::Serialize;
use tracing::{info, warn};

use crate::config::MigrateFormat;
use crate::convert::{ConversionOutcome, Converter, LegacyFormat};
use crate::error::StoreError;
use crate::media_store::MediaStore;
use crate::storage::Storage;

impl From<MigrateFormat> for LegacyFormat {
    fn from(format: MigrateFormat) -> Self {
        match format {
            MigrateFormat::Heic => LegacyFormat::Heic,
            MigrateFormat::Mov => LegacyFormat::Mov,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct MigrationReport {
    pub converted: Vec<(String, String)>,
    pub failed: Vec<(String, String)>,
    /// 记录仍在，但上传目录中已没有对应文件。
    pub missing: Vec<String>,
}

impl MigrationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.missing.is_empty()
    }
}

/// 逐条尝试转换；单条失败只记入报告，不中断整轮。有转换时写回一次。
///
/// media.json 无法解析时直接返回错误，不做任何转换也不写回。
pub async fn migrate(
    store: &MediaStore,
    storage: &Storage,
    converter: &Converter,
    format: LegacyFormat,
) -> Result<MigrationReport, StoreError> {
    let mut txn = store.begin_strict().await?;
    let mut report = MigrationReport::default();

    for record in txn.iter_mut() {
        if LegacyFormat::detect(&record.filename) != Some(format) {
            continue;
        }
        match storage.exists(&record.filename).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(filename = record.filename, "listed file missing, skipped");
                report.missing.push(record.filename.clone());
                continue;
            }
            Err(err) => {
                warn!(filename = record.filename, error = %err, "cannot inspect file");
                report.failed.push((record.filename.clone(), err.to_string()));
                continue;
            }
        }

        match converter.convert(storage, &record.filename, format).await {
            ConversionOutcome::Converted { from, to } => {
                record.filename = to.clone();
                report.converted.push((from, to));
            }
            ConversionOutcome::Failed { filename, error } => {
                report.failed.push((filename, error.to_string()));
            }
            ConversionOutcome::Unchanged(_) => {}
        }
    }

    if report.converted.is_empty() {
        drop(txn);
    } else if let Err(err) = txn.commit().await {
        // 源文件已删除，记录仍指向旧名。
        for (from, to) in &report.converted {
            warn!(from, to, "converted file not recorded, media.json still lists the old name");
        }
        return Err(err);
    }
    info!(
        format = %format,
        converted = report.converted.len(),
        failed = report.failed.len(),
        missing = report.missing.len(),
        "migration finished"
    );
    Ok(report)
}
