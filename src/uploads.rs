use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::AttachmentRecord;
use crate::policy::UploadPolicy;
use axum::extract::Multipart;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub const FILES_FIELD: &str = "files";
pub const FILE_FIELD: &str = "file";

/// Which multipart field a route accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadField {
    Many,
    Single,
}

impl UploadField {
    pub fn name(self) -> &'static str {
        match self {
            Self::Many => FILES_FIELD,
            Self::Single => FILE_FIELD,
        }
    }
}

/// Streams every accepted part to the owner's upload directory. When any
/// part is rejected, files already written by this request are removed.
pub async fn receive_uploads(
    policy: &UploadPolicy,
    db: &Database,
    owner_id: &str,
    field: UploadField,
    mut multipart: Multipart,
) -> AppResult<Vec<AttachmentRecord>> {
    let dir = policy.destination_dir(owner_id)?;
    tokio::fs::create_dir_all(&dir).await?;

    let mut written = Vec::new();
    let outcome = receive_parts(policy, &dir, owner_id, field, &mut multipart, &mut written).await;
    let records = match outcome {
        Ok(records) => records,
        Err(error) => {
            remove_partial(&written).await;
            tracing::info!(owner_id = %owner_id, error = %error, "upload rejected");
            return Err(error);
        }
    };

    if records.is_empty() {
        return Err(AppError::Upload("No files were uploaded".to_string()));
    }

    if let Err(error) = db.insert_attachments(&records) {
        remove_partial(&written).await;
        return Err(error);
    }

    tracing::info!(owner_id = %owner_id, count = records.len(), "attachments stored");
    Ok(records)
}

async fn receive_parts(
    policy: &UploadPolicy,
    dir: &Path,
    owner_id: &str,
    field_kind: UploadField,
    multipart: &mut Multipart,
    written: &mut Vec<PathBuf>,
) -> AppResult<Vec<AttachmentRecord>> {
    let field_limit = match field_kind {
        UploadField::Many => usize::MAX,
        UploadField::Single => 1,
    };

    let mut records = Vec::new();
    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name != field_kind.name() {
            return Err(AppError::Upload(format!("Unexpected field '{}'", name)));
        }
        policy.validate_file_index(records.len(), field_limit)?;

        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        policy.validate_mime(&mime_type)?;

        let original_name = field.file_name().unwrap_or("upload").to_string();
        let stored_name = policy.stored_file_name(&original_name, Utc::now().timestamp_millis());
        let path = dir.join(&stored_name);

        let mut file = tokio::fs::File::create(&path).await?;
        written.push(path.clone());
        let mut size = 0u64;
        while let Some(chunk) = field.chunk().await? {
            size = size.saturating_add(chunk.len() as u64);
            policy.validate_size(size)?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        records.push(AttachmentRecord {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            original_name,
            stored_name,
            mime_type,
            size,
            path: path.to_string_lossy().to_string(),
            created_at: Utc::now(),
        });
    }

    Ok(records)
}

async fn remove_partial(paths: &[PathBuf]) {
    for path in paths {
        if let Err(error) = tokio::fs::remove_file(path).await {
            if error.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %error, "failed to remove rejected upload");
            }
        }
    }
}
