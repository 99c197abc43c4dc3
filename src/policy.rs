use crate::errors::{AppError, AppResult};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;
pub const MAX_FILES_PER_REQUEST: usize = 5;
pub const MIN_SYNC_INTERVAL_SECS: u64 = 10;
pub const MAX_SYNC_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;

pub const INVALID_FILE_TYPE_MESSAGE: &str =
    "Invalid file type. Only documents, images, archives, and text files are allowed.";

/// Attachment rules applied to every multipart upload.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    root: PathBuf,
    allowed_mime_types: BTreeSet<String>,
    max_file_bytes: u64,
    max_files: usize,
}

impl UploadPolicy {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let allowed_mime_types = [
            // documents
            "application/pdf",
            "application/msword",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            "application/vnd.ms-excel",
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            "application/vnd.ms-powerpoint",
            "application/vnd.openxmlformats-officedocument.presentationml.presentation",
            // images
            "image/jpeg",
            "image/jpg",
            "image/png",
            "image/gif",
            "image/webp",
            // archives
            "application/zip",
            "application/x-zip-compressed",
            "application/x-rar-compressed",
            "application/vnd.rar",
            "application/x-7z-compressed",
            // text
            "text/plain",
            "text/csv",
        ]
        .into_iter()
        .map(ToString::to_string)
        .collect();

        Self {
            root: root.into(),
            allowed_mime_types,
            max_file_bytes: MAX_FILE_BYTES,
            max_files: MAX_FILES_PER_REQUEST,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_bytes
    }

    pub fn max_files(&self) -> usize {
        self.max_files
    }

    /// Per-user upload directory. The id becomes a path segment, so anything
    /// that could escape the upload root is refused.
    pub fn destination_dir(&self, user_id: &str) -> AppResult<PathBuf> {
        let trimmed = user_id.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation("User id is required for uploads".to_string()));
        }
        if !trimmed.chars().all(is_safe_name_char) {
            return Err(AppError::Validation(format!(
                "User id '{}' cannot be used as an upload directory",
                user_id
            )));
        }
        Ok(self.root.join(trimmed))
    }

    pub fn validate_mime(&self, mime_type: &str) -> AppResult<()> {
        let essence = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if self.allowed_mime_types.contains(&essence) {
            Ok(())
        } else {
            Err(AppError::Upload(INVALID_FILE_TYPE_MESSAGE.to_string()))
        }
    }

    /// `index` is zero-based; the check runs before a file is accepted.
    /// `field_limit` narrows the request cap for single-file fields.
    pub fn validate_file_index(&self, index: usize, field_limit: usize) -> AppResult<()> {
        let limit = self.max_files.min(field_limit);
        if index < limit {
            return Ok(());
        }
        let message = if limit == 1 {
            "Too many files. Only one file may be uploaded here.".to_string()
        } else {
            format!("Too many files. At most {} files may be uploaded at once.", limit)
        };
        Err(AppError::Upload(message))
    }

    pub fn validate_size(&self, bytes: u64) -> AppResult<()> {
        if bytes > self.max_file_bytes {
            return Err(AppError::Upload(format!(
                "File too large. Maximum size is {}MB.",
                self.max_file_bytes / (1024 * 1024)
            )));
        }
        Ok(())
    }

    pub fn stored_file_name(&self, original_name: &str, timestamp_ms: i64) -> String {
        stored_file_name(original_name, Uuid::new_v4(), timestamp_ms)
    }
}

fn is_safe_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'
}

/// Keeps only `[a-zA-Z0-9-_]`.
pub fn sanitize_stem(stem: &str) -> String {
    stem.chars().filter(|ch| is_safe_name_char(*ch)).collect()
}

/// `{uuid}-{timestamp}-{sanitized-stem}{ext}`.
pub fn stored_file_name(original_name: &str, id: Uuid, timestamp_ms: i64) -> String {
    let base = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_name);
    let path = Path::new(base);
    let stem = path
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or_default();
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| {
            let cleaned = sanitize_stem(value);
            if cleaned.is_empty() {
                String::new()
            } else {
                format!(".{}", cleaned)
            }
        })
        .unwrap_or_default();

    format!("{}-{}-{}{}", id, timestamp_ms, sanitize_stem(stem), ext)
}

pub fn clamp_sync_interval(secs: u64) -> u64 {
    secs.clamp(MIN_SYNC_INTERVAL_SECS, MAX_SYNC_INTERVAL_SECS)
}

#[cfg(test)]
mod tests {
    use super::{
        clamp_sync_interval, sanitize_stem, stored_file_name, UploadPolicy, INVALID_FILE_TYPE_MESSAGE,
        MAX_FILE_BYTES,
    };
    use crate::errors::AppError;
    use uuid::Uuid;

    #[test]
    fn sanitize_strips_everything_outside_safe_set() {
        assert_eq!(sanitize_stem("Q3 report (final)!"), "Q3reportfinal");
        assert_eq!(sanitize_stem("a-b_c.d/e"), "a-b_cde");
        assert_eq!(sanitize_stem("résumé"), "rsum");
    }

    #[test]
    fn stored_name_keeps_extension_and_prefixes() {
        let id = Uuid::nil();
        let name = stored_file_name("My Proposal v2.pdf", id, 1_700_000_000_000);
        assert_eq!(
            name,
            "00000000-0000-0000-0000-000000000000-1700000000000-MyProposalv2.pdf"
        );
    }

    #[test]
    fn stored_name_ignores_client_directories() {
        let name = stored_file_name("../../etc/passwd", Uuid::nil(), 1);
        assert!(name.ends_with("-1-passwd"));
        let name = stored_file_name("C:\\docs\\notes.txt", Uuid::nil(), 1);
        assert!(name.ends_with("-1-notes.txt"));
    }

    #[test]
    fn rejects_disallowed_mime_with_allow_list_message() {
        let policy = UploadPolicy::new("/tmp/uploads");
        assert!(policy.validate_mime("application/pdf").is_ok());
        assert!(policy.validate_mime("text/plain; charset=utf-8").is_ok());
        assert!(policy.validate_mime("IMAGE/PNG").is_ok());
        match policy.validate_mime("application/x-msdownload") {
            Err(AppError::Upload(message)) => assert_eq!(message, INVALID_FILE_TYPE_MESSAGE),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn enforces_count_and_size_limits() {
        let policy = UploadPolicy::new("/tmp/uploads");
        assert!(policy.validate_file_index(4, usize::MAX).is_ok());
        assert!(policy.validate_file_index(5, usize::MAX).is_err());
        assert!(policy.validate_file_index(0, 1).is_ok());
        assert!(policy.validate_file_index(1, 1).is_err());
        assert!(policy.validate_size(MAX_FILE_BYTES).is_ok());
        assert!(policy.validate_size(MAX_FILE_BYTES + 1).is_err());
    }

    #[test]
    fn destination_is_per_user_and_refuses_traversal() {
        let policy = UploadPolicy::new("/srv/uploads");
        let dir = policy.destination_dir("user-42").expect("dir");
        assert!(dir.ends_with("user-42"));
        assert!(policy.destination_dir("../other").is_err());
        assert!(policy.destination_dir("  ").is_err());
    }

    #[test]
    fn clamps_sync_interval_into_bounds() {
        assert_eq!(clamp_sync_interval(1), 10);
        assert_eq!(clamp_sync_interval(45), 45);
        assert_eq!(clamp_sync_interval(10_000), 300);
    }
}
