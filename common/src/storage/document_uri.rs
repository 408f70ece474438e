use std::{fmt, path::Path};

use sha2::{Digest, Sha256};

use crate::error::AppError;

const GCS_SCHEME: &str = "gs://";

/// Reference to a course document inside the configured bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentUri {
    bucket: String,
    object: String,
}

impl DocumentUri {
    pub fn new(bucket: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object: object.into(),
        }
    }

    /// Parses `gs://bucket/path/to/file.pdf` or a bare object name relative to `bucket`.
    ///
    /// References into other buckets or with traversal components are rejected.
    pub fn parse(input: &str, bucket: &str) -> Result<Self, AppError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation(
                "Missing 'file_name' in request".to_string(),
            ));
        }

        let (requested_bucket, object) = match trimmed.strip_prefix(GCS_SCHEME) {
            Some(rest) => rest.split_once('/').ok_or_else(|| {
                AppError::Validation(format!("'{trimmed}' does not name an object"))
            })?,
            None if trimmed.contains("://") => {
                return Err(AppError::Validation(format!(
                    "Unsupported document reference '{trimmed}', expected gs://{bucket}/<object>"
                )));
            }
            None => (bucket, trimmed),
        };

        if requested_bucket != bucket {
            return Err(AppError::Validation(format!(
                "Bucket '{requested_bucket}' is not served by this deployment"
            )));
        }

        let object = object.trim_start_matches('/');
        if object.is_empty() || object.ends_with('/') {
            return Err(AppError::Validation(format!(
                "'{trimmed}' does not name an object"
            )));
        }
        if object.split('/').any(|segment| segment == ".." || segment == ".") {
            return Err(AppError::Validation(format!(
                "'{trimmed}' contains unsupported path segments"
            )));
        }

        Ok(Self::new(requested_bucket, object))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object path inside the bucket, used as the storage location.
    pub fn object(&self) -> &str {
        &self.object
    }

    /// Final path segment, e.g. `BWS.pdf`.
    pub fn file_name(&self) -> &str {
        self.object.rsplit('/').next().unwrap_or(&self.object)
    }

    /// File name without a trailing `.pdf` extension.
    pub fn display_name(&self) -> &str {
        let name = self.file_name();
        let has_pdf_extension = Path::new(name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if has_pdf_extension {
            name.get(..name.len().saturating_sub(4)).unwrap_or(name)
        } else {
            name
        }
    }
}

impl fmt::Display for DocumentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{GCS_SCHEME}{}/{}", self.bucket, self.object)
    }
}

/// SHA-256 of the document bytes, hex encoded. Identity of a document across renames.
pub fn content_fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
