use super::config::AppConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestValidationError {
    PayloadTooLarge(String),
    BadRequest(String),
}

/// Media types the search backend can index from object storage.
pub const INDEXABLE_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "text/plain",
    "text/html",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
];

pub fn is_indexable_mime_type(mime_type: &str) -> bool {
    INDEXABLE_MIME_TYPES.contains(&mime_type)
}

/// Checks an uploaded course document before it is written to the bucket.
pub fn validate_upload(
    config: &AppConfig,
    file_name: &str,
    content_type: Option<&str>,
    size_bytes: u64,
) -> Result<(), IngestValidationError> {
    if file_name.trim().is_empty() {
        return Err(IngestValidationError::BadRequest(
            "No file selected.".to_string(),
        ));
    }

    let is_pdf = std::path::Path::new(file_name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if !is_pdf {
        return Err(IngestValidationError::BadRequest(
            "Invalid file type. Only PDF files are allowed.".to_string(),
        ));
    }

    if let Some(content_type) = content_type {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if essence != mime::APPLICATION_PDF.essence_str()
            && essence != mime::APPLICATION_OCTET_STREAM.essence_str()
        {
            return Err(IngestValidationError::BadRequest(format!(
                "Invalid content type '{content_type}'. Only PDF files are allowed."
            )));
        }
    }

    if size_bytes == 0 {
        return Err(IngestValidationError::BadRequest(
            "The uploaded file is empty.".to_string(),
        ));
    }

    let limit = u64::try_from(config.max_document_bytes).unwrap_or(u64::MAX);
    if size_bytes > limit {
        return Err(IngestValidationError::PayloadTooLarge(format!(
            "File is too large. Maximum allowed is {} bytes",
            config.max_document_bytes
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_upload_rejects_missing_name() {
        let result = validate_upload(&AppConfig::default(), "  ", None, 10);

        assert!(matches!(result, Err(IngestValidationError::BadRequest(_))));
    }

    #[test]
    fn validate_upload_rejects_non_pdf() {
        let result = validate_upload(&AppConfig::default(), "notes.docx", None, 10);

        assert!(matches!(result, Err(IngestValidationError::BadRequest(_))));
    }

    #[test]
    fn validate_upload_rejects_oversized_file() {
        let config = AppConfig {
            max_document_bytes: 4,
            ..Default::default()
        };
        let result = validate_upload(&config, "BWS.pdf", Some("application/pdf"), 5);

        assert!(matches!(
            result,
            Err(IngestValidationError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn validate_upload_rejects_empty_file() {
        let result = validate_upload(&AppConfig::default(), "BWS.pdf", None, 0);

        assert!(matches!(result, Err(IngestValidationError::BadRequest(_))));
    }

    #[test]
    fn validate_upload_accepts_uppercase_extension() {
        let result = validate_upload(
            &AppConfig::default(),
            "Kapitel 3.PDF",
            Some("application/octet-stream"),
            1024,
        );

        assert!(result.is_ok());
    }

    #[test]
    fn validate_upload_rejects_mismatched_content_type() {
        let result = validate_upload(&AppConfig::default(), "BWS.pdf", Some("image/png"), 10);

        assert!(matches!(result, Err(IngestValidationError::BadRequest(_))));
    }

    #[test]
    fn indexable_types_cover_pdf_but_not_images() {
        assert!(is_indexable_mime_type("application/pdf"));
        assert!(!is_indexable_mime_type("image/png"));
    }
}
