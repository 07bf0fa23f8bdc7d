//! Upload gate: presence and size checks before any extraction work.

use crate::error::IngestError;
use crate::models::{UploadForm, UploadedFile};

/// Accept the form's file if present and strictly smaller than `max_size`.
pub fn validate_upload(form: UploadForm, max_size: u64) -> Result<UploadedFile, IngestError> {
    let file = form
        .file
        .ok_or_else(|| IngestError::Validation("No file was provided.".to_string()))?;

    if file.size >= max_size {
        return Err(IngestError::Validation(format!(
            "File is too large and must be less than {} bytes.",
            max_size
        )));
    }

    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form_of_size(size: u64) -> UploadForm {
        let mut file = UploadedFile::new(Vec::new(), "application/pdf");
        file.size = size;
        UploadForm::with_file(file)
    }

    #[test]
    fn missing_file_is_rejected() {
        let err = validate_upload(UploadForm::empty(), 100).unwrap_err();
        assert_eq!(err, IngestError::Validation("No file was provided.".to_string()));
    }

    #[test]
    fn file_at_ceiling_is_rejected() {
        let err = validate_upload(form_of_size(20_000_000), 20_000_000).unwrap_err();
        assert_eq!(
            err.to_string(),
            "File is too large and must be less than 20000000 bytes."
        );
    }

    #[test]
    fn file_one_byte_below_ceiling_is_accepted() {
        let file = validate_upload(form_of_size(19_999_999), 20_000_000).unwrap();
        assert_eq!(file.size, 19_999_999);
    }

    #[test]
    fn message_reports_configured_ceiling() {
        let err = validate_upload(form_of_size(11), 10).unwrap_err();
        assert!(err.to_string().contains("less than 10 bytes"));
    }
}
