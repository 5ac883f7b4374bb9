//! Common API utilities and shared types
//!
//! Pagination defaults and a collected view of multipart forms.

use axum::extract::{multipart::MultipartError, Multipart};
use serde::Deserialize;
use std::collections::HashMap;

use crate::api::middleware::ApiError;
use crate::storage::UploadedFile;

/// Default page number (1-indexed)
pub fn default_page() -> u32 {
    1
}

/// Default page size for album listings
pub fn default_limit() -> u32 {
    10
}

/// Basic pagination query parameters
#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == axum::http::StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::new("FILE_TOO_LARGE", "Request body is too large")
    } else {
        ApiError::bad_request(format!("Invalid form data: {}", e.body_text()))
    }
}

/// A multipart form read into memory.
///
/// Parts with a filename are files, the rest are text. Repeated names keep
/// their order; a trailing `[]` on a name is ignored.
#[derive(Debug, Default)]
pub struct FormData {
    fields: HashMap<String, Vec<String>>,
    files: HashMap<String, Vec<UploadedFile>>,
}

impl FormData {
    pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = FormData::default();

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field
                .name()
                .unwrap_or("")
                .trim_end_matches("[]")
                .to_string();
            if name.is_empty() {
                continue;
            }

            match field.file_name().map(str::to_string) {
                Some(filename) => {
                    let content_type = field
                        .content_type()
                        .unwrap_or("application/octet-stream")
                        .to_string();
                    let bytes = field.bytes().await.map_err(multipart_error)?;
                    form.files
                        .entry(name)
                        .or_default()
                        .push(UploadedFile::new(filename, content_type, bytes.to_vec()));
                }
                None => {
                    let text = field.text().await.map_err(multipart_error)?;
                    form.fields.entry(name).or_default().push(text);
                }
            }
        }

        Ok(form)
    }

    /// First value of a text field, trimmed; empty counts as absent
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .and_then(|v| v.first())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Every value of a repeated text field
    pub fn texts(&self, name: &str) -> Vec<String> {
        self.fields.get(name).cloned().unwrap_or_default()
    }

    pub fn has_text(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Remove and return every file sent under `name`
    pub fn take_files(&mut self, name: &str) -> Vec<UploadedFile> {
        self.files.remove(name).unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        fields: Vec<(&str, &str)>,
        files: Vec<(&str, UploadedFile)>,
    ) -> Self {
        let mut form = FormData::default();
        for (k, v) in fields {
            form.fields.entry(k.to_string()).or_default().push(v.to_string());
        }
        for (k, f) in files {
            form.files.entry(k.to_string()).or_default().push(f);
        }
        form
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_and_texts() {
        let form = FormData::from_parts(
            vec![("title", "  Trip  "), ("tags", "sea"), ("tags", "sun"), ("blank", "  ")],
            vec![],
        );
        assert_eq!(form.text("title").as_deref(), Some("Trip"));
        assert_eq!(form.texts("tags"), vec!["sea", "sun"]);
        assert!(form.text("blank").is_none());
        assert!(form.has_text("blank"));
        assert!(form.text("missing").is_none());
        assert!(form.texts("missing").is_empty());
    }

    #[test]
    fn test_take_files_removes_them() {
        let mut form = FormData::from_parts(
            vec![],
            vec![("album_images", UploadedFile::new("a.png", "image/png", vec![1, 2]))],
        );
        assert_eq!(form.take_files("album_images").len(), 1);
        assert!(form.take_files("album_images").is_empty());
    }
}
