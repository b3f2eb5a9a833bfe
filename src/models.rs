use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;

/// Outcome of one bulk upload. Never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub created: usize,
    pub updated: usize,
    pub errors: Vec<RowFailure>,
    pub image_uploads: ImageUploadReport,
    pub elapsed_ms: u128,
}

impl BatchReport {
    pub fn record_success(&mut self, created: bool) {
        self.success += 1;
        if created {
            self.created += 1;
        } else {
            self.updated += 1;
        }
    }

    pub fn record_failure(&mut self, row: usize, data: impl Into<String>, error: impl Into<String>) {
        self.failed += 1;
        self.errors.push(RowFailure {
            row,
            data: data.into(),
            error: error.into(),
        });
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowFailure {
    /// 1-based position among data rows.
    pub row: usize,
    /// The row's product name, or `Unknown`.
    pub data: String,
    pub error: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageUploadReport {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
}

impl ImageUploadReport {
    pub fn record(&mut self, succeeded: bool) {
        self.total += 1;
        if succeeded {
            self.success += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Spreadsheet plus pre-uploaded image parts, all base64 encoded.
#[derive(Debug, Clone, Deserialize)]
pub struct BundleUploadRequest {
    pub filename: String,
    pub file: String,
    #[serde(default)]
    pub images: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkUploadQuery {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn report_serializes_with_camel_case_keys() {
        let mut report = BatchReport {
            total: 2,
            ..BatchReport::default()
        };
        report.record_success(true);
        report.record_failure(2, "Unknown", "name is required");
        report.image_uploads.record(true);
        report.image_uploads.record(false);

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["success"], json!(1));
        assert_eq!(value["failed"], json!(1));
        assert_eq!(value["created"], json!(1));
        assert_eq!(
            value["errors"],
            json!([{"row": 2, "data": "Unknown", "error": "name is required"}])
        );
        assert_eq!(
            value["imageUploads"],
            json!({"total": 2, "success": 1, "failed": 1})
        );
        assert!(value.get("elapsedMs").is_some());
    }

    #[test]
    fn api_error_omits_missing_detail() {
        let bare = ApiError {
            error: "unsupported".into(),
            detail: None,
        };
        assert_eq!(serde_json::to_value(&bare).unwrap(), json!({"error": "unsupported"}));
    }
}
