// src/routes/upload_routes.rs
//
// Two-stage document pipeline: files are first uploaded under a temporary
// patient identifier (the permanent id does not exist yet), then moved into
// the permanent per-patient folder once the record has been created.

use std::collections::HashMap;
use std::path::Path;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    routing::post,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{error::ApiError, models::AppState};

const UPLOAD_SUBDIR: &str = "patient-admission";
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub path: String,
    pub original_name: String,
    pub size: u64,
    pub field_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveFilesRequest {
    pub patient_id: Option<String>,
    #[serde(default)]
    pub temp_paths: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveFilesResponse {
    pub patient_id: String,
    pub paths: HashMap<String, String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload-patient-file", post(upload_patient_file))
        .route("/move-patient-files", post(move_patient_files))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

/* -------------------------
   Helpers
--------------------------*/

#[derive(Debug, thiserror::Error)]
pub enum RelocateError {
    #[error("path escapes the uploads root: {0}")]
    UnsafePath(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Per-file outcome of stage 2. A missing source is not an error: the caller
/// keeps the original temp path and the rest of the batch still moves.
#[derive(Debug)]
pub enum RelocationOutcome {
    Moved(String),
    KeptOriginal,
}

fn is_safe_segment(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.contains('/') && !s.contains('\\')
}

/// `<fieldName>_<unixMillis><ext>` — collision-free per field at
/// millisecond resolution, which is as far as the contract goes.
fn stored_filename(field_name: &str, original_name: &str, millis: i64) -> String {
    let ext = Path::new(original_name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    format!("{field_name}_{millis}{ext}")
}

async fn relocate_file(
    uploads_root: &Path,
    patient_id: &str,
    temp_rel: &str,
) -> Result<RelocationOutcome, RelocateError> {
    let rel = temp_rel.replace('\\', "/");
    if rel
        .split('/')
        .any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(RelocateError::UnsafePath(temp_rel.to_string()));
    }

    let src = uploads_root.join(&rel);
    let Some(basename) = src.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Err(RelocateError::UnsafePath(temp_rel.to_string()));
    };

    if !tokio::fs::try_exists(&src).await? {
        return Ok(RelocationOutcome::KeptOriginal);
    }

    let dest_dir = uploads_root.join(UPLOAD_SUBDIR).join(patient_id);
    tokio::fs::create_dir_all(&dest_dir).await?;
    tokio::fs::rename(&src, dest_dir.join(&basename)).await?;

    Ok(RelocationOutcome::Moved(format!(
        "{UPLOAD_SUBDIR}/{patient_id}/{basename}"
    )))
}

/* -------------------------
   Handlers
--------------------------*/

/// Stage 1: multipart upload into the temp (or already-known) patient folder.
/// No database write happens here; the caller holds the returned path until
/// the patient record exists.
pub async fn upload_patient_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut patient_id = "temp".to_string();
    let mut field_name = "general".to_string();
    let mut file: Option<(String, axum::body::Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest("UPLOAD_ERROR", format!("invalid multipart body: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("patientId") => {
                let v = field.text().await.map_err(|e| {
                    ApiError::BadRequest("UPLOAD_ERROR", format!("invalid patientId part: {e}"))
                })?;
                if !v.trim().is_empty() {
                    patient_id = v.trim().to_string();
                }
            }
            Some("fieldName") => {
                let v = field.text().await.map_err(|e| {
                    ApiError::BadRequest("UPLOAD_ERROR", format!("invalid fieldName part: {e}"))
                })?;
                if !v.trim().is_empty() {
                    field_name = v.trim().to_string();
                }
            }
            _ => {
                if let Some(original) = field.file_name().map(str::to_string) {
                    let data = field.bytes().await.map_err(|e| {
                        ApiError::BadRequest(
                            "UPLOAD_ERROR",
                            format!("failed to read file part: {e}"),
                        )
                    })?;
                    file = Some((original, data));
                }
            }
        }
    }

    let Some((original_name, data)) = file else {
        return Err(ApiError::BadRequest("NO_FILE", "no file uploaded".to_string()));
    };

    if !is_safe_segment(&patient_id) {
        return Err(ApiError::BadRequest(
            "INVALID_PATH",
            format!("invalid patientId: {patient_id}"),
        ));
    }
    if !is_safe_segment(&field_name) {
        return Err(ApiError::BadRequest(
            "INVALID_PATH",
            format!("invalid fieldName: {field_name}"),
        ));
    }

    let dir = state.uploads_dir.join(UPLOAD_SUBDIR).join(&patient_id);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| ApiError::Internal(format!("upload error: {e}")))?;

    let stored = stored_filename(&field_name, &original_name, Utc::now().timestamp_millis());
    tokio::fs::write(dir.join(&stored), &data)
        .await
        .map_err(|e| ApiError::Internal(format!("upload error: {e}")))?;

    tracing::info!(
        patient = %patient_id,
        field = %field_name,
        size = data.len(),
        "stored uploaded file"
    );

    Ok(Json(UploadResponse {
        path: format!("{UPLOAD_SUBDIR}/{patient_id}/{stored}"),
        original_name,
        size: data.len() as u64,
        field_name,
    }))
}

/// Stage 2: move temp files into the permanent patient folder. Best-effort
/// per file; a missing source is logged and its original path passed through
/// unchanged so one stale entry cannot abort the rest of the batch.
pub async fn move_patient_files(
    State(state): State<AppState>,
    Json(req): Json<MoveFilesRequest>,
) -> Result<Json<MoveFilesResponse>, ApiError> {
    let patient_id = req.patient_id.as_deref().unwrap_or("").trim().to_string();
    if patient_id.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "patientId is required".to_string(),
        ));
    }
    if !is_safe_segment(&patient_id) {
        return Err(ApiError::BadRequest(
            "INVALID_PATH",
            format!("invalid patientId: {patient_id}"),
        ));
    }

    let mut paths = HashMap::new();
    for (field_name, temp_rel) in &req.temp_paths {
        match relocate_file(&state.uploads_dir, &patient_id, temp_rel).await {
            Ok(RelocationOutcome::Moved(new_rel)) => {
                paths.insert(field_name.clone(), new_rel);
            }
            Ok(RelocationOutcome::KeptOriginal) => {
                tracing::warn!(
                    field = %field_name,
                    path = %temp_rel,
                    "temp file missing, keeping original path"
                );
                paths.insert(field_name.clone(), temp_rel.clone());
            }
            Err(RelocateError::UnsafePath(p)) => {
                return Err(ApiError::BadRequest(
                    "INVALID_PATH",
                    format!("invalid path: {p}"),
                ));
            }
            Err(RelocateError::Io(e)) => {
                return Err(ApiError::Internal(format!("file move error: {e}")));
            }
        }
    }

    Ok(Json(MoveFilesResponse { patient_id, paths }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_filename() {
        assert_eq!(
            stored_filename("photo", "selfie.jpg", 1700000000123),
            "photo_1700000000123.jpg"
        );
        assert_eq!(stored_filename("general", "README", 7), "general_7");
        // only the last extension survives
        assert_eq!(
            stored_filename("patientAadhar", "scan.tar.gz", 7),
            "patientAadhar_7.gz"
        );
    }

    #[test]
    fn test_is_safe_segment() {
        assert!(is_safe_segment("P0001"));
        assert!(is_safe_segment("temp"));
        assert!(!is_safe_segment(""));
        assert!(!is_safe_segment("."));
        assert!(!is_safe_segment(".."));
        assert!(!is_safe_segment("a/b"));
        assert!(!is_safe_segment("a\\b"));
    }

    #[tokio::test]
    async fn test_relocate_moves_existing_file() {
        let root = tempfile::tempdir().unwrap();
        let temp_dir = root.path().join("patient-admission").join("temp");
        std::fs::create_dir_all(&temp_dir).unwrap();
        std::fs::write(temp_dir.join("photo_1.jpg"), b"jpeg bytes").unwrap();

        let out = relocate_file(root.path(), "P0001", "patient-admission/temp/photo_1.jpg")
            .await
            .unwrap();

        match out {
            RelocationOutcome::Moved(p) => {
                assert_eq!(p, "patient-admission/P0001/photo_1.jpg")
            }
            other => panic!("expected Moved, got {other:?}"),
        }
        assert!(root.path().join("patient-admission/P0001/photo_1.jpg").exists());
        assert!(!temp_dir.join("photo_1.jpg").exists());
    }

    #[tokio::test]
    async fn test_relocate_missing_source_passes_through() {
        let root = tempfile::tempdir().unwrap();

        let out = relocate_file(root.path(), "P0001", "patient-admission/temp/gone.jpg")
            .await
            .unwrap();

        assert!(matches!(out, RelocationOutcome::KeptOriginal));
    }

    #[tokio::test]
    async fn test_relocate_rejects_traversal() {
        let root = tempfile::tempdir().unwrap();

        let out = relocate_file(root.path(), "P0001", "../outside/secret.txt").await;

        assert!(matches!(out, Err(RelocateError::UnsafePath(_))));
    }
}
