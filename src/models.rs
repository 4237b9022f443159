use std::path::PathBuf;

use serde::Serialize;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub uploads_dir: PathBuf,
}

/* -------------------------
   Shared API DTOs
--------------------------*/

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub data: OkData,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

impl OkResponse {
    pub fn ok() -> Self {
        OkResponse {
            data: OkData { ok: true },
        }
    }
}
