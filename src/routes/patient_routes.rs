// src/routes/patient_routes.rs

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder};

use crate::{
    error::ApiError,
    models::{AppState, OkResponse},
};

const PATIENT_COLUMNS: &str = "id, patient_id, name, age, gender, phone, email, address, \
    attender_name, attender_phone, attender_relationship, attender_marital_status, attender_occupation, \
    guardian_name, guardian_phone, guardian_relationship, guardian_marital_status, guardian_occupation, \
    medical_history, admission_date, dob, \
    fees, blood_test, pickup_charge, total_amount, pay_amount, balance, \
    photo, patient_aadhar, patient_pan, attender_aadhar, attender_pan, \
    is_deleted, deleted_at, created_at, updated_at";

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PatientRow {
    pub id: i32,
    pub patient_id: String,
    pub name: String,
    pub age: i32,
    pub gender: String,
    pub phone: String,
    pub email: String,
    pub address: String,
    pub attender_name: String,
    pub attender_phone: String,
    pub attender_relationship: String,
    pub attender_marital_status: String,
    pub attender_occupation: String,
    pub guardian_name: String,
    pub guardian_phone: String,
    pub guardian_relationship: String,
    pub guardian_marital_status: String,
    pub guardian_occupation: String,
    pub medical_history: String,
    pub admission_date: Option<NaiveDate>,
    pub dob: Option<NaiveDate>,
    pub fees: f64,
    pub blood_test: f64,
    pub pickup_charge: f64,
    pub total_amount: f64,
    pub pay_amount: f64,
    pub balance: f64,
    pub photo: String,
    pub patient_aadhar: String,
    pub patient_pan: String,
    pub attender_aadhar: String,
    pub attender_pan: String,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PatientRow {
    /// Document paths are stored as written by whichever OS saved them;
    /// the API only ever hands out forward slashes.
    fn with_web_paths(mut self) -> Self {
        for field in [
            &mut self.photo,
            &mut self.patient_aadhar,
            &mut self.patient_pan,
            &mut self.attender_aadhar,
            &mut self.attender_pan,
        ] {
            *field = web_path(field);
        }
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePatientRequest {
    pub name: Option<String>,
    // number or numeric string; anything else fails validation, not deserialization
    pub age: Option<Value>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub attender_name: Option<String>,
    pub attender_phone: Option<String>,
    pub attender_relationship: Option<String>,
    pub attender_marital_status: Option<String>,
    pub attender_occupation: Option<String>,
    pub medical_history: Option<String>,
    pub admission_date: Option<String>,
    pub dob: Option<String>,
    pub fees: Option<f64>,
    pub blood_test: Option<f64>,
    pub pickup_charge: Option<f64>,
    pub total_amount: Option<f64>,
    pub pay_amount: Option<f64>,
    pub photo: Option<String>,
    pub patient_aadhar: Option<String>,
    pub patient_pan: Option<String>,
    pub attender_aadhar: Option<String>,
    pub attender_pan: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePatientRequest {
    pub name: Option<String>,
    pub age: Option<Value>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub attender_name: Option<String>,
    pub attender_phone: Option<String>,
    pub attender_relationship: Option<String>,
    pub attender_marital_status: Option<String>,
    pub attender_occupation: Option<String>,
    pub medical_history: Option<String>,
    pub admission_date: Option<String>,
    pub dob: Option<String>,
    pub fees: Option<f64>,
    pub blood_test: Option<f64>,
    pub pickup_charge: Option<f64>,
    pub total_amount: Option<f64>,
    pub pay_amount: Option<f64>,
    /// Accepted for compatibility but never written directly; its presence
    /// only triggers a server-side recompute from the stored operands.
    pub balance: Option<f64>,
    pub photo: Option<String>,
    pub patient_aadhar: Option<String>,
    pub patient_pan: Option<String>,
    pub attender_aadhar: Option<String>,
    pub attender_pan: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/patients", get(list_patients).post(create_patient))
        .route(
            "/patients/{id}",
            get(get_patient).put(update_patient).delete(delete_patient),
        )
}

/* -------------------------
   Helpers
--------------------------*/

pub fn format_patient_id(id: i32) -> String {
    format!("P{id:04}")
}

fn web_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Accepts `dd-MM-yyyy`, `yyyy-MM-dd`, or a full ISO datetime.
/// Unparseable input maps to `None` (stored as NULL), never an error.
fn normalize_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%d-%m-%Y"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|d| d.date_naive()))
}

fn parse_age(raw: &Option<Value>) -> Option<i64> {
    match raw {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// balance = totalAmount - payAmount, using the stored value for whichever
/// operand the request did not supply.
fn merged_balance(
    new_total: Option<f64>,
    new_pay: Option<f64>,
    stored_total: f64,
    stored_pay: f64,
) -> f64 {
    new_total.unwrap_or(stored_total) - new_pay.unwrap_or(stored_pay)
}

fn validate_new_patient(req: &CreatePatientRequest) -> Result<(String, i32, String, String), ApiError> {
    let name = req.name.as_deref().unwrap_or("").trim();
    if name.is_empty() {
        return Err(ApiError::validation("name is required"));
    }

    let age = parse_age(&req.age)
        .filter(|a| *a > 0)
        .ok_or_else(|| ApiError::validation("age must be a positive number"))?;

    let gender = req.gender.as_deref().unwrap_or("").trim();
    if gender.is_empty() {
        return Err(ApiError::validation("gender is required"));
    }

    let phone = req.phone.as_deref().unwrap_or("").trim();
    if phone.is_empty() {
        return Err(ApiError::validation("phone is required"));
    }

    Ok((name.to_string(), age as i32, gender.to_string(), phone.to_string()))
}

fn or_empty(v: &Option<String>) -> String {
    v.as_deref().unwrap_or("").to_string()
}

/* -------------------------
   Handlers
--------------------------*/

pub async fn create_patient(
    State(state): State<AppState>,
    Json(req): Json<CreatePatientRequest>,
) -> Result<Json<PatientRow>, ApiError> {
    let (name, age, gender, phone) = validate_new_patient(&req)?;

    let admission_date = req.admission_date.as_deref().and_then(normalize_date);
    let dob = req.dob.as_deref().and_then(normalize_date);

    let total_amount = req.total_amount.unwrap_or(0.0);
    let pay_amount = req.pay_amount.unwrap_or(0.0);
    let balance = total_amount - pay_amount;

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    // The attender binds ($7..$11) feed both column sets: one logical value,
    // two physical sinks kept for the legacy guardian_* readers.
    let id: i32 = sqlx::query_scalar(
        r#"
        INSERT INTO patients (
            patient_id, name, age, gender, phone, email, address,
            attender_name, attender_phone, attender_relationship, attender_marital_status, attender_occupation,
            guardian_name, guardian_phone, guardian_relationship, guardian_marital_status, guardian_occupation,
            medical_history, admission_date, dob,
            fees, blood_test, pickup_charge, total_amount, pay_amount, balance,
            photo, patient_aadhar, patient_pan, attender_aadhar, attender_pan,
            created_at, updated_at
        ) VALUES (
            '', $1, $2, $3, $4, $5, $6,
            $7, $8, $9, $10, $11,
            $7, $8, $9, $10, $11,
            $12, $13, $14,
            $15, $16, $17, $18, $19, $20,
            $21, $22, $23, $24, $25,
            now(), now()
        )
        RETURNING id
        "#,
    )
    .bind(&name)
    .bind(age)
    .bind(&gender)
    .bind(&phone)
    .bind(or_empty(&req.email))
    .bind(or_empty(&req.address))
    .bind(or_empty(&req.attender_name))
    .bind(or_empty(&req.attender_phone))
    .bind(or_empty(&req.attender_relationship))
    .bind(or_empty(&req.attender_marital_status))
    .bind(or_empty(&req.attender_occupation))
    .bind(or_empty(&req.medical_history))
    .bind(admission_date)
    .bind(dob)
    .bind(req.fees.unwrap_or(0.0))
    .bind(req.blood_test.unwrap_or(0.0))
    .bind(req.pickup_charge.unwrap_or(0.0))
    .bind(total_amount)
    .bind(pay_amount)
    .bind(balance)
    .bind(or_empty(&req.photo))
    .bind(or_empty(&req.patient_aadhar))
    .bind(or_empty(&req.patient_pan))
    .bind(or_empty(&req.attender_aadhar))
    .bind(or_empty(&req.attender_pan))
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    // patient_id mirrors the identity column, so two concurrent creates can
    // never hand out the same P#### (the old SELECT MAX(id)+1 scheme could).
    let row: PatientRow = sqlx::query_as::<_, PatientRow>(&format!(
        "UPDATE patients SET patient_id = $1 WHERE id = $2 RETURNING {PATIENT_COLUMNS}"
    ))
    .bind(format_patient_id(id))
    .bind(id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(row.with_web_paths()))
}

pub async fn list_patients(
    State(state): State<AppState>,
) -> Result<Json<Vec<PatientRow>>, ApiError> {
    let rows: Vec<PatientRow> = sqlx::query_as::<_, PatientRow>(&format!(
        "SELECT {PATIENT_COLUMNS} FROM patients WHERE is_deleted = FALSE ORDER BY created_at DESC"
    ))
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows.into_iter().map(PatientRow::with_web_paths).collect()))
}

pub async fn get_patient(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<PatientRow>, ApiError> {
    let row: PatientRow = sqlx::query_as::<_, PatientRow>(&format!(
        "SELECT {PATIENT_COLUMNS} FROM patients WHERE id = $1 AND is_deleted = FALSE"
    ))
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(ApiError::patient_not_found)?;

    Ok(Json(row.with_web_paths()))
}

pub async fn update_patient(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(req): Json<UpdatePatientRequest>,
) -> Result<Json<PatientRow>, ApiError> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE patients SET updated_at = now()");
    let mut touched = 0usize;

    if let Some(name) = &req.name {
        qb.push(", name = ").push_bind(name.trim().to_string());
        touched += 1;
    }
    if req.age.is_some() {
        let age = parse_age(&req.age)
            .filter(|a| *a > 0)
            .ok_or_else(|| ApiError::validation("age must be a positive number"))?;
        qb.push(", age = ").push_bind(age as i32);
        touched += 1;
    }
    for (column, value) in [
        ("gender", &req.gender),
        ("phone", &req.phone),
        ("email", &req.email),
        ("address", &req.address),
        ("medical_history", &req.medical_history),
        ("photo", &req.photo),
        ("patient_aadhar", &req.patient_aadhar),
        ("patient_pan", &req.patient_pan),
        ("attender_aadhar", &req.attender_aadhar),
        ("attender_pan", &req.attender_pan),
    ] {
        if let Some(v) = value {
            qb.push(format!(", {column} = ")).push_bind(v.clone());
            touched += 1;
        }
    }

    // One logical attender value, two physical sinks (see create_patient).
    for (new_column, legacy_column, value) in [
        ("attender_name", "guardian_name", &req.attender_name),
        ("attender_phone", "guardian_phone", &req.attender_phone),
        ("attender_relationship", "guardian_relationship", &req.attender_relationship),
        ("attender_marital_status", "guardian_marital_status", &req.attender_marital_status),
        ("attender_occupation", "guardian_occupation", &req.attender_occupation),
    ] {
        if let Some(v) = value {
            qb.push(format!(", {new_column} = ")).push_bind(v.clone());
            qb.push(format!(", {legacy_column} = ")).push_bind(v.clone());
            touched += 1;
        }
    }

    if let Some(raw) = &req.admission_date {
        qb.push(", admission_date = ").push_bind(normalize_date(raw));
        touched += 1;
    }
    if let Some(raw) = &req.dob {
        qb.push(", dob = ").push_bind(normalize_date(raw));
        touched += 1;
    }

    for (column, value) in [
        ("fees", req.fees),
        ("blood_test", req.blood_test),
        ("pickup_charge", req.pickup_charge),
        ("total_amount", req.total_amount),
        ("pay_amount", req.pay_amount),
    ] {
        if let Some(v) = value {
            qb.push(format!(", {column} = ")).push_bind(v);
            touched += 1;
        }
    }
    if req.balance.is_some() {
        // counts toward the effective field set but is never written as sent
        touched += 1;
    }

    if touched == 0 {
        return Err(ApiError::BadRequest(
            "NO_FIELDS",
            "no valid fields to update".to_string(),
        ));
    }

    if req.total_amount.is_some() || req.pay_amount.is_some() || req.balance.is_some() {
        let stored: (f64, f64) = sqlx::query_as(
            r#"
            SELECT total_amount, pay_amount
            FROM patients
            WHERE id = $1 AND is_deleted = FALSE
            "#,
        )
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
        .ok_or_else(ApiError::patient_not_found)?;

        let balance = merged_balance(req.total_amount, req.pay_amount, stored.0, stored.1);
        qb.push(", balance = ").push_bind(balance);
    }

    qb.push(" WHERE id = ").push_bind(id);
    qb.push(" AND is_deleted = FALSE");
    qb.push(format!(" RETURNING {PATIENT_COLUMNS}"));

    let row: PatientRow = qb
        .build_query_as::<PatientRow>()
        .fetch_optional(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
        .ok_or_else(ApiError::patient_not_found)?;

    Ok(Json(row.with_web_paths()))
}

pub async fn delete_patient(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<OkResponse>, ApiError> {
    let res = sqlx::query(
        r#"
        UPDATE patients
        SET is_deleted = TRUE, deleted_at = now(), updated_at = now()
        WHERE id = $1 AND is_deleted = FALSE
        "#,
    )
    .bind(id)
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if res.rows_affected() == 0 {
        return Err(ApiError::patient_not_found());
    }

    Ok(Json(OkResponse::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_patient_id() {
        assert_eq!(format_patient_id(1), "P0001");
        assert_eq!(format_patient_id(42), "P0042");
        assert_eq!(format_patient_id(9999), "P9999");
        // widens past four digits instead of truncating
        assert_eq!(format_patient_id(12345), "P12345");
    }

    #[test]
    fn test_normalize_date() {
        let expected = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        assert_eq!(normalize_date("15-01-2025"), Some(expected));
        assert_eq!(normalize_date("2025-01-15"), Some(expected));
        assert_eq!(normalize_date("2025-01-15T10:30:00Z"), Some(expected));
        assert_eq!(normalize_date("not-a-date"), None);
        assert_eq!(normalize_date(""), None);
        assert_eq!(normalize_date("   "), None);
    }

    #[test]
    fn test_parse_age() {
        assert_eq!(parse_age(&Some(json!(30))), Some(30));
        assert_eq!(parse_age(&Some(json!("30"))), Some(30));
        assert_eq!(parse_age(&Some(json!("thirty"))), None);
        assert_eq!(parse_age(&Some(json!(null))), None);
        assert_eq!(parse_age(&None), None);
    }

    #[test]
    fn test_merged_balance() {
        // both operands supplied
        assert_eq!(merged_balance(Some(1000.0), Some(400.0), 0.0, 0.0), 600.0);
        // only payAmount supplied: totalAmount comes from storage
        assert_eq!(merged_balance(None, Some(1000.0), 1000.0, 400.0), 0.0);
        // only totalAmount supplied: payAmount comes from storage
        assert_eq!(merged_balance(Some(1500.0), None, 1000.0, 400.0), 1100.0);
        // neither supplied (balance-only request triggers a plain recompute)
        assert_eq!(merged_balance(None, None, 1000.0, 400.0), 600.0);
    }

    #[test]
    fn test_web_path() {
        assert_eq!(
            web_path(r"Photos\patient Admission\P0001\photo.jpg"),
            "Photos/patient Admission/P0001/photo.jpg"
        );
        assert_eq!(
            web_path("patient-admission/P0001/photo.jpg"),
            "patient-admission/P0001/photo.jpg"
        );
    }

    #[test]
    fn test_validate_new_patient() {
        let ok: CreatePatientRequest = serde_json::from_value(json!({
            "name": "Asha",
            "age": 30,
            "gender": "F",
            "phone": "9000000000",
            "somethingUnknown": "dropped harmlessly"
        }))
        .unwrap();
        let (name, age, gender, phone) = validate_new_patient(&ok).unwrap();
        assert_eq!((name.as_str(), age, gender.as_str(), phone.as_str()), ("Asha", 30, "F", "9000000000"));

        let missing_name: CreatePatientRequest =
            serde_json::from_value(json!({ "age": 30, "gender": "F", "phone": "9" })).unwrap();
        assert!(validate_new_patient(&missing_name).is_err());

        let bad_age: CreatePatientRequest = serde_json::from_value(
            json!({ "name": "Asha", "age": 0, "gender": "F", "phone": "9" }),
        )
        .unwrap();
        assert!(validate_new_patient(&bad_age).is_err());

        let blank_phone: CreatePatientRequest = serde_json::from_value(
            json!({ "name": "Asha", "age": 30, "gender": "F", "phone": "   " }),
        )
        .unwrap();
        assert!(validate_new_patient(&blank_phone).is_err());
    }
}
