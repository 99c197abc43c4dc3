use crate::analytics;
use crate::client::USER_HEADER;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{
    AnalyticsData, AttachmentRecord, CreateLeadPayload, CreateUserPayload, FollowUpToday, LeadRecord,
    SavePlanPayload, SetPlanActivePayload, SubscriptionPlan, SyncSheetRequest, SyncSheetResponse, UserRecord,
};
use crate::permissions::{list_presets, PermissionSet, PresetView};
use crate::policy::UploadPolicy;
use crate::sheets::SheetImporter;
use crate::uploads::{receive_uploads, UploadField};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Multipart overhead allowance on top of the per-file limits.
const UPLOAD_BODY_SLACK_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub uploads: Arc<UploadPolicy>,
    pub sheets: Arc<SheetImporter>,
}

pub fn build_router(state: AppState) -> Router {
    let upload_body_limit = state.uploads.max_files() * state.uploads.max_file_bytes() as usize
        + UPLOAD_BODY_SLACK_BYTES;

    let upload_routes = Router::new()
        .route("/uploads", post(upload_many).get(list_uploads))
        .route("/uploads/single", post(upload_single))
        .layer(DefaultBodyLimit::max(upload_body_limit));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/leads", get(list_leads).post(create_lead))
        .route("/leads/sync-sheet", post(sync_sheet))
        .route("/leads/analytics-data", get(analytics_data))
        .route("/leads/follow-up-today", get(follow_up_today))
        .route("/plans", get(list_plans).post(create_plan))
        .route("/plans/:plan_id/active", patch(set_plan_active))
        .route("/permissions/presets", get(permission_presets))
        .route("/users", post(create_user))
        .route(
            "/users/:user_id/permissions",
            get(get_user_permissions).put(update_user_permissions),
        )
        .merge(upload_routes)
        .with_state(state)
}

fn owner_id(headers: &HeaderMap) -> AppResult<String> {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| AppError::Unauthorized(format!("Missing {} header", USER_HEADER)))
}

async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn list_leads(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Vec<LeadRecord>>> {
    let owner = owner_id(&headers)?;
    Ok(Json(state.db.list_leads(&owner)?))
}

async fn create_lead(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateLeadPayload>,
) -> AppResult<(StatusCode, Json<LeadRecord>)> {
    let owner = owner_id(&headers)?;
    let lead = state.db.insert_lead(&owner, payload)?;
    Ok((StatusCode::CREATED, Json(lead)))
}

async fn sync_sheet(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SyncSheetRequest>,
) -> AppResult<Json<SyncSheetResponse>> {
    let owner = owner_id(&headers)?;
    let response = state.sheets.sync(&state.db, &owner, &payload.sheet_url).await?;
    Ok(Json(response))
}

async fn analytics_data(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<AnalyticsData>> {
    let owner = owner_id(&headers)?;
    let data = analytics::analytics_data(&state.db, &owner, Utc::now().date_naive())?;
    Ok(Json(data))
}

async fn follow_up_today(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<FollowUpToday>> {
    let owner = owner_id(&headers)?;
    let data = analytics::follow_up_today(&state.db, &owner, Utc::now().date_naive())?;
    Ok(Json(data))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanListQuery {
    #[serde(default)]
    include_inactive: bool,
}

async fn list_plans(
    State(state): State<AppState>,
    Query(query): Query<PlanListQuery>,
) -> AppResult<Json<Vec<SubscriptionPlan>>> {
    Ok(Json(state.db.list_plans(!query.include_inactive)?))
}

async fn create_plan(
    State(state): State<AppState>,
    Json(payload): Json<SavePlanPayload>,
) -> AppResult<(StatusCode, Json<SubscriptionPlan>)> {
    let plan = state.db.insert_plan(payload)?;
    tracing::info!(plan_id = %plan.id, name = %plan.name, "subscription plan created");
    Ok((StatusCode::CREATED, Json(plan)))
}

async fn set_plan_active(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    Json(payload): Json<SetPlanActivePayload>,
) -> AppResult<Json<SubscriptionPlan>> {
    Ok(Json(state.db.set_plan_active(&plan_id, payload.is_active)?))
}

async fn permission_presets() -> Json<Vec<PresetView>> {
    Json(list_presets())
}

async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserPayload>,
) -> AppResult<(StatusCode, Json<UserRecord>)> {
    let user = state.db.insert_user(payload)?;
    tracing::info!(user_id = %user.id, role = user.role.as_str(), "user created");
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user_permissions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<PermissionSet>> {
    let user = state
        .db
        .get_user(&user_id)?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;
    Ok(Json(user.permissions))
}

async fn update_user_permissions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(permissions): Json<PermissionSet>,
) -> AppResult<Json<PermissionSet>> {
    let user = state.db.update_user_permissions(&user_id, permissions)?;
    Ok(Json(user.permissions))
}

async fn upload_many(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<Vec<AttachmentRecord>>)> {
    let owner = owner_id(&headers)?;
    let records = receive_uploads(&state.uploads, &state.db, &owner, UploadField::Many, multipart).await?;
    Ok((StatusCode::CREATED, Json(records)))
}

async fn upload_single(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<AttachmentRecord>)> {
    let owner = owner_id(&headers)?;
    let mut records =
        receive_uploads(&state.uploads, &state.db, &owner, UploadField::Single, multipart).await?;
    let record = records
        .pop()
        .ok_or_else(|| AppError::Upload("No file was uploaded".to_string()))?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_uploads(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<AttachmentRecord>>> {
    let owner = owner_id(&headers)?;
    Ok(Json(state.db.list_attachments(&owner)?))
}
