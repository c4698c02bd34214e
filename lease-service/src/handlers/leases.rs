use crate::models::{CreateLease, Lease, LeasePage, LeaseQuery, LeaseStatusReason};
use crate::services::BudgetSweep;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use validator::Validate;

/// Optional body of `DELETE /leases/:id`.
#[derive(Debug, Default, Deserialize)]
pub struct EndLeaseRequest {
    pub reason: Option<LeaseStatusReason>,
}

#[derive(Debug, Serialize)]
pub struct BudgetCheckResponse {
    pub lease: Lease,
}

pub async fn create_lease(
    State(state): State<AppState>,
    Json(request): Json<CreateLease>,
) -> Result<(StatusCode, Json<Lease>), AppError> {
    let lease = state.leases.create(request).await?;
    Ok((StatusCode::CREATED, Json(lease)))
}

pub async fn list_leases(
    State(state): State<AppState>,
    Query(query): Query<LeaseQuery>,
) -> Result<Json<LeasePage>, AppError> {
    query.validate()?;
    Ok(Json(state.leases.list(&query).await?))
}

pub async fn get_lease(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Lease>, AppError> {
    Ok(Json(state.leases.get(&id).await?))
}

pub async fn delete_lease(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<EndLeaseRequest>>,
) -> Result<Json<Lease>, AppError> {
    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or(LeaseStatusReason::Destroyed);
    Ok(Json(state.leases.delete(&id, reason).await?))
}

/// Runs one budget check and returns the lease as stored afterwards.
pub async fn check_budget(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BudgetCheckResponse>, AppError> {
    let lease = state.leases.get(&id).await?;
    state.budget.check_budget(&lease).await?;
    let lease = state.leases.get(&id).await?;
    Ok(Json(BudgetCheckResponse { lease }))
}

/// Checks every Active lease. 200 when all checks passed, 207 otherwise.
pub async fn check_active_leases(State(state): State<AppState>) -> (StatusCode, Json<BudgetSweep>) {
    let (sweep, error) = state.budget.check_active_leases().await;
    match error {
        None => (StatusCode::OK, Json(sweep)),
        Some(e) => {
            tracing::error!(error = %e, "Budget sweep finished with failures");
            (StatusCode::MULTI_STATUS, Json(sweep))
        }
    }
}
