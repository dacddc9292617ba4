use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiError, Result};
use crate::handlers::ParticipantId;
use crate::models::{CreateOfferRequest, MinEndTimeQuery, MinEndTimeResponse, Offer};
use crate::services::delivery::{min_end_time, required_overlap_minutes};
use crate::AppState;

/// Create a buy or sell offer. Funds or energy are escrowed on success; a
/// buy offer additionally gets one immediate match attempt.
#[utoipa::path(
    post,
    path = "/api/v1/offers",
    request_body = CreateOfferRequest,
    responses(
        (status = 201, description = "Offer created", body = Offer),
        (status = 400, description = "Validation failed"),
        (status = 409, description = "Insufficient balance"),
    ),
    tag = "offers"
)]
pub async fn create_offer(
    State(state): State<AppState>,
    ParticipantId(participant_id): ParticipantId,
    Json(req): Json<CreateOfferRequest>,
) -> Result<(StatusCode, Json<Offer>)> {
    req.validate()
        .map_err(|e| ApiError::validation_error(e.to_string(), None))?;
    let offer = state.matching.create_offer(participant_id, req).await?;
    Ok((StatusCode::CREATED, Json(offer)))
}

/// Cancel the caller's own ACTIVE or EXPIRED offer and release its escrow.
#[utoipa::path(
    delete,
    path = "/api/v1/offers/{id}",
    params(("id" = Uuid, Path, description = "Offer id")),
    responses(
        (status = 204, description = "Offer cancelled"),
        (status = 403, description = "Not the offer owner"),
        (status = 404, description = "Offer not found"),
        (status = 409, description = "Offer not cancellable in its current status"),
    ),
    tag = "offers"
)]
pub async fn cancel_offer(
    State(state): State<AppState>,
    ParticipantId(participant_id): ParticipantId,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.matching.cancel_offer(participant_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The caller's offers still in progress (any status except COMPLETED).
#[utoipa::path(
    get,
    path = "/api/v1/offers/open",
    responses((status = 200, body = Vec<Offer>)),
    tag = "offers"
)]
pub async fn list_open_offers(
    State(state): State<AppState>,
    ParticipantId(participant_id): ParticipantId,
) -> Result<Json<Vec<Offer>>> {
    let offers = state
        .orders
        .find_open_by_owner(participant_id)
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(offers))
}

#[utoipa::path(
    get,
    path = "/api/v1/offers/completed",
    responses((status = 200, body = Vec<Offer>)),
    tag = "offers"
)]
pub async fn list_completed_offers(
    State(state): State<AppState>,
    ParticipantId(participant_id): ParticipantId,
) -> Result<Json<Vec<Offer>>> {
    let offers = state
        .orders
        .find_completed_by_owner(participant_id)
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(offers))
}

/// Earliest acceptable end time for a planned offer, so clients can build
/// a valid delivery window before submitting.
#[utoipa::path(
    get,
    path = "/api/v1/offers/min-end-time",
    params(MinEndTimeQuery),
    responses((status = 200, body = MinEndTimeResponse)),
    tag = "offers"
)]
pub async fn get_min_end_time(
    Query(query): Query<MinEndTimeQuery>,
) -> Result<Json<MinEndTimeResponse>> {
    if query.quantity_kwh <= rust_decimal::Decimal::ZERO {
        return Err(ApiError::validation_error(
            "quantity_kwh must be positive",
            Some("quantity_kwh"),
        ));
    }

    Ok(Json(MinEndTimeResponse {
        min_end_time: min_end_time(query.start_time, query.quantity_kwh),
        required_minutes: required_overlap_minutes(query.quantity_kwh),
    }))
}
