use axum::extract::{Path, State};
use axum::Json;

use crate::error::Result;
use crate::handlers::ParticipantId;
use crate::models::{ChargeRequest, WalletResource, WalletResponse};
use crate::AppState;

/// Current balance for one of the caller's wallets. A wallet that has
/// never been touched reads as zero.
#[utoipa::path(
    get,
    path = "/api/v1/wallets/{resource}",
    params(("resource" = WalletResource, Path, description = "Wallet resource")),
    responses((status = 200, body = WalletResponse)),
    tag = "wallets"
)]
pub async fn get_wallet(
    State(state): State<AppState>,
    ParticipantId(participant_id): ParticipantId,
    Path(resource): Path<WalletResource>,
) -> Result<Json<WalletResponse>> {
    let wallet = state.ledger.get(participant_id, resource).await?;
    Ok(Json(wallet.into()))
}

/// Adjust the wallet's total balance: positive amounts deposit, negative
/// amounts withdraw. Withdrawals cannot dip into locked funds.
#[utoipa::path(
    post,
    path = "/api/v1/wallets/{resource}/charge",
    params(("resource" = WalletResource, Path, description = "Wallet resource")),
    request_body = ChargeRequest,
    responses(
        (status = 200, body = WalletResponse),
        (status = 409, description = "Would drop total below the locked amount"),
    ),
    tag = "wallets"
)]
pub async fn charge_wallet(
    State(state): State<AppState>,
    ParticipantId(participant_id): ParticipantId,
    Path(resource): Path<WalletResource>,
    Json(req): Json<ChargeRequest>,
) -> Result<Json<WalletResponse>> {
    let wallet = state
        .ledger
        .adjust_total(participant_id, resource, req.amount)
        .await?;
    Ok(Json(wallet.into()))
}
