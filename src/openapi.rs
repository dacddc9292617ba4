//! OpenAPI document for the HTTP surface, served at
//! `/api-docs/openapi.json`.

use utoipa::OpenApi;

use crate::handlers;
use crate::models::{
    ChargeRequest, CreateOfferRequest, MinEndTimeResponse, Offer, OfferSide, OfferStatus,
    WalletResource, WalletResponse,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::orders::create_offer,
        handlers::orders::cancel_offer,
        handlers::orders::list_open_offers,
        handlers::orders::list_completed_offers,
        handlers::orders::get_min_end_time,
        handlers::wallets::get_wallet,
        handlers::wallets::charge_wallet,
    ),
    components(schemas(
        Offer,
        OfferSide,
        OfferStatus,
        CreateOfferRequest,
        MinEndTimeResponse,
        WalletResource,
        WalletResponse,
        ChargeRequest,
    )),
    tags(
        (name = "offers", description = "Offer creation, cancellation, and listing"),
        (name = "wallets", description = "Balance queries and deposits"),
        (name = "health", description = "Service health"),
    ),
    info(
        title = "Energy Exchange API",
        description = "Peer-to-peer energy order matching and reservation engine"
    )
)]
pub struct ApiDoc;
