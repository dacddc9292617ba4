pub mod event;
pub mod offer;
pub mod participant;
pub mod trade;
pub mod wallet;

pub use event::EventEntity;
pub use offer::{
    CreateOfferRequest, MinEndTimeQuery, MinEndTimeResponse, Offer, OfferSide, OfferStatus,
};
pub use participant::Participant;
pub use trade::{Trade, TradeStatus};
pub use wallet::{ChargeRequest, Wallet, WalletResource, WalletResponse};
