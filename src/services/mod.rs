pub mod delivery;
pub mod event_log;
pub mod matching;
pub mod order_store;
pub mod participants;
pub mod scheduler;
pub mod scoring;
pub mod wallet_ledger;

pub use event_log::EventLog;
pub use matching::MatchingEngine;
pub use order_store::OrderStore;
pub use participants::ParticipantDirectory;
pub use scheduler::Scheduler;
pub use wallet_ledger::WalletLedger;
