//! Core entity types for the M&A financing graph.
//!
//! Facts, deals, financing events and alerts form a graph persisted through
//! foreign keys; in memory everything is id-indexed (no cyclic references).

mod alert;
mod bank;
mod deal;
mod fact;
mod filing;
mod financing;
mod manual;

pub use alert::{Alert, AlertKind};
pub use bank::{Bank, BankAlias};
pub use deal::{build_deal_key, Deal, DealState};
pub use fact::{
    AdvisorPayload, AtomicFact, DatePayload, DealValuePayload, FactPayload, FactType,
    FinancingPayload, ManualPayload, ParticipantPayload, PartyPayload, SponsorPayload,
};
pub use filing::{Exhibit, ExtractionQuality, Filing};
pub use financing::{FinancingEvent, FinancingParticipant, MarketTag, CANONICAL_ROLES};
pub use manual::ManualInput;
