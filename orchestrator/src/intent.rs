//! Intent data model (§3) and the settlement artefacts the state machine
//! produces for one.

use mpc::PartyId;

pub use mpc::protocol::Allocation;

/// Status of an intent as recorded on-chain; intents are immutable once
/// created, only this status field advances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntentStatus {
    Pending,
    Processing,
    Filled,
    Cancelled,
}

/// A user's instruction to swap up to `amount_in` of `token_in` for at
/// least `min_amount_out` of `token_out` by `deadline`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Intent {
    pub intent_id: String,
    pub user: String,
    pub token_in: String,
    pub token_out: String,
    pub amount_in: u64,
    pub min_amount_out: u64,
    pub deadline: u64,
    pub status: IntentStatus,
}

impl Intent {
    /// Normalise a freshly observed `IntentCreated` event into an immutable
    /// `Intent` record, starting in `Pending`.
    pub fn from_event(event: &crate::ledger::IntentCreatedEvent) -> Self {
        Intent {
            intent_id: event.intent_id.clone(),
            user: event.user.clone(),
            token_in: event.token_in.to_lowercase(),
            token_out: event.token_out.to_lowercase(),
            amount_in: event.amount_in,
            min_amount_out: event.min_amount_out,
            deadline: event.deadline,
            status: IntentStatus::Pending,
        }
    }
}

/// A single party's detached signature authorising its allocation.
#[derive(Clone, Debug)]
pub struct SettlementSignature {
    pub party_id: PartyId,
    pub intent_id: String,
    pub amount: u64,
    pub signature: Vec<u8>,
}
