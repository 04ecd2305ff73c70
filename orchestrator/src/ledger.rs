//! Ledger adapter (component G): the interface to the external settlement
//! registry contract. This crate only specifies the interface; a concrete
//! implementation (an RPC client against a real chain) is an excluded
//! collaborator per spec.

use async_trait::async_trait;

use crate::error::OrchestratorError;
use crate::intent::{Allocation, SettlementSignature};

/// Mirrors the on-chain `IntentCreated` event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntentCreatedEvent {
    pub intent_id: String,
    pub user: String,
    pub token_in: String,
    pub token_out: String,
    pub amount_in: u64,
    pub min_amount_out: u64,
    pub deadline: u64,
}

/// Mirrors the on-chain `IntentFilled` event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntentFilledEvent {
    pub intent_id: String,
    pub total_amount_out: u64,
    pub num_nodes: u32,
}

/// On-chain status of an intent, per `getIntentStatus`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntentChainStatus {
    Pending = 0,
    Filled = 1,
    Cancelled = 2,
}

/// The settlement registry contract, as seen by a node.
///
/// Implementations prefer a push-style transport (a duplex event stream)
/// and fall back to polling; either way, events are delivered to
/// [`listen`](LedgerAdapter::listen) callers in emission order.
#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    /// Block the caller's task, yielding each `IntentCreated` event in the
    /// order the chain emitted it.
    async fn listen(&self) -> Result<IntentCreatedEvent, OrchestratorError>;

    /// Produce this node's detached signature over the canonical settlement
    /// message for `(intent_id, amount, node_addr)`.
    async fn sign_settlement(
        &self,
        intent_id: &str,
        amount: u64,
        node_addr: &str,
    ) -> Result<Vec<u8>, OrchestratorError>;

    /// Build, send and await inclusion of the `batchFillIntent` transaction.
    /// `allocations` and `signatures` are already paired by party_id,
    /// zero-amount entries already dropped, and sorted ascending by
    /// party_id — callers are expected to have done this via
    /// [`crate::state_machine::pair_signatures_with_allocations`].
    async fn submit_settlement(
        &self,
        intent_id: &str,
        allocations: &[Allocation],
        signatures: &[SettlementSignature],
    ) -> Result<String, OrchestratorError>;

    async fn is_node_registered(&self, addr: &str) -> Result<bool, OrchestratorError>;

    async fn current_gas_price(&self) -> Result<u64, OrchestratorError>;

    async fn estimate_settlement_gas(&self, num_nodes: usize) -> Result<u64, OrchestratorError>;
}
