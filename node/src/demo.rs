//! Local-testing scaffolding for the two excluded collaborators (the
//! settlement registry and the swap venue). Neither is part of this core;
//! production deployments supply their own `LedgerAdapter`/`SwapVenue`
//! against a real chain and a real DEX. This module only exists so the
//! node binary can run end-to-end against a file-driven event feed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mpc::signing::SigningIdentity;
use orchestrator::intent::{Allocation, SettlementSignature};
use orchestrator::ledger::{IntentCreatedEvent, LedgerAdapter};
use orchestrator::inventory::SwapVenue;
use orchestrator::OrchestratorError;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

/// Reads newline-delimited JSON `IntentCreatedEvent`s from a file and
/// replays them as `listen()` yields, in file order — the push-preferred,
/// poll-fallback contract of spec §4.G with the push side faked by
/// tailing a file instead of a chain subscription.
///
/// `sign_settlement` is implemented here (rather than delegated to a real
/// custody service) using the node's own local signing key.
pub struct FileLedgerAdapter {
    events: AsyncMutex<mpsc::UnboundedReceiver<IntentCreatedEvent>>,
    signing: Arc<SigningIdentity>,
}

impl FileLedgerAdapter {
    pub fn from_path(path: &PathBuf, signing: Arc<SigningIdentity>) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        for line in raw.lines().filter(|line| !line.trim().is_empty()) {
            let event: RawIntentEvent = serde_json::from_str(line)
                .map_err(|error| std::io::Error::new(std::io::ErrorKind::InvalidData, error))?;
            let _ = sender.send(event.into());
        }
        Ok(FileLedgerAdapter {
            events: AsyncMutex::new(receiver),
            signing,
        })
    }
}

#[derive(serde::Deserialize)]
struct RawIntentEvent {
    intent_id: String,
    user: String,
    token_in: String,
    token_out: String,
    amount_in: u64,
    min_amount_out: u64,
    deadline: u64,
}

impl From<RawIntentEvent> for IntentCreatedEvent {
    fn from(raw: RawIntentEvent) -> Self {
        IntentCreatedEvent {
            intent_id: raw.intent_id,
            user: raw.user,
            token_in: raw.token_in,
            token_out: raw.token_out,
            amount_in: raw.amount_in,
            min_amount_out: raw.min_amount_out,
            deadline: raw.deadline,
        }
    }
}

#[async_trait]
impl LedgerAdapter for FileLedgerAdapter {
    async fn listen(&self) -> Result<IntentCreatedEvent, OrchestratorError> {
        let mut receiver = self.events.lock().await;
        receiver
            .recv()
            .await
            .ok_or_else(|| OrchestratorError::LedgerRejected("event feed exhausted".to_string()))
    }

    async fn sign_settlement(
        &self,
        intent_id: &str,
        amount: u64,
        node_addr: &str,
    ) -> Result<Vec<u8>, OrchestratorError> {
        let _ = node_addr;
        Ok(self.signing.sign_settlement(intent_id, amount))
    }

    async fn submit_settlement(
        &self,
        intent_id: &str,
        allocations: &[Allocation],
        signatures: &[SettlementSignature],
    ) -> Result<String, OrchestratorError> {
        tracing::info!(
            %intent_id,
            allocations = ?allocations,
            signatures = signatures.len(),
            "submitting batchFillIntent (demo ledger: not actually broadcast)"
        );
        Ok(format!("demo-tx-{intent_id}"))
    }

    async fn is_node_registered(&self, addr: &str) -> Result<bool, OrchestratorError> {
        let _ = addr;
        Ok(true)
    }

    async fn current_gas_price(&self) -> Result<u64, OrchestratorError> {
        Ok(1)
    }

    async fn estimate_settlement_gas(&self, num_nodes: usize) -> Result<u64, OrchestratorError> {
        Ok(21_000 + num_nodes as u64 * 5_000)
    }
}

/// A fixed-rate, in-memory swap venue seeded from the node's initial
/// capacity table. Swaps are only honoured if `enable_external_swap` was
/// set at startup.
pub struct StaticSwapVenue {
    balances: Mutex<HashMap<String, u64>>,
    enabled: bool,
}

impl StaticSwapVenue {
    pub fn new(initial: HashMap<String, u64>, enabled: bool) -> Self {
        StaticSwapVenue {
            balances: Mutex::new(initial),
            enabled,
        }
    }
}

#[async_trait]
impl SwapVenue for StaticSwapVenue {
    async fn balance_of(&self, token: &str) -> Result<u64, OrchestratorError> {
        Ok(*self.balances.lock().expect("venue balances poisoned").get(token).unwrap_or(&0))
    }

    async fn swap(
        &self,
        source_token: &str,
        target_token: &str,
        amount_in: u64,
        min_out: u64,
    ) -> Result<u64, OrchestratorError> {
        if !self.enabled {
            return Err(OrchestratorError::NoSwapSource(target_token.to_string()));
        }
        let mut balances = self.balances.lock().expect("venue balances poisoned");
        let source = balances.entry(source_token.to_string()).or_insert(0);
        if *source < amount_in {
            return Err(OrchestratorError::NoSwapSource(target_token.to_string()));
        }
        *source -= amount_in;
        *balances.entry(target_token.to_string()).or_insert(0) += min_out;
        Ok(min_out)
    }
}
