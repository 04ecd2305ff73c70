//! Intent orchestrator (component F): the per-intent state machine
//! described in spec §4.F, steps 1 through 11.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::Notify;
use tokio::time::timeout;

use mpc::protocol::{self, Allocation, PartyShare};
use mpc::session::{SessionStatus, SessionStore};
use mpc::sharing::{PartyView, RssTriple};
use mpc::signing::SigningIdentity;
use mpc::transport::{Envelope, MessageBus, MessageType, Payload};
use mpc::{CoreError, Field, PartyId, NUM_PARTIES};

use crate::error::OrchestratorError;
use crate::inventory::{InventoryHelper, SwapVenue};
use crate::intent::{Intent, SettlementSignature};
use crate::ledger::{IntentCreatedEvent, LedgerAdapter};

/// Collection/signature/sum-exchange timeout (spec §4.F steps 3, 5, 9).
const COLLECTION_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-reconstruction-request timeout (spec §4.F step 6).
const RECONSTRUCTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-intent bookkeeping the message dispatcher writes into and the state
/// machine reads from. Kept as two separate maps, per spec §9: conflating
/// `received_shares` (capacity distribution) with `computation_shares` (sum
/// exchange) corrupts reconstruction.
#[derive(Default)]
struct IntentMaps {
    /// Shares staged before this intent has a session (spec §4.F step 2).
    staged_shares: HashMap<String, Vec<(PartyId, PartyView)>>,
    /// Sum-exchange views received via COMPUTATION_ROUND, keyed by intent_id.
    computation_shares: HashMap<String, Vec<PartyShare>>,
    pending_signatures: HashMap<String, Vec<SettlementSignature>>,
    notify: HashMap<String, Arc<Notify>>,
}

impl IntentMaps {
    fn notify_for(&mut self, intent_id: &str) -> Arc<Notify> {
        self.notify
            .entry(intent_id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }
}

/// Drives every intent this node observes through the 11-step protocol.
pub struct Orchestrator<L, V> {
    party_id: PartyId,
    bus: Arc<MessageBus>,
    sessions: Arc<SessionStore>,
    ledger: Arc<L>,
    inventory: Arc<InventoryHelper<V>>,
    signing: Arc<SigningIdentity>,
    processing: Mutex<HashSet<String>>,
    maps: Mutex<IntentMaps>,
}

impl<L, V> Orchestrator<L, V>
where
    L: LedgerAdapter + 'static,
    V: SwapVenue + 'static,
{
    pub fn new(
        party_id: PartyId,
        bus: Arc<MessageBus>,
        sessions: Arc<SessionStore>,
        ledger: Arc<L>,
        inventory: Arc<InventoryHelper<V>>,
        signing: Arc<SigningIdentity>,
    ) -> Arc<Self> {
        let orchestrator = Arc::new(Orchestrator {
            party_id,
            bus,
            sessions,
            ledger,
            inventory,
            signing,
            processing: Mutex::new(HashSet::new()),
            maps: Mutex::new(IntentMaps::default()),
        });
        orchestrator.register_handlers();
        orchestrator
    }

    fn register_handlers(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.bus.on(
            MessageType::ShareDistribution,
            Arc::new(move |envelope| this.on_share_distribution(envelope)),
        );

        let this = Arc::clone(self);
        self.bus.on(
            MessageType::ComputationRound,
            Arc::new(move |envelope| this.on_computation_round(envelope)),
        );

        let this = Arc::clone(self);
        self.bus.on(
            MessageType::SettlementSignature,
            Arc::new(move |envelope| this.on_settlement_signature(envelope)),
        );

        let this = Arc::clone(self);
        self.bus.on(
            MessageType::ReconstructionRequest,
            Arc::new(move |envelope| this.on_reconstruction_request(envelope)),
        );
    }

    /// Answer a peer's RECONSTRUCTION_REQUEST with our share of the named
    /// variable, if our session still has it.
    ///
    /// `envelope.session_id` is the *requester's* session_id, which per §3
    /// each node mints independently as `{intent_id}-{random suffix}` — it
    /// never matches our own session_id for the same intent. Only the
    /// intent_id prefix is common ground, so we recover it and resolve our
    /// own session before touching the share store.
    fn on_reconstruction_request(self: &Arc<Self>, envelope: Envelope) -> Result<(), String> {
        let Payload::ReconstructionRequest { variable } = envelope.payload else {
            return Err("ReconstructionRequest envelope missing its payload".to_string());
        };
        let intent_id = envelope
            .session_id
            .rsplit_once('-')
            .map(|(intent_id, _suffix)| intent_id)
            .unwrap_or(&envelope.session_id);
        let session = self
            .sessions
            .get_by_intent_id(intent_id)
            .ok_or_else(|| CoreError::UnknownSession(envelope.session_id.clone()).to_string())?;
        let view = self
            .sessions
            .get_share(&session.session_id, &variable)
            .map_err(|error| error.to_string())?;
        let response = Envelope::reconstruction_response(
            self.party_id,
            envelope.from,
            envelope.session_id,
            variable,
            view,
        );
        let bus = Arc::clone(&self.bus);
        tokio::spawn(async move {
            if let Err(error) = bus.send_to(response.to as PartyId, response).await {
                tracing::warn!(%error, "failed to send reconstruction response");
            }
        });
        Ok(())
    }

    fn on_share_distribution(&self, envelope: Envelope) -> Result<(), String> {
        let Payload::ShareDistribution { shares, .. } = envelope.payload else {
            return Err("ShareDistribution envelope missing its payload".to_string());
        };
        let intent_id = envelope.session_id;

        let mut maps = self.maps.lock().expect("intent maps poisoned");
        if let Some(session) = self.sessions.get_by_intent_id(&intent_id) {
            for (from_party_id, view) in shares {
                let name = format!("capacity_{from_party_id}");
                if let Err(error) = self.sessions.put_share(&session.session_id, &name, view) {
                    tracing::warn!(%error, "ignoring duplicate share");
                }
            }
        } else {
            maps.staged_shares.entry(intent_id.clone()).or_default().extend(shares);
        }
        maps.notify_for(&intent_id).notify_waiters();
        Ok(())
    }

    fn on_computation_round(&self, envelope: Envelope) -> Result<(), String> {
        let Payload::ComputationRound { shares, .. } = envelope.payload else {
            return Err("ComputationRound envelope missing its payload".to_string());
        };
        let intent_id = envelope.session_id;
        let mut maps = self.maps.lock().expect("intent maps poisoned");
        maps.computation_shares
            .entry(intent_id.clone())
            .or_default()
            .push(PartyShare {
                party_id: envelope.from,
                view: shares,
            });
        maps.notify_for(&intent_id).notify_waiters();
        Ok(())
    }

    fn on_settlement_signature(&self, envelope: Envelope) -> Result<(), String> {
        let Payload::SettlementSignature {
            intent_id,
            amount,
            signature,
        } = envelope.payload
        else {
            return Err("SettlementSignature envelope missing its payload".to_string());
        };
        let mut maps = self.maps.lock().expect("intent maps poisoned");
        maps.pending_signatures
            .entry(intent_id.clone())
            .or_default()
            .push(SettlementSignature {
                party_id: envelope.from,
                intent_id: intent_id.clone(),
                amount,
                signature,
            });
        maps.notify_for(&intent_id).notify_waiters();
        Ok(())
    }

    /// Entry point: step 1, "Detect". Ignored if `intent_id` is already
    /// being processed (spec invariant 8, orchestrator idempotence).
    pub async fn handle_intent_created(
        self: &Arc<Self>,
        event: IntentCreatedEvent,
    ) -> Result<(), OrchestratorError> {
        let intent_id = event.intent_id.clone();
        {
            let mut processing = self.processing.lock().expect("processing set poisoned");
            if !processing.insert(intent_id.clone()) {
                tracing::debug!(%intent_id, "intent already processing, ignoring duplicate event");
                return Ok(());
            }
        }

        let intent = Intent::from_event(&event);
        let my_capacity = self.determine_capacity(&intent).await;
        let result = self.run_intent(intent, my_capacity).await;
        if let Err(error) = &result {
            tracing::warn!(%intent_id, %error, "intent processing failed");
            if let Some(session) = self.sessions.get_by_intent_id(&intent_id) {
                if session.status != SessionStatus::Completed && session.status != SessionStatus::Failed {
                    let _ = self.sessions.update_status(&session.session_id, SessionStatus::Failed);
                }
            }
        }
        self.cleanup(&intent_id);
        result
    }

    /// Step 1's capacity half: use whatever `token_out` this node already
    /// holds; if none, ask the inventory helper to source a third of the
    /// order via a swap; if that also fails, participate with capacity 0
    /// so the protocol still reaches consensus.
    async fn determine_capacity(&self, intent: &Intent) -> u64 {
        match self.inventory.get_balance(&intent.token_out, false).await {
            Ok(balance) if balance.amount > 0 => return balance.amount,
            _ => {}
        }
        match self.inventory.get_balance(&intent.token_out, true).await {
            Ok(balance) if balance.amount > 0 => return balance.amount,
            _ => {}
        }
        match self
            .inventory
            .fulfill_requirement(&intent.token_out, intent.min_amount_out / 3)
            .await
        {
            Ok(balance) => balance.amount,
            Err(error) => {
                tracing::warn!(%error, intent_id = %intent.intent_id, "could not source capacity, participating with zero");
                0
            }
        }
    }

    async fn run_intent(
        self: &Arc<Self>,
        intent: Intent,
        my_capacity: u64,
    ) -> Result<(), OrchestratorError> {
        let intent_id = intent.intent_id.clone();
        let peers = peer_ids(self.party_id);

        // Step 2: secret-share capacity.
        let parties = [0, 1, 2];
        let session = self.sessions.create(&intent_id, parties, self.party_id);
        self.sessions
            .update_status(&session.session_id, SessionStatus::Sharing)?;

        let mut rng = StdRng::from_entropy();
        let triple = RssTriple::share(&Field::from_u64(my_capacity), &mut rng);
        let my_name = format!("capacity_{}", self.party_id);
        self.sessions
            .put_share(&session.session_id, &my_name, triple.view(self.party_id))?;

        for peer in peers {
            let view_for_peer = triple.view(peer);
            let envelope = Envelope::share_distribution(
                self.party_id,
                peer,
                intent_id.clone(),
                vec![(self.party_id, view_for_peer)],
            );
            self.bus
                .send_to(peer, envelope)
                .await
                .map_err(|error| OrchestratorError::NetworkTransient(error.to_string()))?;
        }

        self.drain_staged_shares(&intent_id, &session.session_id);

        // Step 3: collect capacity shares.
        let deadline = Instant::now() + COLLECTION_TIMEOUT;
        self.wait_until(&intent_id, deadline, || {
            peers
                .iter()
                .all(|peer| self.sessions.get_share(&session.session_id, &format!("capacity_{peer}")).is_ok())
        })
        .await?;

        // Step 4: share-space sum.
        self.sessions
            .update_status(&session.session_id, SessionStatus::Computing)?;
        let capacity_views: Vec<PartyView> = parties
            .iter()
            .map(|party| self.sessions.get_share(&session.session_id, &format!("capacity_{party}")))
            .collect::<Result<_, _>>()?;
        let my_sum_view = protocol::sum_views(&capacity_views);

        // Step 5: sufficiency check.
        let sum_envelope_to = |peer: PartyId| {
            Envelope::computation_round(self.party_id, peer, intent_id.clone(), 1, my_sum_view.clone())
        };
        self.bus.broadcast(sum_envelope_to).await;

        let deadline = Instant::now() + COLLECTION_TIMEOUT;
        self.wait_until(&intent_id, deadline, || {
            let maps = self.maps.lock().expect("intent maps poisoned");
            maps.computation_shares
                .get(&intent_id)
                .map(|shares| shares.len() >= peers.len())
                .unwrap_or(false)
        })
        .await?;

        let peer_sum_shares = {
            let maps = self.maps.lock().expect("intent maps poisoned");
            maps.computation_shares.get(&intent_id).cloned().unwrap_or_default()
        };

        let sufficient = protocol::check_sufficient_capacity(
            &my_sum_view,
            self.party_id,
            &Field::from_u64(intent.min_amount_out),
            |_| async move { Ok(peer_sum_shares) },
        )
        .await?;

        if !sufficient {
            self.sessions
                .update_status(&session.session_id, SessionStatus::Failed)?;
            return Err(OrchestratorError::Core(CoreError::InsufficientCapacity {
                available: "below threshold".to_string(),
                required: intent.min_amount_out.to_string(),
            }));
        }

        // Step 6: reveal capacities for proportional allocation.
        self.sessions
            .update_status(&session.session_id, SessionStatus::Reconstructing)?;
        let capacities = if my_capacity == 0 {
            [0u64; 3]
        } else {
            let mut capacities = [0u64; 3];
            for owner in parties {
                let my_view = self
                    .sessions
                    .get_share(&session.session_id, &format!("capacity_{owner}"))?;
                let bus = Arc::clone(&self.bus);
                let session_id = session.session_id.clone();
                let value = protocol::reconstruct_value(&my_view, self.party_id, owner, move |counterparty| {
                    let bus = Arc::clone(&bus);
                    let session_id = session_id.clone();
                    async move {
                        let response = timeout(
                            RECONSTRUCTION_TIMEOUT,
                            bus.request_shares(counterparty, &session_id, &format!("capacity_{owner}")),
                        )
                        .await
                        .map_err(|_| CoreError::SessionTimeout { phase: "reconstruct_value" })?
                        .map_err(|_| CoreError::SessionTimeout { phase: "reconstruct_value" })?;
                        match response.payload {
                            Payload::ReconstructionResponse { shares, .. } => Ok(shares),
                            _ => Err(CoreError::SessionTimeout { phase: "reconstruct_value" }),
                        }
                    }
                })
                .await?;
                capacities[owner] = decode_u64(&value);
            }
            capacities
        };

        let allocations = if my_capacity == 0 {
            [
                Allocation { party_id: 0, amount: 0 },
                Allocation { party_id: 1, amount: 0 },
                Allocation { party_id: 2, amount: 0 },
            ]
        } else {
            protocol::compute_allocations(capacities, intent.min_amount_out)?
        };
        let my_allocation = allocations[self.party_id].amount;

        // Step 7: approve. Allowance management on `token_out` lives with
        // the excluded token-swap venue/spender; nothing to do locally
        // beyond the inventory check already performed at Detect time.

        // Step 8: sign allocation and broadcast.
        let node_addr = self.signing.address().clone();
        let signature = self
            .ledger
            .sign_settlement(&intent_id, my_allocation, &node_addr)
            .await?;
        {
            let mut maps = self.maps.lock().expect("intent maps poisoned");
            maps.pending_signatures
                .entry(intent_id.clone())
                .or_default()
                .push(SettlementSignature {
                    party_id: self.party_id,
                    intent_id: intent_id.clone(),
                    amount: my_allocation,
                    signature: signature.clone(),
                });
        }
        let sig_envelope_to = |peer: PartyId| {
            Envelope::settlement_signature(
                self.party_id,
                peer,
                intent_id.clone(),
                my_allocation,
                signature.clone(),
            )
        };
        self.bus.broadcast(sig_envelope_to).await;

        // Step 9: collect signatures.
        let deadline = Instant::now() + COLLECTION_TIMEOUT;
        self.wait_until(&intent_id, deadline, || {
            let maps = self.maps.lock().expect("intent maps poisoned");
            maps.pending_signatures
                .get(&intent_id)
                .map(|sigs| sigs.len() >= NUM_PARTIES)
                .unwrap_or(false)
        })
        .await?;

        // Step 10: submit (leader only).
        if self.party_id == 0 {
            let signatures = {
                let maps = self.maps.lock().expect("intent maps poisoned");
                maps.pending_signatures.get(&intent_id).cloned().unwrap_or_default()
            };
            let (paired_allocations, paired_signatures) =
                pair_signatures_with_allocations(&allocations, &signatures)?;
            self.ledger
                .submit_settlement(&intent_id, &paired_allocations, &paired_signatures)
                .await?;
        }

        self.sessions
            .update_status(&session.session_id, SessionStatus::Completed)?;
        Ok(())
    }

    fn drain_staged_shares(&self, intent_id: &str, session_id: &str) {
        let staged = {
            let mut maps = self.maps.lock().expect("intent maps poisoned");
            maps.staged_shares.remove(intent_id).unwrap_or_default()
        };
        for (from_party_id, view) in staged {
            let name = format!("capacity_{from_party_id}");
            if let Err(error) = self.sessions.put_share(session_id, &name, view) {
                tracing::warn!(%error, "ignoring duplicate staged share");
            }
        }
    }

    /// Poll `predicate` until it holds, waking on every relevant message
    /// instead of busy-looping, until `deadline`.
    async fn wait_until(
        &self,
        intent_id: &str,
        deadline: Instant,
        mut predicate: impl FnMut() -> bool,
    ) -> Result<(), OrchestratorError> {
        let notify = {
            let mut maps = self.maps.lock().expect("intent maps poisoned");
            maps.notify_for(intent_id)
        };
        loop {
            // Register the waiter before checking the predicate: `notify_waiters`
            // wakes only already-registered waiters and stores no permit, so a
            // notification landing between the check and the await would
            // otherwise be lost.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if predicate() {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(OrchestratorError::Core(CoreError::SessionTimeout {
                    phase: "collection",
                }));
            }
            if timeout(remaining, notified).await.is_err() {
                return Err(OrchestratorError::Core(CoreError::SessionTimeout {
                    phase: "collection",
                }));
            }
        }
    }

    /// Step 11: cleanup. Removes every per-intent map entry and releases the
    /// concurrency guard, regardless of whether the intent succeeded. The
    /// session itself is left in the store (status already terminal) for
    /// `SessionStore::gc` to reap no sooner than its one-hour retention
    /// floor (spec §3) — this cleanup step only clears the orchestrator's
    /// own active-intent bookkeeping, not the session record.
    fn cleanup(&self, intent_id: &str) {
        let mut maps = self.maps.lock().expect("intent maps poisoned");
        maps.staged_shares.remove(intent_id);
        maps.computation_shares.remove(intent_id);
        maps.pending_signatures.remove(intent_id);
        maps.notify.remove(intent_id);
        drop(maps);

        self.processing
            .lock()
            .expect("processing set poisoned")
            .remove(intent_id);
    }
}

fn peer_ids(party_id: PartyId) -> [PartyId; 2] {
    let mut peers = [0usize; 2];
    let mut i = 0;
    for candidate in 0..NUM_PARTIES {
        if candidate != party_id {
            peers[i] = candidate;
            i += 1;
        }
    }
    peers
}

fn decode_u64(value: &Field) -> u64 {
    let bytes = value.to_bytes_be();
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[24..]);
    u64::from_be_bytes(buf)
}

/// Pair each signature with the allocation for the same `party_id`
/// (regardless of arrival order), drop zero-amount entries, and sort
/// ascending by `party_id` for a canonical submission order.
pub fn pair_signatures_with_allocations(
    allocations: &[Allocation; 3],
    signatures: &[SettlementSignature],
) -> Result<(Vec<Allocation>, Vec<SettlementSignature>), OrchestratorError> {
    let mut by_party: HashMap<PartyId, &SettlementSignature> = HashMap::new();
    for signature in signatures {
        by_party.insert(signature.party_id, signature);
    }

    let mut paired_allocations = Vec::new();
    let mut paired_signatures = Vec::new();
    let mut sorted = *allocations;
    sorted.sort_by_key(|allocation| allocation.party_id);

    for allocation in sorted {
        if allocation.amount == 0 {
            continue;
        }
        let signature = by_party
            .get(&allocation.party_id)
            .ok_or(OrchestratorError::Core(CoreError::MissingSignature(allocation.party_id)))?;
        if signature.amount != allocation.amount {
            return Err(OrchestratorError::Core(CoreError::SignatureMismatch {
                party: allocation.party_id,
                signed: signature.amount.to_string(),
                allocated: allocation.amount.to_string(),
            }));
        }
        paired_allocations.push(allocation);
        paired_signatures.push((*signature).clone());
    }

    Ok((paired_allocations, paired_signatures))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::Allocation;

    fn signature(party_id: PartyId, amount: u64) -> SettlementSignature {
        SettlementSignature {
            party_id,
            intent_id: "intent-1".to_string(),
            amount,
            signature: vec![party_id as u8],
        }
    }

    #[test]
    fn pairs_by_party_id_regardless_of_arrival_order() {
        let allocations = [
            Allocation { party_id: 0, amount: 300 },
            Allocation { party_id: 1, amount: 500 },
            Allocation { party_id: 2, amount: 200 },
        ];
        // Scenario E: arrival order [2, 0, 1].
        let signatures = vec![signature(2, 200), signature(0, 300), signature(1, 500)];
        let (paired_allocations, paired_signatures) =
            pair_signatures_with_allocations(&allocations, &signatures).unwrap();
        assert_eq!(
            paired_allocations.iter().map(|a| a.party_id).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(
            paired_signatures.iter().map(|s| s.amount).collect::<Vec<_>>(),
            vec![300, 500, 200]
        );
    }

    #[test]
    fn drops_zero_amount_allocations() {
        let allocations = [
            Allocation { party_id: 0, amount: 0 },
            Allocation { party_id: 1, amount: 600 },
            Allocation { party_id: 2, amount: 400 },
        ];
        let signatures = vec![signature(0, 0), signature(1, 600), signature(2, 400)];
        let (paired_allocations, _) = pair_signatures_with_allocations(&allocations, &signatures).unwrap();
        assert_eq!(paired_allocations.len(), 2);
        assert!(paired_allocations.iter().all(|a| a.party_id != 0));
    }

    #[test]
    fn missing_signature_for_nonzero_party_is_fatal() {
        let allocations = [
            Allocation { party_id: 0, amount: 300 },
            Allocation { party_id: 1, amount: 500 },
            Allocation { party_id: 2, amount: 200 },
        ];
        let signatures = vec![signature(0, 300), signature(1, 500)];
        let err = pair_signatures_with_allocations(&allocations, &signatures).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Core(CoreError::MissingSignature(2))
        ));
    }

    #[test]
    fn amount_mismatch_between_signature_and_allocation_is_fatal() {
        let allocations = [
            Allocation { party_id: 0, amount: 300 },
            Allocation { party_id: 1, amount: 500 },
            Allocation { party_id: 2, amount: 200 },
        ];
        let signatures = vec![signature(0, 301), signature(1, 500), signature(2, 200)];
        let err = pair_signatures_with_allocations(&allocations, &signatures).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Core(CoreError::SignatureMismatch { party: 0, .. })
        ));
    }

    #[test]
    fn peer_ids_excludes_self() {
        assert_eq!(peer_ids(0), [1, 2]);
        assert_eq!(peer_ids(1), [0, 2]);
        assert_eq!(peer_ids(2), [0, 1]);
    }

    #[test]
    fn decode_u64_round_trips_small_values() {
        let value = Field::from_u64(424242);
        assert_eq!(decode_u64(&value), 424242);
    }
}
