mod config;
mod demo;

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use mpc::session::SessionStore;
use mpc::signing::SigningIdentity;
use mpc::transport::{networking, MessageBus};
use orchestrator::inventory::InventoryHelper;
use orchestrator::Orchestrator;
use rand::SeedableRng;

use config::{load_capacity_table, NodeConfig};
use demo::{FileLedgerAdapter, StaticSwapVenue};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let config = NodeConfig::parse();

    let mut key_rng = rand::rngs::StdRng::from_entropy();
    let signing = Arc::new(
        SigningIdentity::load_or_generate(&config.signing_key_path, &config.node_name, &mut key_rng)
            .expect("persisted signing key is invalid"),
    );
    tracing::info!(address = %signing.address(), "node signing identity ready");

    let (network, party_id) = config
        .resolve_network()
        .expect("invalid network configuration");
    tracing::info!(party_id, node_name = %config.node_name, "resolved party identity");

    let bus = MessageBus::new(party_id);
    let channels = networking::connect_mesh(&network, party_id)
        .await
        .expect("failed to establish peer mesh");

    for (peer, channel) in channels.into_iter().enumerate() {
        if let Some((sink, stream)) = channel {
            bus.register_peer(peer, sink, stream).await;
            let is_accepting_side = peer < party_id;
            bus.send_handshake(peer, signing.address().clone(), is_accepting_side)
                .await
                .expect("handshake send failed");
        }
    }

    let sessions = Arc::new(SessionStore::new());
    spawn_session_gc(Arc::clone(&sessions));

    let initial_capacity = config
        .capacity_table
        .as_ref()
        .map(|path| load_capacity_table(path).expect("invalid capacity table"))
        .unwrap_or_default();
    let balances: HashMap<String, u64> = initial_capacity
        .into_iter()
        .map(|entry| (entry.token_address.to_lowercase(), entry.amount))
        .collect();
    let venue = StaticSwapVenue::new(balances, config.enable_external_swap);
    let inventory = Arc::new(InventoryHelper::new(venue));

    let ledger = Arc::new(
        FileLedgerAdapter::from_path(&config.event_endpoint.clone().into(), Arc::clone(&signing))
            .expect("failed to open event feed"),
    );

    let orchestrator = Orchestrator::new(party_id, bus, sessions, ledger.clone(), inventory, signing);

    tracing::info!(contract = %config.settlement_contract, "node ready, listening for intents");
    loop {
        match ledger.listen().await {
            Ok(event) => {
                let orchestrator = Arc::clone(&orchestrator);
                tokio::spawn(async move {
                    if let Err(error) = orchestrator.handle_intent_created(event).await {
                        tracing::warn!(%error, "intent handling failed");
                    }
                });
            }
            Err(error) => {
                tracing::warn!(%error, "event feed ended, shutting down");
                break;
            }
        }
    }
}

/// Sessions reaching a terminal status are retained for at least an hour
/// (spec §3) before `SessionStore::gc` reaps them; run that sweep on a
/// slow background interval rather than inline on the hot path.
const SESSION_GC_RETENTION: std::time::Duration = std::time::Duration::from_secs(3600);
const SESSION_GC_INTERVAL: std::time::Duration = std::time::Duration::from_secs(300);

fn spawn_session_gc(sessions: Arc<SessionStore>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SESSION_GC_INTERVAL).await;
            let removed = sessions.gc(SESSION_GC_RETENTION);
            if removed > 0 {
                tracing::debug!(removed, "garbage-collected terminal sessions");
            }
        }
    });
}

