//! Wire message envelope and payload types for the point-to-point bus.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::sharing::PartyView;
use crate::PartyId;

/// Sentinel `to` value used before a channel's peer identity is known.
pub const PRE_HANDSHAKE: i64 = -1;

/// Discriminant for [`Envelope::payload`], used to route dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    HandshakeRequest,
    HandshakeResponse,
    ShareDistribution,
    ComputationRound,
    ReconstructionRequest,
    ReconstructionResponse,
    SettlementSignature,
    Ping,
    Pong,
}

/// The typed body of a message, one variant per [`MessageType`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Payload {
    Handshake {
        party_id: PartyId,
        blockchain_address: String,
    },
    ShareDistribution {
        intent_id: String,
        shares: Vec<(PartyId, PartyView)>,
    },
    ComputationRound {
        round: u32,
        shares: PartyView,
    },
    ReconstructionRequest {
        variable: String,
    },
    ReconstructionResponse {
        variable: String,
        shares: PartyView,
    },
    SettlementSignature {
        intent_id: String,
        amount: u64,
        signature: Vec<u8>,
    },
    Empty,
}

/// Every message exchanged between two parties.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub message_type: MessageType,
    pub from: PartyId,
    /// `-1` before the sender's identity is established via handshake.
    pub to: i64,
    /// `intent_id` for messages that precede session creation;
    /// `intent_id-xxxxxxxx` once a session exists (required for
    /// reconstruction messages to resolve local share storage).
    pub session_id: String,
    pub payload: Payload,
    pub timestamp_ms: u128,
}

impl Envelope {
    pub fn new(message_type: MessageType, from: PartyId, to: i64, session_id: String, payload: Payload) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        Envelope {
            message_type,
            from,
            to,
            session_id,
            payload,
            timestamp_ms,
        }
    }

    pub fn handshake_request(from: PartyId, blockchain_address: String) -> Self {
        Envelope::new(
            MessageType::HandshakeRequest,
            from,
            PRE_HANDSHAKE,
            String::new(),
            Payload::Handshake {
                party_id: from,
                blockchain_address,
            },
        )
    }

    pub fn handshake_response(from: PartyId, blockchain_address: String) -> Self {
        Envelope::new(
            MessageType::HandshakeResponse,
            from,
            PRE_HANDSHAKE,
            String::new(),
            Payload::Handshake {
                party_id: from,
                blockchain_address,
            },
        )
    }

    pub fn share_distribution(
        from: PartyId,
        to: PartyId,
        intent_id: String,
        shares: Vec<(PartyId, PartyView)>,
    ) -> Self {
        Envelope::new(
            MessageType::ShareDistribution,
            from,
            to as i64,
            intent_id.clone(),
            Payload::ShareDistribution { intent_id, shares },
        )
    }

    pub fn computation_round(from: PartyId, to: PartyId, session_id: String, round: u32, shares: PartyView) -> Self {
        Envelope::new(
            MessageType::ComputationRound,
            from,
            to as i64,
            session_id,
            Payload::ComputationRound { round, shares },
        )
    }

    pub fn reconstruction_request(from: PartyId, to: PartyId, session_id: String, variable: String) -> Self {
        Envelope::new(
            MessageType::ReconstructionRequest,
            from,
            to as i64,
            session_id,
            Payload::ReconstructionRequest { variable },
        )
    }

    pub fn reconstruction_response(
        from: PartyId,
        to: PartyId,
        session_id: String,
        variable: String,
        shares: PartyView,
    ) -> Self {
        Envelope::new(
            MessageType::ReconstructionResponse,
            from,
            to as i64,
            session_id,
            Payload::ReconstructionResponse { variable, shares },
        )
    }

    pub fn settlement_signature(
        from: PartyId,
        to: PartyId,
        intent_id: String,
        amount: u64,
        signature: Vec<u8>,
    ) -> Self {
        Envelope::new(
            MessageType::SettlementSignature,
            from,
            to as i64,
            intent_id.clone(),
            Payload::SettlementSignature {
                intent_id,
                amount,
                signature,
            },
        )
    }

    pub fn ping(from: PartyId, to: PartyId) -> Self {
        Envelope::new(MessageType::Ping, from, to as i64, String::new(), Payload::Empty)
    }

    pub fn pong(from: PartyId, to: PartyId) -> Self {
        Envelope::new(MessageType::Pong, from, to as i64, String::new(), Payload::Empty)
    }
}
