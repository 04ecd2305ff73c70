//! Orchestration-level error taxonomy: everything layered on top of
//! [`mpc::CoreError`] once shares, sessions and the wire are involved.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Core(#[from] mpc::CoreError),

    #[error("peer unreachable or connection dropped: {0}")]
    NetworkTransient(String),

    #[error("settlement transaction was rejected: {0}")]
    LedgerRejected(String),

    #[error("startup configuration is invalid: {0}")]
    ConfigInvalid(String),

    #[error("no source token has sufficient balance to fund a swap into {0}")]
    NoSwapSource(String),
}
