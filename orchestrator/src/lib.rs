pub mod error;
pub mod intent;
pub mod inventory;
pub mod ledger;
pub mod state_machine;

pub use error::OrchestratorError;
pub use intent::{Allocation, Intent, IntentStatus, SettlementSignature};
pub use inventory::{Balance, InventoryHelper};
pub use ledger::{IntentCreatedEvent, LedgerAdapter};
pub use state_machine::Orchestrator;
