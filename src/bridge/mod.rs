//! NFT Lock-and-Mint Bridge
//!
//! Moves an NFT from the source chain to the destination chain by locking it
//! in the source contract and minting a bridged copy on the destination.
//!
//! # State Machine
//!
//! ```text
//! CREATED → LOCK_SUBMITTED → LOCK_CONFIRMED → PROOF_EXTRACTED → MINT_SUBMITTED → MINT_CONFIRMED
//!     ↓            ↓                ↓                 ↓                 ↓
//!     └────────────┴──── FAILED (non-transient error / retry budget exhausted)
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Persist-After-Success**: each chain result is stored before the next operation starts
//! 2. **Single Writer**: at most one non-terminal record per asset (ledger) and
//!    one driving task per asset (in-process lease)
//! 3. **No Regression**: the ledger refuses to move a record backwards or out of a terminal stage
//! 4. **Proof Before Mint**: a mint is only ever built from the lock tx's own `Locked` event

pub mod coordinator;
pub mod error;
pub mod events;
pub mod fee;
pub mod ledger;
pub mod pool;
pub mod state;
pub mod types;
pub mod worker;


pub use coordinator::{OrchestratorConfig, TransferOrchestrator};
pub use error::BridgeError;
#[cfg(any(test, feature = "mock-chain"))]
pub use events::MemorySink;
pub use events::{EventSink, TracingSink, TransferEvent, TransferEventKind};
pub use fee::FeeEstimator;
pub use ledger::{MemoryLedger, PgLedger, TransferLedger};
pub use pool::{TransferOutcome, TransferPool};
pub use state::TransferStage;
pub use types::{TransferRecord, Transition};
pub use worker::{RecoveryReport, RecoveryScanner, WorkerConfig};
