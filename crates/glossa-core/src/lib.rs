pub mod checks;
pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod decision;
pub mod error;
pub mod guard;
pub mod poller;
pub mod sequencer;
pub mod store;
pub mod tasks;
pub mod validation;

pub use classifier::{is_transient, TransientErrorClassifier};
pub use config::{ConfigStore, ReviewConfig};
pub use coordinator::{
    ConflictChoice, MutationCoordinator, MutationOutcome, PendingConfirmation, PendingConflict,
};
pub use decision::{DecisionError, DecisionStateMachine, DecisionTransition};
pub use error::{ApiError, CommitFailure};
pub use guard::{CommitOutcome, CommitResult, CommitRetry, ConcurrencyGuard, ReviewBackend};
pub use poller::{poll, poll_cancellable, PollError, PollPolicy};
pub use sequencer::{AttemptSequencer, AttemptState, AttemptTicket};
pub use store::{UnitStore, UnitStoreError};
pub use tasks::{wait_for_task, TaskPollSettings, TaskSource, TaskWaitError};
pub use validation::{ContentValidator, GateVerdict, ValidationGate};

pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";
pub const DEFAULT_SERVER_PORT: u16 = 39741;
