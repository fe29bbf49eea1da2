pub mod ledger;
pub mod notifier;

pub use ledger::{
    Decision, DecisionDraft, DecisionKind, DecisionLedger, DecisionResult, LedgerRecord, OptimizationTarget,
};
pub use notifier::TelegramNotifier;
