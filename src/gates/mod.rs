pub mod dip;
pub mod entry;
pub mod guards;
pub mod premove;

pub use dip::{evaluate_dip_guards, DipDecision, DipInputs};
pub use entry::{EntryGateEngine, EntryGateReport, GateInputs, GateResult};
pub use guards::{
    evaluate_safety_guards, is_trade_allowed, summarize, GuardResult, GuardSummary,
    Recommendation, SafetyGuardInputs,
};
pub use premove::{evaluate_premove, PremoveDecision, PremoveInputs};
