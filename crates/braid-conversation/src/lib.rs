pub mod credit_gate;
pub mod ops;
pub mod system_prompt;

pub use credit_gate::CreditGate;
pub use ops::{ConversationOps, NextStep, OpOutcome};
pub use system_prompt::{compose, CliModeConfig, ModelCapabilities};
