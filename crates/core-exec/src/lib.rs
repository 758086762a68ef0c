//! Tool dispatch with safety policy, schema validation, and an interactive
//! approval gate (SS4.C/SS4.D). Tools themselves stay opaque: this crate only
//! ever sees `(name, description, json_schema, handler)` from `core-tools`.

mod approval;
mod error;
mod executor;
mod fake;
mod gate;
mod validate;

pub use approval::{
    approval_channel, ApprovalBridge, ApprovalDecision, ApprovalOutcome, ApprovalReceiver,
    ApprovalRequest, ApprovalSender, ChannelApprovalBridge,
};
pub use error::ToolErrorCategory;
pub use executor::{ToolExecutor, ToolPolicy};
pub use fake::FakeApprovalBridge;
pub use gate::ApprovalGate;
pub use validate::validate_args;
