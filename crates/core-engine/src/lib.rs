//! The turn engine (SS4.E): builds a prompt from session + memory, calls the
//! LLM, dispatches any requested tool calls, and produces a terminal
//! assistant reply. Grounded on the `aigent-runtime` crate —
//! `runtime/chat.rs`'s `respond_and_remember_stream` generalizes into
//! [`turn::TurnEngine::run_turn`], and `tool_loop.rs`'s `run_tool_loop` is
//! lifted near-verbatim into [`tool_loop`], extended with the depth/
//! partition/panic-isolation changes SS4.E.1 calls for.

mod prompt;
mod tool_loop;
mod turn;

pub use prompt::build_system_prompt;
pub use tool_loop::{run_tool_loop, ToolCallbacks, ToolLoopError};
pub use turn::{EngineServices, TurnEngine, TurnError, TurnOutcome};
