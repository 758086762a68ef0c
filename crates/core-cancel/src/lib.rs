//! Per-turn and per-agent cancellation (SS4.H). Wraps
//! `tokio_util::sync::CancellationToken` so the turn engine and the clone
//! factory (SS4.I) get hierarchical cancel-propagation for free: cancelling
//! a parent also cancels every child turn/clone, but cancelling a child never
//! touches its parent.

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// One per `AgentCore`. `agent_token` is the agent-lifetime handle; `current`
/// is the "Request mutex" of SS5 — a slot published on turn entry and
/// cleared on exit, so `stop_current_request` always targets the live turn
/// and a late call after the turn has ended finds the slot empty.
pub struct TurnCancellation {
    agent_token: CancellationToken,
    current: Mutex<Option<CancellationToken>>,
}

impl TurnCancellation {
    pub fn new() -> Self {
        Self { agent_token: CancellationToken::new(), current: Mutex::new(None) }
    }

    /// A token for an independent child agent (clone_sibling, SS4.I):
    /// cancelling `self` cancels it too, but cancelling it never touches
    /// `self`.
    pub fn child_token(&self) -> Self {
        Self { agent_token: self.agent_token.child_token(), current: Mutex::new(None) }
    }

    /// Publishes a fresh per-turn token as a child of the agent-lifetime
    /// token and returns it for the turn to pass down into every suspension
    /// point it awaits.
    pub async fn begin_turn(&self) -> CancellationToken {
        let turn_token = self.agent_token.child_token();
        *self.current.lock().await = Some(turn_token.clone());
        turn_token
    }

    /// Clears the published turn token. Always call on turn exit — normal,
    /// erroring, or cancelled — so a stray `stop_current_request` after exit
    /// is a no-op.
    pub async fn end_turn(&self) {
        *self.current.lock().await = None;
    }

    /// Cancels whatever turn is currently published, if any. Idempotent:
    /// `CancellationToken::cancel` is itself a no-op once already cancelled,
    /// and an empty slot (no live turn) is a no-op too.
    pub async fn stop_current_request(&self) {
        if let Some(token) = self.current.lock().await.as_ref() {
            token.cancel();
        }
    }

    /// Cancels the agent's entire lifetime, propagating to every turn and
    /// clone descended from it.
    pub fn shutdown(&self) {
        self.agent_token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.agent_token.is_cancelled()
    }

    /// The raw agent-lifetime token, for handing to a long-running loop
    /// (the heartbeat, SS4.F) that needs to race its own ticker against
    /// agent shutdown.
    pub fn agent_token(&self) -> CancellationToken {
        self.agent_token.clone()
    }
}

impl Default for TurnCancellation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_current_request_cancels_the_published_turn_token() {
        let cancel = TurnCancellation::new();
        let turn_token = cancel.begin_turn().await;
        assert!(!turn_token.is_cancelled());
        cancel.stop_current_request().await;
        assert!(turn_token.is_cancelled());
    }

    #[tokio::test]
    async fn stop_current_request_is_a_noop_with_no_live_turn() {
        let cancel = TurnCancellation::new();
        // No begin_turn() called — the slot is empty.
        cancel.stop_current_request().await;
    }

    #[tokio::test]
    async fn double_stop_is_a_noop() {
        let cancel = TurnCancellation::new();
        let turn_token = cancel.begin_turn().await;
        cancel.stop_current_request().await;
        cancel.stop_current_request().await;
        assert!(turn_token.is_cancelled());
    }

    #[tokio::test]
    async fn late_stop_after_turn_end_is_a_noop() {
        let cancel = TurnCancellation::new();
        let first_turn = cancel.begin_turn().await;
        cancel.end_turn().await;
        cancel.stop_current_request().await;
        // The first turn's token is untouched: the slot had already been cleared.
        assert!(!first_turn.is_cancelled());
    }

    #[tokio::test]
    async fn new_turn_after_stop_is_not_pre_cancelled() {
        let cancel = TurnCancellation::new();
        let first_turn = cancel.begin_turn().await;
        cancel.stop_current_request().await;
        cancel.end_turn().await;

        let second_turn = cancel.begin_turn().await;
        assert!(first_turn.is_cancelled());
        assert!(!second_turn.is_cancelled());
    }

    #[tokio::test]
    async fn shutdown_propagates_to_child_tokens() {
        let parent = TurnCancellation::new();
        let child = parent.child_token();
        let child_turn = child.begin_turn().await;

        parent.shutdown();
        assert!(child.is_shutting_down());
        assert!(child_turn.is_cancelled());
    }

    #[tokio::test]
    async fn cancelling_a_child_does_not_affect_the_parent() {
        let parent = TurnCancellation::new();
        let child = parent.child_token();
        child.shutdown();
        assert!(child.is_shutting_down());
        assert!(!parent.is_shutting_down());
    }
}
