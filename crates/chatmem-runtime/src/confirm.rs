//! [`ConfirmationLedger`] – two-step confirmation for destructive commands.
//!
//! Each conversation (session) has at most one pending destructive action.
//! The first request for an action records it and asks for confirmation;
//! repeating the same action with confirmation runs it, repeating it without
//! confirmation cancels it.  Any non-destructive command on the session drops
//! whatever was pending, so a confirmation can never leak across unrelated
//! turns.

use std::collections::HashMap;

use parking_lot::Mutex;

/// A destructive action awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    /// Remove every memo from the active file.
    ClearAll,
    /// Delete the named memory file (resolved on-disk name).
    DeleteFile(String),
}

/// What the dispatcher should do with a destructive request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Execute,
    Abort,
    RequireConfirmation,
}

/// Per-session record of pending destructive actions.
#[derive(Debug, Default)]
pub struct ConfirmationLedger {
    pending: Mutex<HashMap<String, PendingAction>>,
}

impl ConfirmationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide what to do with `action` requested on `session`.
    ///
    /// | pending matches `action` | `confirmed` | verdict |
    /// |---|---|---|
    /// | yes | yes | [`Verdict::Execute`] |
    /// | yes | no | [`Verdict::Abort`] |
    /// | no | either | [`Verdict::RequireConfirmation`] (and `action` becomes pending) |
    pub fn evaluate(&self, session: &str, action: PendingAction, confirmed: bool) -> Verdict {
        let mut pending = self.pending.lock();
        if pending.get(session) == Some(&action) {
            pending.remove(session);
            if confirmed {
                Verdict::Execute
            } else {
                Verdict::Abort
            }
        } else {
            pending.insert(session.to_string(), action);
            Verdict::RequireConfirmation
        }
    }

    /// Drop the pending action of `session`, returning it if there was one.
    pub fn clear(&self, session: &str) -> Option<PendingAction> {
        self.pending.lock().remove(session)
    }

    /// The action currently awaiting confirmation on `session`.
    pub fn pending(&self, session: &str) -> Option<PendingAction> {
        self.pending.lock().get(session).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_requires_confirmation() {
        let ledger = ConfirmationLedger::new();
        assert_eq!(
            ledger.evaluate("s1", PendingAction::ClearAll, true),
            Verdict::RequireConfirmation
        );
        assert_eq!(ledger.pending("s1"), Some(PendingAction::ClearAll));
    }

    #[test]
    fn confirmed_repeat_executes_once() {
        let ledger = ConfirmationLedger::new();
        ledger.evaluate("s1", PendingAction::ClearAll, false);
        assert_eq!(ledger.evaluate("s1", PendingAction::ClearAll, true), Verdict::Execute);
        assert_eq!(ledger.pending("s1"), None);
        // A third call starts over.
        assert_eq!(
            ledger.evaluate("s1", PendingAction::ClearAll, true),
            Verdict::RequireConfirmation
        );
    }

    #[test]
    fn unconfirmed_repeat_aborts() {
        let ledger = ConfirmationLedger::new();
        ledger.evaluate("s1", PendingAction::ClearAll, false);
        assert_eq!(ledger.evaluate("s1", PendingAction::ClearAll, false), Verdict::Abort);
        assert_eq!(ledger.pending("s1"), None);
    }

    #[test]
    fn different_action_replaces_pending() {
        let ledger = ConfirmationLedger::new();
        ledger.evaluate("s1", PendingAction::DeleteFile("a.db".into()), false);
        assert_eq!(
            ledger.evaluate("s1", PendingAction::DeleteFile("b.db".into()), true),
            Verdict::RequireConfirmation
        );
        assert_eq!(ledger.pending("s1"), Some(PendingAction::DeleteFile("b.db".into())));
    }

    #[test]
    fn sessions_do_not_share_pending_state() {
        let ledger = ConfirmationLedger::new();
        ledger.evaluate("alice", PendingAction::ClearAll, false);
        assert_eq!(
            ledger.evaluate("bob", PendingAction::ClearAll, true),
            Verdict::RequireConfirmation
        );
        assert_eq!(ledger.evaluate("alice", PendingAction::ClearAll, true), Verdict::Execute);
    }

    #[test]
    fn clear_drops_pending() {
        let ledger = ConfirmationLedger::new();
        ledger.evaluate("s1", PendingAction::ClearAll, false);
        assert_eq!(ledger.clear("s1"), Some(PendingAction::ClearAll));
        assert_eq!(
            ledger.evaluate("s1", PendingAction::ClearAll, true),
            Verdict::RequireConfirmation
        );
    }
}
