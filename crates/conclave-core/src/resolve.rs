//! Reconciling divergent role views across peers.
//!
//! Gossip delivers answers from nodes whose local view may trail the
//! protocol by several rounds. The resolver folds the answer stream into a
//! single belief: it tracks a candidate holder, the Lamport window of the
//! answers supporting it, and a vote count. Older conflicting answers are
//! discarded; a strictly newer conflicting answer replaces the belief
//! outright.

use crate::role::{RoleStatus, NO_HOLDER};
use crate::time::LamportWindow;

pub use crate::payload::RoleReply;

/// Folds peer answers to a role query until a quorum agrees.
#[derive(Debug)]
pub struct RoleResolver {
    answer: String,
    answer_status: RoleStatus,
    votes: usize,
    required: usize,
    window: LamportWindow,
}

impl RoleResolver {
    pub fn new(initial_required: usize) -> Self {
        Self {
            answer: String::new(),
            answer_status: RoleStatus::Invalid,
            votes: 0,
            required: initial_required,
            window: LamportWindow::new(),
        }
    }

    /// Feeds one peer answer into the fold. `required_for_population` is
    /// the quorum derived from the responder's member count.
    ///
    /// Returns the consensus holder as soon as a quorum of consistent
    /// answers has been seen; `None` until then.
    pub fn observe(&mut self, reply: &RoleReply, required_for_population: usize) -> Option<String> {
        if required_for_population > self.required {
            self.required = required_for_population;
        }

        if reply.holder == NO_HOLDER {
            // the responder has no record at all
            return None;
        }

        if reply.holder != self.answer && self.window.before(reply.time) {
            // older than everything supporting the current belief
            return None;
        }

        if !reply.status.agrees_with(self.answer_status) && self.window.after(reply.time) {
            // a different story, newer than anything we have: adopt it
            self.votes = 1;
            self.window = LamportWindow::new();
            self.window.witness(reply.time);
            self.answer = reply.holder.clone();
            self.answer_status = reply.status;
        }

        if reply.holder == self.answer {
            self.votes += 1;
            self.window.witness(reply.time);
        }

        if self.votes >= self.required {
            return Some(self.answer.clone());
        }
        None
    }

    pub fn required(&self) -> usize {
        self.required
    }
}
