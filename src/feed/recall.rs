//! "Do you remember this?" prompt scheduling.
//!
//! At most one prompt exists at a time. Each new evaluation supersedes whatever was
//! pending or visible, and pending prompts carry a ticket so a timer that fires
//! after being superseded is ignored.

use std::time::Duration;
use tokio::time::Instant;

/// The patient's answer to a recall prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecallResponse {
    Remembered,
    Forgotten,
}

/// A prompt waiting for its delay to elapse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPrompt {
    pub memory_id: String,
    pub due: Instant,
    pub ticket: u64,
}

/// What to do with scheduling state after a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecallDecision {
    pub memory_id: String,
    /// `true` when the memory should lose its cooldown entirely.
    pub clear_cooldown: bool,
}

#[derive(Debug)]
enum PromptState {
    Idle,
    Pending(PendingPrompt),
    Visible(String),
}

#[derive(Debug)]
pub struct RecallPromptScheduler {
    delay: Duration,
    state: PromptState,
    next_ticket: u64,
}

impl RecallPromptScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: PromptState::Idle,
            next_ticket: 0,
        }
    }

    /// Re-evaluate for the memory that just became current.
    ///
    /// Schedules a prompt when the memory is in the historical recall log but has
    /// not been recalled this session. Any earlier prompt is dropped either way.
    pub fn on_current_changed(
        &mut self,
        memory_id: &str,
        previously_recalled: bool,
        recalled_this_session: bool,
        now: Instant,
    ) -> Option<PendingPrompt> {
        if !matches!(self.state, PromptState::Idle) {
            tracing::debug!("superseding earlier recall prompt");
        }
        self.state = PromptState::Idle;

        if !previously_recalled || recalled_this_session {
            return None;
        }

        self.next_ticket += 1;
        let pending = PendingPrompt {
            memory_id: memory_id.to_string(),
            due: now + self.delay,
            ticket: self.next_ticket,
        };
        self.state = PromptState::Pending(pending.clone());
        Some(pending)
    }

    /// Timer callback. Shows the prompt only if `ticket` is still the pending one.
    pub fn fire(&mut self, ticket: u64) -> Option<String> {
        match &self.state {
            PromptState::Pending(p) if p.ticket == ticket => {
                let memory_id = p.memory_id.clone();
                self.state = PromptState::Visible(memory_id.clone());
                Some(memory_id)
            }
            _ => None,
        }
    }

    /// Clock-driven alternative to [`fire`](Self::fire).
    #[cfg(test)]
    fn poll(&mut self, now: Instant) -> Option<String> {
        match &self.state {
            PromptState::Pending(p) if now >= p.due => {
                let ticket = p.ticket;
                self.fire(ticket)
            }
            _ => None,
        }
    }

    /// Apply the patient's answer to the visible prompt.
    pub fn respond(&mut self, response: RecallResponse) -> Option<RecallDecision> {
        if !matches!(self.state, PromptState::Visible(_)) {
            return None;
        }
        let PromptState::Visible(memory_id) = std::mem::replace(&mut self.state, PromptState::Idle)
        else {
            return None;
        };
        Some(RecallDecision {
            memory_id,
            clear_cooldown: response == RecallResponse::Forgotten,
        })
    }

    pub fn cancel(&mut self) {
        self.state = PromptState::Idle;
    }

    #[cfg(test)]
    fn pending(&self) -> Option<&PendingPrompt> {
        match &self.state {
            PromptState::Pending(p) => Some(p),
            _ => None,
        }
    }

    pub fn visible(&self) -> Option<&str> {
        match &self.state {
            PromptState::Visible(id) => Some(id),
            _ => None,
        }
    }
}
