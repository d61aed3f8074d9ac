use serde::Serialize;
use studio_contracts::errors::CapabilityError;
use studio_contracts::transcript::{ChatMessage, ChatTranscript};
use tracing::{debug, warn};

use crate::capability::{ChatSession, GenerationCapability};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Ready,
    AwaitingResponse,
}

/// Conversational mode: one session handle, one transcript, one turn in
/// flight.
///
/// A turn is split into `begin` (synchronous, appends the user message),
/// `PendingTurn::dispatch` (the remote call, on any thread) and `complete`
/// (appends the reply). The live handle travels inside the pending turn, so
/// a second turn cannot start until the first one comes back.
pub struct ChatSessionMachine {
    system_instruction: String,
    session: Option<Box<dyn ChatSession>>,
    transcript: ChatTranscript,
    state: SessionState,
    epoch: u64,
}

/// A submitted message whose reply has not arrived yet.
pub struct PendingTurn {
    epoch: u64,
    text: String,
    session: Result<Box<dyn ChatSession>, CapabilityError>,
}

pub struct TurnReply {
    epoch: u64,
    session: Option<Box<dyn ChatSession>>,
    result: Result<String, CapabilityError>,
}

impl TurnReply {
    pub fn result(&self) -> &Result<String, CapabilityError> {
        &self.result
    }
}

impl PendingTurn {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn dispatch(self) -> TurnReply {
        match self.session {
            Ok(mut session) => {
                let result = session.send(&self.text);
                TurnReply {
                    epoch: self.epoch,
                    session: Some(session),
                    result,
                }
            }
            Err(err) => TurnReply {
                epoch: self.epoch,
                session: None,
                result: Err(err),
            },
        }
    }
}

impl ChatSessionMachine {
    pub fn new(system_instruction: impl Into<String>) -> Self {
        Self {
            system_instruction: system_instruction.into(),
            session: None,
            transcript: ChatTranscript::new(),
            state: SessionState::Uninitialized,
            epoch: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transcript(&self) -> &ChatTranscript {
        &self.transcript
    }

    /// Starts a turn. Blank input and input while a reply is outstanding
    /// are ignored, leaving the transcript untouched.
    pub fn begin(
        &mut self,
        capability: &dyn GenerationCapability,
        text: &str,
    ) -> Option<PendingTurn> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if self.state == SessionState::AwaitingResponse {
            debug!("chat submit ignored while awaiting a reply");
            return None;
        }

        let session = match self.session.take() {
            Some(session) => Ok(session),
            None => capability.open_session(&self.system_instruction),
        };
        self.transcript.push(ChatMessage::user(text));
        self.state = SessionState::AwaitingResponse;
        Some(PendingTurn {
            epoch: self.epoch,
            text: text.to_string(),
            session,
        })
    }

    /// Applies a reply. Failures become one synthetic assistant message.
    /// Replies from before the last `reset` are dropped.
    pub fn complete(&mut self, reply: TurnReply) -> Option<&ChatMessage> {
        if reply.epoch != self.epoch {
            debug!("discarding reply from a previous chat session");
            return None;
        }
        let opened = reply.session.is_some();
        self.session = reply.session;
        let message = match reply.result {
            Ok(text) => ChatMessage::assistant(text),
            Err(err) => {
                warn!(cause = %err.cause, "chat turn failed");
                ChatMessage::synthetic_apology()
            }
        };
        self.transcript.push(message);
        self.state = if opened {
            SessionState::Ready
        } else {
            SessionState::Uninitialized
        };
        self.transcript.last()
    }

    /// Runs one whole turn on the calling thread. Returns whether the
    /// message was accepted.
    pub fn submit(&mut self, capability: &dyn GenerationCapability, text: &str) -> bool {
        let Some(turn) = self.begin(capability, text) else {
            return false;
        };
        let reply = turn.dispatch();
        self.complete(reply);
        true
    }

    pub fn reset(&mut self) {
        self.session = None;
        self.transcript = ChatTranscript::new();
        self.state = SessionState::Uninitialized;
        self.epoch += 1;
    }
}
