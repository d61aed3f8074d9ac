pub mod capability;
pub mod gemini;
pub mod orchestrator;
pub mod session;
pub mod studio;

#[cfg(test)]
mod testing;

pub use capability::{ChatSession, GenerationCapability};
pub use gemini::GeminiCapability;
pub use orchestrator::{FanOutOp, Orchestrator};
pub use session::{ChatSessionMachine, PendingTurn, SessionState, TurnReply};
pub use studio::{AssetSlot, Studio, StudioInputs, StudioSnapshot, Tab};
