//! Session orchestration: the detect, resolve, fetch, present workflow and
//! the state machine around it.

mod orchestrator;
mod types;

pub use orchestrator::SessionOrchestrator;
pub use types::{SessionEvent, SessionId, SessionSettings, SessionSnapshot, SessionState};
