//! Conversation state machine
//!
//! Elm-style: `transition` is pure and returns the next state plus the
//! effects the runtime must carry out. Results of those effects come back
//! as events.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::Event;
pub use state::{
    ChatState, ConnectionStatus, PendingRequest, RequestId, ANONYMOUS_USER, MAX_MESSAGE_CHARS,
    SESSION_HISTORY_LIMIT,
};
pub use transition::{transition, validate_message, TransitionError, TransitionResult};
