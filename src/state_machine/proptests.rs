//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across arbitrary event sequences.

use super::state::*;
use super::transition::*;
use super::*;
use crate::config::{ClientConfig, ConfigPatch};
use crate::model::{MessageFormat, Session};
use crate::realtime::{ChannelEvent, InboundEvent, InboundMessage};
use crate::transport::{ApiError, ChatResponse, MessageContext};
use chrono::{DateTime, Utc};
use proptest::prelude::*;
use serde_json::Value;
use std::collections::HashSet;

// ============================================================================
// Test Helpers
// ============================================================================

fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn config_with_retention(retention: usize) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.message_retention = retention;
    config
}

/// Apply an event, keeping the old state when the event is rejected
fn step(state: ChatState, event: Event) -> (ChatState, Vec<Effect>) {
    match transition(&state, now(), event) {
        Ok(result) => (result.new_state, result.effects),
        Err(_) => (state, vec![]),
    }
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

/// Operations that add, answer or trim messages
#[derive(Debug, Clone)]
enum MessageOp {
    Send(String),
    /// Answer the n-th pending request (modulo the pending count)
    Respond(usize, Option<String>),
    Fail(usize),
    Cancel(usize),
    Push(String),
    Retention(usize),
}

fn arb_message_op() -> impl Strategy<Value = MessageOp> {
    prop_oneof![
        4 => "[a-z]{1,12}".prop_map(MessageOp::Send),
        3 => (any::<usize>(), proptest::option::of("s[0-3]")).prop_map(|(n, s)| MessageOp::Respond(n, s)),
        1 => any::<usize>().prop_map(MessageOp::Fail),
        1 => any::<usize>().prop_map(MessageOp::Cancel),
        2 => "[a-z]{1,12}".prop_map(MessageOp::Push),
        1 => (1usize..8).prop_map(MessageOp::Retention),
    ]
}

fn pick(state: &ChatState, n: usize) -> Option<RequestId> {
    let pending = state.pending_requests();
    (!pending.is_empty()).then(|| pending[n % pending.len()].request_id)
}

fn to_event(state: &ChatState, op: MessageOp) -> Option<Event> {
    Some(match op {
        MessageOp::Send(text) => Event::UserMessage {
            request_id: RequestId::new(),
            text,
            context: MessageContext::default(),
        },
        MessageOp::Respond(n, session_id) => Event::MessageResponse {
            request_id: pick(state, n)?,
            response: ChatResponse {
                session_id,
                message: Some("reply".to_string()),
                ..Default::default()
            },
        },
        MessageOp::Fail(n) => Event::MessageFailed {
            request_id: pick(state, n)?,
            error: ApiError::network("offline"),
        },
        MessageOp::Cancel(n) => Event::CancelRequest {
            request_id: pick(state, n)?,
        },
        MessageOp::Push(text) => Event::Channel(ChannelEvent::Inbound(InboundEvent::Message(
            InboundMessage {
                content: Value::String(text),
                format: Some(MessageFormat::Text),
                metadata: None,
                session_id: None,
                suggested_actions: vec![],
            },
        ))),
        MessageOp::Retention(n) => Event::UpdateConfig {
            patch: ConfigPatch {
                message_retention: Some(n),
                ..Default::default()
            },
        },
    })
}

fn arb_session_id() -> impl Strategy<Value = String> {
    "s[0-9]{1,2}".prop_map(String::from)
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Stored messages keep insertion order and never exceed retention
    #[test]
    fn prop_messages_ordered_and_bounded(
        retention in 1usize..12,
        ops in proptest::collection::vec(arb_message_op(), 0..60),
    ) {
        let mut state = ChatState::new(config_with_retention(retention));
        for op in ops {
            let Some(event) = to_event(&state, op) else { continue };
            let before_last = state.last_message().map(|m| m.id);
            let (next, _) = step(state, event);
            state = next;

            prop_assert!(state.messages().len() <= state.config().message_retention);
            prop_assert!(state.messages().windows(2).all(|w| w[0].id < w[1].id));
            if let (Some(before), Some(after)) = (before_last, state.last_message().map(|m| m.id)) {
                prop_assert!(after >= before);
            }
        }
    }

    /// Every message request ends in exactly one outcome
    #[test]
    fn prop_each_failure_appends_one_error_reply(
        ops in proptest::collection::vec(arb_message_op(), 0..40),
    ) {
        let mut state = ChatState::new(config_with_retention(1000));
        let mut expected_errors = 0;
        for op in ops {
            if matches!(op, MessageOp::Retention(_)) {
                continue;
            }
            let is_fail = matches!(op, MessageOp::Fail(_));
            let Some(event) = to_event(&state, op) else { continue };
            if is_fail {
                expected_errors += 1;
            }
            state = step(state, event).0;
        }
        let errors = state.messages().iter().filter(|m| m.error).count();
        prop_assert_eq!(errors, expected_errors);
    }

    /// Session history never holds duplicates, stays capped, and the last
    /// upsert is always in front
    #[test]
    fn prop_session_upsert_unique_front_capped(
        ids in proptest::collection::vec(arb_session_id(), 1..40),
    ) {
        let mut state = ChatState::default();
        for id in &ids {
            let (next, effects) = step(state, Event::SetSession { session: Session::new(id.clone()) });
            state = next;

            let history = state.session_history();
            let unique: HashSet<_> = history.iter().map(|s| &s.session_id).collect();
            prop_assert_eq!(unique.len(), history.len());
            prop_assert!(history.len() <= SESSION_HISTORY_LIMIT);
            prop_assert_eq!(&history[0].session_id, id);
            prop_assert_eq!(state.current_session_id(), Some(id.as_str()));
            let persisted = matches!(effects.as_slice(), [Effect::PersistSessions { .. }]);
            prop_assert!(persisted);
        }
    }

    /// Upserting an existing session keeps its fields and overlays new ones
    #[test]
    fn prop_session_upsert_merges(
        id in arb_session_id(),
        user in "[a-z]{3,8}",
        flag in any::<bool>(),
    ) {
        let mut original = Session::new(id.clone());
        original.user_id = Some(user.clone());
        let mut update = Session::new(id.clone());
        update.extra.insert("active".to_string(), Value::Bool(flag));

        let mut state = ChatState::default();
        state.upsert_session(original);
        state.upsert_session(Session::new("other"));
        let merged = state.upsert_session(update);

        prop_assert_eq!(merged.user_id.as_deref(), Some(user.as_str()));
        prop_assert_eq!(&merged.extra["active"], &Value::Bool(flag));
        prop_assert_eq!(&state.session_history()[0].session_id, &id);
        prop_assert_eq!(state.session_history().len(), 2);
    }

    /// Remote closes reconnect with delay base * attempts-so-far and stop at the cap
    #[test]
    fn prop_reconnect_bounded(max_attempts in 0u32..8, auto in any::<bool>()) {
        let mut config = ClientConfig::default();
        config.max_reconnect_attempts = max_attempts;
        config.auto_reconnect = auto;
        let base = config.reconnect_base_delay;

        let (mut state, _) = step(ChatState::new(config), Event::Connect);
        state = step(state, Event::Channel(ChannelEvent::Opened)).0;

        let mut scheduled = 0;
        for _ in 0..(max_attempts + 3) {
            let (next, effects) = step(state, Event::Channel(ChannelEvent::Closed { locally_initiated: false }));
            state = next;
            match effects.as_slice() {
                [Effect::ScheduleReconnect { delay, attempt }] => {
                    prop_assert_eq!(*delay, base * state.reconnect_attempts());
                    prop_assert_eq!(*attempt, state.reconnect_attempts() + 1);
                    scheduled += 1;
                    state = step(state, Event::ReconnectTimer { attempt: *attempt }).0;
                }
                [] => break,
                other => prop_assert!(false, "unexpected effects {:?}", other),
            }
            prop_assert!(state.reconnect_attempts() <= max_attempts);
        }
        prop_assert_eq!(scheduled, if auto { max_attempts } else { 0 });
    }

    /// Only the newest typing timer clears the indicator
    #[test]
    fn prop_typing_newest_timer_wins(flags in proptest::collection::vec(any::<bool>(), 1..10)) {
        let mut state = ChatState::default();
        for is_typing in &flags {
            state = step(state, Event::Channel(ChannelEvent::Inbound(InboundEvent::Typing { is_typing: *is_typing }))).0;
        }
        let newest = state.typing_generation;
        prop_assert_eq!(state.is_typing(), *flags.last().unwrap());

        for stale in 0..newest {
            let (next, _) = step(state.clone(), Event::TypingTimeout { generation: stale });
            prop_assert_eq!(next.is_typing(), state.is_typing());
        }
        let (cleared, _) = step(state, Event::TypingTimeout { generation: newest });
        prop_assert!(!cleared.is_typing());
    }

    /// Rejected sends leave the state untouched
    #[test]
    fn prop_rejected_send_is_noop(spaces in "[ \t\n]{0,5}") {
        let state = ChatState::default();
        let result = transition(&state, now(), Event::UserMessage {
            request_id: RequestId::new(),
            text: spaces,
            context: MessageContext::default(),
        });
        prop_assert_eq!(result.unwrap_err(), TransitionError::EmptyMessage);
    }
}
