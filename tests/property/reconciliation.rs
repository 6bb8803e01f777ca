//! Property-based tests for the reconnect policy and message reconciliation.
//!
//! Uses proptest to verify:
//! 1. The n-th scheduled delay is `min(initial * 2^(n-1), max)` and the
//!    machine stops at `error` after `max_attempts` failed retries.
//! 2. Under any input sequence, `attempt` never exceeds the ceiling and is
//!    zero right after every successful open.
//! 3. Under any sequence of submits, replies, and connection failures,
//!    message status never moves backward, assistant messages are always
//!    delivered, and no message is left `sent` after a reply or failure.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use proptest::prelude::*;
use wirechat::chat::message::{MessageId, MessageStatus, Sender};
use wirechat::chat::{ConversationStore, Outbound};
use wirechat::config::ReconnectConfig;
use wirechat::connection::machine::{Action, ConnectionMachine, Input};
use wirechat::connection::{ConnectionError, ConnectionEvent, ConnectionStatus};

// --- Strategies ---

/// Strategy for reconnect policies, including caps below the initial delay.
fn arb_policy() -> impl Strategy<Value = ReconnectConfig> {
    (1u32..10, 1u64..5_000, 1u64..20_000).prop_map(|(max_attempts, initial, max)| {
        ReconnectConfig {
            max_attempts,
            initial_delay: Duration::from_millis(initial),
            max_delay: Duration::from_millis(max),
        }
    })
}

fn arb_input() -> impl Strategy<Value = Input> {
    prop_oneof![
        Just(Input::Connect),
        Just(Input::Disconnect),
        Just(Input::Opened),
        any::<bool>().prop_map(|clean| Input::Closed {
            clean,
            reason: None
        }),
        "[a-z]{1,8}".prop_map(Input::Failed),
        Just(Input::TimerFired),
    ]
}

#[derive(Debug, Clone)]
enum Op {
    Submit(String),
    Reply(String),
    Drop,
    Reconnect,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => "[ a-z]{0,12}".prop_map(Op::Submit),
        3 => "[a-z]{1,12}".prop_map(Op::Reply),
        1 => Just(Op::Drop),
        1 => Just(Op::Reconnect),
    ]
}

// --- Helpers ---

fn scheduled(actions: &[Action]) -> Option<Duration> {
    actions.iter().find_map(|a| match a {
        Action::Schedule(d) => Some(*d),
        _ => None,
    })
}

#[derive(Clone, Default)]
struct Recorder {
    sent: Rc<RefCell<Vec<String>>>,
}

impl Outbound for Recorder {
    fn send(&self, payload: &str) -> Result<(), ConnectionError> {
        self.sent.borrow_mut().push(payload.to_string());
        Ok(())
    }
}

fn rank(status: MessageStatus) -> u8 {
    match status {
        MessageStatus::Sent => 0,
        MessageStatus::Delivered | MessageStatus::Error => 1,
    }
}

// --- Properties ---

proptest! {
    #[test]
    fn backoff_schedule_matches_policy(policy in arb_policy()) {
        let mut machine = ConnectionMachine::new(policy);
        machine.handle(Input::Connect);
        machine.handle(Input::Opened);

        let mut delays = Vec::new();
        loop {
            let actions = machine.handle(Input::Closed { clean: false, reason: None });
            match scheduled(&actions) {
                Some(delay) => {
                    delays.push(delay);
                    machine.handle(Input::TimerFired);
                }
                None => break,
            }
            prop_assert!(delays.len() <= policy.max_attempts as usize);
        }

        prop_assert_eq!(delays.len(), policy.max_attempts as usize);
        for (i, delay) in delays.iter().enumerate() {
            let n = u32::try_from(i).unwrap() + 1;
            let formula = 2u32.checked_pow(n - 1).map_or(policy.max_delay, |factor| {
                policy.initial_delay.saturating_mul(factor).min(policy.max_delay)
            });
            prop_assert_eq!(*delay, policy.delay_for_failure(n));
            prop_assert_eq!(*delay, formula);
            prop_assert!(*delay <= policy.max_delay);
        }
        prop_assert_eq!(machine.status(), ConnectionStatus::Error);
        prop_assert!(machine.handle(Input::TimerFired).is_empty());
    }

    #[test]
    fn attempt_is_bounded_and_reset_on_open(
        policy in arb_policy(),
        inputs in prop::collection::vec(arb_input(), 0..64),
    ) {
        let mut machine = ConnectionMachine::new(policy);
        for input in inputs {
            let was_connecting = machine.status() == ConnectionStatus::Connecting;
            let opened = input == Input::Opened;
            machine.handle(input);

            prop_assert!(machine.state().attempt <= policy.max_attempts);
            prop_assert!(machine.state().backoff <= policy.max_delay);
            if opened && was_connecting {
                prop_assert_eq!(machine.state().attempt, 0);
                prop_assert_eq!(machine.status(), ConnectionStatus::Connected);
                prop_assert!(machine.state().last_error.is_none());
            }
            if machine.status() != ConnectionStatus::Disconnected {
                prop_assert!(!machine.reconnect_pending());
            }
        }
    }

    #[test]
    fn reconciliation_invariants_hold(ops in prop::collection::vec(arb_op(), 0..48)) {
        let recorder = Recorder::default();
        let mut store = ConversationStore::new(recorder.clone());
        store.apply(&ConnectionEvent::StatusChanged(ConnectionStatus::Connected));

        let mut previous: HashMap<MessageId, MessageStatus> = HashMap::new();
        let mut accepted = 0usize;

        for op in ops {
            let connected = store.connection_status() == ConnectionStatus::Connected;
            match &op {
                Op::Submit(text) => {
                    let id = store.submit(text);
                    let should_accept = connected && !text.trim().is_empty();
                    prop_assert_eq!(id.is_some(), should_accept);
                    if should_accept {
                        accepted += 1;
                    }
                }
                Op::Reply(text) => {
                    store.apply(&ConnectionEvent::Inbound(text.clone()));
                }
                Op::Drop => {
                    store.apply(&ConnectionEvent::StatusChanged(ConnectionStatus::Disconnected));
                }
                Op::Reconnect => {
                    store.apply(&ConnectionEvent::StatusChanged(ConnectionStatus::Connected));
                }
            }

            for message in store.messages() {
                if message.sender() == Sender::Assistant {
                    prop_assert_eq!(message.status(), MessageStatus::Delivered);
                }
                if let Some(before) = previous.get(&message.id()) {
                    prop_assert!(rank(message.status()) >= rank(*before));
                    if *before != MessageStatus::Sent {
                        prop_assert_eq!(message.status(), *before);
                    }
                }
            }

            if matches!(op, Op::Reply(_) | Op::Drop) {
                prop_assert!(store.messages().iter().all(|m| m.status() != MessageStatus::Sent));
                prop_assert!(!store.awaiting_reply());
            }

            previous = store
                .messages()
                .iter()
                .map(|m| (m.id(), m.status()))
                .collect();
        }

        let users = store.messages().iter().filter(|m| m.sender() == Sender::User).count();
        prop_assert_eq!(users, accepted);
        prop_assert_eq!(recorder.sent.borrow().len(), accepted);
    }

    #[test]
    fn failure_never_touches_delivered(pending in 0usize..8, delivered in 0usize..8) {
        let mut store = ConversationStore::new(Recorder::default());
        store.apply(&ConnectionEvent::StatusChanged(ConnectionStatus::Connected));

        for i in 0..delivered {
            store.submit(&format!("d{i}"));
        }
        store.on_inbound_payload("ack");
        for i in 0..pending {
            store.submit(&format!("p{i}"));
        }
        store.on_connection_error();

        let count = |status| {
            store
                .messages()
                .iter()
                .filter(|m| m.sender() == Sender::User && m.status() == status)
                .count()
        };
        prop_assert_eq!(count(MessageStatus::Error), pending);
        prop_assert_eq!(count(MessageStatus::Delivered), delivered);
        prop_assert_eq!(count(MessageStatus::Sent), 0);
    }
}
