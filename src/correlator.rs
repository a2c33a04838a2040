//! Action/response correlation.
//!
//! The [`Correlator`] owns every in-flight [`Action`] and routes inbound
//! messages to them by ActionID:
//!
//! - `Response`/`Error`: terminal for plain actions; for causal actions the
//!   first `Response` only opens the event list
//! - `Event` for a causal action: appended to that action; the terminator
//!   event completes it
//! - any other `Event`: unsolicited, returned to the caller for broadcast
//!
//! A `Response`/`Error` whose ActionID is unknown means correlation state can
//! no longer be trusted and is reported as [`AmiError::UnknownActionId`].

use std::collections::{HashMap, HashSet};

use bytes::Bytes;

use crate::error::{AmiError, Result};
use crate::message::{Action, Event, Message, Response};
use crate::transport::Transport;

/// Tables of in-flight actions for one connection.
#[derive(Debug, Default)]
pub struct Correlator {
    /// Every dispatched action until its terminal message.
    pending: HashMap<String, Action>,
    /// Ids of causal actions still waiting for their terminator event.
    pending_causal: HashSet<String>,
}

impl Correlator {
    /// Create empty tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `action` and return its wire form.
    pub fn register(&mut self, action: Action) -> Bytes {
        let bytes = action.encode();
        let id = action.action_id().to_string();
        if action.has_causal_events() {
            self.pending_causal.insert(id.clone());
        }
        self.pending.insert(id, action);
        bytes
    }

    /// Track `action` and write it to `transport`.
    ///
    /// Returns the ActionID. If the write fails the action is dropped from
    /// the tables and its callback receives [`AmiError::ConnectionClosed`].
    pub fn dispatch<T: Transport>(&mut self, action: Action, transport: &mut T) -> Result<String> {
        tracing::trace!("[SEND] {}", action);
        let id = action.action_id().to_string();
        let bytes = self.register(action);

        if let Err(e) = transport.write(bytes) {
            tracing::warn!(action_id = %id, "failed to hand action to transport: {}", e);
            self.pending_causal.remove(&id);
            if let Some(mut action) = self.pending.remove(&id) {
                action.complete(Err(AmiError::ConnectionClosed));
            }
            return Err(e);
        }

        Ok(id)
    }

    /// Route one inbound message.
    ///
    /// Returns `Some(event)` for events not tied to a causal action.
    pub fn on_message(&mut self, message: Message) -> Result<Option<Event>> {
        match message {
            Message::Event(event) => Ok(self.route_event(event)),
            Message::Response(response) => {
                let id = action_id_of(response.action_id());
                self.route_terminal(id, Ok(response))?;
                Ok(None)
            }
            Message::Error(error) => {
                let id = action_id_of(error.action_id());
                self.route_terminal(id, Err(AmiError::Action(error)))?;
                Ok(None)
            }
        }
    }

    /// Complete every pending action with [`AmiError::ConnectionClosed`].
    pub fn fail_all(&mut self) {
        self.pending_causal.clear();
        for (_, mut action) in self.pending.drain() {
            action.complete(Err(AmiError::ConnectionClosed));
        }
    }

    /// Check whether `action_id` is awaiting a terminal message.
    pub fn is_pending(&self, action_id: &str) -> bool {
        self.pending.contains_key(action_id)
    }

    /// Check whether `action_id` is a causal action awaiting its terminator.
    pub fn is_causal_pending(&self, action_id: &str) -> bool {
        self.pending_causal.contains(action_id)
    }

    /// Number of in-flight actions.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn route_event(&mut self, event: Event) -> Option<Event> {
        let id = match event.action_id() {
            Some(id) if self.pending_causal.contains(id) => Some(id.to_string()),
            _ => None,
        };
        let Some(id) = id else {
            return Some(event);
        };

        let Some(action) = self.pending.get_mut(&id) else {
            self.pending_causal.remove(&id);
            return Some(event);
        };

        if action.push_event(event) {
            self.pending_causal.remove(&id);
            if let Some(mut action) = self.pending.remove(&id) {
                action.complete_with_events();
            }
        }
        None
    }

    fn route_terminal(&mut self, id: String, outcome: Result<Response>) -> Result<()> {
        let Some(action) = self.pending.get_mut(&id) else {
            return Err(AmiError::UnknownActionId(id));
        };

        match outcome {
            Ok(response) if action.has_causal_events() => {
                // The first Response opens the event list; a second one has
                // nothing left to answer.
                if action.has_response() {
                    self.pending_causal.remove(&id);
                    self.pending.remove(&id);
                    return Err(AmiError::UnknownActionId(id));
                }
                action.attach_response(response);
            }
            outcome => {
                self.pending_causal.remove(&id);
                if let Some(mut action) = self.pending.remove(&id) {
                    action.complete(outcome);
                }
            }
        }
        Ok(())
    }
}

fn action_id_of(id: Option<&str>) -> String {
    id.unwrap_or("<none>").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ErrorResponse, Headers};
    use std::sync::mpsc;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs.iter().copied().collect()
    }

    fn tracked(name: &str) -> (Action, mpsc::Receiver<Result<Response>>) {
        let (tx, rx) = mpsc::channel();
        let action = Action::new(name, Headers::new()).on_complete(move |result| {
            let _ = tx.send(result);
        });
        (action, rx)
    }

    fn response(id: &str) -> Message {
        Message::Response(Response::with_headers(headers(&[("ActionID", id)])))
    }

    fn event(name: &str, id: &str) -> Message {
        Message::Event(Event::with_headers(name, headers(&[("ActionID", id)])))
    }

    #[test]
    fn test_dispatch_writes_and_tracks() {
        let mut correlator = Correlator::new();
        let mut wire: Vec<Bytes> = Vec::new();
        let (action, _rx) = tracked("Command");
        let expected = action.encode();

        let id = correlator.dispatch(action, &mut wire).unwrap();

        assert_eq!(wire, vec![expected]);
        assert!(correlator.is_pending(&id));
        assert!(!correlator.is_causal_pending(&id));
    }

    #[test]
    fn test_plain_action_completes_on_response() {
        let mut correlator = Correlator::new();
        let (action, rx) = tracked("ping");
        let id = action.action_id().to_string();
        correlator.register(action);

        assert_eq!(correlator.on_message(response(&id)).unwrap(), None);

        let result = rx.try_recv().unwrap();
        assert_eq!(result.unwrap().action_id(), Some(id.as_str()));
        assert!(rx.try_recv().is_err());
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_error_completes_without_failing_correlator() {
        let mut correlator = Correlator::new();
        let (action, rx) = tracked("status");
        let id = action.action_id().to_string();
        correlator.register(action);

        let error = ErrorResponse::with_headers(headers(&[
            ("ActionID", id.as_str()),
            ("Message", "Action failed"),
        ]));
        correlator.on_message(Message::Error(error)).unwrap();

        match rx.try_recv().unwrap() {
            Err(AmiError::Action(error)) => assert_eq!(error.message(), Some("Action failed")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!correlator.is_pending(&id));
        assert!(!correlator.is_causal_pending(&id));
    }

    #[test]
    fn test_error_mid_causal_list_completes_action() {
        let mut correlator = Correlator::new();
        let (action, rx) = tracked("sippeers");
        let id = action.action_id().to_string();
        correlator.register(action);

        correlator.on_message(response(&id)).unwrap();
        assert_eq!(correlator.on_message(event("PeerEntry", &id)).unwrap(), None);
        assert!(rx.try_recv().is_err());

        let error = ErrorResponse::with_headers(headers(&[
            ("ActionID", id.as_str()),
            ("Message", "Permission denied"),
        ]));
        correlator.on_message(Message::Error(error)).unwrap();

        match rx.try_recv().unwrap() {
            Err(AmiError::Action(error)) => assert_eq!(error.message(), Some("Permission denied")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!correlator.is_pending(&id));
        assert!(!correlator.is_causal_pending(&id));

        // The list is over; a late terminator is just another event.
        assert!(correlator
            .on_message(event("PeerlistComplete", &id))
            .unwrap()
            .is_some());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_causal_action_collects_events_until_terminator() {
        let mut correlator = Correlator::new();
        let (action, rx) = tracked("sippeers");
        let id = action.action_id().to_string();
        correlator.register(action);
        assert!(correlator.is_causal_pending(&id));

        correlator.on_message(response(&id)).unwrap();
        assert!(rx.try_recv().is_err());

        correlator.on_message(event("PeerEntry", &id)).unwrap();
        assert!(rx.try_recv().is_err());

        assert_eq!(correlator.on_message(event("PeerlistComplete", &id)).unwrap(), None);

        let response = rx.try_recv().unwrap().unwrap();
        let names: Vec<_> = response.events().iter().map(Event::name).collect();
        assert_eq!(names, vec!["PeerEntry", "PeerlistComplete"]);
        assert_eq!(response.action_id(), Some(id.as_str()));
        assert!(rx.try_recv().is_err());
        assert!(!correlator.is_causal_pending(&id));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_events_after_completion_are_unsolicited() {
        let mut correlator = Correlator::new();
        let (action, _rx) = tracked("status");
        let id = action.action_id().to_string();
        correlator.register(action);

        correlator.on_message(response(&id)).unwrap();
        correlator.on_message(event("StatusComplete", &id)).unwrap();

        let late = correlator.on_message(event("Status", &id)).unwrap();
        assert_eq!(late.map(|e| e.name().to_string()).as_deref(), Some("Status"));
    }

    #[test]
    fn test_unsolicited_event_is_returned() {
        let mut correlator = Correlator::new();
        let hangup = Message::Event(Event::with_headers("Hangup", headers(&[("Channel", "SIP/1")])));

        let routed = correlator.on_message(hangup).unwrap();
        assert_eq!(routed.map(|e| e.name().to_string()).as_deref(), Some("Hangup"));
    }

    #[test]
    fn test_event_for_plain_action_is_unsolicited() {
        let mut correlator = Correlator::new();
        let (action, rx) = tracked("originate");
        let id = action.action_id().to_string();
        correlator.register(action);

        let routed = correlator.on_message(event("OriginateResponse", &id)).unwrap();

        assert!(routed.is_some());
        assert!(correlator.is_pending(&id));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unknown_action_id_is_fatal() {
        let mut correlator = Correlator::new();
        let result = correlator.on_message(response("nobody"));
        assert!(matches!(result, Err(AmiError::UnknownActionId(id)) if id == "nobody"));
    }

    #[test]
    fn test_second_response_for_causal_action_is_fatal() {
        let mut correlator = Correlator::new();
        let (action, _rx) = tracked("queuestatus");
        let id = action.action_id().to_string();
        correlator.register(action);

        correlator.on_message(response(&id)).unwrap();
        assert!(matches!(
            correlator.on_message(response(&id)),
            Err(AmiError::UnknownActionId(_))
        ));
    }

    #[test]
    fn test_fail_all_resolves_everything_once() {
        let mut correlator = Correlator::new();
        let (plain, plain_rx) = tracked("ping");
        let (causal, causal_rx) = tracked("coreshowchannels");
        let causal_id = causal.action_id().to_string();
        correlator.register(plain);
        correlator.register(causal);
        correlator.on_message(response(&causal_id)).unwrap();
        correlator.on_message(event("CoreShowChannel", &causal_id)).unwrap();

        correlator.fail_all();

        assert!(matches!(plain_rx.try_recv(), Ok(Err(AmiError::ConnectionClosed))));
        assert!(matches!(causal_rx.try_recv(), Ok(Err(AmiError::ConnectionClosed))));
        assert_eq!(correlator.pending_count(), 0);
        assert!(!correlator.is_causal_pending(&causal_id));
    }

    #[test]
    fn test_failed_write_completes_action() {
        struct Closed;
        impl Transport for Closed {
            fn write(&mut self, _data: Bytes) -> Result<()> {
                Err(AmiError::ConnectionClosed)
            }
        }

        let mut correlator = Correlator::new();
        let (action, rx) = tracked("sippeers");
        let id = action.action_id().to_string();

        assert!(correlator.dispatch(action, &mut Closed).is_err());
        assert!(matches!(rx.try_recv(), Ok(Err(AmiError::ConnectionClosed))));
        assert!(!correlator.is_pending(&id));
        assert!(!correlator.is_causal_pending(&id));
    }
}
