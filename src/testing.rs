//! In-memory transport that records every call and lets tests drive events.

use crate::error::Error;
use crate::transport::{
    ConnectRequest, EventSink, SubscriptionId, Transport, TransportEvent, TransportSession,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Subscribe {
        session: usize,
        id: SubscriptionId,
        destination: String,
    },
    Unsubscribe {
        session: usize,
        id: SubscriptionId,
    },
    Publish {
        session: usize,
        destination: String,
        body: String,
    },
    Close {
        session: usize,
    },
}

#[derive(Default)]
struct Recorder {
    opens: Vec<(ConnectRequest, EventSink)>,
    calls: Vec<Call>,
    refuse_subscribe: bool,
}

#[derive(Clone, Default)]
pub(crate) struct RecordingTransport {
    recorder: Arc<Mutex<Recorder>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.recorder.lock().opens.len()
    }

    pub fn request(&self, session: usize) -> ConnectRequest {
        self.recorder.lock().opens[session].0.clone()
    }

    /// Emit an event on the most recently opened session
    pub fn emit(&self, event: TransportEvent) {
        let sink = {
            let recorder = self.recorder.lock();
            recorder.opens.last().map(|(_, sink)| sink.clone())
        };
        let sink = sink.expect("no session has been opened");
        sink.emit(event);
    }

    /// Emit an event on a specific (possibly superseded) session
    pub fn emit_to(&self, session: usize, event: TransportEvent) {
        let sink = self.recorder.lock().opens[session].1.clone();
        sink.emit(event);
    }

    /// Deliver a frame body on the live subscription for `destination`
    pub fn deliver(&self, destination: &str, body: &str) {
        let id = self
            .live_subscription(destination)
            .unwrap_or_else(|| panic!("no live subscription for {}", destination));
        self.emit(TransportEvent::Frame {
            subscription: id,
            destination: destination.to_string(),
            body: body.to_string(),
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.recorder.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.recorder.lock().calls.clear();
    }

    pub fn refuse_subscribe(&self, refuse: bool) {
        self.recorder.lock().refuse_subscribe = refuse;
    }

    pub fn publishes(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Publish {
                    destination, body, ..
                } => Some((destination, body)),
                _ => None,
            })
            .collect()
    }

    /// Subscription ids subscribed and not yet unsubscribed on the latest session
    pub fn live_subscriptions(&self) -> Vec<(SubscriptionId, String)> {
        let recorder = self.recorder.lock();
        let Some(current) = recorder.opens.len().checked_sub(1) else {
            return Vec::new();
        };
        let released: HashSet<SubscriptionId> = recorder
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Unsubscribe { session, id } if *session == current => Some(id.clone()),
                _ => None,
            })
            .collect();
        recorder
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Subscribe {
                    session,
                    id,
                    destination,
                } if *session == current && !released.contains(id) => {
                    Some((id.clone(), destination.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn live_subscription(&self, destination: &str) -> Option<SubscriptionId> {
        self.live_subscriptions()
            .into_iter()
            .find(|(_, d)| d == destination)
            .map(|(id, _)| id)
    }
}

impl Transport for RecordingTransport {
    type Session = RecordingSession;

    fn open(&self, request: ConnectRequest, events: EventSink) -> RecordingSession {
        let mut recorder = self.recorder.lock();
        recorder.opens.push((request, events));
        RecordingSession {
            index: recorder.opens.len() - 1,
            recorder: self.recorder.clone(),
        }
    }
}

pub(crate) struct RecordingSession {
    index: usize,
    recorder: Arc<Mutex<Recorder>>,
}

impl TransportSession for RecordingSession {
    fn subscribe(&self, id: &SubscriptionId, destination: &str) -> Result<(), Error> {
        let mut recorder = self.recorder.lock();
        if recorder.refuse_subscribe {
            return Err(Error::ChannelSend("subscribe refused".to_string()));
        }
        recorder.calls.push(Call::Subscribe {
            session: self.index,
            id: id.clone(),
            destination: destination.to_string(),
        });
        Ok(())
    }

    fn unsubscribe(&self, id: &SubscriptionId) -> Result<(), Error> {
        self.recorder.lock().calls.push(Call::Unsubscribe {
            session: self.index,
            id: id.clone(),
        });
        Ok(())
    }

    fn publish(&self, destination: &str, body: &str) -> Result<(), Error> {
        self.recorder.lock().calls.push(Call::Publish {
            session: self.index,
            destination: destination.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    fn close(&self) {
        self.recorder.lock().calls.push(Call::Close {
            session: self.index,
        });
    }
}
