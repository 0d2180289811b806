use crate::message::Inbound;
use crate::transport::SubscriptionId;
use std::collections::HashMap;
use std::sync::Arc;

/// Callback invoked with each message delivered to a room
pub type RoomHandler = Arc<dyn Fn(Inbound) + Send + Sync + 'static>;

/// The transport-level half of a subscription, present only while connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LiveHandle {
    pub id: SubscriptionId,
    pub destination: String,
}

/// Interest in one room
pub(crate) struct Subscription {
    pub handler: RoomHandler,
    pub live: Option<LiveHandle>,
}

/// Room id -> subscription, plus the reverse route used for inbound frames.
///
/// The registry outlives transport sessions: entries lose their live handle
/// when a session drops and get a new one on restoration.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    entries: HashMap<String, Subscription>,
    /// Live subscription id -> room id
    routes: HashMap<SubscriptionId, String>,
    next_id: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh transport subscription id (never reused)
    pub fn next_subscription_id(&mut self) -> SubscriptionId {
        let id = SubscriptionId::from_sequence(self.next_id);
        self.next_id += 1;
        id
    }

    /// Insert or replace the entry for `room_id`.
    ///
    /// Returns the replaced entry; the caller must release its live handle.
    pub fn insert(&mut self, room_id: &str, handler: RoomHandler) -> Option<Subscription> {
        let previous = self.entries.insert(
            room_id.to_string(),
            Subscription {
                handler,
                live: None,
            },
        );
        if let Some(live) = previous.as_ref().and_then(|s| s.live.as_ref()) {
            self.routes.remove(&live.id);
        }
        previous
    }

    /// Remove the entry for `room_id`, returning it so its live handle can be released
    pub fn remove(&mut self, room_id: &str) -> Option<Subscription> {
        let removed = self.entries.remove(room_id)?;
        if let Some(live) = &removed.live {
            self.routes.remove(&live.id);
        }
        Some(removed)
    }

    /// Attach a live handle to an existing entry
    pub fn attach(&mut self, room_id: &str, handle: LiveHandle) -> bool {
        let Some(entry) = self.entries.get_mut(room_id) else {
            return false;
        };
        if let Some(old) = entry.live.take() {
            self.routes.remove(&old.id);
        }
        self.routes.insert(handle.id.clone(), room_id.to_string());
        entry.live = Some(handle);
        true
    }

    /// Forget every live handle (the session is gone); entries are kept.
    ///
    /// Returns how many handles were detached.
    pub fn detach_all(&mut self) -> usize {
        self.routes.clear();
        self.entries
            .values_mut()
            .filter_map(|entry| entry.live.take())
            .count()
    }

    /// Remove every entry, returning the live handles that still need releasing
    pub fn drain(&mut self) -> Vec<LiveHandle> {
        self.routes.clear();
        self.entries
            .drain()
            .filter_map(|(_, entry)| entry.live)
            .collect()
    }

    /// Room and handler a live subscription id routes to
    pub fn route(&self, id: &SubscriptionId) -> Option<(String, RoomHandler)> {
        let room_id = self.routes.get(id)?;
        let entry = self.entries.get(room_id)?;
        Some((room_id.clone(), entry.handler.clone()))
    }

    /// Rooms without a live handle, in no particular order
    pub fn unattached(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.live.is_none())
            .map(|(room_id, _)| room_id.clone())
            .collect()
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.entries.contains_key(room_id)
    }

    pub fn is_live(&self, room_id: &str) -> bool {
        self.entries
            .get(room_id)
            .is_some_and(|entry| entry.live.is_some())
    }

    pub fn rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.entries.keys().cloned().collect();
        rooms.sort();
        rooms
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.routes.len()
    }
}
