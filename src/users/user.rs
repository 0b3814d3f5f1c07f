use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::broadcast;

use crate::Properties;

/// Persists a partial update against the gateway, bound per user at
/// construction time. Fire-and-forget from the caller's perspective.
pub type PersistFn = Box<dyn Fn(Properties) + Send + Sync>;

/// One authenticated or referenced account. Profile fields are schemaless;
/// identity is carried by `id`, `email` and the `room` routing token.
pub struct User {
    state: Mutex<Properties>,
    alive: AtomicBool,
    subscription: Option<broadcast::Sender<Arc<User>>>,
    persist: Option<PersistFn>,
}

impl User {
    /// A bare user with no live-update channel and no persist hook;
    /// `update` then merges like `extend`.
    pub fn new(properties: Properties) -> Arc<Self> {
        Arc::new(Self::with_hooks(properties, None, None))
    }

    pub(crate) fn with_hooks(
        properties: Properties,
        subscription: Option<broadcast::Sender<Arc<User>>>,
        persist: Option<PersistFn>,
    ) -> Self {
        Self {
            state: Mutex::new(properties),
            alive: AtomicBool::new(true),
            subscription,
            persist,
        }
    }

    /// Silent last-write-wins merge, used for server-pushed deltas.
    /// Never touches the gateway or the subscription.
    pub fn extend(&self, properties: &Properties) {
        let mut state = self.state.lock().unwrap();
        for (key, value) in properties {
            state.insert(key.clone(), value.clone());
        }
    }

    /// Merge plus persist: the bound callback issues a partial update
    /// tagged with this user's id. No-op once killed.
    pub fn update(&self, properties: Properties) {
        if !self.is_alive() {
            return;
        }
        self.extend(&properties);
        if let Some(persist) = &self.persist {
            persist(properties);
        }
    }

    /// Marks the entity inactive; the registry owns actual removal.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub(crate) fn subscription(&self) -> Option<&broadcast::Sender<Arc<User>>> {
        self.subscription.as_ref()
    }

    /// Live-update feed, present only for users fetched via the subscribing
    /// lookup path.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<Arc<User>>> {
        self.subscription.as_ref().map(|subscription| subscription.subscribe())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.state.lock().unwrap().get(key).cloned()
    }

    pub fn snapshot(&self) -> Properties {
        self.state.lock().unwrap().clone()
    }

    fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn id(&self) -> Option<i64> {
        match self.get("id")? {
            Value::Number(id) => id.as_i64(),
            Value::String(id) => id.parse().ok(),
            _ => None,
        }
    }

    pub fn email(&self) -> Option<String> {
        self.get_str("email")
    }

    pub fn room(&self) -> Option<String> {
        self.get_str("room")
    }

    pub fn name(&self) -> Option<String> {
        self.get_str("name")
    }

    pub fn updated_at(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::parse(&self.get_str("updated_at")?, &Rfc3339).ok()
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("User")
            .field("state", &*self.state.lock().unwrap())
            .field("alive", &self.is_alive())
            .finish()
    }
}
