mod channel;
mod query;
mod register;
mod user;

pub use channel::UserChannel;
pub use query::UserQuery;
pub use register::Registration;
pub use user::{PersistFn, User};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use anyhow::anyhow;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::{Api, ExtendMessage};
use crate::{AppResult, Properties};

/// Field list requested for every user fetch.
pub const USER_DATA_FIELDS: &str = "id firstname lastname name email room games { name }";

#[derive(Default)]
struct Registry {
    by_id: HashMap<i64, Arc<User>>,
    by_email: HashMap<String, Arc<User>>,
    by_room: HashMap<String, Arc<User>>,
    current: Option<Arc<User>>,
}

/// User cache and reconciler: at most one live [`User`] per id, lowercase
/// email and room within one service, with a distinguished current-user
/// alias. Serves cached instances on repeat lookups, merges push updates
/// into the right instance, and brokers partial updates back to the gateway.
pub struct UserService {
    api: Arc<dyn Api>,
    registry: Mutex<Registry>,
}

impl UserService {
    pub fn new(api: Arc<dyn Api>) -> Arc<Self> {
        Arc::new(Self {
            api,
            registry: Mutex::new(Registry::default()),
        })
    }

    /// Route inbound push messages into the cache until the feed closes or
    /// the service is dropped.
    pub fn spawn_message_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::downgrade(self);
        let mut messages = self.api.messages();
        tokio::spawn(async move {
            while let Ok(message) = messages.recv().await {
                let Some(service) = service.upgrade() else { break };
                service.handle_message(message);
            }
        })
    }

    /// Apply one push message: resolve the routing token to a cached user,
    /// merge the patch, notify any live subscriber. Non-`extend` actions and
    /// unknown rooms are dropped, not errors.
    pub fn handle_message(&self, message: ExtendMessage) {
        if message.action != "extend" {
            return;
        }
        let Some(user) = self.get_registered(&UserQuery::ByRoom(message.room.clone())) else {
            debug!(room = %message.room, "extend for unregistered room dropped");
            return;
        };
        user.extend(&message.properties);
        if let Some(subscription) = user.subscription() {
            let _ = subscription.send(user.clone());
        }
    }

    /// Insert `user` under every non-empty identity key it carries; map
    /// assignment is idempotent. A carried room is joined with the gateway.
    pub fn register_user(&self, user: &Arc<User>, make_current: bool) {
        let mut registry = self.registry.lock().unwrap();
        if make_current {
            registry.current = Some(user.clone());
        }
        if let Some(email) = user.email() {
            registry.by_email.insert(email.to_lowercase(), user.clone());
        }
        if let Some(id) = user.id() {
            registry.by_id.insert(id, user.clone());
        }
        if let Some(room) = user.room() {
            registry.by_room.insert(room.clone(), user.clone());
            self.api.join(&room);
        }
    }

    /// Remove every mapping pointing at `user` (absent keys are fine),
    /// release its room with the gateway, and mark it dead.
    pub fn unregister_user(&self, user: &Arc<User>) {
        let mut registry = self.registry.lock().unwrap();
        if let Some(email) = user.email() {
            let email = email.to_lowercase();
            if registry.by_email.get(&email).is_some_and(|cached| Arc::ptr_eq(cached, user)) {
                registry.by_email.remove(&email);
            }
        }
        if let Some(id) = user.id() {
            if registry.by_id.get(&id).is_some_and(|cached| Arc::ptr_eq(cached, user)) {
                registry.by_id.remove(&id);
            }
        }
        if let Some(room) = user.room() {
            if registry.by_room.get(&room).is_some_and(|cached| Arc::ptr_eq(cached, user)) {
                registry.by_room.remove(&room);
            }
            self.api.leave(&room);
        }
        user.kill();
    }

    /// Synchronous lookup against the registry; no gateway round-trip.
    pub fn get_registered(&self, query: &UserQuery) -> Option<Arc<User>> {
        let registry = self.registry.lock().unwrap();
        match query {
            UserQuery::Current => registry.current.clone(),
            UserQuery::ByEmail(email) => registry.by_email.get(&email.to_lowercase()).cloned(),
            UserQuery::ById(id) => registry.by_id.get(id).cloned(),
            UserQuery::ByRoom(room) => registry.by_room.get(room).cloned(),
        }
    }

    /// Fetch-or-return-cached. A cache hit involves no gateway call; a miss
    /// fetches, registers the user under all its keys (current only for
    /// [`UserQuery::Current`]) and hands back the channel. A gateway "no
    /// match" is `Ok(None)`.
    pub async fn get(self: &Arc<Self>, query: UserQuery) -> AppResult<Option<UserChannel>> {
        if let Some(user) = self.get_registered(&query) {
            return Ok(Some(UserChannel::new(user)));
        }

        let result = self.api.query("users", query.parameters(), USER_DATA_FIELDS).await?;
        let Some(properties) = result["users"]["data"].get(0).and_then(Value::as_object) else {
            return Ok(None);
        };

        let user = self.build_user(properties.clone(), true);
        self.register_user(&user, query.wants_current());
        Ok(Some(UserChannel::new(user)))
    }

    pub async fn get_current(self: &Arc<Self>) -> AppResult<Option<UserChannel>> {
        self.get(UserQuery::Current).await
    }

    pub async fn get_by_id(self: &Arc<Self>, id: i64) -> AppResult<Option<UserChannel>> {
        self.get(UserQuery::ById(id)).await
    }

    pub async fn get_by_email(self: &Arc<Self>, email: &str) -> AppResult<Option<UserChannel>> {
        self.get(UserQuery::ByEmail(email.to_owned())).await
    }

    /// Credentials login. Authentication failure is `Ok(None)` — the gateway
    /// answers `null`, nothing is registered, no error is raised.
    pub async fn login(self: &Arc<Self>, email: &str, password: &str, remember: bool) -> AppResult<Option<Arc<User>>> {
        let mut parameters = Properties::new();
        parameters.insert("email".to_owned(), json!(email));
        parameters.insert("password".to_owned(), json!(password));
        parameters.insert("remember".to_owned(), json!(remember));

        let result = self.api.mutate("login", parameters, USER_DATA_FIELDS).await?;
        let Some(properties) = result["login"].as_object() else {
            return Ok(None);
        };

        let user = self.build_user(properties.clone(), false);
        self.register_user(&user, true);
        debug!(id = user.id(), "logged in");
        Ok(Some(user))
    }

    /// Create an account. The new user is registered, and becomes current
    /// when the registration asked to be logged in right away.
    pub async fn register(self: &Arc<Self>, registration: Registration) -> AppResult<Option<Arc<User>>> {
        let make_current = registration.login.unwrap_or(false);
        let result = self.api.mutate("register", registration.parameters(), "id,name,email").await?;
        let Some(properties) = result["register"].as_object() else {
            return Ok(None);
        };

        let user = self.build_user(properties.clone(), false);
        self.register_user(&user, make_current);
        Ok(Some(user))
    }

    /// Clears the current-user alias and fires a `logout` mutation. The user
    /// stays reachable through the id/email/room maps; callers wanting full
    /// teardown use [`unregister_user`](Self::unregister_user).
    pub fn logout(&self) {
        self.invalid_current_user();
        let api = self.api.clone();
        tokio::spawn(async move {
            if let Err(error) = api.mutate("logout", Properties::new(), "").await {
                warn!(%error, "logout mutation failed");
            }
        });
    }

    /// Drop the current-user alias, releasing its room routing token.
    /// No-op when nobody is current.
    pub fn invalid_current_user(&self) {
        let user = self.registry.lock().unwrap().current.take();
        if let Some(user) = user {
            if let Some(room) = user.room() {
                self.api.leave(&room);
            }
        }
    }

    /// Resolve a user by id and push a partial update through it.
    pub async fn update(self: &Arc<Self>, id: i64, properties: Properties) -> AppResult<()> {
        let Some(channel) = self.get_by_id(id).await? else {
            return Err(anyhow!("no user with id {id}").into());
        };
        channel.user().update(properties);
        Ok(())
    }

    /// Build a user whose persist hook issues an `updateUser` mutation
    /// tagged with its id and refreshes `updated_at` from the result.
    fn build_user(&self, properties: Properties, subscribing: bool) -> Arc<User> {
        let api = self.api.clone();
        Arc::new_cyclic(|weak: &Weak<User>| {
            let weak = weak.clone();
            let persist: PersistFn = Box::new(move |mut properties: Properties| {
                let Some(user) = weak.upgrade() else { return };
                if let Some(id) = user.id() {
                    properties.insert("id".to_owned(), json!(id));
                }
                let api = api.clone();
                let weak = weak.clone();
                tokio::spawn(async move {
                    match api.mutate("updateUser", properties, "updated_at").await {
                        Ok(result) => {
                            let updated_at = result["updateUser"]["updated_at"].clone();
                            if updated_at.is_null() {
                                return;
                            }
                            if let Some(user) = weak.upgrade() {
                                let mut patch = Properties::new();
                                patch.insert("updated_at".to_owned(), updated_at);
                                user.extend(&patch);
                            }
                        }
                        Err(error) => warn!(%error, "updateUser mutation failed"),
                    }
                });
            });

            let subscription = subscribing.then(|| broadcast::channel(16).0);
            User::with_hooks(properties, subscription, Some(persist))
        })
    }
}
