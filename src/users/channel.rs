use std::sync::Arc;

use tokio::sync::broadcast;

use crate::Properties;

use super::user::User;

/// Result of a [`UserService::get`](super::UserService::get) lookup: the
/// resolved user, a read-only stream of server-driven updates, and a write
/// sink for caller-driven snapshots.
pub struct UserChannel {
    user: Arc<User>,
    updates: Option<broadcast::Receiver<Arc<User>>>,
}

impl UserChannel {
    pub(crate) fn new(user: Arc<User>) -> Self {
        let updates = user.subscribe();
        Self { user, updates }
    }

    pub fn user(&self) -> &Arc<User> {
        &self.user
    }

    pub fn into_user(self) -> Arc<User> {
        self.user
    }

    /// Next server-driven update. `None` for users without a live
    /// subscription, or once the feed closes.
    pub async fn recv(&mut self) -> Option<Arc<User>> {
        self.updates.as_mut()?.recv().await.ok()
    }

    /// Accept a caller-pushed snapshot: diff it field by field against the
    /// cached user and persist only the fields that differ. An unchanged
    /// snapshot triggers no update at all.
    pub fn submit(&self, snapshot: &Properties) {
        let mut changed = Properties::new();
        for (key, value) in snapshot {
            if self.user.get(key).as_ref() != Some(value) {
                changed.insert(key.clone(), value.clone());
            }
        }
        if !changed.is_empty() {
            self.user.update(changed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::user::PersistFn;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    fn properties(pairs: &[(&str, Value)]) -> Properties {
        pairs.iter().map(|(key, value)| (key.to_string(), value.clone())).collect()
    }

    fn channel_with_recorder() -> (UserChannel, Arc<Mutex<Vec<Properties>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = calls.clone();
        let persist: PersistFn = Box::new(move |properties| {
            recorded.lock().unwrap().push(properties);
        });
        let user = Arc::new(User::with_hooks(
            properties(&[("id", json!(1)), ("name", json!("A"))]),
            None,
            Some(persist),
        ));
        (UserChannel::new(user), calls)
    }

    #[test]
    fn submit_persists_only_changed_fields() {
        let (channel, calls) = channel_with_recorder();

        channel.submit(&properties(&[("id", json!(1)), ("name", json!("B"))]));

        let recorded = calls.lock().unwrap().clone();
        assert_eq!(recorded, vec![properties(&[("name", json!("B"))])]);
        assert_eq!(channel.user().name().as_deref(), Some("B"));
    }

    #[test]
    fn identical_snapshot_triggers_no_update() {
        let (channel, calls) = channel_with_recorder();

        channel.submit(&properties(&[("id", json!(1)), ("name", json!("B"))]));
        channel.submit(&properties(&[("id", json!(1)), ("name", json!("B"))]));

        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn new_fields_count_as_changed() {
        let (channel, calls) = channel_with_recorder();

        channel.submit(&properties(&[("firstname", json!("Ada"))]));

        let recorded = calls.lock().unwrap().clone();
        assert_eq!(recorded, vec![properties(&[("firstname", json!("Ada"))])]);
    }

    #[tokio::test]
    async fn recv_is_none_without_a_subscription() {
        let (mut channel, _calls) = channel_with_recorder();
        assert!(channel.recv().await.is_none());
    }
}
