use serde_json::json;

use crate::Properties;

/// Lookup key for the cache. Exactly one identity predicate per query;
/// current-user intent is its own variant rather than a flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserQuery {
    Current,
    ById(i64),
    ByEmail(String),
    ByRoom(String),
}

impl UserQuery {
    /// Gateway fetch parameters for a cache miss.
    pub fn parameters(&self) -> Properties {
        let mut parameters = Properties::new();
        match self {
            UserQuery::Current => parameters.insert("current".to_owned(), json!(true)),
            UserQuery::ById(id) => parameters.insert("id".to_owned(), json!(id)),
            UserQuery::ByEmail(email) => parameters.insert("email".to_owned(), json!(email)),
            UserQuery::ByRoom(room) => parameters.insert("room".to_owned(), json!(room)),
        };
        parameters
    }

    pub fn wants_current(&self) -> bool {
        matches!(self, UserQuery::Current)
    }
}
