//! Client-side user identity cache over a GraphQL-style gateway: at most one
//! live `User` per id/email/room, reconciled against server push updates.

pub mod api;
pub mod appresult;
pub mod users;

pub use appresult::{AppError, AppResult};

use anyhow::anyhow;
use serde_json::Value;

/// Flat JSON object used for query parameters, profile fields and push patches.
pub type Properties = serde_json::Map<String, Value>;

pub trait GetField {
    fn get_str_field(&self, field: &str) -> AppResult<String>;
    fn get_obj_field(&self, field: &str) -> AppResult<&Value>;
}

impl GetField for serde_json::Value {
    fn get_str_field(&self, field: &str) -> AppResult<String> {
        Ok(
            self.get(field)
            .ok_or(anyhow!("expected {field} in {self}"))?
            .as_str()
            .ok_or(anyhow!("expected {field} in {self} to be string"))?
            .to_owned()
        )
    }

    fn get_obj_field(&self, field: &str) -> AppResult<&Value> {
        self.get(field)
        .ok_or(anyhow!("expected {field} in {self}").into())
    }
}
