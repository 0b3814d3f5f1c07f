use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::debug;

use crate::{AppResult, GetField, Properties};

use super::socket::{ExtendMessage, Socket, SocketCommand};
use super::Api;

/// GraphQL-over-HTTP gateway. Operations are interpolated into anonymous
/// documents against an assumed schema; no client-side validation, field
/// names are trusted literals.
pub struct GraphqlApi {
    endpoint: String,
    http: reqwest::Client,
    socket: Socket,
}

impl GraphqlApi {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            http: reqwest::Client::new(),
            socket: Socket::new(),
        }
    }

    pub fn from_env() -> AppResult<Self> {
        let endpoint = dotenv::var("OVNI_API_URL").map_err(|_| anyhow!("OVNI_API_URL is not set"))?;
        Ok(Self::new(endpoint))
    }

    /// The push side; bind it to a live duplex with [`Socket::pump`].
    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    pub fn toggle_watching(&self, room: &str, watching: bool) {
        self.socket.send(SocketCommand::Watch { room: room.to_owned(), watching });
    }

    pub fn send_message(&self, message: Value) {
        self.socket.send(SocketCommand::Send { message });
    }

    async fn post(&self, document: String) -> AppResult<Value> {
        debug!(%document, "graphql request");
        let body: Value = self.http.post(&self.endpoint)
            .json(&json!({"query": document}))
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = body.get("errors").and_then(Value::as_array).and_then(|errors| errors.first()) {
            let message = error.get_str_field("message").unwrap_or_else(|_| error.to_string());
            return Err(anyhow!("graphql: {message}").into());
        }

        Ok(body.get_obj_field("data")?.clone())
    }
}

pub(crate) fn parameters_string(parameters: &Properties) -> String {
    if parameters.is_empty() {
        return String::new();
    }
    let rendered = parameters.iter()
        .map(|(key, value)| format!("{key}: {value}"))
        .collect::<Vec<_>>()
        .join(", ");

    format!("({rendered})")
}

pub(crate) fn query_document(name: &str, parameters: &Properties, data_fields: &str, extra_fields: &str) -> String {
    let data_fields = if data_fields.is_empty() { "id" } else { data_fields };
    let parameters = parameters_string(parameters);

    format!("{{ {name}{parameters} {{data{{{data_fields}}}{extra_fields}}} }}")
}

pub(crate) fn mutation_document(name: &str, parameters: &Properties, fields: &str) -> String {
    let parameters = parameters_string(parameters);
    let fields = if fields.is_empty() {
        String::new()
    } else {
        format!(" {{{fields}}}")
    };

    format!("mutation {{ {name}{parameters}{fields} }}")
}

#[async_trait]
impl Api for GraphqlApi {
    async fn query(&self, name: &str, parameters: Properties, fields: &str) -> AppResult<Value> {
        self.post(query_document(name, &parameters, fields, "")).await
    }

    async fn mutate(&self, name: &str, parameters: Properties, fields: &str) -> AppResult<Value> {
        self.post(mutation_document(name, &parameters, fields)).await
    }

    fn join(&self, room: &str) {
        self.socket.send(SocketCommand::Join { room: room.to_owned() });
    }

    fn leave(&self, room: &str) {
        self.socket.send(SocketCommand::Leave { room: room.to_owned() });
    }

    fn messages(&self) -> broadcast::Receiver<ExtendMessage> {
        self.socket.messages()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parameters(pairs: &[(&str, Value)]) -> Properties {
        pairs.iter().map(|(key, value)| (key.to_string(), value.clone())).collect()
    }

    #[test]
    fn parameters_render_as_json_values_in_order() {
        let parameters = parameters(&[
            ("email", json!("a@b.com")),
            ("remember", json!(true)),
            ("id", json!(7)),
        ]);
        assert_eq!(
            parameters_string(&parameters),
            r#"(email: "a@b.com", remember: true, id: 7)"#
        );
        assert_eq!(parameters_string(&Properties::new()), "");
    }

    #[test]
    fn query_document_wraps_fields_in_data() {
        let document = query_document("users", &parameters(&[("id", json!(1))]), "id name", "");
        assert_eq!(document, "{ users(id: 1) {data{id name}} }");

        // fields default to id, extra fields land outside the data block
        let document = query_document("users", &Properties::new(), "", "total");
        assert_eq!(document, "{ users {data{id}total} }");
    }

    #[test]
    fn mutation_document_omits_empty_field_block() {
        let document = mutation_document(
            "login",
            &parameters(&[("email", json!("a@b.com")), ("password", json!("pw"))]),
            "id name",
        );
        assert_eq!(document, r#"mutation { login(email: "a@b.com", password: "pw") {id name} }"#);

        let document = mutation_document("logout", &Properties::new(), "");
        assert_eq!(document, "mutation { logout }");
    }
}
