use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::Properties;

/// Inbound push message: a routing token plus a partial property set.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtendMessage {
    pub action: String,
    pub room: String,
    #[serde(default)]
    pub properties: Properties,
}

#[derive(Debug, Clone)]
pub enum SocketCommand {
    Join { room: String },
    Leave { room: String },
    Watch { room: String, watching: bool },
    Send { message: Value },
}

impl SocketCommand {
    pub fn frame(&self) -> String {
        match self {
            SocketCommand::Join { room } => json!({"action": "join", "room": room}),
            SocketCommand::Leave { room } => json!({"action": "leave", "room": room}),
            SocketCommand::Watch { room, watching } => {
                json!({"action": "watch", "room": room, "watching": watching})
            }
            SocketCommand::Send { message } => message.clone(),
        }
        .to_string()
    }
}

/// Push transport glue: queues outbound commands and fans inbound messages
/// out to subscribers. `pump` binds both ends to an actual duplex.
pub struct Socket {
    cmd_tx: mpsc::UnboundedSender<SocketCommand>,
    cmd_rx: Mutex<Option<mpsc::UnboundedReceiver<SocketCommand>>>,
    msg_tx: broadcast::Sender<ExtendMessage>,
}

impl Socket {
    pub fn new() -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Self {
            cmd_tx,
            cmd_rx: Mutex::new(Some(cmd_rx)),
            msg_tx: broadcast::channel(64).0,
        }
    }

    pub fn send(&self, command: SocketCommand) {
        let _ = self.cmd_tx.send(command);
    }

    pub fn messages(&self) -> broadcast::Receiver<ExtendMessage> {
        self.msg_tx.subscribe()
    }

    /// Drive a string duplex until either side closes. Unparsable frames are
    /// skipped; can only be bound to one duplex over the socket's lifetime.
    pub async fn pump<S, E>(&self, duplex: S)
    where
        S: Stream<Item = Result<String, E>> + Sink<String> + Unpin + Send + 'static,
    {
        let Some(mut cmd_rx) = self.cmd_rx.lock().unwrap().take() else {
            return;
        };
        let (mut sender, mut receiver) = duplex.split();
        let msg_tx = self.msg_tx.clone();

        let outbound = tokio::spawn(async move {
            while let Some(command) = cmd_rx.recv().await {
                if sender.send(command.frame()).await.is_err() {
                    break;
                }
            }
        });

        while let Some(Ok(frame)) = receiver.next().await {
            let Ok(message) = serde_json::from_str::<ExtendMessage>(&frame) else {
                debug!(%frame, "skipping unparsable socket frame");
                continue;
            };
            let _ = msg_tx.send(message);
        }

        outbound.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_render_action_frames() {
        let frame = SocketCommand::Join { room: "room7".to_owned() }.frame();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["action"], "join");
        assert_eq!(value["room"], "room7");

        let frame = SocketCommand::Watch { room: "r1".to_owned(), watching: false }.frame();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["action"], "watch");
        assert_eq!(value["watching"], false);
    }

    #[test]
    fn extend_message_parses_with_optional_properties() {
        let message: ExtendMessage =
            serde_json::from_str(r#"{"action": "extend", "room": "r1", "properties": {"name": "C"}}"#)
                .unwrap();
        assert_eq!(message.action, "extend");
        assert_eq!(message.room, "r1");
        assert_eq!(message.properties["name"], "C");

        let message: ExtendMessage =
            serde_json::from_str(r#"{"action": "ping", "room": "r1"}"#).unwrap();
        assert!(message.properties.is_empty());
    }
}
