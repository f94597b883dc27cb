use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::app_state::AppState;
use crate::error::ServerError;
use crate::store::{NewFileMeta, Vault};

/// Device marker stamped on server-originated push frames; clients dedupe
/// their own mutations by comparing against it.
const SERVER_DEVICE: &str = "server";

/// Sessions that send nothing for this long are disconnected.
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Upper bound for a single text or binary frame.
const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

pub async fn ws_handler(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade
        .max_message_size(MAX_MESSAGE_BYTES)
        .on_upgrade(|socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let (sink, stream) = socket.split();
    let (outbound, queue) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(sink, queue));

    let mut session = Session {
        state,
        stream,
        outbound,
        membership: None,
    };

    if let Err(err) = session.run().await {
        tracing::info!("session ended: {err}");
        let _ = session.send_json(&json!({ "error": err.to_string() }));
    }

    if let Some((vault_id, session_id)) = session.membership.take() {
        session.state.hub.leave(&vault_id, session_id);
    }

    // Dropping the session releases the last queue sender; the writer task
    // drains what is left and closes the socket.
    drop(session);
    let _ = writer.await;
}

/// Drains the session's outbound queue into the socket. Both direct replies
/// and hub broadcasts arrive here, giving each peer a consistent order
/// without letting a slow peer block the hub.
async fn write_loop(mut sink: SplitSink<WebSocket, Message>, mut queue: UnboundedReceiver<Message>) {
    while let Some(frame) = queue.recv().await {
        if sink.send(frame).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

#[derive(Debug, Deserialize)]
struct InitFrame {
    token: String,
    id: String,
    keyhash: String,
    #[serde(default, deserialize_with = "lenient_int")]
    version: i64,
    #[serde(default)]
    initial: bool,
    #[serde(default)]
    device: String,
}

/// A control frame during the serving phase, dispatched on `op`.
/// Unrecognized ops deserialize to `Unknown` and are ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum ClientFrame {
    Size,
    Pull {
        #[serde(default, deserialize_with = "lenient_int")]
        uid: i64,
    },
    Push(PushFrame),
    History {
        #[serde(default)]
        path: String,
    },
    Ping,
    Deleted,
    Restore {
        #[serde(default, deserialize_with = "lenient_int")]
        uid: i64,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
struct PushFrame {
    #[serde(default, deserialize_with = "lenient_int")]
    uid: i64,
    #[serde(default)]
    path: String,
    #[serde(default)]
    extension: String,
    #[serde(default)]
    hash: String,
    #[serde(default, deserialize_with = "lenient_int")]
    ctime: i64,
    #[serde(default, deserialize_with = "lenient_int")]
    mtime: i64,
    #[serde(default)]
    folder: bool,
    #[serde(default)]
    deleted: bool,
    #[serde(default, deserialize_with = "lenient_int")]
    size: i64,
    #[serde(default, deserialize_with = "lenient_int")]
    pieces: i64,
    #[serde(default)]
    device: String,
}

struct Session {
    state: AppState,
    stream: SplitStream<WebSocket>,
    outbound: UnboundedSender<Message>,
    membership: Option<(String, u64)>,
}

impl Session {
    /// Drives the connection through INIT, catch-up, ready and the serving
    /// loop. Returns Ok on client disconnect; any returned error is reported
    /// to the peer before the socket closes.
    async fn run(&mut self) -> Result<(), ServerError> {
        let Some(text) = self.recv_text().await? else {
            return Ok(());
        };
        let init: InitFrame = serde_json::from_str(&text)
            .map_err(|_| ServerError::InvalidInput("malformed init frame".into()))?;

        let email = self.state.tokens.email(&init.token)?;
        let vault = self.state.store.get_vault(&init.id, &init.keyhash).await?;

        if !self.state.store.has_access(&vault.id, &email).await? {
            tracing::info!(
                vault = %vault.id,
                device = %init.device,
                "{email} has no access to vault"
            );
            return Err(ServerError::Forbidden("no access to vault".into()));
        }

        tracing::info!(
            vault = %vault.id,
            device = %init.device,
            initial = init.initial,
            "{email} connected"
        );
        self.send_json(&json!({ "res": "ok" }))?;

        // Catch-up: one push per live file, metadata only. The client pulls
        // content afterwards, file by file.
        if vault.version > init.version {
            for file in self.state.store.get_vault_files(&vault.id).await? {
                self.send_json(&json!({
                    "op": "push",
                    "path": file.path,
                    "hash": file.hash,
                    "size": file.size,
                    "ctime": file.created,
                    "mtime": file.modified,
                    "folder": file.folder,
                    "deleted": file.deleted,
                    "device": SERVER_DEVICE,
                    "uid": file.uid,
                }))?;
            }
        }

        self.send_json(&json!({ "op": "ready", "version": vault.version }))?;

        if self.state.config.snapshot_on_connect {
            self.state.store.snapshot(&vault.id).await?;
        }

        // A client ahead of the server pushes the counter forward.
        if vault.version < init.version {
            self.state
                .store
                .set_vault_version(&vault.id, init.version)
                .await?;
        }
        let version = vault.version.max(init.version);

        let session_id = self.state.hub.join(&vault.id, self.outbound.clone());
        self.membership = Some((vault.id.clone(), session_id));

        let result = self.serve(&vault, version).await;
        tracing::info!(vault = %vault.id, "{email} disconnected");
        result
    }

    async fn serve(&mut self, vault: &Vault, version: i64) -> Result<(), ServerError> {
        let mut bumped = false;

        loop {
            let Some(text) = self.recv_text().await? else {
                return Ok(());
            };
            let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) else {
                continue;
            };

            match frame {
                ClientFrame::Size => {
                    let size = self.state.store.get_vault_size(&vault.id).await?;
                    self.send_json(&json!({ "res": "ok", "size": size, "limit": vault.size }))?;
                }
                ClientFrame::Pull { uid } => self.handle_pull(uid).await?,
                ClientFrame::Push(push) => {
                    match self.handle_push(vault, version, &mut bumped, push).await {
                        Err(err @ ServerError::QuotaExceeded) => {
                            self.send_json(&json!({ "error": err.to_string() }))?;
                        }
                        other => other?,
                    }
                }
                ClientFrame::History { path } => {
                    let items = self.state.store.get_file_history(&vault.id, &path).await?;
                    self.send_json(&json!({ "items": items, "more": false }))?;
                }
                ClientFrame::Ping => self.send_json(&json!({ "op": "pong" }))?,
                ClientFrame::Deleted => {
                    let items = self.state.store.get_deleted_files(&vault.id).await?;
                    self.send_json(&json!({ "items": items }))?;
                }
                ClientFrame::Restore { uid } => {
                    let file = self.state.store.restore_file(&vault.id, uid).await?;
                    self.state.hub.broadcast(
                        &vault.id,
                        &json!({
                            "op": "push",
                            "uid": file.uid,
                            "path": file.path,
                            "extension": file.extension,
                            "hash": file.hash,
                            "ctime": file.created,
                            "mtime": file.modified,
                            "folder": file.folder,
                            "deleted": file.deleted,
                            "size": file.size,
                            "device": SERVER_DEVICE,
                        }),
                    );
                    self.send_json(&json!({ "res": "ok" }))?;
                }
                ClientFrame::Unknown => {}
            }
        }
    }

    /// One text reply, then the payload as a single binary piece when there
    /// is one. Deleted rows and metadata-only rows advertise zero pieces.
    async fn handle_pull(&mut self, uid: i64) -> Result<(), ServerError> {
        let file = self.state.store.get_file(uid).await?;

        let payload = if file.size != 0 { file.data } else { None };
        let pieces = i64::from(payload.is_some());

        self.send_json(&json!({ "hash": file.hash, "size": file.size, "pieces": pieces }))?;
        if let Some(data) = payload {
            self.send_frame(Message::Binary(data.into()))?;
        }
        Ok(())
    }

    async fn handle_push(
        &mut self,
        vault: &Vault,
        version: i64,
        bumped: &mut bool,
        push: PushFrame,
    ) -> Result<(), ServerError> {
        let uid = if push.deleted {
            self.state.store.delete_file(&vault.id, &push.path).await?;
            push.uid
        } else {
            if push.size > 0 {
                let current = self.state.store.get_vault_size(&vault.id).await?;
                if current + push.size > vault.size {
                    return Err(ServerError::QuotaExceeded);
                }
            }
            self.state
                .store
                .insert_metadata(&NewFileMeta {
                    vault_id: vault.id.clone(),
                    hash: push.hash.clone(),
                    path: push.path.clone(),
                    extension: push.extension.clone(),
                    size: push.size,
                    created: push.ctime,
                    modified: push.mtime,
                    folder: push.folder,
                    deleted: false,
                })
                .await?
        };

        // Collect the payload piece by piece; the row is only completed once
        // every piece arrived, so an abandoned upload commits no data.
        if push.size > 0 {
            // Sized by what actually arrives, not by the claimed size.
            let mut payload = Vec::new();
            for _ in 0..push.pieces {
                self.send_json(&json!({ "res": "next" }))?;
                let Some(piece) = self.recv_binary().await? else {
                    return Err(ServerError::InvalidInput(
                        "connection closed mid-upload".into(),
                    ));
                };
                payload.extend_from_slice(&piece);
            }
            self.state.store.insert_data(uid, &payload).await?;
        }

        self.state.hub.broadcast(
            &vault.id,
            &json!({
                "op": "push",
                "uid": uid,
                "path": push.path,
                "extension": push.extension,
                "hash": push.hash,
                "ctime": push.ctime,
                "mtime": push.mtime,
                "folder": push.folder,
                "deleted": push.deleted,
                "size": push.size,
                "pieces": push.pieces,
                "device": push.device,
            }),
        );

        if !*bumped {
            self.state
                .store
                .set_vault_version(&vault.id, version + 1)
                .await?;
            *bumped = true;
        }

        self.send_json(&json!({ "op": "ok" }))?;
        Ok(())
    }

    /// Next data frame within the idle window. `None` means the peer is gone;
    /// protocol-level ping/pong frames are transparent.
    async fn recv(&mut self) -> Result<Option<Message>, ServerError> {
        loop {
            let next = tokio::time::timeout(IDLE_TIMEOUT, self.stream.next())
                .await
                .map_err(|_| ServerError::InvalidInput("session idle timeout".into()))?;

            match next {
                None | Some(Err(_)) => return Ok(None),
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(msg)) => return Ok(Some(msg)),
            }
        }
    }

    async fn recv_text(&mut self) -> Result<Option<String>, ServerError> {
        loop {
            match self.recv().await? {
                None => return Ok(None),
                Some(Message::Text(text)) => return Ok(Some(text.to_string())),
                // Stray binary outside an upload loop carries no meaning.
                Some(_) => continue,
            }
        }
    }

    async fn recv_binary(&mut self) -> Result<Option<Vec<u8>>, ServerError> {
        match self.recv().await? {
            None => Ok(None),
            Some(Message::Binary(bytes)) => Ok(Some(bytes.to_vec())),
            Some(_) => Err(ServerError::InvalidInput("expected a binary piece".into())),
        }
    }

    fn send_json(&self, value: &Value) -> Result<(), ServerError> {
        self.send_frame(Message::Text(value.to_string().into()))
    }

    fn send_frame(&self, frame: Message) -> Result<(), ServerError> {
        self.outbound
            .send(frame)
            .map_err(|_| ServerError::Internal("peer connection closed".into()))
    }
}

fn lenient_int<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(to_int(&Value::deserialize(deserializer)?))
}

/// The protocol's lenient integer parsing: numbers pass through, numeric
/// strings parse, anything else is zero.
fn to_int(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_int_is_lenient() {
        assert_eq!(to_int(&json!(5)), 5);
        assert_eq!(to_int(&json!(5.9)), 5);
        assert_eq!(to_int(&json!("42")), 42);
        assert_eq!(to_int(&json!(" 7 ")), 7);
        assert_eq!(to_int(&json!("abc")), 0);
        assert_eq!(to_int(&json!(null)), 0);
        assert_eq!(to_int(&json!({})), 0);
    }

    #[test]
    fn init_frame_accepts_string_version() {
        let init: InitFrame = serde_json::from_str(
            r#"{"op":"init","token":"t","id":"v","keyhash":"k","version":"3","initial":true,"device":"d1"}"#,
        )
        .unwrap();
        assert_eq!(init.version, 3);
        assert!(init.initial);
        assert_eq!(init.device, "d1");

        let init: InitFrame = serde_json::from_str(
            r#"{"token":"t","id":"v","keyhash":"k","version":"garbage"}"#,
        )
        .unwrap();
        assert_eq!(init.version, 0);
        assert_eq!(init.device, "");
    }

    #[test]
    fn frames_dispatch_on_op() {
        assert!(matches!(
            serde_json::from_str::<ClientFrame>(r#"{"op":"ping"}"#).unwrap(),
            ClientFrame::Ping
        ));
        assert!(matches!(
            serde_json::from_str::<ClientFrame>(r#"{"op":"size"}"#).unwrap(),
            ClientFrame::Size
        ));
        assert!(matches!(
            serde_json::from_str::<ClientFrame>(r#"{"op":"deleted"}"#).unwrap(),
            ClientFrame::Deleted
        ));
        assert!(matches!(
            serde_json::from_str::<ClientFrame>(r#"{"op":"pull","uid":"9"}"#).unwrap(),
            ClientFrame::Pull { uid: 9 }
        ));
        assert!(matches!(
            serde_json::from_str::<ClientFrame>(r#"{"op":"restore","uid":4}"#).unwrap(),
            ClientFrame::Restore { uid: 4 }
        ));
    }

    #[test]
    fn unknown_ops_are_ignored() {
        assert!(matches!(
            serde_json::from_str::<ClientFrame>(r#"{"op":"subscribe","topic":"x"}"#).unwrap(),
            ClientFrame::Unknown
        ));
    }

    #[test]
    fn push_frame_parses_the_wire_shape() {
        let frame = serde_json::from_str::<ClientFrame>(
            r#"{"op":"push","path":"notes/a.md","hash":"h","size":5,"pieces":1,
                "ctime":0,"mtime":0,"folder":false,"deleted":false,"device":"d1"}"#,
        )
        .unwrap();

        let ClientFrame::Push(push) = frame else {
            panic!("expected push frame");
        };
        assert_eq!(push.path, "notes/a.md");
        assert_eq!(push.hash, "h");
        assert_eq!(push.size, 5);
        assert_eq!(push.pieces, 1);
        assert!(!push.folder);
        assert!(!push.deleted);
        assert_eq!(push.device, "d1");
        assert_eq!(push.uid, 0);
    }

    #[test]
    fn deleted_push_carries_its_uid() {
        let frame = serde_json::from_str::<ClientFrame>(
            r#"{"op":"push","path":"notes/a.md","deleted":true,"size":0,"uid":12}"#,
        )
        .unwrap();

        let ClientFrame::Push(push) = frame else {
            panic!("expected push frame");
        };
        assert!(push.deleted);
        assert_eq!(push.uid, 12);
    }

    #[test]
    fn history_frame_defaults_missing_path() {
        let frame = serde_json::from_str::<ClientFrame>(r#"{"op":"history"}"#).unwrap();
        let ClientFrame::History { path } = frame else {
            panic!("expected history frame");
        };
        assert_eq!(path, "");
    }
}
