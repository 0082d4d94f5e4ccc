//! Wire format: every payload is a JSON document preceded by its length as
//! a 4-byte big-endian integer.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::SCHEMA_VERSION;
use crate::entity::{Appearance, EntityId};
use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{Direction, InputState, MotionState, PortalLink};

const HEADER_LEN: usize = 4;

/// Field-enumerated snapshot of one entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,
    pub class_name: String,
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub prev_x: i32,
    pub prev_y: i32,
    pub direction: Direction,
    pub inertia: f32,
    pub mass: f32,
    pub temperature: f32,
    pub health: f32,
    pub motion: MotionState,
    pub parent: Option<EntityId>,
    pub follows_parent: bool,
    pub is_grabbable: bool,
    pub is_encumbrant: bool,
    pub z_level: f32,
    pub actions_per_second: f32,
    #[serde(default)]
    pub speech: Option<String>,
    pub appearance: Appearance,
    #[serde(default)]
    pub portal: Option<PortalLink>,
}

/// Which half of a server tick a state broadcast belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePhase {
    /// Sent after the decide phase, before staged actions resolve.
    Staged,
    Resolved,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        schema_version: u32,
        world_state: Vec<EntityRecord>,
        player_id: EntityId,
        level_key: String,
    },
    State {
        schema_version: u32,
        world_state: Vec<EntityRecord>,
        level_key: String,
        phase: UpdatePhase,
    },
}

impl ServerMessage {
    pub fn welcome(world_state: Vec<EntityRecord>, player_id: EntityId, level_key: &str) -> Self {
        Self::Welcome {
            schema_version: SCHEMA_VERSION,
            world_state,
            player_id,
            level_key: level_key.to_string(),
        }
    }

    pub fn state(world_state: Vec<EntityRecord>, level_key: &str, phase: UpdatePhase) -> Self {
        Self::State {
            schema_version: SCHEMA_VERSION,
            world_state,
            level_key: level_key.to_string(),
            phase,
        }
    }

    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        let message: Self = serde_json::from_slice(payload)?;
        let version = match &message {
            Self::Welcome { schema_version, .. } | Self::State { schema_version, .. } => {
                *schema_version
            }
        };
        if version != SCHEMA_VERSION {
            return Err(ProtocolError::UnsupportedSchema(version));
        }
        Ok(message)
    }

    pub fn level_key(&self) -> &str {
        match self {
            Self::Welcome { level_key, .. } | Self::State { level_key, .. } => level_key,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ClientMessage {
    Input(InputState),
    PortalRequest {
        target_level: String,
        exit_name: String,
    },
}

impl ClientMessage {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Input(input) => json!({
                "type": "input",
                "up": input.up,
                "down": input.down,
                "left": input.left,
                "right": input.right,
                "grab": input.grab,
                "cast": input.cast,
                "portal": input.portal,
            }),
            Self::PortalRequest {
                target_level,
                exit_name,
            } => json!({
                "type": "portal_request",
                "target_level": target_level,
                "exit_name": exit_name,
            }),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_value().to_string().into_bytes()
    }
}

/// Returns `None` for anything that is not a well-formed client message.
pub fn parse_client_message(raw: &str) -> Option<ClientMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let message_type = object.get("type")?.as_str()?;

    match message_type {
        "input" => {
            let key = |name: &str| -> Option<bool> {
                match object.get(name) {
                    None => Some(false),
                    Some(value) => value.as_bool(),
                }
            };
            Some(ClientMessage::Input(InputState {
                up: key("up")?,
                down: key("down")?,
                left: key("left")?,
                right: key("right")?,
                grab: key("grab")?,
                cast: key("cast")?,
                portal: key("portal")?,
            }))
        }
        "portal_request" => {
            let target_level = object.get("target_level")?.as_str()?.to_string();
            let exit_name = object.get("exit_name")?.as_str()?.to_string();
            if target_level.is_empty() || exit_name.is_empty() {
                return None;
            }
            Some(ClientMessage::PortalRequest {
                target_level,
                exit_name,
            })
        }
        _ => None,
    }
}

/// Fills `buf` completely. A read of zero bytes before that is fatal.
async fn read_exact_or_broken<R>(reader: &mut R, buf: &mut [u8]) -> ProtocolResult<()>
where
    R: AsyncRead + Unpin,
{
    let mut received = 0;
    while received < buf.len() {
        let n = reader.read(&mut buf[received..]).await?;
        if n == 0 {
            return Err(ProtocolError::ConnectionBroken {
                expected: buf.len(),
                received,
            });
        }
        received += n;
    }
    Ok(())
}

pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> ProtocolResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    read_exact_or_broken(reader, &mut header).await?;
    let len = u32::from_be_bytes(header) as usize;
    if len > max_len {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    read_exact_or_broken(reader, &mut payload).await?;
    Ok(payload)
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge(payload.len()))?;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MAX_FRAME_BYTES;
    use crate::entity::{Entity, EntitySeed};

    #[tokio::test]
    async fn zero_byte_read_mid_payload_is_connection_broken() {
        let mut bytes: &[u8] = &[0, 0, 0, 10, b'a', b'b', b'c'];
        let err = read_frame(&mut bytes, MAX_FRAME_BYTES)
            .await
            .expect_err("stream ends early");
        assert!(matches!(
            err,
            ProtocolError::ConnectionBroken {
                expected: 10,
                received: 3
            }
        ));
    }

    #[tokio::test]
    async fn truncated_header_is_connection_broken() {
        let mut bytes: &[u8] = &[0, 0];
        let err = read_frame(&mut bytes, MAX_FRAME_BYTES)
            .await
            .expect_err("header incomplete");
        assert!(matches!(
            err,
            ProtocolError::ConnectionBroken {
                expected: 4,
                received: 2
            }
        ));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let mut bytes: &[u8] = &[0, 1, 0, 0];
        let err = read_frame(&mut bytes, 1024).await.expect_err("too large");
        assert!(matches!(err, ProtocolError::FrameTooLarge(65_536)));
    }

    #[tokio::test]
    async fn frames_arrive_whole_across_small_writes() {
        let (mut client, mut server) = tokio::io::duplex(3);
        let writer = tokio::spawn(async move {
            write_frame(&mut client, b"hello world").await.expect("write");
            write_frame(&mut client, b"").await.expect("write empty");
        });
        let first = read_frame(&mut server, MAX_FRAME_BYTES).await.expect("first");
        let second = read_frame(&mut server, MAX_FRAME_BYTES).await.expect("second");
        writer.await.expect("writer task");
        assert_eq!(first, b"hello world");
        assert!(second.is_empty());
    }

    #[test]
    fn welcome_carries_snapshot_player_and_level() {
        let entity = Entity::new("Stone", EntitySeed::new("boulder", 3, 3, 10.0));
        let message = ServerMessage::welcome(vec![entity.to_record()], entity.id, "level_0");
        let value: Value =
            serde_json::from_slice(&message.encode().expect("encode")).expect("json");
        assert_eq!(value["type"], "welcome");
        assert_eq!(value["level_key"], "level_0");
        assert_eq!(value["player_id"], entity.id.to_string());
        assert_eq!(value["world_state"][0]["class_name"], "Stone");

        let decoded = ServerMessage::decode(&message.encode().expect("encode")).expect("decode");
        assert_eq!(decoded, message);
    }

    #[test]
    fn other_schema_versions_are_refused() {
        let raw = br#"{"type":"state","schema_version":99,"world_state":[],"level_key":"x","phase":"resolved"}"#;
        assert!(matches!(
            ServerMessage::decode(raw),
            Err(ProtocolError::UnsupportedSchema(99))
        ));
    }

    #[test]
    fn parse_input_defaults_missing_keys() {
        let parsed = parse_client_message(r#"{"type":"input","left":true}"#);
        assert_eq!(
            parsed,
            Some(ClientMessage::Input(InputState {
                left: true,
                ..InputState::default()
            }))
        );
    }

    #[test]
    fn parse_input_rejects_non_boolean_keys() {
        assert!(parse_client_message(r#"{"type":"input","up":"yes"}"#).is_none());
    }

    #[test]
    fn portal_request_is_multiplexed_with_input() {
        let request = ClientMessage::PortalRequest {
            target_level: "level_1".to_string(),
            exit_name: "gate_west".to_string(),
        };
        let raw = String::from_utf8(request.encode()).expect("utf8");
        assert!(raw.contains(r#""type":"portal_request""#));
        assert_eq!(parse_client_message(&raw), Some(request));
        assert!(parse_client_message(r#"{"type":"portal_request","target_level":"level_1"}"#).is_none());
    }

    #[test]
    fn unknown_message_type_is_ignored() {
        assert!(parse_client_message(r#"{"type":"dance"}"#).is_none());
        assert!(parse_client_message("not json").is_none());
    }
}
