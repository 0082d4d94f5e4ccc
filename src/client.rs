//! Client session: handshake, a fixed-rate input sender, a receiver that
//! keeps only the newest snapshot, and a render loop that reconciles it.

use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::constants::{KEY_HOLD_MS, MAX_FRAME_BYTES};
use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::{read_frame, write_frame, ClientMessage, ServerMessage};
use crate::registry::ClassRegistry;
use crate::replica::Replica;
use crate::types::{InputState, PortalLink};

/// Produces the current key state once per input period.
pub trait InputSource: Send + 'static {
    fn poll(&mut self) -> InputState;
}

pub trait Renderer {
    fn render(&mut self, replica: &Replica);
}

/// Logs the local player's view instead of drawing it.
#[derive(Debug, Default)]
pub struct LogRenderer {
    last_position: Option<(i32, i32)>,
}

impl Renderer for LogRenderer {
    fn render(&mut self, replica: &Replica) {
        let Some(player) = replica.player() else {
            return;
        };
        let position = (player.x, player.y);
        if self.last_position != Some(position) {
            info!(
                level = replica.level_key(),
                x = player.x,
                y = player.y,
                health = player.health,
                entities = replica.level().iter_by_draw_order().len(),
                "player moved"
            );
            self.last_position = Some(position);
        }
        if let Some(speech) = replica
            .level()
            .iter()
            .filter(|entity| entity.id != player.id)
            .find_map(|entity| entity.speech.as_deref().map(|s| (entity.name.as_str(), s)))
        {
            debug!(speaker = speech.0, says = speech.1, "heard");
        }
    }
}

/// Line-based keyboard: each line lists keys (`w a s d` arrows, `g` grab,
/// `c` cast, `p` portal). A key stays held for a short while after its line.
pub struct StdinInput {
    rx: watch::Receiver<(InputState, Instant)>,
    hold: Duration,
}

impl StdinInput {
    pub fn spawn() -> Self {
        let (tx, rx) = watch::channel((InputState::default(), Instant::now()));
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send((parse_keys(&line), Instant::now())).is_err() {
                    break;
                }
            }
        });
        Self {
            rx,
            hold: Duration::from_millis(KEY_HOLD_MS),
        }
    }
}

impl InputSource for StdinInput {
    fn poll(&mut self) -> InputState {
        let (input, pressed_at) = *self.rx.borrow();
        if pressed_at.elapsed() > self.hold {
            InputState::default()
        } else {
            input
        }
    }
}

pub fn parse_keys(line: &str) -> InputState {
    let mut input = InputState::default();
    for key in line.chars() {
        match key.to_ascii_lowercase() {
            'w' => input.up = true,
            's' => input.down = true,
            'a' => input.left = true,
            'd' => input.right = true,
            'g' => input.grab = true,
            'c' => input.cast = true,
            'p' => input.portal = true,
            _ => {}
        }
    }
    input
}

pub struct ClientSession {
    stream: TcpStream,
    replica: Replica,
}

impl ClientSession {
    pub async fn connect(config: &ClientConfig, registry: ClassRegistry) -> ProtocolResult<Self> {
        let stream = TcpStream::connect(config.server_addr()).await?;
        stream.set_nodelay(true)?;
        Self::handshake(stream, registry).await
    }

    /// Waits for the welcome frame and mirrors its snapshot.
    pub async fn handshake(mut stream: TcpStream, registry: ClassRegistry) -> ProtocolResult<Self> {
        let payload = read_frame(&mut stream, MAX_FRAME_BYTES).await?;
        let ServerMessage::Welcome {
            world_state,
            player_id,
            level_key,
            ..
        } = ServerMessage::decode(&payload)?
        else {
            return Err(ProtocolError::UnexpectedMessage(
                "expected welcome".to_string(),
            ));
        };
        let mut replica = Replica::new(registry, &level_key, player_id);
        replica.reconcile(&level_key, &world_state)?;
        info!(player = %player_id, level = %level_key, entities = world_state.len(), "joined");
        Ok(Self { stream, replica })
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    pub async fn send(&mut self, message: &ClientMessage) -> ProtocolResult<()> {
        write_frame(&mut self.stream, &message.encode()).await
    }

    /// Reads and reconciles the next state frame.
    pub async fn recv_state(&mut self) -> ProtocolResult<ServerMessage> {
        let payload = read_frame(&mut self.stream, MAX_FRAME_BYTES).await?;
        let message = ServerMessage::decode(&payload)?;
        apply(&mut self.replica, &message)?;
        Ok(message)
    }

    /// Runs until the connection drops.
    pub async fn run<I, R>(
        self,
        mut input: I,
        renderer: &mut R,
        config: &ClientConfig,
    ) -> ProtocolResult<()>
    where
        I: InputSource,
        R: Renderer,
    {
        let Self {
            stream,
            mut replica,
        } = self;
        let (mut reader, mut writer) = stream.into_split();
        let (latest_tx, mut latest_rx) = watch::channel::<Option<ServerMessage>>(None);
        let (keys_tx, keys_rx) = watch::channel(InputState::default());
        let (portal_tx, mut portal_rx) = mpsc::channel::<PortalLink>(1);

        let input_period = Duration::from_millis(config.input_period_ms);
        let sender = tokio::spawn(async move {
            let mut interval = tokio::time::interval(input_period);
            loop {
                interval.tick().await;
                let message = match portal_rx.try_recv() {
                    Ok(link) => ClientMessage::PortalRequest {
                        target_level: link.level_key,
                        exit_name: link.exit_name,
                    },
                    Err(_) => {
                        let keys = input.poll();
                        let _ = keys_tx.send(keys);
                        ClientMessage::Input(keys)
                    }
                };
                if let Err(err) = write_frame(&mut writer, &message.encode()).await {
                    warn!(%err, "input send failed");
                    break;
                }
            }
        });

        let receiver = tokio::spawn(async move {
            loop {
                let payload = read_frame(&mut reader, MAX_FRAME_BYTES).await?;
                let message = ServerMessage::decode(&payload)?;
                if latest_tx.send(Some(message)).is_err() {
                    return Ok::<(), ProtocolError>(());
                }
            }
        });

        let mut requested_from: Option<String> = None;
        let mut interval = tokio::time::interval(Duration::from_millis(config.render_period_ms));
        let outcome = loop {
            interval.tick().await;
            match latest_rx.has_changed() {
                Ok(true) => {
                    let latest = latest_rx.borrow_and_update().clone();
                    if let Some(message) = latest {
                        if let Err(err) = apply(&mut replica, &message) {
                            break Err(err);
                        }
                    }
                }
                Ok(false) => {}
                Err(_) => break Ok(()),
            }

            if requested_from.as_deref() != Some(replica.level_key()) {
                requested_from = None;
            }
            let portal_pressed = keys_rx.borrow().portal;
            if portal_pressed && requested_from.is_none() {
                requested_from = request_portal(&portal_tx, &replica);
            }
            renderer.render(&replica);
        };

        sender.abort();
        let received = match receiver.await {
            Ok(result) => result,
            Err(_) => Ok(()),
        };
        outcome.and(received)
    }
}

/// Queues a request for the portal underfoot. Returns the level it was sent
/// from, or `None` when nothing was queued so a later frame tries again.
fn request_portal(portal_tx: &mpsc::Sender<PortalLink>, replica: &Replica) -> Option<String> {
    let link = replica.portal_underfoot()?;
    match portal_tx.try_send(link.clone()) {
        Ok(()) => {
            info!(target = %link.level_key, exit = %link.exit_name, "entering portal");
            Some(replica.level_key().to_string())
        }
        Err(err) => {
            debug!(%err, "portal request not queued");
            None
        }
    }
}

fn apply(replica: &mut Replica, message: &ServerMessage) -> ProtocolResult<()> {
    match message {
        ServerMessage::State {
            world_state,
            level_key,
            ..
        } => {
            replica.reconcile(level_key, world_state)?;
            Ok(())
        }
        ServerMessage::Welcome { .. } => Err(ProtocolError::UnexpectedMessage(
            "welcome after handshake".to_string(),
        )),
    }
}
