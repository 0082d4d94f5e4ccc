//! Authoritative server: accept loop, one reader and one writer task per
//! client, and a fixed-rate world loop. All world and client bookkeeping
//! lives behind one mutex.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::AsyncWrite;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::constants::{MAX_FRAME_BYTES, OUTBOUND_QUEUE_LEN};
use crate::entity::EntityId;
use crate::error::{ProtocolError, ProtocolResult, SimResult};
use crate::level::StepContext;
use crate::protocol::{
    parse_client_message, read_frame, write_frame, ClientMessage, ServerMessage, UpdatePhase,
};
use crate::registry::ClassRegistry;
use crate::types::{InputState, PortalLink};
use crate::world::World;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub type SharedState = Arc<Mutex<ServerState>>;

#[derive(Clone, Debug)]
struct ClientContext {
    tx: mpsc::Sender<OutboundMessage>,
    player_id: EntityId,
    level_key: String,
    latest_input: InputState,
    released: bool,
    pending_portal: Option<PortalLink>,
}

#[derive(Clone, Debug)]
pub enum OutboundMessage {
    Frame(Arc<Vec<u8>>),
}

pub struct ServerState {
    world: World,
    registry: ClassRegistry,
    clients: HashMap<String, ClientContext>,
    start_level: String,
}

impl ServerState {
    pub fn new(world: World, registry: ClassRegistry, start_level: impl Into<String>) -> Self {
        Self {
            world,
            registry,
            clients: HashMap::new(),
            start_level: start_level.into(),
        }
    }

    /// Builds the world described by `config`: a JSON level file when one
    /// is given, the built-in levels otherwise.
    pub fn from_config(config: &ServerConfig) -> SimResult<Self> {
        let registry = ClassRegistry::with_builtin_classes();
        let world = match &config.levels_path {
            Some(path) => World::load(path, &registry, config.seed)?,
            None => World::builtin(&registry, config.seed)?,
        };
        Ok(Self::new(world, registry, config.start_level.clone()))
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Spawns the client's player and queues the welcome frame.
    fn connect_client(
        &mut self,
        client_id: &str,
        tx: mpsc::Sender<OutboundMessage>,
    ) -> ProtocolResult<EntityId> {
        let level_key = self.start_level.clone();
        let name = format!("Player{}", NEXT_ID.fetch_add(1, Ordering::Relaxed));
        let player_id = self
            .world
            .spawn_player(&self.registry, &level_key, &name)?;
        let snapshot = self
            .world
            .level(&level_key)
            .map(|level| level.snapshot())
            .unwrap_or_default();
        let welcome = ServerMessage::welcome(snapshot, player_id, &level_key).encode()?;

        if tx.try_send(OutboundMessage::Frame(Arc::new(welcome))).is_err() {
            self.world.remove_player_everywhere(player_id);
            return Err(ProtocolError::SendTimeout);
        }
        self.clients.insert(
            client_id.to_string(),
            ClientContext {
                tx,
                player_id,
                level_key: level_key.clone(),
                latest_input: InputState::default(),
                released: false,
                pending_portal: None,
            },
        );
        info!(client = client_id, player = %player_id, level = %level_key, "client connected");
        Ok(player_id)
    }

    /// Stores parsed input for the next tick. The world is never touched here.
    fn apply_client_message(&mut self, client_id: &str, message: ClientMessage) {
        let Some(client) = self.clients.get_mut(client_id) else {
            return;
        };
        match message {
            ClientMessage::Input(input) => {
                client.released |= input.is_idle();
                client.latest_input = input;
            }
            ClientMessage::PortalRequest {
                target_level,
                exit_name,
            } => {
                debug!(client = client_id, target = %target_level, exit = %exit_name, "portal request");
                client.pending_portal = Some(PortalLink {
                    level_key: target_level,
                    exit_name,
                });
            }
        }
    }
}

pub async fn run(config: ServerConfig) -> ProtocolResult<()> {
    let state = Arc::new(Mutex::new(ServerState::from_config(&config)?));
    let listener = TcpListener::bind(config.bind_addr()).await?;
    info!(addr = %config.bind_addr(), seed = config.seed, "listening");
    serve(listener, state, &config).await
}

/// Starts the world loop and accepts clients until the listener fails.
pub async fn serve(
    listener: TcpListener,
    state: SharedState,
    config: &ServerConfig,
) -> ProtocolResult<()> {
    start_tick_loop(state.clone(), config.tick_period());
    let send_timeout = config.send_timeout();
    loop {
        let (stream, addr) = listener.accept().await?;
        if let Err(err) = stream.set_nodelay(true) {
            warn!(%addr, %err, "could not disable nagle");
        }
        debug!(%addr, "accepted connection");
        tokio::spawn(handle_connection(state.clone(), stream, send_timeout));
    }
}

async fn handle_connection(state: SharedState, stream: TcpStream, send_timeout: Duration) {
    let client_id = make_id("client");
    let (mut reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_QUEUE_LEN);

    {
        let mut guard = state.lock().await;
        if let Err(err) = guard.connect_client(&client_id, tx) {
            warn!(client = %client_id, %err, "handshake failed");
            return;
        }
    }

    let mut writer_task = tokio::spawn(write_outbound(writer, rx, send_timeout));

    tokio::select! {
        result = read_inbound(&state, &client_id, &mut reader) => {
            match result {
                Err(ProtocolError::ConnectionBroken { .. }) => {
                    info!(client = %client_id, "connection closed by peer");
                }
                Err(err) => warn!(client = %client_id, %err, "read loop failed"),
                Ok(()) => {}
            }
            writer_task.abort();
        }
        _ = &mut writer_task => {
            debug!(client = %client_id, "writer finished");
        }
    }

    let mut guard = state.lock().await;
    disconnect_client_internal(&mut guard, &client_id);
}

async fn read_inbound(
    state: &SharedState,
    client_id: &str,
    reader: &mut OwnedReadHalf,
) -> ProtocolResult<()> {
    loop {
        let payload = read_frame(reader, MAX_FRAME_BYTES).await?;
        let Ok(raw) = std::str::from_utf8(&payload) else {
            warn!(client = client_id, "non-utf8 frame ignored");
            continue;
        };
        let Some(message) = parse_client_message(raw) else {
            warn!(client = client_id, "malformed client message ignored");
            continue;
        };
        state.lock().await.apply_client_message(client_id, message);
    }
}

/// Drains the outbound queue. Ends on the first failed or timed out write,
/// or once every sender is gone.
async fn write_outbound<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<OutboundMessage>,
    timeout: Duration,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(outbound) = rx.recv().await {
        let OutboundMessage::Frame(payload) = outbound;
        match tokio::time::timeout(timeout, write_frame(&mut writer, &payload)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(%err, "send failed");
                break;
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "send timed out");
                break;
            }
        }
    }
}

pub fn start_tick_loop(state: SharedState, period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let mut guard = state.lock().await;
            tick_world(&mut guard, now_ms());
        }
    });
}

/// One server tick over every level that hosts at least one client.
pub fn tick_world(state: &mut ServerState, now_ms: u64) {
    apply_pending_inputs(state);
    apply_pending_portals(state);

    let active: BTreeSet<String> = state
        .clients
        .values()
        .map(|client| client.level_key.clone())
        .collect();

    for level_key in active {
        let ServerState {
            world, registry, ..
        } = &mut *state;
        let Some(level) = world.level_mut(&level_key) else {
            continue;
        };
        let ctx = StepContext { now_ms, registry };

        level.reset_frame_flags();
        level.run_decide_phase(&ctx);
        let staged = level.snapshot();
        broadcast_level(
            state,
            &level_key,
            ServerMessage::state(staged, &level_key, UpdatePhase::Staged),
        );

        let ServerState {
            world, registry, ..
        } = &mut *state;
        let Some(level) = world.level_mut(&level_key) else {
            continue;
        };
        let ctx = StepContext { now_ms, registry };
        level.run_act_phase(&ctx);
        let (width, height) = (level.width(), level.height());
        level.wrap_positions(width, height);
        let removed = level.expire_deferred_deaths(now_ms);
        if !removed.is_empty() {
            debug!(level = %level_key, count = removed.len(), "expired deferred deaths");
        }
        let resolved = level.snapshot();
        broadcast_level(
            state,
            &level_key,
            ServerMessage::state(resolved, &level_key, UpdatePhase::Resolved),
        );
    }
}

fn apply_pending_inputs(state: &mut ServerState) {
    for client in state.clients.values_mut() {
        let Some(controller) = state
            .world
            .level_mut(&client.level_key)
            .and_then(|level| level.get_mut(client.player_id))
            .and_then(|player| player.behavior.controller_mut())
        else {
            continue;
        };
        if std::mem::take(&mut client.released) {
            controller.offer(InputState::default());
        }
        controller.offer(client.latest_input);
    }
}

fn apply_pending_portals(state: &mut ServerState) {
    let requests: Vec<(String, EntityId, String, PortalLink)> = state
        .clients
        .iter_mut()
        .filter_map(|(client_id, client)| {
            let link = client.pending_portal.take()?;
            Some((client_id.clone(), client.player_id, client.level_key.clone(), link))
        })
        .collect();

    for (client_id, player_id, from, link) in requests {
        match state
            .world
            .transfer(player_id, &from, &link.level_key, &link.exit_name)
        {
            Ok(()) => {
                if let Some(client) = state.clients.get_mut(&client_id) {
                    client.level_key = link.level_key;
                }
            }
            Err(err) => warn!(client = %client_id, %err, "portal request rejected"),
        }
    }
}

/// Queues `message` for every client assigned to `level_key`. Clients whose
/// queue is full are disconnected after the loop; the others still receive it.
fn broadcast_level(state: &mut ServerState, level_key: &str, message: ServerMessage) {
    let payload = match message.encode() {
        Ok(bytes) => Arc::new(bytes),
        Err(err) => {
            warn!(level = level_key, %err, "could not encode snapshot");
            return;
        }
    };
    let mut failed_clients = Vec::new();
    for (client_id, client) in &state.clients {
        if client.level_key != level_key {
            continue;
        }
        if client
            .tx
            .try_send(OutboundMessage::Frame(payload.clone()))
            .is_err()
        {
            failed_clients.push(client_id.clone());
        }
    }
    for client_id in failed_clients {
        warn!(client = %client_id, "outbound queue full, disconnecting");
        disconnect_client_internal(state, &client_id);
    }
}

/// Forgets the client and removes its player and the player's children from
/// every level. Dropping the context closes the writer.
fn disconnect_client_internal(state: &mut ServerState, client_id: &str) {
    let Some(context) = state.clients.remove(client_id) else {
        return;
    };
    let removed = state.world.remove_player_everywhere(context.player_id);
    info!(client = client_id, player = %context.player_id, removed, "client disconnected");
}

fn make_id(prefix: &str) -> String {
    let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{seq}")
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ServerState {
        let registry = ClassRegistry::with_builtin_classes();
        let world = World::builtin(&registry, 3).expect("builtin world");
        ServerState::new(world, registry, "level_0")
    }

    fn decode(outbound: OutboundMessage) -> ServerMessage {
        let OutboundMessage::Frame(bytes) = outbound;
        ServerMessage::decode(&bytes).expect("valid frame")
    }

    #[test]
    fn welcome_is_queued_first_with_the_new_player() {
        let mut state = state();
        let (tx, mut rx) = mpsc::channel(8);
        let player = state.connect_client("c1", tx).expect("connect");
        match decode(rx.try_recv().expect("welcome")) {
            ServerMessage::Welcome {
                world_state,
                player_id,
                level_key,
                ..
            } => {
                assert_eq!(player_id, player);
                assert_eq!(level_key, "level_0");
                assert!(world_state.iter().any(|record| record.id == player));
            }
            other => panic!("expected welcome, got {other:?}"),
        }
    }

    #[test]
    fn each_tick_sends_staged_then_resolved() {
        let mut state = state();
        let (tx, mut rx) = mpsc::channel(8);
        state.connect_client("c1", tx).expect("connect");
        rx.try_recv().expect("welcome");

        tick_world(&mut state, 10_000);
        let phases: Vec<UpdatePhase> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|outbound| match decode(outbound) {
                ServerMessage::State { phase, .. } => phase,
                other => panic!("expected state, got {other:?}"),
            })
            .collect();
        assert_eq!(phases, vec![UpdatePhase::Staged, UpdatePhase::Resolved]);
    }

    #[test]
    fn levels_without_clients_are_not_stepped() {
        let mut state = state();
        let (tx, _rx) = mpsc::channel(8);
        state.connect_client("c1", tx).expect("connect");
        let before: Vec<_> = state
            .world()
            .level("level_1")
            .expect("level_1")
            .iter()
            .map(|entity| entity.tick.last_tick)
            .collect();
        tick_world(&mut state, 10_000);
        let after: Vec<_> = state
            .world()
            .level("level_1")
            .expect("level_1")
            .iter()
            .map(|entity| entity.tick.last_tick)
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn input_is_applied_on_the_next_tick() {
        let mut state = state();
        let (tx, _rx) = mpsc::channel(32);
        let player = state.connect_client("c1", tx).expect("connect");
        state.apply_client_message(
            "c1",
            ClientMessage::Input(InputState {
                left: true,
                ..InputState::default()
            }),
        );
        tick_world(&mut state, 10_000);
        let entity = state
            .world()
            .level("level_0")
            .and_then(|level| level.get(player))
            .expect("player");
        assert_eq!((entity.x, entity.prev_x), (4, 5));
    }

    fn player_x(state: &ServerState, player: EntityId) -> i32 {
        state
            .world()
            .level("level_0")
            .and_then(|level| level.get(player))
            .map(|entity| entity.x)
            .expect("player")
    }

    #[test]
    fn held_key_moves_once_until_released() {
        let mut state = state();
        let (tx, _rx) = mpsc::channel(64);
        let player = state.connect_client("c1", tx).expect("connect");
        let left = ClientMessage::Input(InputState {
            left: true,
            ..InputState::default()
        });
        state.apply_client_message("c1", left.clone());

        let mut xs = Vec::new();
        for now in [10_000, 10_400, 10_800, 11_200] {
            tick_world(&mut state, now);
            xs.push(player_x(&state, player));
        }
        assert_eq!(xs, vec![4, 4, 4, 4]);

        // Release and press again between two ticks.
        state.apply_client_message("c1", ClientMessage::Input(InputState::default()));
        state.apply_client_message("c1", left);
        tick_world(&mut state, 11_600);
        assert_eq!(player_x(&state, player), 3);
    }

    #[test]
    fn full_queue_disconnects_only_that_client() {
        let mut state = state();
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(32);
        let slow = state.connect_client("slow", slow_tx).expect("slow");
        let fast = state.connect_client("fast", fast_tx).expect("fast");
        fast_rx.try_recv().expect("welcome");

        tick_world(&mut state, 10_000);
        assert_eq!(state.client_count(), 1);
        assert_eq!(state.world().locate(slow), None);
        assert_eq!(state.world().locate(fast), Some("level_0"));
        assert!(fast_rx.try_recv().is_ok());
        assert!(fast_rx.try_recv().is_ok());
    }

    #[test]
    fn portal_request_moves_player_and_reassigns_level() {
        let mut state = state();
        let (tx, mut rx) = mpsc::channel(32);
        let player = state.connect_client("c1", tx).expect("connect");
        rx.try_recv().expect("welcome");
        state.apply_client_message(
            "c1",
            ClientMessage::PortalRequest {
                target_level: "level_1".to_string(),
                exit_name: "gate_west".to_string(),
            },
        );
        tick_world(&mut state, 10_000);
        assert_eq!(state.world().locate(player), Some("level_1"));
        match decode(rx.try_recv().expect("staged")) {
            ServerMessage::State { level_key, .. } => assert_eq!(level_key, "level_1"),
            other => panic!("expected state, got {other:?}"),
        }
    }

    #[test]
    fn bad_portal_request_keeps_the_client_in_place() {
        let mut state = state();
        let (tx, _rx) = mpsc::channel(32);
        let player = state.connect_client("c1", tx).expect("connect");
        state.apply_client_message(
            "c1",
            ClientMessage::PortalRequest {
                target_level: "level_9".to_string(),
                exit_name: "nowhere".to_string(),
            },
        );
        tick_world(&mut state, 10_000);
        assert_eq!(state.world().locate(player), Some("level_0"));
    }

    #[test]
    fn disconnect_removes_player_and_robe() {
        let mut state = state();
        let (tx, _rx) = mpsc::channel(8);
        let before = state.world().level("level_0").expect("level_0").len();
        state.connect_client("c1", tx).expect("connect");
        assert_eq!(state.world().level("level_0").expect("level_0").len(), before + 2);
        disconnect_client_internal(&mut state, "c1");
        disconnect_client_internal(&mut state, "c1");
        assert_eq!(state.world().level("level_0").expect("level_0").len(), before);
    }

    #[tokio::test]
    async fn writer_stops_when_the_peer_stalls() {
        let (client, _server) = tokio::io::duplex(8);
        let (tx, rx) = mpsc::channel(4);
        tx.try_send(OutboundMessage::Frame(Arc::new(vec![0u8; 64])))
            .expect("queue");
        let writer = tokio::spawn(write_outbound(client, rx, Duration::from_millis(50)));
        tokio::time::timeout(Duration::from_secs(2), writer)
            .await
            .expect("writer gave up")
            .expect("writer task");
    }
}
