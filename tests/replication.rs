use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use flatland_sim::client::ClientSession;
use flatland_sim::config::ServerConfig;
use flatland_sim::entity::EntityId;
use flatland_sim::protocol::{ClientMessage, ServerMessage, UpdatePhase};
use flatland_sim::registry::ClassRegistry;
use flatland_sim::server::{self, ServerState, SharedState};
use flatland_sim::types::InputState;
use flatland_sim::world::World;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

const WAIT: Duration = Duration::from_secs(10);

async fn start_server() -> (SocketAddr, SharedState) {
    let registry = ClassRegistry::with_builtin_classes();
    let world = World::builtin(&registry, 17).expect("builtin world");
    let state: SharedState = Arc::new(Mutex::new(ServerState::new(world, registry, "level_0")));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let config = ServerConfig {
        tick_ms: 20,
        ..ServerConfig::default()
    };
    let serving = state.clone();
    tokio::spawn(async move {
        let _ = server::serve(listener, serving, &config).await;
    });
    (addr, state)
}

async fn join(addr: SocketAddr) -> ClientSession {
    let stream = TcpStream::connect(addr).await.expect("connect");
    ClientSession::handshake(stream, ClassRegistry::with_builtin_classes())
        .await
        .expect("handshake")
}

/// Reads state frames until `done` holds for the session.
async fn wait_until(session: &mut ClientSession, done: impl Fn(&ClientSession) -> bool) {
    tokio::time::timeout(WAIT, async {
        while !done(session) {
            session.recv_state().await.expect("state frame");
        }
    })
    .await
    .expect("condition reached in time");
}

fn local_ids(session: &ClientSession) -> Vec<EntityId> {
    let mut ids = session.replica().level().ids();
    ids.sort();
    ids
}

#[tokio::test]
async fn handshake_then_alternating_broadcasts() {
    let (addr, _state) = start_server().await;
    let mut session = join(addr).await;
    assert_eq!(session.replica().level_key(), "level_0");
    assert!(session.replica().player().is_some());

    let mut phases = Vec::new();
    for _ in 0..4 {
        let message = tokio::time::timeout(WAIT, session.recv_state())
            .await
            .expect("frame in time")
            .expect("state frame");
        let ServerMessage::State {
            world_state, phase, ..
        } = message
        else {
            panic!("expected state");
        };
        let mut remote: Vec<EntityId> = world_state.iter().map(|record| record.id).collect();
        remote.sort();
        assert_eq!(local_ids(&session), remote);
        phases.push(phase);
    }
    let staged = phases
        .iter()
        .filter(|phase| **phase == UpdatePhase::Staged)
        .count();
    assert_eq!(staged, 2);
    assert_ne!(phases[0], phases[1]);
}

#[tokio::test]
async fn input_moves_the_player() {
    let (addr, _state) = start_server().await;
    let mut session = join(addr).await;
    let start_x = session.replica().player().expect("player").x;

    session
        .send(&ClientMessage::Input(InputState {
            left: true,
            ..InputState::default()
        }))
        .await
        .expect("send input");
    wait_until(&mut session, |s| {
        s.replica().player().map(|p| p.x) != Some(start_x)
    })
    .await;

    let player = session.replica().player().expect("player");
    let robe = player.children.first().copied().expect("robe child");
    let robe = session.replica().level().get(robe).expect("robe replicated");
    assert_eq!((robe.x, robe.y), (player.x, player.y));
}

#[tokio::test]
async fn portal_request_switches_level() {
    let (addr, state) = start_server().await;
    let mut session = join(addr).await;
    let player_id = session.replica().player_id();

    session
        .send(&ClientMessage::PortalRequest {
            target_level: "level_1".to_string(),
            exit_name: "gate_west".to_string(),
        })
        .await
        .expect("send portal request");
    wait_until(&mut session, |s| s.replica().level_key() == "level_1").await;

    let exit = session
        .replica()
        .level()
        .find_by_name("gate_west")
        .map(|gate| (gate.x, gate.y))
        .expect("exit replicated");
    let player = session.replica().player().expect("player replicated");
    assert_eq!((player.x, player.y), exit);
    assert!(session
        .replica()
        .level()
        .iter()
        .all(|entity| entity.name != "boulder"));

    let guard = state.lock().await;
    assert_eq!(guard.world().locate(player_id), Some("level_1"));
}

#[tokio::test]
async fn dropped_client_disappears_for_others() {
    let (addr, state) = start_server().await;
    let mut watcher = join(addr).await;
    let leaver = join(addr).await;
    let leaver_id = leaver.replica().player_id();

    wait_until(&mut watcher, |s| s.replica().level().contains(leaver_id)).await;
    drop(leaver);
    wait_until(&mut watcher, |s| !s.replica().level().contains(leaver_id)).await;

    tokio::time::timeout(WAIT, async {
        loop {
            if state.lock().await.client_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("server forgot the client");
}
