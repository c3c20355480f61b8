//! Shared helpers for the end-to-end battle tests: a recording handler, a
//! deterministic datagram proxy for loss/duplication injection, and fixture
//! stat blocks.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arbok_battle::{PokemonStats, StatBoosts, Type};
use arbok_peer::{Peer, PeerConfig, PeerError, PeerHandle, PeerHandler};
use arbok_protocol::MessageKind;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// Everything a peer reported through its handler.
#[derive(Clone, Default)]
pub struct Events {
    pub connected: Vec<u32>,
    pub chats: Vec<(String, String)>,
    pub stickers: Vec<(String, String)>,
    pub battle_events: Vec<String>,
    pub turn_changes: Vec<bool>,
    pub discrepancies: usize,
    pub game_overs: Vec<(String, String)>,
    pub rematch_agreed: usize,
    pub errors: Vec<String>,
}

/// Handler that records every callback for later assertions.
#[derive(Clone, Default)]
pub struct Recorder {
    inner: Arc<Mutex<Events>>,
}

impl Recorder {
    pub fn snapshot(&self) -> Events {
        self.inner.lock().unwrap().clone()
    }
}

impl PeerHandler for Recorder {
    fn on_connected(&mut self, seed: u32) {
        self.inner.lock().unwrap().connected.push(seed);
    }

    fn on_chat(&mut self, sender: &str, text: &str) {
        self.inner
            .lock()
            .unwrap()
            .chats
            .push((sender.to_string(), text.to_string()));
    }

    fn on_sticker(&mut self, sender: &str, data: &str) {
        self.inner
            .lock()
            .unwrap()
            .stickers
            .push((sender.to_string(), data.to_string()));
    }

    fn on_battle_event(&mut self, text: &str) {
        self.inner.lock().unwrap().battle_events.push(text.to_string());
    }

    fn on_turn_changed(&mut self, my_turn: bool) {
        self.inner.lock().unwrap().turn_changes.push(my_turn);
    }

    fn on_discrepancy(&mut self) {
        self.inner.lock().unwrap().discrepancies += 1;
    }

    fn on_game_over(&mut self, winner: &str, loser: &str) {
        self.inner
            .lock()
            .unwrap()
            .game_overs
            .push((winner.to_string(), loser.to_string()));
    }

    fn on_rematch_agreed(&mut self) {
        self.inner.lock().unwrap().rematch_agreed += 1;
    }

    fn on_error(&mut self, error: &PeerError) {
        self.inner.lock().unwrap().errors.push(error.to_string());
    }
}

pub type PeerTask = JoinHandle<Result<(), PeerError>>;

pub async fn launch_host(config: PeerConfig) -> (PeerHandle, Recorder, PeerTask, SocketAddr) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (peer, handle) = Peer::host(config).await.expect("bind host");
    let addr = SocketAddr::from(([127, 0, 0, 1], handle.local_addr().port()));
    let recorder = Recorder::default();
    let mut handler = recorder.clone();
    let task = tokio::spawn(async move { peer.run(&mut handler).await });
    (handle, recorder, task, addr)
}

pub async fn launch_joiner(
    config: PeerConfig,
    host: SocketAddr,
) -> (PeerHandle, Recorder, PeerTask) {
    let (peer, handle) = Peer::join(config, host).await.expect("bind joiner");
    let recorder = Recorder::default();
    let mut handler = recorder.clone();
    let task = tokio::spawn(async move { peer.run(&mut handler).await });
    (handle, recorder, task)
}

pub async fn launch_spectator(
    config: PeerConfig,
    host: SocketAddr,
) -> (PeerHandle, Recorder, PeerTask) {
    let (peer, handle) = Peer::spectate(config, host).await.expect("bind spectator");
    let recorder = Recorder::default();
    let mut handler = recorder.clone();
    let task = tokio::spawn(async move { peer.run(&mut handler).await });
    (handle, recorder, task)
}

/// Poll until the condition holds, panicking after five seconds.
pub async fn wait_for<F: FnMut() -> bool>(mut cond: F, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub fn pikachu() -> PokemonStats {
    PokemonStats {
        name: "Pikachu".into(),
        hp: 35,
        attack: 55,
        defense: 40,
        sp_attack: 50,
        sp_defense: 50,
        speed: 90,
        type1: Type::Electric,
        type2: None,
    }
}

pub fn charmander() -> PokemonStats {
    PokemonStats {
        name: "Charmander".into(),
        hp: 39,
        attack: 52,
        defense: 43,
        sp_attack: 60,
        sp_defense: 50,
        speed: 65,
        type1: Type::Fire,
        type2: None,
    }
}

/// A one-hit punching bag for game-over scenarios.
pub fn magikarp() -> PokemonStats {
    PokemonStats {
        name: "Magikarp".into(),
        hp: 5,
        attack: 10,
        defense: 55,
        sp_attack: 15,
        sp_defense: 20,
        speed: 80,
        type1: Type::Water,
        type2: None,
    }
}

pub fn boosts(attack: u32, defense: u32) -> StatBoosts {
    StatBoosts {
        special_attack_uses: attack,
        special_defense_uses: defense,
    }
}

/// Direction of travel through the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToHost,
    ToJoiner,
}

/// What the proxy does with one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Forward,
    Drop,
    Duplicate,
}

/// A tiny man-in-the-middle UDP forwarder. The joiner connects to the
/// returned address instead of the host; the rule decides per datagram
/// whether it is forwarded, dropped or delivered twice. Deterministic, so
/// the loss scenarios are exactly reproducible.
pub async fn start_proxy<F>(host: SocketAddr, rule: F) -> SocketAddr
where
    F: FnMut(Direction, MessageKind) -> Verdict + Send + 'static,
{
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind proxy");
    let addr = socket.local_addr().expect("proxy addr");
    let mut rule = rule;
    tokio::spawn(async move {
        let mut joiner: Option<SocketAddr> = None;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let (len, src) = match socket.recv_from(&mut buf).await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            let data = &buf[..len];
            let (direction, dest) = if src == host {
                match joiner {
                    Some(joiner) => (Direction::ToJoiner, joiner),
                    None => continue,
                }
            } else {
                joiner = Some(src);
                (Direction::ToHost, host)
            };
            let kind = match arbok_protocol::decode(data) {
                Ok(message) => message.kind(),
                Err(_) => continue,
            };
            match rule(direction, kind) {
                Verdict::Forward => {
                    let _ = socket.send_to(data, dest).await;
                }
                Verdict::Drop => {}
                Verdict::Duplicate => {
                    let _ = socket.send_to(data, dest).await;
                    let _ = socket.send_to(data, dest).await;
                }
            }
        }
    });
    addr
}
