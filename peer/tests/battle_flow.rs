//! End-to-end scenarios over real loopback UDP.
//!
//! Each test starts real peers (host / joiner / spectators), drives them
//! through their handles, and asserts on recorded handler events and status
//! snapshots. Loss and duplication are injected with the deterministic
//! datagram proxy from the support module.

mod support;

use std::time::Duration;

use arbok_battle::{BattlePhase, BattlePokemon, DamageEngine, MoveDex, StatBoosts};
use arbok_peer::{PeerConfig, PeerError, PeerHandle};
use arbok_protocol::{encode, ChatContent, Message, MessageKind};
use support::*;

fn host_config() -> PeerConfig {
    PeerConfig::default().with_name("Host")
}

fn joiner_config() -> PeerConfig {
    PeerConfig::default().with_name("Joiner")
}

/// Expected outcome of the first turn for a given seed, computed the same
/// way both peers must compute it.
fn first_turn_damage(
    seed: u32,
    attacker: arbok_battle::PokemonStats,
    defender: arbok_battle::PokemonStats,
    move_name: &str,
    attacker_boost: bool,
    defender_boost: bool,
) -> arbok_battle::TurnOutcome {
    let mut engine = DamageEngine::new(seed);
    let attacker = BattlePokemon::new(attacker, StatBoosts::default());
    let defender = BattlePokemon::new(defender, StatBoosts::default());
    let mv = MoveDex::builtin().get(move_name).unwrap().clone();
    engine.turn_outcome(&attacker, &defender, &mv, attacker_boost, defender_boost)
}

/// Wait until the in-flight turn has committed on both sides and the
/// expected peer holds the turn.
async fn wait_turn_flip(next_mover: &PeerHandle, other: &PeerHandle) {
    wait_for(
        || {
            let a = next_mover.status();
            let b = other.status();
            a.my_turn
                && a.phase == Some(BattlePhase::WaitingForMove)
                && b.phase == Some(BattlePhase::WaitingForMove)
        },
        "turn completion",
    )
    .await;
}

async fn wait_until_ready(host: &PeerHandle, joiner: &PeerHandle) {
    wait_for(
        || {
            host.status().phase == Some(BattlePhase::WaitingForMove)
                && joiner.status().phase == Some(BattlePhase::WaitingForMove)
        },
        "both peers in WaitingForMove",
    )
    .await;
}

// S1: handshake plus setup, loss-free.
#[tokio::test]
async fn handshake_and_setup() {
    let (host, host_rec, _host_task, host_addr) = launch_host(host_config()).await;
    let (joiner, joiner_rec, _joiner_task) = launch_joiner(joiner_config(), host_addr).await;

    wait_for(
        || host.status().connected && joiner.status().connected,
        "handshake completion",
    )
    .await;

    let seed = joiner.status().seed.expect("joiner seed");
    assert!((1..=99_999).contains(&seed));
    assert_eq!(host.status().seed, Some(seed));
    assert_eq!(host_rec.snapshot().connected, vec![seed]);
    assert_eq!(joiner_rec.snapshot().connected, vec![seed]);

    host.start_battle(pikachu(), boosts(5, 5)).unwrap();
    joiner.start_battle(charmander(), boosts(5, 5)).unwrap();
    wait_until_ready(&host, &joiner).await;

    let host_status = host.status();
    let joiner_status = joiner.status();
    assert!(host_status.my_turn, "host moves first");
    assert!(!joiner_status.my_turn);
    assert_eq!(host_status.me.unwrap().name, "Pikachu");
    assert_eq!(host_status.opponent.unwrap().name, "Charmander");
    assert_eq!(joiner_status.me.unwrap().name, "Charmander");
    assert_eq!(joiner_status.opponent.unwrap().name, "Pikachu");
}

// S2: a single turn with matching calculations on both sides.
#[tokio::test]
async fn single_turn_matching_calculations() {
    let (host, host_rec, _host_task, host_addr) = launch_host(host_config()).await;
    let (joiner, joiner_rec, _joiner_task) = launch_joiner(joiner_config(), host_addr).await;

    wait_for(|| joiner.status().connected, "handshake").await;
    host.start_battle(pikachu(), boosts(5, 5)).unwrap();
    joiner.start_battle(charmander(), boosts(5, 5)).unwrap();
    wait_until_ready(&host, &joiner).await;

    let seed = host.status().seed.unwrap();
    let expected = first_turn_damage(seed, pikachu(), charmander(), "Thunderbolt", false, false);

    host.submit_move("Thunderbolt", false).unwrap();
    wait_turn_flip(&joiner, &host).await;

    let host_status = host.status();
    let joiner_status = joiner.status();
    assert!(!host_status.my_turn);
    let expected_hp = expected.defender_hp_clamped();
    assert_eq!(joiner_status.me.unwrap().current_hp, expected_hp);
    assert_eq!(host_status.opponent.unwrap().current_hp, expected_hp);

    // Both sides surfaced the same deterministic status line, once.
    let host_events = host_rec.snapshot().battle_events;
    let joiner_events = joiner_rec.snapshot().battle_events;
    assert_eq!(host_events, vec![expected.status_message.clone()]);
    assert_eq!(joiner_events, vec![expected.status_message]);
    assert_eq!(host_rec.snapshot().discrepancies, 0);
}

// S3: duplicate delivery is re-ACKed and applied exactly once (raw socket).
#[tokio::test]
async fn duplicate_chat_is_reacked_and_displayed_once() {
    let (_host, host_rec, _host_task, host_addr) = launch_host(host_config()).await;

    let raw = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let chat = Message::ChatMessage {
        sequence_number: 9,
        sender_name: "Rando".into(),
        content: ChatContent::Text("hi".into()),
    };
    let bytes = encode(&chat);
    raw.send_to(&bytes, host_addr).await.unwrap();
    raw.send_to(&bytes, host_addr).await.unwrap();

    // Both copies must be ACKed, the second one as a pure re-ACK.
    let mut acks = 0;
    let mut buf = [0u8; 2048];
    while acks < 2 {
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), raw.recv_from(&mut buf))
            .await
            .expect("timed out waiting for ACKs")
            .unwrap();
        match arbok_protocol::decode(&buf[..len]).unwrap() {
            Message::Ack { ack_number } => {
                assert_eq!(ack_number, 9);
                acks += 1;
            }
            other => panic!("unexpected reply to raw chat: {:?}", other),
        }
    }

    // Give the host a moment to (not) double-process.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        host_rec.snapshot().chats,
        vec![("Rando".to_string(), "hi".to_string())]
    );
}

// S3 again at the battle layer: a duplicated DefenseAnnounce must not make
// the attacker process the turn twice (a double RNG draw would desync).
#[tokio::test]
async fn duplicated_defense_announce_is_applied_once() {
    let (host, host_rec, _host_task, host_addr) = launch_host(host_config()).await;

    let mut duplicated = false;
    let proxy = start_proxy(host_addr, move |direction, kind| {
        if direction == Direction::ToHost && kind == MessageKind::DefenseAnnounce && !duplicated {
            duplicated = true;
            return Verdict::Duplicate;
        }
        Verdict::Forward
    })
    .await;

    let (joiner, _joiner_rec, _joiner_task) = launch_joiner(joiner_config(), proxy).await;
    wait_for(|| joiner.status().connected, "handshake").await;
    host.start_battle(pikachu(), boosts(5, 5)).unwrap();
    joiner.start_battle(charmander(), boosts(5, 5)).unwrap();
    wait_until_ready(&host, &joiner).await;

    let seed = host.status().seed.unwrap();
    let expected = first_turn_damage(seed, pikachu(), charmander(), "Thunderbolt", false, false);

    host.submit_move("Thunderbolt", false).unwrap();
    wait_turn_flip(&joiner, &host).await;

    assert_eq!(
        host.status().opponent.unwrap().current_hp,
        expected.defender_hp_clamped()
    );
    let snapshot = host_rec.snapshot();
    assert_eq!(snapshot.discrepancies, 0);
    assert_eq!(snapshot.battle_events.len(), 1, "turn applied exactly once");
}

// S4: a lost AttackAnnounce is retransmitted with the same sequence and the
// battle completes normally.
#[tokio::test]
async fn lost_attack_announce_is_retransmitted() {
    let (host, host_rec, _host_task, host_addr) = launch_host(host_config()).await;

    let mut dropped = false;
    let proxy = start_proxy(host_addr, move |direction, kind| {
        if direction == Direction::ToJoiner && kind == MessageKind::AttackAnnounce && !dropped {
            dropped = true;
            return Verdict::Drop;
        }
        Verdict::Forward
    })
    .await;

    let (joiner, joiner_rec, _joiner_task) = launch_joiner(joiner_config(), proxy).await;
    wait_for(|| joiner.status().connected, "handshake").await;
    host.start_battle(pikachu(), boosts(5, 5)).unwrap();
    joiner.start_battle(charmander(), boosts(5, 5)).unwrap();
    wait_until_ready(&host, &joiner).await;

    let seed = host.status().seed.unwrap();
    let expected = first_turn_damage(seed, pikachu(), charmander(), "Thunderbolt", false, false);

    host.submit_move("Thunderbolt", false).unwrap();
    // First copy dropped; the 500 ms retransmission carries the turn.
    wait_turn_flip(&joiner, &host).await;

    assert_eq!(
        joiner.status().me.unwrap().current_hp,
        expected.defender_hp_clamped()
    );
    assert_eq!(joiner_rec.snapshot().battle_events.len(), 1);
    assert_eq!(host_rec.snapshot().discrepancies, 0);
}

// S5: a one-turn calculation asymmetry is resolved and the battle goes on.
#[tokio::test]
async fn discrepancy_is_resolved() {
    let mut config = host_config();
    config.fault.skew_reports = 1;
    let (host, host_rec, _host_task, host_addr) = launch_host(config).await;
    let (joiner, joiner_rec, _joiner_task) = launch_joiner(joiner_config(), host_addr).await;

    wait_for(|| joiner.status().connected, "handshake").await;
    host.start_battle(pikachu(), boosts(5, 5)).unwrap();
    joiner.start_battle(charmander(), boosts(5, 5)).unwrap();
    wait_until_ready(&host, &joiner).await;

    let seed = host.status().seed.unwrap();
    let expected = first_turn_damage(seed, pikachu(), charmander(), "Thunderbolt", false, false);

    host.submit_move("Thunderbolt", false).unwrap();
    wait_turn_flip(&joiner, &host).await;

    // The resolution converged on the clean values.
    let expected_hp = expected.defender_hp_clamped();
    assert_eq!(joiner.status().me.unwrap().current_hp, expected_hp);
    assert_eq!(host.status().opponent.unwrap().current_hp, expected_hp);
    assert!(
        host_rec.snapshot().discrepancies + joiner_rec.snapshot().discrepancies >= 1,
        "at least one side must have entered resolution"
    );

    // The battle continues: the joiner takes its turn cleanly, with no
    // further discrepancies.
    let after_first_turn =
        host_rec.snapshot().discrepancies + joiner_rec.snapshot().discrepancies;
    joiner.submit_move("Ember", false).unwrap();
    wait_turn_flip(&host, &joiner).await;
    assert_eq!(
        host_rec.snapshot().discrepancies + joiner_rec.snapshot().discrepancies,
        after_first_turn
    );
}

// S6: a disagreement that survives resolution kills the battle on both
// sides with ProtocolDesync.
#[tokio::test]
async fn persistent_discrepancy_is_fatal() {
    let mut config = host_config();
    config.fault.skew_reports = 1;
    config.fault.skew_resolution = true;
    let (host, _host_rec, host_task, host_addr) = launch_host(config).await;
    let (joiner, _joiner_rec, joiner_task) = launch_joiner(joiner_config(), host_addr).await;

    wait_for(|| joiner.status().connected, "handshake").await;
    host.start_battle(pikachu(), boosts(5, 5)).unwrap();
    joiner.start_battle(charmander(), boosts(5, 5)).unwrap();
    wait_until_ready(&host, &joiner).await;

    host.submit_move("Thunderbolt", false).unwrap();

    let host_result = tokio::time::timeout(Duration::from_secs(5), host_task)
        .await
        .expect("host loop should terminate")
        .unwrap();
    let joiner_result = tokio::time::timeout(Duration::from_secs(5), joiner_task)
        .await
        .expect("joiner loop should terminate")
        .unwrap();

    for result in [host_result, joiner_result] {
        match result {
            Err(PeerError::ProtocolDesync(_)) => {}
            other => panic!("expected ProtocolDesync, got {:?}", other),
        }
    }
}

// S7: chat fan-out to a spectator preserves the original sender, arrives
// exactly once, and is never echoed back to the originator.
#[tokio::test]
async fn spectator_chat_fanout_preserves_sender() {
    let (host, host_rec, _host_task, host_addr) = launch_host(host_config()).await;
    let (spectator, spec_rec, _spec_task) =
        launch_spectator(PeerConfig::default().with_name("Watcher"), host_addr).await;
    let (joiner, joiner_rec, _joiner_task) = launch_joiner(joiner_config(), host_addr).await;

    wait_for(
        || joiner.status().connected && spectator.status().connected,
        "everyone connected",
    )
    .await;
    wait_for(|| host.status().spectator_count == 1, "spectator registered").await;

    joiner.send_chat("gg").unwrap();

    wait_for(
        || !spec_rec.snapshot().chats.is_empty(),
        "spectator to receive the chat",
    )
    .await;
    // Allow any stray duplicates to surface before asserting exact counts.
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(
        host_rec.snapshot().chats,
        vec![("Joiner".to_string(), "gg".to_string())]
    );
    assert_eq!(
        spec_rec.snapshot().chats,
        vec![("Joiner".to_string(), "gg".to_string())]
    );
    // The joiner saw only its local [You] echo, never its own name back.
    assert_eq!(
        joiner_rec.snapshot().chats,
        vec![("[You]".to_string(), "gg".to_string())]
    );

    // Spectator-origin chat reaches host and joiner but not the originator.
    spectator.send_chat("nice one").unwrap();
    wait_for(
        || joiner_rec.snapshot().chats.iter().any(|(s, _)| s == "Watcher"),
        "joiner to receive the spectator chat",
    )
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(host_rec
        .snapshot()
        .chats
        .contains(&("Watcher".to_string(), "nice one".to_string())));
    assert_eq!(
        spec_rec
            .snapshot()
            .chats
            .iter()
            .filter(|(s, _)| s == "Watcher")
            .count(),
        0,
        "spectator must not hear its own message back"
    );
}

// Spectators mirror the battle: setups, per-turn reports, HP.
#[tokio::test]
async fn spectator_mirrors_battle_state() {
    let (host, _host_rec, _host_task, host_addr) = launch_host(host_config()).await;
    let (spectator, spec_rec, _spec_task) =
        launch_spectator(PeerConfig::default().with_name("Watcher"), host_addr).await;
    let (joiner, _joiner_rec, _joiner_task) = launch_joiner(joiner_config(), host_addr).await;

    wait_for(
        || joiner.status().connected && spectator.status().connected,
        "everyone connected",
    )
    .await;
    host.start_battle(pikachu(), boosts(5, 5)).unwrap();
    joiner.start_battle(charmander(), boosts(5, 5)).unwrap();
    wait_until_ready(&host, &joiner).await;

    let seed = host.status().seed.unwrap();
    let expected = first_turn_damage(seed, pikachu(), charmander(), "Thunderbolt", false, false);

    host.submit_move("Thunderbolt", false).unwrap();
    wait_turn_flip(&joiner, &host).await;
    wait_for(
        || !spec_rec.snapshot().battle_events.is_empty(),
        "spectator battle event",
    )
    .await;

    // Mirrored reports set absolute HP on the spectator's view.
    let status = spectator.status();
    let names_and_hp: Vec<(String, i32)> = [status.me, status.opponent]
        .into_iter()
        .flatten()
        .map(|p| (p.name, p.current_hp))
        .collect();
    assert!(names_and_hp.contains(&("Charmander".to_string(), expected.defender_hp_clamped())));

    // The doubled mirror stream (host's and joiner's reports) must surface
    // one event, not two.
    assert_eq!(spec_rec.snapshot().battle_events.len(), 1);
}

// Late spectators get the cached setups replayed.
#[tokio::test]
async fn late_spectator_receives_setup_replay() {
    let (host, _host_rec, _host_task, host_addr) = launch_host(host_config()).await;
    let (joiner, _joiner_rec, _joiner_task) = launch_joiner(joiner_config(), host_addr).await;

    wait_for(|| joiner.status().connected, "handshake").await;
    host.start_battle(pikachu(), boosts(5, 5)).unwrap();
    joiner.start_battle(charmander(), boosts(5, 5)).unwrap();
    wait_until_ready(&host, &joiner).await;

    // Joins after both setups were exchanged.
    let (spectator, _spec_rec, _spec_task) =
        launch_spectator(PeerConfig::default().with_name("Latecomer"), host_addr).await;
    wait_for(
        || {
            let status = spectator.status();
            status.me.is_some() && status.opponent.is_some()
        },
        "replayed setups to build the spectator view",
    )
    .await;

    let status = spectator.status();
    let names: Vec<String> = [status.me, status.opponent]
        .into_iter()
        .flatten()
        .map(|p| p.name)
        .collect();
    assert!(names.contains(&"Pikachu".to_string()));
    assert!(names.contains(&"Charmander".to_string()));
}

// A defender-armed special-defense boost changes both peers' calculations
// identically and is consumed exactly once.
#[tokio::test]
async fn armed_defense_boost_changes_damage() {
    let (host, _host_rec, _host_task, host_addr) = launch_host(host_config()).await;
    let (joiner, _joiner_rec, _joiner_task) = launch_joiner(joiner_config(), host_addr).await;

    wait_for(|| joiner.status().connected, "handshake").await;
    host.start_battle(pikachu(), boosts(5, 5)).unwrap();
    joiner.start_battle(charmander(), boosts(5, 5)).unwrap();
    wait_until_ready(&host, &joiner).await;

    let seed = host.status().seed.unwrap();
    let expected = first_turn_damage(seed, pikachu(), charmander(), "Thunderbolt", false, true);

    joiner.arm_defense_boost().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    host.submit_move("Thunderbolt", false).unwrap();
    wait_turn_flip(&joiner, &host).await;

    let joiner_status = joiner.status();
    let me = joiner_status.me.unwrap();
    assert_eq!(me.current_hp, expected.defender_hp_clamped());
    assert_eq!(me.defense_boosts_left, 4);
    assert_eq!(
        host.status().opponent.unwrap().current_hp,
        expected.defender_hp_clamped()
    );
}

// A silent counterparty is declared unreachable after the retry cap and the
// session dies with PeerLost (exit code 2 for drivers).
#[tokio::test]
async fn silent_peer_is_declared_lost() {
    let (host, _host_rec, host_task, host_addr) = launch_host(host_config()).await;

    let mut config = joiner_config();
    config.retry_interval = Duration::from_millis(100);
    let (joiner, _joiner_rec, joiner_task) = launch_joiner(config, host_addr).await;

    wait_for(|| joiner.status().connected, "handshake").await;

    // Kill the host, then give the joiner something that needs an ACK.
    host.shutdown().unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(2), host_task).await;
    joiner.send_chat("anyone there?").unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), joiner_task)
        .await
        .expect("joiner loop should terminate")
        .unwrap();
    match result {
        Err(error @ PeerError::PeerLost(_)) => assert_eq!(error.exit_code(), 2),
        other => panic!("expected PeerLost, got {:?}", other),
    }
}

// Game over propagates to both sides, and a rematch resets the battle with
// the same session seed.
#[tokio::test]
async fn game_over_and_rematch() {
    let (host, host_rec, _host_task, host_addr) = launch_host(host_config()).await;
    let (joiner, joiner_rec, _joiner_task) = launch_joiner(joiner_config(), host_addr).await;

    wait_for(|| joiner.status().connected, "handshake").await;
    let seed_before = joiner.status().seed;

    host.start_battle(pikachu(), boosts(5, 5)).unwrap();
    joiner.start_battle(magikarp(), boosts(5, 5)).unwrap();
    wait_until_ready(&host, &joiner).await;

    // Thunderbolt vs a 5 HP water type cannot fail to be lethal.
    host.submit_move("Thunderbolt", false).unwrap();
    wait_for(
        || host.status().game_over && joiner.status().game_over,
        "game over on both sides",
    )
    .await;

    let verdict = ("Pikachu".to_string(), "Magikarp".to_string());
    assert_eq!(host_rec.snapshot().game_overs, vec![verdict.clone()]);
    assert_eq!(joiner_rec.snapshot().game_overs, vec![verdict]);

    host.request_rematch().unwrap();
    joiner.request_rematch().unwrap();
    wait_for(
        || {
            host_rec.snapshot().rematch_agreed == 1 && joiner_rec.snapshot().rematch_agreed == 1
        },
        "rematch agreement",
    )
    .await;

    // Fresh battle, same seed, host first again.
    host.start_battle(pikachu(), boosts(5, 5)).unwrap();
    joiner.start_battle(charmander(), boosts(5, 5)).unwrap();
    wait_until_ready(&host, &joiner).await;
    assert!(host.status().my_turn);
    assert_eq!(joiner.status().seed, seed_before);
    assert!(!joiner.status().game_over);
}
