//! The peer event loop.
//!
//! One cooperative task owns the UDP socket, the reliability layer, the
//! session and the battle machine. Per iteration it either handles a
//! datagram, drains one driver command, or runs a reliability tick; shared
//! state is never touched from outside the loop.
//!
//! Control flow for an incoming datagram: codec → reliability (ACK or
//! dedup) → demux by kind → battle machine or chat routing. Outbound events
//! reverse the path.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use arbok_battle::{
    BattleError, BattleMachine, BattlePhase, BattlePokemon, MoveDex, PeerReport, PokemonStats,
    ReportCheck, Resolution, StatBoosts, TurnEnd,
};
use arbok_protocol::{decode, encode, ChatContent, CommunicationMode, Message, MessageKind};
use log::{debug, info, warn};
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::chat::{validate_sticker, YOU};
use crate::config::PeerConfig;
use crate::handle::{Command, PeerHandle, PeerStatus, PokemonCondition};
use crate::handler::PeerHandler;
use crate::reliability::ReliabilityLayer;
use crate::session::{Role, Session};
use crate::PeerError;

const COMMAND_BUFFER: usize = 64;
const MAX_DATAGRAM: usize = 64 * 1024;

/// Read-only battle view reconstructed by a Spectator from the Host's
/// mirror stream. Reports carry absolute HP, so applying a doubled or
/// replayed report is idempotent.
#[derive(Default)]
struct SpectatorView {
    first: Option<BattlePokemon>,
    second: Option<BattlePokemon>,
    last_status: Option<String>,
}

impl SpectatorView {
    /// Returns true once both participants are known.
    fn add_setup(&mut self, stats: PokemonStats, boosts: StatBoosts) -> bool {
        if self.first.is_some() && self.second.is_some() {
            // A fresh setup pair after a complete battle is a rematch.
            *self = SpectatorView::default();
        }
        let pokemon = BattlePokemon::new(stats, boosts);
        if self.first.is_none() {
            self.first = Some(pokemon);
        } else {
            self.second = Some(pokemon);
        }
        self.first.is_some() && self.second.is_some()
    }

    fn apply_report(&mut self, attacker: &str, defender_hp: i32) {
        for slot in [&mut self.first, &mut self.second] {
            if let Some(pokemon) = slot {
                if pokemon.name() != attacker {
                    pokemon.set_hp(defender_hp);
                }
            }
        }
    }

    /// The mirror stream carries both peers' reports for the same turn;
    /// suppress the repeat of an identical status line.
    fn note_status(&mut self, status: &str) -> bool {
        if self.last_status.as_deref() == Some(status) {
            return false;
        }
        self.last_status = Some(status.to_string());
        true
    }
}

/// One battle peer: Host, Joiner or Spectator, depending on how it was
/// constructed. Drive it with [`Peer::run`]; talk to it via the returned
/// [`PeerHandle`].
pub struct Peer {
    config: PeerConfig,
    socket: UdpSocket,
    session: Session,
    reliability: ReliabilityLayer,
    dex: MoveDex,
    machine: Option<BattleMachine>,
    /// Counterparty's BattleSetup, buffered until the machine exists (the
    /// setup may outrun the handshake response on the wire).
    peer_setup: Option<(PokemonStats, StatBoosts)>,
    /// An AttackAnnounce that arrived while our previous turn was still
    /// committing. Retransmissions are dedup-suppressed, so dropping it
    /// here would wedge the battle; it is replayed once the turn commits.
    early_attack: Option<(String, bool)>,
    battle_announced: bool,
    armed_defense_boost: bool,
    my_rematch: bool,
    peer_rematch: bool,
    skew_reports_left: u32,
    view: SpectatorView,
    commands: mpsc::Receiver<Command>,
    status: Arc<RwLock<PeerStatus>>,
    game_over: bool,
}

enum Step {
    Datagram(std::io::Result<(usize, SocketAddr)>),
    Command(Option<Command>),
    Tick,
}

impl Peer {
    /// Bind a listening Host.
    pub async fn host(config: PeerConfig) -> std::io::Result<(Self, PeerHandle)> {
        Self::bind(config, Role::Host, None).await
    }

    /// Bind a Joiner that will handshake with the given Host endpoint.
    pub async fn join(
        config: PeerConfig,
        host: SocketAddr,
    ) -> std::io::Result<(Self, PeerHandle)> {
        Self::bind(config, Role::Joiner, Some(host)).await
    }

    /// Bind a read-only Spectator of the given Host endpoint.
    pub async fn spectate(
        config: PeerConfig,
        host: SocketAddr,
    ) -> std::io::Result<(Self, PeerHandle)> {
        Self::bind(config, Role::Spectator, Some(host)).await
    }

    async fn bind(
        config: PeerConfig,
        role: Role,
        peer_addr: Option<SocketAddr>,
    ) -> std::io::Result<(Self, PeerHandle)> {
        let socket = UdpSocket::bind(("0.0.0.0", config.bind_port)).await?;
        if config.broadcast {
            socket.set_broadcast(true)?;
        }
        let local_addr = socket.local_addr()?;
        info!("{:?} listening on {}", role, local_addr);

        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let status = Arc::new(RwLock::new(PeerStatus::default()));
        let mut session = Session::new(role);
        session.peer_addr = peer_addr;

        let reliability = ReliabilityLayer::new(
            config.retry_interval,
            config.max_retries,
            config.dedup_window,
        );
        let skew_reports_left = config.fault.skew_reports;
        if config.fault.is_active() {
            warn!("fault injection enabled: {:?}", config.fault);
        }

        let handle = PeerHandle::new(tx, status.clone(), local_addr);
        let peer = Self {
            config,
            socket,
            session,
            reliability,
            dex: MoveDex::builtin(),
            machine: None,
            peer_setup: None,
            early_attack: None,
            battle_announced: false,
            armed_defense_boost: false,
            my_rematch: false,
            peer_rematch: false,
            skew_reports_left,
            view: SpectatorView::default(),
            commands: rx,
            status,
            game_over: false,
        };
        Ok((peer, handle))
    }

    /// Run the event loop until shutdown or a fatal failure. The handler is
    /// invoked inline for every observable event, including the fatal error
    /// itself just before the loop exits.
    pub async fn run<H: PeerHandler>(mut self, handler: &mut H) -> Result<(), PeerError> {
        let result = self.drive(handler).await;
        if let Err(ref error) = result {
            handler.on_error(error);
        }
        result
    }

    async fn drive<H: PeerHandler>(&mut self, handler: &mut H) -> Result<(), PeerError> {
        match self.session.role {
            Role::Joiner => {
                let dest = self.counterparty()?;
                self.send_message(Message::HandshakeRequest { sequence_number: 0 }, dest)
                    .await?;
            }
            Role::Spectator => {
                let dest = self.counterparty()?;
                self.send_message(Message::SpectatorRequest { sequence_number: 0 }, dest)
                    .await?;
            }
            Role::Host => {}
        }
        self.publish_status();

        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let step = tokio::select! {
                received = self.socket.recv_from(&mut buf) => Step::Datagram(received),
                command = self.commands.recv() => Step::Command(command),
                _ = tick.tick() => Step::Tick,
            };

            match step {
                Step::Datagram(Ok((len, src))) => {
                    let data = buf[..len].to_vec();
                    self.on_datagram(&data, src, handler).await?;
                }
                Step::Datagram(Err(e)) => {
                    // Transient receive errors (e.g. ICMP-induced resets) do
                    // not end the session.
                    warn!("socket receive error: {}", e);
                }
                Step::Command(Some(command)) => {
                    if self.on_command(command, handler).await? {
                        self.publish_status();
                        return Ok(());
                    }
                }
                Step::Command(None) => return Ok(()),
                Step::Tick => self.on_tick().await?,
            }
            if self.early_attack.is_some() {
                self.replay_early_attack(handler).await?;
            }
            self.publish_status();
        }
    }

    fn counterparty(&self) -> Result<SocketAddr, PeerError> {
        self.session.peer_addr.ok_or(PeerError::NotConnected)
    }

    // ===================
    // Sending
    // ===================

    /// Assign the next sequence, encode, transmit and register for
    /// retransmission.
    async fn send_message(
        &mut self,
        mut message: Message,
        dest: SocketAddr,
    ) -> Result<u64, PeerError> {
        let seq = self.reliability.next_sequence();
        message.set_sequence_number(seq);
        let bytes = encode(&message);
        self.socket.send_to(&bytes, dest).await?;
        self.reliability.register(seq, bytes, dest, Instant::now());
        debug!("sent {} seq={} to {}", message.kind(), seq, dest);
        Ok(seq)
    }

    /// ACKs are fire-and-forget: never sequenced, never registered.
    async fn send_ack(&mut self, ack_number: u64, dest: SocketAddr) -> Result<(), PeerError> {
        let bytes = encode(&Message::Ack { ack_number });
        self.socket.send_to(&bytes, dest).await?;
        Ok(())
    }

    /// Send a battle message to the counterparty and mirror it to
    /// spectators (Host only).
    async fn send_battle(&mut self, message: Message) -> Result<u64, PeerError> {
        let dest = self.counterparty()?;
        let seq = self.send_message(message.clone(), dest).await?;
        self.fan_to_spectators(&message).await?;
        Ok(seq)
    }

    /// Re-emit a message to every registered spectator. Each re-emission is
    /// a new message with a fresh sequence number from our own counter;
    /// reusing the original sequence would trip the spectators' dedup sets.
    async fn fan_to_spectators(&mut self, message: &Message) -> Result<(), PeerError> {
        if self.session.role != Role::Host {
            return Ok(());
        }
        let spectators: Vec<SocketAddr> = self.session.spectators().to_vec();
        for addr in spectators {
            self.send_message(message.clone(), addr).await?;
        }
        Ok(())
    }

    // ===================
    // Inbound demux
    // ===================

    async fn on_datagram<H: PeerHandler>(
        &mut self,
        data: &[u8],
        src: SocketAddr,
        handler: &mut H,
    ) -> Result<(), PeerError> {
        let message = match decode(data) {
            Ok(message) => message,
            Err(e) => {
                // Malformed datagrams are dropped without an ACK.
                warn!("malformed datagram from {}: {}", src, e);
                return Ok(());
            }
        };

        if let Message::Ack { ack_number } = message {
            if self.reliability.ack(ack_number) {
                debug!("ack cleared seq={} from {}", ack_number, src);
                let end = match self.machine.as_mut() {
                    Some(machine) => machine.on_ack(ack_number)?,
                    None => None,
                };
                if let Some(end) = end {
                    self.finish_turn(end, handler).await?;
                }
            }
            return Ok(());
        }

        let seq = match message.sequence_number() {
            Some(seq) => seq,
            None => return Ok(()),
        };

        // ACK first, even for duplicates: the original ACK may be the lost
        // datagram.
        self.send_ack(seq, src).await?;
        if self.reliability.is_duplicate(src, seq) {
            debug!("duplicate seq={} from {}, re-acked and dropped", seq, src);
            return Ok(());
        }
        self.reliability.mark_seen(src, seq);
        debug!("received {} seq={} from {}", message.kind(), seq, src);

        match message {
            Message::ChatMessage {
                sender_name,
                content,
                ..
            } => self.on_chat_received(sender_name, content, src, handler).await,
            other => match self.session.role {
                Role::Host => self.on_host_message(other, src, handler).await,
                Role::Joiner => self.on_joiner_message(other, src, handler).await,
                Role::Spectator => {
                    self.on_spectator_message(other, src, handler);
                    Ok(())
                }
            },
        }
    }

    // ===================
    // Host side
    // ===================

    async fn on_host_message<H: PeerHandler>(
        &mut self,
        message: Message,
        src: SocketAddr,
        handler: &mut H,
    ) -> Result<(), PeerError> {
        match message {
            Message::HandshakeRequest { .. } => {
                if self.session.connected && !self.session.is_counterparty(src) {
                    warn!(
                        "ignoring handshake from {} while connected to {:?}",
                        src, self.session.peer_addr
                    );
                    return Ok(());
                }
                let seed = match self.session.seed {
                    Some(seed) => seed,
                    None => {
                        // Session seed is picked independently of the game
                        // RNG stream.
                        let seed = rand::thread_rng().gen_range(1..=99_999u32);
                        self.session.seed = Some(seed);
                        seed
                    }
                };
                let newly_connected = !self.session.connected;
                self.session.peer_addr = Some(src);
                self.session.connected = true;
                if self.machine.is_none() {
                    self.machine = Some(BattleMachine::new(true, seed));
                }
                self.send_message(
                    Message::HandshakeResponse {
                        sequence_number: 0,
                        seed,
                    },
                    src,
                )
                .await?;
                if newly_connected {
                    info!("joiner connected from {}, seed {}", src, seed);
                    handler.on_connected(seed);
                }
                Ok(())
            }
            Message::SpectatorRequest { .. } => {
                let added = self.session.add_spectator(src);
                let seed = self.session.seed.unwrap_or(0);
                self.send_message(
                    Message::HandshakeResponse {
                        sequence_number: 0,
                        seed,
                    },
                    src,
                )
                .await?;
                if added {
                    info!("spectator joined from {}", src);
                    // Replay the cached setups so a mid-battle joiner can
                    // reconstruct the participants.
                    let cached: Vec<Message> = self.session.setup_cache().to_vec();
                    for setup in cached {
                        self.send_message(setup, src).await?;
                    }
                    handler.on_spectator_joined(src);
                }
                Ok(())
            }
            other => {
                if !self.session.is_counterparty(src) {
                    warn!("dropping {} from unexpected endpoint {}", other.kind(), src);
                    return Ok(());
                }
                self.mirror_from_counterparty(&other).await?;
                self.on_counterparty_message(other, handler).await
            }
        }
    }

    /// Mirror battle traffic received from the Joiner out to spectators,
    /// and remember BattleSetups for late joins.
    async fn mirror_from_counterparty(&mut self, message: &Message) -> Result<(), PeerError> {
        let mirrored = matches!(
            message.kind(),
            MessageKind::BattleSetup
                | MessageKind::AttackAnnounce
                | MessageKind::DefenseAnnounce
                | MessageKind::CalculationReport
                | MessageKind::GameOver
                | MessageKind::RematchRequest
        );
        if !mirrored {
            return Ok(());
        }
        if message.kind() == MessageKind::BattleSetup {
            self.session.cache_setup(message.clone());
        }
        self.fan_to_spectators(message).await
    }

    // ===================
    // Joiner side
    // ===================

    async fn on_joiner_message<H: PeerHandler>(
        &mut self,
        message: Message,
        src: SocketAddr,
        handler: &mut H,
    ) -> Result<(), PeerError> {
        if !self.session.is_counterparty(src) {
            warn!("dropping {} from unexpected endpoint {}", message.kind(), src);
            return Ok(());
        }
        self.on_counterparty_message(message, handler).await
    }

    // ===================
    // Battle message handling (Host and Joiner)
    // ===================

    async fn on_counterparty_message<H: PeerHandler>(
        &mut self,
        message: Message,
        handler: &mut H,
    ) -> Result<(), PeerError> {
        match message {
            Message::HandshakeResponse { seed, .. } => {
                if !self.session.connected {
                    self.session.connected = true;
                    self.session.seed = Some(seed);
                    if self.session.role == Role::Joiner {
                        self.machine = Some(BattleMachine::new(false, seed));
                    }
                    info!("connected, session seed {}", seed);
                    handler.on_connected(seed);
                    self.try_begin_battle(handler);
                }
                Ok(())
            }
            Message::BattleSetup {
                pokemon_name,
                stat_boosts,
                pokemon_data,
                ..
            } => {
                let stats: PokemonStats = match serde_json::from_str(&pokemon_data) {
                    Ok(stats) => stats,
                    Err(e) => {
                        warn!("unusable pokemon_data for {}: {}", pokemon_name, e);
                        return Ok(());
                    }
                };
                let boosts: StatBoosts = match serde_json::from_str(&stat_boosts) {
                    Ok(boosts) => boosts,
                    Err(e) => {
                        warn!("unusable stat_boosts for {}: {}", pokemon_name, e);
                        return Ok(());
                    }
                };
                info!("opponent chose {}", stats.name);
                self.peer_setup = Some((stats, boosts));
                self.try_begin_battle(handler);
                Ok(())
            }
            Message::AttackAnnounce {
                move_name,
                use_attack_boost,
                ..
            } => {
                self.on_attack_announce(move_name, use_attack_boost, handler)
                    .await
            }
            Message::DefenseAnnounce {
                use_defense_boost, ..
            } => {
                let computed = self
                    .machine
                    .as_mut()
                    .and_then(|m| m.on_defense_announced(use_defense_boost))
                    .is_some();
                if computed {
                    self.send_local_report(handler).await?;
                }
                Ok(())
            }
            Message::CalculationReport {
                damage_dealt,
                defender_hp_remaining,
                ..
            } => {
                let check = match self.machine.as_mut() {
                    Some(machine) => machine.record_peer_report(PeerReport {
                        damage_dealt,
                        defender_hp_remaining,
                    }),
                    None => return Ok(()),
                };
                self.handle_report_check(check, handler).await
            }
            Message::CalculationConfirm { .. } => {
                let end = match self.machine.as_mut() {
                    Some(machine) => machine.on_peer_confirm()?,
                    None => None,
                };
                if let Some(end) = end {
                    self.finish_turn(end, handler).await?;
                }
                Ok(())
            }
            Message::ResolutionRequest {
                damage_dealt,
                defender_hp_remaining,
                ..
            } => {
                let resolution = match self.machine.as_mut() {
                    Some(machine) => machine.record_peer_resolution(PeerReport {
                        damage_dealt,
                        defender_hp_remaining,
                    })?,
                    None => None,
                };
                if let Some(resolution) = resolution {
                    self.handle_resolution(resolution, handler).await?;
                }
                Ok(())
            }
            Message::GameOver { winner, loser, .. } => {
                if let Some(machine) = self.machine.as_mut() {
                    machine.on_game_over_message();
                }
                // The loser of a turn reaches the same verdict through its
                // own confirm exchange; only announce it once.
                if !self.game_over {
                    self.game_over = true;
                    info!("game over: {} defeated {}", winner, loser);
                    handler.on_game_over(&winner, &loser);
                }
                Ok(())
            }
            Message::RematchRequest { wants_rematch, .. } => {
                self.peer_rematch = wants_rematch;
                if wants_rematch {
                    handler.on_rematch_offer();
                }
                self.maybe_start_rematch(handler);
                Ok(())
            }
            Message::Ack { .. }
            | Message::HandshakeRequest { .. }
            | Message::SpectatorRequest { .. }
            | Message::ChatMessage { .. } => Ok(()),
        }
    }

    /// Replay an AttackAnnounce that was buffered while the previous turn
    /// was still committing. Dropped once it can never become valid.
    async fn replay_early_attack<H: PeerHandler>(
        &mut self,
        handler: &mut H,
    ) -> Result<(), PeerError> {
        let phase = match self.machine.as_ref() {
            Some(machine) => machine.phase(),
            None => {
                self.early_attack = None;
                return Ok(());
            }
        };
        match phase {
            BattlePhase::WaitingForMove => {
                if let Some((move_name, boost)) = self.early_attack.take() {
                    self.on_attack_announce(move_name, boost, handler).await?;
                }
            }
            BattlePhase::ProcessingTurn | BattlePhase::Resolving => {}
            BattlePhase::Setup | BattlePhase::GameOver => self.early_attack = None,
        }
        Ok(())
    }

    /// Apply any buffered counterparty setup and announce battle start once
    /// both sides are in.
    fn try_begin_battle<H: PeerHandler>(&mut self, handler: &mut H) {
        let Some(machine) = self.machine.as_mut() else {
            return;
        };
        // A setup that raced ahead of a rematch agreement stays buffered
        // until the fresh machine is in place.
        if machine.phase() == BattlePhase::Setup {
            if let Some((stats, boosts)) = self.peer_setup.take() {
                machine.set_opponent(stats, boosts);
            }
        }
        if machine.is_ready() && !self.battle_announced {
            self.battle_announced = true;
            if let (Some(me), Some(opponent)) = (machine.me(), machine.opponent()) {
                handler.on_battle_started(me, opponent);
            }
            handler.on_turn_changed(machine.is_my_turn());
        }
    }

    async fn on_attack_announce<H: PeerHandler>(
        &mut self,
        move_name: String,
        attacker_boost: bool,
        handler: &mut H,
    ) -> Result<(), PeerError> {
        let Some(mv) = self.dex.get(&move_name).cloned() else {
            warn!("ignoring attack with unknown move {}", move_name);
            handler.on_error(&PeerError::UnknownMove(move_name));
            return Ok(());
        };
        let armed = std::mem::take(&mut self.armed_defense_boost);
        let Some(machine) = self.machine.as_mut() else {
            return Ok(());
        };
        let engaged = match machine.begin_opponent_attack(mv, attacker_boost, armed) {
            Ok((_outcome, engaged)) => engaged,
            Err(BattleError::IllegalTurn) => {
                // The reliability ACK already went out; the application
                // refuses the transition and drops the message.
                warn!("attack received while holding the turn, dropping");
                self.armed_defense_boost = armed;
                handler.on_error(&PeerError::IllegalTurn);
                return Ok(());
            }
            Err(BattleError::WrongPhase) => {
                self.armed_defense_boost = armed;
                if matches!(
                    machine.phase(),
                    BattlePhase::ProcessingTurn | BattlePhase::Resolving
                ) {
                    debug!("attack announce arrived before the turn committed, buffering");
                    self.early_attack = Some((move_name, attacker_boost));
                } else {
                    debug!("ignoring attack announce in phase {:?}", machine.phase());
                }
                return Ok(());
            }
            Err(e) => {
                debug!("ignoring attack announce: {}", e);
                self.armed_defense_boost = armed;
                return Ok(());
            }
        };
        self.send_battle(Message::DefenseAnnounce {
            sequence_number: 0,
            use_defense_boost: engaged,
        })
        .await?;
        self.send_local_report(handler).await
    }

    /// Transmit our CalculationReport for the turn in flight, then process
    /// a peer report that may have raced ahead of our computation.
    async fn send_local_report<H: PeerHandler>(
        &mut self,
        handler: &mut H,
    ) -> Result<(), PeerError> {
        if self.skew_reports_left > 0 {
            self.skew_reports_left -= 1;
            if let Some(machine) = self.machine.as_mut() {
                machine.skew_local_report(1);
            }
        }

        let report = self.machine.as_ref().and_then(|machine| {
            let outcome = machine.local_outcome()?;
            let me = machine.me()?;
            let opponent = machine.opponent()?;
            let attacker_hp = if outcome.attacker == me.name() {
                me.current_hp
            } else {
                opponent.current_hp
            };
            Some(Message::CalculationReport {
                sequence_number: 0,
                attacker: outcome.attacker.clone(),
                move_used: outcome.move_used.clone(),
                remaining_health: attacker_hp,
                damage_dealt: outcome.damage_dealt,
                defender_hp_remaining: outcome.defender_hp_clamped(),
                status_message: outcome.status_message.clone(),
            })
        });
        let Some(report) = report else {
            return Ok(());
        };
        self.send_battle(report).await?;

        let check = self.machine.as_mut().and_then(|m| m.check_buffered_report());
        if let Some(check) = check {
            self.handle_report_check(check, handler).await?;
        }
        Ok(())
    }

    async fn handle_report_check<H: PeerHandler>(
        &mut self,
        check: ReportCheck,
        handler: &mut H,
    ) -> Result<(), PeerError> {
        match check {
            ReportCheck::Match => {
                let seq = self
                    .send_battle(Message::CalculationConfirm { sequence_number: 0 })
                    .await?;
                let end = match self.machine.as_mut() {
                    Some(machine) => machine.confirm_sent(seq)?,
                    None => None,
                };
                if let Some(end) = end {
                    self.finish_turn(end, handler).await?;
                }
                Ok(())
            }
            ReportCheck::Mismatch => {
                info!("calculation discrepancy detected, entering resolution");
                handler.on_discrepancy();
                let values = self.machine.as_mut().and_then(|m| m.enter_resolution());
                let Some(mut values) = values else {
                    return Ok(());
                };
                if self.config.fault.skew_resolution {
                    if let Some(machine) = self.machine.as_mut() {
                        machine.skew_local_report(1);
                        if let Some(skewed) = machine.local_outcome() {
                            values = skewed.clone();
                        }
                    }
                }
                self.send_battle(Message::ResolutionRequest {
                    sequence_number: 0,
                    attacker: values.attacker.clone(),
                    move_used: values.move_used.clone(),
                    damage_dealt: values.damage_dealt,
                    defender_hp_remaining: values.defender_hp_clamped(),
                })
                .await?;
                let resolution = match self.machine.as_mut() {
                    Some(machine) => machine.check_buffered_resolution()?,
                    None => None,
                };
                if let Some(resolution) = resolution {
                    self.handle_resolution(resolution, handler).await?;
                }
                Ok(())
            }
            ReportCheck::Waiting => Ok(()),
        }
    }

    async fn handle_resolution<H: PeerHandler>(
        &mut self,
        resolution: Resolution,
        handler: &mut H,
    ) -> Result<(), PeerError> {
        match resolution {
            Resolution::Agreed(end) => {
                info!("resolution agreed, turn committed");
                self.finish_turn(end, handler).await
            }
            Resolution::Desync => Err(PeerError::ProtocolDesync(
                "peer calculations disagreed twice for the same turn".into(),
            )),
        }
    }

    /// A turn committed: surface the status line, announce game over when
    /// our attack was lethal, otherwise report the turn flip.
    async fn finish_turn<H: PeerHandler>(
        &mut self,
        end: TurnEnd,
        handler: &mut H,
    ) -> Result<(), PeerError> {
        handler.on_battle_event(&end.outcome.status_message);
        if let Some(verdict) = end.game_over {
            self.game_over = true;
            if verdict.announce {
                self.send_battle(Message::GameOver {
                    sequence_number: 0,
                    winner: verdict.winner.clone(),
                    loser: verdict.loser.clone(),
                })
                .await?;
            }
            info!("game over: {} defeated {}", verdict.winner, verdict.loser);
            handler.on_game_over(&verdict.winner, &verdict.loser);
        } else {
            handler.on_turn_changed(end.my_turn);
        }
        Ok(())
    }

    fn maybe_start_rematch<H: PeerHandler>(&mut self, handler: &mut H) {
        if !(self.my_rematch && self.peer_rematch) {
            return;
        }
        let Some(seed) = self.session.seed else {
            return;
        };
        self.my_rematch = false;
        self.peer_rematch = false;
        self.armed_defense_boost = false;
        self.battle_announced = false;
        self.game_over = false;
        self.early_attack = None;
        // A buffered peer_setup is kept: it may be the counterparty's setup
        // for the battle being created right now.
        self.skew_reports_left = self.config.fault.skew_reports;
        self.session.clear_setup_cache();
        self.machine = Some(BattleMachine::new(self.session.role == Role::Host, seed));
        self.view = SpectatorView::default();
        info!("rematch agreed, battle reset");
        handler.on_rematch_agreed();
        // The counterparty's next BattleSetup may have raced ahead of the
        // rematch agreement.
        self.try_begin_battle(handler);
    }

    // ===================
    // Spectator side
    // ===================

    fn on_spectator_message<H: PeerHandler>(
        &mut self,
        message: Message,
        src: SocketAddr,
        handler: &mut H,
    ) {
        if !self.session.is_counterparty(src) {
            return;
        }
        match message {
            Message::HandshakeResponse { seed, .. } => {
                if !self.session.connected {
                    self.session.connected = true;
                    self.session.seed = Some(seed);
                    info!("spectating, session seed {}", seed);
                    handler.on_connected(seed);
                }
            }
            Message::BattleSetup {
                stat_boosts,
                pokemon_data,
                ..
            } => {
                let stats: PokemonStats = match serde_json::from_str(&pokemon_data) {
                    Ok(stats) => stats,
                    Err(e) => {
                        warn!("unusable mirrored pokemon_data: {}", e);
                        return;
                    }
                };
                let boosts: StatBoosts =
                    serde_json::from_str(&stat_boosts).unwrap_or_default();
                let ready = self.view.add_setup(stats, boosts);
                if ready {
                    self.battle_announced = true;
                    if let (Some(first), Some(second)) =
                        (self.view.first.as_ref(), self.view.second.as_ref())
                    {
                        handler.on_battle_started(first, second);
                    }
                }
            }
            Message::CalculationReport {
                attacker,
                defender_hp_remaining,
                status_message,
                ..
            } => {
                self.view.apply_report(&attacker, defender_hp_remaining);
                if self.view.note_status(&status_message) {
                    handler.on_battle_event(&status_message);
                }
            }
            Message::GameOver { winner, loser, .. } => {
                self.game_over = true;
                handler.on_game_over(&winner, &loser);
            }
            _ => {}
        }
    }

    // ===================
    // Chat
    // ===================

    async fn on_chat_received<H: PeerHandler>(
        &mut self,
        sender_name: String,
        content: ChatContent,
        src: SocketAddr,
        handler: &mut H,
    ) -> Result<(), PeerError> {
        // Self-echo guard: our own messages were already shown as [You].
        if sender_name != self.config.display_name {
            match &content {
                ChatContent::Text(text) => handler.on_chat(&sender_name, text),
                ChatContent::Sticker(data) => {
                    match validate_sticker(data, self.config.max_sticker_len) {
                        Ok(()) => handler.on_sticker(&sender_name, data),
                        Err(e) => warn!("invalid sticker from {}: {}", sender_name, e),
                    }
                }
            }
        }

        if self.session.role == Role::Host {
            // Fan out to every spectator except the originator, each copy
            // re-sequenced from our own counter with the sender preserved.
            let spectators: Vec<SocketAddr> = self
                .session
                .spectators()
                .iter()
                .copied()
                .filter(|addr| *addr != src)
                .collect();
            for addr in spectators {
                self.send_message(
                    Message::ChatMessage {
                        sequence_number: 0,
                        sender_name: sender_name.clone(),
                        content: content.clone(),
                    },
                    addr,
                )
                .await?;
            }
            // A spectator's message is also forwarded to the Joiner.
            if let Some(joiner) = self.session.peer_addr {
                if joiner != src {
                    self.send_message(
                        Message::ChatMessage {
                            sequence_number: 0,
                            sender_name,
                            content,
                        },
                        joiner,
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }

    async fn route_chat(&mut self, content: ChatContent) -> Result<(), PeerError> {
        let sender_name = self.config.display_name.clone();
        match self.session.role {
            Role::Host => {
                if let Some(joiner) = self.session.peer_addr {
                    self.send_message(
                        Message::ChatMessage {
                            sequence_number: 0,
                            sender_name: sender_name.clone(),
                            content: content.clone(),
                        },
                        joiner,
                    )
                    .await?;
                }
                let spectators: Vec<SocketAddr> = self.session.spectators().to_vec();
                for addr in spectators {
                    self.send_message(
                        Message::ChatMessage {
                            sequence_number: 0,
                            sender_name: sender_name.clone(),
                            content: content.clone(),
                        },
                        addr,
                    )
                    .await?;
                }
                Ok(())
            }
            Role::Joiner | Role::Spectator => {
                let dest = self.counterparty()?;
                self.send_message(
                    Message::ChatMessage {
                        sequence_number: 0,
                        sender_name,
                        content,
                    },
                    dest,
                )
                .await?;
                Ok(())
            }
        }
    }

    // ===================
    // Commands
    // ===================

    /// Returns true when the loop should shut down.
    async fn on_command<H: PeerHandler>(
        &mut self,
        command: Command,
        handler: &mut H,
    ) -> Result<bool, PeerError> {
        match command {
            Command::Shutdown => return Ok(true),
            Command::StartBattle { stats, boosts } => {
                let result = self.start_battle(stats, boosts, handler).await;
                soften(result, handler)?;
            }
            Command::SubmitMove {
                move_name,
                use_boost,
            } => {
                let result = self.submit_move(move_name, use_boost).await;
                soften(result, handler)?;
            }
            Command::ArmDefenseBoost => {
                let available = self
                    .machine
                    .as_ref()
                    .and_then(|m| m.me())
                    .map(|p| p.defense_boosts_left() > 0)
                    .unwrap_or(false);
                if available {
                    self.armed_defense_boost = true;
                } else {
                    // Rejected locally; nothing is transmitted.
                    handler.on_error(&PeerError::Battle(BattleError::NoBoostAvailable));
                }
            }
            Command::Chat { text } => {
                let result = self.route_chat(ChatContent::Text(text.clone())).await;
                if soften(result, handler)?.is_some() {
                    handler.on_chat(YOU, &text);
                }
            }
            Command::Sticker { data } => {
                let result = match validate_sticker(&data, self.config.max_sticker_len) {
                    Ok(()) => self.route_chat(ChatContent::Sticker(data.clone())).await,
                    Err(e) => Err(e),
                };
                if soften(result, handler)?.is_some() {
                    handler.on_sticker(YOU, &data);
                }
            }
            Command::Rematch => {
                if self.session.role != Role::Spectator {
                    self.my_rematch = true;
                    if self.session.connected {
                        let result = self
                            .send_battle(Message::RematchRequest {
                                sequence_number: 0,
                                wants_rematch: true,
                            })
                            .await
                            .map(|_| ());
                        soften(result, handler)?;
                    }
                    self.maybe_start_rematch(handler);
                }
            }
        }
        Ok(false)
    }

    async fn start_battle<H: PeerHandler>(
        &mut self,
        stats: PokemonStats,
        boosts: StatBoosts,
        handler: &mut H,
    ) -> Result<(), PeerError> {
        if self.session.role == Role::Spectator || !self.session.connected {
            return Err(PeerError::NotConnected);
        }
        let Some(machine) = self.machine.as_mut() else {
            return Err(PeerError::NotConnected);
        };
        if machine.me().is_some() {
            return Err(PeerError::BadSetup("battle already set up".into()));
        }
        let stat_boosts =
            serde_json::to_string(&boosts).map_err(|e| PeerError::BadSetup(e.to_string()))?;
        let pokemon_data =
            serde_json::to_string(&stats).map_err(|e| PeerError::BadSetup(e.to_string()))?;
        machine.set_me(stats.clone(), boosts);

        let communication_mode = if self.config.broadcast {
            CommunicationMode::Broadcast
        } else {
            CommunicationMode::P2p
        };
        let message = Message::BattleSetup {
            sequence_number: 0,
            communication_mode,
            pokemon_name: stats.name.clone(),
            stat_boosts,
            pokemon_data,
        };
        if self.session.role == Role::Host {
            self.session.cache_setup(message.clone());
        }
        self.send_battle(message).await?;
        self.try_begin_battle(handler);
        Ok(())
    }

    async fn submit_move(&mut self, move_name: String, use_boost: bool) -> Result<(), PeerError> {
        let Some(mv) = self.dex.get(&move_name).cloned() else {
            return Err(PeerError::UnknownMove(move_name));
        };
        let Some(machine) = self.machine.as_mut() else {
            return Err(PeerError::NotConnected);
        };
        machine.begin_my_attack(mv, use_boost)?;
        self.send_battle(Message::AttackAnnounce {
            sequence_number: 0,
            move_name,
            use_attack_boost: use_boost,
        })
        .await?;
        Ok(())
    }

    // ===================
    // Housekeeping
    // ===================

    async fn on_tick(&mut self) -> Result<(), PeerError> {
        let outcome = self.reliability.tick(Instant::now());
        for retransmit in &outcome.retransmits {
            self.socket.send_to(&retransmit.bytes, retransmit.dest).await?;
        }
        for expired in &outcome.expired {
            if self.session.is_counterparty(expired.dest) {
                if let Some(machine) = self.machine.as_mut() {
                    machine.abort();
                }
                self.game_over = true;
                return Err(PeerError::PeerLost(format!(
                    "{} stopped acknowledging, gave up after {} attempts",
                    expired.dest,
                    self.config.max_retries + 1
                )));
            }
            if self.session.is_spectator(expired.dest) {
                warn!("dropping unreachable spectator {}", expired.dest);
                self.session.remove_spectator(expired.dest);
            }
        }
        Ok(())
    }

    fn publish_status(&self) {
        let mut status = PeerStatus {
            connected: self.session.connected,
            seed: self.session.seed,
            phase: None,
            my_turn: false,
            me: None,
            opponent: None,
            spectator_count: self.session.spectators().len(),
            game_over: self.game_over,
        };
        if let Some(machine) = self.machine.as_ref() {
            status.phase = Some(machine.phase());
            status.my_turn = machine.is_my_turn();
            status.me = machine.me().map(PokemonCondition::of);
            status.opponent = machine.opponent().map(PokemonCondition::of);
        } else if self.session.role == Role::Spectator {
            status.me = self.view.first.as_ref().map(PokemonCondition::of);
            status.opponent = self.view.second.as_ref().map(PokemonCondition::of);
        }
        if let Ok(mut shared) = self.status.write() {
            *shared = status;
        }
    }
}

/// Downgrade recoverable errors to handler notifications; fatal errors
/// propagate and end the loop. `Ok(Some(()))` means the operation went
/// through.
fn soften<H: PeerHandler>(
    result: Result<(), PeerError>,
    handler: &mut H,
) -> Result<Option<()>, PeerError> {
    match result {
        Ok(()) => Ok(Some(())),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            handler.on_error(&e);
            Ok(None)
        }
    }
}
