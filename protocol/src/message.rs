//! Message kinds exchanged between battle peers.
//!
//! Every kind except [`MessageKind::Ack`] carries a sender-scoped
//! `sequence_number`; ACKs carry only the sequence they acknowledge.

/// Tag identifying each wire message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Ack,
    HandshakeRequest,
    HandshakeResponse,
    SpectatorRequest,
    BattleSetup,
    AttackAnnounce,
    DefenseAnnounce,
    CalculationReport,
    CalculationConfirm,
    ResolutionRequest,
    GameOver,
    RematchRequest,
    ChatMessage,
}

impl MessageKind {
    /// Canonical wire tag for the `message_type` line.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Ack => "ACK",
            MessageKind::HandshakeRequest => "HANDSHAKE_REQUEST",
            MessageKind::HandshakeResponse => "HANDSHAKE_RESPONSE",
            MessageKind::SpectatorRequest => "SPECTATOR_REQUEST",
            MessageKind::BattleSetup => "BATTLE_SETUP",
            MessageKind::AttackAnnounce => "ATTACK_ANNOUNCE",
            MessageKind::DefenseAnnounce => "DEFENSE_ANNOUNCE",
            MessageKind::CalculationReport => "CALCULATION_REPORT",
            MessageKind::CalculationConfirm => "CALCULATION_CONFIRM",
            MessageKind::ResolutionRequest => "RESOLUTION_REQUEST",
            MessageKind::GameOver => "GAME_OVER",
            MessageKind::RematchRequest => "REMATCH_REQUEST",
            MessageKind::ChatMessage => "CHAT_MESSAGE",
        }
    }

    /// Parse a wire tag.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACK" => Some(MessageKind::Ack),
            "HANDSHAKE_REQUEST" => Some(MessageKind::HandshakeRequest),
            "HANDSHAKE_RESPONSE" => Some(MessageKind::HandshakeResponse),
            "SPECTATOR_REQUEST" => Some(MessageKind::SpectatorRequest),
            "BATTLE_SETUP" => Some(MessageKind::BattleSetup),
            "ATTACK_ANNOUNCE" => Some(MessageKind::AttackAnnounce),
            "DEFENSE_ANNOUNCE" => Some(MessageKind::DefenseAnnounce),
            "CALCULATION_REPORT" => Some(MessageKind::CalculationReport),
            "CALCULATION_CONFIRM" => Some(MessageKind::CalculationConfirm),
            "RESOLUTION_REQUEST" => Some(MessageKind::ResolutionRequest),
            "GAME_OVER" => Some(MessageKind::GameOver),
            "REMATCH_REQUEST" => Some(MessageKind::RematchRequest),
            "CHAT_MESSAGE" => Some(MessageKind::ChatMessage),
            _ => None,
        }
    }

    /// Kinds that drive battle/session progression (everything that is
    /// neither an ACK nor chat).
    pub fn is_battle(&self) -> bool {
        !matches!(self, MessageKind::Ack | MessageKind::ChatMessage)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Declared transport mode in a `BattleSetup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunicationMode {
    P2p,
    Broadcast,
}

impl CommunicationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommunicationMode::P2p => "P2P",
            CommunicationMode::Broadcast => "BROADCAST",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "P2P" => Some(CommunicationMode::P2p),
            "BROADCAST" => Some(CommunicationMode::Broadcast),
            _ => None,
        }
    }
}

/// Chat payload: plain text or a Base64 sticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatContent {
    Text(String),
    Sticker(String),
}

impl ChatContent {
    /// Wire value of the `content_type` field.
    pub fn content_type(&self) -> &'static str {
        match self {
            ChatContent::Text(_) => "TEXT",
            ChatContent::Sticker(_) => "STICKER",
        }
    }
}

/// A decoded protocol message.
///
/// The `stat_boosts` and `pokemon_data` fields of [`Message::BattleSetup`]
/// are JSON object literals carried as opaque strings; the session layer
/// parses them.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Ack {
        ack_number: u64,
    },
    HandshakeRequest {
        sequence_number: u64,
    },
    HandshakeResponse {
        sequence_number: u64,
        seed: u32,
    },
    SpectatorRequest {
        sequence_number: u64,
    },
    BattleSetup {
        sequence_number: u64,
        communication_mode: CommunicationMode,
        pokemon_name: String,
        stat_boosts: String,
        pokemon_data: String,
    },
    AttackAnnounce {
        sequence_number: u64,
        move_name: String,
        use_attack_boost: bool,
    },
    DefenseAnnounce {
        sequence_number: u64,
        use_defense_boost: bool,
    },
    CalculationReport {
        sequence_number: u64,
        attacker: String,
        move_used: String,
        remaining_health: i32,
        damage_dealt: u32,
        defender_hp_remaining: i32,
        status_message: String,
    },
    CalculationConfirm {
        sequence_number: u64,
    },
    ResolutionRequest {
        sequence_number: u64,
        attacker: String,
        move_used: String,
        damage_dealt: u32,
        defender_hp_remaining: i32,
    },
    GameOver {
        sequence_number: u64,
        winner: String,
        loser: String,
    },
    RematchRequest {
        sequence_number: u64,
        wants_rematch: bool,
    },
    ChatMessage {
        sequence_number: u64,
        sender_name: String,
        content: ChatContent,
    },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Ack { .. } => MessageKind::Ack,
            Message::HandshakeRequest { .. } => MessageKind::HandshakeRequest,
            Message::HandshakeResponse { .. } => MessageKind::HandshakeResponse,
            Message::SpectatorRequest { .. } => MessageKind::SpectatorRequest,
            Message::BattleSetup { .. } => MessageKind::BattleSetup,
            Message::AttackAnnounce { .. } => MessageKind::AttackAnnounce,
            Message::DefenseAnnounce { .. } => MessageKind::DefenseAnnounce,
            Message::CalculationReport { .. } => MessageKind::CalculationReport,
            Message::CalculationConfirm { .. } => MessageKind::CalculationConfirm,
            Message::ResolutionRequest { .. } => MessageKind::ResolutionRequest,
            Message::GameOver { .. } => MessageKind::GameOver,
            Message::RematchRequest { .. } => MessageKind::RematchRequest,
            Message::ChatMessage { .. } => MessageKind::ChatMessage,
        }
    }

    /// Sequence number of this message, `None` for ACKs.
    pub fn sequence_number(&self) -> Option<u64> {
        match self {
            Message::Ack { .. } => None,
            Message::HandshakeRequest { sequence_number }
            | Message::HandshakeResponse { sequence_number, .. }
            | Message::SpectatorRequest { sequence_number }
            | Message::BattleSetup { sequence_number, .. }
            | Message::AttackAnnounce { sequence_number, .. }
            | Message::DefenseAnnounce { sequence_number, .. }
            | Message::CalculationReport { sequence_number, .. }
            | Message::CalculationConfirm { sequence_number }
            | Message::ResolutionRequest { sequence_number, .. }
            | Message::GameOver { sequence_number, .. }
            | Message::RematchRequest { sequence_number, .. }
            | Message::ChatMessage { sequence_number, .. } => Some(*sequence_number),
        }
    }

    /// Stamp a freshly assigned sequence number. No-op on ACKs.
    pub fn set_sequence_number(&mut self, seq: u64) {
        match self {
            Message::Ack { .. } => {}
            Message::HandshakeRequest { sequence_number }
            | Message::HandshakeResponse { sequence_number, .. }
            | Message::SpectatorRequest { sequence_number }
            | Message::BattleSetup { sequence_number, .. }
            | Message::AttackAnnounce { sequence_number, .. }
            | Message::DefenseAnnounce { sequence_number, .. }
            | Message::CalculationReport { sequence_number, .. }
            | Message::CalculationConfirm { sequence_number }
            | Message::ResolutionRequest { sequence_number, .. }
            | Message::GameOver { sequence_number, .. }
            | Message::RematchRequest { sequence_number, .. }
            | Message::ChatMessage { sequence_number, .. } => *sequence_number = seq,
        }
    }
}
