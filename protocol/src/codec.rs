//! Text wire codec.
//!
//! One message per datagram, UTF-8, newline-separated `key: value` lines.
//! The first line is always `message_type: <KIND>`; the sequence number is
//! the last line. Key order is fixed so both peers produce byte-identical
//! encodings for identical messages. Unknown keys are ignored on decode;
//! missing required keys reject the datagram.

use anyhow::Result;

use crate::message::{ChatContent, CommunicationMode, Message, MessageKind};
use crate::ParseError;

/// Largest UDP payload that avoids IP-level fragmentation on a standard
/// 1500-byte MTU link. Datagrams above this MAY still be sent (stickers);
/// the codec never truncates.
pub const SAFE_UDP_PAYLOAD: usize = 1472;

/// Encode a message into its datagram bytes. Deterministic: stable key
/// ordering, decimal integers, `true`/`false` booleans.
pub fn encode(message: &Message) -> Vec<u8> {
    let mut out = String::new();
    line(&mut out, "message_type", message.kind().as_str());

    match message {
        Message::Ack { ack_number } => {
            line(&mut out, "ack_number", &ack_number.to_string());
        }
        Message::HandshakeRequest { .. } | Message::SpectatorRequest { .. } => {}
        Message::HandshakeResponse { seed, .. } => {
            line(&mut out, "seed", &seed.to_string());
        }
        Message::BattleSetup {
            communication_mode,
            pokemon_name,
            stat_boosts,
            pokemon_data,
            ..
        } => {
            line(&mut out, "communication_mode", communication_mode.as_str());
            line(&mut out, "pokemon_name", pokemon_name);
            line(&mut out, "stat_boosts", stat_boosts);
            line(&mut out, "pokemon_data", pokemon_data);
        }
        Message::AttackAnnounce {
            move_name,
            use_attack_boost,
            ..
        } => {
            line(&mut out, "move_name", move_name);
            if *use_attack_boost {
                line(&mut out, "use_attack_boost", "true");
            }
        }
        Message::DefenseAnnounce {
            use_defense_boost, ..
        } => {
            if *use_defense_boost {
                line(&mut out, "use_defense_boost", "true");
            }
        }
        Message::CalculationReport {
            attacker,
            move_used,
            remaining_health,
            damage_dealt,
            defender_hp_remaining,
            status_message,
            ..
        } => {
            line(&mut out, "attacker", attacker);
            line(&mut out, "move_used", move_used);
            line(&mut out, "remaining_health", &remaining_health.to_string());
            line(&mut out, "damage_dealt", &damage_dealt.to_string());
            line(
                &mut out,
                "defender_hp_remaining",
                &defender_hp_remaining.to_string(),
            );
            line(&mut out, "status_message", status_message);
        }
        Message::CalculationConfirm { .. } => {}
        Message::ResolutionRequest {
            attacker,
            move_used,
            damage_dealt,
            defender_hp_remaining,
            ..
        } => {
            line(&mut out, "attacker", attacker);
            line(&mut out, "move_used", move_used);
            line(&mut out, "damage_dealt", &damage_dealt.to_string());
            line(
                &mut out,
                "defender_hp_remaining",
                &defender_hp_remaining.to_string(),
            );
        }
        Message::GameOver { winner, loser, .. } => {
            line(&mut out, "winner", winner);
            line(&mut out, "loser", loser);
        }
        Message::RematchRequest { wants_rematch, .. } => {
            line(
                &mut out,
                "wants_rematch",
                if *wants_rematch { "true" } else { "false" },
            );
        }
        Message::ChatMessage {
            sender_name,
            content,
            ..
        } => {
            line(&mut out, "sender_name", sender_name);
            line(&mut out, "content_type", content.content_type());
            match content {
                ChatContent::Text(text) => line(&mut out, "message_text", text),
                ChatContent::Sticker(data) => line(&mut out, "sticker_data", data),
            }
        }
    }

    if let Some(seq) = message.sequence_number() {
        line(&mut out, "sequence_number", &seq.to_string());
    }
    out.into_bytes()
}

/// Decode a datagram into a message.
pub fn decode(data: &[u8]) -> Result<Message> {
    let text = std::str::from_utf8(data)
        .map_err(|e| ParseError::InvalidFormat(format!("not UTF-8: {}", e)))?;

    let fields = parse_fields(text);
    if fields.is_empty() {
        return Err(ParseError::EmptyMessage.into());
    }

    let kind_tag = require(&fields, "message_type")?;
    let kind = MessageKind::parse(kind_tag)
        .ok_or_else(|| ParseError::UnknownKind(kind_tag.to_string()))?;

    if kind == MessageKind::Ack {
        return Ok(Message::Ack {
            ack_number: require_u64(&fields, "ack_number")?,
        });
    }

    let sequence_number = require_u64(&fields, "sequence_number")?;

    let message = match kind {
        MessageKind::Ack => unreachable!("handled above"),
        MessageKind::HandshakeRequest => Message::HandshakeRequest { sequence_number },
        MessageKind::HandshakeResponse => Message::HandshakeResponse {
            sequence_number,
            seed: require_u32(&fields, "seed")?,
        },
        MessageKind::SpectatorRequest => Message::SpectatorRequest { sequence_number },
        MessageKind::BattleSetup => {
            let mode_tag = require(&fields, "communication_mode")?;
            Message::BattleSetup {
                sequence_number,
                communication_mode: CommunicationMode::parse(mode_tag).ok_or_else(|| {
                    ParseError::InvalidFormat(format!("bad communication_mode: {}", mode_tag))
                })?,
                pokemon_name: require(&fields, "pokemon_name")?.to_string(),
                stat_boosts: require(&fields, "stat_boosts")?.to_string(),
                pokemon_data: require(&fields, "pokemon_data")?.to_string(),
            }
        }
        MessageKind::AttackAnnounce => Message::AttackAnnounce {
            sequence_number,
            move_name: require(&fields, "move_name")?.to_string(),
            use_attack_boost: flag(&fields, "use_attack_boost"),
        },
        MessageKind::DefenseAnnounce => Message::DefenseAnnounce {
            sequence_number,
            use_defense_boost: flag(&fields, "use_defense_boost"),
        },
        MessageKind::CalculationReport => Message::CalculationReport {
            sequence_number,
            attacker: require(&fields, "attacker")?.to_string(),
            move_used: require(&fields, "move_used")?.to_string(),
            remaining_health: require_i32(&fields, "remaining_health")?,
            damage_dealt: require_u32(&fields, "damage_dealt")?,
            defender_hp_remaining: require_i32(&fields, "defender_hp_remaining")?,
            status_message: require(&fields, "status_message")?.to_string(),
        },
        MessageKind::CalculationConfirm => Message::CalculationConfirm { sequence_number },
        MessageKind::ResolutionRequest => Message::ResolutionRequest {
            sequence_number,
            attacker: require(&fields, "attacker")?.to_string(),
            move_used: require(&fields, "move_used")?.to_string(),
            damage_dealt: require_u32(&fields, "damage_dealt")?,
            defender_hp_remaining: require_i32(&fields, "defender_hp_remaining")?,
        },
        MessageKind::GameOver => Message::GameOver {
            sequence_number,
            winner: require(&fields, "winner")?.to_string(),
            loser: require(&fields, "loser")?.to_string(),
        },
        MessageKind::RematchRequest => Message::RematchRequest {
            sequence_number,
            wants_rematch: flag(&fields, "wants_rematch"),
        },
        MessageKind::ChatMessage => {
            let content = match require(&fields, "content_type")? {
                "TEXT" => ChatContent::Text(require(&fields, "message_text")?.to_string()),
                "STICKER" => ChatContent::Sticker(require(&fields, "sticker_data")?.to_string()),
                other => {
                    return Err(
                        ParseError::InvalidFormat(format!("bad content_type: {}", other)).into(),
                    )
                }
            };
            Message::ChatMessage {
                sequence_number,
                sender_name: require(&fields, "sender_name")?.to_string(),
                content,
            }
        }
    };

    Ok(message)
}

fn line(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push_str(": ");
    out.push_str(value);
    out.push('\n');
}

/// Split into `(key, value)` pairs. The value is everything after the first
/// colon, so colons in free-text values survive. Lines without a colon are
/// skipped.
fn parse_fields(text: &str) -> Vec<(&str, &str)> {
    text.lines()
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect()
}

fn get<'a>(fields: &[(&'a str, &'a str)], key: &str) -> Option<&'a str> {
    fields.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

fn require<'a>(fields: &[(&'a str, &'a str)], key: &str) -> Result<&'a str> {
    get(fields, key).ok_or_else(|| ParseError::MissingField(key.to_string()).into())
}

fn require_u64(fields: &[(&str, &str)], key: &str) -> Result<u64> {
    parse_num(require(fields, key)?, key)
}

fn require_u32(fields: &[(&str, &str)], key: &str) -> Result<u32> {
    parse_num(require(fields, key)?, key)
}

fn require_i32(fields: &[(&str, &str)], key: &str) -> Result<i32> {
    parse_num(require(fields, key)?, key)
}

fn parse_num<T: std::str::FromStr>(raw: &str, key: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| ParseError::InvalidFormat(format!("bad {}: {}", key, raw)).into())
}

/// Optional boolean field; absent means false.
fn flag(fields: &[(&str, &str)], key: &str) -> bool {
    get(fields, key).map(|v| v == "true").unwrap_or(false)
}
