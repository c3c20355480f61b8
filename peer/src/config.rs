//! Peer configuration.

use std::time::Duration;

/// Default Host listen port.
pub const HOST_PORT: u16 = 8888;

#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Local UDP port; 0 binds an ephemeral port (Joiners and Spectators).
    pub bind_port: u16,

    /// Chat identity. Also the self-echo guard: received chat carrying this
    /// name is never displayed locally.
    pub display_name: String,

    /// Constant retransmission interval (no backoff).
    pub retry_interval: Duration,

    /// Retries after the initial transmission before a destination is
    /// declared unreachable; 3 means 4 attempts total.
    pub max_retries: u32,

    /// Reliability tick cadence.
    pub tick_interval: Duration,

    /// Per-endpoint window of recently seen inbound sequence numbers.
    pub dedup_window: usize,

    /// Ceiling on the *encoded* sticker payload. The default keeps a sticker
    /// datagram inside the 1472-byte safe UDP payload.
    pub max_sticker_len: usize,

    /// Enable SO_BROADCAST and allow sending to the broadcast address.
    pub broadcast: bool,

    /// Deliberate report corruption, for exercising the discrepancy paths.
    pub fault: FaultInjection,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            bind_port: 0,
            display_name: "anonymous".to_string(),
            retry_interval: Duration::from_millis(500),
            max_retries: 3,
            tick_interval: Duration::from_millis(100),
            dedup_window: 1024,
            max_sticker_len: 1024,
            broadcast: false,
            fault: FaultInjection::default(),
        }
    }
}

impl PeerConfig {
    /// Host defaults: well-known port, host display name.
    pub fn host() -> Self {
        Self {
            bind_port: HOST_PORT,
            display_name: "Host".to_string(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.display_name = name.to_string();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.bind_port = port;
        self
    }
}

/// Skews outgoing calculation values to force the discrepancy machinery.
/// Never enabled in a healthy session; integration tests drive S5/S6
/// through this knob.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultInjection {
    /// Number of turns whose outgoing CalculationReport is skewed by
    /// +1 damage.
    pub skew_reports: u32,

    /// Also skew the re-evaluated ResolutionRequest values, making the
    /// disagreement unresolvable.
    pub skew_resolution: bool,
}

impl FaultInjection {
    pub fn is_active(&self) -> bool {
        self.skew_reports > 0 || self.skew_resolution
    }
}
