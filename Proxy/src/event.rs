use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize;

use crate::tuning::AppliedTuning;

/// How the destination of a connection was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    /// `CONNECT host:port`, answered with 200 and tunnelled.
    Tunnel,
    /// `GET http://host/...`, forwarded with an origin-form request line.
    Forward,
    /// Anything else, relayed as-is to the configured target.
    Transparent,
}

/// One step in the life of a proxied connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ProxyEvent {
    Accepted {
        connection_id: u64,
        peer: SocketAddr,
    },
    Established {
        connection_id: u64,
        target: String,
        mode: RelayMode,
        client_tuning: AppliedTuning,
        target_tuning: AppliedTuning,
    },
    Closed {
        connection_id: u64,
        client_to_target: u64,
        target_to_client: u64,
        duration_seconds: f64,
        /// Bits per second over the whole connection lifetime.
        transfer_rate_bps: f64,
    },
    /// Terminal event of a failed connection. Byte counts cover whatever
    /// was relayed before the failure.
    Error {
        connection_id: u64,
        error: String,
        client_to_target: u64,
        target_to_client: u64,
        duration_seconds: f64,
        transfer_rate_bps: f64,
    },
}

impl ProxyEvent {
    pub fn connection_id(&self) -> u64 {
        match self {
            ProxyEvent::Accepted { connection_id, .. }
            | ProxyEvent::Established { connection_id, .. }
            | ProxyEvent::Closed { connection_id, .. }
            | ProxyEvent::Error { connection_id, .. } => *connection_id,
        }
    }
}

pub type ProxyEventCallback = Arc<dyn Fn(ProxyEvent) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_by_phase() {
        let event = ProxyEvent::Closed {
            connection_id: 7,
            client_to_target: 100,
            target_to_client: 900,
            duration_seconds: 2.0,
            transfer_rate_bps: 4000.0,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["phase"], "closed");
        assert_eq!(json["target_to_client"], 900);
        assert_eq!(event.connection_id(), 7);
    }
}
