use futures::stream::BoxStream;
use std::fmt;
use thiserror::Error;

/// Kind of a reply packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PacketKind {
    /// Final reply.
    Rep,
    /// Provisional reply; more packets follow.
    Prep,
    /// The request was refused.
    Nak,
}

impl PacketKind {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Rep => "REP",
            Self::Prep => "PREP",
            Self::Nak => "NAK",
        }
    }

    /// Whether the exchange is over once this packet arrives.
    pub(crate) const fn is_final(self) -> bool {
        !matches!(self, Self::Prep)
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for PacketKind {
    type Error = String;
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "REP" => Ok(Self::Rep),
            "PREP" => Ok(Self::Prep),
            "NAK" => Ok(Self::Nak),
            _ => Err(format!("invalid packet kind: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Packet {
    pub kind: PacketKind,
    pub body: String,
}

impl Packet {
    pub(crate) fn new(kind: PacketKind, body: impl Into<String>) -> Self {
        Self { kind, body: body.into() }
    }
}

/// Failures of the channel itself, as opposed to what the client said.
#[derive(Debug, Error)]
pub(crate) enum TransportError {
    #[error("cannot connect to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("timeout waiting for REP")]
    Timeout,

    #[error("connection closed before the final reply")]
    Closed,

    #[error("malformed packet: {0}")]
    Framing(String),
}

/// Carries one request to a host and yields its reply packets in order.
///
/// The stream ends after a `REP` or `NAK` packet. Deadlines are enforced by
/// the caller.
pub(crate) trait EstimateTransport: Send + Sync {
    fn request(&self, host: &str, body: String) -> BoxStream<'static, Result<Packet, TransportError>>;
}
