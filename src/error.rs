//! Error types for PreLogin encoding.

use std::fmt;

use thiserror::Error;

/// Point in packet assembly or delivery where an I/O failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Header,
    Descriptor,
    Terminator,
    Value,
    Transmit,
    /// Reading a peer's packet.
    Receive,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Header => "header",
            Stage::Descriptor => "descriptor",
            Stage::Terminator => "terminator",
            Stage::Value => "value",
            Stage::Transmit => "transmit",
            Stage::Receive => "receive",
        };
        f.write_str(name)
    }
}

/// The main error type for PreLogin operations.
#[derive(Debug, Error)]
pub enum PreLoginError {
    /// The connection rejected a read or write.
    #[error("IO error during {stage}: {source}")]
    Io {
        stage: Stage,
        #[source]
        source: std::io::Error,
    },

    /// A value write reported fewer bytes than the option declares.
    #[error("Short write for option 0x{kind:02X}: declared {declared} bytes, wrote {written}")]
    ShortWrite {
        kind: u8,
        declared: usize,
        written: usize,
    },

    /// The terminator sentinel was supplied as a content option.
    #[error("Option kind 0x{0:02X} is reserved for the terminator")]
    ReservedKind(u8),

    /// Byte outside the PreLogin option enumeration.
    #[error("Unknown PreLogin option kind: 0x{0:02X}")]
    UnknownKind(u8),

    /// Value does not fit the 16-bit length field.
    #[error("Value for option 0x{kind:02X} is {len} bytes (limit is 65535)")]
    ValueTooLarge { kind: u8, len: usize },

    /// Assembled packet does not fit the 16-bit header length field.
    #[error("Packet is {0} bytes (limit is 65535)")]
    PacketTooLarge(usize),

    /// Captured bytes are not a well-formed PreLogin packet.
    #[error("Malformed packet: {0}")]
    Malformed(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PreLoginError {
    /// Wrap an I/O error with the stage it happened in.
    pub fn io(stage: Stage, source: std::io::Error) -> Self {
        Self::Io { stage, source }
    }

    /// Create a malformed-packet error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}

/// Result type alias for PreLogin operations.
pub type PreLoginResult<T> = Result<T, PreLoginError>;
