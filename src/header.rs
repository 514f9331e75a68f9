//! TDS packet header.
//!
//! ```text
//! ┌──────┬────────┬──────────┬──────────┬───────────┬────────┐
//! │ Type │ Status │ Length   │ SPID     │ Packet ID │ Window │
//! │ 1    │ 1      │ u16 BE   │ u16 BE   │ 1         │ 1      │
//! └──────┴────────┴──────────┴──────────┴───────────┴────────┘
//! ```
//!
//! `Length` covers the whole packet, header included.

/// Header size in bytes.
pub const HEADER_SIZE: usize = 8;

/// Descriptor entry size: kind (1) + offset (2) + length (2).
pub const DESCRIPTOR_SIZE: usize = 5;

/// Packet type tag for PreLogin messages.
pub const PACKET_TYPE_PRELOGIN: u8 = 0x12;

/// Status flag: last packet of the message.
pub const STATUS_EOM: u8 = 0x01;

/// Decoded 8-byte packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_type: u8,
    pub status: u8,
    /// Total packet length in bytes.
    pub length: u16,
    pub spid: u16,
    pub packet_id: u8,
    pub window: u8,
}

impl PacketHeader {
    /// Header of a single-packet PreLogin message. SPID, packet id and
    /// window stay zero.
    pub fn prelogin(length: u16) -> Self {
        Self {
            packet_type: PACKET_TYPE_PRELOGIN,
            status: STATUS_EOM,
            length,
            spid: 0,
            packet_id: 0,
            window: 0,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.packet_type;
        buf[1] = self.status;
        buf[2..4].copy_from_slice(&self.length.to_be_bytes());
        buf[4..6].copy_from_slice(&self.spid.to_be_bytes());
        buf[6] = self.packet_id;
        buf[7] = self.window;
        buf
    }

    /// Returns `None` if the buffer is shorter than a header.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            packet_type: buf[0],
            status: buf[1],
            length: u16::from_be_bytes([buf[2], buf[3]]),
            spid: u16::from_be_bytes([buf[4], buf[5]]),
            packet_id: buf[6],
            window: buf[7],
        })
    }

    #[inline]
    pub fn is_prelogin(&self) -> bool {
        self.packet_type == PACKET_TYPE_PRELOGIN
    }

    #[inline]
    pub fn is_end_of_message(&self) -> bool {
        self.status & STATUS_EOM != 0
    }
}
