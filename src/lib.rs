//! # tds-prelogin
//!
//! Byte-exact encoder for the TDS PreLogin packet a server sends before
//! authentication, advertising its version, encryption support, instance
//! name, thread id and MARS support.
//!
//! ## Quick Example
//!
//! ```rust
//! use tds_prelogin::prelude::*;
//!
//! let options = OptionSet::server_defaults("teleport")?;
//! let packet = PreLoginEncoder::new().encode(&options)?;
//!
//! let mut conn: Vec<u8> = Vec::new();
//! transmit(&packet, &mut conn)?;
//! assert_eq!(conn.len(), 55);
//! # Ok::<(), tds_prelogin::PreLoginError>(())
//! ```
//!
//! ## Wire Layout
//!
//! | Offset   | Size  | Field                                   |
//! |----------|-------|-----------------------------------------|
//! | 0        | 8     | Header (type 0x12, status 0x01, length) |
//! | 8        | 5*N   | Descriptors `{kind, offset, length}`    |
//! | 8+5N     | 1     | Terminator 0xFF                         |
//! | 9+5N     | ...   | Values in ascending kind order          |

pub mod config;
pub mod encoder;
pub mod error;
pub mod header;
pub mod inspect;
pub mod option;
pub mod server;
pub mod transmit;

pub use encoder::{Packet, PacketObserver, PreLoginEncoder};
pub use error::{PreLoginError, PreLoginResult, Stage};
pub use inspect::decode;
pub use option::{OptionKind, OptionSet};

pub mod prelude {
    pub use crate::config::ServerConfig;
    pub use crate::encoder::{Packet, PacketObserver, PreLoginEncoder};
    pub use crate::error::*;
    pub use crate::header::PacketHeader;
    pub use crate::inspect::{DecodedPacket, decode};
    pub use crate::option::{OptionKind, OptionSet};
    pub use crate::transmit::{transmit, transmit_async, write_prelogin, write_prelogin_async};
}

/// Encode an option set with a default encoder.
///
/// # Example
///
/// ```
/// use tds_prelogin::{encode, OptionSet};
///
/// let packet = encode(&OptionSet::new()).unwrap();
/// assert_eq!(packet.len(), 9);
/// ```
pub fn encode(options: &OptionSet) -> PreLoginResult<Packet> {
    PreLoginEncoder::new().encode(options)
}
