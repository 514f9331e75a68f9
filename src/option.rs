//! PreLogin option kinds and the option set handed to the encoder.

use std::collections::HashMap;
use std::fmt;

use crate::error::{PreLoginError, PreLoginResult};

/// Sentinel byte closing the descriptor table. Never a content option.
pub const TERMINATOR: u8 = 0xFF;

/// Largest value an option can carry (16-bit length field).
pub const MAX_VALUE_LEN: usize = u16::MAX as usize;

/// ENCRYPTION value: encryption is not supported by this server.
pub const ENCRYPT_NOT_SUP: u8 = 0x02;

/// Instance name advertised when none is configured.
pub const DEFAULT_INSTANCE: &str = "teleport";

/// PreLogin option identifiers, as defined by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OptionKind {
    Version = 0x00,
    Encryption = 0x01,
    /// Instance name, zero-terminated.
    InstOpt = 0x02,
    ThreadId = 0x03,
    /// Multiple Active Result Sets.
    Mars = 0x04,
    TraceId = 0x05,
    FedAuthRequired = 0x06,
    NonceOpt = 0x07,
}

impl OptionKind {
    /// Wire byte for this kind.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            OptionKind::Version => "VERSION",
            OptionKind::Encryption => "ENCRYPTION",
            OptionKind::InstOpt => "INSTOPT",
            OptionKind::ThreadId => "THREADID",
            OptionKind::Mars => "MARS",
            OptionKind::TraceId => "TRACEID",
            OptionKind::FedAuthRequired => "FEDAUTHREQUIRED",
            OptionKind::NonceOpt => "NONCEOPT",
        }
    }
}

impl TryFrom<u8> for OptionKind {
    type Error = PreLoginError;

    fn try_from(value: u8) -> PreLoginResult<Self> {
        match value {
            0x00 => Ok(Self::Version),
            0x01 => Ok(Self::Encryption),
            0x02 => Ok(Self::InstOpt),
            0x03 => Ok(Self::ThreadId),
            0x04 => Ok(Self::Mars),
            0x05 => Ok(Self::TraceId),
            0x06 => Ok(Self::FedAuthRequired),
            0x07 => Ok(Self::NonceOpt),
            TERMINATOR => Err(PreLoginError::ReservedKind(value)),
            _ => Err(PreLoginError::UnknownKind(value)),
        }
    }
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Mapping from option kind to its raw value.
///
/// Storage is unordered. Anything that needs a stable layout goes through
/// [`OptionSet::sorted_kinds`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSet {
    fields: HashMap<OptionKind, Vec<u8>>,
}

impl OptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The set a server advertises: zeroed version, encryption not
    /// supported, the zero-terminated instance name, zeroed thread id and
    /// MARS disabled.
    ///
    /// # Example
    ///
    /// ```
    /// use tds_prelogin::{OptionKind, OptionSet};
    ///
    /// let options = OptionSet::server_defaults("teleport").unwrap();
    /// assert_eq!(options.get(OptionKind::InstOpt), Some(&b"teleport\0"[..]));
    /// ```
    pub fn server_defaults(instance: &str) -> PreLoginResult<Self> {
        let mut instopt = Vec::with_capacity(instance.len() + 1);
        instopt.extend_from_slice(instance.as_bytes());
        instopt.push(0);

        let mut options = Self::new();
        options.insert(OptionKind::Version, [0u8; 6])?;
        options.insert(OptionKind::Encryption, [ENCRYPT_NOT_SUP])?;
        options.insert(OptionKind::InstOpt, instopt)?;
        options.insert(OptionKind::ThreadId, [0u8; 4])?;
        options.insert(OptionKind::Mars, [0u8])?;
        Ok(options)
    }

    /// Insert or replace an option, returning the previous value.
    pub fn insert(
        &mut self,
        kind: OptionKind,
        value: impl Into<Vec<u8>>,
    ) -> PreLoginResult<Option<Vec<u8>>> {
        let value = value.into();
        if value.len() > MAX_VALUE_LEN {
            return Err(PreLoginError::ValueTooLarge {
                kind: kind.as_u8(),
                len: value.len(),
            });
        }
        Ok(self.fields.insert(kind, value))
    }

    /// Insert by wire byte. The terminator and unknown bytes are rejected.
    pub fn insert_raw(
        &mut self,
        kind: u8,
        value: impl Into<Vec<u8>>,
    ) -> PreLoginResult<Option<Vec<u8>>> {
        let kind = OptionKind::try_from(kind)?;
        self.insert(kind, value)
    }

    pub fn get(&self, kind: OptionKind) -> Option<&[u8]> {
        self.fields.get(&kind).map(Vec::as_slice)
    }

    pub fn contains(&self, kind: OptionKind) -> bool {
        self.fields.contains_key(&kind)
    }

    pub fn remove(&mut self, kind: OptionKind) -> Option<Vec<u8>> {
        self.fields.remove(&kind)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Kinds in ascending numeric order. Both the descriptor table and the
    /// value section are laid out in this order.
    pub fn sorted_kinds(&self) -> Vec<OptionKind> {
        let mut kinds: Vec<OptionKind> = self.fields.keys().copied().collect();
        kinds.sort_unstable_by_key(|k| k.as_u8());
        kinds
    }

    /// `(kind, value)` pairs in layout order.
    pub fn sorted(&self) -> Vec<(OptionKind, &[u8])> {
        self.sorted_kinds()
            .into_iter()
            .map(|k| (k, self.fields[&k].as_slice()))
            .collect()
    }
}
