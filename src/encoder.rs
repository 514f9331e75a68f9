//! PreLogin packet encoder.
//!
//! Lays out one packet in a single buffer:
//!
//! ```text
//! 0       8 bytes   header (type, status, length, zeroed SPID/packet id/window)
//! 8       5*N       descriptors {kind, offset BE u16, length BE u16}
//! 8+5N    1         terminator 0xFF
//! 9+5N    ...       values, same order as the descriptors
//! ```
//!
//! Offsets are relative to the start of the descriptor table, so the first
//! value always sits at offset `5*N + 1`. The length field is written as a
//! placeholder and patched once the buffer is complete.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use tracing::trace;

use crate::error::{PreLoginError, PreLoginResult, Stage};
use crate::header::{DESCRIPTOR_SIZE, HEADER_SIZE, PacketHeader};
use crate::option::{OptionKind, OptionSet, TERMINATOR};

/// Hook that sees every packet the encoder assembles.
pub trait PacketObserver: Send + Sync {
    fn observe(&self, packet: &Packet);
}

/// A fully assembled PreLogin packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    bytes: Vec<u8>,
}

impl Packet {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn header(&self) -> PacketHeader {
        // Every packet is built with a full header in place.
        PacketHeader::decode(&self.bytes).unwrap_or_else(|| PacketHeader::prelogin(0))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Encoder for PreLogin packets.
///
/// Holds no per-packet state; one encoder can serve any number of
/// connections.
#[derive(Clone, Default)]
pub struct PreLoginEncoder {
    observer: Option<Arc<dyn PacketObserver>>,
}

impl fmt::Debug for PreLoginEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreLoginEncoder")
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl PreLoginEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a hook called with every assembled packet.
    pub fn with_observer(mut self, observer: Arc<dyn PacketObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Encode an option set into a packet.
    ///
    /// # Example
    ///
    /// ```
    /// use tds_prelogin::{OptionSet, PreLoginEncoder};
    ///
    /// let packet = PreLoginEncoder::new().encode(&OptionSet::new()).unwrap();
    /// assert_eq!(packet.as_bytes(), &[0x12, 0x01, 0x00, 0x09, 0, 0, 0, 0, 0xFF]);
    /// ```
    pub fn encode(&self, options: &OptionSet) -> PreLoginResult<Packet> {
        let entries = options.sorted();

        let table_len = DESCRIPTOR_SIZE * entries.len() + 1;
        let values_len: usize = entries.iter().map(|(_, v)| v.len()).sum();
        let total = HEADER_SIZE + table_len + values_len;
        if total > u16::MAX as usize {
            return Err(PreLoginError::PacketTooLarge(total));
        }

        let mut buf: Vec<u8> = Vec::with_capacity(total);
        write_layout(&mut buf, &entries)?;

        let len = buf.len() as u16;
        buf[2..4].copy_from_slice(&len.to_be_bytes());

        let packet = Packet { bytes: buf };
        trace!(
            len = packet.len(),
            options = entries.len(),
            packet = %packet.to_hex(),
            "assembled prelogin packet"
        );
        if let Some(observer) = &self.observer {
            observer.observe(&packet);
        }
        Ok(packet)
    }
}

/// Write header placeholder, descriptors, terminator and values in layout
/// order. Offsets are relative to the start of the descriptor table; the
/// caller has checked that the whole packet fits in u16.
fn write_layout<W: Write + ?Sized>(
    w: &mut W,
    entries: &[(OptionKind, &[u8])],
) -> PreLoginResult<()> {
    w.write_all(&PacketHeader::prelogin(0).encode())
        .map_err(|e| PreLoginError::io(Stage::Header, e))?;

    let mut offset = DESCRIPTOR_SIZE * entries.len() + 1;
    for (kind, value) in entries {
        let mut entry = [0u8; DESCRIPTOR_SIZE];
        entry[0] = kind.as_u8();
        entry[1..3].copy_from_slice(&(offset as u16).to_be_bytes());
        entry[3..5].copy_from_slice(&(value.len() as u16).to_be_bytes());
        w.write_all(&entry)
            .map_err(|e| PreLoginError::io(Stage::Descriptor, e))?;
        offset += value.len();
    }

    w.write_all(&[TERMINATOR])
        .map_err(|e| PreLoginError::io(Stage::Terminator, e))?;

    for (kind, value) in entries {
        let written = w
            .write(value)
            .map_err(|e| PreLoginError::io(Stage::Value, e))?;
        if written != value.len() {
            return Err(PreLoginError::ShortWrite {
                kind: kind.as_u8(),
                declared: value.len(),
                written,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io;
    use std::sync::Mutex;

    /// Accepts `limit` bytes in total, then reports zero-length writes.
    struct CappedSink {
        buf: Vec<u8>,
        limit: usize,
    }

    impl Write for CappedSink {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            let n = data.len().min(self.limit - self.buf.len());
            self.buf.extend_from_slice(&data[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Accepts `ok_writes` calls, then fails every write.
    struct FailingSink {
        ok_writes: usize,
    }

    impl Write for FailingSink {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            if self.ok_writes == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
            }
            self.ok_writes -= 1;
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn failure_stage(ok_writes: usize, options: &OptionSet) -> Stage {
        let entries = options.sorted();
        match write_layout(&mut FailingSink { ok_writes }, &entries) {
            Err(PreLoginError::Io { stage, .. }) => stage,
            other => panic!("expected io error, got {other:?}"),
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Vec<u8>>>,
    }

    impl PacketObserver for Recorder {
        fn observe(&self, packet: &Packet) {
            self.seen.lock().unwrap().push(packet.as_bytes().to_vec());
        }
    }

    #[test]
    fn test_server_defaults_layout() {
        let options = OptionSet::server_defaults("teleport").unwrap();
        let packet = PreLoginEncoder::new().encode(&options).unwrap();

        let expected: Vec<u8> = [
            // header
            &[0x12, 0x01, 0x00, 55, 0, 0, 0, 0][..],
            // descriptors
            &[0x00, 0x00, 26, 0x00, 6][..],
            &[0x01, 0x00, 32, 0x00, 1][..],
            &[0x02, 0x00, 33, 0x00, 9][..],
            &[0x03, 0x00, 42, 0x00, 4][..],
            &[0x04, 0x00, 46, 0x00, 1][..],
            &[0xFF][..],
            // values
            &[0, 0, 0, 0, 0, 0][..],
            &[0x02][..],
            &b"teleport\0"[..],
            &[0, 0, 0, 0][..],
            &[0][..],
        ]
        .concat();

        assert_eq!(packet.as_bytes(), expected.as_slice());
        assert_eq!(packet.len(), 8 + (5 * 5 + 1) + (6 + 1 + 9 + 4 + 1));
    }

    #[test]
    fn test_empty_set() {
        let packet = PreLoginEncoder::new().encode(&OptionSet::new()).unwrap();
        assert_eq!(packet.len(), HEADER_SIZE + 1);
        assert_eq!(packet.header().length, 9);
        assert_eq!(packet.as_bytes()[8], TERMINATOR);
    }

    #[test]
    fn test_zero_length_value_keeps_offset() {
        let mut options = OptionSet::new();
        options.insert(OptionKind::Encryption, Vec::new()).unwrap();
        options.insert(OptionKind::Mars, [1u8]).unwrap();
        let packet = PreLoginEncoder::new().encode(&options).unwrap();
        let bytes = packet.as_bytes();

        // Both descriptors point at offset 11 (2 * 5 + 1).
        assert_eq!(&bytes[8..13], &[0x01, 0x00, 11, 0x00, 0]);
        assert_eq!(&bytes[13..18], &[0x04, 0x00, 11, 0x00, 1]);
        assert_eq!(bytes[18], TERMINATOR);
        assert_eq!(bytes[19], 1);
        assert_eq!(packet.len(), 20);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let encoder = PreLoginEncoder::new();
        let mut a = OptionSet::new();
        a.insert(OptionKind::Mars, [0u8]).unwrap();
        a.insert(OptionKind::Version, [9u8, 0, 0, 0, 0, 0]).unwrap();
        a.insert(OptionKind::InstOpt, b"x\0".to_vec()).unwrap();

        let mut b = OptionSet::new();
        b.insert(OptionKind::InstOpt, b"x\0".to_vec()).unwrap();
        b.insert(OptionKind::Version, [9u8, 0, 0, 0, 0, 0]).unwrap();
        b.insert(OptionKind::Mars, [0u8]).unwrap();

        let first = encoder.encode(&a).unwrap();
        assert_eq!(first, encoder.encode(&a).unwrap());
        assert_eq!(first, encoder.encode(&b).unwrap());
    }

    #[test]
    fn test_packet_too_large() {
        let mut options = OptionSet::new();
        options.insert(OptionKind::NonceOpt, vec![0u8; 65_000]).unwrap();
        options.insert(OptionKind::TraceId, vec![0u8; 1_000]).unwrap();
        let err = PreLoginEncoder::new().encode(&options).unwrap_err();
        assert!(matches!(err, PreLoginError::PacketTooLarge(66_019)));
    }

    #[test]
    fn test_largest_packet_fits() {
        let mut options = OptionSet::new();
        // 8 + 6 + 65521 = 65535
        options.insert(OptionKind::NonceOpt, vec![7u8; 65_521]).unwrap();
        let packet = PreLoginEncoder::new().encode(&options).unwrap();
        assert_eq!(packet.header().length, u16::MAX);
    }

    #[test]
    fn test_observer_sees_packet() {
        let recorder = Arc::new(Recorder::default());
        let encoder = PreLoginEncoder::new().with_observer(recorder.clone());
        let packet = encoder
            .encode(&OptionSet::server_defaults("db").unwrap())
            .unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], packet.into_vec());
    }

    #[test]
    fn test_partial_value_write_is_short_write() {
        let options = OptionSet::server_defaults("teleport").unwrap();
        let entries = options.sorted();
        // Header, 5 descriptors, terminator, VERSION and ENCRYPTION fit;
        // INSTOPT gets 3 of its 9 bytes.
        let limit = 8 + 26 + 6 + 1 + 3;
        let mut sink = CappedSink { buf: Vec::new(), limit };

        let err = write_layout(&mut sink, &entries).unwrap_err();
        assert!(matches!(
            err,
            PreLoginError::ShortWrite { kind: 0x02, declared: 9, written: 3 }
        ));
        assert_eq!(sink.buf.len(), limit);
    }

    #[test]
    fn test_failed_write_names_stage() {
        let options = OptionSet::server_defaults("teleport").unwrap();
        // One write per header, descriptor and terminator, then values.
        assert_eq!(failure_stage(0, &options), Stage::Header);
        assert_eq!(failure_stage(1, &options), Stage::Descriptor);
        assert_eq!(failure_stage(5, &options), Stage::Descriptor);
        assert_eq!(failure_stage(6, &options), Stage::Terminator);
        assert_eq!(failure_stage(7, &options), Stage::Value);
        assert_eq!(failure_stage(11, &options), Stage::Value);
    }

    #[test]
    fn test_layout_matches_encode() {
        let options = OptionSet::server_defaults("sql01").unwrap();
        let mut raw = Vec::new();
        write_layout(&mut raw, &options.sorted()).unwrap();
        let packet = PreLoginEncoder::new().encode(&options).unwrap();
        // Only the patched length differs.
        assert_eq!(&raw[..2], &packet.as_bytes()[..2]);
        assert_eq!(&raw[2..4], &[0u8, 0]);
        assert_eq!(&raw[4..], &packet.as_bytes()[4..]);
    }
}
