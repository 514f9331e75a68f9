//! PreLogin packet inspection using nom.
//!
//! The inverse of the encoder's layout: splits a captured packet back into
//! its header, descriptor table and option values. Option semantics are not
//! interpreted.

use std::collections::HashSet;

use nom::{
    bytes::complete::tag,
    multi::many_till,
    number::complete::{be_u16, be_u8},
    sequence::tuple,
    IResult,
};

use crate::error::{PreLoginError, PreLoginResult};
use crate::header::PacketHeader;
use crate::option::{OptionKind, OptionSet, TERMINATOR};

/// One entry of the descriptor table as found on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub kind: u8,
    /// Relative to the start of the descriptor table.
    pub offset: u16,
    pub length: u16,
}

/// A packet split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPacket {
    pub header: PacketHeader,
    /// Descriptors in wire order.
    pub descriptors: Vec<Descriptor>,
    pub options: OptionSet,
}

/// Decode a complete PreLogin packet.
///
/// # Example
///
/// ```
/// use tds_prelogin::{decode, OptionKind, OptionSet, PreLoginEncoder};
///
/// let options = OptionSet::server_defaults("teleport").unwrap();
/// let packet = PreLoginEncoder::new().encode(&options).unwrap();
/// let decoded = decode(packet.as_bytes()).unwrap();
/// assert_eq!(decoded.options, options);
/// ```
pub fn decode(buf: &[u8]) -> PreLoginResult<DecodedPacket> {
    let (body, header) = parse_header(buf)
        .map_err(|_| PreLoginError::malformed(format!("{} bytes is shorter than a header", buf.len())))?;

    if header.length as usize != buf.len() {
        return Err(PreLoginError::malformed(format!(
            "header declares {} bytes, packet has {}",
            header.length,
            buf.len()
        )));
    }

    let (values, (descriptors, _)) = parse_descriptor_table(body)
        .map_err(|_| PreLoginError::malformed("descriptor table is not terminated"))?;

    let table_len = body.len() - values.len();
    let mut seen = HashSet::new();
    let mut options = OptionSet::new();

    for d in &descriptors {
        if !seen.insert(d.kind) {
            return Err(PreLoginError::malformed(format!(
                "option 0x{:02X} appears twice",
                d.kind
            )));
        }

        let start = d.offset as usize;
        let end = start + d.length as usize;
        if start < table_len || end > body.len() {
            return Err(PreLoginError::malformed(format!(
                "option 0x{:02X} value {}..{} is outside the value section {}..{}",
                d.kind,
                start,
                end,
                table_len,
                body.len()
            )));
        }

        let kind = OptionKind::try_from(d.kind)?;
        options.insert(kind, &body[start..end])?;
    }

    Ok(DecodedPacket {
        header,
        descriptors,
        options,
    })
}

fn parse_header(input: &[u8]) -> IResult<&[u8], PacketHeader> {
    let (input, (packet_type, status, length, spid, packet_id, window)) =
        tuple((be_u8, be_u8, be_u16, be_u16, be_u8, be_u8))(input)?;
    Ok((
        input,
        PacketHeader {
            packet_type,
            status,
            length,
            spid,
            packet_id,
            window,
        },
    ))
}

fn parse_descriptor(input: &[u8]) -> IResult<&[u8], Descriptor> {
    let (input, (kind, offset, length)) = tuple((be_u8, be_u16, be_u16))(input)?;
    Ok((input, Descriptor { kind, offset, length }))
}

fn parse_descriptor_table(input: &[u8]) -> IResult<&[u8], (Vec<Descriptor>, &[u8])> {
    const END: &[u8] = &[TERMINATOR];
    many_till(parse_descriptor, tag(END))(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::PreLoginEncoder;
    use pretty_assertions::assert_eq;

    fn encoded(options: &OptionSet) -> Vec<u8> {
        PreLoginEncoder::new().encode(options).unwrap().into_vec()
    }

    #[test]
    fn test_decode_server_defaults() {
        let options = OptionSet::server_defaults("teleport").unwrap();
        let decoded = decode(&encoded(&options)).unwrap();

        assert_eq!(decoded.header, PacketHeader::prelogin(55));
        assert_eq!(decoded.options, options);
        let kinds: Vec<u8> = decoded.descriptors.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![0, 1, 2, 3, 4]);
        assert_eq!(decoded.descriptors[2].offset, 33);
        assert_eq!(decoded.descriptors[2].length, 9);
    }

    #[test]
    fn test_decode_empty() {
        let decoded = decode(&encoded(&OptionSet::new())).unwrap();
        assert!(decoded.descriptors.is_empty());
        assert!(decoded.options.is_empty());
    }

    #[test]
    fn test_decode_client_packet() {
        // Client PreLogin with version 0x0F000000 and encryption off.
        let packet = [
            0x12, 0x01, 0x00, 0x1A, 0x00, 0x00, 0x00, 0x00, // header
            0x00, 0x00, 0x0B, 0x00, 0x06, // VERSION
            0x01, 0x00, 0x11, 0x00, 0x01, // ENCRYPTION
            0xFF, // terminator
            0x0F, 0x00, 0x00, 0x00, 0x00, 0x00, // version
            0x00, // encryption off
        ];
        let decoded = decode(&packet).unwrap();
        assert_eq!(
            decoded.options.get(OptionKind::Version),
            Some(&[0x0F, 0, 0, 0, 0, 0][..])
        );
        assert_eq!(decoded.options.get(OptionKind::Encryption), Some(&[0x00][..]));
    }

    #[test]
    fn test_decode_rejects_short_buffer() {
        let err = decode(&[0x12, 0x01, 0x00]).unwrap_err();
        assert!(err.to_string().contains("shorter than a header"));
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let mut bytes = encoded(&OptionSet::server_defaults("teleport").unwrap());
        bytes.push(0);
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("header declares 55 bytes, packet has 56"));
    }

    #[test]
    fn test_decode_rejects_missing_terminator() {
        let bytes = [0x12, 0x01, 0x00, 0x0D, 0, 0, 0, 0, 0x00, 0x00, 0x06, 0x00, 0x00];
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("not terminated"));
    }

    #[test]
    fn test_decode_rejects_value_out_of_range() {
        let mut bytes = encoded(&OptionSet::server_defaults("teleport").unwrap());
        // Stretch MARS length past the end of the packet.
        bytes[8 + 4 * 5 + 4] = 2;
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("outside the value section"));
    }

    #[test]
    fn test_decode_rejects_duplicate_kind() {
        let bytes = [
            0x12, 0x01, 0x00, 0x14, 0, 0, 0, 0, //
            0x04, 0x00, 0x0B, 0x00, 0x01, //
            0x04, 0x00, 0x0B, 0x00, 0x01, //
            0xFF, 0x00,
        ];
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("appears twice"));
    }
}
