mod crc;

use thiserror::Error;

use super::{Header, SegmentType};

/// Largest datagram exchanged by two endpoints, header included.
pub const MTU: usize = 1472;

/// type(4) + seq(4) + checksum(4) + length(4)
pub const HEADER_SIZE: usize = 4 + 4 + crc::SIZE + 4;

/// Largest payload that fits in a single segment.
pub const MAX_CHUNK: usize = MTU - HEADER_SIZE;

/// Reasons a datagram cannot be parsed as a segment at all.
///
/// A checksum mismatch is not one of them: such a segment decodes fine and is rejected by
/// [`verify`].
#[derive(Error, Debug, Eq, PartialEq)]
pub enum MalformedSegment {
    #[error("datagram of {0} bytes is shorter than the segment header")]
    TooShort(usize),

    #[error("unknown segment type {0}")]
    UnknownType(u32),

    #[error("length field declares {declared} payload bytes, {actual} present")]
    LengthMismatch { declared: u32, actual: usize },
}

struct Reader<'a> {
    buffer: &'a [u8],
    bytes_read: usize,
}

impl<'a> Reader<'a> {
    fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            bytes_read: 0,
        }
    }

    // Callers check the buffer length up front
    fn read_u32(&mut self) -> u32 {
        let b = &self.buffer[self.bytes_read..self.bytes_read + 4];
        self.bytes_read += 4;
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    }

    fn remaining(&self) -> &'a [u8] {
        &self.buffer[self.bytes_read..]
    }
}

struct Writer {
    buffer: Vec<u8>,
}

impl Writer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    fn write_slice(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    fn finish(self) -> Vec<u8> {
        self.buffer
    }
}

/// CRC-32 of a payload, as carried in the header.
pub fn checksum(payload: &[u8]) -> u32 {
    crc::compute(payload)
}

/// Serializes `header` followed by `payload`. Header fields are written as given, big-endian.
pub fn encode(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut wr = Writer::with_capacity(HEADER_SIZE + payload.len());

    wr.write_u32(header.segment_type.to_u32());
    wr.write_u32(header.seq);
    wr.write_u32(header.checksum);
    wr.write_u32(header.length);
    wr.write_slice(payload);

    wr.finish()
}

/// Parses a datagram into its header and a view of its payload.
pub fn decode(bytes: &[u8]) -> Result<(Header, &[u8]), MalformedSegment> {
    if bytes.len() < HEADER_SIZE {
        return Err(MalformedSegment::TooShort(bytes.len()));
    }

    let rd = &mut Reader::new(bytes);

    let type_code = rd.read_u32();
    let seq = rd.read_u32();
    let checksum = rd.read_u32();
    let length = rd.read_u32();

    let segment_type =
        SegmentType::from_u32(type_code).ok_or(MalformedSegment::UnknownType(type_code))?;

    let payload = rd.remaining();

    if payload.len() != length as usize {
        return Err(MalformedSegment::LengthMismatch {
            declared: length,
            actual: payload.len(),
        });
    }

    let header = Header {
        segment_type,
        seq,
        checksum,
        length,
    };

    Ok((header, payload))
}

/// Returns true if the header checksum matches the payload.
pub fn verify(header: &Header, payload: &[u8]) -> bool {
    crc::compute(payload) == header.checksum
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(segment_type: SegmentType, seq: u32, payload: &[u8]) -> Header {
        Header {
            segment_type,
            seq,
            checksum: checksum(payload),
            length: payload.len() as u32,
        }
    }

    #[test]
    fn field_order_and_byte_order() {
        let payload = b"xy";
        let hdr = Header {
            segment_type: SegmentType::Ack,
            seq: 0x0102_0304,
            checksum: 0x0A0B_0C0D,
            length: 2,
        };

        let bytes = encode(&hdr, payload);

        assert_eq!(bytes.len(), HEADER_SIZE + 2);
        assert_eq!(&bytes[0..4], &[0, 0, 0, 3]);
        assert_eq!(&bytes[4..8], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[8..12], &[0x0A, 0x0B, 0x0C, 0x0D]);
        assert_eq!(&bytes[12..16], &[0, 0, 0, 2]);
        assert_eq!(&bytes[16..], payload);
    }

    #[test]
    fn decode_returns_header_and_payload() {
        let payload = [0xA5; 40];
        let hdr = header(SegmentType::Data, 1234, &payload);

        let bytes = encode(&hdr, &payload);
        let (decoded, decoded_payload) = decode(&bytes).unwrap();

        assert_eq!(decoded, hdr);
        assert_eq!(decoded_payload, &payload[..]);
        assert!(verify(&decoded, decoded_payload));
    }

    #[test]
    fn short_buffers_are_malformed() {
        assert_eq!(decode(&[]), Err(MalformedSegment::TooShort(0)));
        assert_eq!(
            decode(&[0; HEADER_SIZE - 1]),
            Err(MalformedSegment::TooShort(HEADER_SIZE - 1))
        );
    }

    #[test]
    fn header_only_buffer_decodes() {
        let hdr = header(SegmentType::Start, 5, &[]);
        let bytes = encode(&hdr, &[]);
        let (decoded, payload) = decode(&bytes).unwrap();

        assert_eq!(decoded.segment_type, SegmentType::Start);
        assert!(payload.is_empty());
    }

    #[test]
    fn unknown_type_is_malformed() {
        let mut bytes = encode(&header(SegmentType::Ack, 1, &[]), &[]);
        bytes[3] = 9;

        assert_eq!(decode(&bytes), Err(MalformedSegment::UnknownType(9)));
    }

    #[test]
    fn length_disagreement_is_malformed() {
        let mut bytes = encode(&header(SegmentType::Data, 1, b"abcd"), b"abcd");
        bytes.pop();

        assert_eq!(
            decode(&bytes),
            Err(MalformedSegment::LengthMismatch {
                declared: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn corrupted_payload_decodes_but_fails_verification() {
        let payload = b"the quick brown fox";
        let mut bytes = encode(&header(SegmentType::Data, 8, payload), payload);
        bytes[HEADER_SIZE + 4] ^= 0x01;

        let (decoded, decoded_payload) = decode(&bytes).unwrap();

        assert!(!verify(&decoded, decoded_payload));
    }

    #[test]
    fn corrupted_checksum_field_fails_verification() {
        let mut bytes = encode(&header(SegmentType::Ack, 8, &[]), &[]);
        bytes[11] ^= 0x80;

        let (decoded, payload) = decode(&bytes).unwrap();

        assert!(!verify(&decoded, payload));
    }

    #[test]
    fn max_chunk_fills_mtu() {
        let payload = vec![0u8; MAX_CHUNK];
        let bytes = encode(&header(SegmentType::Data, 0, &payload), &payload);

        assert_eq!(MAX_CHUNK, 1456);
        assert_eq!(bytes.len(), MTU);
    }
}
