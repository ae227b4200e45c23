pub mod serial;

pub use serial::{MalformedSegment, HEADER_SIZE, MAX_CHUNK, MTU};

/// Kind of a segment, carried in the first header field.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SegmentType {
    Start,
    End,
    Data,
    Ack,
    EndAck,
}

impl SegmentType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Start),
            1 => Some(Self::End),
            2 => Some(Self::Data),
            3 => Some(Self::Ack),
            4 => Some(Self::EndAck),
            _ => None,
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            Self::Start => 0,
            Self::End => 1,
            Self::Data => 2,
            Self::Ack => 3,
            Self::EndAck => 4,
        }
    }
}

/// Fixed-size segment header.
///
/// `checksum` and `length` describe the payload that travels with the header. They are filled in
/// by [`Segment::new`]; [`serial::encode`] writes whatever values the header holds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Header {
    pub segment_type: SegmentType,
    pub seq: u32,
    pub checksum: u32,
    pub length: u32,
}

/// A header together with its payload bytes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Segment {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Segment {
    /// Builds a segment whose checksum and length match `payload`.
    pub fn new(segment_type: SegmentType, seq: u32, payload: &[u8]) -> Self {
        debug_assert!(payload.len() <= MAX_CHUNK);

        Self {
            header: Header {
                segment_type,
                seq,
                checksum: serial::checksum(payload),
                length: payload.len() as u32,
            },
            payload: payload.to_vec(),
        }
    }

    /// Builds a payload-free segment (START, END, ACK, END_ACK).
    pub fn control(segment_type: SegmentType, seq: u32) -> Self {
        Self::new(segment_type, seq, &[])
    }

    pub fn segment_type(&self) -> SegmentType {
        self.header.segment_type
    }

    pub fn seq(&self) -> u32 {
        self.header.seq
    }

    /// Returns true if the checksum in the header matches the payload.
    pub fn is_intact(&self) -> bool {
        serial::verify(&self.header, &self.payload)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serial::encode(&self.header, &self.payload)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MalformedSegment> {
        let (header, payload) = serial::decode(bytes)?;

        Ok(Self {
            header,
            payload: payload.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_match_wire_values() {
        let types = [
            (SegmentType::Start, 0),
            (SegmentType::End, 1),
            (SegmentType::Data, 2),
            (SegmentType::Ack, 3),
            (SegmentType::EndAck, 4),
        ];

        for (segment_type, code) in types {
            assert_eq!(segment_type.to_u32(), code);
            assert_eq!(SegmentType::from_u32(code), Some(segment_type));
        }

        assert_eq!(SegmentType::from_u32(5), None);
        assert_eq!(SegmentType::from_u32(u32::MAX), None);
    }

    #[test]
    fn new_fills_length_and_checksum() {
        let segment = Segment::new(SegmentType::Data, 7, b"payload");

        assert_eq!(segment.header.length, 7);
        assert_eq!(segment.header.checksum, crc32fast::hash(b"payload"));
        assert!(segment.is_intact());
    }

    #[test]
    fn control_segments_are_empty() {
        let segment = Segment::control(SegmentType::EndAck, 99);

        assert_eq!(segment.header.length, 0);
        assert!(segment.payload.is_empty());
        assert!(segment.is_intact());
    }

    #[test]
    fn tampered_payload_is_not_intact() {
        let mut segment = Segment::new(SegmentType::Data, 1, b"abcdef");
        segment.payload[2] ^= 0x10;

        assert!(!segment.is_intact());
    }

    #[test]
    fn bytes_survive_the_wire() {
        let segment = Segment::new(SegmentType::Data, 0xDEAD_BEEF, &[0x5A; 300]);
        let decoded = Segment::from_bytes(&segment.to_bytes()).unwrap();

        assert_eq!(decoded, segment);
    }
}
