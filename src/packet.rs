//! 패킷 코덱
//!
//! 프레임 = 3바이트 빅엔디언 헤더 + MessagePack 페이로드
//!
//! ```text
//!  bit 23      bits 22..15       bits 14..0
//! +------+------------------+-----------------+
//! | kind |   payload_len    |    sequence     |
//! +------+------------------+-----------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use rmpv::Value;

use crate::{Error, Result, HEADER_LEN, MAX_PAYLOAD_LEN, MAX_SEQUENCE, SENTINEL_SEQUENCE};

const KIND_SHIFT: u32 = 23;
const LEN_SHIFT: u32 = 15;
const LEN_MASK: u32 = 0xFF;
const SEQUENCE_MASK: u32 = MAX_SEQUENCE as u32;

/// 패킷 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    /// 데이터 (청크, 청크 수 등)
    Data = 0,

    /// 명령 (수신 측이 ACK 응답)
    Command = 1,
}

impl PacketKind {
    fn from_bit(bit: u32) -> Self {
        if bit & 1 == 1 {
            PacketKind::Command
        } else {
            PacketKind::Data
        }
    }
}

/// 패킷 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub kind: PacketKind,
    pub payload_len: u8,
    pub sequence: u16,
}

impl PacketHeader {
    /// 헤더 생성 (범위 검증 포함)
    pub fn new(kind: PacketKind, payload_len: usize, sequence: u16) -> Result<Self> {
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(Error::PayloadTooLarge {
                len: payload_len,
                max: MAX_PAYLOAD_LEN,
            });
        }
        if sequence > MAX_SEQUENCE {
            return Err(Error::SequenceOutOfRange {
                sequence: sequence as u32,
                max: MAX_SEQUENCE,
            });
        }
        Ok(Self {
            kind,
            payload_len: payload_len as u8,
            sequence,
        })
    }

    /// 24비트 헤더를 빅엔디언 3바이트로 패킹
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let packed = (self.kind as u32) << KIND_SHIFT
            | (self.payload_len as u32) << LEN_SHIFT
            | self.sequence as u32 & SEQUENCE_MASK;
        let be = packed.to_be_bytes();
        [be[1], be[2], be[3]]
    }

    /// 프레임 앞 3바이트에서 헤더 복원 (I/O 없음)
    pub fn decode(frame: &[u8]) -> Result<Self> {
        if frame.len() < HEADER_LEN {
            return Err(Error::TruncatedHeader { len: frame.len() });
        }
        let packed = u32::from_be_bytes([0, frame[0], frame[1], frame[2]]);
        Ok(Self {
            kind: PacketKind::from_bit(packed >> KIND_SHIFT),
            payload_len: ((packed >> LEN_SHIFT) & LEN_MASK) as u8,
            sequence: (packed & SEQUENCE_MASK) as u16,
        })
    }

    /// 헤더 포함 프레임 길이
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.payload_len as usize
    }
}

/// 디코딩된 패킷
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub kind: PacketKind,
    pub sequence: u16,
    pub payload: Value,
}

impl Packet {
    pub fn data(payload: Value, sequence: u16) -> Self {
        Self {
            kind: PacketKind::Data,
            sequence,
            payload,
        }
    }

    pub fn command(payload: Value) -> Self {
        Self {
            kind: PacketKind::Command,
            sequence: SENTINEL_SEQUENCE,
            payload,
        }
    }

    /// 프레임으로 인코딩
    pub fn encode(&self) -> Result<Bytes> {
        encode(self.kind, &self.payload, self.sequence)
    }

    /// 순서 없는 제어 패킷 여부
    pub fn is_control(&self) -> bool {
        self.sequence == SENTINEL_SEQUENCE
    }

    /// 바이너리 페이로드 (청크 데이터)
    pub fn binary(&self) -> Option<&[u8]> {
        match &self.payload {
            Value::Binary(bytes) => Some(bytes.as_slice()),
            _ => None,
        }
    }
}

/// 페이로드를 MessagePack으로 직렬화
pub fn encode_payload(payload: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, payload).map_err(|e| Error::Encode(e.to_string()))?;
    Ok(buf)
}

/// MessagePack 페이로드 역직렬화
///
/// 값 하나를 읽고 남는 바이트가 있으면 손상된 것으로 간주
pub fn decode_payload(bytes: &[u8]) -> Result<Value> {
    let mut cursor = bytes;
    let value = rmpv::decode::read_value(&mut cursor).map_err(|e| Error::Decode(e.to_string()))?;
    if !cursor.is_empty() {
        return Err(Error::Decode(format!(
            "{} bytes trailing after payload",
            cursor.len()
        )));
    }
    Ok(value)
}

/// 헤더 + 페이로드 프레임 생성
///
/// 실패 시 프레임을 만들지 않음
pub fn encode(kind: PacketKind, payload: &Value, sequence: u16) -> Result<Bytes> {
    let body = encode_payload(payload)?;
    let header = PacketHeader::new(kind, body.len(), sequence)?;

    let mut frame = BytesMut::with_capacity(header.frame_len());
    frame.put_slice(&header.to_bytes());
    frame.put_slice(&body);
    Ok(frame.freeze())
}

/// 프레임 헤더 디코딩
pub fn decode(frame: &[u8]) -> Result<PacketHeader> {
    PacketHeader::decode(frame)
}

/// 프레임 CRC32 (패킷 추적용)
pub fn checksum(frame: &[u8]) -> u32 {
    crc32fast::hash(frame)
}
