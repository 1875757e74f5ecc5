//! 와이어 포맷 정의
//!
//! reliable 채널 패킷 (모든 필드 u32 little-endian):
//!
//! ```text
//! MESSAGE_CHUNK   : version | purpose | distribution | message_id | component_id | chunk_count | chunk_index | payload...
//! ACKNOWLEDGEMENT : version | purpose
//! ```
//!
//! best-effort 데이터그램: `component_id (u32 LE) | payload...`

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result, PROTOCOL_VERSION};

/// 메시지 ID (송신자 로컬 카운터)
pub type MessageId = u32;

/// 컴포넌트 ID (애플리케이션 라우팅 태그)
pub type ComponentId = u32;

/// 버전 + 용도 필드 길이
pub const PREAMBLE_LEN: usize = 8;

/// 청크 헤더 길이
pub const CHUNK_HEADER_LEN: usize = 28;

/// ACK 패킷 길이
pub const ACK_LEN: usize = PREAMBLE_LEN;

/// 데이터그램 접두사 길이
pub const DATAGRAM_HEADER_LEN: usize = 4;

/// 패킷 용도
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Purpose {
    /// 메시지 청크
    MessageChunk = 1,

    /// 흐름 제어 ACK
    Acknowledgement = 2,
}

impl TryFrom<u32> for Purpose {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1 => Ok(Purpose::MessageChunk),
            2 => Ok(Purpose::Acknowledgement),
            other => Err(Error::UnknownPurpose(other)),
        }
    }
}

/// 청크 배포 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Distribution {
    /// 세션 전체
    Broadcast = 1,

    /// 단일 피어 (수신측이 ACK 응답)
    UniquePeer = 2,
}

impl TryFrom<u32> for Distribution {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1 => Ok(Distribution::Broadcast),
            2 => Ok(Distribution::UniquePeer),
            other => Err(Error::UnknownDistribution(other)),
        }
    }
}

/// 청크 헤더 (version, purpose는 인코딩 시 고정)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub distribution: Distribution,
    pub message_id: MessageId,
    pub component_id: ComponentId,
    pub chunk_count: u32,
    pub chunk_index: u32,
}

impl ChunkHeader {
    /// 헤더 기록
    pub fn put(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(PROTOCOL_VERSION);
        buf.put_u32_le(Purpose::MessageChunk as u32);
        buf.put_u32_le(self.distribution as u32);
        buf.put_u32_le(self.message_id);
        buf.put_u32_le(self.component_id);
        buf.put_u32_le(self.chunk_count);
        buf.put_u32_le(self.chunk_index);
    }

    /// 마지막 청크 여부
    pub fn is_last(&self) -> bool {
        self.chunk_index.checked_add(1) == Some(self.chunk_count)
    }
}

/// 헤더 + 페이로드를 한 패킷으로 인코딩
pub fn encode_chunk(header: &ChunkHeader, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(CHUNK_HEADER_LEN + payload.len());
    header.put(&mut buf);
    buf.put_slice(payload);
    buf.freeze()
}

/// ACK 패킷 인코딩
pub fn encode_ack() -> Bytes {
    let mut buf = BytesMut::with_capacity(ACK_LEN);
    buf.put_u32_le(PROTOCOL_VERSION);
    buf.put_u32_le(Purpose::Acknowledgement as u32);
    buf.freeze()
}

/// reliable 채널에서 읽은 패킷
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Chunk { header: ChunkHeader, payload: Bytes },
    Acknowledgement,
}

impl Packet {
    /// 패킷 디코딩
    ///
    /// 길이는 읽기 전에 검사하므로 잘린 패킷은 `ShortPacket`으로 거부됨.
    pub fn decode(bytes: Bytes) -> Result<Packet> {
        if bytes.len() < PREAMBLE_LEN {
            return Err(Error::ShortPacket {
                len: bytes.len(),
                need: PREAMBLE_LEN,
            });
        }

        let mut buf = &bytes[..];
        let version = buf.get_u32_le();
        if version != PROTOCOL_VERSION {
            return Err(Error::InvalidVersion {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }

        match Purpose::try_from(buf.get_u32_le())? {
            Purpose::Acknowledgement => Ok(Packet::Acknowledgement),
            Purpose::MessageChunk => {
                if bytes.len() < CHUNK_HEADER_LEN {
                    return Err(Error::ShortPacket {
                        len: bytes.len(),
                        need: CHUNK_HEADER_LEN,
                    });
                }

                let header = ChunkHeader {
                    distribution: Distribution::try_from(buf.get_u32_le())?,
                    message_id: buf.get_u32_le(),
                    component_id: buf.get_u32_le(),
                    chunk_count: buf.get_u32_le(),
                    chunk_index: buf.get_u32_le(),
                };

                Ok(Packet::Chunk {
                    header,
                    payload: bytes.slice(CHUNK_HEADER_LEN..),
                })
            }
        }
    }
}

/// best-effort 데이터그램
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub component_id: ComponentId,
    pub payload: Bytes,
}

impl Datagram {
    /// 인코딩 (전체 크기가 `limit`을 넘으면 거부)
    pub fn encode(component_id: ComponentId, payload: &[u8], limit: usize) -> Result<Bytes> {
        let size = DATAGRAM_HEADER_LEN + payload.len();
        if size > limit {
            return Err(Error::DatagramTooLarge { size, max: limit });
        }

        let mut buf = BytesMut::with_capacity(size);
        buf.put_u32_le(component_id);
        buf.put_slice(payload);
        Ok(buf.freeze())
    }

    /// 디코딩 (4바이트 미만은 거부)
    pub fn decode(bytes: Bytes) -> Result<Datagram> {
        if bytes.len() < DATAGRAM_HEADER_LEN {
            return Err(Error::ShortPacket {
                len: bytes.len(),
                need: DATAGRAM_HEADER_LEN,
            });
        }

        let component_id = (&bytes[..DATAGRAM_HEADER_LEN]).get_u32_le();
        Ok(Datagram {
            component_id,
            payload: bytes.slice(DATAGRAM_HEADER_LEN..),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> ChunkHeader {
        ChunkHeader {
            distribution: Distribution::UniquePeer,
            message_id: 7,
            component_id: 42,
            chunk_count: 3,
            chunk_index: 1,
        }
    }

    #[test]
    fn chunk_layout_is_fixed() {
        let bytes = encode_chunk(&sample_header(), &[0xAA, 0xBB]);

        assert_eq!(bytes.len(), CHUNK_HEADER_LEN + 2);
        assert_eq!(&bytes[0..4], &PROTOCOL_VERSION.to_le_bytes());
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &2u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &7u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &42u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &3u32.to_le_bytes());
        assert_eq!(&bytes[24..28], &1u32.to_le_bytes());
        assert_eq!(&bytes[28..], &[0xAA, 0xBB]);
    }

    #[test]
    fn chunk_decodes() {
        let bytes = encode_chunk(&sample_header(), b"hello");
        match Packet::decode(bytes).unwrap() {
            Packet::Chunk { header, payload } => {
                assert_eq!(header, sample_header());
                assert_eq!(payload.as_ref(), b"hello");
            }
            other => panic!("expected chunk, got {:?}", other),
        }
    }

    #[test]
    fn ack_is_two_fields() {
        let bytes = encode_ack();
        assert_eq!(bytes.len(), ACK_LEN);
        assert_eq!(Packet::decode(bytes).unwrap(), Packet::Acknowledgement);
    }

    #[test]
    fn short_packets_are_rejected() {
        assert!(matches!(
            Packet::decode(Bytes::from_static(&[1, 0, 0])),
            Err(Error::ShortPacket { len: 3, need: PREAMBLE_LEN })
        ));

        // 용도는 청크인데 헤더가 잘림
        let truncated = encode_chunk(&sample_header(), b"").slice(..20);
        assert!(matches!(
            Packet::decode(truncated),
            Err(Error::ShortPacket { len: 20, need: CHUNK_HEADER_LEN })
        ));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(PROTOCOL_VERSION + 1);
        buf.put_u32_le(Purpose::Acknowledgement as u32);

        assert!(matches!(
            Packet::decode(buf.freeze()),
            Err(Error::InvalidVersion { .. })
        ));
    }

    #[test]
    fn unknown_purpose_and_distribution_are_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(PROTOCOL_VERSION);
        buf.put_u32_le(9);
        assert!(matches!(
            Packet::decode(buf.freeze()),
            Err(Error::UnknownPurpose(9))
        ));

        let mut bytes = encode_chunk(&sample_header(), b"x").to_vec();
        bytes[8..12].copy_from_slice(&5u32.to_le_bytes());
        assert!(matches!(
            Packet::decode(Bytes::from(bytes)),
            Err(Error::UnknownDistribution(5))
        ));
    }

    #[test]
    fn datagram_respects_limit() {
        let payload = vec![0u8; 1196];
        let bytes = Datagram::encode(3, &payload, 1200).unwrap();
        assert_eq!(bytes.len(), 1200);

        let too_big = vec![0u8; 1197];
        assert!(matches!(
            Datagram::encode(3, &too_big, 1200),
            Err(Error::DatagramTooLarge { size: 1201, max: 1200 })
        ));
    }

    #[test]
    fn datagram_strips_component_prefix() {
        let bytes = Datagram::encode(0xDEAD_BEEF, b"ping", 1200).unwrap();
        let datagram = Datagram::decode(bytes).unwrap();
        assert_eq!(datagram.component_id, 0xDEAD_BEEF);
        assert_eq!(datagram.payload.as_ref(), b"ping");
    }

    #[test]
    fn short_datagram_is_rejected() {
        assert!(Datagram::decode(Bytes::from_static(&[1, 2, 3])).is_err());
        // 접두사만 있는 데이터그램은 빈 페이로드로 유효
        let empty = Datagram::decode(Bytes::from_static(&[1, 0, 0, 0])).unwrap();
        assert_eq!(empty.component_id, 1);
        assert!(empty.payload.is_empty());
    }
}
