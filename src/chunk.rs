//! 송신 메시지와 수신 재조립 버퍼
//!
//! - OutboundMessage: 전체 페이로드 + 커서, 한 번에 청크 하나씩 생성
//! - ReassemblyBuffer: (sender, message_id) 하나에 대한 청크 조립

use std::time::Instant;

use bytes::Bytes;

use crate::message::{encode_chunk, ChunkHeader, ComponentId, Distribution, MessageId};
use crate::transport::Target;
use crate::{Error, Result};

/// 송신 대기 메시지 (송신측 청크 분할기)
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// 대상 (피어 또는 세션 전체)
    pub target: Target,

    /// 메시지 ID
    pub message_id: MessageId,

    /// 컴포넌트 ID
    pub component_id: ComponentId,

    /// 전체 페이로드 (변경되지 않음)
    payload: Bytes,

    /// 청크당 최대 페이로드
    max_chunk_payload: usize,

    /// 총 청크 수 (>= 1)
    chunk_count: u32,

    /// 다음에 보낼 청크 인덱스
    cursor: u32,

    /// 생성 시간
    pub created_at: Instant,
}

impl OutboundMessage {
    /// 새 메시지 생성
    pub fn new(
        target: Target,
        message_id: MessageId,
        component_id: ComponentId,
        payload: Bytes,
        max_chunk_payload: usize,
    ) -> Result<Self> {
        if payload.is_empty() {
            return Err(Error::EmptyPayload);
        }
        if max_chunk_payload == 0 {
            return Err(Error::InvalidConfig("max_chunk_payload must be non-zero"));
        }

        let chunk_count = u32::try_from(payload.len().div_ceil(max_chunk_payload))
            .map_err(|_| Error::MessageTooLarge { len: payload.len() })?;

        Ok(Self {
            target,
            message_id,
            component_id,
            payload,
            max_chunk_payload,
            chunk_count,
            cursor: 0,
            created_at: Instant::now(),
        })
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// 모든 청크 전송 완료 여부
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.chunk_count
    }

    pub fn distribution(&self) -> Distribution {
        match self.target {
            Target::Broadcast => Distribution::Broadcast,
            Target::Peer(_) => Distribution::UniquePeer,
        }
    }

    /// 현재 커서의 페이로드 범위
    fn current_range(&self) -> std::ops::Range<usize> {
        let start = self.cursor as usize * self.max_chunk_payload;
        let end = (start + self.max_chunk_payload).min(self.payload.len());
        start..end
    }

    /// 현재 청크 (헤더 + 페이로드)
    ///
    /// 상태를 바꾸지 않으므로 전송 실패 시 같은 청크를 다시 얻을 수 있음.
    /// 소진된 메시지에서는 빈 `Bytes`를 반환.
    pub fn current_chunk_bytes(&self) -> Bytes {
        if self.is_exhausted() {
            return Bytes::new();
        }

        let header = ChunkHeader {
            distribution: self.distribution(),
            message_id: self.message_id,
            component_id: self.component_id,
            chunk_count: self.chunk_count,
            chunk_index: self.cursor,
        };
        encode_chunk(&header, &self.payload[self.current_range()])
    }

    /// 커서 전진. 남은 청크가 있으면 true
    ///
    /// 현재 청크가 전송 계층에 넘어간 뒤에만 호출해야 함.
    pub fn advance(&mut self) -> bool {
        if self.cursor < self.chunk_count {
            self.cursor += 1;
        }
        !self.is_exhausted()
    }
}

/// 청크 추가 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// 이번 청크로 메시지 완성 (버퍼당 한 번만 반환)
    Completed,

    /// 아직 청크가 남음
    Incomplete,
}

/// 수신 재조립 버퍼
#[derive(Debug)]
pub struct ReassemblyBuffer {
    /// 첫 청크에서 정해진 컴포넌트 ID
    component_id: ComponentId,

    /// 총 청크 수
    chunk_count: u32,

    /// 청크당 최대 페이로드 (오프셋 계산용)
    max_chunk_payload: usize,

    /// chunk_count * max_chunk_payload 크기의 버퍼
    data: Vec<u8>,

    /// 수신된 청크 비트맵
    received: Vec<bool>,

    /// 수신된 청크 수
    received_count: u32,

    /// 마지막 청크 수신 후 확정되는 실제 길이
    final_length: Option<usize>,

    /// 생성 시간
    pub created_at: Instant,

    /// 마지막 청크 수신 시간
    pub last_activity: Instant,
}

impl ReassemblyBuffer {
    /// 첫 청크 헤더로 버퍼 생성
    pub fn new(
        header: &ChunkHeader,
        max_chunk_payload: usize,
        max_size: Option<usize>,
    ) -> Result<Self> {
        if header.chunk_count == 0 {
            return Err(Error::ZeroChunkCount);
        }

        let size = (header.chunk_count as usize)
            .checked_mul(max_chunk_payload)
            .ok_or(Error::ReassemblyTooLarge {
                size: usize::MAX,
                max: max_size.unwrap_or(usize::MAX),
            })?;
        if let Some(max) = max_size {
            if size > max {
                return Err(Error::ReassemblyTooLarge { size, max });
            }
        }

        // 헤더 값은 원격에서 오므로 할당 실패도 에러로 돌려줌
        let too_large = || Error::ReassemblyTooLarge {
            size,
            max: max_size.unwrap_or(usize::MAX),
        };
        let mut data: Vec<u8> = Vec::new();
        data.try_reserve_exact(size).map_err(|_| too_large())?;
        data.resize(size, 0);

        let mut received: Vec<bool> = Vec::new();
        received
            .try_reserve_exact(header.chunk_count as usize)
            .map_err(|_| too_large())?;
        received.resize(header.chunk_count as usize, false);

        let now = Instant::now();
        Ok(Self {
            component_id: header.component_id,
            chunk_count: header.chunk_count,
            max_chunk_payload,
            data,
            received,
            received_count: 0,
            final_length: None,
            created_at: now,
            last_activity: now,
        })
    }

    pub fn component_id(&self) -> ComponentId {
        self.component_id
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    pub fn received_chunks(&self) -> u32 {
        self.received_count
    }

    /// 청크 추가
    ///
    /// 거부된 청크는 버퍼를 전혀 변경하지 않음.
    pub fn add_chunk(&mut self, header: &ChunkHeader, payload: &[u8]) -> Result<ChunkOutcome> {
        if header.chunk_count == 0 {
            return Err(Error::ZeroChunkCount);
        }
        if header.chunk_index >= header.chunk_count {
            return Err(Error::InvalidChunkIndex {
                chunk_index: header.chunk_index,
                chunk_count: header.chunk_count,
            });
        }
        if header.component_id != self.component_id {
            return Err(Error::ComponentMismatch {
                expected: self.component_id,
                got: header.component_id,
            });
        }
        if header.chunk_count != self.chunk_count {
            return Err(Error::ChunkCountMismatch {
                expected: self.chunk_count,
                got: header.chunk_count,
            });
        }

        let index = header.chunk_index as usize;
        if self.received[index] {
            return Err(Error::DuplicateChunk {
                chunk_index: header.chunk_index,
            });
        }

        // 마지막 청크만 짧을 수 있음
        let valid_len = if header.is_last() {
            !payload.is_empty() && payload.len() <= self.max_chunk_payload
        } else {
            payload.len() == self.max_chunk_payload
        };
        if !valid_len {
            return Err(Error::InvalidChunkLength {
                chunk_index: header.chunk_index,
                len: payload.len(),
            });
        }

        let offset = index * self.max_chunk_payload;
        self.data[offset..offset + payload.len()].copy_from_slice(payload);
        self.received[index] = true;
        self.received_count += 1;
        self.last_activity = Instant::now();

        if header.is_last() {
            self.final_length = Some(offset + payload.len());
        }

        if self.is_complete() {
            Ok(ChunkOutcome::Completed)
        } else {
            Ok(ChunkOutcome::Incomplete)
        }
    }

    /// 완료 여부
    pub fn is_complete(&self) -> bool {
        self.received_count == self.chunk_count
    }

    /// 완성된 바이트 (완료 전에는 None)
    pub fn final_bytes(&self) -> Option<&[u8]> {
        match self.final_length {
            Some(len) if self.is_complete() => Some(&self.data[..len]),
            _ => None,
        }
    }

    /// 완성된 데이터 추출
    pub fn into_bytes(mut self) -> Option<Bytes> {
        let len = self.final_length.filter(|_| self.is_complete())?;
        self.data.truncate(len);
        Some(Bytes::from(self.data))
    }

    /// 수신률
    pub fn receive_ratio(&self) -> f64 {
        self.received_count as f64 / self.chunk_count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Packet, CHUNK_HEADER_LEN};
    use rand::seq::SliceRandom;
    use rand::Rng;

    /// 메시지를 모든 청크로 분해
    fn split(message: &mut OutboundMessage) -> Vec<(ChunkHeader, Bytes)> {
        let mut chunks = Vec::new();
        loop {
            match Packet::decode(message.current_chunk_bytes()).unwrap() {
                Packet::Chunk { header, payload } => chunks.push((header, payload)),
                Packet::Acknowledgement => panic!("unexpected ack"),
            }
            if !message.advance() {
                break;
            }
        }
        chunks
    }

    fn message(len: usize, max_chunk_payload: usize) -> OutboundMessage {
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        OutboundMessage::new(Target::Peer(9), 1, 5, Bytes::from(payload), max_chunk_payload)
            .unwrap()
    }

    #[test]
    fn single_chunk_message() {
        let mut msg = message(10, 100);
        assert_eq!(msg.chunk_count(), 1);

        let chunks = split(&mut msg);
        assert_eq!(chunks.len(), 1);

        let (header, payload) = &chunks[0];
        let mut buffer = ReassemblyBuffer::new(header, 100, None).unwrap();
        assert_eq!(buffer.add_chunk(header, payload).unwrap(), ChunkOutcome::Completed);
        assert_eq!(buffer.final_bytes().unwrap(), msg.payload().as_ref());
    }

    #[test]
    fn exact_multiple() {
        let mut msg = message(200, 100);
        assert_eq!(msg.chunk_count(), 2);

        let sizes: Vec<usize> = split(&mut msg).iter().map(|(_, p)| p.len()).collect();
        assert_eq!(sizes, vec![100, 100]);
    }

    #[test]
    fn remainder() {
        let mut msg = message(250, 100);
        assert_eq!(msg.chunk_count(), 3);

        let sizes: Vec<usize> = split(&mut msg).iter().map(|(_, p)| p.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
    }

    #[test]
    fn empty_payload_is_rejected() {
        assert!(matches!(
            OutboundMessage::new(Target::Broadcast, 1, 1, Bytes::new(), 100),
            Err(Error::EmptyPayload)
        ));
    }

    #[test]
    fn current_chunk_is_stable_until_advance() {
        let mut msg = message(250, 100);
        let first = msg.current_chunk_bytes();
        assert_eq!(first, msg.current_chunk_bytes());
        assert_eq!(first.len(), CHUNK_HEADER_LEN + 100);

        assert!(msg.advance());
        assert_ne!(first, msg.current_chunk_bytes());
        assert!(msg.advance());
        assert!(!msg.advance());
        assert!(msg.is_exhausted());
        assert!(msg.current_chunk_bytes().is_empty());
    }

    #[test]
    fn distribution_follows_target() {
        let broadcast =
            OutboundMessage::new(Target::Broadcast, 1, 1, Bytes::from_static(b"x"), 8).unwrap();
        assert_eq!(broadcast.distribution(), Distribution::Broadcast);
        assert_eq!(message(1, 8).distribution(), Distribution::UniquePeer);
    }

    #[test]
    fn any_order_with_duplicates_reassembles() {
        let mut rng = rand::thread_rng();

        for _ in 0..50 {
            let len = rng.gen_range(1..2000);
            let max = rng.gen_range(1..300);
            let mut msg = message(len, max);
            let mut chunks = split(&mut msg);

            // 임의 중복 추가 후 섞기
            let extra: Vec<_> = chunks
                .iter()
                .filter(|_| rng.gen_bool(0.3))
                .cloned()
                .collect();
            chunks.extend(extra);
            chunks.shuffle(&mut rng);

            let mut buffer = ReassemblyBuffer::new(&chunks[0].0, max, None).unwrap();
            let mut completed = 0;
            for (header, payload) in &chunks {
                match buffer.add_chunk(header, payload) {
                    Ok(ChunkOutcome::Completed) => completed += 1,
                    Ok(ChunkOutcome::Incomplete) => {}
                    Err(Error::DuplicateChunk { .. }) => {}
                    Err(e) => panic!("unexpected rejection: {}", e),
                }
            }

            assert_eq!(completed, 1);
            assert!(buffer.is_complete());
            assert_eq!(buffer.final_bytes().unwrap(), msg.payload().as_ref());
        }
    }

    #[test]
    fn duplicate_does_not_change_state() {
        let mut msg = message(250, 100);
        let chunks = split(&mut msg);
        let mut buffer = ReassemblyBuffer::new(&chunks[0].0, 100, None).unwrap();

        buffer.add_chunk(&chunks[0].0, &chunks[0].1).unwrap();
        assert_eq!(buffer.received_chunks(), 1);

        // 같은 인덱스, 다른 내용
        let forged = vec![0xFFu8; 100];
        assert!(matches!(
            buffer.add_chunk(&chunks[0].0, &forged),
            Err(Error::DuplicateChunk { chunk_index: 0 })
        ));
        assert_eq!(buffer.received_chunks(), 1);

        buffer.add_chunk(&chunks[1].0, &chunks[1].1).unwrap();
        buffer.add_chunk(&chunks[2].0, &chunks[2].1).unwrap();
        assert_eq!(buffer.into_bytes().unwrap(), *msg.payload());
    }

    #[test]
    fn mismatched_header_is_rejected_without_mutation() {
        let mut msg = message(250, 100);
        let chunks = split(&mut msg);
        let mut buffer = ReassemblyBuffer::new(&chunks[0].0, 100, None).unwrap();
        buffer.add_chunk(&chunks[0].0, &chunks[0].1).unwrap();

        let other_component = ChunkHeader {
            component_id: 99,
            ..chunks[1].0
        };
        assert!(matches!(
            buffer.add_chunk(&other_component, &chunks[1].1),
            Err(Error::ComponentMismatch { expected: 5, got: 99 })
        ));

        let other_count = ChunkHeader {
            chunk_count: 4,
            ..chunks[1].0
        };
        assert!(matches!(
            buffer.add_chunk(&other_count, &chunks[1].1),
            Err(Error::ChunkCountMismatch { expected: 3, got: 4 })
        ));

        assert_eq!(buffer.received_chunks(), 1);

        // 올바른 청크는 여전히 받아들임
        buffer.add_chunk(&chunks[1].0, &chunks[1].1).unwrap();
        assert_eq!(
            buffer.add_chunk(&chunks[2].0, &chunks[2].1).unwrap(),
            ChunkOutcome::Completed
        );
        assert_eq!(buffer.final_bytes().unwrap(), msg.payload().as_ref());
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let header = ChunkHeader {
            distribution: Distribution::Broadcast,
            message_id: 1,
            component_id: 1,
            chunk_count: 2,
            chunk_index: 2,
        };
        let mut buffer = ReassemblyBuffer::new(&header, 10, None).unwrap();
        assert!(matches!(
            buffer.add_chunk(&header, &[0u8; 10]),
            Err(Error::InvalidChunkIndex { chunk_index: 2, chunk_count: 2 })
        ));
        assert_eq!(buffer.received_chunks(), 0);
    }

    #[test]
    fn zero_chunk_count_is_rejected() {
        let header = ChunkHeader {
            distribution: Distribution::Broadcast,
            message_id: 1,
            component_id: 1,
            chunk_count: 0,
            chunk_index: 0,
        };
        assert!(matches!(
            ReassemblyBuffer::new(&header, 10, None),
            Err(Error::ZeroChunkCount)
        ));
    }

    #[test]
    fn inconsistent_chunk_length_is_rejected() {
        let header = ChunkHeader {
            distribution: Distribution::UniquePeer,
            message_id: 1,
            component_id: 1,
            chunk_count: 2,
            chunk_index: 0,
        };
        let mut buffer = ReassemblyBuffer::new(&header, 10, None).unwrap();

        // 마지막이 아닌 청크는 정확히 max_chunk_payload
        assert!(matches!(
            buffer.add_chunk(&header, &[0u8; 9]),
            Err(Error::InvalidChunkLength { chunk_index: 0, len: 9 })
        ));

        let last = ChunkHeader {
            chunk_index: 1,
            ..header
        };
        assert!(buffer.add_chunk(&last, &[0u8; 11]).is_err());
        assert!(buffer.add_chunk(&last, &[]).is_err());
        assert_eq!(buffer.received_chunks(), 0);
    }

    #[test]
    fn reassembly_size_limit() {
        let header = ChunkHeader {
            distribution: Distribution::Broadcast,
            message_id: 1,
            component_id: 1,
            chunk_count: 1000,
            chunk_index: 0,
        };
        assert!(matches!(
            ReassemblyBuffer::new(&header, 1024, Some(1024 * 1024)),
            Err(Error::ReassemblyTooLarge { .. })
        ));
        assert!(ReassemblyBuffer::new(&header, 1024, Some(1024 * 1000)).is_ok());
    }

    #[test]
    fn impossible_allocation_is_an_error() {
        // 곱은 usize에 들어가지만 할당 가능한 크기를 넘음
        let header = ChunkHeader {
            distribution: Distribution::UniquePeer,
            message_id: 1,
            component_id: 1,
            chunk_count: 4,
            chunk_index: 0,
        };
        assert!(matches!(
            ReassemblyBuffer::new(&header, usize::MAX / 4, None),
            Err(Error::ReassemblyTooLarge { .. })
        ));

        let header = ChunkHeader {
            chunk_count: u32::MAX,
            ..header
        };
        assert!(matches!(
            ReassemblyBuffer::new(&header, usize::MAX / 2, None),
            Err(Error::ReassemblyTooLarge { .. })
        ));
    }

    #[test]
    fn final_bytes_unavailable_until_complete() {
        let mut msg = message(150, 100);
        let chunks = split(&mut msg);
        let mut buffer = ReassemblyBuffer::new(&chunks[1].0, 100, None).unwrap();

        // 마지막 청크를 먼저 받아도 완료 전에는 None
        buffer.add_chunk(&chunks[1].0, &chunks[1].1).unwrap();
        assert!(buffer.final_bytes().is_none());
        assert_eq!(buffer.receive_ratio(), 0.5);

        buffer.add_chunk(&chunks[0].0, &chunks[0].1).unwrap();
        assert_eq!(buffer.final_bytes().unwrap().len(), 150);
    }
}
