//! 프로토콜 설정

use std::time::Duration;

use crate::message::DATAGRAM_HEADER_LEN;
use crate::{Error, Result, DEFAULT_MAX_CHUNK_PAYLOAD, UNRELIABLE_PACKET_LIMIT};

/// chunkline 설정
///
/// 송신측과 수신측은 같은 `max_chunk_payload`를 사용해야 함.
/// 수신측은 청크 오프셋을 `chunk_index * max_chunk_payload`로 계산함.
#[derive(Debug, Clone)]
pub struct Config {
    /// 청크당 최대 페이로드 (바이트, 헤더 제외)
    pub max_chunk_payload: usize,

    /// best-effort 데이터그램 최대 크기 (컴포넌트 접두사 포함)
    pub unreliable_packet_limit: usize,

    /// 피어별 동시 전송 중 메시지 상한
    pub max_pending_messages: u32,

    /// 브로드캐스트 전송 속도 (bytes/sec)
    pub broadcast_bytes_per_second: u64,

    /// 로컬 전송 실패 재시도 허용 시간
    pub send_retry_window: Duration,

    /// 전송 실패 후 재시도 전 대기
    pub retry_backoff: Duration,

    /// 할 일이 없을 때 대기
    pub idle_sleep: Duration,

    /// 수신 메시지 하나의 최대 버퍼 크기 (None이면 제한 없음)
    ///
    /// 버퍼는 첫 청크의 `chunk_count`로 미리 할당되므로 원격 피어가 크기를 정함.
    /// 제한을 끄면 헤더 하나로 큰 할당을 유발할 수 있음.
    pub max_reassembly_size: Option<usize>,

    /// 미완성 재조립 버퍼 만료 시간 (None이면 만료 없음)
    pub reassembly_timeout: Option<Duration>,

    /// 전송 이벤트 채널 크기
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_chunk_payload: DEFAULT_MAX_CHUNK_PAYLOAD,
            unreliable_packet_limit: UNRELIABLE_PACKET_LIMIT,
            max_pending_messages: 4,
            broadcast_bytes_per_second: 512 * 1024,   // 512KB/s
            send_retry_window: Duration::from_secs(5), // 5초
            retry_backoff: Duration::from_millis(1),
            idle_sleep: Duration::from_millis(1),
            max_reassembly_size: Some(64 * 1024 * 1024), // 64MB
            reassembly_timeout: None,
            event_capacity: 1024,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 데이터그램 하나에 담을 수 있는 최대 페이로드
    pub fn max_datagram_payload(&self) -> usize {
        self.unreliable_packet_limit.saturating_sub(DATAGRAM_HEADER_LEN)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_payload == 0 {
            return Err(Error::InvalidConfig("max_chunk_payload must be non-zero"));
        }
        if self.broadcast_bytes_per_second == 0 {
            return Err(Error::InvalidConfig("broadcast_bytes_per_second must be non-zero"));
        }
        if self.max_pending_messages == 0 {
            return Err(Error::InvalidConfig("max_pending_messages must be non-zero"));
        }
        if self.unreliable_packet_limit <= DATAGRAM_HEADER_LEN {
            return Err(Error::InvalidConfig("unreliable_packet_limit too small"));
        }
        if self.event_capacity == 0 {
            return Err(Error::InvalidConfig("event_capacity must be non-zero"));
        }
        Ok(())
    }

    /// 저대역폭 세션용 설정
    pub fn low_bandwidth() -> Self {
        Self {
            max_chunk_payload: 4 * 1024,
            max_pending_messages: 2,
            broadcast_bytes_per_second: 64 * 1024, // 64KB/s
            send_retry_window: Duration::from_secs(10),
            retry_backoff: Duration::from_millis(5),
            idle_sleep: Duration::from_millis(2),
            max_reassembly_size: Some(16 * 1024 * 1024),
            reassembly_timeout: Some(Duration::from_secs(60)),
            ..Self::default()
        }
    }

    /// LAN 세션용 설정
    pub fn lan() -> Self {
        Self {
            max_chunk_payload: 60 * 1024,
            max_pending_messages: 16,
            broadcast_bytes_per_second: 8 * 1024 * 1024, // 8MB/s
            send_retry_window: Duration::from_secs(3),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_caps_reassembly_size() {
        let config = Config::default();
        assert_eq!(config.max_reassembly_size, Some(64 * 1024 * 1024));
        // 최대 크기 메시지는 여전히 받을 수 있어야 함
        assert!(config.max_reassembly_size.unwrap() >= config.max_chunk_payload);
    }

    #[test]
    fn presets_are_valid() {
        Config::default().validate().unwrap();
        Config::low_bandwidth().validate().unwrap();
        Config::lan().validate().unwrap();
    }

    #[test]
    fn zero_chunk_payload_is_rejected() {
        let config = Config {
            max_chunk_payload: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn datagram_payload_excludes_prefix() {
        assert_eq!(Config::default().max_datagram_payload(), 1196);
    }
}
