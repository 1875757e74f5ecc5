//! 펌프 통계

use std::time::{Duration, Instant};

/// 펌프 카운터 스냅샷
#[derive(Debug, Clone)]
pub struct PumpStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 큐에 들어온 reliable 메시지 수
    pub messages_enqueued: u64,

    /// 마지막 청크까지 전송된 메시지 수
    pub messages_delivered: u64,

    /// 재시도 시간 초과로 포기한 메시지 수
    pub messages_abandoned: u64,

    /// 수신측에서 재조립 완료된 메시지 수
    pub messages_reassembled: u64,

    /// 전송한 청크 수
    pub chunks_sent: u64,

    /// 수락된 청크 수
    pub chunks_received: u64,

    /// 중복 청크 수
    pub duplicate_chunks: u64,

    /// 거부된 청크 수 (헤더 불일치, 범위 초과 등)
    pub rejected_chunks: u64,

    /// 디코딩 실패 패킷 수
    pub malformed_packets: u64,

    /// 수신 데이터그램 수
    pub datagrams_received: u64,

    /// 콜백이 없어 버려진 메시지/데이터그램 수
    pub unrouted: u64,

    /// 보낸 ACK 수
    pub acks_sent: u64,

    /// 받은 ACK 수
    pub acks_received: u64,

    /// 전송 계층 거부 횟수
    pub send_failures: u64,

    /// 전송 바이트 (reliable 청크)
    pub bytes_sent: u64,

    /// 수신 바이트 (모든 패킷)
    pub bytes_received: u64,

    /// 만료로 제거된 재조립 버퍼 수
    pub reassemblies_evicted: u64,
}

impl PumpStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            messages_enqueued: 0,
            messages_delivered: 0,
            messages_abandoned: 0,
            messages_reassembled: 0,
            chunks_sent: 0,
            chunks_received: 0,
            duplicate_chunks: 0,
            rejected_chunks: 0,
            malformed_packets: 0,
            datagrams_received: 0,
            unrouted: 0,
            acks_sent: 0,
            acks_received: 0,
            send_failures: 0,
            bytes_sent: 0,
            bytes_received: 0,
            reassemblies_evicted: 0,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 전송 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes_sent as f64 / elapsed
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Messages: {}/{} sent, {} abandoned, {} reassembled | Chunks: {} out, {} in | Throughput: {:.2} KB/s | Rejected: {} | Malformed: {}",
            self.elapsed().as_secs_f64(),
            self.messages_delivered,
            self.messages_enqueued,
            self.messages_abandoned,
            self.messages_reassembled,
            self.chunks_sent,
            self.chunks_received,
            self.throughput() / 1024.0,
            self.rejected_chunks + self.duplicate_chunks,
            self.malformed_packets,
        )
    }
}

impl Default for PumpStats {
    fn default() -> Self {
        Self::new()
    }
}
