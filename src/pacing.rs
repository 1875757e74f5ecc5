//! 브로드캐스트 대역폭 조절
//!
//! 고정 속도 pacing: 청크 전송 후 `bytes / rate` 동안 다음 브로드캐스트 청크를 막음.

use std::time::{Duration, Instant};

/// 지정 속도에서 `bytes` 전송에 걸리는 시간
pub fn pacing_delay(bytes: usize, bytes_per_second: u64) -> Duration {
    let nanos = bytes as u128 * 1_000_000_000 / bytes_per_second.max(1) as u128;
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}

#[derive(Debug)]
pub struct BandwidthShaper {
    /// bytes/sec
    bytes_per_second: u64,

    /// 다음 브로드캐스트 허용 시각 (None이면 즉시 허용)
    next_allowed: Option<Instant>,
}

impl BandwidthShaper {
    pub fn new(bytes_per_second: u64) -> Self {
        Self {
            bytes_per_second,
            next_allowed: None,
        }
    }

    pub fn next_allowed_send_time(&self) -> Option<Instant> {
        self.next_allowed
    }

    /// `now`에 브로드캐스트 청크를 보내도 되는지
    pub fn is_ready(&self, now: Instant) -> bool {
        self.next_allowed.map_or(true, |next| now >= next)
    }

    // 호출 위치: 브로드캐스트 청크 전송 성공 시
    pub fn on_broadcast_sent(&mut self, now: Instant, bytes: usize) -> Instant {
        let next = now + pacing_delay(bytes, self.bytes_per_second);
        self.next_allowed = Some(next);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_until_first_send() {
        let shaper = BandwidthShaper::new(1000);
        assert!(shaper.is_ready(Instant::now()));
        assert!(shaper.next_allowed_send_time().is_none());
    }

    #[test]
    fn send_blocks_for_bytes_over_rate() {
        let mut shaper = BandwidthShaper::new(1000);
        let t0 = Instant::now();

        let next = shaper.on_broadcast_sent(t0, 100);
        assert_eq!(next, t0 + Duration::from_millis(100));
        assert!(!shaper.is_ready(t0 + Duration::from_millis(99)));
        assert!(shaper.is_ready(t0 + Duration::from_millis(100)));
    }

    #[test]
    fn next_time_is_monotonic() {
        let mut shaper = BandwidthShaper::new(4096);
        let mut now = Instant::now();
        let mut last = now;

        for size in [1usize, 4096, 17, 1200, 0, 65536] {
            // 허용 시각이 되어야만 다음 전송이 일어남
            if let Some(next) = shaper.next_allowed_send_time() {
                now = now.max(next);
            }
            let next = shaper.on_broadcast_sent(now, size);
            assert_eq!(next - now, pacing_delay(size, 4096));
            assert!(next >= last);
            last = next;
        }
    }

    #[test]
    fn delay_is_exact() {
        assert_eq!(pacing_delay(512 * 1024, 512 * 1024), Duration::from_secs(1));
        assert_eq!(pacing_delay(3, 1_000_000_000), Duration::from_nanos(3));
    }
}
