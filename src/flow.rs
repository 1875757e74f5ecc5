//! 흐름 제어
//!
//! 피어별로 ACK를 받지 못한 청크 수를 추적함.
//! 브로드캐스트는 추적할 피어가 없으므로 여기 대신 `pacing`으로 제한함.

use std::collections::HashMap;

use crate::transport::PeerId;

/// 피어별 전송 중 카운터
#[derive(Debug)]
pub struct FlowController {
    /// 피어당 상한
    max_pending: u32,

    /// 피어 -> 전송 중 수 (0이면 항목 없음)
    in_flight: HashMap<PeerId, u32>,
}

impl FlowController {
    pub fn new(max_pending: u32) -> Self {
        Self {
            max_pending,
            in_flight: HashMap::new(),
        }
    }

    /// 여유가 있으면 카운터를 올리고 true
    pub fn try_reserve(&mut self, peer: PeerId) -> bool {
        let count = self.in_flight.entry(peer).or_insert(0);
        if *count < self.max_pending {
            *count += 1;
            true
        } else {
            false
        }
    }

    /// 전송 계층이 청크를 거부했을 때 예약 반환
    pub fn release(&mut self, peer: PeerId) {
        self.decrement(peer);
    }

    /// ACK 수신
    pub fn on_acknowledged(&mut self, peer: PeerId) {
        self.decrement(peer);
    }

    fn decrement(&mut self, peer: PeerId) {
        if let Some(count) = self.in_flight.get_mut(&peer) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.in_flight.remove(&peer);
            }
        }
    }

    /// 피어의 전송 중 수
    pub fn in_flight(&self, peer: PeerId) -> u32 {
        self.in_flight.get(&peer).copied().unwrap_or(0)
    }

    pub fn max_pending(&self) -> u32 {
        self.max_pending
    }
}
