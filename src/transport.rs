//! 전송 계층 경계
//!
//! 실제 패킷 송수신과 세션 관리는 외부 구현이 담당함.
//! 이 크레이트는 `Transport`를 통해서만 전송 계층을 사용함.

use bytes::Bytes;

/// 피어 식별자
pub type PeerId = u64;

/// 전송 대상
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// 현재 세션 전체
    Broadcast,

    /// 특정 피어
    Peer(PeerId),
}

/// 수신된 패킷
#[derive(Debug, Clone)]
pub struct IncomingPacket {
    /// 송신 피어
    pub sender: PeerId,

    /// 패킷 바이트
    pub bytes: Bytes,

    /// reliable 채널로 수신되었는지 여부
    pub reliable: bool,
}

/// 패킷 전송 계층
///
/// 모든 호출은 블로킹 없이 즉시 반환해야 함.
/// reliable 채널은 순서를 보장하고 패킷을 잃어버리지 않는다고 가정함.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// best-effort 데이터그램 전송
    fn send_unreliable(&self, target: Target, bytes: &[u8]) -> bool;

    /// reliable 패킷 전송. false면 전송 계층이 지금은 받지 않음
    fn send_reliable(&self, target: Target, bytes: &[u8]) -> bool;

    /// 도착한 패킷 하나 읽기 (없으면 None)
    fn try_read_incoming(&self) -> Option<IncomingPacket>;
}

/// 세션 연결 관리 (청크 프로토콜과는 독립적)
pub trait SessionControl {
    fn is_connected(&self, peer: PeerId) -> bool;

    fn connect(&self, peer: PeerId) -> bool;

    /// 세션 멤버의 모든 연결 요청 수락
    fn accept_all_for_session(&self) -> bool;
}

/// 세션 이벤트 (비동기 통지)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// 피어가 연결을 요청함
    ConnectRequested { peer: PeerId },

    /// 연결 상태 변경
    StateChanged { peer: PeerId, connected: bool },
}
