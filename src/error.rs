//! 에러 타입 정의

use thiserror::Error;

/// chunkline 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("빈 페이로드는 전송할 수 없음")]
    EmptyPayload,

    #[error("데이터그램 크기 초과: {size} bytes (최대 {max})")]
    DatagramTooLarge { size: usize, max: usize },

    #[error("메시지가 너무 큼: {len} bytes는 청크 수가 u32 범위를 넘음")]
    MessageTooLarge { len: usize },

    #[error("패킷이 너무 짧음: {len} bytes (최소 {need})")]
    ShortPacket { len: usize, need: usize },

    #[error("유효하지 않은 프로토콜 버전: expected {expected}, got {got}")]
    InvalidVersion { expected: u32, got: u32 },

    #[error("알 수 없는 패킷 용도: {0}")]
    UnknownPurpose(u32),

    #[error("알 수 없는 배포 방식: {0}")]
    UnknownDistribution(u32),

    #[error("청크 수가 0인 청크")]
    ZeroChunkCount,

    #[error("유효하지 않은 청크 인덱스: {chunk_index} (총 {chunk_count})")]
    InvalidChunkIndex { chunk_index: u32, chunk_count: u32 },

    #[error("컴포넌트 불일치: expected {expected}, got {got}")]
    ComponentMismatch { expected: u32, got: u32 },

    #[error("청크 수 불일치: expected {expected}, got {got}")]
    ChunkCountMismatch { expected: u32, got: u32 },

    #[error("중복 청크: chunk_index={chunk_index}")]
    DuplicateChunk { chunk_index: u32 },

    #[error("청크 길이 오류: chunk_index={chunk_index}, len={len}")]
    InvalidChunkLength { chunk_index: u32, len: usize },

    #[error("재조립 버퍼 크기 초과: {size} bytes (최대 {max})")]
    ReassemblyTooLarge { size: usize, max: usize },

    #[error("잘못된 설정: {0}")]
    InvalidConfig(&'static str),

    #[error("엔드포인트 종료됨")]
    Stopped,
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
