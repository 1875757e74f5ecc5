//! # chunkline
//!
//! 패킷 전송 계층 위의 청크 분할형 애플리케이션 메시지 계층
//!
//! ## 핵심 특징
//! - **두 가지 채널**: best-effort 데이터그램과 순서 보장 reliable 메시지
//! - **청크 분할**: 큰 메시지를 고정 크기 청크로 나누고 수신측에서 재조립
//! - **흐름 제어**: 피어별 ACK 기반 전송 중 청크 상한
//! - **대역폭 조절**: 브로드캐스트 청크의 고정 속도 pacing
//! - **전용 펌프 스레드**: 호출자는 큐에 넣고 즉시 반환
//!
//! ## 예시
//!
//! ```no_run
//! use chunkline::{Config, Endpoint, LoopbackHub};
//!
//! let hub = LoopbackHub::new();
//! let alice = Endpoint::start(Config::default(), hub.join(1))?;
//! let bob = Endpoint::start(Config::default(), hub.join(2))?;
//!
//! let _subscription = bob.register_receive_callback(7, |peer, _component, bytes| {
//!     println!("{} bytes from {}", bytes.len(), peer);
//! });
//! alice.send_peer_reliable(2, 7, vec![0u8; 100_000])?;
//! # Ok::<(), chunkline::Error>(())
//! ```

pub mod chunk;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod flow;
pub mod loopback;
pub mod message;
pub mod pacing;
pub mod registry;
pub mod stats;
pub mod transport;

mod pump;

pub use chunk::{ChunkOutcome, OutboundMessage, ReassemblyBuffer};
pub use config::Config;
pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use flow::FlowController;
pub use loopback::{LoopbackHub, LoopbackTransport};
pub use message::{ChunkHeader, ComponentId, Datagram, Distribution, MessageId, Packet, Purpose};
pub use pacing::BandwidthShaper;
pub use pump::DeliveryEvent;
pub use registry::{ReceiveCallback, Subscription, SubscriptionId};
pub use stats::PumpStats;
pub use transport::{IncomingPacket, PeerId, SessionControl, SessionEvent, Target, Transport};

/// 프로토콜 버전 (모든 reliable 패킷의 첫 필드)
pub const PROTOCOL_VERSION: u32 = 1;

/// 기본 청크 페이로드 크기 (바이트)
pub const DEFAULT_MAX_CHUNK_PAYLOAD: usize = 16 * 1024; // 16KB

/// best-effort 데이터그램 최대 크기 (바이트)
pub const UNRELIABLE_PACKET_LIMIT: usize = 1200;
