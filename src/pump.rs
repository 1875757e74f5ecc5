//! 디스패치 펌프
//!
//! 전용 스레드에서 도는 단일 폴링 루프. 반복마다:
//! 1. 수신 패킷 최대 하나 처리 (데이터그램 / ACK / 청크)
//! 2. 흐름 제어와 pacing이 허용하면 송신 청크 최대 하나 전송
//! 3. 둘 다 할 일이 없으면 `idle_sleep`만큼 대기
//!
//! 프로토콜 상태(흐름 제어, pacing, 재조립 버퍼)는 펌프만 소유함.
//! 다른 스레드와는 `Shared`의 락 하나로 큐와 콜백 등록만 공유하며,
//! 이 락은 전송 계층 호출 중에는 절대 잡지 않음.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::chunk::{ChunkOutcome, OutboundMessage, ReassemblyBuffer};
use crate::flow::FlowController;
use crate::message::{
    encode_ack, ChunkHeader, ComponentId, Datagram, Distribution, MessageId, Packet,
};
use crate::pacing::BandwidthShaper;
use crate::registry::CallbackRegistry;
use crate::stats::PumpStats;
use crate::transport::{PeerId, Target, Transport};
use crate::{Config, Error};

/// 만료 버퍼 정리 주기
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// 호출자 스레드와 공유되는 상태 (락 하나)
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    /// 송신 FIFO 큐
    pub(crate) queue: VecDeque<OutboundMessage>,

    /// 대상별 미완료 메시지 수 (큐 + 전송 중)
    pub(crate) pending: HashMap<Target, usize>,

    /// 수신 콜백
    pub(crate) callbacks: CallbackRegistry,
}

/// 엔드포인트와 펌프가 함께 쓰는 핸들
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) state: Mutex<SharedState>,
    pub(crate) running: AtomicBool,
    pub(crate) enqueued: AtomicU64,
    pub(crate) reassembly_count: AtomicUsize,
    pub(crate) stats: RwLock<PumpStats>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SharedState::default()),
            running: AtomicBool::new(true),
            enqueued: AtomicU64::new(0),
            reassembly_count: AtomicUsize::new(0),
            stats: RwLock::new(PumpStats::new()),
        }
    }

    pub(crate) fn enqueue(&self, message: OutboundMessage) {
        let mut state = self.state.lock();
        *state.pending.entry(message.target).or_insert(0) += 1;
        state.queue.push_back(message);
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// 미완료 메시지 수 (None이면 전체)
    pub(crate) fn pending_count(&self, target: Option<Target>) -> usize {
        let state = self.state.lock();
        match target {
            Some(target) => state.pending.get(&target).copied().unwrap_or(0),
            None => state.pending.values().sum(),
        }
    }

    fn take_next(&self) -> Option<OutboundMessage> {
        self.state.lock().queue.pop_front()
    }

    fn finish(&self, target: Target) {
        let mut state = self.state.lock();
        if let Some(count) = state.pending.get_mut(&target) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.pending.remove(&target);
            }
        }
    }

    /// 펌프 종료 시 남은 큐 폐기
    fn discard_queue(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.queue.len();
        state.queue.clear();
        state.pending.clear();
        dropped
    }
}

/// 메시지 전송 결과 통지
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryEvent {
    /// 마지막 청크까지 전송 계층에 넘어감
    Delivered { message_id: MessageId, target: Target },

    /// 재시도 시간 초과로 포기
    Abandoned {
        message_id: MessageId,
        target: Target,
        chunks_sent: u32,
        chunk_count: u32,
    },
}

/// 송신 단계 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendOutcome {
    Empty,
    Throttled,
    Sent,
    Retrying,
    Abandoned,
}

/// 반복 한 번의 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Activity {
    Worked,
    Retrying,
    Idle,
}

pub(crate) struct Pump<T: Transport> {
    config: Config,
    transport: Arc<T>,
    shared: Arc<Shared>,
    events: Sender<DeliveryEvent>,

    /// 큐에서 꺼내 전송 중인 메시지 (큐의 head)
    active: Option<OutboundMessage>,

    /// active 메시지의 첫 전송 실패 시각
    failing_since: Option<Instant>,

    flow: FlowController,
    shaper: BandwidthShaper,
    reassembly: HashMap<(PeerId, MessageId), ReassemblyBuffer>,

    stats: PumpStats,
    last_sweep: Instant,
}

impl<T: Transport> Pump<T> {
    pub(crate) fn new(
        config: Config,
        transport: Arc<T>,
        shared: Arc<Shared>,
        events: Sender<DeliveryEvent>,
    ) -> Self {
        Self {
            flow: FlowController::new(config.max_pending_messages),
            shaper: BandwidthShaper::new(config.broadcast_bytes_per_second),
            config,
            transport,
            shared,
            events,
            active: None,
            failing_since: None,
            reassembly: HashMap::new(),
            stats: PumpStats::new(),
            last_sweep: Instant::now(),
        }
    }

    /// 정지 신호까지 루프 실행
    pub(crate) fn run(mut self) {
        info!("chunkline pump started");

        while self.shared.running.load(Ordering::SeqCst) {
            match self.turn_at(Instant::now()) {
                Activity::Worked => {}
                Activity::Retrying => thread::sleep(self.config.retry_backoff),
                Activity::Idle => thread::sleep(self.config.idle_sleep),
            }
        }

        let dropped = self.shared.discard_queue() + usize::from(self.active.is_some());
        info!(
            "chunkline pump stopped: {} queued messages, {} partial reassemblies discarded",
            dropped,
            self.reassembly.len()
        );
        self.reassembly.clear();
        self.shared.reassembly_count.store(0, Ordering::Relaxed);
        self.publish_stats();
    }

    /// 반복 한 번
    pub(crate) fn turn_at(&mut self, now: Instant) -> Activity {
        let received = self.receive_one();
        let sent = self.send_one(now);
        self.evict_stale(now);

        let activity = match sent {
            SendOutcome::Sent | SendOutcome::Abandoned => Activity::Worked,
            _ if received => Activity::Worked,
            SendOutcome::Retrying => Activity::Retrying,
            SendOutcome::Empty | SendOutcome::Throttled => Activity::Idle,
        };

        self.shared
            .reassembly_count
            .store(self.reassembly.len(), Ordering::Relaxed);
        if activity != Activity::Idle {
            self.publish_stats();
        }
        activity
    }

    fn publish_stats(&self) {
        *self.shared.stats.write() = self.stats.clone();
    }

    // ───────────────────────────── 수신 ─────────────────────────────

    fn receive_one(&mut self) -> bool {
        let Some(packet) = self.transport.try_read_incoming() else {
            return false;
        };

        self.stats.bytes_received += packet.bytes.len() as u64;
        if packet.reliable {
            self.handle_reliable(packet.sender, packet.bytes);
        } else {
            self.handle_datagram(packet.sender, packet.bytes);
        }
        true
    }

    fn handle_datagram(&mut self, sender: PeerId, bytes: Bytes) {
        match Datagram::decode(bytes) {
            Ok(datagram) => {
                self.stats.datagrams_received += 1;
                self.deliver(sender, datagram.component_id, &datagram.payload);
            }
            Err(e) => {
                self.stats.malformed_packets += 1;
                debug!("데이터그램 폐기: sender={}, {}", sender, e);
            }
        }
    }

    fn handle_reliable(&mut self, sender: PeerId, bytes: Bytes) {
        match Packet::decode(bytes) {
            Ok(Packet::Acknowledgement) => {
                self.stats.acks_received += 1;
                self.flow.on_acknowledged(sender);
            }
            Ok(Packet::Chunk { header, payload }) => {
                self.handle_chunk(sender, header, payload);
            }
            Err(e @ Error::InvalidVersion { .. }) => {
                self.stats.malformed_packets += 1;
                warn!("패킷 폐기: sender={}, {}", sender, e);
            }
            Err(e) => {
                self.stats.malformed_packets += 1;
                debug!("패킷 폐기: sender={}, {}", sender, e);
            }
        }
    }

    fn handle_chunk(&mut self, sender: PeerId, header: ChunkHeader, payload: Bytes) {
        // 흐름 제어 피드백은 재조립 결과와 무관하게 즉시 응답
        if header.distribution == Distribution::UniquePeer {
            if self.transport.send_reliable(Target::Peer(sender), &encode_ack()) {
                self.stats.acks_sent += 1;
            } else {
                self.stats.send_failures += 1;
                warn!("ACK 전송 실패: peer={}", sender);
            }
        }

        let key = (sender, header.message_id);
        let result = if let Some(buffer) = self.reassembly.get_mut(&key) {
            buffer.add_chunk(&header, &payload)
        } else {
            match ReassemblyBuffer::new(
                &header,
                self.config.max_chunk_payload,
                self.config.max_reassembly_size,
            ) {
                Ok(mut buffer) => {
                    let result = buffer.add_chunk(&header, &payload);
                    if result.is_ok() {
                        self.reassembly.insert(key, buffer);
                    }
                    result
                }
                Err(e) => Err(e),
            }
        };

        match result {
            Ok(ChunkOutcome::Incomplete) => {
                self.stats.chunks_received += 1;
            }
            Ok(ChunkOutcome::Completed) => {
                self.stats.chunks_received += 1;
                let Some(buffer) = self.reassembly.remove(&key) else {
                    return;
                };
                let component_id = buffer.component_id();
                let elapsed = buffer.created_at.elapsed();
                if let Some(bytes) = buffer.into_bytes() {
                    self.stats.messages_reassembled += 1;
                    debug!(
                        "메시지 {} 완료: sender={}, {} bytes, {:.2}ms",
                        header.message_id,
                        sender,
                        bytes.len(),
                        elapsed.as_secs_f64() * 1000.0
                    );
                    self.deliver(sender, component_id, &bytes);
                }
            }
            Err(Error::DuplicateChunk { chunk_index }) => {
                self.stats.duplicate_chunks += 1;
                debug!(
                    "중복 청크 무시: sender={}, message={}, chunk={}",
                    sender, header.message_id, chunk_index
                );
            }
            Err(e) => {
                self.stats.rejected_chunks += 1;
                debug!(
                    "청크 거부: sender={}, message={}, {}",
                    sender, header.message_id, e
                );
            }
        }
    }

    /// 콜백 호출 (락 밖에서)
    fn deliver(&mut self, sender: PeerId, component_id: ComponentId, bytes: &[u8]) {
        let callbacks = self.shared.state.lock().callbacks.lookup(component_id);
        if callbacks.is_empty() {
            self.stats.unrouted += 1;
            debug!("등록된 콜백 없음: component={}", component_id);
            return;
        }

        for callback in callbacks {
            callback(sender, component_id, bytes);
        }
    }

    /// 오래된 미완성 버퍼 정리 (`reassembly_timeout` 설정 시)
    fn evict_stale(&mut self, now: Instant) {
        let Some(timeout) = self.config.reassembly_timeout else {
            return;
        };
        if now.saturating_duration_since(self.last_sweep) < SWEEP_INTERVAL {
            return;
        }
        self.last_sweep = now;

        let before = self.reassembly.len();
        self.reassembly.retain(|(sender, message_id), buffer| {
            let stale = now.saturating_duration_since(buffer.last_activity) > timeout;
            if stale {
                warn!(
                    "재조립 타임아웃: sender={}, message={}, {:.1}% 수신",
                    sender,
                    message_id,
                    buffer.receive_ratio() * 100.0
                );
            }
            !stale
        });
        self.stats.reassemblies_evicted += (before - self.reassembly.len()) as u64;
    }

    // ───────────────────────────── 송신 ─────────────────────────────

    fn send_one(&mut self, now: Instant) -> SendOutcome {
        if self.active.is_none() {
            self.active = self.shared.take_next();
            self.failing_since = None;
        }
        let Some(message) = self.active.as_mut() else {
            return SendOutcome::Empty;
        };

        // head-of-line: 허용되지 않으면 뒤 메시지도 기다림
        let permitted = match message.target {
            Target::Broadcast => self.shaper.is_ready(now),
            Target::Peer(peer) => self.flow.try_reserve(peer),
        };
        if !permitted {
            return SendOutcome::Throttled;
        }

        let bytes = message.current_chunk_bytes();
        if self.transport.send_reliable(message.target, &bytes) {
            self.failing_since = None;
            self.stats.chunks_sent += 1;
            self.stats.bytes_sent += bytes.len() as u64;
            if message.target == Target::Broadcast {
                self.shaper.on_broadcast_sent(now, bytes.len());
            }

            if !message.advance() {
                let event = DeliveryEvent::Delivered {
                    message_id: message.message_id,
                    target: message.target,
                };
                let target = message.target;
                self.active = None;
                self.stats.messages_delivered += 1;
                self.shared.finish(target);
                self.emit(event);
            }
            return SendOutcome::Sent;
        }

        if let Target::Peer(peer) = message.target {
            self.flow.release(peer);
        }
        self.stats.send_failures += 1;

        let since = *self.failing_since.get_or_insert(now);
        if now.saturating_duration_since(since) <= self.config.send_retry_window {
            return SendOutcome::Retrying;
        }

        warn!(
            "메시지 {} 포기: target={:?}, {}/{} 청크 전송 후 {:?} 동안 실패 (큐 등록 후 {:.2}s)",
            message.message_id,
            message.target,
            message.cursor(),
            message.chunk_count(),
            self.config.send_retry_window,
            now.saturating_duration_since(message.created_at).as_secs_f64()
        );
        let event = DeliveryEvent::Abandoned {
            message_id: message.message_id,
            target: message.target,
            chunks_sent: message.cursor(),
            chunk_count: message.chunk_count(),
        };
        let target = message.target;
        self.active = None;
        self.failing_since = None;
        self.stats.messages_abandoned += 1;
        self.shared.finish(target);
        self.emit(event);
        SendOutcome::Abandoned
    }

    fn emit(&self, event: DeliveryEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                debug!("이벤트 채널이 가득 참, 폐기: {:?}", event);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}
