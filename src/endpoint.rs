//! 애플리케이션 메시지 엔드포인트
//!
//! 호출자 스레드용 API. 메시지를 큐에 넣고 즉시 반환하며,
//! 실제 전송과 수신 처리는 전용 펌프 스레드가 담당함.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::chunk::OutboundMessage;
use crate::message::{ComponentId, Datagram, MessageId};
use crate::pump::{DeliveryEvent, Pump, Shared};
use crate::registry::{ReceiveCallback, Subscription};
use crate::stats::PumpStats;
use crate::transport::{PeerId, Target, Transport};
use crate::{Config, Error, Result};

/// 메시지 엔드포인트
///
/// 드롭하면 펌프 스레드를 멈추고 끝날 때까지 기다림.
pub struct Endpoint<T: Transport + 'static> {
    config: Config,
    transport: Arc<T>,
    shared: Arc<Shared>,
    next_message_id: AtomicU32,
    events: Receiver<DeliveryEvent>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport + 'static> Endpoint<T> {
    /// 설정 검증 후 펌프 스레드 시작
    pub fn start(config: Config, transport: T) -> Result<Self> {
        config.validate()?;

        let transport = Arc::new(transport);
        let shared = Arc::new(Shared::new());
        let (event_tx, event_rx) = crossbeam_channel::bounded(config.event_capacity);

        let pump = Pump::new(config.clone(), transport.clone(), shared.clone(), event_tx);
        let worker = thread::Builder::new()
            .name("chunkline-pump".into())
            .spawn(move || pump.run())?;

        info!(
            "Endpoint started: chunk={} bytes, max_pending={}, broadcast={} KB/s",
            config.max_chunk_payload,
            config.max_pending_messages,
            config.broadcast_bytes_per_second / 1024
        );

        Ok(Self {
            config,
            transport,
            shared,
            next_message_id: AtomicU32::new(1),
            events: event_rx,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(Error::Stopped)
        }
    }

    // ───────────────────────── best-effort ─────────────────────────

    /// 세션 전체에 데이터그램 전송
    ///
    /// `Ok(false)`는 전송 계층이 거부했다는 뜻이며 재시도하지 않음.
    pub fn send_broadcast_unreliable(&self, component_id: ComponentId, bytes: &[u8]) -> Result<bool> {
        self.send_unreliable(Target::Broadcast, component_id, bytes)
    }

    /// 특정 피어에 데이터그램 전송
    pub fn send_peer_unreliable(
        &self,
        peer: PeerId,
        component_id: ComponentId,
        bytes: &[u8],
    ) -> Result<bool> {
        self.send_unreliable(Target::Peer(peer), component_id, bytes)
    }

    fn send_unreliable(&self, target: Target, component_id: ComponentId, bytes: &[u8]) -> Result<bool> {
        self.ensure_running()?;
        let datagram = Datagram::encode(component_id, bytes, self.config.unreliable_packet_limit)?;
        Ok(self.transport.send_unreliable(target, &datagram))
    }

    // ─────────────────────────── reliable ──────────────────────────

    /// 세션 전체에 메시지 전송 (큐에 넣고 즉시 반환)
    pub fn send_broadcast_reliable(
        &self,
        component_id: ComponentId,
        payload: impl Into<Bytes>,
    ) -> Result<MessageId> {
        self.send_reliable(Target::Broadcast, component_id, payload.into())
    }

    /// 특정 피어에 메시지 전송 (큐에 넣고 즉시 반환)
    pub fn send_peer_reliable(
        &self,
        peer: PeerId,
        component_id: ComponentId,
        payload: impl Into<Bytes>,
    ) -> Result<MessageId> {
        self.send_reliable(Target::Peer(peer), component_id, payload.into())
    }

    fn send_reliable(&self, target: Target, component_id: ComponentId, payload: Bytes) -> Result<MessageId> {
        self.ensure_running()?;

        // u32 범위를 넘으면 0부터 다시 씀
        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let message = OutboundMessage::new(
            target,
            message_id,
            component_id,
            payload,
            self.config.max_chunk_payload,
        )?;

        debug!(
            "메시지 {} 큐 등록: target={:?}, component={}, {} bytes, {} chunks",
            message_id,
            target,
            component_id,
            message.payload().len(),
            message.chunk_count()
        );
        self.shared.enqueue(message);
        Ok(message_id)
    }

    // ─────────────────────────── 수신 ───────────────────────────

    /// 컴포넌트 수신 콜백 등록
    ///
    /// 콜백은 펌프 스레드에서 호출되므로 오래 걸리는 작업은 다른 곳으로 넘겨야 함.
    /// 반환된 `Subscription`을 드롭하면 해제됨.
    pub fn register_receive_callback<F>(&self, component_id: ComponentId, callback: F) -> Subscription
    where
        F: Fn(PeerId, ComponentId, &[u8]) + Send + Sync + 'static,
    {
        let callback: ReceiveCallback = Arc::new(callback);
        let id = self
            .shared
            .state
            .lock()
            .callbacks
            .register(component_id, callback);
        debug!("콜백 등록: component={}, id={}", component_id, id);
        Subscription::new(id, component_id, &self.shared)
    }

    pub fn unregister_receive_callback(&self, subscription: Subscription) {
        subscription.unsubscribe();
    }

    // ─────────────────────────── 상태 ───────────────────────────

    /// 미완료 reliable 메시지 수 (None이면 전체)
    pub fn pending_send_count(&self, target: Option<Target>) -> usize {
        self.shared.pending_count(target)
    }

    /// 재조립 중인 수신 메시지 수
    pub fn pending_receive_buffer_count(&self) -> usize {
        self.shared.reassembly_count.load(Ordering::Relaxed)
    }

    /// 펌프 통계 스냅샷
    pub fn stats(&self) -> PumpStats {
        let mut stats = self.shared.stats.read().clone();
        stats.messages_enqueued = self.shared.enqueued.load(Ordering::Relaxed);
        stats
    }

    /// 전송 결과 이벤트 채널
    pub fn events(&self) -> &Receiver<DeliveryEvent> {
        &self.events
    }

    /// 펌프 정지. 남은 큐와 미완성 버퍼는 버림
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);

        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        if worker.join().is_err() {
            warn!("pump thread panicked");
        }
        info!("Endpoint stopped. {}", self.stats().summary());
    }
}

impl<T: Transport + 'static> Drop for Endpoint<T> {
    fn drop(&mut self) {
        self.stop();
    }
}
