//! 인메모리 루프백 전송 계층
//!
//! 같은 프로세스 안의 엔드포인트끼리 패킷을 주고받음. 데모와 테스트용.
//! 허브에 참여한 모든 피어가 하나의 세션을 이룸.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::transport::{IncomingPacket, PeerId, SessionControl, SessionEvent, Target, Transport};

struct PeerSlot {
    generation: u64,
    packets: Sender<IncomingPacket>,
    session: Sender<SessionEvent>,
    accept_all: bool,
}

#[derive(Default)]
struct HubState {
    next_generation: u64,
    peers: HashMap<PeerId, PeerSlot>,

    /// 연결된 피어 쌍 (작은 ID가 앞)
    links: HashSet<(PeerId, PeerId)>,

    /// (요청자, 대상)
    requests: HashSet<(PeerId, PeerId)>,
}

fn link(a: PeerId, b: PeerId) -> (PeerId, PeerId) {
    (a.min(b), a.max(b))
}

impl HubState {
    fn notify(&self, peer: PeerId, event: SessionEvent) {
        if let Some(slot) = self.peers.get(&peer) {
            let _ = slot.session.send(event);
        }
    }

    fn establish(&mut self, a: PeerId, b: PeerId) {
        self.requests.remove(&(a, b));
        self.requests.remove(&(b, a));
        if self.links.insert(link(a, b)) {
            self.notify(a, SessionEvent::StateChanged { peer: b, connected: true });
            self.notify(b, SessionEvent::StateChanged { peer: a, connected: true });
        }
    }
}

/// 루프백 세션
#[derive(Clone, Default)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// 세션 참여. 같은 ID로 다시 참여하면 이전 수신함은 끊김
    pub fn join(&self, peer: PeerId) -> LoopbackTransport {
        let (packet_tx, packet_rx) = unbounded();
        let (session_tx, session_rx) = unbounded();

        let mut state = self.state.lock();
        state.next_generation += 1;
        let generation = state.next_generation;
        state.peers.insert(
            peer,
            PeerSlot {
                generation,
                packets: packet_tx,
                session: session_tx,
                accept_all: false,
            },
        );
        drop(state);
        info!("loopback peer {} joined", peer);

        LoopbackTransport {
            peer,
            generation,
            state: self.state.clone(),
            packets: packet_rx,
            session: session_rx,
            send_blocked: AtomicBool::new(false),
        }
    }

    /// 참여 중인 피어 목록
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.state.lock().peers.keys().copied().collect();
        peers.sort_unstable();
        peers
    }
}

/// 허브에 연결된 한 피어의 전송 계층
pub struct LoopbackTransport {
    peer: PeerId,
    generation: u64,
    state: Arc<Mutex<HubState>>,
    packets: Receiver<IncomingPacket>,
    session: Receiver<SessionEvent>,
    send_blocked: AtomicBool,
}

impl LoopbackTransport {
    pub fn peer_id(&self) -> PeerId {
        self.peer
    }

    /// true로 두면 모든 송신이 거부됨 (전송 계층 포화 흉내)
    pub fn set_send_blocked(&self, blocked: bool) {
        self.send_blocked.store(blocked, Ordering::SeqCst);
    }

    /// 세션 이벤트 수신 채널
    pub fn session_events(&self) -> &Receiver<SessionEvent> {
        &self.session
    }

    fn deliver(&self, target: Target, bytes: &[u8], reliable: bool) -> bool {
        if self.send_blocked.load(Ordering::SeqCst) {
            return false;
        }

        let bytes = Bytes::copy_from_slice(bytes);
        let packet = |bytes: Bytes| IncomingPacket {
            sender: self.peer,
            bytes,
            reliable,
        };

        let state = self.state.lock();
        match target {
            Target::Broadcast => {
                for (peer, slot) in &state.peers {
                    if *peer != self.peer {
                        let _ = slot.packets.send(packet(bytes.clone()));
                    }
                }
                true
            }
            Target::Peer(peer) => match state.peers.get(&peer) {
                Some(slot) => slot.packets.send(packet(bytes)).is_ok(),
                None => {
                    debug!("loopback: unknown peer {}", peer);
                    false
                }
            },
        }
    }
}

impl Transport for LoopbackTransport {
    fn send_unreliable(&self, target: Target, bytes: &[u8]) -> bool {
        self.deliver(target, bytes, false)
    }

    fn send_reliable(&self, target: Target, bytes: &[u8]) -> bool {
        self.deliver(target, bytes, true)
    }

    fn try_read_incoming(&self) -> Option<IncomingPacket> {
        self.packets.try_recv().ok()
    }
}

impl SessionControl for LoopbackTransport {
    fn is_connected(&self, peer: PeerId) -> bool {
        self.state.lock().links.contains(&link(self.peer, peer))
    }

    fn connect(&self, peer: PeerId) -> bool {
        let mut state = self.state.lock();
        let accept_all = match state.peers.get(&peer) {
            Some(slot) => slot.accept_all,
            None => return false,
        };
        if state.links.contains(&link(self.peer, peer)) {
            return true;
        }

        if accept_all {
            state.establish(self.peer, peer);
        } else {
            state.requests.insert((self.peer, peer));
            state.notify(peer, SessionEvent::ConnectRequested { peer: self.peer });
        }
        true
    }

    fn accept_all_for_session(&self) -> bool {
        let mut state = self.state.lock();
        let Some(slot) = state.peers.get_mut(&self.peer) else {
            return false;
        };
        slot.accept_all = true;

        let waiting: Vec<PeerId> = state
            .requests
            .iter()
            .filter(|(_, to)| *to == self.peer)
            .map(|(from, _)| *from)
            .collect();
        for from in waiting {
            state.establish(from, self.peer);
        }
        true
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        // 같은 ID로 다시 참여한 경우 새 슬롯은 건드리지 않음
        let rejoined = state
            .peers
            .get(&self.peer)
            .is_some_and(|slot| slot.generation != self.generation);
        if rejoined {
            return;
        }

        state.peers.remove(&self.peer);
        state.requests.retain(|(from, to)| *from != self.peer && *to != self.peer);

        let me = self.peer;
        let linked: Vec<PeerId> = state
            .links
            .iter()
            .filter_map(|&(a, b)| match (a == me, b == me) {
                (true, _) => Some(b),
                (_, true) => Some(a),
                _ => None,
            })
            .collect();
        state.links.retain(|&(a, b)| a != me && b != me);
        for peer in linked {
            state.notify(peer, SessionEvent::StateChanged { peer: me, connected: false });
        }
        info!("loopback peer {} left", me);
    }
}
