//! 수신 콜백 등록
//!
//! 컴포넌트 ID -> 콜백 목록. `Subscription`이 drop되면 자동으로 해제됨.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::message::ComponentId;
use crate::pump::Shared;
use crate::transport::PeerId;

/// 수신 콜백 (펌프 스레드에서 동기 실행되므로 빨리 반환해야 함)
pub type ReceiveCallback = Arc<dyn Fn(PeerId, ComponentId, &[u8]) + Send + Sync>;

/// 구독 ID
pub type SubscriptionId = u64;

#[derive(Default)]
pub struct CallbackRegistry {
    next_id: SubscriptionId,
    by_component: HashMap<ComponentId, Vec<(SubscriptionId, ReceiveCallback)>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, component_id: ComponentId, callback: ReceiveCallback) -> SubscriptionId {
        self.next_id += 1;
        let id = self.next_id;
        self.by_component
            .entry(component_id)
            .or_default()
            .push((id, callback));
        id
    }

    /// 해제. 등록되어 있었으면 true
    pub fn unregister(&mut self, component_id: ComponentId, id: SubscriptionId) -> bool {
        let Some(callbacks) = self.by_component.get_mut(&component_id) else {
            return false;
        };

        let before = callbacks.len();
        callbacks.retain(|(existing, _)| *existing != id);
        let removed = callbacks.len() != before;

        if callbacks.is_empty() {
            self.by_component.remove(&component_id);
        }
        removed
    }

    /// 컴포넌트의 콜백 복사본 (락 밖에서 호출하기 위함)
    pub fn lookup(&self, component_id: ComponentId) -> Vec<ReceiveCallback> {
        self.by_component
            .get(&component_id)
            .map(|callbacks| callbacks.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_component.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_component.is_empty()
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("components", &self.by_component.len())
            .field("callbacks", &self.len())
            .finish()
    }
}

/// 콜백 구독 핸들
#[must_use = "dropping a Subscription unregisters its callback"]
pub struct Subscription {
    id: SubscriptionId,
    component_id: ComponentId,
    shared: Weak<Shared>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, component_id: ComponentId, shared: &Arc<Shared>) -> Self {
        Self {
            id,
            component_id,
            shared: Arc::downgrade(shared),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn component_id(&self) -> ComponentId {
        self.component_id
    }

    /// 명시적 해제 (drop과 동일)
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // 엔드포인트가 먼저 사라졌으면 할 일 없음
        if let Some(shared) = self.shared.upgrade() {
            if shared.state.lock().callbacks.unregister(self.component_id, self.id) {
                debug!("콜백 해제: component={}, id={}", self.component_id, self.id);
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("component_id", &self.component_id)
            .finish()
    }
}
