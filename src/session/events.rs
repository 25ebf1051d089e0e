use tokio::sync::broadcast;

use crate::storage::model::{TabId, WorkspaceId};

/// 会话变更通知，供渲染层订阅
///
/// 事件只携带 id，订阅者需要通过 cache 读取最新数据。
/// 落后的接收者会丢失事件，此时应重新读取。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    TabsLoaded(WorkspaceId),
    TabCreated(TabId),
    /// 超出常驻上限被移出内存，持久化数据仍然保留
    TabEvicted(TabId),
    TabClosed(TabId),
    ActiveTabChanged(Option<TabId>),
    TabStateChanged(TabId),
    TabsReordered(WorkspaceId),
    ResponseChanged(TabId),
    LoadingChanged(TabId, bool),
    /// tab 上已有请求在发送中时再次请求发送
    SendRejected(TabId),
}

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        // 没有订阅者时忽略
        let _ = self.tx.send(event);
    }
}
