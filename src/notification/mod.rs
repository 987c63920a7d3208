// 未读通知模块
//
// 单一实时连接 + 定时兜底轮询，维护当前资料的未读消息数

pub mod conversations;
pub mod manager;
pub mod transport;

pub use conversations::{total_unread, ConversationSource};
pub use manager::{ActiveProfile, NotificationManager, UnreadCountCallback, DEFAULT_POLL_INTERVAL};
pub use transport::{
    RealtimeConnection, RealtimeFrame, RealtimeTransport, RemoteEnd, TransportError, WsTransport,
    EVENT_PRIVATE_MESSAGE, EVENT_USER_CONNECTED,
};
