//! 实时连接
//!
//! 帧格式为 JSON：`{"event": <事件名>, "data": <任意 JSON>}`
//!
//! 连接对上层暴露为一对通道（[`RealtimeConnection`]），底层实现持有另一端
//! （[`RemoteEnd`]）负责实际收发。生产环境使用 WebSocket（[`WsTransport`]）。

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 上线通知，data = `[profileId, profileType]`
pub const EVENT_USER_CONNECTED: &str = "user_connected";

/// 私信到达
pub const EVENT_PRIVATE_MESSAGE: &str = "private_message";

/// 实时消息帧
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RealtimeFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl RealtimeFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// 实时连接错误
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("实时连接失败: {0}")]
    Connect(String),

    #[error("实时连接已关闭")]
    Closed,
}

/// 已建立的实时连接（上层持有的一端）
#[derive(Debug)]
pub struct RealtimeConnection {
    outgoing: mpsc::UnboundedSender<RealtimeFrame>,
    incoming: mpsc::UnboundedReceiver<RealtimeFrame>,
    shutdown: CancellationToken,
}

/// 底层实现持有的一端
#[derive(Debug)]
pub struct RemoteEnd {
    /// 上层发出的帧
    pub outgoing: mpsc::UnboundedReceiver<RealtimeFrame>,
    /// 推送给上层的帧
    pub incoming: mpsc::UnboundedSender<RealtimeFrame>,
    /// 上层关闭连接时触发
    pub shutdown: CancellationToken,
}

impl RealtimeConnection {
    /// 创建一对相连的端点
    pub fn channel() -> (RealtimeConnection, RemoteEnd) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        (
            RealtimeConnection {
                outgoing: out_tx,
                incoming: in_rx,
                shutdown: shutdown.clone(),
            },
            RemoteEnd {
                outgoing: out_rx,
                incoming: in_tx,
                shutdown,
            },
        )
    }

    /// 发送事件
    pub fn emit(&self, event: &str, data: Value) -> Result<(), TransportError> {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.outgoing
            .send(RealtimeFrame::new(event, data))
            .map_err(|_| TransportError::Closed)
    }

    /// 接收下一帧，连接断开时返回 None
    pub async fn next_frame(&mut self) -> Option<RealtimeFrame> {
        self.incoming.recv().await
    }

    /// 关闭连接（幂等）
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// 实时连接工厂
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn connect(&self) -> Result<RealtimeConnection, TransportError>;
}

/// WebSocket 实现
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RealtimeTransport for WsTransport {
    async fn connect(&self) -> Result<RealtimeConnection, TransportError> {
        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        info!("WebSocket 已连接: {}", self.url);

        let (conn, remote) = RealtimeConnection::channel();
        tokio::spawn(pump(ws, remote));
        Ok(conn)
    }
}

/// 在 WebSocket 与通道之间转发消息，直到任意一端关闭
async fn pump<S>(ws: tokio_tungstenite::WebSocketStream<S>, mut remote: RemoteEnd)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            biased;
            _ = remote.shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                debug!("WebSocket 主动关闭");
                break;
            }
            frame = remote.outgoing.recv() => {
                let Some(frame) = frame else {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("序列化消息失败: event={}, 错误: {}", frame.event, e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!("WebSocket 发送失败: {}", e);
                    break;
                }
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<RealtimeFrame>(&text) {
                    Ok(frame) => {
                        if remote.incoming.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!("忽略无法解析的消息: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => {
                    info!("WebSocket 已被服务端关闭");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket 读取失败: {}", e);
                    break;
                }
            }
        }
    }
}
