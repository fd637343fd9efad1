//! WebSocket 路由
//!
//! 升级前先用普通的绑定 / 注入 / 执行链跑一遍处理器列表（鉴权、加载会话等）。
//! 执行链正常完成才升级连接，之后由 [`WebSocketHandler`] 接管原始双向流；
//! 停止或失败时返回执行链生成的响应。

use crate::descriptor::HandlerDescriptor;
use async_trait::async_trait;
use axum::extract::ws::WebSocket;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// 升级后连接的信息
#[derive(Debug, Clone)]
pub struct SocketSession {
    pub request_id: String,
    pub path: String,
    pub params: Vec<(String, String)>,
}

impl SocketSession {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[async_trait]
pub trait WebSocketHandler: Send + Sync + 'static {
    async fn handle(&self, socket: WebSocket, session: SocketSession);
}

#[async_trait]
impl<F, Fut> WebSocketHandler for F
where
    F: Fn(WebSocket, SocketSession) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, socket: WebSocket, session: SocketSession) {
        (self)(socket, session).await
    }
}

/// 一条 WebSocket 路由
#[derive(Clone)]
pub struct SocketRoute {
    pub path: String,
    pub descriptors: Vec<HandlerDescriptor>,
    pub handler: Arc<dyn WebSocketHandler>,
}

impl fmt::Debug for SocketRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketRoute")
            .field("path", &self.path)
            .field("descriptors", &self.descriptors)
            .finish()
    }
}
