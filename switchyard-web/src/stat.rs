//! 路由统计
//!
//! 每个请求结束后生成一份 `RouteStat`，交给引擎上配置的 `RouteCallback`

use crate::context::LogLine;
use http::{Method, StatusCode, Uri};
use std::time::Duration;

/// 执行链中单个处理器的统计
#[derive(Debug, Clone)]
pub struct HandlerStat {
    pub name: &'static str,
    pub duration: Duration,
    /// 处理器失败时的错误信息
    pub error: Option<String>,
    /// 处理器结束后执行链是否已停止
    pub stopped: bool,
}

/// 一个请求的统计
#[derive(Debug, Clone)]
pub struct RouteStat {
    pub method: Method,
    pub uri: Uri,
    pub matched_path: String,
    pub request_id: String,
    pub handlers: Vec<HandlerStat>,
    pub duration: Duration,
    pub response_size: usize,
    pub status: StatusCode,
    pub logs: Vec<LogLine>,
}

pub trait RouteCallback: Send + Sync + 'static {
    fn on_route(&self, stat: &RouteStat);
}

impl<F> RouteCallback for F
where
    F: Fn(&RouteStat) + Send + Sync + 'static,
{
    fn on_route(&self, stat: &RouteStat) {
        self(stat)
    }
}

/// 默认回调：每个请求一行，每个处理器一行（debug）
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRouteCallback;

impl RouteCallback for DefaultRouteCallback {
    fn on_route(&self, stat: &RouteStat) {
        tracing::info!(
            request_id = %stat.request_id,
            method = %stat.method,
            uri = %stat.uri,
            route = %stat.matched_path,
            status = stat.status.as_u16(),
            size = stat.response_size,
            elapsed = ?stat.duration,
            "Request completed"
        );

        for handler in &stat.handlers {
            tracing::debug!(
                request_id = %stat.request_id,
                handler = handler.name,
                elapsed = ?handler.duration,
                stopped = handler.stopped,
                error = handler.error.as_deref().unwrap_or(""),
                "Handler finished"
            );
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpRouteCallback;

impl RouteCallback for NoOpRouteCallback {
    fn on_route(&self, _stat: &RouteStat) {}
}
