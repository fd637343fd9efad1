//! 路由注册
//!
//! `Group` 给之后注册的路由加上公共前缀和公共前置处理器，
//! 组合方式就是处理器列表的拼接。

use crate::descriptor::HandlerDescriptor;
use crate::engine::Engine;
use crate::error::RegistrationError;
use crate::handler::HandlerUnit;
use crate::ws::WebSocketHandler;
use axum::routing::MethodFilter;
use http::Method;
use std::fmt;

/// 一条路由：(方法, 路径) -> 处理器描述符列表
#[derive(Debug, Clone)]
pub struct RouteChain {
    pub method: Method,
    pub filter: MethodFilter,
    pub path: String,
    pub descriptors: Vec<HandlerDescriptor>,
}

/// 路由分组
pub struct Group<'e> {
    engine: &'e mut Engine,
    prefix: String,
    handlers: Vec<HandlerUnit>,
}

impl<'e> Group<'e> {
    pub(crate) fn new(engine: &'e mut Engine, prefix: String, handlers: Vec<HandlerUnit>) -> Self {
        Self {
            engine,
            prefix,
            handlers,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// 嵌套分组：前缀拼接，公共处理器追加在当前分组的处理器之后
    pub fn group(&mut self, prefix: &str, handlers: Vec<HandlerUnit>) -> Group<'_> {
        let prefix = join_path(&self.prefix, prefix);
        let handlers = self.chain(handlers);
        Group::new(&mut *self.engine, prefix, handlers)
    }

    pub fn route(
        &mut self,
        method: Method,
        path: &str,
        handlers: Vec<HandlerUnit>,
    ) -> Result<&mut Self, RegistrationError> {
        if handlers.is_empty() {
            return Err(RegistrationError::EmptyChain {
                method,
                path: join_path(&self.prefix, path),
            });
        }
        let path = join_path(&self.prefix, path);
        let handlers = self.chain(handlers);
        self.engine.register(method, &path, handlers)?;
        Ok(self)
    }

    pub fn get(&mut self, path: &str, handlers: Vec<HandlerUnit>) -> Result<&mut Self, RegistrationError> {
        self.route(Method::GET, path, handlers)
    }

    pub fn post(&mut self, path: &str, handlers: Vec<HandlerUnit>) -> Result<&mut Self, RegistrationError> {
        self.route(Method::POST, path, handlers)
    }

    pub fn put(&mut self, path: &str, handlers: Vec<HandlerUnit>) -> Result<&mut Self, RegistrationError> {
        self.route(Method::PUT, path, handlers)
    }

    pub fn delete(&mut self, path: &str, handlers: Vec<HandlerUnit>) -> Result<&mut Self, RegistrationError> {
        self.route(Method::DELETE, path, handlers)
    }

    pub fn patch(&mut self, path: &str, handlers: Vec<HandlerUnit>) -> Result<&mut Self, RegistrationError> {
        self.route(Method::PATCH, path, handlers)
    }

    pub fn head(&mut self, path: &str, handlers: Vec<HandlerUnit>) -> Result<&mut Self, RegistrationError> {
        self.route(Method::HEAD, path, handlers)
    }

    /// WebSocket 路由，分组处理器作为升级前的执行链
    pub fn websocket<W: WebSocketHandler>(
        &mut self,
        path: &str,
        handlers: Vec<HandlerUnit>,
        socket: W,
    ) -> Result<&mut Self, RegistrationError> {
        let path = join_path(&self.prefix, path);
        let handlers = self.chain(handlers);
        self.engine.websocket(&path, handlers, socket)?;
        Ok(self)
    }

    fn chain(&self, handlers: Vec<HandlerUnit>) -> Vec<HandlerUnit> {
        self.handlers.iter().cloned().chain(handlers).collect()
    }
}

impl fmt::Debug for Group<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("prefix", &self.prefix)
            .field("handlers", &self.handlers)
            .finish()
    }
}

/// 拼接路由前缀，结果总是以 `/` 开头且没有重复的 `/`
pub fn join_path(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let path = path.trim_start_matches('/');

    match (prefix.is_empty(), path.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{}", path),
        (false, true) => normalize_prefix(prefix),
        (false, false) => format!("{}/{}", normalize_prefix(prefix), path),
    }
}

fn normalize_prefix(prefix: &str) -> String {
    if prefix.starts_with('/') {
        prefix.to_string()
    } else {
        format!("/{}", prefix)
    }
}
