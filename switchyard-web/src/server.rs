//! Web 服务器模块
//!
//! 把 [`Engine`] 转换成的 axum `Router` 绑定到 TCP 监听地址

use crate::engine::Engine;
use serde::{Deserialize, Serialize};
use std::io;
use switchyard_core::config::Environment;
use switchyard_core::{SERVER_HOST, SERVER_PORT};
use thiserror::Error;
use tokio::net::TcpListener;

/// Web 服务器配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProperties {
    /// 服务器监听地址
    pub host: String,

    /// 服务器监听端口
    pub port: u16,
}

impl Default for ServerProperties {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerProperties {
    /// 从 Environment 加载配置
    pub fn from_environment(env: &Environment) -> Self {
        let defaults = Self::default();
        Self {
            host: env.get_string(SERVER_HOST).unwrap_or(defaults.host),
            port: env
                .get_i64(SERVER_PORT)
                .and_then(|port| u16::try_from(port).ok())
                .unwrap_or(defaults.port),
        }
    }

    /// 获取服务器地址
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] io::Error),
}

/// Switchyard Web 服务器
pub struct SwitchyardServer {
    properties: ServerProperties,
    engine: Option<Engine>,
}

impl SwitchyardServer {
    pub fn new(properties: ServerProperties) -> Self {
        Self {
            properties,
            engine: None,
        }
    }

    /// 设置引擎
    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn properties(&self) -> &ServerProperties {
        &self.properties
    }

    /// 启动服务器，直到监听出错才返回
    pub async fn run(self) -> Result<(), ServerError> {
        let address = self.properties.address();

        // 没有引擎时使用空路由，所有请求 404
        let app = self
            .engine
            .unwrap_or_default()
            .into_router()
            .into_make_service();

        tracing::info!("Starting Switchyard server on {}", address);

        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| ServerError::Bind {
                address: address.clone(),
                source,
            })?;

        tracing::info!("Server listening on http://{}", address);

        axum::serve(listener, app).await.map_err(ServerError::Serve)?;

        Ok(())
    }
}
