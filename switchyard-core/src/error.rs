use thiserror::Error;

/// 统一的应用层错误类型
///
/// 库内部使用 `CoreError` / `InjectionError`，应用入口（demo、启动代码）
/// 使用 anyhow::Result，通过 .context() 方法添加上下文信息。
pub use anyhow::Result;

/// 用户代码返回的任意错误
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 核心层错误
#[derive(Debug, Error)]
pub enum CoreError {
    /// 日志系统初始化失败
    #[error("Failed to initialize logging: {0}")]
    LoggingInitFailed(String),

    /// 配置文件读取或解析失败
    #[error("Failed to load configuration from {source_name}: {message}")]
    Config { source_name: String, message: String },
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// 依赖注入错误
#[derive(Debug, Error)]
pub enum InjectionError {
    /// provider 执行失败
    #[error("Could not inject type {type_name} with key {key} because {source}")]
    Provider {
        type_name: &'static str,
        key: String,
        #[source]
        source: BoxError,
    },

    /// (类型, key) 既没有注册值也没有注册 provider
    #[error("Could not inject type {type_name} with key {key} because there is no such dependency")]
    NoSuchDependency { type_name: &'static str, key: String },
}

impl InjectionError {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Provider { type_name, .. } | Self::NoSuchDependency { type_name, .. } => type_name,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Provider { key, .. } | Self::NoSuchDependency { key, .. } => key,
        }
    }
}
