// switchyard-core: 请求引擎的基础设施
//
// 提供：
// - 分层配置（TOML 文件、环境变量、内存配置源）
// - 日志初始化（tracing-subscriber）
// - 按 (类型, key) 注册的依赖注入表，支持请求级缓存的 provider

pub mod config;
pub mod constants;
pub mod error;
pub mod injector;
pub mod logging;

pub use config::{
    ConfigValue, Environment, EnvironmentPropertySource, MapPropertySource, PropertySource,
    TomlPropertySource,
};
pub use constants::*;
pub use error::{BoxError, CoreError, CoreResult, InjectionError, Result};
pub use injector::{DependencyKind, InjectionCache, InjectionKey, Injector, Resolved, Shared};
pub use logging::{LogFormat, LogLevel, LoggingConfig};

/// Prelude 模块，包含常用的 traits 和类型
pub mod prelude {
    pub use crate::config::{
        ConfigValue, Environment, EnvironmentPropertySource, MapPropertySource, PropertySource,
        TomlPropertySource,
    };
    pub use crate::error::{BoxError, InjectionError, Result};
    pub use crate::injector::{InjectionCache, InjectionKey, Injector};
    pub use crate::logging::{LogFormat, LogLevel, LoggingConfig};
    // Re-export anyhow for convenience
    pub use anyhow::{anyhow, Context};
}
