/// 配置键与注入常量定义
///
/// 配置键统一在这里声明，`EngineProperties` / `ServerProperties`
/// 和环境变量映射都使用这些标识符

/// 未指定 key 时使用的注入 key
pub const DEFAULT_INJECTION_KEY: &str = "default";

/// 环境变量前缀，例如 `SWITCHYARD_SERVER_PORT` -> `server.port`
pub const ENV_PREFIX: &str = "SWITCHYARD_";

/// 服务器相关配置键
pub const SERVER_HOST: &str = "server.host";
pub const SERVER_PORT: &str = "server.port";

/// 引擎相关配置键
pub const WEB_MAX_BODY_SIZE: &str = "web.max-body-size";
pub const WEB_PRETTY_JSON: &str = "web.pretty-json";
pub const WEB_ROUTE_LOG: &str = "web.route-log";

/// Multipart 相关配置键
pub const MULTIPART_MAX_FILE_SIZE: &str = "web.multipart.max-file-size";
pub const MULTIPART_MAX_FIELDS: &str = "web.multipart.max-fields";

/// 日志相关配置键
pub const LOGGING_LEVEL: &str = "logging.level";
pub const LOGGING_FORMAT: &str = "logging.format";
pub const LOGGING_FILTER: &str = "logging.filter";
