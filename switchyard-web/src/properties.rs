//! 引擎配置属性
//!
//! 可以通过 TOML 配置文件的 `web` 段或 `SWITCHYARD_WEB_*` 环境变量配置

use serde::{Deserialize, Serialize};
use switchyard_core::config::Environment;
use switchyard_core::constants::{
    MULTIPART_MAX_FIELDS, MULTIPART_MAX_FILE_SIZE, WEB_MAX_BODY_SIZE, WEB_PRETTY_JSON, WEB_ROUTE_LOG,
};

/// Multipart 配置属性
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartProperties {
    /// 单个字段的最大字节数，默认 10MB
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,

    /// 最大字段数量，默认 100
    #[serde(default = "default_max_fields")]
    pub max_fields: usize,
}

fn default_max_file_size() -> usize {
    10 * 1024 * 1024 // 10MB
}

fn default_max_fields() -> usize {
    100
}

impl Default for MultipartProperties {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            max_fields: default_max_fields(),
        }
    }
}

impl MultipartProperties {
    pub fn from_environment(env: &Environment) -> Self {
        Self {
            max_file_size: env.get_usize_or(MULTIPART_MAX_FILE_SIZE, default_max_file_size()),
            max_fields: env.get_usize_or(MULTIPART_MAX_FIELDS, default_max_fields()),
        }
    }

    /// 转换为 multer::Constraints
    pub fn to_multer_constraints(&self) -> multer::Constraints {
        multer::Constraints::new()
            .size_limit(multer::SizeLimit::new().per_field(self.max_file_size as u64))
    }
}

/// 引擎配置属性
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineProperties {
    /// 请求体上限（字节），超出返回 413，默认 32MB
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// JSON 响应是否缩进
    #[serde(default)]
    pub pretty_json: bool,

    /// 是否使用默认的路由统计回调记录每个请求
    #[serde(default = "default_route_log")]
    pub route_log: bool,

    #[serde(default)]
    pub multipart: MultipartProperties,
}

fn default_max_body_size() -> usize {
    32 * 1024 * 1024
}

fn default_route_log() -> bool {
    true
}

impl Default for EngineProperties {
    fn default() -> Self {
        Self {
            max_body_size: default_max_body_size(),
            pretty_json: false,
            route_log: default_route_log(),
            multipart: MultipartProperties::default(),
        }
    }
}

impl EngineProperties {
    pub fn from_environment(env: &Environment) -> Self {
        Self {
            max_body_size: env.get_usize_or(WEB_MAX_BODY_SIZE, default_max_body_size()),
            pretty_json: env.get_bool_or(WEB_PRETTY_JSON, false),
            route_log: env.get_bool_or(WEB_ROUTE_LOG, default_route_log()),
            multipart: MultipartProperties::from_environment(env),
        }
    }
}
