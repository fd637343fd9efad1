//! # Switchyard Web
//!
//! 基于 Axum 的 HTTP 处理器绑定、注入和执行链引擎
//!
//! ## 核心特性
//!
//! - **类型化绑定** - 路径参数、查询参数、表单和 JSON 请求体按字段类型解析并校验
//! - **依赖注入** - 启动时注册值或按请求计算的提供者，处理器按类型和键声明依赖
//! - **执行链** - 每条路由是一串处理器，任何一个都可以提前结束请求
//! - **启动期检查** - 未注册的依赖、重复路由在注册时就报错
//!
//! ## 示例
//!
//! ```ignore
//! use switchyard_web::prelude::*;
//!
//! #[derive(Binding, Validate)]
//! struct UserParam {
//!     #[bind(rename = "UserID")]
//!     user_id: u64,
//! }
//!
//! let mut engine = Engine::new();
//! engine.router().get("/user/:UserID", handlers![|p: UserParam| Json(p.user_id)])?;
//! SwitchyardServer::new(ServerProperties::default()).with_engine(engine).run().await?;
//! ```

// 派生宏生成的代码使用 `::switchyard_web` 路径
extern crate self as switchyard_web;

pub mod binding;
pub mod chain;
pub mod context;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod handler;
pub mod properties;
pub mod router;
pub mod server;
pub mod stat;
pub mod upload;
pub mod ws;

pub use binding::{Binding, FieldValue, Place};
pub use context::{Context, RequestData, ResponseBody};
pub use engine::Engine;
pub use error::{DefaultErrorHandler, Error, ErrorHandler, ParseError, RegistrationError, ValidationError};
pub use handler::{Body, Form, Inject, InjectKey, Json, Param, Query};
pub use properties::{EngineProperties, MultipartProperties};
pub use router::Group;
pub use server::{ServerError, ServerProperties, SwitchyardServer};
pub use stat::{DefaultRouteCallback, RouteCallback, RouteStat};
pub use upload::{FormData, UploadedFile};
pub use ws::{SocketSession, WebSocketHandler};

// 派生宏与同名 trait 一起导出
pub use switchyard_validator as validator;
pub use switchyard_validator::Validate;
pub use switchyard_web_macros::Binding;

pub mod prelude {
    //! 预导入模块

    pub use crate::context::Context;
    pub use crate::engine::Engine;
    pub use crate::error::{Error, ErrorHandler};
    pub use crate::handler::{Body, Form, Inject, Json, Param, Query};
    pub use crate::server::{ServerProperties, SwitchyardServer};
    pub use crate::upload::UploadedFile;
    pub use crate::ws::SocketSession;
    pub use crate::{handlers, inject_key, Binding, Validate};

    pub use axum::extract::ws::{Message, WebSocket};
    pub use http::StatusCode;
}
