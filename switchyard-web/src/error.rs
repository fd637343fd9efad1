//! 错误处理模块
//!
//! ## 错误分层
//!
//! 1. **绑定层** - `ParseError` / `ValidationError`，执行链内部直接转成 400
//! 2. **注入层** - `InjectionError`，交给全局 `ErrorHandler`（默认 500）
//! 3. **业务层** - 处理器返回的错误和恢复的 panic，交给全局 `ErrorHandler`
//! 4. **注册层** - `DescriptorError` / `RegistrationError`，启动时返回给调用方

use crate::binding::{FieldBinding, Place};
use crate::context::Context;
use http::{Method, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use switchyard_core::{BoxError, InjectionError};
use switchyard_validator::ValidationError as RuleViolation;
use thiserror::Error;

/// 注入失败时返回给调用方的通用信息，具体原因只写日志
pub const INTERNAL_ERROR_MESSAGE: &str = "An internal error has occurred";

/// 单个字段无法转换成声明的类型
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("could not parse `{field}` from {place}: {reason}")]
pub struct ParseError {
    #[serde(rename = "Place")]
    pub place: Place,
    #[serde(rename = "FieldName")]
    pub field: String,
    #[serde(rename = "Reason")]
    pub reason: String,
}

impl ParseError {
    pub fn new(place: Place, field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            place,
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 转换成功后字段规则校验失败，包含全部失败字段
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("validation failed in {place} for {}", join_keys(.fields))]
pub struct ValidationError {
    #[serde(rename = "Fields")]
    pub fields: BTreeMap<String, String>,
    #[serde(rename = "Place")]
    pub place: Place,
}

fn join_keys(fields: &BTreeMap<String, String>) -> String {
    fields.keys().cloned().collect::<Vec<_>>().join(", ")
}

impl ValidationError {
    /// 把规则违例转换成对外字段名 -> 原因
    pub fn from_violation(place: Place, violation: RuleViolation, bindings: &[FieldBinding]) -> Self {
        let violation = violation.rename_fields(|ident| {
            bindings
                .iter()
                .find(|binding| binding.ident == ident)
                .map(|binding| binding.name)
        });

        let fields = match violation {
            RuleViolation::FieldErrors(errors) => errors
                .into_iter()
                .map(|(field, messages)| (field, messages.join("; ")))
                .collect(),
            RuleViolation::ValidationFailed(message) => BTreeMap::from([(String::new(), message)]),
        };

        Self { fields, place }
    }
}

/// 请求处理过程中的错误
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Injection(#[from] InjectionError),

    /// 处理器返回的业务错误
    #[error("{0}")]
    Handler(BoxError),

    /// 处理器 panic，消息来自 panic payload
    #[error("handler panicked: {0}")]
    Panic(String),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// 包装处理器返回的错误；如果本身就是 `Error` 则原样取出
    pub fn handler(error: impl Into<BoxError>) -> Self {
        let boxed: BoxError = error.into();
        match boxed.downcast::<Error>() {
            Ok(inner) => *inner,
            Err(other) => Error::Handler(other),
        }
    }

    /// 绑定层错误（执行链本地处理，不经过全局 ErrorHandler）
    pub fn is_binding(&self) -> bool {
        matches!(self, Error::Parse(_) | Error::Validation(_))
    }

    pub fn status_code(&self) -> StatusCode {
        if self.is_binding() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }

    /// 响应体：`{"ParseError": ...}` / `{"ValidationError": ...}`，其余为错误消息
    pub fn body(&self) -> Value {
        match self {
            Error::Parse(e) => json!({ "ParseError": e }),
            Error::Validation(e) => json!({ "ValidationError": e }),
            Error::Injection(_) => Value::String(INTERNAL_ERROR_MESSAGE.to_string()),
            other => Value::String(other.to_string()),
        }
    }
}

/// 全局错误处理器
///
/// 注入错误、处理器错误和 panic 都会路由到这里；调用结束后执行链总是停止
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle(&self, error: &Error, ctx: &mut Context);
}

impl<F> ErrorHandler for F
where
    F: Fn(&Error, &mut Context) + Send + Sync + 'static,
{
    fn handle(&self, error: &Error, ctx: &mut Context) {
        self(error, ctx)
    }
}

/// 默认错误处理器
///
/// - 注入错误：500，原因写日志，只返回通用信息
/// - 校验 / 解析错误：400，结构化错误体
/// - 其他：500，错误消息作为响应体
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultErrorHandler;

impl ErrorHandler for DefaultErrorHandler {
    fn handle(&self, error: &Error, ctx: &mut Context) {
        if let Error::Injection(cause) = error {
            ctx.log().error(format!("Injection failed: {}", cause));
        } else if !error.is_binding() {
            ctx.log().error(format!("Request failed: {}", error));
        }
        ctx.fail(error.status_code().as_u16(), error.body());
    }
}

/// 处理器签名不满足注册要求
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("input `{type_name}` is not a registered dependency, the request context, or a Param/Query/Form/Body container")]
    UnknownInput { type_name: &'static str },

    #[error("input kind `{kind}` is declared more than once")]
    DuplicateSlot { kind: &'static str },

    #[error("`{type_name}` field `{field}` is not a flat value and cannot be bound from {place}")]
    NotFlat {
        type_name: &'static str,
        field: &'static str,
        place: Place,
    },

    #[error("{method} handlers cannot declare a {kind} input")]
    BodyOnGet { method: Method, kind: &'static str },
}

/// 路由注册失败
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("cannot register {method} {path}: handler `{handler}` is invalid: {source}")]
    Descriptor {
        method: Method,
        path: String,
        handler: &'static str,
        #[source]
        source: DescriptorError,
    },

    #[error("{method} {path} is already registered")]
    DuplicateRoute { method: Method, path: String },

    #[error("{method} {path} conflicts with a registered route: {reason}")]
    PathConflict {
        method: Method,
        path: String,
        reason: String,
    },

    #[error("{method} {path} has no handlers")]
    EmptyChain { method: Method, path: String },

    #[error("method {0} is not supported by the router")]
    UnsupportedMethod(Method),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::FieldKind;

    const BINDINGS: &[FieldBinding] = &[FieldBinding {
        name: "UserID",
        ident: "user_id",
        kind: FieldKind::U64,
        optional: false,
        rules: &["required"],
    }];

    #[test]
    fn parse_error_wire_format() {
        let err = Error::from(ParseError::new(Place::Path, "UserID", "The 'abc' is not parseable to an integer"));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            err.body(),
            json!({
                "ParseError": {
                    "Place": "URL Path Parameter",
                    "FieldName": "UserID",
                    "Reason": "The 'abc' is not parseable to an integer"
                }
            })
        );
    }

    #[test]
    fn validation_error_uses_external_names() {
        let violation = RuleViolation::field_error("user_id", "non zero value required");
        let err = ValidationError::from_violation(Place::Query, violation, BINDINGS);
        assert_eq!(err.fields["UserID"], "non zero value required");
        assert_eq!(
            Error::from(err).body()["ValidationError"]["Place"],
            "Query Parameter"
        );
    }

    #[test]
    fn handler_errors_unwrap_framework_errors() {
        let inner = Error::Internal("boom".into());
        assert!(matches!(Error::handler(inner), Error::Internal(m) if m == "boom"));

        let wrapped = Error::handler("user not found");
        assert!(matches!(wrapped, Error::Handler(_)));
        assert_eq!(wrapped.body(), json!("user not found"));
        assert_eq!(wrapped.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn injection_errors_hide_the_cause() {
        let err = Error::from(InjectionError::NoSuchDependency {
            type_name: "Db",
            key: "default".into(),
        });
        assert_eq!(err.body(), json!(INTERNAL_ERROR_MESSAGE));
    }
}
