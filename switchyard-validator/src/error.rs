use std::collections::BTreeMap;
use thiserror::Error;

/// 验证错误
///
/// 字段错误按字段名排序保存，同一个请求产生的错误信息顺序稳定
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Field validation errors: {}", summarize(.0))]
    FieldErrors(BTreeMap<String, Vec<String>>),
}

fn summarize(errors: &BTreeMap<String, Vec<String>>) -> String {
    errors
        .iter()
        .map(|(field, messages)| format!("{}: {}", field, messages.join("; ")))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::ValidationFailed(message.into())
    }

    pub fn field_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(field.into(), vec![message.into()]);
        Self::FieldErrors(errors)
    }

    /// 字段错误表，非字段错误返回 None
    pub fn field_errors(&self) -> Option<&BTreeMap<String, Vec<String>>> {
        match self {
            Self::FieldErrors(errors) => Some(errors),
            Self::ValidationFailed(_) => None,
        }
    }

    /// 把内部字段名换成对外名称（例如 `user_id` -> `UserID`）
    pub fn rename_fields(self, rename: impl Fn(&str) -> Option<&'static str>) -> Self {
        match self {
            Self::FieldErrors(errors) => Self::FieldErrors(
                errors
                    .into_iter()
                    .map(|(field, messages)| match rename(&field) {
                        Some(external) => (external.to_string(), messages),
                        None => (field, messages),
                    })
                    .collect(),
            ),
            other => other,
        }
    }
}

pub type ValidationResult<T> = Result<T, ValidationError>;
