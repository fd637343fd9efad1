//! 请求绑定
//!
//! 把路径参数、查询参数、表单字段、JSON 请求体转换成类型化的聚合，
//! 然后执行字段规则校验。字段表由 `#[derive(Binding)]` 在编译期生成。

use crate::error::{Error, ParseError, ValidationError};
use crate::upload::{FormData, UploadedFile};
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use switchyard_validator::Validate;

/// 数据来源，同时出现在错误信息中
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Place {
    Path,
    Query,
    Form,
    Body,
}

impl Place {
    pub fn as_str(&self) -> &'static str {
        match self {
            Place::Path => "URL Path Parameter",
            Place::Query => "Query Parameter",
            Place::Form => "Form Value",
            Place::Body => "Body",
        }
    }
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Place {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// 字段的目标类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    Str,
    File,
}

impl FieldKind {
    /// 可以从单个字符串值得到的类型
    pub fn is_flat(&self) -> bool {
        !matches!(self, FieldKind::File)
    }
}

/// 聚合中一个字段的绑定信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldBinding {
    /// 请求中的键名
    pub name: &'static str,
    /// Rust 字段名
    pub ident: &'static str,
    pub kind: FieldKind,
    pub optional: bool,
    /// `#[validate(...)]` 中声明的规则名
    pub rules: &'static [&'static str],
}

/// 可以从请求数据绑定的字段类型
pub trait FieldValue: Sized {
    const KIND: FieldKind;

    /// 从非空字符串转换，失败时返回原因
    fn from_text(raw: &str) -> Result<Self, String>;

    fn from_file(_file: UploadedFile) -> Result<Self, String> {
        Err("Was expecting a plain value, but got a file".to_string())
    }

    /// 请求中没有这个值时使用的值；None 表示必须提供
    fn missing() -> Option<Self>;
}

fn out_of_range(value: impl fmt::Display, lower: impl fmt::Display, upper: impl fmt::Display) -> String {
    format!("Supplied value {} is not in range [{}, {}]", value, lower, upper)
}

macro_rules! integer_field {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl FieldValue for $ty {
                const KIND: FieldKind = FieldKind::$kind;

                fn from_text(raw: &str) -> Result<Self, String> {
                    // 先按 128 位解析，超出目标宽度时报告范围而不是格式错误
                    let wide: i128 = raw
                        .parse()
                        .map_err(|_| format!("The '{}' is not parseable to an integer", raw))?;
                    <$ty>::try_from(wide).map_err(|_| out_of_range(wide, <$ty>::MIN, <$ty>::MAX))
                }

                fn missing() -> Option<Self> {
                    Some(0)
                }
            }
        )*
    };
}

integer_field!(
    i8 => I8, i16 => I16, i32 => I32, i64 => I64, isize => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64, usize => U64,
);

impl FieldValue for f64 {
    const KIND: FieldKind = FieldKind::F64;

    fn from_text(raw: &str) -> Result<Self, String> {
        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(value),
            Ok(value) => Err(out_of_range(value, f64::MIN, f64::MAX)),
            Err(_) => Err(format!("The '{}' is not parseable to float/double", raw)),
        }
    }

    fn missing() -> Option<Self> {
        Some(0.0)
    }
}

impl FieldValue for f32 {
    const KIND: FieldKind = FieldKind::F32;

    fn from_text(raw: &str) -> Result<Self, String> {
        let value = f64::from_text(raw)?;
        if value.abs() > f64::from(f32::MAX) {
            return Err(out_of_range(value, f32::MIN, f32::MAX));
        }
        Ok(value as f32)
    }

    fn missing() -> Option<Self> {
        Some(0.0)
    }
}

impl FieldValue for bool {
    const KIND: FieldKind = FieldKind::Bool;

    fn from_text(raw: &str) -> Result<Self, String> {
        match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(format!("The '{}' is not a boolean", raw)),
        }
    }

    fn missing() -> Option<Self> {
        Some(false)
    }
}

impl FieldValue for String {
    const KIND: FieldKind = FieldKind::Str;

    fn from_text(raw: &str) -> Result<Self, String> {
        Ok(raw.to_string())
    }

    fn missing() -> Option<Self> {
        Some(String::new())
    }
}

impl FieldValue for UploadedFile {
    const KIND: FieldKind = FieldKind::File;

    fn from_text(_raw: &str) -> Result<Self, String> {
        Err("Was expecting a file, but got a plain value".to_string())
    }

    fn from_file(file: UploadedFile) -> Result<Self, String> {
        Ok(file)
    }

    fn missing() -> Option<Self> {
        None
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    const KIND: FieldKind = T::KIND;

    fn from_text(raw: &str) -> Result<Self, String> {
        T::from_text(raw).map(Some)
    }

    fn from_file(file: UploadedFile) -> Result<Self, String> {
        T::from_file(file).map(Some)
    }

    fn missing() -> Option<Self> {
        Some(None)
    }
}

/// 一次绑定可见的请求数据
///
/// 路径参数缺失是解析错误；查询参数和表单字段缺失或为空时取零值，
/// 是否必填由字段规则决定。表单查找不到时回退到查询参数。
pub struct FieldSource<'a> {
    place: Place,
    values: &'a [(String, String)],
    fallback: &'a [(String, String)],
    files: Option<&'a HashMap<String, Vec<UploadedFile>>>,
}

impl<'a> FieldSource<'a> {
    pub fn path(params: &'a [(String, String)]) -> Self {
        Self {
            place: Place::Path,
            values: params,
            fallback: &[],
            files: None,
        }
    }

    pub fn query(pairs: &'a [(String, String)]) -> Self {
        Self {
            place: Place::Query,
            values: pairs,
            fallback: &[],
            files: None,
        }
    }

    pub fn form(form: &'a FormData, query: &'a [(String, String)]) -> Self {
        Self {
            place: Place::Form,
            values: &form.fields,
            fallback: query,
            files: Some(&form.files),
        }
    }

    pub fn place(&self) -> Place {
        self.place
    }

    fn lookup(&self, name: &str) -> Option<&'a str> {
        self.values
            .iter()
            .chain(self.fallback.iter())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// 读取并转换一个字段
    pub fn field<T: FieldValue>(&self, name: &'static str) -> Result<T, ParseError> {
        if T::KIND == FieldKind::File {
            let file = self
                .files
                .and_then(|files| files.get(name))
                .and_then(|list| list.first());
            return match file {
                Some(file) => T::from_file(file.clone())
                    .map_err(|reason| ParseError::new(self.place, name, reason)),
                None => T::missing().ok_or_else(|| {
                    ParseError::new(
                        self.place,
                        name,
                        "Was expecting a file, but could not find it in the request.",
                    )
                }),
            };
        }

        let raw = self.lookup(name);

        if self.place == Place::Path {
            let raw = raw.filter(|value| !value.is_empty()).ok_or_else(|| {
                ParseError::new(self.place, name, "Was expecting a path parameter, but it was not matched.")
            })?;
            return T::from_text(raw).map_err(|reason| ParseError::new(self.place, name, reason));
        }

        match raw.filter(|value| !value.is_empty()) {
            Some(raw) => T::from_text(raw).map_err(|reason| ParseError::new(self.place, name, reason)),
            None => T::missing().ok_or_else(|| {
                ParseError::new(self.place, name, "Was expecting a value, but could not find it in the request.")
            }),
        }
    }
}

/// 由 `#[derive(Binding)]` 实现：字段表 + 逐字段构造
pub trait Binding: Sized {
    const TYPE_NAME: &'static str;

    fn fields() -> &'static [FieldBinding];

    fn bind(source: &FieldSource<'_>) -> Result<Self, ParseError>;

    /// 第一个不能从单个字符串得到的字段
    fn first_nested_field() -> Option<&'static FieldBinding> {
        Self::fields().iter().find(|field| !field.kind.is_flat())
    }
}

/// 绑定一个字段聚合并执行规则校验
pub fn bind_fields<T: Binding + Validate>(source: &FieldSource<'_>) -> Result<T, Error> {
    let value = T::bind(source)?;
    value
        .validate()
        .map_err(|violation| ValidationError::from_violation(source.place(), violation, T::fields()))?;
    Ok(value)
}

/// 把请求体解码成一个 JSON 文档并执行规则校验
pub fn bind_json<T: DeserializeOwned + Validate>(body: &[u8]) -> Result<T, Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ParseError::new(Place::Body, "", "No request body was supplied").into());
    }
    let value: T = serde_json::from_slice(body)
        .map_err(|e| ParseError::new(Place::Body, "", e.to_string()))?;
    value
        .validate()
        .map_err(|violation| ValidationError::from_violation(Place::Body, violation, &[]))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Binding;
    use bytes::Bytes;
    use serde::Deserialize;
    use switchyard_validator::Validate;

    #[derive(Debug, Binding, Validate)]
    struct Limits {
        small: u8,
        signed: i8,
        ratio: f32,
        flag: bool,
        label: Option<String>,
    }

    #[derive(Debug, Binding, Validate)]
    struct SearchQuery {
        #[validate(alphanum)]
        #[bind(rename = "Name")]
        name: String,
        #[validate(required)]
        page: u32,
    }

    #[derive(Debug, Binding, Validate)]
    struct AvatarForm {
        title: String,
        avatar: UploadedFile,
        banner: Option<UploadedFile>,
    }

    #[derive(Debug, Deserialize, Validate)]
    struct CreateUser {
        #[validate(email)]
        email: String,
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn bind_small(raw: &str) -> Result<u8, ParseError> {
        let params = pairs(&[("small", raw)]);
        FieldSource::path(&params).field::<u8>("small")
    }

    #[test]
    fn unsigned_byte_boundaries() {
        assert_eq!(bind_small("255").unwrap(), 255);

        let err = bind_small("256").unwrap_err();
        assert_eq!(err.reason, "Supplied value 256 is not in range [0, 255]");
        assert_eq!(err.place, Place::Path);

        let err = bind_small("-1").unwrap_err();
        assert_eq!(err.reason, "Supplied value -1 is not in range [0, 255]");

        let err = bind_small("abc").unwrap_err();
        assert_eq!(err.reason, "The 'abc' is not parseable to an integer");
    }

    #[test]
    fn integer_round_trip() {
        for value in [i64::MIN, -1, 0, 42, i64::MAX] {
            let params = pairs(&[("id", &value.to_string())]);
            assert_eq!(FieldSource::path(&params).field::<i64>("id").unwrap(), value);
        }
        for value in [0u64, 7, u64::MAX] {
            let params = pairs(&[("id", &value.to_string())]);
            assert_eq!(FieldSource::path(&params).field::<u64>("id").unwrap(), value);
        }
    }

    #[test]
    fn booleans_and_floats() {
        let query = pairs(&[("a", "YES"), ("b", "0"), ("c", "maybe"), ("f", "1e39"), ("g", "2.5")]);
        let source = FieldSource::query(&query);

        assert!(source.field::<bool>("a").unwrap());
        assert!(!source.field::<bool>("b").unwrap());
        assert_eq!(source.field::<bool>("c").unwrap_err().reason, "The 'maybe' is not a boolean");
        assert!(source.field::<f32>("f").is_err());
        assert_eq!(source.field::<f64>("f").unwrap(), 1e39);
        assert_eq!(source.field::<f32>("g").unwrap(), 2.5);
    }

    #[test]
    fn missing_path_param_is_an_error() {
        let params = pairs(&[]);
        let err = FieldSource::path(&params).field::<String>("UserID").unwrap_err();
        assert_eq!(err.field, "UserID");
    }

    #[test]
    fn empty_path_param_is_an_error() {
        let params = pairs(&[("UserID", "")]);
        let source = FieldSource::path(&params);

        let err = source.field::<String>("UserID").unwrap_err();
        assert_eq!(err.place, Place::Path);
        assert_eq!(err.field, "UserID");
        assert!(source.field::<u64>("UserID").is_err());
    }

    #[test]
    fn missing_query_values_take_zero_value() {
        let query = pairs(&[("small", ""), ("signed", "-128")]);
        let limits: Limits = bind_fields(&FieldSource::query(&query)).unwrap();

        assert_eq!(limits.small, 0);
        assert_eq!(limits.signed, -128);
        assert_eq!(limits.ratio, 0.0);
        assert!(!limits.flag);
        assert_eq!(limits.label, None);
    }

    #[test]
    fn derived_field_table() {
        let fields = SearchQuery::fields();
        assert_eq!(fields[0].name, "Name");
        assert_eq!(fields[0].ident, "name");
        assert_eq!(fields[0].kind, FieldKind::Str);
        assert_eq!(fields[0].rules, &["alphanum"]);
        assert_eq!(fields[1].kind, FieldKind::U32);
        assert!(Limits::fields()[4].optional);
        assert_eq!(AvatarForm::first_nested_field().map(|f| f.name), Some("avatar"));
        assert_eq!(SearchQuery::first_nested_field(), None);
    }

    #[test]
    fn validation_reports_every_failing_field() {
        let query = pairs(&[("Name", "abc$")]);
        let err = bind_fields::<SearchQuery>(&FieldSource::query(&query)).unwrap_err();

        let err = match err {
            Error::Validation(err) => err,
            other => panic!("expected a validation error, got {:?}", other),
        };
        assert_eq!(err.place, Place::Query);
        assert_eq!(
            err.fields.keys().cloned().collect::<Vec<_>>(),
            vec!["Name".to_string(), "page".to_string()]
        );
        assert_eq!(err.fields["Name"], "abc$ does not validate as alphanumeric");
    }

    #[test]
    fn form_files_and_query_fallback() {
        let mut form = FormData::default();
        form.files.insert(
            "avatar".to_string(),
            vec![UploadedFile {
                field_name: "avatar".to_string(),
                file_name: Some("me.png".to_string()),
                content_type: Some("image/png".to_string()),
                data: Bytes::from_static(b"\x89PNG"),
            }],
        );
        let query = pairs(&[("title", "from-query")]);

        let bound: AvatarForm = bind_fields(&FieldSource::form(&form, &query)).unwrap();
        assert_eq!(bound.title, "from-query");
        assert_eq!(bound.avatar.extension(), Some("png"));
        assert!(bound.banner.is_none());

        let empty = FormData::default();
        let err = bind_fields::<AvatarForm>(&FieldSource::form(&empty, &[])).unwrap_err();
        assert!(matches!(err, Error::Parse(ref e) if e.field == "avatar" && e.place == Place::Form));
    }

    #[test]
    fn json_bodies() {
        let user: CreateUser = bind_json(br#"{"email":"dev@example.org"}"#).unwrap();
        assert_eq!(user.email, "dev@example.org");

        assert!(matches!(bind_json::<CreateUser>(b""), Err(Error::Parse(_))));
        assert!(matches!(bind_json::<CreateUser>(b"{"), Err(Error::Parse(_))));
        assert!(matches!(
            bind_json::<CreateUser>(br#"{"email":"nope"}"#),
            Err(Error::Validation(ref e)) if e.place == Place::Body && e.fields.contains_key("email")
        ));
    }
}
