use crate::error::{ValidationError, ValidationResult};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt::{self, Display};

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("email pattern compiles")
});

/// 验证器 trait
pub trait Validate {
    fn validate(&self) -> ValidationResult<()>;
}

/// "非零值" 判定，`required` 规则使用
///
/// 字符串非空、数字非零、布尔为 true、Option 为 Some、集合非空
pub trait Required {
    fn is_present(&self) -> bool;
}

impl Required for str {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

impl Required for String {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

impl Required for bool {
    fn is_present(&self) -> bool {
        *self
    }
}

impl<T> Required for Option<T> {
    fn is_present(&self) -> bool {
        self.is_some()
    }
}

impl<T> Required for Vec<T> {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

macro_rules! required_number {
    ($($ty:ty => $zero:expr),* $(,)?) => {
        $(
            impl Required for $ty {
                fn is_present(&self) -> bool {
                    *self != $zero
                }
            }
        )*
    };
}

required_number!(
    i8 => 0, i16 => 0, i32 => 0, i64 => 0, isize => 0,
    u8 => 0, u16 => 0, u32 => 0, u64 => 0, usize => 0,
    f32 => 0.0, f64 => 0.0,
);

fn message_or(custom_message: Option<&str>, default: impl FnOnce() -> String) -> String {
    custom_message.map(str::to_string).unwrap_or_else(default)
}

/// 验证规则
///
/// 字符串规则（alpha、alphanumeric、numeric、email、pattern、length）对空字符串
/// 直接放行，是否必填只由 `required` / `not_blank` 决定
pub struct ValidationRules;

impl ValidationRules {
    /// 验证非零值
    pub fn required<T: Required + ?Sized>(value: &T, field: &str) -> ValidationResult<()> {
        Self::required_with_message(value, field, None)
    }

    pub fn required_with_message<T: Required + ?Sized>(
        value: &T,
        field: &str,
        custom_message: Option<&str>,
    ) -> ValidationResult<()> {
        if !value.is_present() {
            return Err(ValidationError::field_error(
                field,
                message_or(custom_message, || "non zero value required".to_string()),
            ));
        }
        Ok(())
    }

    /// 验证字符串非空白
    pub fn not_blank(value: &str, field: &str) -> ValidationResult<()> {
        Self::not_blank_with_message(value, field, None)
    }

    pub fn not_blank_with_message(
        value: &str,
        field: &str,
        custom_message: Option<&str>,
    ) -> ValidationResult<()> {
        if value.trim().is_empty() {
            return Err(ValidationError::field_error(
                field,
                message_or(custom_message, || format!("{} must not be blank", field)),
            ));
        }
        Ok(())
    }

    /// 只包含 ASCII 字母
    pub fn alpha(value: &str, field: &str) -> ValidationResult<()> {
        Self::alpha_with_message(value, field, None)
    }

    pub fn alpha_with_message(
        value: &str,
        field: &str,
        custom_message: Option<&str>,
    ) -> ValidationResult<()> {
        Self::char_class(value, field, custom_message, "alpha", |c| c.is_ascii_alphabetic())
    }

    /// 只包含 ASCII 字母和数字
    pub fn alphanumeric(value: &str, field: &str) -> ValidationResult<()> {
        Self::alphanumeric_with_message(value, field, None)
    }

    pub fn alphanumeric_with_message(
        value: &str,
        field: &str,
        custom_message: Option<&str>,
    ) -> ValidationResult<()> {
        Self::char_class(value, field, custom_message, "alphanumeric", |c| {
            c.is_ascii_alphanumeric()
        })
    }

    /// 只包含十进制数字
    pub fn numeric(value: &str, field: &str) -> ValidationResult<()> {
        Self::numeric_with_message(value, field, None)
    }

    pub fn numeric_with_message(
        value: &str,
        field: &str,
        custom_message: Option<&str>,
    ) -> ValidationResult<()> {
        Self::char_class(value, field, custom_message, "numeric", |c| c.is_ascii_digit())
    }

    fn char_class(
        value: &str,
        field: &str,
        custom_message: Option<&str>,
        class: &str,
        accept: impl Fn(char) -> bool,
    ) -> ValidationResult<()> {
        if value.is_empty() || value.chars().all(accept) {
            return Ok(());
        }
        Err(ValidationError::field_error(
            field,
            message_or(custom_message, || {
                format!("{} does not validate as {}", value, class)
            }),
        ))
    }

    /// 验证邮箱格式
    pub fn email(value: &str, field: &str) -> ValidationResult<()> {
        Self::email_with_message(value, field, None)
    }

    pub fn email_with_message(
        value: &str,
        field: &str,
        custom_message: Option<&str>,
    ) -> ValidationResult<()> {
        if value.is_empty() || EMAIL.is_match(value) {
            return Ok(());
        }
        Err(ValidationError::field_error(
            field,
            message_or(custom_message, || format!("{} does not validate as email", value)),
        ))
    }

    /// 验证字符串长度（按字符计）
    pub fn length(
        value: &str,
        field: &str,
        min: Option<usize>,
        max: Option<usize>,
    ) -> ValidationResult<()> {
        Self::length_with_message(value, field, min, max, None)
    }

    pub fn length_with_message(
        value: &str,
        field: &str,
        min: Option<usize>,
        max: Option<usize>,
        custom_message: Option<&str>,
    ) -> ValidationResult<()> {
        if value.is_empty() {
            return Ok(());
        }
        let len = value.chars().count();

        if let Some(min_len) = min.filter(|m| len < *m) {
            return Err(ValidationError::field_error(
                field,
                message_or(custom_message, || {
                    format!("{} length must be at least {}, but was {}", field, min_len, len)
                }),
            ));
        }

        if let Some(max_len) = max.filter(|m| len > *m) {
            return Err(ValidationError::field_error(
                field,
                message_or(custom_message, || {
                    format!("{} length must be at most {}, but was {}", field, max_len, len)
                }),
            ));
        }

        Ok(())
    }

    /// 验证数值范围（闭区间）
    pub fn range<T: PartialOrd + Display>(
        value: T,
        field: &str,
        min: Option<T>,
        max: Option<T>,
    ) -> ValidationResult<()> {
        Self::range_with_message(value, field, min, max, None)
    }

    pub fn range_with_message<T: PartialOrd + Display>(
        value: T,
        field: &str,
        min: Option<T>,
        max: Option<T>,
        custom_message: Option<&str>,
    ) -> ValidationResult<()> {
        if let Some(min_val) = min.filter(|m| value < *m) {
            return Err(ValidationError::field_error(
                field,
                message_or(custom_message, || {
                    format!("{} must be at least {}, but was {}", field, min_val, value)
                }),
            ));
        }

        if let Some(max_val) = max.filter(|m| value > *m) {
            return Err(ValidationError::field_error(
                field,
                message_or(custom_message, || {
                    format!("{} must be at most {}, but was {}", field, max_val, value)
                }),
            ));
        }

        Ok(())
    }

    /// 验证正则表达式
    pub fn pattern(value: &str, field: &str, pattern: &str) -> ValidationResult<()> {
        Self::pattern_with_message(value, field, pattern, None)
    }

    pub fn pattern_with_message(
        value: &str,
        field: &str,
        pattern: &str,
        custom_message: Option<&str>,
    ) -> ValidationResult<()> {
        if value.is_empty() {
            return Ok(());
        }
        let regex = Regex::new(pattern).map_err(|e| invalid_pattern(field, pattern, &e))?;
        match_pattern(value, field, &regex, pattern, custom_message)
    }

    /// 与 `pattern_with_message` 相同，但复用已编译的正则
    pub fn compiled_pattern_with_message(
        value: &str,
        field: &str,
        pattern: &CompiledPattern,
        custom_message: Option<&str>,
    ) -> ValidationResult<()> {
        if value.is_empty() {
            return Ok(());
        }
        let regex = pattern
            .regex()
            .map_err(|e| invalid_pattern(field, pattern.source(), e))?;
        match_pattern(value, field, regex, pattern.source(), custom_message)
    }
}

fn match_pattern(
    value: &str,
    field: &str,
    regex: &Regex,
    pattern: &str,
    custom_message: Option<&str>,
) -> ValidationResult<()> {
    if !regex.is_match(value) {
        return Err(ValidationError::field_error(
            field,
            message_or(custom_message, || {
                format!("{} does not validate as {}", value, pattern)
            }),
        ));
    }
    Ok(())
}

fn invalid_pattern(field: &str, pattern: &str, error: &regex::Error) -> ValidationError {
    tracing::error!(field, pattern, error = %error, "Invalid validation pattern");
    ValidationError::field_error(field, format!("invalid pattern {}: {}", pattern, error))
}

/// 首次使用时编译并缓存的正则
///
/// `#[derive(Validate)]` 为每条 `pattern` 规则生成一个 `static` 实例
pub struct CompiledPattern {
    source: &'static str,
    regex: OnceCell<Result<Regex, regex::Error>>,
}

impl CompiledPattern {
    pub const fn new(source: &'static str) -> Self {
        Self {
            source,
            regex: OnceCell::new(),
        }
    }

    pub fn source(&self) -> &'static str {
        self.source
    }

    pub fn regex(&self) -> Result<&Regex, &regex::Error> {
        self.regex.get_or_init(|| Regex::new(self.source)).as_ref()
    }
}

impl fmt::Debug for CompiledPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledPattern")
            .field("source", &self.source)
            .field("compiled", &self.regex.get().is_some())
            .finish()
    }
}

/// 验证器构建器，收集所有字段的错误
#[derive(Debug, Default)]
pub struct ValidatorBuilder {
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn add_result(&mut self, result: ValidationResult<()>) {
        match result {
            Ok(()) => {}
            Err(ValidationError::FieldErrors(errors)) => {
                for (field, messages) in errors {
                    self.errors.entry(field).or_default().extend(messages);
                }
            }
            Err(ValidationError::ValidationFailed(message)) => {
                self.add_error("", message);
            }
        }
    }

    pub fn build(self) -> ValidationResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::FieldErrors(self.errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_validator_macros::Validate;

    #[test]
    fn test_alphanumeric() {
        assert!(ValidationRules::alphanumeric("abc3", "Name").is_ok());
        assert!(ValidationRules::alphanumeric("", "Name").is_ok());

        let err = ValidationRules::alphanumeric("abc$", "Name").unwrap_err();
        assert_eq!(
            err.field_errors().unwrap()["Name"],
            vec!["abc$ does not validate as alphanumeric".to_string()]
        );
    }

    #[test]
    fn test_required() {
        assert!(ValidationRules::required("", "name").is_err());
        assert!(ValidationRules::required(&0u8, "age").is_err());
        assert!(ValidationRules::required(&0.5f64, "ratio").is_ok());
        assert!(ValidationRules::required(&None::<u8>, "limit").is_err());
        assert!(ValidationRules::required(&Some(0u8), "limit").is_ok());
        assert!(ValidationRules::required(&false, "accepted").is_err());
    }

    #[test]
    fn test_numeric_and_alpha() {
        assert!(ValidationRules::numeric("0042", "zip").is_ok());
        assert!(ValidationRules::numeric("-42", "zip").is_err());
        assert!(ValidationRules::alpha("abc", "word").is_ok());
        assert!(ValidationRules::alpha("ab1", "word").is_err());
    }

    #[test]
    fn test_length_counts_chars() {
        assert!(ValidationRules::length("ğüş", "name", Some(3), Some(3)).is_ok());
        assert!(ValidationRules::length("ab", "name", Some(3), None).is_err());
        assert!(ValidationRules::length("abcd", "name", None, Some(3)).is_err());
    }

    #[test]
    fn test_range_with_message() {
        let err = ValidationRules::range_with_message(11, "page", Some(1), Some(10), Some("page out of range"))
            .unwrap_err();
        assert_eq!(err.field_errors().unwrap()["page"], vec!["page out of range".to_string()]);
        assert!(ValidationRules::range(1.5, "ratio", Some(0.0), Some(2.0)).is_ok());
    }

    #[test]
    fn test_email_and_pattern() {
        assert!(ValidationRules::email("dev@example.org", "email").is_ok());
        assert!(ValidationRules::email("dev@", "email").is_err());
        assert!(ValidationRules::pattern("AB-12", "code", r"^[A-Z]{2}-\d+$").is_ok());
        assert!(ValidationRules::pattern("ab-12", "code", r"^[A-Z]{2}-\d+$").is_err());
        assert!(ValidationRules::pattern("x", "code", "(").is_err());
    }

    #[test]
    fn compiled_pattern_is_reused() {
        static CODE: CompiledPattern = CompiledPattern::new(r"^[A-Z]{2}-\d+$");

        assert!(ValidationRules::compiled_pattern_with_message("AB-12", "code", &CODE, None).is_ok());
        let first = CODE.regex().unwrap() as *const Regex;
        let err = ValidationRules::compiled_pattern_with_message("ab-12", "code", &CODE, None).unwrap_err();
        assert_eq!(
            err.field_errors().unwrap()["code"],
            vec![r"ab-12 does not validate as ^[A-Z]{2}-\d+$".to_string()]
        );
        assert_eq!(CODE.regex().unwrap() as *const Regex, first);
        assert!(ValidationRules::compiled_pattern_with_message("", "code", &CODE, None).is_ok());

        static BROKEN: CompiledPattern = CompiledPattern::new("(");
        assert!(ValidationRules::compiled_pattern_with_message("x", "code", &BROKEN, None).is_err());
    }

    #[derive(Validate)]
    struct Ticket {
        #[validate(pattern(regex = r"^T\d{3}$", message = "bad ticket"))]
        code: String,
        #[validate(pattern = "^[a-z]+$")]
        tag: Option<String>,
    }

    #[test]
    fn derived_patterns() {
        let ticket = Ticket {
            code: "T123".to_string(),
            tag: Some("ops".to_string()),
        };
        assert!(ticket.validate().is_ok());
        assert!(ticket.validate().is_ok());

        let ticket = Ticket {
            code: "X1".to_string(),
            tag: Some("Ops".to_string()),
        };
        let errors = ticket.validate().unwrap_err();
        let fields = errors.field_errors().unwrap();
        assert_eq!(fields["code"], vec!["bad ticket".to_string()]);
        assert_eq!(fields["tag"], vec!["Ops does not validate as ^[a-z]+$".to_string()]);
    }

    #[test]
    fn test_builder_collects_every_field() {
        let mut validator = ValidatorBuilder::new();
        validator.add_result(ValidationRules::alphanumeric("a b", "Name"));
        validator.add_result(ValidationRules::required("", "Email"));
        validator.add_result(ValidationRules::alpha("ok", "Word"));

        let err = validator.build().unwrap_err();
        let fields = err.field_errors().unwrap();
        assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["Email", "Name"]);
    }

    #[test]
    fn test_rename_fields() {
        let err = ValidationError::field_error("user_id", "non zero value required")
            .rename_fields(|f| (f == "user_id").then_some("UserID"));
        assert!(err.field_errors().unwrap().contains_key("UserID"));
    }
}
