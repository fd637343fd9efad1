//! Switchyard Validator - 字段级声明式验证
//!
//! 绑定完成后对整个聚合执行验证，一次报告所有失败字段

// 派生宏生成的代码使用 `::switchyard_validator` 路径
extern crate self as switchyard_validator;

pub mod error;
pub mod validator;

pub use error::*;
pub use validator::*;

// 重新导出宏
pub use switchyard_validator_macros::Validate;
