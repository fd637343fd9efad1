//! Switchyard Web Macros
//!
//! `#[derive(Binding)]` 在编译期计算输入聚合的字段绑定表

mod binding;
mod utils;

use proc_macro::TokenStream;

/// Binding 宏
///
/// 为结构体生成字段绑定表和从请求数据构造实例的代码。类型名以
/// `Param`、`Query`、`Form` 结尾时，结构体本身可以直接作为处理器参数；
/// 以 `Body` 结尾时按 JSON 请求体整体解码（需要 `Deserialize`）。
/// 无论哪种角色都需要同时实现 `Validate`。
///
/// # 示例
///
/// ```ignore
/// #[derive(Binding, Validate)]
/// struct UserParam {
///     #[bind(rename = "UserID")]
///     user_id: u64,
/// }
///
/// fn show(param: UserParam) -> Json<u64> {
///     Json(param.user_id)
/// }
/// ```
#[proc_macro_derive(Binding, attributes(bind))]
pub fn derive_binding(input: TokenStream) -> TokenStream {
    binding::derive_binding_impl(input)
}
