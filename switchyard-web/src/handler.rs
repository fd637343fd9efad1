//! 处理器签名分析
//!
//! 处理器是普通函数或闭包。参数类型实现 [`Input`]，返回值类型实现 [`Output`]，
//! 通过按参数个数展开的 [`Handler`] 实现，在注册时得到输入槽和输出槽，
//! 在请求时完成参数提取和调用。
//!
//! ```ignore
//! fn show_user(ctx: &mut Context, user: Param<UserParam>, db: Inject<Db>) -> Result<Json<User>, Error> {
//!     ...
//! }
//! ```
//!
//! 需要请求上下文时，把 `&mut Context` 声明为第一个参数。

use crate::binding::{bind_fields, bind_json, Binding, Place};
use crate::context::{Context, ResponseBody};
use crate::descriptor::{HandlerDescriptor, InputSlot};
use crate::error::{DescriptorError, Error};
use bytes::Bytes;
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use switchyard_core::{
    BoxError, DependencyKind, InjectionKey, Injector, Resolved, DEFAULT_INJECTION_KEY,
};
use switchyard_validator::Validate;

/// 以请求上下文为缓存的注入器
pub type RequestInjector = Injector<Context>;

/// 参数提取阶段：所有绑定类参数先于注入类参数提取
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Bind,
    Inject,
}

/// 处理器参数
pub trait Input: Sized {
    const PHASE: Phase;

    /// 注册时确定参数的输入槽
    fn slot(injector: &RequestInjector) -> Result<InputSlot, DescriptorError>;

    /// 请求时提取参数；`Ok(None)` 表示 provider 没有可提供的值
    fn extract(ctx: &mut Context, injector: &RequestInjector) -> Result<Option<Self>, Error>;
}

macro_rules! container {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name<T>(pub T);

        impl<T> $name<T> {
            pub fn into_inner(self) -> T {
                self.0
            }
        }

        impl<T> Deref for $name<T> {
            type Target = T;

            fn deref(&self) -> &T {
                &self.0
            }
        }

        impl<T> DerefMut for $name<T> {
            fn deref_mut(&mut self) -> &mut T {
                &mut self.0
            }
        }
    };
}

container!(
    /// 路径参数聚合
    Param
);
container!(
    /// 查询参数聚合
    Query
);
container!(
    /// 表单聚合（urlencoded 或 multipart）
    Form
);
container!(
    /// JSON 请求体
    Body
);

fn flat_slot<T: Binding>(place: Place, slot: InputSlot) -> Result<InputSlot, DescriptorError> {
    match T::first_nested_field() {
        Some(field) => Err(DescriptorError::NotFlat {
            type_name: T::TYPE_NAME,
            field: field.name,
            place,
        }),
        None => Ok(slot),
    }
}

impl<T: Binding + Validate> Input for Param<T> {
    const PHASE: Phase = Phase::Bind;

    fn slot(_injector: &RequestInjector) -> Result<InputSlot, DescriptorError> {
        flat_slot::<T>(Place::Path, InputSlot::PathParams)
    }

    fn extract(ctx: &mut Context, _injector: &RequestInjector) -> Result<Option<Self>, Error> {
        bind_fields(&ctx.path_source()).map(|value| Some(Param(value)))
    }
}

impl<T: Binding + Validate> Input for Query<T> {
    const PHASE: Phase = Phase::Bind;

    fn slot(_injector: &RequestInjector) -> Result<InputSlot, DescriptorError> {
        flat_slot::<T>(Place::Query, InputSlot::QueryParams)
    }

    fn extract(ctx: &mut Context, _injector: &RequestInjector) -> Result<Option<Self>, Error> {
        bind_fields(&ctx.query_source()).map(|value| Some(Query(value)))
    }
}

impl<T: Binding + Validate> Input for Form<T> {
    const PHASE: Phase = Phase::Bind;

    fn slot(_injector: &RequestInjector) -> Result<InputSlot, DescriptorError> {
        Ok(InputSlot::FormFields)
    }

    fn extract(ctx: &mut Context, _injector: &RequestInjector) -> Result<Option<Self>, Error> {
        let source = ctx.form_source()?;
        bind_fields(&source).map(|value| Some(Form(value)))
    }
}

impl<T: DeserializeOwned + Validate> Input for Body<T> {
    const PHASE: Phase = Phase::Bind;

    fn slot(_injector: &RequestInjector) -> Result<InputSlot, DescriptorError> {
        Ok(InputSlot::JsonBody)
    }

    fn extract(ctx: &mut Context, _injector: &RequestInjector) -> Result<Option<Self>, Error> {
        bind_json(ctx.request_body()).map(|value| Some(Body(value)))
    }
}

/// 注入 key 标记类型，使用 [`inject_key!`](crate::inject_key) 声明
pub trait InjectKey: 'static {
    const KEY: &'static str;
}

/// 默认 key（`"default"`）
#[derive(Debug, Clone, Copy)]
pub struct DefaultKey;

impl InjectKey for DefaultKey {
    const KEY: &'static str = DEFAULT_INJECTION_KEY;
}

/// 声明一个注入 key 标记类型
///
/// ```ignore
/// inject_key!(pub Replica = "replica");
///
/// fn report(db: Inject<Db, Replica>) -> String { ... }
/// ```
#[macro_export]
macro_rules! inject_key {
    ($vis:vis $name:ident = $key:expr) => {
        #[derive(Debug, Clone, Copy)]
        $vis struct $name;

        impl $crate::handler::InjectKey for $name {
            const KEY: &'static str = $key;
        }
    };
}

/// 注入的依赖
pub struct Inject<T, K = DefaultKey>(pub Arc<T>, PhantomData<fn() -> K>);

impl<T, K> Inject<T, K> {
    pub fn new(value: Arc<T>) -> Self {
        Inject(value, PhantomData)
    }

    pub fn into_inner(self) -> Arc<T> {
        self.0
    }
}

impl<T, K> Clone for Inject<T, K> {
    fn clone(&self) -> Self {
        Inject(Arc::clone(&self.0), PhantomData)
    }
}

impl<T: fmt::Debug, K> fmt::Debug for Inject<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Inject").field(&self.0).finish()
    }
}

impl<T, K> Deref for Inject<T, K> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: Any + Send + Sync, K: InjectKey> Input for Inject<T, K> {
    const PHASE: Phase = Phase::Inject;

    fn slot(injector: &RequestInjector) -> Result<InputSlot, DescriptorError> {
        let key = InjectionKey::of::<T>(K::KEY);
        match injector.classify(&key) {
            Some(DependencyKind::Direct) => Ok(InputSlot::DirectDependency(key)),
            Some(DependencyKind::Computed) => Ok(InputSlot::ComputedDependency(key)),
            None => Err(DescriptorError::UnknownInput {
                type_name: std::any::type_name::<T>(),
            }),
        }
    }

    fn extract(ctx: &mut Context, injector: &RequestInjector) -> Result<Option<Self>, Error> {
        let key = InjectionKey::of::<T>(K::KEY);
        match injector.resolve(&key, ctx)? {
            Resolved::Value(shared) => shared
                .downcast::<T>()
                .map(|value| Some(Inject::new(value)))
                .map_err(|_| Error::Internal(format!("dependency {:?} has an unexpected type", key))),
            Resolved::Absent => Ok(None),
        }
    }
}

/// 输出槽类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputSlot {
    Error,
    ResponseBody,
    StatusCode,
    StopFlag,
}

/// 一次调用中某个输出槽的值
#[derive(Debug)]
pub enum OutputValue {
    Error(Error),
    Body(ResponseBody),
    Status(u16),
    Stop(bool),
    /// 槽存在但本次没有值，例如 `Ok` 一侧的错误槽
    Empty,
    /// 返回值本身无法使用，例如无法序列化的响应体
    Broken(Error),
}

/// 处理器返回值
pub trait Output {
    fn slots() -> Vec<OutputSlot>;

    /// 与 `slots()` 一一对应
    fn values(self) -> Vec<OutputValue>;
}

fn empty_values(count: usize) -> Vec<OutputValue> {
    std::iter::repeat_with(|| OutputValue::Empty).take(count).collect()
}

impl Output for () {
    fn slots() -> Vec<OutputSlot> {
        Vec::new()
    }

    fn values(self) -> Vec<OutputValue> {
        Vec::new()
    }
}

/// `true` 停止执行链
impl Output for bool {
    fn slots() -> Vec<OutputSlot> {
        vec![OutputSlot::StopFlag]
    }

    fn values(self) -> Vec<OutputValue> {
        vec![OutputValue::Stop(self)]
    }
}

impl Output for u16 {
    fn slots() -> Vec<OutputSlot> {
        vec![OutputSlot::StatusCode]
    }

    fn values(self) -> Vec<OutputValue> {
        vec![OutputValue::Status(self)]
    }
}

impl Output for i32 {
    fn slots() -> Vec<OutputSlot> {
        vec![OutputSlot::StatusCode]
    }

    fn values(self) -> Vec<OutputValue> {
        match u16::try_from(self) {
            Ok(code) => vec![OutputValue::Status(code)],
            Err(_) => vec![OutputValue::Broken(Error::Internal(format!(
                "handler returned invalid status code {}",
                self
            )))],
        }
    }
}

impl Output for StatusCode {
    fn slots() -> Vec<OutputSlot> {
        vec![OutputSlot::StatusCode]
    }

    fn values(self) -> Vec<OutputValue> {
        vec![OutputValue::Status(self.as_u16())]
    }
}

impl Output for Value {
    fn slots() -> Vec<OutputSlot> {
        vec![OutputSlot::ResponseBody]
    }

    fn values(self) -> Vec<OutputValue> {
        match self {
            Value::Null => vec![OutputValue::Empty],
            value => vec![OutputValue::Body(ResponseBody::Json(value))],
        }
    }
}

impl Output for String {
    fn slots() -> Vec<OutputSlot> {
        vec![OutputSlot::ResponseBody]
    }

    fn values(self) -> Vec<OutputValue> {
        Value::String(self).values()
    }
}

impl Output for &'static str {
    fn slots() -> Vec<OutputSlot> {
        vec![OutputSlot::ResponseBody]
    }

    fn values(self) -> Vec<OutputValue> {
        self.to_string().values()
    }
}

impl Output for Bytes {
    fn slots() -> Vec<OutputSlot> {
        vec![OutputSlot::ResponseBody]
    }

    fn values(self) -> Vec<OutputValue> {
        vec![OutputValue::Body(ResponseBody::Raw(self))]
    }
}

impl Output for Vec<u8> {
    fn slots() -> Vec<OutputSlot> {
        vec![OutputSlot::ResponseBody]
    }

    fn values(self) -> Vec<OutputValue> {
        Bytes::from(self).values()
    }
}

/// 任意可序列化的响应体
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T: Serialize> Output for Json<T> {
    fn slots() -> Vec<OutputSlot> {
        vec![OutputSlot::ResponseBody]
    }

    fn values(self) -> Vec<OutputValue> {
        match serde_json::to_value(self.0) {
            Ok(value) => value.values(),
            Err(e) => vec![OutputValue::Broken(Error::Internal(format!(
                "response body is not serializable: {}",
                e
            )))],
        }
    }
}

impl<T: Output> Output for Option<T> {
    fn slots() -> Vec<OutputSlot> {
        T::slots()
    }

    fn values(self) -> Vec<OutputValue> {
        match self {
            Some(value) => value.values(),
            None => empty_values(T::slots().len()),
        }
    }
}

impl<T: Output, E: Into<BoxError>> Output for Result<T, E> {
    fn slots() -> Vec<OutputSlot> {
        let mut slots = vec![OutputSlot::Error];
        slots.extend(T::slots());
        slots
    }

    fn values(self) -> Vec<OutputValue> {
        match self {
            Ok(value) => {
                let mut values = vec![OutputValue::Empty];
                values.extend(value.values());
                values
            }
            Err(e) => {
                let mut values = vec![OutputValue::Error(Error::handler(e))];
                values.extend(empty_values(T::slots().len()));
                values
            }
        }
    }
}

macro_rules! impl_output_tuple {
    ($($T:ident),+) => {
        impl<$($T: Output),+> Output for ($($T,)+) {
            fn slots() -> Vec<OutputSlot> {
                let mut slots = Vec::new();
                $(slots.extend($T::slots());)+
                slots
            }

            #[allow(non_snake_case)]
            fn values(self) -> Vec<OutputValue> {
                let ($($T,)+) = self;
                let mut values = Vec::new();
                $(values.extend($T.values());)+
                values
            }
        }
    };
}

impl_output_tuple!(A, B);
impl_output_tuple!(A, B, C);
impl_output_tuple!(A, B, C, D);

/// 一次调用的结果
#[derive(Debug)]
pub enum Invocation {
    /// 处理器已运行，按输出槽顺序的返回值
    Returned(Vec<OutputValue>),
    /// 参数提取失败，处理器没有运行
    Rejected(Error),
    /// provider 没有可提供的值，处理器没有运行
    Absent,
}

/// 处理器签名标记：不接收请求上下文
#[doc(hidden)]
pub struct Plain;

/// 处理器签名标记：第一个参数是 `&mut Context`
#[doc(hidden)]
pub struct WithContext;

/// 处理器，`M` 是签名标记，用来区分不同参数个数的实现
pub trait Handler<M>: Send + Sync + 'static {
    fn inputs(injector: &RequestInjector) -> Result<Vec<InputSlot>, DescriptorError>;

    fn outputs() -> Vec<OutputSlot>;

    fn invoke(&self, ctx: &mut Context, injector: &RequestInjector) -> Invocation;
}

// 先提取全部绑定类参数，再解析注入类参数
macro_rules! extract_inputs {
    ($ctx:ident, $injector:ident, $($A:ident),*) => {
        $(let mut $A: Option<$A> = None;)*
        for phase in [Phase::Bind, Phase::Inject] {
            $(
                if <$A as Input>::PHASE == phase {
                    match <$A as Input>::extract($ctx, $injector) {
                        Ok(Some(value)) => $A = Some(value),
                        Ok(None) => return Invocation::Absent,
                        Err(e) => return Invocation::Rejected(e),
                    }
                }
            )*
        }
        $(
            let Some($A) = $A else {
                return Invocation::Rejected(Error::Internal(format!(
                    "input {} was not extracted",
                    std::any::type_name::<$A>()
                )));
            };
        )*
    };
}

macro_rules! impl_handler {
    ($($A:ident),*) => {
        impl<F, R, $($A,)*> Handler<(Plain, R, $($A,)*)> for F
        where
            F: Fn($($A),*) -> R + Send + Sync + 'static,
            R: Output,
            $($A: Input,)*
        {
            fn inputs(_injector: &RequestInjector) -> Result<Vec<InputSlot>, DescriptorError> {
                Ok(vec![$(<$A as Input>::slot(_injector)?),*])
            }

            fn outputs() -> Vec<OutputSlot> {
                R::slots()
            }

            #[allow(non_snake_case, unused_variables, unused_mut, irrefutable_let_patterns)]
            fn invoke(&self, ctx: &mut Context, injector: &RequestInjector) -> Invocation {
                extract_inputs!(ctx, injector, $($A),*);
                Invocation::Returned((self)($($A),*).values())
            }
        }

        impl<F, R, $($A,)*> Handler<(WithContext, R, $($A,)*)> for F
        where
            F: Fn(&mut Context, $($A),*) -> R + Send + Sync + 'static,
            R: Output,
            $($A: Input,)*
        {
            fn inputs(_injector: &RequestInjector) -> Result<Vec<InputSlot>, DescriptorError> {
                Ok(vec![InputSlot::RequestContext, $(<$A as Input>::slot(_injector)?),*])
            }

            fn outputs() -> Vec<OutputSlot> {
                R::slots()
            }

            #[allow(non_snake_case, unused_variables, unused_mut, irrefutable_let_patterns)]
            fn invoke(&self, ctx: &mut Context, injector: &RequestInjector) -> Invocation {
                extract_inputs!(ctx, injector, $($A),*);
                Invocation::Returned((self)(ctx, $($A),*).values())
            }
        }
    };
}

impl_handler!();
impl_handler!(A1);
impl_handler!(A1, A2);
impl_handler!(A1, A2, A3);
impl_handler!(A1, A2, A3, A4);
impl_handler!(A1, A2, A3, A4, A5);
impl_handler!(A1, A2, A3, A4, A5, A6);
impl_handler!(A1, A2, A3, A4, A5, A6, A7);
impl_handler!(A1, A2, A3, A4, A5, A6, A7, A8);

/// 擦除签名标记后的处理器
pub(crate) trait ErasedHandler: Send + Sync {
    fn invoke(&self, ctx: &mut Context, injector: &RequestInjector) -> Invocation;
}

struct Erased<H, M> {
    handler: H,
    _marker: PhantomData<fn() -> M>,
}

impl<H, M> ErasedHandler for Erased<H, M>
where
    H: Handler<M>,
    M: 'static,
{
    fn invoke(&self, ctx: &mut Context, injector: &RequestInjector) -> Invocation {
        self.handler.invoke(ctx, injector)
    }
}

type BuildFn =
    dyn Fn(&RequestInjector, &Method) -> Result<HandlerDescriptor, DescriptorError> + Send + Sync;

/// 尚未分析的处理器，注册路由时针对注入器快照生成描述符
///
/// 同一个单元可以出现在多条路由上（分组的公共前置处理器）
#[derive(Clone)]
pub struct HandlerUnit {
    name: &'static str,
    build: Arc<BuildFn>,
}

impl HandlerUnit {
    pub fn new<H, M>(handler: H) -> Self
    where
        H: Handler<M>,
        M: 'static,
    {
        let name = std::any::type_name::<H>();
        let callable: Arc<dyn ErasedHandler> = Arc::new(Erased {
            handler,
            _marker: PhantomData::<fn() -> M>,
        });

        Self {
            name,
            build: Arc::new(move |injector: &RequestInjector, method: &Method| {
                HandlerDescriptor::build(
                    name,
                    H::inputs(injector)?,
                    H::outputs(),
                    Arc::clone(&callable),
                    method,
                )
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn describe(
        &self,
        injector: &RequestInjector,
        method: &Method,
    ) -> Result<HandlerDescriptor, DescriptorError> {
        (self.build)(injector, method)
    }
}

impl fmt::Debug for HandlerUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerUnit").field("name", &self.name).finish()
    }
}

/// 构造处理器列表：`handlers![auth, load_user, show_user]`
#[macro_export]
macro_rules! handlers {
    ($($handler:expr),* $(,)?) => {
        vec![$($crate::handler::HandlerUnit::new($handler)),*]
    };
}
