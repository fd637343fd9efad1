//! 依赖注入注册表
//!
//! 按 (类型, key) 保存两类条目：
//! - **值**：启动时提供的对象，每次请求返回同一个实例
//! - **provider**：每个请求计算一次的函数，结果缓存在请求上下文中
//!
//! 注册只发生在启动阶段。引擎转换为服务时注册表被移动进 `Arc`，
//! 之后只读，请求处理路径上不需要加锁。

use crate::constants::DEFAULT_INJECTION_KEY;
use crate::error::{BoxError, InjectionError};
use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 注入值的共享形式
pub type Shared = Arc<dyn Any + Send + Sync>;

type ProviderFn<C> = Box<dyn Fn(&mut C) -> Result<Option<Shared>, BoxError> + Send + Sync>;

/// 注入条目的标识：声明类型 + 字符串 key
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct InjectionKey {
    type_id: TypeId,
    type_name: &'static str,
    key: Cow<'static, str>,
}

impl InjectionKey {
    pub fn of<T: Any>(key: impl Into<Cow<'static, str>>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            key: key.into(),
        }
    }

    /// 使用默认 key
    pub fn default_of<T: Any>() -> Self {
        Self::of::<T>(DEFAULT_INJECTION_KEY)
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for InjectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.type_name, self.key)
    }
}

/// 请求级缓存接口，由请求上下文实现
pub trait InjectionCache {
    fn cached(&self, key: &InjectionKey) -> Option<Shared>;
    fn cache(&mut self, key: InjectionKey, value: Shared);
}

/// 条目类别，注册阶段供描述符构建使用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    Direct,
    Computed,
}

/// 一次解析的结果
#[derive(Clone)]
pub enum Resolved {
    Value(Shared),
    /// provider 没有可提供的值，也没有出错
    Absent,
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolved::Value(_) => f.write_str("Value(..)"),
            Resolved::Absent => f.write_str("Absent"),
        }
    }
}

/// 依赖注入注册表，`C` 是请求上下文类型
pub struct Injector<C> {
    values: HashMap<InjectionKey, Shared>,
    providers: HashMap<InjectionKey, ProviderFn<C>>,
}

impl<C> fmt::Debug for Injector<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injector")
            .field("values", &self.values.keys().collect::<Vec<_>>())
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<C> Default for Injector<C> {
    fn default() -> Self {
        Self {
            values: HashMap::new(),
            providers: HashMap::new(),
        }
    }
}

impl<C: InjectionCache> Injector<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以默认 key 注册一个值
    pub fn provide<T: Any + Send + Sync>(&mut self, value: T) -> &mut Self {
        self.provide_keyed(DEFAULT_INJECTION_KEY, value)
    }

    /// 以指定 key 注册一个值
    pub fn provide_keyed<T: Any + Send + Sync>(
        &mut self,
        key: impl Into<Cow<'static, str>>,
        value: T,
    ) -> &mut Self {
        self.provide_shared(key, Arc::new(value))
    }

    /// 注册一个已经共享的值，注入时拿到的是同一个 `Arc`
    pub fn provide_shared<T: Any + Send + Sync>(
        &mut self,
        key: impl Into<Cow<'static, str>>,
        value: Arc<T>,
    ) -> &mut Self {
        let key = InjectionKey::of::<T>(key);
        if self.providers.remove(&key).is_some() {
            tracing::debug!(dependency = ?key, "Value replaces a previously registered provider");
        }
        self.values.insert(key, value);
        self
    }

    /// 以默认 key 注册 provider
    ///
    /// provider 返回 `Ok(None)` 表示"没有值也没有错误"，执行链会静默停止
    pub fn provide_computed<T, E, F>(&mut self, provider: F) -> &mut Self
    where
        T: Any + Send + Sync,
        E: Into<BoxError>,
        F: Fn(&mut C) -> Result<Option<T>, E> + Send + Sync + 'static,
    {
        self.provide_computed_keyed(DEFAULT_INJECTION_KEY, provider)
    }

    /// 以指定 key 注册 provider
    pub fn provide_computed_keyed<T, E, F>(
        &mut self,
        key: impl Into<Cow<'static, str>>,
        provider: F,
    ) -> &mut Self
    where
        T: Any + Send + Sync,
        E: Into<BoxError>,
        F: Fn(&mut C) -> Result<Option<T>, E> + Send + Sync + 'static,
    {
        let key = InjectionKey::of::<T>(key);
        if self.values.remove(&key).is_some() {
            tracing::debug!(dependency = ?key, "Provider replaces a previously registered value");
        }
        let erased: ProviderFn<C> = Box::new(move |ctx: &mut C| match provider(ctx) {
            Ok(Some(value)) => Ok(Some(Arc::new(value) as Shared)),
            Ok(None) => Ok(None),
            Err(e) => Err(e.into()),
        });
        self.providers.insert(key, erased);
        self
    }

    /// 查询 (类型, key) 的条目类别
    pub fn classify(&self, key: &InjectionKey) -> Option<DependencyKind> {
        if self.values.contains_key(key) {
            Some(DependencyKind::Direct)
        } else if self.providers.contains_key(key) {
            Some(DependencyKind::Computed)
        } else {
            None
        }
    }

    /// 解析依赖：请求缓存 -> 值 -> provider
    ///
    /// provider 的成功结果写入请求缓存，同一请求内不会再次调用
    pub fn resolve(&self, key: &InjectionKey, ctx: &mut C) -> Result<Resolved, InjectionError> {
        if let Some(hit) = ctx.cached(key) {
            return Ok(Resolved::Value(hit));
        }

        if let Some(value) = self.values.get(key) {
            return Ok(Resolved::Value(Arc::clone(value)));
        }

        let Some(provider) = self.providers.get(key) else {
            tracing::error!(dependency = ?key, "No value or provider registered for dependency");
            return Err(InjectionError::NoSuchDependency {
                type_name: key.type_name(),
                key: key.key().to_string(),
            });
        };

        match provider(ctx) {
            Ok(Some(value)) => {
                ctx.cache(key.clone(), Arc::clone(&value));
                Ok(Resolved::Value(value))
            }
            Ok(None) => {
                tracing::debug!(dependency = ?key, "Provider had no value to offer");
                Ok(Resolved::Absent)
            }
            Err(source) => Err(InjectionError::Provider {
                type_name: key.type_name(),
                key: key.key().to_string(),
                source,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len() + self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TestContext {
        user: Option<&'static str>,
        cache: HashMap<InjectionKey, Shared>,
    }

    impl InjectionCache for TestContext {
        fn cached(&self, key: &InjectionKey) -> Option<Shared> {
            self.cache.get(key).cloned()
        }

        fn cache(&mut self, key: InjectionKey, value: Shared) {
            self.cache.insert(key, value);
        }
    }

    #[derive(Debug, PartialEq)]
    struct Session(&'static str);

    fn value_of<T: Any + Send + Sync>(resolved: Resolved) -> Arc<T> {
        match resolved {
            Resolved::Value(v) => v.downcast::<T>().unwrap(),
            Resolved::Absent => panic!("expected a value"),
        }
    }

    #[test]
    fn test_keyed_values_are_distinct() {
        let mut injector = Injector::<TestContext>::new();
        injector.provide(String::from("primary"));
        injector.provide_keyed("replica", String::from("secondary"));

        let mut ctx = TestContext::default();
        let primary = injector
            .resolve(&InjectionKey::default_of::<String>(), &mut ctx)
            .unwrap();
        let replica = injector
            .resolve(&InjectionKey::of::<String>("replica"), &mut ctx)
            .unwrap();

        assert_eq!(*value_of::<String>(primary), "primary");
        assert_eq!(*value_of::<String>(replica), "secondary");
        assert_eq!(
            injector.classify(&InjectionKey::of::<String>("replica")),
            Some(DependencyKind::Direct)
        );
    }

    #[test]
    fn test_provider_runs_once_per_context() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut injector = Injector::<TestContext>::new();
        injector.provide_computed(move |ctx: &mut TestContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, BoxError>(ctx.user.map(Session))
        });

        let key = InjectionKey::default_of::<Session>();
        assert_eq!(injector.classify(&key), Some(DependencyKind::Computed));

        let mut ctx = TestContext {
            user: Some("ada"),
            ..Default::default()
        };
        let first = value_of::<Session>(injector.resolve(&key, &mut ctx).unwrap());
        let second = value_of::<Session>(injector.resolve(&key, &mut ctx).unwrap());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let mut other = TestContext {
            user: Some("grace"),
            ..Default::default()
        };
        let third = value_of::<Session>(injector.resolve(&key, &mut other).unwrap());
        assert_eq!(*third, Session("grace"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_absent_provider_result_is_not_cached() {
        let mut injector = Injector::<TestContext>::new();
        injector.provide_computed(|ctx: &mut TestContext| Ok::<_, BoxError>(ctx.user.map(Session)));

        let key = InjectionKey::default_of::<Session>();
        let mut ctx = TestContext::default();
        assert!(matches!(
            injector.resolve(&key, &mut ctx).unwrap(),
            Resolved::Absent
        ));
        assert!(ctx.cache.is_empty());
    }

    #[test]
    fn test_provider_failure_is_wrapped() {
        let mut injector = Injector::<TestContext>::new();
        injector.provide_computed_keyed("db", |_: &mut TestContext| {
            Err::<Option<u32>, _>("connection refused")
        });

        let err = injector
            .resolve(&InjectionKey::of::<u32>("db"), &mut TestContext::default())
            .unwrap_err();
        assert_eq!(err.key(), "db");
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_missing_dependency() {
        let injector = Injector::<TestContext>::new();
        let err = injector
            .resolve(&InjectionKey::default_of::<u64>(), &mut TestContext::default())
            .unwrap_err();
        assert!(matches!(err, InjectionError::NoSuchDependency { .. }));
        assert_eq!(err.type_name(), "u64");
        assert!(injector.is_empty());
    }

    #[test]
    fn test_later_registration_replaces_earlier() {
        let mut injector = Injector::<TestContext>::new();
        injector.provide(7u32);
        injector.provide_computed(|_: &mut TestContext| Ok::<_, BoxError>(Some(9u32)));

        let key = InjectionKey::default_of::<u32>();
        assert_eq!(injector.classify(&key), Some(DependencyKind::Computed));
        assert_eq!(injector.len(), 1);
    }
}
