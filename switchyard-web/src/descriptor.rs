//! 处理器描述符
//!
//! 注册时对每个处理器分析一次，之后只读

use crate::context::Context;
use crate::error::DescriptorError;
use crate::handler::{ErasedHandler, Invocation, OutputSlot, RequestInjector};
use http::Method;
use std::fmt;
use std::sync::Arc;
use switchyard_core::InjectionKey;

/// 输入槽：参数的数据来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSlot {
    PathParams,
    QueryParams,
    FormFields,
    JsonBody,
    DirectDependency(InjectionKey),
    ComputedDependency(InjectionKey),
    RequestContext,
}

impl InputSlot {
    pub fn kind(&self) -> &'static str {
        match self {
            InputSlot::PathParams => "Param",
            InputSlot::QueryParams => "Query",
            InputSlot::FormFields => "Form",
            InputSlot::JsonBody => "Body",
            InputSlot::DirectDependency(_) => "DirectDependency",
            InputSlot::ComputedDependency(_) => "ComputedDependency",
            InputSlot::RequestContext => "Context",
        }
    }

    /// 每个处理器最多声明一次的类别
    pub fn is_singular(&self) -> bool {
        !matches!(
            self,
            InputSlot::DirectDependency(_) | InputSlot::ComputedDependency(_)
        )
    }
}

/// 处理器描述符
#[derive(Clone)]
pub struct HandlerDescriptor {
    name: &'static str,
    inputs: Vec<InputSlot>,
    outputs: Vec<OutputSlot>,
    /// 同类输出槽后声明的生效
    effective: Vec<bool>,
    callable: Arc<dyn ErasedHandler>,
}

impl HandlerDescriptor {
    pub(crate) fn build(
        name: &'static str,
        inputs: Vec<InputSlot>,
        outputs: Vec<OutputSlot>,
        callable: Arc<dyn ErasedHandler>,
        method: &Method,
    ) -> Result<Self, DescriptorError> {
        for (i, slot) in inputs.iter().enumerate() {
            if slot.is_singular() && inputs[..i].contains(slot) {
                return Err(DescriptorError::DuplicateSlot { kind: slot.kind() });
            }
            if *method == Method::GET && matches!(slot, InputSlot::JsonBody | InputSlot::FormFields) {
                return Err(DescriptorError::BodyOnGet {
                    method: method.clone(),
                    kind: slot.kind(),
                });
            }
        }

        let effective = outputs
            .iter()
            .enumerate()
            .map(|(i, slot)| !outputs[i + 1..].contains(slot))
            .collect();

        Ok(Self {
            name,
            inputs,
            outputs,
            effective,
            callable,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn inputs(&self) -> &[InputSlot] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputSlot] {
        &self.outputs
    }

    pub fn is_effective(&self, index: usize) -> bool {
        self.effective.get(index).copied().unwrap_or(false)
    }

    pub fn invoke(&self, ctx: &mut Context, injector: &RequestInjector) -> Invocation {
        self.callable.invoke(ctx, injector)
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Body, HandlerUnit, Inject, Query};
    use crate::Binding;
    use serde::Deserialize;
    use switchyard_validator::Validate;

    #[derive(Debug, Binding, Validate)]
    struct PageQuery {
        page: u32,
    }

    #[derive(Debug, Deserialize, Validate)]
    struct Payload {}

    struct Clock;

    fn injector() -> RequestInjector {
        let mut injector = RequestInjector::new();
        injector.provide(Clock);
        injector.provide_computed(|_ctx: &mut Context| Ok::<_, std::io::Error>(Some(7u32)));
        injector
    }

    #[test]
    fn singular_slots_cannot_repeat() {
        fn twice(_a: Query<PageQuery>, _b: PageQuery) {}

        let err = HandlerUnit::new(twice)
            .describe(&injector(), &Method::GET)
            .unwrap_err();
        assert_eq!(err, DescriptorError::DuplicateSlot { kind: "Query" });
    }

    #[test]
    fn dependencies_may_repeat() {
        fn both(_a: Inject<Clock>, _b: Inject<Clock>, _n: Inject<u32>) {}

        let descriptor = HandlerUnit::new(both)
            .describe(&injector(), &Method::GET)
            .unwrap();
        assert_eq!(descriptor.inputs().len(), 3);
        assert!(matches!(descriptor.inputs()[2], InputSlot::ComputedDependency(_)));
    }

    #[test]
    fn body_is_rejected_on_get_only() {
        fn create(_body: Body<Payload>) {}

        let unit = HandlerUnit::new(create);
        assert_eq!(
            unit.describe(&injector(), &Method::GET).unwrap_err(),
            DescriptorError::BodyOnGet {
                method: Method::GET,
                kind: "Body"
            }
        );
        assert!(unit.describe(&injector(), &Method::DELETE).is_ok());
    }

    #[test]
    fn last_declared_output_kind_wins() {
        fn ambiguous() -> (u16, String, u16) {
            (200, String::new(), 201)
        }

        let descriptor = HandlerUnit::new(ambiguous)
            .describe(&injector(), &Method::GET)
            .unwrap();
        assert!(!descriptor.is_effective(0));
        assert!(descriptor.is_effective(1));
        assert!(descriptor.is_effective(2));
        assert!(!descriptor.is_effective(3));
    }
}
