//! 执行链
//!
//! 按顺序运行一条路由上的处理器描述符。每一步的状态：
//!
//! ```text
//! Pending -> Bound -> Invoked -> Completed          (下一个处理器)
//!    |         |         |----> StoppedVoluntarily  (停止标志 / provider 无值)
//!    |         |         '----> Failed              (处理器错误 / panic)
//!    |         '--------------> Failed              (注入错误)
//!    '------------------------> Failed              (解析 / 校验错误，本地 400)
//! ```
//!
//! 注入错误、处理器错误和 panic 交给全局 `ErrorHandler`。

use crate::context::Context;
use crate::descriptor::HandlerDescriptor;
use crate::error::{Error, ErrorHandler, INTERNAL_ERROR_MESSAGE};
use crate::handler::{Invocation, OutputValue, RequestInjector};
use crate::stat::HandlerStat;
use http::StatusCode;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// 执行链的终止状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcome {
    /// 所有处理器都正常完成
    Completed,
    /// 停止标志被设置
    Stopped,
    Failed,
}

#[derive(Debug)]
pub struct ChainReport {
    pub outcome: ChainOutcome,
    pub handlers: Vec<HandlerStat>,
}

enum Step {
    Continue,
    Stopped,
    Failed(String),
}

pub struct ChainExecutor {
    injector: Arc<RequestInjector>,
    error_handler: Arc<dyn ErrorHandler>,
}

impl ChainExecutor {
    pub fn new(injector: Arc<RequestInjector>, error_handler: Arc<dyn ErrorHandler>) -> Self {
        Self {
            injector,
            error_handler,
        }
    }

    pub fn run(&self, chain: &[HandlerDescriptor], ctx: &mut Context) -> ChainReport {
        let mut handlers = Vec::with_capacity(chain.len());
        let mut outcome = ChainOutcome::Completed;

        for descriptor in chain {
            let started = Instant::now();
            let step = self.step(descriptor, ctx);

            let (error, next) = match step {
                Step::Continue => (None, None),
                Step::Stopped => (None, Some(ChainOutcome::Stopped)),
                Step::Failed(message) => (Some(message), Some(ChainOutcome::Failed)),
            };
            handlers.push(HandlerStat {
                name: descriptor.name(),
                duration: started.elapsed(),
                error,
                stopped: ctx.is_stopped(),
            });

            if let Some(next) = next {
                outcome = next;
                break;
            }
        }

        ChainReport { outcome, handlers }
    }

    fn step(&self, descriptor: &HandlerDescriptor, ctx: &mut Context) -> Step {
        let invocation = catch_unwind(AssertUnwindSafe(|| descriptor.invoke(ctx, &self.injector)));

        let values = match invocation {
            Ok(Invocation::Returned(values)) => values,
            Ok(Invocation::Absent) => {
                ctx.stop_chain();
                return Step::Stopped;
            }
            Ok(Invocation::Rejected(error)) if error.is_binding() => {
                let message = error.to_string();
                ctx.log().warn(format!("Request binding failed: {}", message));
                ctx.fail(StatusCode::BAD_REQUEST.as_u16(), error.body());
                return Step::Failed(message);
            }
            Ok(Invocation::Rejected(error)) => return self.escalate(error, ctx),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(
                    request_id = %ctx.request_id(),
                    handler = descriptor.name(),
                    error = %message,
                    "Handler panicked"
                );
                return self.escalate(Error::Panic(message), ctx);
            }
        };

        let mut failure = None;
        let mut effects = Vec::new();
        for (index, value) in values.into_iter().enumerate() {
            match value {
                OutputValue::Broken(error) => {
                    if failure.is_none() {
                        failure = Some(error);
                    }
                }
                OutputValue::Empty => {}
                value if !descriptor.is_effective(index) => drop(value),
                OutputValue::Error(error) => {
                    if failure.is_none() {
                        failure = Some(error);
                    }
                }
                value => effects.push(value),
            }
        }

        if let Some(error) = failure {
            return self.escalate(error, ctx);
        }

        for effect in effects {
            match effect {
                OutputValue::Status(code) => ctx.set_status(code),
                OutputValue::Body(body) if !body.is_empty() => ctx.replace_body(body),
                OutputValue::Stop(true) => ctx.stop_chain(),
                _ => {}
            }
        }

        if ctx.is_stopped() {
            Step::Stopped
        } else {
            Step::Continue
        }
    }

    /// 交给全局错误处理器，之后执行链总是停止
    fn escalate(&self, error: Error, ctx: &mut Context) -> Step {
        let message = error.to_string();
        let handled = catch_unwind(AssertUnwindSafe(|| self.error_handler.handle(&error, ctx)));

        if let Err(payload) = handled {
            let panic = panic_message(payload.as_ref());
            ctx.log().error(format!("Error handler panicked while handling '{}': {}", message, panic));
            ctx.fail(StatusCode::INTERNAL_SERVER_ERROR.as_u16(), INTERNAL_ERROR_MESSAGE);
        }

        ctx.stop_chain();
        Step::Failed(message)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic occurred".to_string()
    }
}
