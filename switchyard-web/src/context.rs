//! 请求上下文
//!
//! 每个请求创建一个 `Context`，在执行链中的处理器之间传递。它同时持有
//! 请求数据（只读）和正在构建的响应（状态码、响应头、响应体、停止标志），
//! 以及请求级的注入缓存和日志。

use crate::binding::{FieldSource, Place};
use crate::error::{Error, ParseError};
use crate::properties::{EngineProperties, MultipartProperties};
use crate::upload::FormData;
use axum::body::Body;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method, Response, StatusCode, Uri};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use switchyard_core::{InjectionCache, InjectionKey, LogLevel, Shared};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// 一个请求的原始数据
#[derive(Debug, Clone)]
pub struct RequestData {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub params: Vec<(String, String)>,
    pub matched_path: Option<String>,
}

impl RequestData {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            params: Vec::new(),
            matched_path: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_params(mut self, params: Vec<(String, String)>) -> Self {
        self.params = params;
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn with_matched_path(mut self, path: impl Into<String>) -> Self {
        self.matched_path = Some(path.into());
        self
    }
}

/// 响应体：原始字节原样写出，结构化值序列化为 JSON
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ResponseBody {
    #[default]
    Empty,
    Raw(Bytes),
    Json(Value),
}

impl ResponseBody {
    pub fn is_empty(&self) -> bool {
        matches!(self, ResponseBody::Empty)
    }
}

/// 一条请求级日志
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: LogLevel,
    pub message: String,
}

/// 请求级日志：写入 tracing 并缓存，供路由统计回调使用
#[derive(Debug, Clone)]
pub struct RequestLog {
    request_id: String,
    lines: Vec<LogLine>,
}

impl RequestLog {
    fn new(request_id: String) -> Self {
        Self {
            request_id,
            lines: Vec::new(),
        }
    }

    pub fn info(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(request_id = %self.request_id, "{}", message);
        self.push(LogLevel::Info, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(request_id = %self.request_id, "{}", message);
        self.push(LogLevel::Warn, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(request_id = %self.request_id, "{}", message);
        self.push(LogLevel::Error, message);
    }

    fn push(&mut self, level: LogLevel, message: String) {
        self.lines.push(LogLine { level, message });
    }

    pub fn lines(&self) -> &[LogLine] {
        &self.lines
    }
}

/// `Context::finalize` 的结果
#[derive(Debug)]
pub struct Finalized {
    pub response: Response<Body>,
    pub status: StatusCode,
    /// 响应体字节数
    pub size: usize,
    pub request_id: String,
    pub logs: Vec<LogLine>,
}

/// 请求上下文
pub struct Context {
    request: RequestData,
    query: Vec<(String, String)>,
    form: Option<FormData>,
    multipart: MultipartProperties,
    request_id: String,

    status: u16,
    headers: HeaderMap,
    body: ResponseBody,
    stopped: bool,
    pretty: bool,

    log: RequestLog,
    injected: HashMap<InjectionKey, Shared>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("request_id", &self.request_id)
            .field("method", &self.request.method)
            .field("uri", &self.request.uri)
            .field("status", &self.status)
            .field("stopped", &self.stopped)
            .finish()
    }
}

impl Context {
    pub fn new(request: RequestData) -> Self {
        let request_id = uuid::Uuid::new_v4().to_string();
        let query = match request.uri.query() {
            Some(raw) => serde_urlencoded::from_str(raw).unwrap_or_else(|e| {
                tracing::warn!(request_id = %request_id, error = %e, "Malformed query string ignored");
                Vec::new()
            }),
            None => Vec::new(),
        };

        Self {
            request,
            query,
            form: None,
            multipart: MultipartProperties::default(),
            log: RequestLog::new(request_id.clone()),
            request_id,
            status: 0,
            headers: HeaderMap::new(),
            body: ResponseBody::Empty,
            stopped: false,
            pretty: false,
            injected: HashMap::new(),
        }
    }

    pub fn with_properties(mut self, properties: &EngineProperties) -> Self {
        self.multipart = properties.multipart.clone();
        self.pretty = properties.pretty_json;
        self
    }

    // ==================== 请求 ====================

    pub fn method(&self) -> &Method {
        &self.request.method
    }

    pub fn uri(&self) -> &Uri {
        &self.request.uri
    }

    pub fn path(&self) -> &str {
        self.request.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.request.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn request_body(&self) -> &Bytes {
        &self.request.body
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.request.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        lookup(&self.request.params, name)
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        lookup(&self.query, name)
    }

    /// 路由模板，例如 `/user/:UserID`
    pub fn matched_path(&self) -> Option<&str> {
        self.request.matched_path.as_deref()
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// 解析后的表单，同一请求只解析一次
    pub fn form(&mut self) -> Result<&FormData, Error> {
        self.load_form()?;
        Ok(&*self.form.get_or_insert_with(FormData::default))
    }

    fn load_form(&mut self) -> Result<(), Error> {
        if self.form.is_none() {
            let form = FormData::parse(&self.request.headers, &self.request.body, &self.multipart)
                .map_err(|e| ParseError::new(Place::Form, "", e.to_string()))?;
            self.form = Some(form);
        }
        Ok(())
    }

    pub(crate) fn path_source(&self) -> FieldSource<'_> {
        FieldSource::path(&self.request.params)
    }

    pub(crate) fn query_source(&self) -> FieldSource<'_> {
        FieldSource::query(&self.query)
    }

    pub(crate) fn form_source(&mut self) -> Result<FieldSource<'_>, Error> {
        self.load_form()?;
        let this = &*self;
        match &this.form {
            Some(form) => Ok(FieldSource::form(form, &this.query)),
            None => Err(Error::Internal("form data was not loaded".to_string())),
        }
    }

    // ==================== 响应 ====================

    /// 设置状态码，第一次设置生效，之后的调用只记录警告
    pub fn set_status(&mut self, code: u16) {
        if self.status != 0 {
            let message = format!("Status code already set to {}, ignoring {}", self.status, code);
            self.log.warn(message);
            return;
        }
        self.status = code;
    }

    /// 无条件覆盖状态码
    pub fn force_status(&mut self, code: u16) {
        self.status = code;
    }

    /// 已设置的状态码，0 表示未设置
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => self.log.warn(format!("Invalid response header {}: {}", name, value)),
        }
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// 设置结构化响应体，finalize 时序列化为 JSON
    pub fn set_body<T: Serialize>(&mut self, value: T) {
        match serde_json::to_value(value) {
            Ok(value) => self.body = ResponseBody::Json(value),
            Err(e) => {
                self.log.error(format!("Response body is not serializable: {}", e));
                self.fail(500, Value::String(e.to_string()));
            }
        }
    }

    /// 设置原始字节响应体，原样写出
    pub fn set_raw_body(&mut self, body: impl Into<Bytes>) {
        self.body = ResponseBody::Raw(body.into());
    }

    pub fn replace_body(&mut self, body: ResponseBody) {
        self.body = body;
    }

    pub fn response_body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn stop_chain(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// 停止执行链 + 强制状态码 + 设置响应体
    pub fn fail<T: Serialize>(&mut self, code: u16, value: T) {
        self.stop_chain();
        self.force_status(code);
        self.body = match serde_json::to_value(value) {
            Ok(value) => ResponseBody::Json(value),
            Err(e) => ResponseBody::Json(Value::String(e.to_string())),
        };
    }

    pub fn log(&mut self) -> &mut RequestLog {
        &mut self.log
    }

    /// 生成最终响应，未设置状态码时默认 200
    pub fn finalize(self) -> Finalized {
        let Context {
            status,
            mut headers,
            body,
            pretty,
            mut log,
            request_id,
            ..
        } = self;

        let status = if status == 0 {
            StatusCode::OK
        } else {
            StatusCode::from_u16(status).unwrap_or_else(|_| {
                log.error(format!("Invalid status code {}, responding with 500", status));
                StatusCode::INTERNAL_SERVER_ERROR
            })
        };

        let bytes = match body {
            ResponseBody::Empty => Bytes::new(),
            ResponseBody::Raw(bytes) => bytes,
            ResponseBody::Json(value) => {
                headers
                    .entry(CONTENT_TYPE)
                    .or_insert(HeaderValue::from_static("application/json"));
                let encoded = if pretty {
                    serde_json::to_vec_pretty(&value)
                } else {
                    serde_json::to_vec(&value)
                };
                match encoded {
                    Ok(encoded) => Bytes::from(encoded),
                    Err(e) => {
                        log.error(format!("Failed to encode response body: {}", e));
                        Bytes::new()
                    }
                }
            }
        };

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            headers.insert(REQUEST_ID_HEADER, value);
        }

        let size = bytes.len();
        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;

        Finalized {
            response,
            status,
            size,
            request_id,
            logs: log.lines,
        }
    }
}

impl InjectionCache for Context {
    fn cached(&self, key: &InjectionKey) -> Option<Shared> {
        self.injected.get(key).cloned()
    }

    fn cache(&mut self, key: InjectionKey, value: Shared) {
        self.injected.insert(key, value);
    }
}

fn lookup<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}
