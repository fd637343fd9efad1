//! 引擎
//!
//! 启动阶段注册依赖和路由，`into_router` 把引擎转换成 axum `Router`。
//! 转换后注入器被移动进 `Arc`，只读共享，不能再注册。
//!
//! 每个请求：异步读取完整请求体，然后在 tokio 阻塞线程池上同步运行执行链，
//! 一个请求占用一个工作线程。

use crate::chain::{ChainExecutor, ChainOutcome, ChainReport};
use crate::context::{Context, RequestData};
use crate::descriptor::HandlerDescriptor;
use crate::error::{DefaultErrorHandler, ErrorHandler, RegistrationError, INTERNAL_ERROR_MESSAGE};
use crate::handler::{HandlerUnit, RequestInjector};
use crate::properties::EngineProperties;
use crate::router::{join_path, Group, RouteChain};
use crate::stat::{DefaultRouteCallback, NoOpRouteCallback, RouteCallback, RouteStat};
use crate::ws::{SocketRoute, SocketSession, WebSocketHandler};
use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, MatchedPath, RawPathParams, Request};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, MethodRouter};
use axum::Router;
use http::request::Parts;
use http::{Method, StatusCode};
use std::any::Any;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use switchyard_core::config::Environment;
use switchyard_core::BoxError;

pub struct Engine {
    injector: RequestInjector,
    routes: Vec<RouteChain>,
    sockets: Vec<SocketRoute>,
    // 与 axum 相同的匹配规则，注册时发现冲突
    templates: matchit::Router<()>,
    error_handler: Arc<dyn ErrorHandler>,
    route_callback: Option<Arc<dyn RouteCallback>>,
    properties: EngineProperties,
}

impl Default for Engine {
    fn default() -> Self {
        Self::with_properties(EngineProperties::default())
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("injector", &self.injector)
            .field("routes", &self.routes.len())
            .field("sockets", &self.sockets.len())
            .field("properties", &self.properties)
            .finish()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_properties(properties: EngineProperties) -> Self {
        Self {
            injector: RequestInjector::new(),
            routes: Vec::new(),
            sockets: Vec::new(),
            templates: matchit::Router::new(),
            error_handler: Arc::new(DefaultErrorHandler),
            route_callback: None,
            properties,
        }
    }

    pub fn from_environment(env: &Environment) -> Self {
        Self::with_properties(EngineProperties::from_environment(env))
    }

    pub fn properties(&self) -> &EngineProperties {
        &self.properties
    }

    // ==================== 依赖注入 ====================

    pub fn provide<T: Any + Send + Sync>(&mut self, value: T) -> &mut Self {
        self.injector.provide(value);
        self
    }

    pub fn provide_keyed<T: Any + Send + Sync>(
        &mut self,
        key: impl Into<Cow<'static, str>>,
        value: T,
    ) -> &mut Self {
        self.injector.provide_keyed(key, value);
        self
    }

    pub fn provide_shared<T: Any + Send + Sync>(
        &mut self,
        key: impl Into<Cow<'static, str>>,
        value: Arc<T>,
    ) -> &mut Self {
        self.injector.provide_shared(key, value);
        self
    }

    pub fn provide_computed<T, E, F>(&mut self, provider: F) -> &mut Self
    where
        T: Any + Send + Sync,
        E: Into<BoxError>,
        F: Fn(&mut Context) -> Result<Option<T>, E> + Send + Sync + 'static,
    {
        self.injector.provide_computed(provider);
        self
    }

    pub fn provide_computed_keyed<T, E, F>(
        &mut self,
        key: impl Into<Cow<'static, str>>,
        provider: F,
    ) -> &mut Self
    where
        T: Any + Send + Sync,
        E: Into<BoxError>,
        F: Fn(&mut Context) -> Result<Option<T>, E> + Send + Sync + 'static,
    {
        self.injector.provide_computed_keyed(key, provider);
        self
    }

    pub fn injector(&self) -> &RequestInjector {
        &self.injector
    }

    // ==================== 全局回调 ====================

    pub fn set_error_handler<H: ErrorHandler>(&mut self, handler: H) -> &mut Self {
        self.error_handler = Arc::new(handler);
        self
    }

    /// 未设置时按 `web.route-log` 选择默认回调或不记录
    pub fn set_route_callback<C: RouteCallback>(&mut self, callback: C) -> &mut Self {
        self.route_callback = Some(Arc::new(callback));
        self
    }

    // ==================== 路由 ====================

    /// 根分组
    pub fn router(&mut self) -> Group<'_> {
        Group::new(self, String::new(), Vec::new())
    }

    pub fn group(&mut self, prefix: &str, handlers: Vec<HandlerUnit>) -> Group<'_> {
        let prefix = join_path("", prefix);
        Group::new(self, prefix, handlers)
    }

    /// 注册一条路由，依赖必须在此之前注册
    pub fn register(
        &mut self,
        method: Method,
        path: &str,
        handlers: Vec<HandlerUnit>,
    ) -> Result<(), RegistrationError> {
        let filter = MethodFilter::try_from(method.clone())
            .map_err(|_| RegistrationError::UnsupportedMethod(method.clone()))?;

        if handlers.is_empty() {
            return Err(RegistrationError::EmptyChain {
                method,
                path: path.to_string(),
            });
        }
        if self.is_registered(&method, path) {
            return Err(RegistrationError::DuplicateRoute {
                method,
                path: path.to_string(),
            });
        }

        let descriptors = self.describe(&method, path, &handlers)?;
        self.claim_template(&method, path)?;
        tracing::debug!(method = %method, path, handlers = descriptors.len(), "Route registered");

        self.routes.push(RouteChain {
            method,
            filter,
            path: path.to_string(),
            descriptors,
        });
        Ok(())
    }

    /// 注册 WebSocket 路由，`handlers` 在升级前运行
    pub fn websocket<W: WebSocketHandler>(
        &mut self,
        path: &str,
        handlers: Vec<HandlerUnit>,
        socket: W,
    ) -> Result<(), RegistrationError> {
        if self.is_registered(&Method::GET, path) {
            return Err(RegistrationError::DuplicateRoute {
                method: Method::GET,
                path: path.to_string(),
            });
        }

        let descriptors = self.describe(&Method::GET, path, &handlers)?;
        self.claim_template(&Method::GET, path)?;
        tracing::debug!(path, handlers = descriptors.len(), "WebSocket route registered");

        self.sockets.push(SocketRoute {
            path: path.to_string(),
            descriptors,
            handler: Arc::new(socket),
        });
        Ok(())
    }

    pub fn routes(&self) -> &[RouteChain] {
        &self.routes
    }

    pub fn sockets(&self) -> &[SocketRoute] {
        &self.sockets
    }

    fn is_registered(&self, method: &Method, path: &str) -> bool {
        self.routes
            .iter()
            .any(|route| &route.method == method && route.path == path)
            || (*method == Method::GET && self.sockets.iter().any(|socket| socket.path == path))
    }

    /// 同一模板可以挂多个方法，新模板必须能与已有模板共存
    fn claim_template(&mut self, method: &Method, path: &str) -> Result<(), RegistrationError> {
        let known = self.routes.iter().any(|route| route.path == path)
            || self.sockets.iter().any(|socket| socket.path == path);
        if known {
            return Ok(());
        }

        self.templates.insert(path, ()).map_err(|e| {
            tracing::warn!(method = %method, path, error = %e, "Route template rejected");
            RegistrationError::PathConflict {
                method: method.clone(),
                path: path.to_string(),
                reason: e.to_string(),
            }
        })
    }

    fn describe(
        &self,
        method: &Method,
        path: &str,
        handlers: &[HandlerUnit],
    ) -> Result<Vec<HandlerDescriptor>, RegistrationError> {
        handlers
            .iter()
            .map(|unit| {
                unit.describe(&self.injector, method)
                    .map_err(|source| RegistrationError::Descriptor {
                        method: method.clone(),
                        path: path.to_string(),
                        handler: unit.name(),
                        source,
                    })
            })
            .collect()
    }

    /// 转换为 axum `Router`，模板冲突已在注册时排除
    pub fn into_router(self) -> Router {
        let Engine {
            injector,
            routes,
            sockets,
            error_handler,
            route_callback,
            properties,
            templates: _,
        } = self;

        let callback = route_callback.unwrap_or_else(|| {
            if properties.route_log {
                Arc::new(DefaultRouteCallback)
            } else {
                Arc::new(NoOpRouteCallback)
            }
        });
        let state = Arc::new(EngineState {
            executor: ChainExecutor::new(Arc::new(injector), error_handler),
            callback,
            properties,
        });

        let route_count = routes.len() + sockets.len();
        let mut paths: BTreeMap<String, MethodRouter> = BTreeMap::new();

        for route in routes {
            let chain = Arc::new(route.descriptors);
            let state = Arc::clone(&state);
            let handler = move |request: Request| {
                let state = Arc::clone(&state);
                let chain = Arc::clone(&chain);
                async move { state.dispatch(chain, request).await }
            };

            let entry = paths.remove(&route.path).unwrap_or_else(MethodRouter::new);
            paths.insert(route.path, entry.on(route.filter, handler));
        }

        for socket in sockets {
            let path = socket.path.clone();
            let socket = Arc::new(socket);
            let state = Arc::clone(&state);
            let handler = move |request: Request| {
                let state = Arc::clone(&state);
                let socket = Arc::clone(&socket);
                async move { state.dispatch_socket(socket, request).await }
            };

            let entry = paths.remove(&path).unwrap_or_else(MethodRouter::new);
            paths.insert(path, entry.on(MethodFilter::GET, handler));
        }

        let mut router = Router::new();
        for (path, method_router) in paths {
            router = router.route(&path, method_router);
        }

        tracing::info!(routes = route_count, "Router built");
        router
    }
}

/// 请求处理期间共享的只读状态
struct EngineState {
    executor: ChainExecutor,
    callback: Arc<dyn RouteCallback>,
    properties: EngineProperties,
}

impl EngineState {
    async fn dispatch(self: Arc<Self>, chain: Arc<Vec<HandlerDescriptor>>, request: Request) -> Response {
        let started = Instant::now();
        let (mut parts, body) = request.into_parts();
        let data = match self.collect(&mut parts, body).await {
            Ok(data) => data,
            Err(response) => return response,
        };

        let state = Arc::clone(&self);
        let job = tokio::task::spawn_blocking(move || {
            let (report, ctx) = state.run(&chain, data);
            state.complete(report, ctx, started)
        });

        match job.await {
            Ok(response) => response,
            Err(e) => worker_failed(e),
        }
    }

    async fn dispatch_socket(self: Arc<Self>, route: Arc<SocketRoute>, request: Request) -> Response {
        let started = Instant::now();
        let (mut parts, body) = request.into_parts();
        let upgrade = WebSocketUpgrade::from_request_parts(&mut parts, &()).await;
        let data = match self.collect(&mut parts, body).await {
            Ok(data) => data,
            Err(response) => return response,
        };

        let state = Arc::clone(&self);
        let before = Arc::clone(&route);
        let job = tokio::task::spawn_blocking(move || state.run(&before.descriptors, data));
        let (report, mut ctx) = match job.await {
            Ok(result) => result,
            Err(e) => return worker_failed(e),
        };

        if report.outcome != ChainOutcome::Completed {
            return self.complete(report, ctx, started);
        }

        match upgrade {
            Ok(upgrade) => {
                let session = SocketSession {
                    request_id: ctx.request_id().to_string(),
                    path: ctx.path().to_string(),
                    params: ctx.params().to_vec(),
                };
                let headers = ctx.response_headers().clone();
                let handler = Arc::clone(&route.handler);

                let mut response =
                    upgrade.on_upgrade(move |socket| async move { handler.handle(socket, session).await });
                response.headers_mut().extend(headers);

                let mut stat = self.stat(&ctx, report, started);
                stat.status = StatusCode::SWITCHING_PROTOCOLS;
                stat.logs = ctx.log().lines().to_vec();
                self.callback.on_route(&stat);
                response
            }
            Err(rejection) => {
                ctx.log().warn(format!("WebSocket upgrade rejected: {}", rejection));
                ctx.fail(StatusCode::UPGRADE_REQUIRED.as_u16(), rejection.to_string());
                self.complete(report, ctx, started)
            }
        }
    }

    /// 读取路径参数、路由模板和完整请求体
    async fn collect(&self, parts: &mut Parts, body: Body) -> Result<RequestData, Response> {
        let params = match RawPathParams::from_request_parts(parts, &()).await {
            Ok(params) => params
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            Err(_) => Vec::new(),
        };
        let matched_path = parts
            .extensions
            .get::<MatchedPath>()
            .map(|path| path.as_str().to_string());

        let body = axum::body::to_bytes(body, self.properties.max_body_size)
            .await
            .map_err(|e| {
                tracing::warn!(uri = %parts.uri, error = %e, "Failed to read request body");
                (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response()
            })?;

        Ok(RequestData {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
            body,
            params,
            matched_path,
        })
    }

    fn run(&self, chain: &[HandlerDescriptor], data: RequestData) -> (ChainReport, Context) {
        let mut ctx = Context::new(data).with_properties(&self.properties);
        let report = self.executor.run(chain, &mut ctx);
        (report, ctx)
    }

    fn complete(&self, report: ChainReport, ctx: Context, started: Instant) -> Response {
        let mut stat = self.stat(&ctx, report, started);
        let finalized = ctx.finalize();

        stat.status = finalized.status;
        stat.response_size = finalized.size;
        stat.logs = finalized.logs;
        stat.duration = started.elapsed();
        self.callback.on_route(&stat);

        finalized.response
    }

    fn stat(&self, ctx: &Context, report: ChainReport, started: Instant) -> RouteStat {
        RouteStat {
            method: ctx.method().clone(),
            uri: ctx.uri().clone(),
            matched_path: ctx.matched_path().unwrap_or_else(|| ctx.path()).to_string(),
            request_id: ctx.request_id().to_string(),
            handlers: report.handlers,
            duration: started.elapsed(),
            response_size: 0,
            status: StatusCode::OK,
            logs: Vec::new(),
        }
    }
}

fn worker_failed(error: tokio::task::JoinError) -> Response {
    tracing::error!(error = %error, "Request worker failed");
    (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::handler::{Body as JsonBody, Form, Inject, Json};
    use crate::upload::UploadedFile;
    use crate::{handlers, Binding};
    use http::header::CONTENT_TYPE;
    use serde::{Deserialize, Serialize};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use switchyard_validator::Validate;
    use tower::ServiceExt;

    #[derive(Debug, Binding, Validate)]
    struct UserParam {
        #[bind(rename = "UserID")]
        user_id: i64,
    }

    #[derive(Debug, Binding, Validate)]
    struct SearchQuery {
        #[bind(rename = "Name")]
        #[validate(alphanum)]
        name: String,
    }

    #[derive(Debug, Binding, Validate)]
    struct UploadForm {
        #[validate(required)]
        title: String,
        document: UploadedFile,
    }

    #[derive(Debug, Deserialize, Serialize, Validate)]
    struct NoteBody {
        #[validate(not_blank)]
        text: String,
    }

    struct Session {
        user: String,
    }

    fn show_user(user: UserParam) -> String {
        user.user_id.to_string()
    }

    async fn send(router: Router, request: Request) -> (StatusCode, http::HeaderMap, Vec<u8>) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body.to_vec())
    }

    fn get(uri: &str) -> Request {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn path_parameters_are_typed() {
        let mut engine = Engine::new();
        engine.router().get("/user/:UserID", handlers![|user: UserParam| Json(user.user_id)]).unwrap();
        let router = engine.into_router();

        let (status, headers, body) = send(router.clone(), get("/user/42")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(body, b"42");

        let (status, _, body) = send(router, get("/user/abc")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body = json(&body);
        assert_eq!(body["ParseError"]["FieldName"], "UserID");
        assert_eq!(body["ParseError"]["Place"], "URL Path Parameter");
    }

    #[tokio::test]
    async fn query_values_are_validated() {
        let mut engine = Engine::new();
        engine
            .router()
            .get("/search", handlers![|q: SearchQuery| q.name.clone()])
            .unwrap();
        let router = engine.into_router();

        let (status, _, body) = send(router.clone(), get("/search?Name=abc$")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json(&body)["ValidationError"]["Fields"].get("Name").is_some());

        let (status, _, body) = send(router, get("/search?Name=abc3")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body), json!("abc3"));
    }

    #[tokio::test]
    async fn provider_is_computed_once_per_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut engine = Engine::new();
        engine.provide_computed(move |ctx: &mut Context| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Error>(Some(Session {
                user: ctx.header("x-user").unwrap_or("anonymous").to_string(),
            }))
        });
        engine
            .router()
            .get(
                "/me",
                handlers![
                    |ctx: &mut Context, session: Inject<Session>| {
                        ctx.set_header("x-seen-by", &session.user);
                    },
                    |session: Inject<Session>| session.user.clone()
                ],
            )
            .unwrap();
        let router = engine.into_router();

        let request = Request::builder()
            .uri("/me")
            .header("x-user", "ada")
            .body(Body::empty())
            .unwrap();
        let (status, headers, body) = send(router.clone(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["x-seen-by"], "ada");
        assert_eq!(json(&body), json!("ada"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        send(router, get("/me")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn middleware_can_answer_early() {
        let reached = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&reached);

        let mut engine = Engine::new();
        {
            let mut root = engine.router();
            let mut api = root.group(
                "/api",
                handlers![|ctx: &mut Context| {
                    if ctx.header("authorization").is_none() {
                        ctx.fail(418, json!({"error": "teapot"}));
                    }
                }],
            );
            api.get(
                "/status",
                handlers![move || {
                    seen.fetch_add(1, Ordering::SeqCst);
                    "up"
                }],
            )
            .unwrap();
        }
        let router = engine.into_router();

        let (status, _, body) = send(router, get("/api/status")).await;
        assert_eq!(status.as_u16(), 418);
        assert_eq!(json(&body), json!({"error": "teapot"}));
        assert_eq!(reached.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn json_bodies_round_trip() {
        let mut engine = Engine::new();
        engine
            .router()
            .post(
                "/notes",
                handlers![|note: JsonBody<NoteBody>| (201u16, Json(note.into_inner()))],
            )
            .unwrap();
        let router = engine.into_router();

        let request = Request::builder()
            .method(Method::POST)
            .uri("/notes")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"text":"hello"}"#))
            .unwrap();
        let (status, _, body) = send(router.clone(), request).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json(&body), json!({"text": "hello"}));

        let request = Request::builder()
            .method(Method::POST)
            .uri("/notes")
            .body(Body::from(r#"{"text":"   "}"#))
            .unwrap();
        let (status, _, body) = send(router.clone(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["ValidationError"]["Place"], "Body");

        let request = Request::builder()
            .method(Method::POST)
            .uri("/notes")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["ParseError"]["Reason"], "No request body was supplied");
    }

    #[tokio::test]
    async fn multipart_uploads_bind_to_forms() {
        let mut engine = Engine::new();
        engine
            .router()
            .post(
                "/upload",
                handlers![|form: Form<UploadForm>| {
                    json!({
                        "title": form.title,
                        "name": form.document.file_name,
                        "size": form.document.size(),
                    })
                }],
            )
            .unwrap();
        let router = engine.into_router();

        let body = "--BOUNDARY\r\n\
                    Content-Disposition: form-data; name=\"title\"\r\n\r\n\
                    report\r\n\
                    --BOUNDARY\r\n\
                    Content-Disposition: form-data; name=\"document\"; filename=\"q3.csv\"\r\n\
                    Content-Type: text/csv\r\n\r\n\
                    a,b\r\n\
                    --BOUNDARY--\r\n";
        let request = Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .header(CONTENT_TYPE, "multipart/form-data; boundary=BOUNDARY")
            .body(Body::from(body))
            .unwrap();
        let (status, _, body) = send(router.clone(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body), json!({"title": "report", "name": "q3.csv", "size": 3}));

        let request = Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("title=report"))
            .unwrap();
        let (status, _, body) = send(router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["ParseError"]["FieldName"], "document");
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected() {
        let mut engine = Engine::with_properties(EngineProperties {
            max_body_size: 8,
            ..EngineProperties::default()
        });
        engine
            .router()
            .post("/notes", handlers![|_note: JsonBody<NoteBody>| ()])
            .unwrap();

        let request = Request::builder()
            .method(Method::POST)
            .uri("/notes")
            .body(Body::from(r#"{"text":"far too long"}"#))
            .unwrap();
        let (status, _, _) = send(engine.into_router(), request).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn panics_are_isolated() {
        let mut engine = Engine::new();
        engine
            .router()
            .get("/boom", handlers![|| -> String { panic!("kaboom") }])
            .unwrap()
            .get("/user/:UserID", handlers![show_user])
            .unwrap();
        let router = engine.into_router();

        let (status, _, body) = send(router.clone(), get("/boom")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json(&body), json!("handler panicked: kaboom"));

        let (status, _, _) = send(router, get("/user/7")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn route_callback_receives_statistics() {
        let stats = Arc::new(Mutex::new(Vec::<RouteStat>::new()));
        let sink = Arc::clone(&stats);

        let mut engine = Engine::new();
        engine.set_route_callback(move |stat: &RouteStat| {
            sink.lock().unwrap().push(stat.clone());
        });
        engine
            .router()
            .get("/user/:UserID", handlers![show_user])
            .unwrap();
        send(engine.into_router(), get("/user/9")).await;

        let stats = stats.lock().unwrap();
        assert_eq!(stats.len(), 1);
        let stat = &stats[0];
        assert_eq!(stat.matched_path, "/user/:UserID");
        assert_eq!(stat.status, StatusCode::OK);
        assert_eq!(stat.response_size, 3);
        assert_eq!(stat.handlers.len(), 1);
        assert!(stat.handlers[0].name.ends_with("show_user"));
    }

    #[tokio::test]
    async fn custom_error_handler_is_used() {
        let mut engine = Engine::new();
        engine.set_error_handler(|error: &Error, ctx: &mut Context| {
            ctx.fail(503, json!({ "message": error.to_string() }));
        });
        engine
            .router()
            .get("/down", handlers![|| Err::<(), _>("maintenance")])
            .unwrap();

        let (status, _, body) = send(engine.into_router(), get("/down")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json(&body), json!({"message": "maintenance"}));
    }

    #[tokio::test]
    async fn websocket_before_chain() {
        let mut engine = Engine::new();
        engine
            .websocket(
                "/ws/:room",
                handlers![|ctx: &mut Context| {
                    if ctx.query("token").is_none() {
                        ctx.fail(401, "token required");
                    }
                }],
                |_socket: axum::extract::ws::WebSocket, _session: SocketSession| async {},
            )
            .unwrap();
        assert!(matches!(
            engine.router().get("/ws/:room", handlers![|| ()]),
            Err(RegistrationError::DuplicateRoute { .. })
        ));
        let router = engine.into_router();

        let (status, _, body) = send(router.clone(), get("/ws/lobby")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json(&body), json!("token required"));

        // oneshot 请求无法升级
        let (status, _, _) = send(router, get("/ws/lobby?token=t")).await;
        assert_eq!(status, StatusCode::UPGRADE_REQUIRED);
    }

    #[tokio::test]
    async fn websocket_upgrade_echoes_messages() {
        use axum::extract::ws::{Message, WebSocket};
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message as ClientMessage;

        let mut engine = Engine::new();
        engine
            .websocket(
                "/ws/:room",
                handlers![|ctx: &mut Context| {
                    if ctx.query("token").is_none() {
                        ctx.fail(401, "token required");
                        return;
                    }
                    let room = ctx.param("room").unwrap_or_default().to_string();
                    ctx.set_header("x-room", &room);
                }],
                |mut socket: WebSocket, session: SocketSession| async move {
                    while let Some(Ok(Message::Text(text))) = socket.recv().await {
                        let reply = format!("{}: {}", session.param("room").unwrap_or_default(), text);
                        if socket.send(Message::Text(reply)).await.is_err() {
                            break;
                        }
                    }
                },
            )
            .unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let router = engine.into_router();
        tokio::spawn(async move { axum::serve(listener, router).await });

        let url = format!("ws://{}/ws/lobby?token=t", address);
        let (mut stream, response) = tokio_tungstenite::connect_async(url).await.unwrap();
        assert_eq!(response.status().as_u16(), 101);
        assert_eq!(response.headers()["x-room"], "lobby");

        stream.send(ClientMessage::Text("hello".into())).await.unwrap();
        let reply = stream.next().await.unwrap().unwrap();
        assert_eq!(reply, ClientMessage::Text("lobby: hello".into()));
    }

    #[test]
    fn conflicting_templates_fail_registration() {
        let mut engine = Engine::new();
        engine
            .router()
            .get("/user/:id", handlers![|| ()])
            .unwrap()
            .post("/user/:id", handlers![|| ()])
            .unwrap();

        let err = engine.router().put("/user/:name", handlers![|| ()]).unwrap_err();
        assert!(matches!(
            &err,
            RegistrationError::PathConflict { method, path, .. }
                if *method == Method::PUT && path == "/user/:name"
        ));

        let socket = |_socket: axum::extract::ws::WebSocket, _session: SocketSession| async {};
        let err = engine.websocket("/user/:other", handlers![], socket).unwrap_err();
        assert!(matches!(err, RegistrationError::PathConflict { .. }));

        assert_eq!(engine.routes().len(), 2);
        assert!(engine.sockets().is_empty());
        engine.router().get("/user/:id/posts", handlers![|| ()]).unwrap();
        let _router = engine.into_router();
    }

    #[test]
    fn missing_dependencies_fail_registration() {
        let mut engine = Engine::new();
        let err = engine
            .router()
            .get("/me", handlers![|_s: Inject<Session>| ()])
            .unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::Descriptor {
                source: crate::error::DescriptorError::UnknownInput { .. },
                ..
            }
        ));
    }
}
