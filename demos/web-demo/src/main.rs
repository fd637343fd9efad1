use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use switchyard_core::config::Environment;
use switchyard_core::LoggingConfig;
use switchyard_web::prelude::*;
use switchyard_web::RegistrationError;

// ==================== 数据模型 ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct User {
    id: u64,
    name: String,
    email: String,
}

#[derive(Debug, Binding, Validate)]
struct UserParam {
    #[bind(rename = "UserID")]
    user_id: u64,
}

#[derive(Debug, Binding, Validate)]
struct SearchQuery {
    #[bind(rename = "Name")]
    #[validate(alphanum)]
    name: String,
    page: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
struct CreateUserBody {
    #[validate(not_blank)]
    name: String,
    #[validate(email)]
    email: String,
}

#[derive(Debug, Binding, Validate)]
struct AvatarForm {
    #[validate(required)]
    avatar: UploadedFile,
}

// ==================== 依赖 ====================

struct UserStore {
    users: RwLock<BTreeMap<u64, User>>,
    next_id: AtomicU64,
}

impl UserStore {
    fn seeded() -> Self {
        let users = [(1, "ada", "ada@example.com"), (2, "grace", "grace@example.com")]
            .into_iter()
            .map(|(id, name, email)| {
                let user = User {
                    id,
                    name: name.to_string(),
                    email: email.to_string(),
                };
                (id, user)
            })
            .collect();

        Self {
            users: RwLock::new(users),
            next_id: AtomicU64::new(3),
        }
    }

    fn insert(&self, name: String, email: String) -> User {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let user = User { id, name, email };
        self.users.write().insert(id, user.clone());
        user
    }
}

/// 每个请求从 Authorization 头解析出的调用方
struct CurrentUser {
    name: String,
    admin: bool,
}

fn current_user(ctx: &mut Context) -> Result<Option<CurrentUser>, Error> {
    let Some(token) = ctx.header("authorization").map(str::to_string) else {
        ctx.fail(401, json!({ "error": "missing credentials" }));
        return Ok(None);
    };

    let name = token.trim_start_matches("Bearer ").to_string();
    Ok(Some(CurrentUser {
        admin: name == "admin",
        name,
    }))
}

// ==================== 处理器 ====================

fn health() -> &'static str {
    "ok"
}

fn show_user(param: UserParam, store: Inject<UserStore>) -> (StatusCode, Value) {
    let users = store.users.read();
    match users.get(&param.user_id) {
        Some(user) => (StatusCode::OK, json!(user)),
        None => (StatusCode::NOT_FOUND, json!({ "error": "user not found" })),
    }
}

fn search_users(query: SearchQuery, store: Inject<UserStore>) -> Json<Vec<User>> {
    let page = query.page.unwrap_or(1).max(1) as usize;
    let users = store
        .users
        .read()
        .values()
        .filter(|user| user.name.contains(&query.name))
        .skip((page - 1) * 10)
        .take(10)
        .cloned()
        .collect();
    Json(users)
}

fn create_user(body: Body<CreateUserBody>, store: Inject<UserStore>) -> (u16, Json<User>) {
    let body = body.into_inner();
    let user = store.insert(body.name, body.email);
    tracing::info!(user_id = user.id, "User created");
    (201, Json(user))
}

fn upload_avatar(ctx: &mut Context, param: UserParam, form: AvatarForm) -> Value {
    ctx.log().info(format!(
        "avatar for user {} ({} bytes)",
        param.user_id,
        form.avatar.size()
    ));
    json!({
        "user": param.user_id,
        "file": form.avatar.file_name,
        "size": form.avatar.size(),
    })
}

fn require_admin(ctx: &mut Context, user: Inject<CurrentUser>) {
    if !user.admin {
        ctx.fail(403, json!({ "error": format!("{} is not an administrator", user.name) }));
    }
}

fn stats(store: Inject<UserStore>) -> Value {
    let count = store.users.read().len();
    json!({ "users": count })
}

async fn echo(mut socket: WebSocket, session: SocketSession) {
    tracing::info!(request_id = %session.request_id, "WebSocket connected");

    while let Some(Ok(message)) = socket.recv().await {
        if let Message::Text(text) = message {
            if socket.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    }

    tracing::info!(request_id = %session.request_id, "WebSocket closed");
}

fn routes(engine: &mut Engine) -> Result<(), RegistrationError> {
    let mut root = engine.router();
    root.get("/health", handlers![health])?
        .get("/users", handlers![search_users])?
        .get("/users/:UserID", handlers![show_user])?
        .post("/users", handlers![create_user])?
        .post("/users/:UserID/avatar", handlers![upload_avatar])?
        .websocket("/ws/echo", handlers![], echo)?;

    let mut admin = root.group("/admin", handlers![require_admin]);
    admin.get("/stats", handlers![stats])?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = std::env::args().nth(1).map(PathBuf::from);
    let env = Environment::standard(config.as_deref())?;
    LoggingConfig::from_environment(&env).init()?;

    let mut engine = Engine::from_environment(&env);
    engine
        .provide(UserStore::seeded())
        .provide_computed(current_user);
    routes(&mut engine)?;

    SwitchyardServer::new(ServerProperties::from_environment(&env))
        .with_engine(engine)
        .run()
        .await?;

    Ok(())
}
