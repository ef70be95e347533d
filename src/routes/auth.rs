/**
 * Authentication Routes
 * Signup, login, profile management and the per-user activity log
 */
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{hash_password, verify_password, AdminUser, AuthUser, RequestMeta};
use crate::db::models::{
    page_count, page_offset, ActivityAction, ActivityLog, EntityType, NewUser, ProfileUpdate,
    Role, User,
};
use crate::error::{AppError, AppResult};
use crate::routes::upload::{save_image_field, AVATAR_DIR};
use crate::routes::{ApiJson, ApiQuery};
use crate::state::AppState;

const MIN_PASSWORD_LEN: usize = 6;
const MAX_BIO_LEN: usize = 500;
const INVALID_CREDENTIALS: &str = "Invalid credentials";

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Returned by signup and login.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub phone: String,
    pub bio: String,
    pub organization: String,
    pub avatar: String,
}

impl From<&User> for ProfileResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            phone: user.phone.clone(),
            bio: user.bio.clone(),
            organization: user.organization.clone(),
            avatar: user.avatar.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    #[serde(flatten)]
    pub profile: ProfileResponse,
    pub enrolled_courses: Vec<Uuid>,
    pub completed_courses: Vec<Uuid>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ProfileRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub organization: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AvatarResponse {
    pub avatar: String,
}

#[derive(Debug, Deserialize)]
pub struct UsersQuery {
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ActivityPage {
    pub activities: Vec<ActivityLog>,
    pub page: i64,
    pub pages: i64,
    pub total: i64,
}

// ============================================================================
// Validation
// ============================================================================

lazy_static::lazy_static! {
    /// Loose address check: one `@`, no whitespace, a dot in the domain.
    static ref EMAIL_REGEX: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
}

fn is_valid_email(email: &str) -> bool {
    EMAIL_REGEX.is_match(email)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Trimmed value, or `None` when absent or blank.
fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn auth_response(state: &AppState, user: &User) -> AppResult<AuthResponse> {
    let token = state.tokens.issue(user.id, user.role).map_err(|e| {
        tracing::error!("Failed to create token: {}", e);
        AppError::internal("Failed to create token")
    })?;
    Ok(AuthResponse {
        id: user.id,
        name: user.name.clone(),
        email: user.email.clone(),
        role: user.role,
        token,
    })
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/auth/signup
pub async fn register(
    State(state): State<AppState>,
    meta: RequestMeta,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> AppResult<impl IntoResponse> {
    let (Some(name), Some(email), Some(password)) = (
        present(payload.name),
        present(payload.email),
        payload.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::Validation("Please add all fields".to_string()));
    };

    if !is_valid_email(&email) {
        return Err(AppError::Validation("Invalid email format".to_string()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let role = match present(payload.role) {
        Some(role) => role
            .parse::<Role>()
            .map_err(|e| AppError::Validation(e.to_string()))?,
        None => Role::Student,
    };

    let password_hash = hash_password(password, state.config.bcrypt_cost).await?;

    let user = state
        .store
        .create_user(NewUser {
            name,
            email,
            password_hash,
            role,
        })
        .await?;

    tracing::info!("User registered: {} ({})", user.email, user.role);

    state
        .activity
        .log(
            user.id,
            ActivityAction::UpdateProfile,
            EntityType::User,
            Some(user.id),
            format!("User registered: {}", user.email),
            &meta,
        )
        .await;

    Ok((StatusCode::CREATED, Json(auth_response(&state, &user)?)))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    meta: RequestMeta,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    let (Some(email), Some(password)) = (
        present(payload.email),
        payload.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::Validation(
            "Please provide email and password".to_string(),
        ));
    };

    // Unknown email and wrong password must be indistinguishable.
    let Some(user) = state.store.find_user_by_email(&email).await? else {
        tracing::warn!("Login attempt for unknown user: {}", email);
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS.to_string()));
    };

    if !verify_password(password, user.password_hash.clone()).await? {
        tracing::warn!("Failed login attempt for: {}", user.email);
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS.to_string()));
    }

    tracing::info!("Login successful for: {}", user.email);

    state
        .activity
        .log(
            user.id,
            ActivityAction::Login,
            EntityType::Auth,
            Some(user.id),
            format!("User logged in: {}", user.email),
            &meta,
        )
        .await;

    Ok(Json(auth_response(&state, &user)?))
}

/// GET /api/auth/me
pub async fn me(AuthUser(user): AuthUser) -> Json<MeResponse> {
    Json(MeResponse {
        profile: ProfileResponse::from(&user),
        enrolled_courses: user.enrolled_courses,
        completed_courses: user.completed_courses,
    })
}

/// PUT /api/auth/profile
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    meta: RequestMeta,
    ApiJson(payload): ApiJson<ProfileRequest>,
) -> AppResult<Json<ProfileResponse>> {
    if let Some(bio) = &payload.bio {
        if bio.chars().count() > MAX_BIO_LEN {
            return Err(AppError::Validation(format!(
                "Bio cannot be more than {} characters",
                MAX_BIO_LEN
            )));
        }
    }

    let update = ProfileUpdate {
        // A blank name keeps the current one.
        name: present(payload.name),
        phone: payload.phone,
        bio: payload.bio,
        organization: payload.organization,
        avatar: payload.avatar,
    };

    let updated = state
        .store
        .update_profile(user.id, update)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    state
        .activity
        .log(
            updated.id,
            ActivityAction::UpdateProfile,
            EntityType::Profile,
            Some(updated.id),
            format!("Profile updated: {}", updated.email),
            &meta,
        )
        .await;

    Ok(Json(ProfileResponse::from(&updated)))
}

/// PUT /api/auth/change-password
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    meta: RequestMeta,
    ApiJson(payload): ApiJson<ChangePasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    let current = payload.current_password.unwrap_or_default();
    if current.is_empty()
        || !verify_password(current, user.password_hash.clone()).await?
    {
        return Err(AppError::Unauthorized(
            "Invalid current password".to_string(),
        ));
    }

    let new_password = payload.new_password.unwrap_or_default();
    if new_password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "New password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let password_hash = hash_password(new_password, state.config.bcrypt_cost).await?;
    if !state.store.set_password(user.id, &password_hash).await? {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    state
        .activity
        .log(
            user.id,
            ActivityAction::ChangePassword,
            EntityType::Auth,
            Some(user.id),
            "User changed password",
            &meta,
        )
        .await;

    Ok(Json(MessageResponse {
        message: "Password updated successfully".to_string(),
    }))
}

/// POST /api/auth/upload-avatar (multipart field `avatar`)
pub async fn upload_avatar(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    meta: RequestMeta,
    mut multipart: Multipart,
) -> AppResult<Json<AvatarResponse>> {
    let saved = save_image_field(
        &mut multipart,
        "avatar",
        &state.config.upload_dir,
        AVATAR_DIR,
        "Please upload a file",
    )
    .await?;

    let updated = state
        .store
        .update_profile(
            user.id,
            ProfileUpdate {
                avatar: Some(saved.url),
                ..Default::default()
            },
        )
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    state
        .activity
        .log(
            user.id,
            ActivityAction::UpdateProfile,
            EntityType::Profile,
            Some(user.id),
            "Uploaded new avatar",
            &meta,
        )
        .await;

    Ok(Json(AvatarResponse {
        avatar: updated.avatar,
    }))
}

/// GET /api/auth/users?role=
pub async fn list_users(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    ApiQuery(query): ApiQuery<UsersQuery>,
) -> AppResult<Json<Vec<User>>> {
    let role = present(query.role)
        .map(|r| r.parse::<Role>())
        .transpose()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    Ok(Json(state.store.list_users(role).await?))
}

/// GET /api/auth/activity?page&limit&userId
///
/// Admins may pass `userId` to read another user's log; for everyone else
/// it is ignored.
pub async fn my_activity(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiQuery(query): ApiQuery<ActivityQuery>,
) -> AppResult<Json<ActivityPage>> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(10).clamp(1, 100);

    let target = match query.user_id {
        Some(id) if user.is_admin() => id,
        _ => user.id,
    };

    let (activities, total) = state
        .store
        .list_activity(target, page_offset(page, limit), limit)
        .await?;

    Ok(Json(ActivityPage {
        activities,
        page,
        pages: page_count(total, limit),
        total,
    }))
}

/// POST /api/auth/logout
///
/// Tokens are stateless, so this only records the event.
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    meta: RequestMeta,
) -> Json<MessageResponse> {
    state
        .activity
        .log(
            user.id,
            ActivityAction::Logout,
            EntityType::Auth,
            Some(user.id),
            format!("User logged out: {}", user.email),
            &meta,
        )
        .await;

    Json(MessageResponse {
        message: "Logged out successfully".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::MemoryStore;
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::Extension;
    use axum::http::Request;
    use axum::routing::{get, post};
    use axum::Router;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let mut config = AppConfig::from_lookup(|key| match key {
            "DATABASE_URL" => Some("memory://".to_string()),
            "JWT_SECRET" => Some("test-secret".to_string()),
            _ => None,
        })
        .unwrap();
        config.bcrypt_cost = 4;
        AppState::new(Arc::new(MemoryStore::new()), config)
    }

    fn auth_router(state: AppState) -> Router {
        Router::new()
            .route("/api/auth/signup", post(register))
            .route("/api/auth/login", post(login))
            .route("/api/auth/me", get(me))
            .route("/api/auth/activity", get(my_activity))
            .with_state(state)
            .layer(Extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 12345)))))
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, json: &impl Serialize) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(json).unwrap()))
            .unwrap()
    }

    fn signup(email: &str) -> RegisterRequest {
        RegisterRequest {
            name: Some("Student One".to_string()),
            email: Some(email.to_string()),
            password: Some("Student@123".to_string()),
            role: None,
        }
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("student1@cmr.com"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("a b@cmr.com"));
        assert!(!is_valid_email("a@localhost"));
    }

    #[tokio::test]
    async fn test_signup_returns_token_and_defaults_to_student() {
        let app = auth_router(test_state());
        let (status, body) =
            send(app, post_json("/api/auth/signup", &signup("s1@cmr.com"))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["role"], "student");
        assert!(body["token"].as_str().is_some());
        assert!(body.get("password_hash").is_none());
    }

    #[tokio::test]
    async fn test_signup_missing_fields_returns_bad_request() {
        let app = auth_router(test_state());
        let (status, body) = send(
            app,
            post_json(
                "/api/auth/signup",
                &RegisterRequest {
                    email: Some("a@b.c".to_string()),
                    ..Default::default()
                },
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Please add all fields");
    }

    #[tokio::test]
    async fn test_signup_rejects_unknown_role_and_short_password() {
        let state = test_state();
        let mut bad_role = signup("r@cmr.com");
        bad_role.role = Some("teacher".to_string());
        let (status, _) = send(
            auth_router(state.clone()),
            post_json("/api/auth/signup", &bad_role),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut short = signup("p@cmr.com");
        short.password = Some("12345".to_string());
        let (status, _) = send(auth_router(state), post_json("/api/auth/signup", &short)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_duplicate_signup_returns_user_exists() {
        let state = test_state();
        send(
            auth_router(state.clone()),
            post_json("/api/auth/signup", &signup("dup@cmr.com")),
        )
        .await;
        let (status, body) = send(
            auth_router(state),
            post_json("/api/auth/signup", &signup("DUP@cmr.com")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "User already exists");
    }

    #[tokio::test]
    async fn test_login_empty_email_returns_bad_request() {
        let (status, _) = send(
            auth_router(test_state()),
            post_json(
                "/api/auth/login",
                &LoginRequest {
                    email: Some("".to_string()),
                    password: Some("Admin@123".to_string()),
                },
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_then_me() {
        let state = test_state();
        send(
            auth_router(state.clone()),
            post_json("/api/auth/signup", &signup("me@cmr.com")),
        )
        .await;

        let (status, body) = send(
            auth_router(state.clone()),
            post_json(
                "/api/auth/login",
                &LoginRequest {
                    email: Some("me@cmr.com".to_string()),
                    password: Some("Student@123".to_string()),
                },
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().unwrap().to_string();

        let req = Request::get("/api/auth/me")
            .header("authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(auth_router(state.clone()), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "me@cmr.com");
        assert_eq!(body["enrolledCourses"], serde_json::json!([]));
        assert_eq!(body["bio"], "");

        // signup + login were both recorded
        let req = Request::get("/api/auth/activity?limit=1")
            .header("authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(auth_router(state), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["pages"], 2);
        assert_eq!(body["activities"][0]["action"], "LOGIN");
        assert_eq!(body["activities"][0]["ipAddress"], "127.0.0.1");
    }

    #[tokio::test]
    async fn test_me_without_token_is_unauthorized() {
        let req = Request::get("/api/auth/me").body(Body::empty()).unwrap();
        let (status, body) = send(auth_router(test_state()), req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Not authorized, no token");
    }

    #[tokio::test]
    async fn test_me_with_garbage_token_is_unauthorized() {
        let req = Request::get("/api/auth/me")
            .header("authorization", "Bearer invalid.jwt.token")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(auth_router(test_state()), req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Not authorized, invalid token");
    }

    #[tokio::test]
    async fn test_me_for_deleted_user_is_unauthorized() {
        let state = test_state();
        let token = state.tokens.issue(Uuid::new_v4(), Role::Student).unwrap();
        let req = Request::get("/api/auth/me")
            .header("authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(auth_router(state), req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Not authorized, user not found");
    }
}
