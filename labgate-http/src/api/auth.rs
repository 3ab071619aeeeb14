use poem::web::Data;
use poem_openapi::payload::Json;
use poem_openapi::{ApiResponse, Object, OpenApi};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use labgate_common::helpers::hash::{hash_password, verify_password_hash};
use labgate_common::{LabgateError, Secret};
use labgate_core::alerts::{event_kind, SecurityEvent};
use labgate_core::auth::AuthError;
use labgate_core::consts::REVOKE_REASON_PASSWORD_CHANGE;
use labgate_core::rate_limiting::LoginGate;
use labgate_core::Services;
use labgate_db_entities::User::{self, UserRole};

use crate::common::{auth_error_body, format_retry_after, AuthzHeader, ErrorBody, ReqCtx};

pub struct Api;

#[derive(Object)]
struct LoginRequest {
    username: String,
    password: Secret<String>,
}

#[derive(Object)]
struct UserProfile {
    id: Uuid,
    name: String,
    email: String,
    username: String,
    avatar: Option<String>,
    gender: Option<String>,
    phone: Option<String>,
    department: Option<String>,
    role: UserRole,
}

impl From<User::Model> for UserProfile {
    fn from(user: User::Model) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            username: user.username,
            avatar: user.avatar,
            gender: user.gender,
            phone: user.phone,
            department: user.department,
            role: user.role,
        }
    }
}

#[derive(Object)]
struct LoginData {
    token: String,
    user: UserProfile,
}

#[derive(Object)]
struct LoginBody {
    success: bool,
    data: LoginData,
    message: String,
}

#[derive(ApiResponse)]
enum LoginResponse {
    #[oai(status = 200)]
    Ok(Json<LoginBody>),
    #[oai(status = 400)]
    BadRequest(Json<ErrorBody>),
    #[oai(status = 401)]
    Unauthorized(Json<ErrorBody>),
    #[oai(status = 429)]
    TooManyRequests(Json<ErrorBody>, #[oai(header = "Retry-After")] String),
    #[oai(status = 500)]
    InternalError(Json<ErrorBody>),
}

#[derive(Object)]
struct SuccessBody {
    success: bool,
    message: String,
}

impl SuccessBody {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
        })
    }
}

#[derive(ApiResponse)]
enum MeResponse {
    #[oai(status = 200)]
    Ok(Json<UserProfile>),
    #[oai(status = 401)]
    Unauthorized(Json<ErrorBody>),
    #[oai(status = 403)]
    Forbidden(Json<ErrorBody>),
    #[oai(status = 500)]
    InternalError(Json<ErrorBody>),
}

#[derive(ApiResponse)]
enum SimpleResponse {
    #[oai(status = 200)]
    Ok(Json<SuccessBody>),
    #[oai(status = 400)]
    BadRequest(Json<ErrorBody>),
    #[oai(status = 401)]
    Unauthorized(Json<ErrorBody>),
    #[oai(status = 403)]
    Forbidden(Json<ErrorBody>),
    #[oai(status = 500)]
    InternalError(Json<ErrorBody>),
}

#[derive(Object)]
struct ChangePasswordRequest {
    old_password: Secret<String>,
    new_password: Secret<String>,
}

fn simple_auth_error(error: &AuthError) -> SimpleResponse {
    let (status, body) = auth_error_body(error);
    match status.as_u16() {
        401 => SimpleResponse::Unauthorized(Json(body)),
        403 => SimpleResponse::Forbidden(Json(body)),
        _ => SimpleResponse::InternalError(Json(body)),
    }
}

#[OpenApi]
impl Api {
    /// Authenticate with username/password and receive an API token.
    #[oai(path = "/auth/login", method = "post", operation_id = "login")]
    async fn login(
        &self,
        services: Data<&Services>,
        ctx: ReqCtx,
        body: Json<LoginRequest>,
    ) -> poem::Result<LoginResponse> {
        let ctx = ctx.0;
        let username = body.0.username.trim().to_owned();
        let password = body.0.password;

        if username.is_empty() || password.expose_secret().is_empty() {
            return Ok(LoginResponse::BadRequest(Json(ErrorBody::new(
                "Username and password are required",
            ))));
        }

        if let LoginGate::Blocked { retry_after } = services
            .login_rate_limiter
            .check(ctx.ip, &username)
            .await
        {
            return Ok(LoginResponse::TooManyRequests(
                Json(ErrorBody::new(
                    "Too many login attempts. Please try again later.",
                )),
                format_retry_after(retry_after),
            ));
        }

        let user = {
            let db = services.db.lock().await;
            User::Entity::find()
                .filter(User::Column::Username.eq(&username))
                .one(&*db)
                .await
                .map_err(LabgateError::from)?
        };

        let Some(user) = user else {
            self.reject_credentials(services.0, &ctx, &username).await;
            return Ok(LoginResponse::Unauthorized(Json(ErrorBody::new(
                "Invalid username or password",
            ))));
        };

        let password_ok = verify_password_hash(password.expose_secret(), &user.password_hash)
            .map_err(LabgateError::Anyhow)?;
        if !password_ok {
            self.reject_credentials(services.0, &ctx, &username).await;
            return Ok(LoginResponse::Unauthorized(Json(ErrorBody::new(
                "Invalid username or password",
            ))));
        }

        services.login_rate_limiter.reset(ctx.ip, &username).await;
        let token = services.auth.issue_token(&ctx, &user).await?;
        services.audit.login_success(&ctx, user.id, &username).await;

        Ok(LoginResponse::Ok(Json(LoginBody {
            success: true,
            data: LoginData {
                token: token.expose_secret().clone(),
                user: user.into(),
            },
            message: "Login successful".into(),
        })))
    }

    /// Revoke the presented token.
    #[oai(path = "/auth/logout", method = "post", operation_id = "logout")]
    async fn logout(
        &self,
        services: Data<&Services>,
        ctx: ReqCtx,
        authorization: AuthzHeader,
    ) -> poem::Result<SimpleResponse> {
        let ctx = ctx.0;
        let auth = match services
            .auth
            .validate(authorization.0.as_deref(), &ctx)
            .await
        {
            Ok(auth) => auth,
            Err(error) => return Ok(simple_auth_error(&error)),
        };

        services.auth.revoke_for_logout(&ctx, &auth).await?;
        Ok(SimpleResponse::Ok(SuccessBody::new("Logged out")))
    }

    /// Profile of the authenticated user.
    #[oai(path = "/auth/me", method = "get", operation_id = "me")]
    async fn me(
        &self,
        services: Data<&Services>,
        ctx: ReqCtx,
        authorization: AuthzHeader,
    ) -> poem::Result<MeResponse> {
        let ctx = ctx.0;
        match services
            .auth
            .validate(authorization.0.as_deref(), &ctx)
            .await
        {
            Ok(auth) => Ok(MeResponse::Ok(Json(auth.user.into()))),
            Err(error) => {
                let (status, body) = auth_error_body(&error);
                Ok(match status.as_u16() {
                    401 => MeResponse::Unauthorized(Json(body)),
                    403 => MeResponse::Forbidden(Json(body)),
                    _ => MeResponse::InternalError(Json(body)),
                })
            }
        }
    }

    /// Change the password and revoke every outstanding token.
    #[oai(
        path = "/auth/change-password",
        method = "post",
        operation_id = "change_password"
    )]
    async fn change_password(
        &self,
        services: Data<&Services>,
        ctx: ReqCtx,
        authorization: AuthzHeader,
        body: Json<ChangePasswordRequest>,
    ) -> poem::Result<SimpleResponse> {
        let ctx = ctx.0;
        let auth = match services
            .auth
            .validate(authorization.0.as_deref(), &ctx)
            .await
        {
            Ok(auth) => auth,
            Err(error) => return Ok(simple_auth_error(&error)),
        };

        let new_password = body.0.new_password;
        if new_password.expose_secret().len() < 8 {
            return Ok(SimpleResponse::BadRequest(Json(ErrorBody::new(
                "New password must be at least 8 characters",
            ))));
        }

        let old_ok = verify_password_hash(
            body.0.old_password.expose_secret(),
            &auth.user.password_hash,
        )
        .map_err(LabgateError::Anyhow)?;
        if !old_ok {
            services
                .audit
                .invalid_credentials(&ctx, &auth.user.username)
                .await;
            return Ok(SimpleResponse::Unauthorized(Json(ErrorBody::new(
                "Current password is incorrect",
            ))));
        }

        {
            let db = services.db.lock().await;
            User::ActiveModel {
                id: Set(auth.user.id),
                password_hash: Set(hash_password(new_password.expose_secret())),
                ..Default::default()
            }
            .update(&*db)
            .await
            .map_err(LabgateError::from)?;
        }

        services
            .auth
            .revoke_all_for_user(auth.user.id, REVOKE_REASON_PASSWORD_CHANGE)
            .await?;
        services.audit.password_change(&ctx, auth.user.id).await;

        Ok(SimpleResponse::Ok(SuccessBody::new(
            "Password changed; please log in again",
        )))
    }
}

impl Api {
    async fn reject_credentials(
        &self,
        services: &Services,
        ctx: &labgate_core::audit::RequestContext,
        username: &str,
    ) {
        services.login_rate_limiter.record_failure(ctx.ip, username).await;
        services.audit.invalid_credentials(ctx, username).await;
        services
            .alerts
            .check(ctx, &SecurityEvent::new(event_kind::LOGIN_FAIL))
            .await;
    }
}
