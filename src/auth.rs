use serde::Deserialize;
use spin_sdk::http::{Request, Response};
use tracing::{debug, info};

use crate::config::*;
use crate::core::db::{append_to_users_list, find_user_id_by_email, load_user, save_user};
use crate::core::errors::{ApiError, AuthTokenError};
use crate::core::helpers::{
    hash_password, header_value, json_response, new_id, now_iso, parse_body, sanitize_text,
    verify_password,
};
use crate::core::store::DocumentStore;
use crate::core::token::{decode_token, issue_token};
use crate::models::models::{Profile, PublicUser, User};
use crate::router::AppContext;
use crate::users::profile_view;

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl SignupRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.username.trim().is_empty() || self.email.trim().is_empty() || self.password.is_empty() {
            return Err(ApiError::Validation(
                "Username, email, and password are required".to_string(),
            ));
        }
        let username_len = self.username.trim().chars().count();
        if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&username_len) {
            return Err(ApiError::Validation(format!(
                "Username must be {}-{} characters",
                MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH
            )));
        }
        if self.password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(ApiError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }
        if !self.email.contains('@') {
            return Err(ApiError::Validation("Email address is invalid".to_string()));
        }
        for name in [&self.first_name, &self.last_name].into_iter().flatten() {
            if name.chars().count() > MAX_NAME_LENGTH {
                return Err(ApiError::Validation("Name too long".to_string()));
            }
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Creates an account. Fails with `DuplicateIdentity` when the username or
/// the email is taken.
pub fn register(store: &dyn DocumentStore, req: &SignupRequest) -> Result<User, ApiError> {
    req.validate()?;

    let username = sanitize_text(req.username.trim());
    let email = normalize_email(&req.email);
    if username.is_empty() {
        return Err(ApiError::Validation("Username is required".to_string()));
    }

    let password = hash_password(&req.password)?;
    let id = new_id();

    // Identity keys are claimed before the user document exists
    claim_identity(store, &username_key(&username), &id)?;
    if let Err(err) = claim_identity(store, &email_key(&email), &id) {
        store.delete(&username_key(&username))?;
        return Err(err);
    }

    let user = User {
        id,
        username,
        email,
        password,
        profile: Profile {
            first_name: req.first_name.as_deref().map(sanitize_text).unwrap_or_default(),
            last_name: req.last_name.as_deref().map(sanitize_text).unwrap_or_default(),
            ..Profile::default()
        },
        posts: Vec::new(),
        followers: Vec::new(),
        followings: Vec::new(),
        follower_count: 0,
        following_count: 0,
        credential_version: 0,
        created_at: now_iso(),
        updated_at: None,
    };

    save_user(store, &user)?;
    append_to_users_list(store, &user.id)?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(user)
}

/// Points an identity index key at `user_id` unless another user holds it.
fn claim_identity(store: &dyn DocumentStore, key: &str, user_id: &str) -> Result<(), ApiError> {
    store.update_json(key, |owner: &mut Option<String>| {
        if owner.is_some() {
            return Err(ApiError::DuplicateIdentity);
        }
        *owner = Some(user_id.to_string());
        Ok(())
    })?
}

/// Unknown email and wrong password fail identically.
pub fn authenticate(store: &dyn DocumentStore, email: &str, password: &str) -> Result<User, ApiError> {
    let email = normalize_email(email);
    let user = match find_user_id_by_email(store, &email)? {
        Some(id) => load_user(store, &id)?,
        None => None,
    };

    match user {
        Some(user) if verify_password(password, &user.password) => Ok(user),
        _ => {
            debug!("login rejected");
            Err(ApiError::InvalidCredential)
        }
    }
}

pub fn issue_session(ctx: &AppContext, user: &User) -> Result<String, ApiError> {
    Ok(issue_token(
        &user.id,
        user.credential_version,
        ctx.config.token_secret.as_bytes(),
        ctx.config.token_expiration_hours,
    )?)
}

/// Resolves the bearer token to a user id.
pub fn validate_token(ctx: &AppContext, req: &Request) -> Result<String, ApiError> {
    let auth_header = header_value(req, "Authorization").unwrap_or_default();
    let token = match auth_header.trim().split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            token.trim()
        }
        _ => return Err(AuthTokenError::NoToken.into()),
    };

    let claims = decode_token(token, ctx.config.token_secret.as_bytes())?;

    // Tokens outlive neither their user nor a password change
    match load_user(ctx.store, &claims.sub)? {
        Some(user) if user.credential_version == claims.ver => Ok(user.id),
        _ => Err(AuthTokenError::Invalid.into()),
    }
}

// === HTTP Handlers ===

pub fn handle_signup(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let body: SignupRequest = parse_body(req)?;
    let user = register(ctx.store, &body)?;
    let token = issue_session(ctx, &user)?;

    json_response(
        201,
        &serde_json::json!({
            "message": "User registered successfully",
            "token": token,
            "user": PublicUser::from(&user),
        }),
    )
}

pub fn handle_login(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let body: LoginRequest = parse_body(req)?;
    if body.email.trim().is_empty() || body.password.is_empty() {
        return Err(ApiError::Validation("Email and password are required".to_string()));
    }

    let user = authenticate(ctx.store, &body.email, &body.password)?;
    let token = issue_session(ctx, &user)?;
    info!(user_id = %user.id, "user logged in");

    json_response(200, &serde_json::json!({ "message": "Login successful", "token": token }))
}

/// Tokens are stateless; the client discards its copy.
pub fn handle_logout(_ctx: &AppContext, _req: &Request) -> Result<Response, ApiError> {
    json_response(200, &serde_json::json!({ "message": "Logout successful" }))
}

pub fn handle_profile(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let user_id = validate_token(ctx, req)?;
    let view = profile_view(ctx.store, &user_id)?;
    json_response(200, &serde_json::json!({ "user": view }))
}
