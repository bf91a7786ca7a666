use serde::Deserialize;
use spin_sdk::http::{Request, Response};
use tracing::info;

use crate::auth::{issue_session, validate_token};
use crate::config::*;
use crate::core::db::{load_live_post, load_user, load_users, update_user, users_list};
use crate::core::errors::ApiError;
use crate::core::helpers::{
    hash_password, json_response, last_segment, now_iso, parse_body, require_id, sanitize_text,
    verify_password,
};
use crate::core::query_params::{get_string, parse_query_params};
use crate::core::store::DocumentStore;
use crate::models::models::{ProfileView, PublicUser, User, UserSummary};
use crate::router::AppContext;

/// Partial profile update. Absent fields are left untouched.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

pub fn require_user(store: &dyn DocumentStore, user_id: &str) -> Result<User, ApiError> {
    load_user(store, user_id)?.ok_or_else(|| ApiError::not_found("User"))
}

pub fn summaries(store: &dyn DocumentStore, ids: &[String]) -> Result<Vec<UserSummary>, ApiError> {
    Ok(load_users(store, ids)?.iter().map(UserSummary::from).collect())
}

/// Full profile: live posts, follower and following summaries.
pub fn profile_view(store: &dyn DocumentStore, user_id: &str) -> Result<ProfileView, ApiError> {
    let user = require_user(store, user_id)?;

    let mut posts = Vec::with_capacity(user.posts.len());
    for post_id in &user.posts {
        if let Some(post) = load_live_post(store, post_id)? {
            posts.push(post);
        }
    }
    posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(ProfileView {
        id: user.id.clone(),
        username: user.username.clone(),
        email: user.email.clone(),
        profile: user.profile.clone(),
        posts,
        followers: summaries(store, &user.followers)?,
        followings: summaries(store, &user.followings)?,
        follower_count: user.follower_count,
        following_count: user.following_count,
        created_at: user.created_at.clone(),
    })
}

pub fn update_profile(
    store: &dyn DocumentStore,
    user_id: &str,
    update: &UpdateProfileRequest,
) -> Result<User, ApiError> {
    if let Some(bio) = &update.bio {
        if bio.chars().count() > MAX_BIO_LENGTH {
            return Err(ApiError::Validation(format!(
                "Bio too long (max {} chars)",
                MAX_BIO_LENGTH
            )));
        }
    }
    for name in [&update.first_name, &update.last_name].into_iter().flatten() {
        if name.chars().count() > MAX_NAME_LENGTH {
            return Err(ApiError::Validation("Name too long".to_string()));
        }
    }

    update_user(store, user_id, |user| {
        if let Some(first_name) = &update.first_name {
            user.profile.first_name = sanitize_text(first_name);
        }
        if let Some(last_name) = &update.last_name {
            user.profile.last_name = sanitize_text(last_name);
        }
        if let Some(bio) = &update.bio {
            user.profile.bio = sanitize_text(bio);
        }
        if let Some(avatar) = &update.avatar {
            user.profile.avatar = avatar.trim().to_string();
        }
        user.updated_at = Some(now_iso());
        Ok(user.clone())
    })
}

/// Replaces the password hash and bumps the credential version, which
/// invalidates every token issued before the change.
pub fn change_password(
    store: &dyn DocumentStore,
    user_id: &str,
    old_password: &str,
    new_password: &str,
) -> Result<User, ApiError> {
    if old_password.is_empty() || new_password.is_empty() {
        return Err(ApiError::Validation(
            "Old password and new password are required".to_string(),
        ));
    }
    if new_password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    let current = require_user(store, user_id)?;
    if !verify_password(old_password, &current.password) {
        return Err(ApiError::InvalidCredential);
    }
    let new_hash = hash_password(new_password)?;

    // Hashing is slow; a password change that landed meanwhile wins
    let user = update_user(store, user_id, |user| {
        if user.password != current.password {
            return Err(ApiError::InvalidCredential);
        }
        user.password = new_hash.clone();
        user.credential_version = user.credential_version.wrapping_add(1);
        user.updated_at = Some(now_iso());
        Ok(user.clone())
    })?;

    info!(user_id = %user.id, "password changed");
    Ok(user)
}

pub fn all_users(store: &dyn DocumentStore) -> Result<Vec<UserSummary>, ApiError> {
    summaries(store, &users_list(store)?)
}

/// Case-insensitive substring match on username, first and last name.
pub fn search_users(store: &dyn DocumentStore, query: &str) -> Result<Vec<UserSummary>, ApiError> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Ok(Vec::new());
    }

    let users = load_users(store, &users_list(store)?)?;
    Ok(users
        .iter()
        .filter(|u| {
            u.username.to_lowercase().contains(&needle)
                || u.profile.first_name.to_lowercase().contains(&needle)
                || u.profile.last_name.to_lowercase().contains(&needle)
        })
        .map(UserSummary::from)
        .collect())
}

// === HTTP Handlers ===

pub fn handle_update_profile(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let user_id = validate_token(ctx, req)?;
    let body: UpdateProfileRequest = parse_body(req)?;
    let user = update_profile(ctx.store, &user_id, &body)?;

    json_response(
        200,
        &serde_json::json!({
            "message": "Profile updated successfully",
            "user": PublicUser::from(&user),
        }),
    )
}

pub fn handle_change_password(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let user_id = validate_token(ctx, req)?;
    let body: ChangePasswordRequest = parse_body(req)?;
    let user = change_password(ctx.store, &user_id, &body.old_password, &body.new_password)?;
    let token = issue_session(ctx, &user)?;

    json_response(
        200,
        &serde_json::json!({ "message": "Password changed successfully", "token": token }),
    )
}

pub fn handle_get_user(ctx: &AppContext, path: &str) -> Result<Response, ApiError> {
    let user_id = require_id(last_segment(path), "User")?;
    let view = profile_view(ctx.store, user_id)?;
    json_response(
        200,
        &serde_json::json!({ "message": "User retrieved successfully", "user": view }),
    )
}

pub fn handle_all_users(ctx: &AppContext) -> Result<Response, ApiError> {
    let users = all_users(ctx.store)?;
    json_response(
        200,
        &serde_json::json!({ "message": "Users retrieved successfully", "users": users }),
    )
}

pub fn handle_search_users(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let params = parse_query_params(req.uri());
    let query = get_string(&params, "q", Some("")).unwrap_or_default();
    let users = search_users(ctx.store, &query)?;
    json_response(200, &serde_json::json!({ "users": users }))
}
