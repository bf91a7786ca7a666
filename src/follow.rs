//! Follow graph.
//!
//! "A follows B" is stored twice: `A.followings ∋ B` and `B.followers ∋ A`.
//! The two sides are separate documents written one after the other, so
//! a failure in between leaves a one-sided edge. Each side is a set
//! operation applied with a read-modify-write of its document, so concurrent
//! edges on the same user are all kept and retrying a follow or an unfollow
//! completes whatever a previous attempt left half done. The counters are
//! recomputed from the set on every write of their document.

use rand::seq::SliceRandom;
use spin_sdk::http::{Request, Response};
use tracing::{debug, info};

use crate::auth::validate_token;
use crate::config::*;
use crate::core::db::{update_user, users_list};
use crate::core::errors::ApiError;
use crate::core::helpers::{add_to_set, json_response, last_segment, remove_from_set, require_id};
use crate::core::query_params::{get_int, parse_query_params};
use crate::core::store::DocumentStore;
use crate::models::models::{Followers, Followings, SuggestedUser, User, UserSummary};
use crate::router::AppContext;
use crate::users::{require_user, summaries};

/// Outcome of a follow or unfollow; `changed` is false for redundant calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeChange {
    pub followings_changed: bool,
    pub followers_changed: bool,
}

impl EdgeChange {
    pub fn changed(&self) -> bool {
        self.followings_changed || self.followers_changed
    }
}

fn sync_counts(user: &mut User) {
    user.follower_count = user.followers.len() as u64;
    user.following_count = user.followings.len() as u64;
}

/// Applies `edit` to one set of `user_id` and recomputes its counters.
fn edit_edges(
    store: &dyn DocumentStore,
    user_id: &str,
    edit: impl Fn(&mut User) -> bool,
) -> Result<bool, ApiError> {
    update_user(store, user_id, |user| {
        let changed = edit(user);
        sync_counts(user);
        Ok(changed)
    })
}

pub fn follow_user(store: &dyn DocumentStore, actor_id: &str, target_id: &str) -> Result<EdgeChange, ApiError> {
    if actor_id == target_id {
        return Err(ApiError::SelfReference);
    }
    require_user(store, actor_id)?;
    require_user(store, target_id)?;

    let followings_changed = edit_edges(store, actor_id, |actor| add_to_set(&mut actor.followings, target_id))?;
    let followers_changed = edit_edges(store, target_id, |target| add_to_set(&mut target.followers, actor_id))?;

    let change = EdgeChange { followings_changed, followers_changed };
    if change.changed() {
        info!(actor_id, target_id, "user followed");
    } else {
        debug!(actor_id, target_id, "follow was a no-op");
    }
    Ok(change)
}

pub fn unfollow_user(store: &dyn DocumentStore, actor_id: &str, target_id: &str) -> Result<EdgeChange, ApiError> {
    if actor_id == target_id {
        return Err(ApiError::SelfReference);
    }
    require_user(store, actor_id)?;
    require_user(store, target_id)?;

    let followings_changed =
        edit_edges(store, actor_id, |actor| remove_from_set(&mut actor.followings, target_id))?;
    let followers_changed =
        edit_edges(store, target_id, |target| remove_from_set(&mut target.followers, actor_id))?;

    let change = EdgeChange { followings_changed, followers_changed };
    if change.changed() {
        info!(actor_id, target_id, "user unfollowed");
    } else {
        debug!(actor_id, target_id, "unfollow was a no-op");
    }
    Ok(change)
}

pub fn get_followings(store: &dyn DocumentStore, user_id: &str) -> Result<Followings, ApiError> {
    Ok(require_user(store, user_id)?.followings)
}

pub fn get_followers(store: &dyn DocumentStore, user_id: &str) -> Result<Followers, ApiError> {
    Ok(require_user(store, user_id)?.followers)
}

/// Up to `limit` other users, sampled from the first `2 * limit`
/// candidates and shuffled. No ranking.
pub fn get_suggestions(store: &dyn DocumentStore, user_id: &str, limit: usize) -> Result<Vec<SuggestedUser>, ApiError> {
    let caller = require_user(store, user_id)?;

    let candidates: Vec<String> = users_list(store)?
        .into_iter()
        .filter(|id| id != user_id)
        .take(limit.saturating_mul(2))
        .collect();

    let mut pool: Vec<UserSummary> = summaries(store, &candidates)?;
    pool.shuffle(&mut rand::thread_rng());
    pool.truncate(limit);

    Ok(pool
        .into_iter()
        .map(|user| SuggestedUser {
            is_following: caller.followings.contains(&user.id),
            user,
        })
        .collect())
}

// === HTTP Handlers ===

pub fn handle_follow(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let user_id = validate_token(ctx, req)?;
    let target_user_id = require_id(last_segment(req.path()), "Target user")?;

    let change = follow_user(ctx.store, &user_id, target_user_id)?;

    json_response(
        200,
        &serde_json::json!({
            "message": "User followed successfully",
            "status": if change.changed() { "followed" } else { "already_following" },
        }),
    )
}

pub fn handle_unfollow(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let user_id = validate_token(ctx, req)?;
    let target_user_id = require_id(last_segment(req.path()), "Target user")?;

    let change = unfollow_user(ctx.store, &user_id, target_user_id)?;

    json_response(
        200,
        &serde_json::json!({
            "message": "User unfollowed successfully",
            "status": if change.changed() { "unfollowed" } else { "not_following" },
        }),
    )
}

pub fn get_followings_list(ctx: &AppContext, path: &str) -> Result<Response, ApiError> {
    let user_id = require_id(last_segment(path), "User")?;
    let followings = summaries(ctx.store, &get_followings(ctx.store, user_id)?)?;

    json_response(
        200,
        &serde_json::json!({
            "message": "Followings retrieved successfully",
            "followings": followings,
        }),
    )
}

pub fn get_followers_list(ctx: &AppContext, path: &str) -> Result<Response, ApiError> {
    let user_id = require_id(last_segment(path), "User")?;
    let followers = summaries(ctx.store, &get_followers(ctx.store, user_id)?)?;

    json_response(
        200,
        &serde_json::json!({
            "message": "Followers retrieved successfully",
            "followers": followers,
        }),
    )
}

pub fn handle_suggested(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let user_id = validate_token(ctx, req)?;
    let params = parse_query_params(req.uri());
    let limit = get_int(&params, "limit", DEFAULT_SUGGESTION_LIMIT, MAX_SUGGESTION_LIMIT);

    let users = get_suggestions(ctx.store, &user_id, limit)?;

    json_response(
        200,
        &serde_json::json!({
            "message": "Suggested users retrieved successfully",
            "users": users,
        }),
    )
}
