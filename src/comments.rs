use serde::Deserialize;
use spin_sdk::http::{Request, Response};
use tracing::{debug, info};

use crate::auth::validate_token;
use crate::config::*;
use crate::core::db::{
    load_comment, load_live_post, load_user, save_comment, update_comment as update_comment_doc,
    update_post,
};
use crate::core::errors::ApiError;
use crate::core::helpers::{
    add_to_set, json_response, last_segment, new_id, now_iso, parse_body, remove_from_set,
    require_id, sanitize_text,
};
use crate::core::store::DocumentStore;
use crate::models::models::{Comment, CommentView, Post, UserSummary};
use crate::router::AppContext;

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct CommentRequest {
    pub content: String,
}

fn clean_content(content: &str) -> Result<String, ApiError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ApiError::EmptyContent);
    }
    if content.chars().count() > MAX_COMMENT_LENGTH {
        return Err(ApiError::Validation(format!(
            "Comment too long (max {} chars)",
            MAX_COMMENT_LENGTH
        )));
    }
    let clean = sanitize_text(content);
    // Markup-only input sanitizes down to nothing
    if clean.trim().is_empty() {
        return Err(ApiError::EmptyContent);
    }
    Ok(clean)
}

fn require_comment(store: &dyn DocumentStore, comment_id: &str) -> Result<Comment, ApiError> {
    load_comment(store, comment_id)?.ok_or_else(|| ApiError::not_found("Comment"))
}

/// Inserts the comment, then appends its id to the post's comment set.
pub fn add_comment(
    store: &dyn DocumentStore,
    user_id: &str,
    post_id: &str,
    content: &str,
) -> Result<Comment, ApiError> {
    let content = clean_content(content)?;
    load_live_post(store, post_id)?.ok_or_else(|| ApiError::not_found("Post"))?;

    let comment = Comment {
        id: new_id(),
        content,
        user_id: user_id.to_string(),
        post_id: post_id.to_string(),
        created_at: now_iso(),
        updated_at: None,
    };
    save_comment(store, &comment)?;

    update_post(store, post_id, |post| Ok(add_to_set(&mut post.comments, &comment.id)))?;

    info!(comment_id = %comment.id, post_id, user_id, "comment added");
    Ok(comment)
}

/// Removes the comment document, then detaches it from its post. Only the
/// author may delete.
pub fn delete_comment(store: &dyn DocumentStore, user_id: &str, comment_id: &str) -> Result<Comment, ApiError> {
    let comment = require_comment(store, comment_id)?;
    if comment.user_id != user_id {
        return Err(ApiError::Forbidden);
    }

    store.delete(&comment_key(&comment.id))?;

    match update_post(store, &comment.post_id, |post| Ok(remove_from_set(&mut post.comments, &comment.id))) {
        Ok(_) => {}
        Err(ApiError::NotFound(_)) => debug!(comment_id, "post of deleted comment is gone"),
        Err(err) => return Err(err),
    }

    info!(comment_id, user_id, "comment deleted");
    Ok(comment)
}

pub fn update_comment(
    store: &dyn DocumentStore,
    user_id: &str,
    comment_id: &str,
    content: &str,
) -> Result<Comment, ApiError> {
    let content = clean_content(content)?;
    update_comment_doc(store, comment_id, |comment| {
        if comment.user_id != user_id {
            return Err(ApiError::Forbidden);
        }
        comment.content = content.clone();
        comment.updated_at = Some(now_iso());
        Ok(comment.clone())
    })
}

pub fn comment_view(store: &dyn DocumentStore, comment: &Comment) -> Result<CommentView, ApiError> {
    Ok(CommentView {
        id: comment.id.clone(),
        content: comment.content.clone(),
        post_id: comment.post_id.clone(),
        author: load_user(store, &comment.user_id)?.as_ref().map(UserSummary::from),
        created_at: comment.created_at.clone(),
        updated_at: comment.updated_at.clone(),
    })
}

/// Comments referenced by the post's set, newest first. A reference whose
/// document is gone is skipped.
pub fn comment_views(store: &dyn DocumentStore, post: &Post) -> Result<Vec<CommentView>, ApiError> {
    let mut comments = Vec::with_capacity(post.comments.len());
    for id in &post.comments {
        if let Some(comment) = load_comment(store, id)? {
            comments.push(comment);
        }
    }
    comments.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    comments.iter().map(|c| comment_view(store, c)).collect()
}

pub fn get_comments(store: &dyn DocumentStore, post_id: &str) -> Result<Vec<CommentView>, ApiError> {
    let post = load_live_post(store, post_id)?.ok_or_else(|| ApiError::not_found("Post"))?;
    comment_views(store, &post)
}

// === HTTP Handlers ===

/// `/comments/{postId}/add`
pub fn handle_add_comment(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let user_id = validate_token(ctx, req)?;
    let path = req.path().trim_end_matches('/');
    let post_id = path.strip_suffix("/add").map(last_segment).unwrap_or_default();
    let post_id = require_id(post_id, "Post")?;

    let body: CommentRequest = parse_body(req)?;
    let comment = add_comment(ctx.store, &user_id, post_id, &body.content)?;

    json_response(
        201,
        &serde_json::json!({
            "message": "Comment added successfully",
            "comment": comment_view(ctx.store, &comment)?,
        }),
    )
}

pub fn handle_get_comments(ctx: &AppContext, path: &str) -> Result<Response, ApiError> {
    let post_id = require_id(last_segment(path), "Post")?;
    let comments = get_comments(ctx.store, post_id)?;
    json_response(
        200,
        &serde_json::json!({ "message": "Comments retrieved successfully", "comments": comments }),
    )
}

pub fn handle_update_comment(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let user_id = validate_token(ctx, req)?;
    let body: CommentRequest = parse_body(req)?;
    // Blank content is rejected before the lookup
    if body.content.trim().is_empty() {
        return Err(ApiError::EmptyContent);
    }
    let comment_id = require_id(last_segment(req.path()), "Comment")?;

    let comment = update_comment(ctx.store, &user_id, comment_id, &body.content)?;
    json_response(
        200,
        &serde_json::json!({
            "message": "Comment updated successfully",
            "comment": comment_view(ctx.store, &comment)?,
        }),
    )
}

pub fn handle_delete_comment(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let user_id = validate_token(ctx, req)?;
    let comment_id = require_id(last_segment(req.path()), "Comment")?;
    delete_comment(ctx.store, &user_id, comment_id)?;
    json_response(200, &serde_json::json!({ "message": "Comment deleted successfully" }))
}
