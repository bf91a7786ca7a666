use serde::Deserialize;
use spin_sdk::http::{Request, Response};
use tracing::{debug, info};

use crate::auth::validate_token;
use crate::comments::comment_views;
use crate::config::*;
use crate::core::db::{
    feed, load_live_post, load_user, load_users, prepend_to_feed, save_post, update_live_post,
    update_user,
};
use crate::core::errors::ApiError;
use crate::core::helpers::{
    add_to_set, header_value, json_response, last_segment, new_id, now_iso, parse_body,
    remove_from_set, require_id, sanitize_text,
};
use crate::core::query_params::{get_optional_int, get_string, parse_query_params};
use crate::core::store::DocumentStore;
use crate::media::{read_upload_form, MediaHost, MediaUpload};
use crate::models::models::{Post, PostView, UserSummary};
use crate::router::AppContext;
use crate::users::{require_user, summaries};

/// JSON form of post creation, for media that was uploaded beforehand.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CreatePostRequest {
    pub media_url: Option<String>,
    pub caption: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct UpdatePostRequest {
    pub caption: String,
}

fn clean_caption(caption: &str) -> Result<String, ApiError> {
    if caption.chars().count() > MAX_CAPTION_LENGTH {
        return Err(ApiError::Validation(format!(
            "Caption too long (max {} chars)",
            MAX_CAPTION_LENGTH
        )));
    }
    Ok(sanitize_text(caption.trim()))
}

fn require_live_post(store: &dyn DocumentStore, post_id: &str) -> Result<Post, ApiError> {
    load_live_post(store, post_id)?.ok_or_else(|| ApiError::not_found("Post"))
}

/// Writes the post, prepends it to the global feed, then appends it to the
/// owner's post set. Three independent writes.
pub fn create_post(
    store: &dyn DocumentStore,
    user_id: &str,
    media_url: Option<&str>,
    caption: &str,
) -> Result<Post, ApiError> {
    let media = match media_url.map(str::trim) {
        Some(url) if !url.is_empty() => url.to_string(),
        _ => return Err(ApiError::MissingMedia),
    };
    let caption = clean_caption(caption)?;
    require_user(store, user_id)?;

    let post = Post {
        id: new_id(),
        user_id: user_id.to_string(),
        media,
        caption,
        like_count: 0,
        likes: Vec::new(),
        comments: Vec::new(),
        is_deleted: false,
        created_at: now_iso(),
        updated_at: None,
    };
    save_post(store, &post)?;
    prepend_to_feed(store, &post.id)?;
    update_user(store, user_id, |owner| Ok(add_to_set(&mut owner.posts, &post.id)))?;

    info!(post_id = %post.id, user_id, "post created");
    Ok(post)
}

/// Uploads through the media host, then creates the post with the URL.
pub fn publish_upload(
    store: &dyn DocumentStore,
    media: &dyn MediaHost,
    user_id: &str,
    upload: &MediaUpload<'_>,
    caption: &str,
) -> Result<Post, ApiError> {
    if upload.bytes.is_empty() {
        return Err(ApiError::MissingMedia);
    }
    clean_caption(caption)?;
    let url = media.upload(upload)?;
    create_post(store, user_id, Some(&url), caption)
}

/// `likes` is authoritative; `likeCount` is rewritten from it.
pub fn like_post(store: &dyn DocumentStore, user_id: &str, post_id: &str) -> Result<Post, ApiError> {
    update_live_post(store, post_id, |post| {
        if !add_to_set(&mut post.likes, user_id) {
            return Err(ApiError::AlreadyLiked);
        }
        post.like_count = post.likes.len() as u64;
        Ok(post.clone())
    })
}

pub fn unlike_post(store: &dyn DocumentStore, user_id: &str, post_id: &str) -> Result<Post, ApiError> {
    update_live_post(store, post_id, |post| {
        if !remove_from_set(&mut post.likes, user_id) {
            return Err(ApiError::NotLiked);
        }
        post.like_count = post.likes.len() as u64;
        Ok(post.clone())
    })
}

/// Caption edits are restricted to the post's owner.
pub fn update_post(
    store: &dyn DocumentStore,
    user_id: &str,
    post_id: &str,
    caption: &str,
) -> Result<Post, ApiError> {
    let caption = clean_caption(caption)?;
    update_live_post(store, post_id, |post| {
        if post.user_id != user_id {
            return Err(ApiError::Forbidden);
        }
        post.caption = caption.clone();
        post.updated_at = Some(now_iso());
        Ok(post.clone())
    })
}

/// Soft delete: flags the post, then detaches it from the owner's post set.
/// The document itself is kept.
pub fn delete_post(store: &dyn DocumentStore, user_id: &str, post_id: &str) -> Result<Post, ApiError> {
    let post = update_live_post(store, post_id, |post| {
        if post.user_id != user_id {
            return Err(ApiError::Forbidden);
        }
        post.is_deleted = true;
        post.updated_at = Some(now_iso());
        Ok(post.clone())
    })?;

    match update_user(store, &post.user_id, |owner| Ok(remove_from_set(&mut owner.posts, &post.id))) {
        Ok(_) => {}
        Err(ApiError::NotFound(_)) => debug!(post_id, "owner of deleted post is gone"),
        Err(err) => return Err(err),
    }

    info!(post_id, user_id, "post deleted");
    Ok(post)
}

pub fn post_view(store: &dyn DocumentStore, post: &Post) -> Result<PostView, ApiError> {
    let author = load_user(store, &post.user_id)?.as_ref().map(UserSummary::from);
    Ok(PostView {
        id: post.id.clone(),
        media: post.media.clone(),
        caption: post.caption.clone(),
        like_count: post.like_count,
        author,
        likes: summaries(store, &post.likes)?,
        comments: comment_views(store, post)?,
        created_at: post.created_at.clone(),
        updated_at: post.updated_at.clone(),
    })
}

pub fn get_post(store: &dyn DocumentStore, post_id: &str) -> Result<PostView, ApiError> {
    let post = require_live_post(store, post_id)?;
    post_view(store, &post)
}

/// Live posts newest first. `page` selects a window of `POSTS_PER_PAGE`.
pub fn all_posts(store: &dyn DocumentStore, page: Option<usize>) -> Result<Vec<PostView>, ApiError> {
    let mut posts = Vec::new();
    for id in feed(store)? {
        if let Some(post) = load_live_post(store, &id)? {
            posts.push(post);
        }
    }
    posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let window: Vec<Post> = match page {
        Some(page) => posts
            .into_iter()
            .skip(page.saturating_sub(1).saturating_mul(POSTS_PER_PAGE))
            .take(POSTS_PER_PAGE)
            .collect(),
        None => posts,
    };

    window.iter().map(|post| post_view(store, post)).collect()
}

/// Live posts by the users `user_id` follows, newest first.
pub fn following_feed(store: &dyn DocumentStore, user_id: &str) -> Result<Vec<PostView>, ApiError> {
    let user = require_user(store, user_id)?;

    let mut posts = Vec::new();
    for followed in load_users(store, &user.followings)? {
        for post_id in &followed.posts {
            if let Some(post) = load_live_post(store, post_id)? {
                posts.push(post);
            }
        }
    }
    posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    posts.iter().map(|post| post_view(store, post)).collect()
}

// === HTTP Handlers ===

/// Accepts a `multipart/form-data` upload (`media` file and `caption`), a
/// raw image body with `?filename=&caption=`, or JSON with a `mediaUrl`.
pub fn handle_create_post(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let user_id = validate_token(ctx, req)?;
    let raw_content_type = header_value(req, "Content-Type").unwrap_or_default();
    let content_type = raw_content_type.to_ascii_lowercase();

    let post = if content_type.starts_with("multipart/form-data") {
        let form = read_upload_form(raw_content_type, req.body())?;
        publish_upload(ctx.store, ctx.media, &user_id, &form.upload(), &form.caption)?
    } else if content_type.starts_with("image/") || content_type.starts_with("application/octet-stream") {
        let params = parse_query_params(req.uri());
        let file_name = get_string(&params, "filename", Some("upload")).unwrap_or_default();
        let caption = get_string(&params, "caption", Some("")).unwrap_or_default();
        let upload = MediaUpload {
            file_name: &file_name,
            content_type: Some(content_type.as_str()),
            bytes: req.body(),
        };
        publish_upload(ctx.store, ctx.media, &user_id, &upload, &caption)?
    } else {
        let body: CreatePostRequest = parse_body(req)?;
        create_post(
            ctx.store,
            &user_id,
            body.media_url.as_deref(),
            body.caption.as_deref().unwrap_or_default(),
        )?
    };

    json_response(
        201,
        &serde_json::json!({ "message": "Post created successfully", "post": post }),
    )
}

pub fn handle_all_posts(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let params = parse_query_params(req.uri());
    let posts = all_posts(ctx.store, get_optional_int(&params, "page"))?;
    json_response(
        200,
        &serde_json::json!({ "message": "Posts retrieved successfully", "posts": posts }),
    )
}

pub fn handle_get_post(ctx: &AppContext, path: &str) -> Result<Response, ApiError> {
    let post_id = require_id(last_segment(path), "Post")?;
    let post = get_post(ctx.store, post_id)?;
    json_response(
        200,
        &serde_json::json!({ "message": "Post retrieved successfully", "post": post }),
    )
}

pub fn handle_feed(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let user_id = validate_token(ctx, req)?;
    let posts = following_feed(ctx.store, &user_id)?;
    json_response(200, &serde_json::json!({ "posts": posts }))
}

pub fn handle_like(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let user_id = validate_token(ctx, req)?;
    let post_id = require_id(last_segment(req.path()), "Post")?;
    let post = like_post(ctx.store, &user_id, post_id)?;
    json_response(
        200,
        &serde_json::json!({ "message": "Post liked successfully", "post": post_view(ctx.store, &post)? }),
    )
}

pub fn handle_unlike(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let user_id = validate_token(ctx, req)?;
    let post_id = require_id(last_segment(req.path()), "Post")?;
    let post = unlike_post(ctx.store, &user_id, post_id)?;
    json_response(
        200,
        &serde_json::json!({ "message": "Post unliked successfully", "post": post_view(ctx.store, &post)? }),
    )
}

pub fn handle_update_post(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let user_id = validate_token(ctx, req)?;
    let post_id = require_id(last_segment(req.path()), "Post")?;
    let body: UpdatePostRequest = parse_body(req)?;
    let post = update_post(ctx.store, &user_id, post_id, &body.caption)?;
    json_response(
        200,
        &serde_json::json!({ "message": "Post updated successfully", "post": post }),
    )
}

pub fn handle_delete_post(ctx: &AppContext, req: &Request) -> Result<Response, ApiError> {
    let user_id = validate_token(ctx, req)?;
    let post_id = require_id(last_segment(req.path()), "Post")?;
    delete_post(ctx.store, &user_id, post_id)?;
    json_response(200, &serde_json::json!({ "message": "Post deleted successfully" }))
}
