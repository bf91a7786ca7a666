use spin_sdk::http::{Method, Request, Response};
use tracing::{error, warn};

use crate::config::Config;
use crate::core::errors::ApiError;
use crate::core::helpers::json_response;
use crate::core::store::DocumentStore;
use crate::media::MediaHost;
use crate::{auth, comments, follow, media, posts, users};

/// Collaborators a request needs: the document store, the media host and
/// the runtime configuration.
pub struct AppContext<'a> {
    pub store: &'a dyn DocumentStore,
    pub media: &'a dyn MediaHost,
    pub config: &'a Config,
}

fn method_name(method: &Method) -> &'static str {
    match method {
        Method::Get => "GET",
        Method::Post => "POST",
        Method::Put => "PUT",
        Method::Delete => "DELETE",
        Method::Patch => "PATCH",
        Method::Head => "HEAD",
        Method::Options => "OPTIONS",
        _ => "OTHER",
    }
}

/// Dispatches a request and renders any error as a JSON response.
pub fn handle_request(ctx: &AppContext, req: &Request) -> Response {
    let method = method_name(req.method());
    let path = req.path().trim_end_matches('/');
    let path = path.strip_prefix("/api").unwrap_or(path);

    match route(ctx, req, method, path) {
        Ok(resp) => resp,
        Err(err) => {
            match &err {
                ApiError::Internal(msg) | ApiError::Upload(msg) => {
                    error!(method, path, error = %msg, "request failed")
                }
                other => warn!(method, path, kind = other.kind(), "request rejected"),
            }
            err.into()
        }
    }
}

fn route(ctx: &AppContext, req: &Request, method: &str, path: &str) -> Result<Response, ApiError> {
    match (method, path) {
        ("GET", "/health") => json_response(200, &serde_json::json!({ "status": "ok" })),

        ("POST", "/auth/signup") => auth::handle_signup(ctx, req),
        ("POST", "/auth/login") => auth::handle_login(ctx, req),
        ("POST", "/auth/logout") => auth::handle_logout(ctx, req),
        ("GET", "/auth/profile") => auth::handle_profile(ctx, req),

        ("PUT", "/users/profile/update") => users::handle_update_profile(ctx, req),
        ("PUT", "/users/change-password") => users::handle_change_password(ctx, req),
        ("POST", p) if p.starts_with("/users/follow/") => follow::handle_follow(ctx, req),
        ("POST", p) if p.starts_with("/users/unfollow/") => follow::handle_unfollow(ctx, req),
        ("GET", p) if p.starts_with("/users/followers/") => follow::get_followers_list(ctx, p),
        ("GET", p) if p.starts_with("/users/followings/") => follow::get_followings_list(ctx, p),
        ("GET", "/users/suggested") => follow::handle_suggested(ctx, req),
        ("GET", "/users/search-users") => users::handle_search_users(ctx, req),
        ("GET", "/users") => users::handle_all_users(ctx),
        ("GET", p) if p.starts_with("/users/") => users::handle_get_user(ctx, p),

        ("POST", "/posts/create") => posts::handle_create_post(ctx, req),
        ("GET", "/posts/all") => posts::handle_all_posts(ctx, req),
        ("GET", "/posts/feed") => posts::handle_feed(ctx, req),
        ("POST", p) if p.starts_with("/posts/like/") => posts::handle_like(ctx, req),
        ("POST", p) if p.starts_with("/posts/unlike/") => posts::handle_unlike(ctx, req),
        ("PUT", p) if p.starts_with("/posts/update/") => posts::handle_update_post(ctx, req),
        ("DELETE", p) if p.starts_with("/posts/delete/") => posts::handle_delete_post(ctx, req),
        ("GET", p) if p.starts_with("/posts/") => posts::handle_get_post(ctx, p),

        ("POST", p) if p.starts_with("/comments/") && p.ends_with("/add") => {
            comments::handle_add_comment(ctx, req)
        }
        ("GET", p) if p.starts_with("/comments/") => comments::handle_get_comments(ctx, p),
        ("PUT", p) if p.starts_with("/comments/") => comments::handle_update_comment(ctx, req),
        ("DELETE", p) if p.starts_with("/comments/") => comments::handle_delete_comment(ctx, req),

        ("GET", p) if p.starts_with("/media/") => media::serve_media(ctx.store, p),

        _ => Err(ApiError::NotFound("No route found".to_string())),
    }
}
