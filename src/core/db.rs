use std::convert::Infallible;

use crate::config::*;
use crate::core::errors::ApiError;
use crate::core::helpers::{hash_password, new_id, now_iso};
use crate::core::store::DocumentStore;
use crate::models::models::{Comment, Post, Profile, User};

// === Document accessors ===

pub fn load_user(store: &dyn DocumentStore, id: &str) -> anyhow::Result<Option<User>> {
    store.get_json(&user_key(id))
}

pub fn save_user(store: &dyn DocumentStore, user: &User) -> anyhow::Result<()> {
    store.set_json(&user_key(&user.id), user)
}

pub fn load_post(store: &dyn DocumentStore, id: &str) -> anyhow::Result<Option<Post>> {
    store.get_json(&post_key(id))
}

/// Like [`load_post`] but treats a soft-deleted post as absent.
pub fn load_live_post(store: &dyn DocumentStore, id: &str) -> anyhow::Result<Option<Post>> {
    Ok(load_post(store, id)?.filter(|post| !post.is_deleted))
}

pub fn save_post(store: &dyn DocumentStore, post: &Post) -> anyhow::Result<()> {
    store.set_json(&post_key(&post.id), post)
}

pub fn load_comment(store: &dyn DocumentStore, id: &str) -> anyhow::Result<Option<Comment>> {
    store.get_json(&comment_key(id))
}

pub fn save_comment(store: &dyn DocumentStore, comment: &Comment) -> anyhow::Result<()> {
    store.set_json(&comment_key(&comment.id), comment)
}

pub fn find_user_id_by_email(store: &dyn DocumentStore, email: &str) -> anyhow::Result<Option<String>> {
    store.get_json(&email_key(email))
}

pub fn users_list(store: &dyn DocumentStore) -> anyhow::Result<Vec<String>> {
    Ok(store.get_json(USERS_LIST_KEY)?.unwrap_or_default())
}

pub fn feed(store: &dyn DocumentStore) -> anyhow::Result<Vec<String>> {
    Ok(store.get_json(FEED_KEY)?.unwrap_or_default())
}

// === Read-modify-write ===
//
// Closures run against the freshly read document and may run more than once.
// An `Err` discards their changes. They must not call back into the store.

pub fn update_user<R>(
    store: &dyn DocumentStore,
    id: &str,
    mut f: impl FnMut(&mut User) -> Result<R, ApiError>,
) -> Result<R, ApiError> {
    store.update_json(&user_key(id), |doc: &mut Option<User>| match doc {
        Some(user) => f(user),
        None => Err(ApiError::not_found("User")),
    })?
}

pub fn update_post<R>(
    store: &dyn DocumentStore,
    id: &str,
    mut f: impl FnMut(&mut Post) -> Result<R, ApiError>,
) -> Result<R, ApiError> {
    store.update_json(&post_key(id), |doc: &mut Option<Post>| match doc {
        Some(post) => f(post),
        None => Err(ApiError::not_found("Post")),
    })?
}

/// Like [`update_post`] but treats a soft-deleted post as absent.
pub fn update_live_post<R>(
    store: &dyn DocumentStore,
    id: &str,
    mut f: impl FnMut(&mut Post) -> Result<R, ApiError>,
) -> Result<R, ApiError> {
    update_post(store, id, |post| {
        if post.is_deleted {
            return Err(ApiError::not_found("Post"));
        }
        f(post)
    })
}

pub fn update_comment<R>(
    store: &dyn DocumentStore,
    id: &str,
    mut f: impl FnMut(&mut Comment) -> Result<R, ApiError>,
) -> Result<R, ApiError> {
    store.update_json(&comment_key(id), |doc: &mut Option<Comment>| match doc {
        Some(comment) => f(comment),
        None => Err(ApiError::not_found("Comment")),
    })?
}

/// Puts `post_id` at the head of the global feed unless it is already there.
pub fn prepend_to_feed(store: &dyn DocumentStore, post_id: &str) -> anyhow::Result<()> {
    push_unique(store, FEED_KEY, post_id, true)
}

/// Appends `user_id` to the signup-ordered user list unless already listed.
pub fn append_to_users_list(store: &dyn DocumentStore, user_id: &str) -> anyhow::Result<()> {
    push_unique(store, USERS_LIST_KEY, user_id, false)
}

fn push_unique(store: &dyn DocumentStore, key: &str, id: &str, front: bool) -> anyhow::Result<()> {
    let pushed = store.update_json(key, |doc: &mut Option<Vec<String>>| {
        let ids = doc.get_or_insert_with(Vec::new);
        if !ids.iter().any(|existing| existing == id) {
            if front {
                ids.insert(0, id.to_string());
            } else {
                ids.push(id.to_string());
            }
        }
        Ok::<(), Infallible>(())
    })?;
    pushed.map_err(|never| match never {})
}

/// Loads every id in `ids`, silently skipping references whose document is
/// gone.
pub fn load_users(store: &dyn DocumentStore, ids: &[String]) -> anyhow::Result<Vec<User>> {
    let mut users = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(user) = load_user(store, id)? {
            users.push(user);
        }
    }
    Ok(users)
}

// === Demo data ===

const DEMO_MEDIA: &str = "https://picsum.photos/seed/mediagram/800/800";

fn demo_user(username: &str, bio: &str) -> anyhow::Result<User> {
    Ok(User {
        id: new_id(),
        username: username.to_string(),
        email: format!("{}@example.com", username),
        password: hash_password(username)?,
        profile: Profile {
            bio: bio.to_string(),
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
    })
}

/// Seeds `test`, `alice` and `bob` (password equals the username), one post
/// each, and a `test` -> `bob` follow edge. Does nothing once seeded.
pub fn init_test_data(store: &dyn DocumentStore) -> anyhow::Result<()> {
    if store.exists(&username_key("test"))? {
        return Ok(());
    }

    let mut seeded = Vec::new();

    for (username, bio, caption) in [
        ("test", "Test user bio", "This is my first post!"),
        ("alice", "Hello, I'm Alice!", "Welcome to my board! Excited to share photos here."),
        ("bob", "Bob's corner of the internet", "Hey everyone! Just joined."),
    ] {
        let mut user = demo_user(username, bio)?;

        let post = Post {
            id: new_id(),
            user_id: user.id.clone(),
            media: DEMO_MEDIA.to_string(),
            caption: caption.to_string(),
            like_count: 0,
            likes: Vec::new(),
            comments: Vec::new(),
            is_deleted: false,
            created_at: now_iso(),
            updated_at: None,
        };
        save_post(store, &post)?;
        prepend_to_feed(store, &post.id)?;
        user.posts.push(post.id);

        store.set_json(&username_key(&user.username), &user.id)?;
        store.set_json(&email_key(&user.email), &user.id)?;
        seeded.push(user);
    }

    // test follows bob
    let bob_id = seeded[2].id.clone();
    let test_id = seeded[0].id.clone();
    seeded[0].followings.push(bob_id);
    seeded[0].following_count = 1;
    seeded[2].followers.push(test_id);
    seeded[2].follower_count = 1;

    for user in &seeded {
        save_user(store, user)?;
        append_to_users_list(store, &user.id)?;
    }

    tracing::info!(users = seeded.len(), "seeded demo data");
    Ok(())
}

/// Deletes every document in the store.
pub fn reset_db_data(store: &dyn DocumentStore) -> anyhow::Result<()> {
    for key in store.get_keys()? {
        store.delete(&key)?;
    }
    Ok(())
}
