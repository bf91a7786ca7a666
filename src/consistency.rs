//! Read-only consistency audit.
//!
//! Multi-document operations are not atomic, so a failure between two
//! writes leaves the denormalized copies disagreeing. Every such state is
//! representable in the stored documents; this module finds them. It never
//! writes.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::warn;

use crate::core::db::{feed, users_list};
use crate::core::store::DocumentStore;
use crate::models::models::{Comment, Post, User};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Inconsistency {
    /// `follower.followings ∋ followee` but `followee.followers ∌ follower`.
    MissingFollowerSide { follower: String, followee: String },
    /// `followee.followers ∋ follower` but `follower.followings ∌ followee`.
    MissingFollowingSide { follower: String, followee: String },
    FollowerCountDrift { user: String, stored: u64, actual: u64 },
    FollowingCountDrift { user: String, stored: u64, actual: u64 },
    LikeCountDrift { post: String, stored: u64, actual: u64 },
    /// The post's comment set names a comment that does not exist.
    DanglingCommentRef { post: String, comment: String },
    /// A comment document its post's comment set does not reference.
    OrphanComment { post: String, comment: String },
    /// A live post missing from its owner's post set.
    UnlinkedPost { user: String, post: String },
    /// An owner's post set naming a deleted or missing post.
    StalePostRef { user: String, post: String },
    /// A post document the global feed does not list.
    MissingFromFeed { post: String },
    /// A user document the signup-ordered user list does not list.
    UnlistedUser { user: String },
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    pub users_scanned: usize,
    pub posts_scanned: usize,
    pub comments_scanned: usize,
    pub issues: Vec<Inconsistency>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }
}

fn load_all<T: serde::de::DeserializeOwned>(store: &dyn DocumentStore, prefix: &str) -> anyhow::Result<Vec<T>> {
    let mut docs = Vec::new();
    for key in store.keys_with_prefix(prefix)? {
        if let Some(doc) = store.get_json(&key)? {
            docs.push(doc);
        }
    }
    Ok(docs)
}

pub fn audit(store: &dyn DocumentStore) -> anyhow::Result<ConsistencyReport> {
    let users: Vec<User> = load_all(store, "user:")?;
    let posts: Vec<Post> = load_all(store, "post:")?;
    let comments: Vec<Comment> = load_all(store, "comment:")?;

    let mut report = ConsistencyReport {
        users_scanned: users.len(),
        posts_scanned: posts.len(),
        comments_scanned: comments.len(),
        issues: Vec::new(),
    };

    check_follow_edges(&users, &mut report.issues);
    check_posts(&users, &posts, &mut report.issues);
    check_comments(&posts, &comments, &mut report.issues);
    check_indexes(&feed(store)?, &users_list(store)?, &users, &posts, &mut report.issues);

    if !report.is_consistent() {
        warn!(issues = report.issues.len(), "consistency audit found issues");
    }
    Ok(report)
}

fn check_follow_edges(users: &[User], issues: &mut Vec<Inconsistency>) {
    let by_id: HashMap<&str, &User> = users.iter().map(|u| (u.id.as_str(), u)).collect();

    for user in users {
        if user.follower_count != user.followers.len() as u64 {
            issues.push(Inconsistency::FollowerCountDrift {
                user: user.id.clone(),
                stored: user.follower_count,
                actual: user.followers.len() as u64,
            });
        }
        if user.following_count != user.followings.len() as u64 {
            issues.push(Inconsistency::FollowingCountDrift {
                user: user.id.clone(),
                stored: user.following_count,
                actual: user.followings.len() as u64,
            });
        }

        for followee in &user.followings {
            let mirrored = by_id
                .get(followee.as_str())
                .is_some_and(|other| other.followers.contains(&user.id));
            if !mirrored {
                issues.push(Inconsistency::MissingFollowerSide {
                    follower: user.id.clone(),
                    followee: followee.clone(),
                });
            }
        }
        for follower in &user.followers {
            let mirrored = by_id
                .get(follower.as_str())
                .is_some_and(|other| other.followings.contains(&user.id));
            if !mirrored {
                issues.push(Inconsistency::MissingFollowingSide {
                    follower: follower.clone(),
                    followee: user.id.clone(),
                });
            }
        }
    }
}

fn check_posts(users: &[User], posts: &[Post], issues: &mut Vec<Inconsistency>) {
    let by_id: HashMap<&str, &Post> = posts.iter().map(|p| (p.id.as_str(), p)).collect();
    let owners: HashMap<&str, &User> = users.iter().map(|u| (u.id.as_str(), u)).collect();

    for post in posts {
        if post.like_count != post.likes.len() as u64 {
            issues.push(Inconsistency::LikeCountDrift {
                post: post.id.clone(),
                stored: post.like_count,
                actual: post.likes.len() as u64,
            });
        }
        if post.is_deleted {
            continue;
        }
        let linked = owners
            .get(post.user_id.as_str())
            .is_some_and(|owner| owner.posts.contains(&post.id));
        if !linked {
            issues.push(Inconsistency::UnlinkedPost {
                user: post.user_id.clone(),
                post: post.id.clone(),
            });
        }
    }

    for user in users {
        for post_id in &user.posts {
            let live = by_id.get(post_id.as_str()).is_some_and(|p| !p.is_deleted);
            if !live {
                issues.push(Inconsistency::StalePostRef {
                    user: user.id.clone(),
                    post: post_id.clone(),
                });
            }
        }
    }
}

fn check_comments(posts: &[Post], comments: &[Comment], issues: &mut Vec<Inconsistency>) {
    let comment_ids: HashSet<&str> = comments.iter().map(|c| c.id.as_str()).collect();
    let posts_by_id: HashMap<&str, &Post> = posts.iter().map(|p| (p.id.as_str(), p)).collect();

    for post in posts {
        for comment_id in &post.comments {
            if !comment_ids.contains(comment_id.as_str()) {
                issues.push(Inconsistency::DanglingCommentRef {
                    post: post.id.clone(),
                    comment: comment_id.clone(),
                });
            }
        }
    }

    for comment in comments {
        let referenced = posts_by_id
            .get(comment.post_id.as_str())
            .is_some_and(|p| p.comments.contains(&comment.id));
        if !referenced {
            issues.push(Inconsistency::OrphanComment {
                post: comment.post_id.clone(),
                comment: comment.id.clone(),
            });
        }
    }
}

fn check_indexes(feed: &[String], listed: &[String], users: &[User], posts: &[Post], issues: &mut Vec<Inconsistency>) {
    let feed: HashSet<&str> = feed.iter().map(String::as_str).collect();
    let listed: HashSet<&str> = listed.iter().map(String::as_str).collect();

    for post in posts {
        if !feed.contains(post.id.as_str()) {
            issues.push(Inconsistency::MissingFromFeed { post: post.id.clone() });
        }
    }
    for user in users {
        if !listed.contains(user.id.as_str()) {
            issues.push(Inconsistency::UnlistedUser { user: user.id.clone() });
        }
    }
}
