mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use common::TestApp;
use spin_sdk::http::Method;

use mediagram::auth::{register, SignupRequest};
use mediagram::comments::{add_comment, delete_comment};
use mediagram::config::{email_key, post_key, username_key, FEED_KEY, USERS_LIST_KEY};
use mediagram::consistency::{audit, Inconsistency};
use mediagram::core::db::{
    feed, init_test_data, load_post, load_user, reset_db_data, save_post, save_user, users_list,
};
use mediagram::core::errors::ApiError;
use mediagram::core::store::{DocumentStore, MemoryStore, Write};
use mediagram::follow::{follow_user, get_followers, get_followings, unfollow_user};
use mediagram::media::{MediaHost, MediaUpload};
use mediagram::posts::{create_post, delete_post, like_post, publish_upload, unlike_post};
use mediagram::router::{handle_request, AppContext};

fn user(store: &dyn DocumentStore, username: &str) -> String {
    register(
        store,
        &SignupRequest {
            username: username.to_string(),
            email: format!("{}@example.com", username),
            password: "password".to_string(),
            ..SignupRequest::default()
        },
    )
    .unwrap()
    .id
}

#[test]
fn test_normal_operations_leave_store_consistent() {
    let mem = MemoryStore::new();
    let store: &dyn DocumentStore = &mem;
    let alice = user(store, "alice");
    let bob = user(store, "bob");
    let carol = user(store, "carol");

    follow_user(store, &alice, &bob).unwrap();
    follow_user(store, &carol, &bob).unwrap();
    follow_user(store, &bob, &alice).unwrap();
    unfollow_user(store, &carol, &bob).unwrap();

    let post = create_post(store, &bob, Some("https://cdn.example.com/b.jpg"), "hi").unwrap();
    let gone = create_post(store, &bob, Some("https://cdn.example.com/c.jpg"), "bye").unwrap();
    like_post(store, &alice, &post.id).unwrap();
    like_post(store, &carol, &post.id).unwrap();
    unlike_post(store, &carol, &post.id).unwrap();
    let comment = add_comment(store, &alice, &post.id, "first").unwrap();
    add_comment(store, &carol, &post.id, "second").unwrap();
    delete_comment(store, &alice, &comment.id).unwrap();
    delete_post(store, &bob, &gone.id).unwrap();

    let report = audit(store).unwrap();
    assert!(report.is_consistent(), "{:?}", report.issues);
    assert_eq!(report.users_scanned, 3);
    assert_eq!(report.posts_scanned, 2);
    assert_eq!(report.comments_scanned, 1);
}

#[test]
fn test_follow_is_idempotent_and_symmetric() {
    let mem = MemoryStore::new();
    let store: &dyn DocumentStore = &mem;
    let alice = user(store, "alice");
    let bob = user(store, "bob");

    assert!(follow_user(store, &alice, &bob).unwrap().changed());
    assert!(!follow_user(store, &alice, &bob).unwrap().changed());

    assert_eq!(get_followings(store, &alice).unwrap(), vec![bob.clone()]);
    assert_eq!(get_followers(store, &bob).unwrap(), vec![alice.clone()]);
    let bob_doc = load_user(store, &bob).unwrap().unwrap();
    assert_eq!(bob_doc.follower_count, 1);
    let alice_doc = load_user(store, &alice).unwrap().unwrap();
    assert_eq!(alice_doc.following_count, 1);

    assert!(unfollow_user(store, &alice, &bob).unwrap().changed());
    assert!(!unfollow_user(store, &alice, &bob).unwrap().changed());
    assert!(get_followers(store, &bob).unwrap().is_empty());
    assert_eq!(load_user(store, &bob).unwrap().unwrap().follower_count, 0);
}

#[test]
fn test_self_follow_mutates_nothing() {
    let mem = MemoryStore::new();
    let store: &dyn DocumentStore = &mem;
    let alice = user(store, "alice");
    let before = load_user(store, &alice).unwrap().unwrap();

    assert!(matches!(follow_user(store, &alice, &alice), Err(ApiError::SelfReference)));
    assert!(matches!(unfollow_user(store, &alice, &alice), Err(ApiError::SelfReference)));

    let after = load_user(store, &alice).unwrap().unwrap();
    assert!(after.followings.is_empty() && after.followers.is_empty());
    assert_eq!(after.following_count, before.following_count);
}

#[test]
fn test_follow_unknown_user_is_not_found() {
    let mem = MemoryStore::new();
    let store: &dyn DocumentStore = &mem;
    let alice = user(store, "alice");
    let ghost = uuid::Uuid::new_v4().to_string();

    assert!(matches!(follow_user(store, &alice, &ghost), Err(ApiError::NotFound(_))));
    assert!(load_user(store, &alice).unwrap().unwrap().followings.is_empty());
}

#[test]
fn test_retried_follow_repairs_half_edge() {
    let mem = MemoryStore::new();
    let store: &dyn DocumentStore = &mem;
    let alice = user(store, "alice");
    let bob = user(store, "bob");

    // A follow that died after the first write
    let mut alice_doc = load_user(store, &alice).unwrap().unwrap();
    alice_doc.followings.push(bob.clone());
    alice_doc.following_count = 1;
    save_user(store, &alice_doc).unwrap();

    let report = audit(store).unwrap();
    assert_eq!(
        report.issues,
        vec![Inconsistency::MissingFollowerSide { follower: alice.clone(), followee: bob.clone() }]
    );

    let change = follow_user(store, &alice, &bob).unwrap();
    assert!(!change.followings_changed);
    assert!(change.followers_changed);
    assert!(audit(store).unwrap().is_consistent());
}

#[test]
fn test_retried_unfollow_repairs_half_edge() {
    let mem = MemoryStore::new();
    let store: &dyn DocumentStore = &mem;
    let alice = user(store, "alice");
    let bob = user(store, "bob");
    follow_user(store, &alice, &bob).unwrap();

    // An unfollow that died after the first write
    let mut alice_doc = load_user(store, &alice).unwrap().unwrap();
    alice_doc.followings.clear();
    alice_doc.following_count = 0;
    save_user(store, &alice_doc).unwrap();

    let report = audit(store).unwrap();
    assert_eq!(
        report.issues,
        vec![Inconsistency::MissingFollowingSide { follower: alice.clone(), followee: bob.clone() }]
    );

    unfollow_user(store, &alice, &bob).unwrap();
    assert!(audit(store).unwrap().is_consistent());
    assert!(get_followers(store, &bob).unwrap().is_empty());
}

#[test]
fn test_audit_reports_drift_and_orphans() {
    let mem = MemoryStore::new();
    let store: &dyn DocumentStore = &mem;
    let alice = user(store, "alice");
    let post = create_post(store, &alice, Some("https://cdn.example.com/a.jpg"), "").unwrap();
    let comment = add_comment(store, &alice, &post.id, "hello").unwrap();

    let mut alice_doc = load_user(store, &alice).unwrap().unwrap();
    alice_doc.follower_count = 4;
    save_user(store, &alice_doc).unwrap();

    // Comment document written, post reference lost
    let mut post_doc = load_post(store, &post.id).unwrap().unwrap();
    post_doc.comments.clear();
    post_doc.like_count = 2;
    save_post(store, &post_doc).unwrap();

    let issues = audit(store).unwrap().issues;
    assert_eq!(issues.len(), 3, "{:?}", issues);
    assert!(issues.contains(&Inconsistency::FollowerCountDrift { user: alice.clone(), stored: 4, actual: 0 }));
    assert!(issues.contains(&Inconsistency::LikeCountDrift { post: post.id.clone(), stored: 2, actual: 0 }));
    assert!(issues.contains(&Inconsistency::OrphanComment { post: post.id.clone(), comment: comment.id.clone() }));
}

#[test]
fn test_audit_reports_dangling_and_stale_refs() {
    let mem = MemoryStore::new();
    let store: &dyn DocumentStore = &mem;
    let alice = user(store, "alice");
    let post = create_post(store, &alice, Some("https://cdn.example.com/a.jpg"), "").unwrap();
    let comment = add_comment(store, &alice, &post.id, "hello").unwrap();

    // Comment document gone, reference left behind
    store.delete(&mediagram::config::comment_key(&comment.id)).unwrap();

    // Post soft deleted, owner reference left behind
    let mut post_doc = load_post(store, &post.id).unwrap().unwrap();
    post_doc.is_deleted = true;
    save_post(store, &post_doc).unwrap();

    let issues = audit(store).unwrap().issues;
    assert!(issues.contains(&Inconsistency::DanglingCommentRef { post: post.id.clone(), comment: comment.id.clone() }));
    assert!(issues.contains(&Inconsistency::StalePostRef { user: alice.clone(), post: post.id.clone() }));

    // Comment reads skip the dangling reference
    let view = mediagram::comments::comment_views(store, &post_doc).unwrap();
    assert!(view.is_empty());
}

#[test]
fn test_like_count_tracks_likes() {
    let mem = MemoryStore::new();
    let store: &dyn DocumentStore = &mem;
    let owner = user(store, "owner");
    let fans: Vec<String> = (0..4).map(|i| user(store, &format!("fan{}", i))).collect();
    let post = create_post(store, &owner, Some("https://cdn.example.com/a.jpg"), "").unwrap();

    for fan in &fans {
        like_post(store, fan, &post.id).unwrap();
    }
    assert!(matches!(like_post(store, &fans[0], &post.id), Err(ApiError::AlreadyLiked)));
    unlike_post(store, &fans[1], &post.id).unwrap();
    assert!(matches!(unlike_post(store, &fans[1], &post.id), Err(ApiError::NotLiked)));

    let stored = load_post(store, &post.id).unwrap().unwrap();
    assert_eq!(stored.likes.len(), 3);
    assert_eq!(stored.like_count, 3);
}

#[test]
fn test_deleted_post_rejects_interaction() {
    let mem = MemoryStore::new();
    let store: &dyn DocumentStore = &mem;
    let owner = user(store, "owner");
    let fan = user(store, "fan");
    let post = create_post(store, &owner, Some("https://cdn.example.com/a.jpg"), "").unwrap();
    delete_post(store, &owner, &post.id).unwrap();

    assert!(matches!(like_post(store, &fan, &post.id), Err(ApiError::NotFound(_))));
    assert!(matches!(add_comment(store, &fan, &post.id, "hi"), Err(ApiError::NotFound(_))));
    assert!(matches!(delete_post(store, &owner, &post.id), Err(ApiError::NotFound(_))));

    // Soft delete keeps the document and its feed entry
    assert!(load_post(store, &post.id).unwrap().unwrap().is_deleted);
    assert_eq!(feed(store).unwrap(), vec![post.id.clone()]);
}

struct FailingHost;

impl MediaHost for FailingHost {
    fn upload(&self, _upload: &MediaUpload<'_>) -> Result<String, ApiError> {
        Err(ApiError::Upload("bucket unavailable".to_string()))
    }
}

#[test]
fn test_failed_upload_creates_nothing() {
    let mem = MemoryStore::new();
    let store: &dyn DocumentStore = &mem;
    let owner = user(store, "owner");
    let upload = MediaUpload {
        file_name: "a.png",
        content_type: Some("image/png"),
        bytes: &[1, 2, 3],
    };

    let result = publish_upload(store, &FailingHost, &owner, &upload, "caption");
    assert!(matches!(result, Err(ApiError::Upload(_))));
    assert!(feed(store).unwrap().is_empty());
    assert!(load_user(store, &owner).unwrap().unwrap().posts.is_empty());
}

#[test]
fn test_failed_upload_maps_to_bad_gateway() {
    let app = TestApp::new();
    let (_, token) = app.signup("owner");

    let bearer = format!("Bearer {}", token);
    let req = {
        let mut builder = spin_sdk::http::Request::builder();
        builder
            .method(Method::Post)
            .uri("/posts/create?filename=a.png")
            .header("Authorization", bearer.as_str())
            .header("Content-Type", "image/png");
        builder.body(vec![1, 2, 3]).build()
    };
    let ctx = AppContext { store: app.store(), media: &FailingHost, config: &app.config };
    let resp = handle_request(&ctx, &req);

    assert_eq!(*resp.status(), 502);
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["error"], "UploadError");
    assert!(feed(app.store()).unwrap().is_empty());
}

#[test]
fn test_seed_and_reset() {
    let mem = MemoryStore::new();
    let store: &dyn DocumentStore = &mem;

    init_test_data(store).unwrap();
    let seeded_keys = mem.len().unwrap();
    init_test_data(store).unwrap();
    assert_eq!(mem.len().unwrap(), seeded_keys);

    let report = audit(store).unwrap();
    assert!(report.is_consistent(), "{:?}", report.issues);
    assert_eq!(report.users_scanned, 3);
    assert_eq!(feed(store).unwrap().len(), 3);

    reset_db_data(store).unwrap();
    assert!(mem.is_empty().unwrap());
}

#[test]
fn test_audit_reports_unindexed_documents() {
    let mem = MemoryStore::new();
    let store: &dyn DocumentStore = &mem;
    let alice = user(store, "alice");
    let bob = user(store, "bob");
    let post = create_post(store, &alice, Some("https://cdn.example.com/a.jpg"), "").unwrap();

    // Post and signup writes that died before their index append
    store.set_json(FEED_KEY, &Vec::<String>::new()).unwrap();
    store.set_json(USERS_LIST_KEY, &vec![alice.clone()]).unwrap();

    let issues = audit(store).unwrap().issues;
    assert_eq!(issues.len(), 2, "{:?}", issues);
    assert!(issues.contains(&Inconsistency::MissingFromFeed { post: post.id.clone() }));
    assert!(issues.contains(&Inconsistency::UnlistedUser { user: bob.clone() }));
}

#[test]
fn test_taken_email_releases_username_claim() {
    let mem = MemoryStore::new();
    let store: &dyn DocumentStore = &mem;
    user(store, "alice");

    let taken = register(
        store,
        &SignupRequest {
            username: "bob".to_string(),
            email: "alice@example.com".to_string(),
            password: "password".to_string(),
            ..SignupRequest::default()
        },
    );
    assert!(matches!(taken, Err(ApiError::DuplicateIdentity)));
    assert!(!store.exists(&username_key("bob")).unwrap());
    assert_eq!(users_list(store).unwrap().len(), 1);

    // The username is free again
    user(store, "bob");
    assert_eq!(users_list(store).unwrap().len(), 2);
}

/// Delegates to a `MemoryStore` but holds the first two accesses to one key
/// at a barrier, so two racing writers both reach the key before either
/// can write it back.
struct GatedStore {
    inner: MemoryStore,
    key: String,
    arrivals: AtomicUsize,
    gate: Barrier,
}

impl GatedStore {
    fn around(inner: MemoryStore, key: String) -> Self {
        Self { inner, key, arrivals: AtomicUsize::new(0), gate: Barrier::new(2) }
    }

    fn pass(&self, key: &str) {
        if key == self.key && self.arrivals.fetch_add(1, Ordering::SeqCst) < 2 {
            self.gate.wait();
        }
    }
}

impl DocumentStore for GatedStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.pass(key);
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.inner.set(key, value)
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.inner.delete(key)
    }

    fn get_keys(&self) -> anyhow::Result<Vec<String>> {
        self.inner.get_keys()
    }

    fn update(
        &self,
        key: &str,
        step: &mut dyn FnMut(Option<&[u8]>) -> anyhow::Result<Write>,
    ) -> anyhow::Result<()> {
        self.pass(key);
        self.inner.update(key, step)
    }
}

/// Runs `job` once per input on blocking threads and collects the results
/// in input order.
async fn race<A, T, F>(store: &Arc<GatedStore>, inputs: Vec<A>, job: F) -> Vec<T>
where
    A: Send + 'static,
    T: Send + 'static,
    F: Fn(&dyn DocumentStore, A) -> T + Copy + Send + 'static,
{
    let handles: Vec<_> = inputs
        .into_iter()
        .map(|input| {
            let store = Arc::clone(store);
            tokio::task::spawn_blocking(move || {
                let store: &dyn DocumentStore = &*store;
                job(store, input)
            })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

#[tokio::test(flavor = "multi_thread")]
async fn test_racing_likes_are_both_kept() {
    let mem = MemoryStore::new();
    let owner = user(&mem, "owner");
    let first = user(&mem, "fan0");
    let second = user(&mem, "fan1");
    let post = create_post(&mem, &owner, Some("https://cdn.example.com/a.jpg"), "").unwrap();
    let store = Arc::new(GatedStore::around(mem, post_key(&post.id)));

    let results = race(
        &store,
        vec![(first, post.id.clone()), (second, post.id.clone())],
        |store: &dyn DocumentStore, (fan, post): (String, String)| like_post(store, &fan, &post).map(|_| ()),
    )
    .await;
    for result in results {
        result.unwrap();
    }

    let stored = load_post(&*store, &post.id).unwrap().unwrap();
    assert_eq!(stored.likes.len(), 2);
    assert_eq!(stored.like_count, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_racing_posts_both_reach_feed() {
    let mem = MemoryStore::new();
    let owner = user(&mem, "owner");
    let store = Arc::new(GatedStore::around(mem, FEED_KEY.to_string()));

    let results = race(
        &store,
        vec![(owner.clone(), "left".to_string()), (owner.clone(), "right".to_string())],
        |store: &dyn DocumentStore, (owner, caption): (String, String)| {
            create_post(store, &owner, Some("https://cdn.example.com/r.jpg"), &caption).map(|post| post.id)
        },
    )
    .await;
    let ids: Vec<String> = results.into_iter().map(Result::unwrap).collect();

    let listed = feed(&*store).unwrap();
    assert_eq!(listed.len(), 2);
    assert!(ids.iter().all(|id| listed.contains(id)));
    assert_eq!(load_user(&*store, &owner).unwrap().unwrap().posts.len(), 2);

    let report = audit(&*store).unwrap();
    assert!(report.is_consistent(), "{:?}", report.issues);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_racing_signups_claim_username_once() {
    let store = Arc::new(GatedStore::around(MemoryStore::new(), username_key("twin")));
    let emails = vec!["twin1@example.com".to_string(), "twin2@example.com".to_string()];

    let results = race(
        &store,
        emails.clone(),
        |store: &dyn DocumentStore, email: String| {
            register(
                store,
                &SignupRequest {
                    username: "twin".to_string(),
                    email,
                    password: "password".to_string(),
                    ..SignupRequest::default()
                },
            )
            .map(|user| user.id)
        },
    )
    .await;

    let winner = results.iter().position(Result::is_ok).unwrap();
    let loser = 1 - winner;
    assert!(matches!(results[loser], Err(ApiError::DuplicateIdentity)));
    let winner_id = results[winner].as_ref().unwrap().clone();

    let store: &dyn DocumentStore = &*store;
    assert_eq!(users_list(store).unwrap(), vec![winner_id.clone()]);
    assert_eq!(store.get_json::<String>(&username_key("twin")).unwrap(), Some(winner_id));
    assert!(!store.exists(&email_key(&emails[loser])).unwrap());
    assert!(audit(store).unwrap().is_consistent());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_follows_lose_no_edges() {
    let store = Arc::new(MemoryStore::new());
    let target = user(&*store, "popular");
    let fans: Vec<String> = (0..8).map(|i| user(&*store, &format!("fan{}", i))).collect();

    let mut handles = Vec::new();
    for fan in fans.clone() {
        let store = Arc::clone(&store);
        let target = target.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            follow_user(&*store, &fan, &target).map(|change| change.changed())
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().unwrap());
    }

    let report = audit(&*store).unwrap();
    assert!(report.is_consistent(), "{:?}", report.issues);
    let target_doc = load_user(&*store, &target).unwrap().unwrap();
    assert_eq!(target_doc.followers.len(), fans.len());
    assert_eq!(target_doc.follower_count, fans.len() as u64);
}
