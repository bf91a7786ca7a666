use serde::{Serialize, Deserialize};

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Profile {
    pub first_name: String,
    pub last_name: String,
    pub bio: String,
    pub avatar: String,
}

/// Stored user document. `followers`/`followings` are the authoritative
/// edge sets; the counters mirror their sizes.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub profile: Profile,
    #[serde(default)]
    pub posts: Vec<String>,
    #[serde(default)]
    pub followers: Vec<String>,
    #[serde(default)]
    pub followings: Vec<String>,
    #[serde(default)]
    pub follower_count: u64,
    #[serde(default)]
    pub following_count: u64,
    #[serde(default)]
    pub credential_version: u32,
    pub created_at: String,
    pub updated_at: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub media: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub likes: Vec<String>,
    #[serde(default)]
    pub comments: Vec<String>,
    #[serde(default)]
    pub is_deleted: bool,
    pub created_at: String,
    pub updated_at: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub content: String,
    pub user_id: String,
    pub post_id: String,
    pub created_at: String,
    pub updated_at: Option<String>,
}

/// Claims carried inside a session token.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TokenClaims {
    pub sub: String,
    pub ver: u32,
    pub iat: i64,
    pub exp: i64,
}

// === Read-side shapes ===

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub profile: Profile,
    pub follower_count: u64,
    pub following_count: u64,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            profile: user.profile.clone(),
            follower_count: user.follower_count,
            following_count: user.following_count,
        }
    }
}

/// Public account record returned by signup and profile updates.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub profile: Profile,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            profile: user.profile.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub id: String,
    pub username: String,
    pub email: String,
    pub profile: Profile,
    pub posts: Vec<Post>,
    pub followers: Vec<UserSummary>,
    pub followings: Vec<UserSummary>,
    pub follower_count: u64,
    pub following_count: u64,
    pub created_at: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedUser {
    #[serde(flatten)]
    pub user: UserSummary,
    pub is_following: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    pub id: String,
    pub content: String,
    pub post_id: String,
    pub author: Option<UserSummary>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub id: String,
    pub media: String,
    pub caption: String,
    pub like_count: u64,
    pub author: Option<UserSummary>,
    pub likes: Vec<UserSummary>,
    pub comments: Vec<CommentView>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

pub type Followings = Vec<String>;
pub type Followers = Vec<String>;
