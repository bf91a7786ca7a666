pub const USERS_LIST_KEY: &str = "users_list";
pub const FEED_KEY: &str = "feed";

pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 50;
pub const MIN_PASSWORD_LENGTH: usize = 3;
pub const MAX_BIO_LENGTH: usize = 500;
pub const MAX_NAME_LENGTH: usize = 100;
pub const MAX_CAPTION_LENGTH: usize = 2200;
pub const MAX_COMMENT_LENGTH: usize = 5000;
pub const MAX_MEDIA_BYTES: usize = 50 * 1024 * 1024;
pub const ALLOWED_MEDIA_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

pub const POSTS_PER_PAGE: usize = 20;
pub const DEFAULT_SUGGESTION_LIMIT: usize = 3;
pub const MAX_SUGGESTION_LIMIT: usize = 50;

const DEFAULT_TOKEN_SECRET: &str = "mediagram-development-secret";
const DEFAULT_TOKEN_EXPIRATION_HOURS: i64 = 7 * 24;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

pub fn user_key(id: &str) -> String {
    format!("user:{}", id)
}

pub fn username_key(username: &str) -> String {
    format!("username:{}", username)
}

pub fn email_key(email: &str) -> String {
    format!("email:{}", email)
}

pub fn post_key(id: &str) -> String {
    format!("post:{}", id)
}

pub fn comment_key(id: &str) -> String {
    format!("comment:{}", id)
}

pub fn media_key(name: &str) -> String {
    format!("media:{}", name)
}

/// Runtime settings, read once from `MEDIAGRAM_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub token_secret: String,
    pub token_expiration_hours: i64,
    pub bind_addr: String,
    /// Prefix for URLs handed out by the built-in media host. Empty means
    /// root-relative (`/media/...`).
    pub media_base_url: String,
    pub seed_demo_data: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token_secret: DEFAULT_TOKEN_SECRET.to_string(),
            token_expiration_hours: DEFAULT_TOKEN_EXPIRATION_HOURS,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            media_base_url: String::new(),
            seed_demo_data: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let token_secret = match std::env::var("MEDIAGRAM_TOKEN_SECRET") {
            Ok(secret) if !secret.is_empty() => secret,
            _ => {
                tracing::warn!("MEDIAGRAM_TOKEN_SECRET not set, using the development secret");
                defaults.token_secret
            }
        };

        Self {
            token_secret,
            token_expiration_hours: token_expiration_hours(),
            bind_addr: std::env::var("MEDIAGRAM_BIND").unwrap_or(defaults.bind_addr),
            media_base_url: std::env::var("MEDIAGRAM_MEDIA_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.media_base_url),
            seed_demo_data: std::env::var("MEDIAGRAM_SEED_DEMO")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

pub fn token_expiration_hours() -> i64 {
    std::env::var("MEDIAGRAM_TOKEN_EXPIRATION_HOURS")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|hours| *hours > 0)
        .unwrap_or(DEFAULT_TOKEN_EXPIRATION_HOURS)
}
