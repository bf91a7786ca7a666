#![allow(dead_code)]

use serde_json::Value;
use spin_sdk::http::{Method, Request, Response};

use mediagram::config::Config;
use mediagram::core::store::{DocumentStore, MemoryStore};
use mediagram::media::KvMediaHost;
use mediagram::router::{handle_request, AppContext};

/// Drives the router in-process against a fresh in-memory store.
pub struct TestApp {
    pub store: MemoryStore,
    pub config: Config,
}

impl TestApp {
    pub fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            config: Config {
                token_secret: "integration-secret".to_string(),
                ..Config::default()
            },
        }
    }

    pub fn store(&self) -> &dyn DocumentStore {
        &self.store
    }

    pub fn send(&self, method: Method, uri: &str, headers: &[(&str, &str)], body: Vec<u8>) -> Response {
        let mut builder = Request::builder();
        builder.method(method).uri(uri);
        for (name, value) in headers {
            builder.header(*name, *value);
        }
        let req = builder.body(body).build();

        let media = KvMediaHost::new(&self.store, &self.config.media_base_url);
        let ctx = AppContext {
            store: &self.store,
            media: &media,
            config: &self.config,
        };
        handle_request(&ctx, &req)
    }

    pub fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (u16, Value) {
        let bearer = token.map(|t| format!("Bearer {}", t));
        let mut headers = vec![("Content-Type", "application/json")];
        if let Some(bearer) = &bearer {
            headers.push(("Authorization", bearer.as_str()));
        }
        let body = body.map(|b| serde_json::to_vec(&b).unwrap()).unwrap_or_default();

        let resp = self.send(method, uri, &headers, body);
        let status = *resp.status();
        let json = if resp.body().is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(resp.body()).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// Registers `username` with password `password` and returns (id, token).
    pub fn signup(&self, username: &str) -> (String, String) {
        let (status, body) = self.call(
            Method::Post,
            "/auth/signup",
            None,
            Some(serde_json::json!({
                "username": username,
                "email": format!("{}@example.com", username),
                "password": "password",
            })),
        );
        assert_eq!(status, 201, "signup failed: {:?}", body);
        (
            body["user"]["id"].as_str().unwrap().to_string(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    /// Creates a post from a pre-uploaded media URL and returns its id.
    pub fn post(&self, token: &str, caption: &str) -> String {
        let (status, body) = self.call(
            Method::Post,
            "/posts/create",
            Some(token),
            Some(serde_json::json!({
                "mediaUrl": "https://cdn.example.com/p.jpg",
                "caption": caption,
            })),
        );
        assert_eq!(status, 201, "create post failed: {:?}", body);
        body["post"]["id"].as_str().unwrap().to_string()
    }
}
