//! Ghost Admin API client
//!
//! Admin keys look like `{id}:{hex secret}`. Each publish signs a short-lived
//! HS256 token (`kid` = key id, audience `/admin/`) and posts HTML content.

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::retry::{RetryError, RetryPolicy};

const TOKEN_TTL_SECS: i64 = 5 * 60;

#[derive(Debug, thiserror::Error)]
pub enum GhostPublisherError {
    #[error("GhostPublisherError: admin API key must be '<id>:<hex secret>'")]
    InvalidKey,
    #[error("GhostPublisherError: failed to sign admin token: {0}")]
    Token(String),
    #[error("GhostPublisherError: {0}")]
    Call(#[from] RetryError),
    #[error("GhostPublisherError: unexpected response: {0}")]
    InvalidResponse(String),
    #[error("GhostPublisherError: invalid post: {0}")]
    InvalidPost(String),
}

/// Post to create
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GhostPost {
    pub title: String,
    pub html: String,
    pub excerpt: Option<String>,
    pub tags: Vec<String>,
    /// `draft` or `published`
    pub status: String,
}

/// What Ghost reports back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedPost {
    pub id: String,
    pub url: Option<String>,
    pub status: String,
}

impl GhostPost {
    pub fn check(&self) -> Result<(), GhostPublisherError> {
        if self.title.trim().is_empty() {
            return Err(GhostPublisherError::InvalidPost("title is empty".to_string()));
        }
        if self.html.trim().is_empty() {
            return Err(GhostPublisherError::InvalidPost("html is empty".to_string()));
        }
        if !matches!(self.status.as_str(), "draft" | "published") {
            return Err(GhostPublisherError::InvalidPost(format!(
                "unsupported status '{}'",
                self.status
            )));
        }
        Ok(())
    }
}

#[async_trait]
pub trait PostPublisher: Send + Sync {
    async fn publish(&self, post: &GhostPost) -> Result<PublishedPost, GhostPublisherError>;
}

#[derive(Debug, Serialize)]
struct AdminClaims {
    iat: i64,
    exp: i64,
    aud: &'static str,
}

#[derive(Debug, Deserialize)]
struct PostsEnvelope {
    posts: Vec<PublishedPost>,
}

#[derive(Clone)]
pub struct GhostClient {
    client: reqwest::Client,
    api_url: String,
    key_id: String,
    secret: Vec<u8>,
    policy: RetryPolicy,
}

impl GhostClient {
    pub fn new(
        api_url: &str,
        admin_api_key: &str,
        policy: RetryPolicy,
    ) -> Result<Self, GhostPublisherError> {
        let (key_id, secret_hex) = admin_api_key
            .split_once(':')
            .ok_or(GhostPublisherError::InvalidKey)?;
        if key_id.is_empty() {
            return Err(GhostPublisherError::InvalidKey);
        }
        let secret = hex::decode(secret_hex).map_err(|_| GhostPublisherError::InvalidKey)?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            key_id: key_id.to_string(),
            secret,
            policy,
        })
    }

    fn admin_token(&self) -> Result<String, GhostPublisherError> {
        let now = chrono::Utc::now().timestamp();
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(self.key_id.clone());

        let claims = AdminClaims {
            iat: now,
            exp: now + TOKEN_TTL_SECS,
            aud: "/admin/",
        };

        encode(&header, &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|e| GhostPublisherError::Token(e.to_string()))
    }
}

impl std::fmt::Debug for GhostClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GhostClient")
            .field("api_url", &self.api_url)
            .field("key_id", &self.key_id)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Ghost's `posts` envelope for a single post
pub fn post_body(post: &GhostPost) -> serde_json::Value {
    let tags: Vec<_> = post
        .tags
        .iter()
        .map(|name| serde_json::json!({ "name": name }))
        .collect();

    serde_json::json!({
        "posts": [{
            "title": &post.title,
            "html": &post.html,
            "custom_excerpt": &post.excerpt,
            "tags": tags,
            "status": &post.status,
        }]
    })
}

#[async_trait]
impl PostPublisher for GhostClient {
    async fn publish(&self, post: &GhostPost) -> Result<PublishedPost, GhostPublisherError> {
        post.check()?;
        let token = self.admin_token()?;
        let auth = format!("Ghost {}", token);
        let url = format!("{}/ghost/api/admin/posts/?source=html", self.api_url);

        let envelope: PostsEnvelope = self
            .policy
            .post_json(&self.client, &url, Some(&auth), &post_body(post))
            .await?;

        let published = envelope
            .posts
            .into_iter()
            .next()
            .ok_or_else(|| GhostPublisherError::InvalidResponse("empty posts array".to_string()))?;

        info!(post_id = %published.id, status = %published.status, "Published post to Ghost");
        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_malformed_admin_key() {
        let policy = RetryPolicy::default();
        assert!(matches!(
            GhostClient::new("https://blog.example", "no-colon", policy.clone()),
            Err(GhostPublisherError::InvalidKey)
        ));
        assert!(matches!(
            GhostClient::new("https://blog.example", "id:not-hex", policy.clone()),
            Err(GhostPublisherError::InvalidKey)
        ));
        assert!(GhostClient::new("https://blog.example/", "abc:00ff", policy).is_ok());
    }

    #[test]
    fn test_admin_token_has_kid() {
        let client =
            GhostClient::new("https://blog.example", "key123:a1b2c3d4", RetryPolicy::default())
                .unwrap();
        let token = client.admin_token().unwrap();
        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.kid.as_deref(), Some("key123"));
        assert_eq!(header.alg, Algorithm::HS256);
    }

    #[test]
    fn test_post_check() {
        let mut post = GhostPost {
            title: "Hello".to_string(),
            html: "<p>Hi</p>".to_string(),
            excerpt: None,
            tags: vec![],
            status: "published".to_string(),
        };
        assert!(post.check().is_ok());

        post.status = "scheduled".to_string();
        assert!(matches!(post.check(), Err(GhostPublisherError::InvalidPost(_))));

        post.status = "draft".to_string();
        post.html = " ".to_string();
        assert_eq!(
            post.check().unwrap_err().to_string(),
            "GhostPublisherError: invalid post: html is empty"
        );
    }

    #[test]
    fn test_post_body_shape() {
        let post = GhostPost {
            title: "Hello".to_string(),
            html: "<p>Hi</p>".to_string(),
            excerpt: None,
            tags: vec!["rust".to_string()],
            status: "draft".to_string(),
        };
        let body = post_body(&post);
        assert_eq!(body["posts"][0]["title"], "Hello");
        assert_eq!(body["posts"][0]["tags"][0]["name"], "rust");
        assert_eq!(body["posts"][0]["status"], "draft");
    }
}
