pub mod cdp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cdp::CdpBrowser;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("page inspection failed: {0}")]
    Inspection(String),
    #[error("session manipulation failed: {0}")]
    Session(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BrowserResult<T> = std::result::Result<T, BrowserError>;

/// One browser cookie, the unit of a restorable session snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub expires: Option<f64>,
}

/// The primitives the supervisor consumes from the browser-control layer.
///
/// The core never drives the browser beyond these calls; page navigation
/// strategy, element interaction and markup parsing live with the
/// implementor.
#[async_trait]
pub trait BrowserControl: Send + Sync {
    async fn current_url(&self) -> BrowserResult<String>;
    async fn page_content(&self) -> BrowserResult<String>;
    async fn has_element(&self, selector: &str) -> BrowserResult<bool>;
    async fn cookies(&self) -> BrowserResult<Vec<Cookie>>;
    async fn set_cookies(&self, cookies: Vec<Cookie>) -> BrowserResult<()>;
    async fn clear_cookies(&self) -> BrowserResult<()>;
    async fn clear_local_state(&self) -> BrowserResult<()>;
    async fn navigate(&self, url: &str) -> BrowserResult<()>;
    async fn reload(&self) -> BrowserResult<()>;
}
