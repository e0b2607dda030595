use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    ClearBrowserCookiesParams, CookieParam, TimeSinceEpoch,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{BrowserControl, BrowserError, BrowserResult, Cookie};

/// Chrome-DevTools-backed implementation of [`BrowserControl`].
///
/// Owns a single page; the supervisor only ever inspects and restores that
/// page, never opens new targets.
pub struct CdpBrowser {
    browser: Browser,
    page: Page,
    handler_task: Option<JoinHandle<()>>,
}

impl CdpBrowser {
    pub async fn launch(executable_path: &str, headless: bool, start_url: &str) -> BrowserResult<Self> {
        let mut builder = ChromiumConfig::builder().chrome_executable(executable_path);
        if !headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        let page = browser.new_page(start_url).await?;
        info!(url = start_url, headless, "launched supervised browser");

        Ok(Self {
            browser,
            page,
            handler_task: Some(handler_task),
        })
    }

    pub async fn close(mut self) -> BrowserResult<()> {
        self.browser.close().await?;
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
        Ok(())
    }

    pub fn page(&self) -> &Page {
        &self.page
    }
}

#[async_trait::async_trait]
impl BrowserControl for CdpBrowser {
    async fn current_url(&self) -> BrowserResult<String> {
        let url = self.page.url().await?;
        url.ok_or_else(|| BrowserError::Inspection("page has no url".to_string()))
    }

    async fn page_content(&self) -> BrowserResult<String> {
        Ok(self.page.content().await?)
    }

    async fn has_element(&self, selector: &str) -> BrowserResult<bool> {
        Ok(self.page.find_element(selector).await.is_ok())
    }

    async fn cookies(&self) -> BrowserResult<Vec<Cookie>> {
        let cookies = self.page.get_cookies().await?;
        Ok(cookies.into_iter().map(cookie_from_cdp).collect())
    }

    async fn set_cookies(&self, cookies: Vec<Cookie>) -> BrowserResult<()> {
        let mut params = Vec::with_capacity(cookies.len());
        for cookie in cookies {
            let mut builder = CookieParam::builder()
                .name(cookie.name)
                .value(cookie.value)
                .secure(cookie.secure)
                .http_only(cookie.http_only);
            if let Some(domain) = cookie.domain {
                builder = builder.domain(domain);
            }
            if let Some(path) = cookie.path {
                builder = builder.path(path);
            }
            if let Some(expires) = cookie.expires {
                builder = builder.expires(TimeSinceEpoch::new(expires));
            }
            params.push(builder.build().map_err(BrowserError::Session)?);
        }
        self.page.set_cookies(params).await?;
        Ok(())
    }

    async fn clear_cookies(&self) -> BrowserResult<()> {
        self.page
            .execute(ClearBrowserCookiesParams::default())
            .await?;
        Ok(())
    }

    async fn clear_local_state(&self) -> BrowserResult<()> {
        self.page
            .evaluate("window.localStorage.clear(); window.sessionStorage.clear();")
            .await?;
        Ok(())
    }

    async fn navigate(&self, url: &str) -> BrowserResult<()> {
        self.page.goto(url).await?;
        Ok(())
    }

    async fn reload(&self) -> BrowserResult<()> {
        self.page.reload().await?;
        Ok(())
    }
}

// CDP reports `expires` as a plain f64 (-1 for session cookies); only the
// outgoing `CookieParam` wraps it in `TimeSinceEpoch`.
fn cookie_from_cdp(cookie: chromiumoxide::cdp::browser_protocol::network::Cookie) -> Cookie {
    Cookie {
        name: cookie.name,
        value: cookie.value,
        domain: Some(cookie.domain),
        path: Some(cookie.path),
        secure: cookie.secure,
        http_only: cookie.http_only,
        expires: Some(cookie.expires),
    }
}
