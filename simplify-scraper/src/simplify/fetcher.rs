use std::cmp::min;
use std::time::Duration;

use async_trait::async_trait;
use thirtyfour::prelude::*;

use super::{FetchError, Result, CARDS_PER_PAGE, FILTER_URL, LOGIN_URL};
use crate::types::Credentials;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Capability interface over the browser session: authenticate once, then
/// advance an opaque page cursor until no postings remain. `Ok(None)` from
/// [`PageFetcher::next_page`] is the end-of-pages signal.
#[async_trait]
pub trait PageFetcher {
    async fn authenticate(&mut self, credentials: &Credentials) -> Result<()>;
    async fn next_page(&mut self) -> Result<Option<String>>;
}

/// Fetcher backed by a live WebDriver session against simplify.jobs.
///
/// The listing is an infinite scroll, so the page cursor is simply how many
/// job cards have been consumed. Each `next_page` call captures the next
/// section of cards (card + opened detail pane) as one markup document and
/// scrolls to pull the following section in.
pub struct SimplifyFetcher {
    driver: WebDriver,
    timeout: Duration,
    consumed: usize,
    listing_loaded: bool,
}

impl SimplifyFetcher {
    pub fn new(driver: WebDriver, timeout: Duration) -> Self {
        Self {
            driver,
            timeout,
            consumed: 0,
            listing_loaded: false,
        }
    }

    /// Hand the underlying session back, e.g. to quit it cleanly.
    pub fn into_driver(self) -> WebDriver {
        self.driver
    }

    async fn wait_for(&self, css: &'static str) -> Result<WebElement> {
        self.driver
            .query(By::Css(css))
            .wait(self.timeout, POLL_INTERVAL)
            .first()
            .await
            .map_err(|_| FetchError::Timeout(css))
    }

    async fn on_login_route(&self) -> Result<bool> {
        let url = self.driver.current_url().await?;
        Ok(url.as_str().contains("/auth/login"))
    }

    async fn find_cards(&self) -> Result<Vec<WebElement>> {
        let cards = self.driver.find_all(By::Css("div.bg-white.rounded-md")).await?;
        Ok(cards)
    }

    /// Open one card's detail pane and capture card + pane as a single
    /// `job-entry` block. The detail URL carries the listing id, so it rides
    /// along as an attribute.
    async fn capture_entry(&self, card: &WebElement) -> Result<String> {
        card.find(By::Css("span.ml-2")).await?.click().await?;
        self.wait_for("button.text-lg").await?;
        let pane = self.driver.find(By::Css("div.relative.h-screen")).await?;
        let card_html = card.outer_html().await?;
        let pane_html = pane.outer_html().await?;
        let url = self.driver.current_url().await?;
        self.driver.find(By::Css("button.float-right")).await?.click().await?;
        self.driver
            .query(By::Css("div.fixed"))
            .wait(self.timeout, POLL_INTERVAL)
            .not_exists()
            .await?;
        Ok(format!(
            "<div class=\"job-entry\" data-url=\"{}\">{}{}</div>",
            url, card_html, pane_html
        ))
    }
}

#[async_trait]
impl PageFetcher for SimplifyFetcher {
    async fn authenticate(&mut self, credentials: &Credentials) -> Result<()> {
        log::info!("logging in to {}", LOGIN_URL);
        self.driver.goto(LOGIN_URL).await?;
        self.wait_for("button.flex").await?;
        let inputs = self.driver.find_all(By::Css("input.form-input")).await?;
        let (username, password) = match (inputs.first(), inputs.get(1)) {
            (Some(username), Some(password)) => (username, password),
            _ => return Err(FetchError::AuthRequired),
        };
        username.send_keys(credentials.username.as_str()).await?;
        password.send_keys(credentials.password.as_str()).await?;
        self.driver.find(By::Css("button.flex")).await?.click().await?;

        // The avatar pill only renders once the session is live.
        self.driver
            .query(By::Css("a.rounded-full.bg-primary-light"))
            .wait(self.timeout, POLL_INTERVAL)
            .first()
            .await
            .map_err(|_| FetchError::AuthRequired)?;
        log::info!("login successful");

        // A fresh session starts the listing over; the upsert keyed on
        // identity absorbs any cards seen again.
        self.listing_loaded = false;
        self.consumed = 0;
        Ok(())
    }

    async fn next_page(&mut self) -> Result<Option<String>> {
        if !self.listing_loaded {
            self.driver.goto(FILTER_URL).await?;
            if self.on_login_route().await? {
                return Err(FetchError::AuthRequired);
            }
            self.wait_for("div.bg-white.rounded-md").await?;
            self.listing_loaded = true;
        }

        let mut cards = self.find_cards().await?;
        if cards.len() <= self.consumed {
            // Pull the next section in and give the client side a moment.
            if let Some(last) = cards.last() {
                last.scroll_into_view().await?;
            }
            self.driver
                .execute("window.scrollTo(0, document.body.scrollHeight);", vec![])
                .await?;
            tokio::time::sleep(Duration::from_millis(500)).await;
            cards = self.find_cards().await?;
        }
        if cards.len() <= self.consumed {
            if self.on_login_route().await? {
                return Err(FetchError::AuthRequired);
            }
            log::info!(
                "no further job cards after {} consumed, treating as end of pages",
                self.consumed
            );
            return Ok(None);
        }

        let end = min(cards.len(), self.consumed + CARDS_PER_PAGE);
        let mut page = String::from("<div class=\"job-listing-page\">");
        for index in self.consumed..end {
            // Opening and closing panes goes stale fast, re-query each card.
            let cards = self.find_cards().await?;
            let card = match cards.get(index) {
                Some(card) => card,
                None => break,
            };
            match self.capture_entry(card).await {
                Ok(entry) => page.push_str(&entry),
                Err(e @ (FetchError::Timeout(_) | FetchError::AuthRequired)) => return Err(e),
                Err(e) => {
                    log::error!("failed to capture card {}: {}", index, e);
                }
            }
        }
        page.push_str("</div>");
        self.consumed = end;
        log::debug!("captured page of cards up to index {}", end);
        Ok(Some(page))
    }
}
