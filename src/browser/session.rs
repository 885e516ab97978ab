use super::{parse_page_total, xpath_literal, CategoryPortal, ProductPage, SessionFactory};
use crate::config::{BrowserConfig, ScraperConfig};
use crate::error::HarvestError;
use crate::models::{Board, LeafRecord};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

// ── Portal markup ─────────────────────────────────────────────────────────────

const CHANNEL_SELECT: &str = ".next-channel-select-inner";
const CASCADER_MENUS: &str = ".next-channel-overlay-wrapper .next-channel-cascader-menu-wrapper";
const MENU_ITEM: &str = "li.next-channel-menu-item";
const MENU_ITEM_TEXT: &str = ".next-channel-menu-item-text";
const RANKING_LABELS: &str = "div.next-channel-radio-group span.next-channel-radio-label";
const TABS_NAV: &str = "ul.next-channel-tabs-nav";
const PAGER_DISPLAY: &str = "span.next-channel-pagination-display";
const GRID_IMAGES: &str = "tbody.next-channel-table-body tr.next-channel-table-row img.offer-img";
const METRIC_NUMBER: &str = ".card_content_item_box_number";
const LOADING_TEXT: &str = "加载中";
const MONTH_TOGGLE: &str = "//button[.//span[contains(text(),'近30天')]]";

/// One browser session driven over WebDriver. Each worker owns its own.
pub struct WebDriverSession {
    client: Client,
    portal_url: String,
    element_timeout: Duration,
    click_delay: Duration,
    page_turn_delay: Duration,
}

impl WebDriverSession {
    pub async fn connect(browser: &BrowserConfig, scraper: &ScraperConfig) -> Result<Self> {
        let mut args = vec![
            "--no-sandbox",
            "--disable-gpu",
            "--disable-blink-features=AutomationControlled",
        ];
        if browser.headless {
            args.push("--headless=new");
        }

        let mut caps = serde_json::Map::new();
        caps.insert("browserName".into(), json!("chrome"));
        caps.insert("goog:chromeOptions".into(), json!({ "args": args }));

        let mut builder = ClientBuilder::native();
        builder.capabilities(caps);
        let client = builder
            .connect(&browser.webdriver_url)
            .await
            .map_err(|e| HarvestError::Session {
                url: browser.webdriver_url.clone(),
                reason: e.to_string(),
            })?;

        debug!("WebDriver session opened at {}", browser.webdriver_url);
        Ok(Self {
            client,
            portal_url: browser.portal_url.clone(),
            element_timeout: Duration::from_secs(scraper.element_timeout_secs),
            click_delay: Duration::from_millis(scraper.click_delay_ms),
            page_turn_delay: Duration::from_millis(scraper.page_turn_delay_ms),
        })
    }

    pub async fn quit(self) {
        if let Err(e) = self.client.close().await {
            warn!("Closing WebDriver session failed: {}", e);
        }
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    /// Click once the element accepts clicks, polling until the element timeout.
    async fn click_when_ready(&self, element: &Element) -> Result<()> {
        let deadline = Instant::now() + self.element_timeout;
        loop {
            match element.click().await {
                Ok(()) => {
                    sleep(self.click_delay).await;
                    return Ok(());
                }
                Err(e) if Instant::now() >= deadline => {
                    return Err(anyhow!("element never became clickable: {e}"));
                }
                Err(_) => sleep(Duration::from_millis(250)).await,
            }
        }
    }

    /// Expand the category cascader unless it is already open.
    async fn open_category_popup(&self) {
        let Ok(select) = self.client.find(Locator::Css(CHANNEL_SELECT)).await else {
            debug!("Category selector not found");
            return;
        };
        let expanded = select.attr("aria-expanded").await.ok().flatten();
        if expanded.as_deref() != Some("true") && select.click().await.is_ok() {
            sleep(Duration::from_secs(1)).await;
        }
    }

    /// Items of cascader column `level` (0-based), `None` when that column is not rendered.
    async fn menu_items(&self, level: usize) -> Result<Option<Vec<Element>>> {
        let menus = self.client.find_all(Locator::Css(CASCADER_MENUS)).await?;
        match menus.get(level) {
            Some(menu) => Ok(Some(menu.find_all(Locator::Css(MENU_ITEM)).await?)),
            None => Ok(None),
        }
    }

    async fn item_label(item: &Element) -> String {
        match item.find(Locator::Css(MENU_ITEM_TEXT)).await {
            Ok(t) => t.text().await.unwrap_or_default().trim().to_string(),
            Err(_) => String::new(),
        }
    }

    async fn labels(items: &[Element]) -> Vec<String> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let label = Self::item_label(item).await;
            if !label.is_empty() {
                out.push(label);
            }
        }
        out
    }

    async fn find_item(&self, level: usize, label: &str) -> Result<Option<Element>> {
        let Some(items) = self.menu_items(level).await? else {
            return Ok(None);
        };
        for item in items {
            if Self::item_label(&item).await == label {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    async fn click_item(&self, level: usize, label: &str) -> Result<()> {
        let item = self
            .find_item(level, label)
            .await?
            .with_context(|| format!("menu item {label:?} not found at level {}", level + 1))?;
        self.click_when_ready(&item)
            .await
            .with_context(|| format!("clicking {label:?}"))
    }
}

/// Connects a fresh [`WebDriverSession`] for every category or leaf file.
pub struct WebDriverSessions {
    browser: BrowserConfig,
    scraper: ScraperConfig,
}

impl WebDriverSessions {
    pub fn new(browser: &BrowserConfig, scraper: &ScraperConfig) -> Self {
        Self {
            browser: browser.clone(),
            scraper: scraper.clone(),
        }
    }
}

#[async_trait]
impl SessionFactory for WebDriverSessions {
    type Session = WebDriverSession;

    async fn open(&self) -> Result<WebDriverSession> {
        WebDriverSession::connect(&self.browser, &self.scraper).await
    }

    async fn close(&self, session: WebDriverSession) {
        session.quit().await;
    }
}

#[async_trait]
impl CategoryPortal for WebDriverSession {
    async fn open_board(&self, ranking_mode: &str, board: Board) -> Result<()> {
        self.client
            .goto(&self.portal_url)
            .await
            .with_context(|| format!("loading {}", self.portal_url))?;
        sleep(Duration::from_secs(2)).await;

        if let Ok(labels) = self.client.find_all(Locator::Css(RANKING_LABELS)).await {
            for label in labels {
                if label.text().await.unwrap_or_default().trim() == ranking_mode {
                    if label.click().await.is_ok() {
                        sleep(self.click_delay).await;
                    }
                    break;
                }
            }
        }

        self.client
            .wait()
            .at_most(Duration::from_secs(10))
            .for_element(Locator::Css(TABS_NAV))
            .await
            .context("board tabs never rendered")?;

        let xpath = format!(
            "//ul[contains(@class,'next-channel-tabs-nav')]/li[.//div[text()={}]]",
            xpath_literal(board.label())
        );
        let tab = self
            .client
            .find(Locator::XPath(&xpath))
            .await
            .with_context(|| format!("board tab {board} not found"))?;
        tab.click().await?;
        sleep(self.click_delay).await;
        Ok(())
    }

    async fn select_top_level(&self, name: &str) -> Result<()> {
        self.open_category_popup().await;
        let items = self
            .menu_items(0)
            .await?
            .context("top-level menu not rendered")?;
        for item in items {
            let title = item.attr("title").await.ok().flatten().unwrap_or_default();
            if title.trim() == name {
                return self.click_when_ready(&item).await;
            }
        }
        bail!("top-level category {name:?} not found")
    }

    async fn second_level_labels(&self) -> Result<Vec<String>> {
        self.open_category_popup().await;
        let items = self
            .menu_items(1)
            .await?
            .context("second-level menu not rendered")?;
        Ok(Self::labels(&items).await)
    }

    async fn select_second_level(&self, label: &str) -> Result<Vec<String>> {
        self.open_category_popup().await;
        self.click_item(1, label).await?;
        match self.menu_items(2).await? {
            Some(items) => Ok(Self::labels(&items).await),
            None => Ok(Vec::new()),
        }
    }

    async fn select_third_level(&self, second: &str, third: &str) -> Result<()> {
        self.open_category_popup().await;
        if let Err(e) = self.click_item(1, second).await {
            debug!("Re-selecting {:?} failed: {:#}", second, e);
        }
        self.click_item(2, third).await
    }

    async fn page_count(&self) -> u32 {
        match self.client.find(Locator::Css(PAGER_DISPLAY)).await {
            Ok(el) => el
                .text()
                .await
                .ok()
                .and_then(|t| parse_page_total(&t))
                .unwrap_or(1),
            Err(_) => 1,
        }
    }

    async fn grid_products(&self) -> Result<Vec<LeafRecord>> {
        let images = self.client.find_all(Locator::Css(GRID_IMAGES)).await?;
        let mut out = Vec::with_capacity(images.len());
        for img in images {
            let link = match img.find(Locator::XPath("./ancestor::a")).await {
                Ok(a) => a.attr("href").await.ok().flatten(),
                Err(_) => None,
            };
            let Some(link) = link else { continue };
            let image = img.attr("src").await.ok().flatten().unwrap_or_default();
            out.push(LeafRecord { link, image });
        }
        Ok(out)
    }

    async fn goto_page(&self, page: u32) -> Result<()> {
        let xpath = format!("//button[span[text()='{page}']]");
        let button = self
            .client
            .find(Locator::XPath(&xpath))
            .await
            .with_context(|| format!("pager button {page} not found"))?;
        button.click().await?;
        sleep(self.page_turn_delay).await;
        Ok(())
    }
}

#[async_trait]
impl ProductPage for WebDriverSession {
    async fn load(&self, url: &str) -> Result<()> {
        self.client.goto(url).await?;
        Ok(())
    }

    async fn switch_to_month(&self) -> Result<()> {
        let toggle = self
            .client
            .wait()
            .at_most(self.element_timeout)
            .for_element(Locator::XPath(MONTH_TOGGLE))
            .await
            .context("30-day toggle not found")?;
        self.click_when_ready(&toggle).await?;

        let deadline = Instant::now() + self.element_timeout;
        loop {
            let loading = match self.client.find(Locator::Css(METRIC_NUMBER)).await {
                Ok(el) => el.text().await.unwrap_or_default().contains(LOADING_TEXT),
                Err(_) => true,
            };
            if !loading {
                return Ok(());
            }
            if Instant::now() >= deadline {
                bail!("metric cards still loading after toggle");
            }
            sleep(Duration::from_millis(250)).await;
        }
    }

    async fn html(&self) -> Result<String> {
        Ok(self.client.source().await?)
    }
}
