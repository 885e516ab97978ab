pub mod cleaner;
pub mod parsers;

use crate::browser::ProductPage;
use crate::config::ScraperConfig;
use crate::models::{MetricRecord, TimeRange};
use crate::utils::retry::RetryPolicy;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use self::parsers::parse_product_page;

/// Reads the metric cards of product detail pages through a [`ProductPage`].
pub struct MetricScraper {
    time_range: TimeRange,
    load_policy: RetryPolicy,
    toggle_policy: RetryPolicy,
    scrape_policy: RetryPolicy,
    toggle_settle: Duration,
}

impl MetricScraper {
    pub fn new(config: &ScraperConfig) -> Self {
        Self {
            time_range: config.time_range,
            load_policy: RetryPolicy::from_millis(config.page_load_attempts, config.page_load_backoff_ms),
            toggle_policy: RetryPolicy::from_millis(config.toggle_attempts, config.toggle_backoff_ms),
            scrape_policy: RetryPolicy::new(config.scrape_attempts, Duration::ZERO),
            toggle_settle: Duration::from_millis(config.toggle_settle_ms),
        }
    }

    /// One pass over `url`. A page that never loads yields an empty record.
    pub async fn scrape_once<P>(&self, page: &P, url: &str) -> MetricRecord
    where
        P: ProductPage + ?Sized,
    {
        let attempt = AtomicU32::new(0);
        let loaded = self
            .load_policy
            .run(|| {
                let n = attempt.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    page.load(url).await.inspect_err(|e| {
                        warn!("Load attempt {} failed for {}: {:#}", n, url, e);
                    })
                }
            })
            .await;
        if loaded.is_err() {
            warn!("Page never loaded, skipping {}", url);
            return MetricRecord::default();
        }

        if self.time_range.needs_toggle() {
            let attempt = AtomicU32::new(0);
            let toggled = self
                .toggle_policy
                .run(|| {
                    let n = attempt.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        page.switch_to_month().await.inspect_err(|e| {
                            warn!("30-day toggle attempt {} failed for {}: {:#}", n, url, e);
                        })
                    }
                })
                .await;
            if toggled.is_err() {
                warn!("Reading {} without the 30-day view", url);
            }
            sleep(self.toggle_settle).await;
        }

        let html = match page.html().await {
            Ok(h) => h,
            Err(e) => {
                warn!("Could not read page source of {}: {:#}", url, e);
                return MetricRecord::default();
            }
        };
        match parse_product_page(&html) {
            Ok(record) => record,
            Err(e) => {
                warn!("Could not parse {}: {:#}", url, e);
                MetricRecord::default()
            }
        }
    }

    /// Scrape `url`, repeating while nothing at all was found. Returns the
    /// last (empty) record when every attempt came back empty.
    pub async fn scrape<P>(&self, page: &P, url: &str) -> MetricRecord
    where
        P: ProductPage + ?Sized,
    {
        let attempt = AtomicU32::new(0);
        let outcome = self
            .scrape_policy
            .run(|| {
                let n = attempt.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    let record = self.scrape_once(page, url).await;
                    if record.is_empty() {
                        warn!("Empty scrape {}/{} for {}", n, self.scrape_policy.max_attempts, url);
                        Err(record)
                    } else {
                        Ok(record)
                    }
                }
            })
            .await;

        match outcome {
            Ok(record) => {
                debug!("Scraped {} ({} fields missing)", url, record.missing().len());
                record
            }
            Err(record) => {
                warn!("Giving up on {}", url);
                record
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metric;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    const FULL_PAGE: &str = r#"<html><body>
        <div class="header_right_title">玻璃水杯</div>
        <div class="card_content_item_box"><div class="card_content_item_box_title">搜索人气</div><div class="card_content_item_box_number">1</div></div>
        <div class="card_content_item_box"><div class="card_content_item_box_title">搜索热度</div><div class="card_content_item_box_number">2</div></div>
        <div class="card_content_item_box"><div class="card_content_item_box_title">点击人气</div><div class="card_content_item_box_number">120</div></div>
        <div class="card_content_item_box"><div class="card_content_item_box_title">点击热度</div><div class="card_content_item_box_number">4</div></div>
        <div class="card_content_item_box"><div class="card_content_item_box_title">点击率</div><div class="card_content_item_box_number">5%</div></div>
        <div class="card_content_item_box"><div class="card_content_item_box_title">交易指数</div><div class="card_content_item_box_number">6</div></div>
        <div class="card_content_item_box"><div class="card_content_item_box_title">支付转化率</div><div class="card_content_item_box_number">25%</div></div>
        <div class="card_content_item_box"><div class="card_content_item_box_title">商品指数</div><div class="card_content_item_box_number">500</div></div>
        <div class="card_content_item_box"><div class="card_content_item_box_title">飙升热度（%）</div><div class="card_content_item_box_number">9</div></div>
        <a href="https://item.taobao.com/item.htm?id=7">查看淘宝商品详情</a>
    </body></html>"#;

    /// Scripted page: fails the first `load_failures` loads and serves
    /// `pages` in order, repeating the last one.
    #[derive(Default)]
    struct FakePage {
        load_failures: u32,
        toggle_failures: u32,
        pages: Vec<&'static str>,
        calls: Mutex<Calls>,
    }

    #[derive(Default)]
    struct Calls {
        loads: u32,
        toggles: u32,
        reads: usize,
    }

    #[async_trait]
    impl ProductPage for FakePage {
        async fn load(&self, _url: &str) -> Result<()> {
            let mut c = self.calls.lock().unwrap();
            c.loads += 1;
            if c.loads <= self.load_failures {
                bail!("net::ERR_CONNECTION_RESET");
            }
            Ok(())
        }

        async fn switch_to_month(&self) -> Result<()> {
            let mut c = self.calls.lock().unwrap();
            c.toggles += 1;
            if c.toggles <= self.toggle_failures {
                bail!("toggle not clickable");
            }
            Ok(())
        }

        async fn html(&self) -> Result<String> {
            let mut c = self.calls.lock().unwrap();
            let page = self.pages[c.reads.min(self.pages.len() - 1)];
            c.reads += 1;
            Ok(page.to_string())
        }
    }

    fn fast_config(time_range: TimeRange) -> ScraperConfig {
        ScraperConfig {
            time_range,
            page_load_backoff_ms: 1,
            toggle_backoff_ms: 1,
            toggle_settle_ms: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn flaky_load_is_retried() {
        let page = FakePage { load_failures: 2, pages: vec![FULL_PAGE], ..Default::default() };
        let scraper = MetricScraper::new(&fast_config(TimeRange::Week));

        let record = scraper.scrape(&page, "https://p/1").await;
        assert!(record.is_complete());
        assert_eq!(record.get(Metric::ConversionRate), Some("25%"));
        let calls = page.calls.lock().unwrap();
        assert_eq!(calls.loads, 3);
        assert_eq!(calls.toggles, 0);
    }

    #[tokio::test]
    async fn page_that_never_loads_gives_empty_record() {
        let page = FakePage { load_failures: u32::MAX, pages: vec![FULL_PAGE], ..Default::default() };
        let scraper = MetricScraper::new(&fast_config(TimeRange::Week));

        let record = scraper.scrape(&page, "https://p/dead").await;
        assert!(record.is_empty());
        // 3 scrape attempts × 6 load attempts
        assert_eq!(page.calls.lock().unwrap().loads, 18);
        assert_eq!(page.calls.lock().unwrap().reads, 0);
    }

    #[tokio::test]
    async fn empty_scrape_is_retried_until_something_shows() {
        let page = FakePage { pages: vec!["<html></html>", FULL_PAGE], ..Default::default() };
        let scraper = MetricScraper::new(&fast_config(TimeRange::Week));

        let record = scraper.scrape(&page, "https://p/2").await;
        assert_eq!(record.product_name.as_deref(), Some("玻璃水杯"));
        assert_eq!(page.calls.lock().unwrap().reads, 2);
    }

    #[tokio::test]
    async fn month_view_toggles_before_reading() {
        let page = FakePage { toggle_failures: 1, pages: vec![FULL_PAGE], ..Default::default() };
        let scraper = MetricScraper::new(&fast_config(TimeRange::Month));

        let record = scraper.scrape(&page, "https://p/3").await;
        assert!(record.is_complete());
        assert_eq!(page.calls.lock().unwrap().toggles, 2);
    }

    #[test]
    fn toggle_exhaustion_still_reads_page() {
        let page = FakePage { toggle_failures: u32::MAX, pages: vec![FULL_PAGE], ..Default::default() };
        let scraper = MetricScraper::new(&fast_config(TimeRange::Month));

        let record = tokio_test::block_on(scraper.scrape_once(&page, "https://p/4"));
        assert!(record.is_complete());
        assert_eq!(page.calls.lock().unwrap().toggles, 6);
    }
}
