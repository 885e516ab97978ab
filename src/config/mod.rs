use crate::models::{Board, TimeRange};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub images: ImageConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub assembly: AssemblyConfig,
}

/// WebDriver / portal configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserConfig {
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,

    /// chromedriver binary to launch for the duration of the run.
    /// When unset, a driver must already listen on `webdriver_url`.
    #[serde(default)]
    pub driver_path: Option<PathBuf>,

    #[serde(default)]
    pub headless: bool,

    #[serde(default = "default_portal_url")]
    pub portal_url: String,

    #[serde(default)]
    pub board: Board,

    #[serde(default = "default_ranking_mode")]
    pub ranking_mode: String,
}

/// Product page scraping configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default)]
    pub time_range: TimeRange,

    #[serde(default = "default_page_load_attempts")]
    pub page_load_attempts: u32,

    #[serde(default = "default_page_load_backoff_ms")]
    pub page_load_backoff_ms: u64,

    #[serde(default = "default_toggle_attempts")]
    pub toggle_attempts: u32,

    #[serde(default = "default_toggle_backoff_ms")]
    pub toggle_backoff_ms: u64,

    /// Pause after a successful toggle before reading the page.
    #[serde(default = "default_toggle_settle_ms")]
    pub toggle_settle_ms: u64,

    #[serde(default = "default_scrape_attempts")]
    pub scrape_attempts: u32,

    #[serde(default = "default_element_timeout_secs")]
    pub element_timeout_secs: u64,

    #[serde(default = "default_click_delay_ms")]
    pub click_delay_ms: u64,

    #[serde(default = "default_page_turn_delay_ms")]
    pub page_turn_delay_ms: u64,
}

/// Thumbnail download configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageConfig {
    #[serde(default = "default_image_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_image_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,
}

/// Filesystem layout
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    #[serde(default = "default_task_source")]
    pub task_source: PathBuf,

    #[serde(default = "default_link_dir")]
    pub link_dir: PathBuf,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_failure_log")]
    pub failure_log: PathBuf,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub steps: StepsConfig,
}

/// Which stages `run` executes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StepsConfig {
    #[serde(default = "default_true")]
    pub crawl: bool,
    #[serde(default = "default_true")]
    pub scrape: bool,
    #[serde(default = "default_true")]
    pub finalize: bool,
}

/// Embedded thumbnail geometry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssemblyConfig {
    #[serde(default = "default_image_px")]
    pub image_width_px: u32,

    #[serde(default = "default_image_px")]
    pub image_height_px: u32,

    /// Width of column A in characters.
    #[serde(default = "default_image_column_width")]
    pub image_column_width: f64,

    /// Height of image rows in points.
    #[serde(default = "default_image_row_height")]
    pub image_row_height: f64,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_webdriver_url() -> String {
    "http://localhost:9515".to_string()
}
fn default_portal_url() -> String {
    "https://air.1688.com/app/fuwu-assets/work-buyer-plugin-frame/home.html".to_string()
}
fn default_ranking_mode() -> String {
    "趋势热品".to_string()
}
fn default_page_load_attempts() -> u32 {
    6
}
fn default_page_load_backoff_ms() -> u64 {
    5000
}
fn default_toggle_attempts() -> u32 {
    6
}
fn default_toggle_backoff_ms() -> u64 {
    1000
}
fn default_toggle_settle_ms() -> u64 {
    1000
}
fn default_scrape_attempts() -> u32 {
    3
}
fn default_element_timeout_secs() -> u64 {
    5
}
fn default_click_delay_ms() -> u64 {
    500
}
fn default_page_turn_delay_ms() -> u64 {
    800
}
fn default_image_timeout_secs() -> u64 {
    10
}
fn default_image_attempts() -> u32 {
    3
}
fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (Windows NT 6.3; WOW64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/39.0.2171.95 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_9_2) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/35.0.1916.153 Safari/537.36",
        "Mozilla/5.0 (Windows NT 6.1; WOW64; rv:30.0) Gecko/20100101 Firefox/30.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_9_2) AppleWebKit/537.75.14 (KHTML, like Gecko) Version/7.0.3 Safari/537.75.14",
        "Mozilla/5.0 (compatible; MSIE 10.0; Windows NT 6.2; Win64; x64; Trident/6.0)",
        "Mozilla/5.0 (Windows; U; Windows NT 5.1; it; rv:1.8.1.11) Gecko/20071127 Firefox/2.0.0.11",
        "Opera/9.25 (Windows NT 5.1; U; en)",
        "Mozilla/5.0 (compatible; Konqueror/3.5; Linux) KHTML/3.5.5 (like Gecko) (Kubuntu)",
        "Mozilla/5.0 (X11; U; Linux i686; en-US; rv:1.8.0.12) Gecko/20070731 Ubuntu/dapper-security Firefox/1.5.0.12",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
        "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_task_source() -> PathBuf {
    PathBuf::from("一级类目.xlsx")
}
fn default_link_dir() -> PathBuf {
    PathBuf::from("product_link")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}
fn default_failure_log() -> PathBuf {
    PathBuf::from("损坏文件记录.csv")
}
fn default_true() -> bool {
    true
}
fn default_concurrency() -> usize {
    2
}
fn default_image_px() -> u32 {
    50
}
fn default_image_column_width() -> f64 {
    10.0
}
fn default_image_row_height() -> f64 {
    40.0
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: default_webdriver_url(),
            driver_path: None,
            headless: false,
            portal_url: default_portal_url(),
            board: Board::default(),
            ranking_mode: default_ranking_mode(),
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            time_range: TimeRange::default(),
            page_load_attempts: default_page_load_attempts(),
            page_load_backoff_ms: default_page_load_backoff_ms(),
            toggle_attempts: default_toggle_attempts(),
            toggle_backoff_ms: default_toggle_backoff_ms(),
            toggle_settle_ms: default_toggle_settle_ms(),
            scrape_attempts: default_scrape_attempts(),
            element_timeout_secs: default_element_timeout_secs(),
            click_delay_ms: default_click_delay_ms(),
            page_turn_delay_ms: default_page_turn_delay_ms(),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_image_timeout_secs(),
            max_attempts: default_image_attempts(),
            user_agents: default_user_agents(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            task_source: default_task_source(),
            link_dir: default_link_dir(),
            output_dir: default_output_dir(),
            failure_log: default_failure_log(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            steps: StepsConfig::default(),
        }
    }
}

impl Default for StepsConfig {
    fn default() -> Self {
        Self {
            crawl: true,
            scrape: true,
            finalize: true,
        }
    }
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            image_width_px: default_image_px(),
            image_height_px: default_image_px(),
            image_column_width: default_image_column_width(),
            image_row_height: default_image_row_height(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(environment())
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize()?;
        Ok(app_cfg)
    }

    /// Worker pool size: configured concurrency capped by available CPUs.
    pub fn worker_count(&self) -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.pipeline.concurrency.clamp(1, cpus.max(1))
    }
}

/// `HARVEST__<SECTION>__<KEY>`, e.g. `HARVEST__PIPELINE__CONCURRENCY=4`.
fn environment() -> config::Environment {
    config::Environment::with_prefix("HARVEST").separator("__")
}
