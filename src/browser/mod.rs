//! Page objects over the portal's rendered DOM.
//!
//! The crawler and the metric scraper only talk to these traits; the
//! WebDriver-backed implementation lives in [`session`]. Workers obtain
//! their sessions through a [`SessionFactory`].

pub mod driver_process;
pub mod session;

use crate::models::{Board, LeafRecord};
use anyhow::Result;
use async_trait::async_trait;

pub use self::session::{WebDriverSession, WebDriverSessions};

/// Listing page with the cascading category menu and the product grid.
#[async_trait]
pub trait CategoryPortal: Send + Sync {
    /// Load the listing page, pick the ranking mode and the board tab.
    async fn open_board(&self, ranking_mode: &str, board: Board) -> Result<()>;

    async fn select_top_level(&self, name: &str) -> Result<()>;

    /// Second-level labels under the selected top-level category.
    async fn second_level_labels(&self) -> Result<Vec<String>>;

    /// Select a second-level category and return its third-level labels,
    /// empty when the category is itself a leaf.
    async fn select_second_level(&self, label: &str) -> Result<Vec<String>>;

    async fn select_third_level(&self, second: &str, third: &str) -> Result<()>;

    /// Number of grid pages for the current selection, at least 1.
    async fn page_count(&self) -> u32;

    /// Product link / thumbnail pairs on the current grid page.
    async fn grid_products(&self) -> Result<Vec<LeafRecord>>;

    async fn goto_page(&self, page: u32) -> Result<()>;
}

/// Product detail page with the metric cards.
#[async_trait]
pub trait ProductPage: Send + Sync {
    async fn load(&self, url: &str) -> Result<()>;

    /// Click the 30-day toggle and wait until the cards finish loading.
    async fn switch_to_month(&self) -> Result<()>;

    /// Current rendered HTML.
    async fn html(&self) -> Result<String>;
}

/// Opens one browser session per unit of work and closes it afterwards.
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Session: CategoryPortal + ProductPage + 'static;

    async fn open(&self) -> Result<Self::Session>;

    async fn close(&self, session: Self::Session);
}

/// `"1/12"` → 12
pub fn parse_page_total(display: &str) -> Option<u32> {
    display
        .split('/')
        .nth(1)
        .and_then(|t| t.trim().parse().ok())
        .filter(|n| *n > 0)
}

/// Quote `s` as an XPath string literal, even when it contains both quote kinds.
pub fn xpath_literal(s: &str) -> String {
    if !s.contains('\'') {
        format!("'{s}'")
    } else if !s.contains('"') {
        format!("\"{s}\"")
    } else {
        let parts: Vec<String> = s.split('\'').map(|p| format!("'{p}'")).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}
