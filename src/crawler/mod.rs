//! Category tree walk: top level → second level → optional third level,
//! one `Link,Image` file per leaf.

use crate::browser::CategoryPortal;
use crate::config::BrowserConfig;
use crate::loader::write_leaf_file;
use crate::models::{Board, LeafRecord};
use crate::utils::sanitize_label;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of crawling one top-level category.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LeafStats {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
    pub products: usize,
}

pub struct CategoryCrawler {
    link_dir: PathBuf,
    board: Board,
    ranking_mode: String,
}

impl CategoryCrawler {
    pub fn new(link_dir: impl Into<PathBuf>, browser: &BrowserConfig) -> Self {
        Self {
            link_dir: link_dir.into(),
            board: browser.board,
            ranking_mode: browser.ranking_mode.clone(),
        }
    }

    /// `<link_dir>/<top>/<second>/<leaf>.csv`
    pub fn leaf_path(&self, top: &str, second: &str, leaf: &str) -> PathBuf {
        self.link_dir
            .join(sanitize_label(top))
            .join(sanitize_label(second))
            .join(format!("{}.csv", sanitize_label(leaf)))
    }

    /// Walk every leaf under `category`. Errors before the walk starts (board
    /// or top level unreachable) are returned; per-leaf failures are counted
    /// and the walk moves on to the next sibling.
    pub async fn crawl<P>(&self, portal: &P, category: &str) -> Result<LeafStats>
    where
        P: CategoryPortal + ?Sized,
    {
        portal
            .open_board(&self.ranking_mode, self.board)
            .await
            .with_context(|| format!("Opening board {}", self.board))?;
        portal
            .select_top_level(category)
            .await
            .with_context(|| format!("Selecting top-level category {}", category))?;

        let seconds = portal
            .second_level_labels()
            .await
            .with_context(|| format!("No second-level menu under {}", category))?;
        info!("{}: {} second-level categories", category, seconds.len());

        let mut stats = LeafStats::default();
        for second in &seconds {
            let own_leaf = self.leaf_path(category, second, second);
            if own_leaf.exists() {
                debug!("Already crawled {:?}", own_leaf);
                stats.skipped += 1;
                continue;
            }

            let thirds = match portal.select_second_level(second).await {
                Ok(t) => t,
                Err(e) => {
                    warn!("Skipping {} > {}: {:#}", category, second, e);
                    stats.failed += 1;
                    continue;
                }
            };

            if thirds.is_empty() {
                self.harvest_leaf(portal, &own_leaf, &mut stats).await;
                continue;
            }

            for third in &thirds {
                let path = self.leaf_path(category, second, third);
                if path.exists() {
                    debug!("Already crawled {:?}", path);
                    stats.skipped += 1;
                    continue;
                }
                if let Err(e) = portal.select_third_level(second, third).await {
                    warn!("Skipping {} > {} > {}: {:#}", category, second, third, e);
                    stats.failed += 1;
                    continue;
                }
                self.harvest_leaf(portal, &path, &mut stats).await;
            }
        }

        info!(
            "{}: {} leaves written ({} products), {} already present, {} failed",
            category, stats.written, stats.products, stats.skipped, stats.failed
        );
        Ok(stats)
    }

    /// Paginate the grid of the selected leaf and write its file once the
    /// loop is over.
    async fn harvest_leaf<P>(&self, portal: &P, path: &Path, stats: &mut LeafStats)
    where
        P: CategoryPortal + ?Sized,
    {
        let total = portal.page_count().await;
        let mut records: Vec<LeafRecord> = Vec::new();

        for page in 1..=total {
            match portal.grid_products().await {
                Ok(found) => records.extend(found),
                Err(e) => warn!("Page {}/{} of {:?} unreadable: {:#}", page, total, path, e),
            }
            if page < total {
                if let Err(e) = portal.goto_page(page + 1).await {
                    warn!("Could not advance to page {} for {:?}: {:#}", page + 1, path, e);
                }
            }
            debug!("Page {}/{}: {} products so far", page, total, records.len());
        }

        match write_leaf_file(path, &records) {
            Ok(()) => {
                info!("Saved {:?} ({} products)", path, records.len());
                stats.written += 1;
                stats.products += records.len();
            }
            Err(e) => {
                warn!("Could not write {:?}: {:#}", path, e);
                stats.failed += 1;
            }
        }
    }
}
