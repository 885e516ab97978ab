//! Pipeline orchestrator: task source → crawler → assembler → finalizer.
//!
//! ## Stages
//!
//! `crawl`:    one browser session per ready top-level category, walking its
//!              leaves into `Link,Image` files. Completed categories are
//!              flagged in the task source.
//! `scrape`:   one browser session per leaf file without a spreadsheet yet.
//! `finalize`: sequential rewrite of every assembled spreadsheet.
//!
//! Every stage is resumable: finished units leave an artifact on disk and
//! are skipped on the next run. Only environment failures (driver, session,
//! task source) abort a run.

use crate::assembler::{pending_jobs, Assembler, FileStats};
use crate::browser::driver_process::DriverProcess;
use crate::browser::{SessionFactory, WebDriverSessions};
use crate::config::AppConfig;
use crate::crawler::{CategoryCrawler, LeafStats};
use crate::error::is_fatal;
use crate::finalize::finalize_tree;
use crate::images::ImageFetcher;
use crate::tasks::TaskSource;
use anyhow::{Context, Result};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

pub struct Pipeline<S: SessionFactory = WebDriverSessions> {
    config: Arc<AppConfig>,
    sessions: Arc<S>,
}

impl Pipeline {
    /// Pipeline whose workers each connect their own WebDriver session.
    pub fn new(config: AppConfig) -> Self {
        let sessions = WebDriverSessions::new(&config.browser, &config.scraper);
        Self::with_sessions(config, sessions)
    }
}

impl<S: SessionFactory> Pipeline<S> {
    pub fn with_sessions(config: AppConfig, sessions: S) -> Self {
        Self {
            config: Arc::new(config),
            sessions: Arc::new(sessions),
        }
    }

    /// Run every stage enabled in `pipeline.steps`, in order.
    pub async fn run(&self) -> Result<PipelineStats> {
        let steps = &self.config.pipeline.steps;
        let mut stats = PipelineStats::default();

        let driver = if steps.crawl || steps.scrape {
            self.start_driver().await?
        } else {
            None
        };

        let outcome = async {
            if steps.crawl {
                info!("=== Step 1: Crawling category trees ===");
                stats.stages.push(self.crawl_stage().await?);
            }
            if steps.scrape {
                info!("=== Step 2: Scraping product metrics ===");
                stats.stages.push(self.scrape_stage().await?);
            }
            Ok::<(), anyhow::Error>(())
        }
        .await;

        if let Some(driver) = driver {
            driver.stop().await;
        }
        outcome?;

        if steps.finalize {
            info!("=== Step 3: Post-processing spreadsheets ===");
            stats.stages.push(self.finalize()?);
        }

        for stage in &stats.stages {
            info!("{}", stage);
        }
        Ok(stats)
    }

    pub async fn crawl(&self) -> Result<StageStats> {
        let driver = self.start_driver().await?;
        let outcome = self.crawl_stage().await;
        if let Some(driver) = driver {
            driver.stop().await;
        }
        outcome
    }

    pub async fn scrape(&self) -> Result<StageStats> {
        let driver = self.start_driver().await?;
        let outcome = self.scrape_stage().await;
        if let Some(driver) = driver {
            driver.stop().await;
        }
        outcome
    }

    /// Rewrite every assembled spreadsheet; corrupt ones are logged.
    pub fn finalize(&self) -> Result<StageStats> {
        let paths = &self.config.paths;
        let result = finalize_tree(&paths.output_dir, &paths.failure_log, &self.config.assembly)?;
        info!(
            "{} rows kept, {} duplicates removed",
            result.rows_kept, result.duplicates
        );
        Ok(StageStats {
            stage: "finalize",
            processed: result.files,
            skipped: 0,
            failed: result.failed.len(),
        })
    }

    async fn start_driver(&self) -> Result<Option<DriverProcess>> {
        let browser = &self.config.browser;
        match &browser.driver_path {
            Some(binary) => Ok(Some(DriverProcess::spawn(binary, &browser.webdriver_url).await?)),
            None => Ok(None),
        }
    }

    async fn crawl_stage(&self) -> Result<StageStats> {
        let tasks = Arc::new(TaskSource::new(&self.config.paths.task_source));
        let pending = tasks.pending().context("Reading task source")?;
        if pending.is_empty() {
            info!("No categories waiting to be crawled");
            return Ok(StageStats::new("crawl"));
        }

        let workers = self.config.worker_count();
        info!("{} categories, {} parallel sessions", pending.len(), workers);

        let crawler = Arc::new(CategoryCrawler::new(&self.config.paths.link_dir, &self.config.browser));
        let sem = Arc::new(Semaphore::new(workers));
        let mut handles = Vec::new();

        for task in pending {
            let sessions = Arc::clone(&self.sessions);
            let crawler = Arc::clone(&crawler);
            let tasks = Arc::clone(&tasks);
            let sem = Arc::clone(&sem);
            let name = task.name.clone();

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire().await?;
                info!(">> Category {}", task.name);

                let session = sessions.open().await?;
                let result = crawler.crawl(&session, &task.name).await;
                sessions.close(session).await;

                // Abandoned categories keep their flag clear and are retried next run.
                let leaves = result?;
                tasks.mark_complete(&task).await?;
                Ok::<LeafStats, anyhow::Error>(leaves)
            });
            handles.push((name, handle));
        }

        let mut stats = StageStats::new("crawl");
        let mut fatal = None;
        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(leaves)) => {
                    stats.processed += 1;
                    stats.skipped += leaves.skipped;
                    info!("✅ {}: {} leaves, {} products", name, leaves.written, leaves.products);
                }
                Ok(Err(e)) => {
                    stats.failed += 1;
                    if is_fatal(&e) {
                        error!("{}: {:#}", name, e);
                        fatal.get_or_insert(e);
                    } else {
                        warn!("{} left incomplete: {:#}", name, e);
                    }
                }
                Err(e) => {
                    error!("Task panic for {}: {}", name, e);
                    stats.failed += 1;
                }
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }

    async fn scrape_stage(&self) -> Result<StageStats> {
        let paths = &self.config.paths;
        let (jobs, done) = pending_jobs(&paths.link_dir, &paths.output_dir)?;
        let mut stats = StageStats::new("scrape");
        stats.skipped = done;
        if jobs.is_empty() {
            info!("Nothing to assemble ({} files already present)", done);
            return Ok(stats);
        }

        let workers = self.config.worker_count();
        info!("{} leaf files to assemble, {} parallel sessions", jobs.len(), workers);

        let assembler = Arc::new(Assembler::new(&self.config.scraper, &self.config.assembly));
        let images = Arc::new(ImageFetcher::new(&self.config.images)?);
        let sem = Arc::new(Semaphore::new(workers));
        let mut handles = Vec::new();

        for job in jobs {
            let sessions = Arc::clone(&self.sessions);
            let assembler = Arc::clone(&assembler);
            let images = Arc::clone(&images);
            let sem = Arc::clone(&sem);
            let input = job.input.clone();

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire().await?;

                let session = sessions.open().await?;
                let result = assembler.assemble_file(&session, images.as_ref(), &job).await;
                sessions.close(session).await;

                result.with_context(|| format!("assemble({:?})", job.input))
            });
            handles.push((input, handle));
        }

        let mut fatal = None;
        for (input, handle) in handles {
            match handle.await {
                Ok(Ok(FileStats { rows_written, .. })) => {
                    stats.processed += 1;
                    info!("✅ {:?}: {} rows", input, rows_written);
                }
                Ok(Err(e)) => {
                    stats.failed += 1;
                    if is_fatal(&e) {
                        error!("{:?}: {:#}", input, e);
                        fatal.get_or_insert(e);
                    } else {
                        warn!("{:?}: {:#}", input, e);
                    }
                }
                Err(e) => {
                    error!("Task panic for {:?}: {}", input, e);
                    stats.failed += 1;
                }
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }
}

/// Units handled by one stage: categories (crawl), leaf files (scrape) or
/// spreadsheets (finalize). Crawl counts already-present leaves as skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageStats {
    pub stage: &'static str,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl StageStats {
    fn new(stage: &'static str) -> Self {
        Self {
            stage,
            processed: 0,
            skipped: 0,
            failed: 0,
        }
    }
}

impl fmt::Display for StageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} processed | {} skipped | {} failed",
            self.stage, self.processed, self.skipped, self.failed
        )
    }
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub stages: Vec<StageStats>,
}

impl PipelineStats {
    pub fn failed(&self) -> usize {
        self.stages.iter().map(|s| s.failed).sum()
    }
}
