//! Downloads the videos saved in Bilibili favorite folders.
//!
//! The heavy lifting lives in [`bili_dl`]; this crate lists the folders,
//! chooses qualities, feeds the resulting jobs through the acquisition
//! pipeline and tallies the results.

use bili_dl::client::BiliClient;
use bili_dl::fetcher::{Fetcher, ProgressCallback};
use bili_dl::muxer::Muxer;
use bili_dl::resolver::StreamSource;
use bili_dl::selection::QualitySelector;
use bili_dl::{DownloadJob, Ledger, Outcome, Pipeline, QualityCatalog, VideoItem};
use futures_util::{StreamExt, stream};
use log::{error, info, warn};
use std::collections::HashSet;
use std::fmt;
use std::ops::{Add, AddAssign};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub mod config;
pub mod credentials;
pub mod favorites;
pub mod progress;

pub use config::{Config, ConfigError};
pub use credentials::{CredentialError, Credentials};
pub use favorites::{Favorites, Folder};

/// The file name suffix of the HDR companion download.
pub const HDR_SUFFIX: &str = "HDR";

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadOptions {
    pub save_path: PathBuf,
    pub temp_dir: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub max_retries: usize,
    pub retry_delay: Duration,
    pub request_interval: Duration,
    pub concurrent_downloads: usize,
    /// Also download the HDR tier of every page that offers one.
    pub hdr: bool,
}

impl DownloadOptions {
    pub fn from_config(config: &Config, hdr: bool) -> Self {
        Self {
            save_path: config.save_path.clone(),
            temp_dir: config.temp_dir.clone(),
            ffmpeg_path: config.ffmpeg_path.clone(),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            request_interval: config.request_interval(),
            concurrent_downloads: config.concurrent_downloads,
            hdr,
        }
    }
}

/// The tally of a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub recorded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Videos or pages that could not be looked up at all.
    pub unavailable: usize,
}

impl Summary {
    fn count(&mut self, job: &DownloadJob, result: bili_dl::Result<Outcome>) {
        match result {
            Ok(Outcome::Recorded(path)) => {
                info!("✓ Success: {} - {} ({})", job.item.title, job.page.part, path.display());
                self.recorded += 1;
            }
            Ok(Outcome::Skipped) => {
                info!("Already downloaded: {} - {}", job.item.title, job.page.part);
                self.skipped += 1;
            }
            Ok(Outcome::InProgressElsewhere) => {
                info!("Already being downloaded: {} - {}", job.item.title, job.page.part);
                self.skipped += 1;
            }
            Err(e) => {
                error!("✗ Failed: {} - {}: {}", job.item.title, job.page.part, e);
                self.failed += 1;
            }
        }
    }
}

impl Add for Summary {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            recorded: self.recorded + other.recorded,
            skipped: self.skipped + other.skipped,
            failed: self.failed + other.failed,
            unavailable: self.unavailable + other.unavailable,
        }
    }
}

impl AddAssign for Summary {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} downloaded, {} skipped, {} failed, {} unavailable",
            self.recorded, self.skipped, self.failed, self.unavailable
        )
    }
}

/// The best tier whose description mentions HDR.
pub fn hdr_rank(catalog: &QualityCatalog) -> Option<u32> {
    catalog
        .tiers()
        .into_iter()
        .find(|tier| tier.description.contains("HDR"))
        .map(|tier| tier.rank)
}

/// Runs groups of jobs through the pipeline, `concurrency` groups at a time.
///
/// The jobs of one group run in order. Jobs for the same page share their
/// temporary files and must therefore be in the same group.
pub async fn run_jobs<S: StreamSource>(
    pipeline: &Pipeline<S>,
    groups: Vec<Vec<DownloadJob>>,
    concurrency: usize,
) -> Summary {
    stream::iter(groups)
        .map(|group| async move {
            let mut summary = Summary::default();
            for job in &group {
                summary.count(job, pipeline.acquire(job).await);
            }
            summary
        })
        .buffer_unordered(concurrency.max(1))
        .fold(Summary::default(), |total, summary| async move { total + summary })
        .await
}

/// Downloads whole favorite folders.
#[derive(Debug)]
pub struct Downloader {
    client: BiliClient,
    pipeline: Pipeline<BiliClient>,
    options: DownloadOptions,
}

impl Downloader {
    /// Creates a new downloader.
    ///
    /// # Arguments
    ///
    /// * `client` - The authenticated API client, also used for the streams.
    /// * `options` - Paths, retry and concurrency settings.
    /// * `ledger` - The download history.
    /// * `progress` - Receives the transfer progress of every stream.
    pub fn new(
        client: BiliClient,
        options: DownloadOptions,
        ledger: Arc<Ledger>,
        progress: Option<ProgressCallback>,
    ) -> Self {
        let mut fetcher = Fetcher::new(client.http().clone())
            .with_retry_attempts(options.max_retries)
            .with_retry_delay(options.retry_delay);
        if let Some(callback) = progress {
            fetcher = fetcher.with_progress(callback);
        }

        let pipeline = Pipeline::new(
            client.clone(),
            fetcher,
            Muxer::new(&options.ffmpeg_path),
            ledger,
            &options.temp_dir,
        );

        Self {
            client,
            pipeline,
            options,
        }
    }

    pub fn client(&self) -> &BiliClient {
        &self.client
    }

    pub fn pipeline(&self) -> &Pipeline<BiliClient> {
        &self.pipeline
    }

    pub fn favorites(&self) -> Favorites<'_> {
        Favorites::new(&self.client, self.options.request_interval)
    }

    /// Downloads every video of the given folders.
    ///
    /// Qualities are chosen for all pages of a folder first, then the folder's
    /// jobs run. Failures are counted, never returned.
    pub async fn download_folders<Q>(&self, folder_ids: &[i64], selector: &Q) -> Summary
    where
        Q: QualitySelector + ?Sized,
    {
        let mut summary = Summary::default();

        for folder_id in folder_ids {
            info!("Processing folder {}", folder_id);

            let mut seen = HashSet::new();
            let bvids: Vec<String> = self
                .favorites()
                .bvids(*folder_id)
                .await
                .into_iter()
                .filter(|bvid| seen.insert(bvid.clone()))
                .collect();
            info!("Found {} videos in folder {}", bvids.len(), folder_id);

            let mut groups = Vec::new();
            for bvid in &bvids {
                groups.extend(self.plan_video(bvid, selector, &mut summary).await);
            }

            summary += run_jobs(&self.pipeline, groups, self.options.concurrent_downloads).await;
        }

        summary
    }

    /// Looks up a video and builds one job group per page.
    async fn plan_video<Q>(
        &self,
        bvid: &str,
        selector: &Q,
        summary: &mut Summary,
    ) -> Vec<Vec<DownloadJob>>
    where
        Q: QualitySelector + ?Sized,
    {
        let item = match self.client.video_info(bvid).await {
            Ok(item) => item,
            Err(e) => {
                warn!("Skipping unavailable video {}: {}", bvid, e);
                summary.unavailable += 1;
                return Vec::new();
            }
        };

        let mut groups = Vec::new();
        for page in &item.pages {
            let catalog = match self.client.qualities(&item.bvid, page.cid).await {
                Ok(catalog) if !catalog.is_empty() => catalog,
                Ok(_) => {
                    warn!(
                        "No qualities offered, the video may be region locked or need a login: {} - {}",
                        item.title, page.part
                    );
                    summary.unavailable += 1;
                    continue;
                }
                Err(e) => {
                    warn!("Failed to list qualities of {} - {}: {}", item.title, page.part, e);
                    summary.unavailable += 1;
                    continue;
                }
            };

            info!("{} - {}", item.title, page.part);
            let Some(quality) = selector.select(&catalog) else {
                info!("No quality selected, skipping {} - {}", item.title, page.part);
                summary.skipped += 1;
                continue;
            };

            groups.push(self.jobs_for_page(&item, page, quality, &catalog));
        }

        groups
    }

    fn jobs_for_page(
        &self,
        item: &VideoItem,
        page: &bili_dl::PageUnit,
        quality: u32,
        catalog: &QualityCatalog,
    ) -> Vec<DownloadJob> {
        let mut jobs = vec![DownloadJob::new(
            item.clone(),
            page.clone(),
            quality,
            &self.options.save_path,
        )];

        if self.options.hdr {
            if let Some(hdr) = hdr_rank(catalog).filter(|hdr| *hdr != quality) {
                jobs.push(
                    DownloadJob::new(item.clone(), page.clone(), hdr, &self.options.save_path)
                        .with_suffix(HDR_SUFFIX),
                );
            }
        }

        jobs
    }
}
