//! One unit of work, end to end: check the ledger, resolve, fetch, mux, record.
//!
//! The tracks and the muxed file live in the temporary directory until the mux
//! succeeded; only then is the result moved onto its final name. The
//! temporaries are removed on every exit path, so only finished files ever
//! show up in the destination directory and a failed job never touches a file
//! that is already there.

use crate::error::{MuxError, PipelineError, Result};
use crate::fetcher::Fetcher;
use crate::ledger::{Claim, Ledger, LedgerKey};
use crate::model::{DownloadJob, TrackKind};
use crate::muxer::Muxer;
use crate::resolver::{Resolver, StreamSource};
use crate::utils::file_system;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Titles longer than this are cut before building the file name.
pub const MAX_TITLE_CHARS: usize = 100;

/// How a job that did not fail ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The key was already recorded; nothing was done.
    Skipped,
    /// Another worker is downloading the same key right now.
    InProgressElsewhere,
    /// The file was written to the given path and recorded.
    Recorded(PathBuf),
}

/// Removes the job's temporary files when dropped: both tracks and the muxed
/// file that has not been moved into place yet.
struct TempFiles {
    paths: [PathBuf; 3],
}

impl TempFiles {
    fn new(temp_dir: &Path, key: &LedgerKey) -> Self {
        Self {
            paths: [
                file_system::track_path(temp_dir, &key.bvid, key.cid, TrackKind::Video),
                file_system::track_path(temp_dir, &key.bvid, key.cid, TrackKind::Audio),
                file_system::staged_output_path(temp_dir, &key.bvid, key.cid, key.quality),
            ],
        }
    }

    fn path(&self, kind: TrackKind) -> &Path {
        match kind {
            TrackKind::Video => &self.paths[0],
            TrackKind::Audio => &self.paths[1],
        }
    }

    fn staged(&self) -> &Path {
        &self.paths[2]
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            file_system::remove_temp_file_sync(path);
            file_system::remove_temp_file_sync(file_system::partial_path(path));
        }
    }
}

/// The acquisition pipeline.
///
/// # Example
///
/// ```rust,no_run
/// # use bili_dl::client::BiliClient;
/// # use bili_dl::fetcher::Fetcher;
/// # use bili_dl::ledger::Ledger;
/// # use bili_dl::model::{DownloadJob, PageUnit, VideoItem};
/// # use bili_dl::muxer::Muxer;
/// # use bili_dl::pipeline::Pipeline;
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = BiliClient::new("SESSDATA=...; DedeUserID=1", Duration::from_secs(30))?;
/// let fetcher = Fetcher::new(client.http().clone());
/// let (ledger, _) = Ledger::open("download_history.json");
///
/// let pipeline = Pipeline::new(
///     client,
///     fetcher,
///     Muxer::new("ffmpeg"),
///     Arc::new(ledger),
///     "temp",
/// );
///
/// let item = VideoItem {
///     bvid: "BV1xx411c7mD".to_string(),
///     title: "Title".to_string(),
///     owner: "Owner".to_string(),
///     pages: vec![PageUnit::new(1176840, "P1".to_string())],
/// };
/// let job = DownloadJob::new(item.clone(), item.pages[0].clone(), 80, "downloads");
/// pipeline.acquire(&job).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Pipeline<S> {
    resolver: Resolver<S>,
    fetcher: Fetcher,
    muxer: Muxer,
    ledger: Arc<Ledger>,
    temp_dir: PathBuf,
}

impl<S: StreamSource> Pipeline<S> {
    /// Creates a new pipeline.
    ///
    /// # Arguments
    ///
    /// * `source` - Where stream manifests come from.
    /// * `fetcher` - The fetcher used for both tracks.
    /// * `muxer` - The muxer combining them.
    /// * `ledger` - The shared download ledger.
    /// * `temp_dir` - The directory for the temporary track files.
    pub fn new(
        source: S,
        fetcher: Fetcher,
        muxer: Muxer,
        ledger: Arc<Ledger>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            resolver: Resolver::new(source),
            fetcher,
            muxer,
            ledger,
            temp_dir: temp_dir.into(),
        }
    }

    pub fn resolver(&self) -> &Resolver<S> {
        &self.resolver
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Runs one job.
    ///
    /// A key that is already recorded returns [`Outcome::Skipped`] without any
    /// network activity. The ledger is written only after a successful mux; a
    /// failed ledger write is logged and does not fail the job.
    ///
    /// # Errors
    ///
    /// Returns the error of the stage that failed. The temporary files are
    /// gone in that case and an output from an earlier run is left untouched.
    pub async fn acquire(&self, job: &DownloadJob) -> Result<Outcome> {
        let key = LedgerKey::new(job.item.bvid.clone(), job.page.cid, job.quality);

        let claim = match self.ledger.try_claim(key.clone()) {
            Claim::Acquired(claim) => claim,
            Claim::Completed => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Already downloaded: {}", job);

                return Ok(Outcome::Skipped);
            }
            Claim::InFlight => return Ok(Outcome::InProgressElsewhere),
        };

        let temp = TempFiles::new(&self.temp_dir, &key);

        let urls = self
            .resolver
            .resolve(&job.item.bvid, job.page.cid, job.quality)
            .await?;

        for (kind, url) in [(TrackKind::Video, &urls.video), (TrackKind::Audio, &urls.audio)] {
            self.fetcher
                .fetch(url, temp.path(kind))
                .await
                .map_err(|source| PipelineError::Fetch { track: kind, source })?;
        }

        self.muxer
            .mux(
                temp.path(TrackKind::Video),
                temp.path(TrackKind::Audio),
                temp.staged(),
            )
            .await?;

        let output = job.destination.join(output_file_name(job));
        file_system::create_parent_dir(&output).map_err(MuxError::from)?;
        file_system::move_file(temp.staged(), &output)
            .await
            .map_err(MuxError::from)?;

        drop(temp);

        if let Err(_e) = claim.record(&job.item.title, &job.item.owner) {
            #[cfg(feature = "tracing")]
            tracing::warn!("Failed to record {} in the download history: {}", job, _e);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Recorded {} at {:?}", job, output);

        Ok(Outcome::Recorded(output))
    }
}

/// The file name of a job's output: `{title}_{part}_{owner}[_{suffix}].mp4`.
///
/// Every component is stripped of characters that are illegal in file names;
/// the title is additionally cut to [`MAX_TITLE_CHARS`] and replaced by the
/// video key if nothing is left of it.
pub fn output_file_name(job: &DownloadJob) -> String {
    let mut title = file_system::sanitize_truncated(&job.item.title, MAX_TITLE_CHARS);
    if title.is_empty() {
        title = file_system::sanitize(&job.item.bvid);
    }

    let mut components = vec![
        title,
        file_system::sanitize(&job.page.part),
        file_system::sanitize(&job.item.owner),
    ];
    if let Some(suffix) = &job.suffix {
        components.push(file_system::sanitize(suffix));
    }

    format!("{}.mp4", components.join("_"))
}
