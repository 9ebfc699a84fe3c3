//! Tools for downloading a single stream to disk.
//!
//! A transfer is written to `<destination>.part` and renamed once the body is
//! complete, so the destination either holds a whole stream or nothing. Any
//! failure discards the partial file and, after a fixed delay, the whole
//! transfer starts over.

use crate::error::{FetchError, TransferError};
use crate::utils::file_system;
use futures_util::StreamExt;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Progress notifications of a transfer.
///
/// `total` is the declared content length, `0` when the server did not send one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent<'a> {
    /// A new attempt received its response headers.
    Started { name: &'a str, total: u64 },
    /// A chunk was written.
    Advanced {
        name: &'a str,
        downloaded: u64,
        total: u64,
    },
    /// The file is complete at its destination.
    Finished { name: &'a str },
    /// Every attempt failed.
    Abandoned { name: &'a str },
}

/// Callback receiving [`TransferEvent`]s.
pub type ProgressCallback = Arc<dyn for<'a> Fn(TransferEvent<'a>) + Send + Sync>;

/// The fetcher is responsible for downloading a stream from a URL.
///
/// # Example
///
/// ```rust, no_run
/// # use bili_dl::fetcher::Fetcher;
/// # use std::time::Duration;
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = Fetcher::new(reqwest::Client::new())
///     .with_retry_attempts(3)
///     .with_retry_delay(Duration::from_secs(2));
///
/// fetcher.fetch("https://upos.example/video.m4s", "temp/video.m4s").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Fetcher {
    /// The HTTP client, carrying whatever headers the CDN requires.
    client: reqwest::Client,
    /// The total number of attempts per transfer.
    retry_attempts: usize,
    /// The pause between two attempts.
    retry_delay: Duration,
    /// Callback optional for tracking download progress
    progress_callback: Option<ProgressCallback>,
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay", &self.retry_delay)
            .field(
                "progress_callback",
                &format_args!(
                    "{}",
                    if self.progress_callback.is_some() {
                        "Some(Fn)"
                    } else {
                        "None"
                    }
                ),
            )
            .finish()
    }
}

impl fmt::Display for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Fetcher(attempts={}, delay={:?})",
            self.retry_attempts, self.retry_delay
        )
    }
}

impl Fetcher {
    /// Creates a new fetcher using the given client.
    ///
    /// # Arguments
    ///
    /// * `client` - The HTTP client to download with.
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(2),
            progress_callback: None,
        }
    }

    /// Configures the number of download attempts; `0` is treated as `1`.
    ///
    /// # Arguments
    ///
    /// * `attempts` - The number of attempts.
    pub fn with_retry_attempts(mut self, attempts: usize) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Configures the fixed delay between two attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Configure a callback for tracking download progress.
    ///
    /// # Arguments
    ///
    /// * `callback` - A function that will be called with every [`TransferEvent`].
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: for<'a> Fn(TransferEvent<'a>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    /// Like [`Fetcher::with_progress_callback`], for a callback that is already shared.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Downloads the stream at `url` to `destination`.
    ///
    /// # Arguments
    ///
    /// * `url` - The stream URL.
    /// * `destination` - The path where to write the stream.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Exhausted`] with the cause of the last attempt once
    /// every attempt failed. Nothing is left at `destination` in that case.
    pub async fn fetch(
        &self,
        url: &str,
        destination: impl AsRef<Path> + fmt::Debug,
    ) -> Result<(), FetchError> {
        let destination = destination.as_ref();
        let partial = file_system::partial_path(destination);
        let name = destination
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        #[cfg(feature = "tracing")]
        tracing::debug!("Fetching {} to {:?}", url, destination);

        // A leftover from an interrupted run must not pass for a finished file.
        file_system::remove_temp_file(destination).await;

        let mut attempt = 0;
        loop {
            attempt += 1;

            let error = match self.transfer(url, &partial, destination, &name).await {
                Ok(()) => {
                    self.notify(TransferEvent::Finished { name: &name });
                    return Ok(());
                }
                Err(error) => error,
            };

            file_system::remove_temp_file(&partial).await;

            if attempt >= self.retry_attempts {
                self.notify(TransferEvent::Abandoned { name: &name });
                return Err(FetchError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            #[cfg(feature = "tracing")]
            tracing::warn!(
                "Download of {} failed (attempt {}/{}): {}",
                name,
                attempt,
                self.retry_attempts,
                error
            );

            tokio::time::sleep(self.retry_delay).await;
        }
    }

    /// One attempt: stream the body into `partial`, then move it into place.
    async fn transfer(
        &self,
        url: &str,
        partial: &Path,
        destination: &Path,
        name: &str,
    ) -> Result<(), TransferError> {
        file_system::create_parent_dir(partial)?;

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status(status));
        }

        let total = response.content_length().unwrap_or(0);
        self.notify(TransferEvent::Started { name, total });

        let mut file = file_system::create_file(partial).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;

            downloaded += chunk.len() as u64;
            self.notify(TransferEvent::Advanced {
                name,
                downloaded,
                total,
            });
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if total > 0 && downloaded != total {
            return Err(TransferError::Incomplete {
                expected: total,
                received: downloaded,
            });
        }

        tokio::fs::rename(partial, destination).await?;
        Ok(())
    }

    fn notify(&self, event: TransferEvent<'_>) {
        if let Some(callback) = &self.progress_callback {
            callback(event);
        }
    }
}
