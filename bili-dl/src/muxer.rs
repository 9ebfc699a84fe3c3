//! Combines a video and an audio track into one file with an external tool.
//!
//! The tool is invoked as
//! `ffmpeg -y -loglevel error -i <video> -i <audio> -c copy <output>`:
//! overwrite, quiet, and stream copy without re-encoding.

use crate::error::{ExecutorError, MuxError};
use crate::executor::Executor;
use crate::utils::{self, file_system};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Wraps the muxing tool.
#[derive(Debug, Clone, PartialEq)]
pub struct Muxer {
    /// The path to the `ffmpeg` executable, or its name on `PATH`.
    pub ffmpeg: PathBuf,
    /// How long one invocation may run.
    pub timeout: Duration,
}

impl Muxer {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            timeout: Duration::from_secs(30 * 60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Checks the tool can be launched at all, by running `-version`.
    ///
    /// # Errors
    ///
    /// Returns the launch or exit error of the probe.
    pub async fn probe(&self) -> Result<(), ExecutorError> {
        let executor = Executor {
            executable_path: self.ffmpeg.clone(),
            timeout: Duration::from_secs(10),
            args: utils::to_owned(vec!["-version"]),
        };

        executor.execute().await?;
        Ok(())
    }

    /// The arguments passed to the tool for one mux.
    pub fn arguments(
        video: impl AsRef<Path>,
        audio: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<Vec<String>, MuxError> {
        let video = path_str(video.as_ref(), "video")?;
        let audio = path_str(audio.as_ref(), "audio")?;
        let output = path_str(output.as_ref(), "output")?;

        Ok(utils::to_owned(vec![
            "-y", "-loglevel", "error", "-i", video, "-i", audio, "-c", "copy", output,
        ]))
    }

    /// Muxes `video` and `audio` into `output`, creating its directory.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::Tool`] carrying the tool's diagnostics when it fails
    /// to launch or exits with a non-zero status.
    pub async fn mux(
        &self,
        video: impl AsRef<Path>,
        audio: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<(), MuxError> {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Muxing {:?} and {:?} into {:?}",
            video.as_ref(),
            audio.as_ref(),
            output.as_ref()
        );

        file_system::create_parent_dir(output.as_ref())?;

        let executor = Executor {
            executable_path: self.ffmpeg.clone(),
            timeout: self.timeout,
            args: Self::arguments(video, audio, output)?,
        };

        executor.execute().await?;
        Ok(())
    }
}

fn path_str<'a>(path: &'a Path, role: &str) -> Result<&'a str, MuxError> {
    path.to_str()
        .ok_or_else(|| MuxError::Path(format!("{} path {:?} is not valid UTF-8", role, path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_request_stream_copy_with_overwrite() {
        let args = Muxer::arguments("v.m4s", "a.m4s", "out.mp4").unwrap();
        assert_eq!(
            args,
            vec![
                "-y", "-loglevel", "error", "-i", "v.m4s", "-i", "a.m4s", "-c", "copy", "out.mp4"
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_tool_reports_diagnostics() {
        let muxer = Muxer::new("sh");
        // `sh -y` is rejected by the shell, standing in for a broken ffmpeg.
        let error = muxer.mux("v", "a", "o.mp4").await.unwrap_err();
        assert!(matches!(
            error,
            MuxError::Tool(ExecutorError::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn missing_tool_fails_probe() {
        let muxer = Muxer::new("/nonexistent/ffmpeg-binary");
        assert!(matches!(muxer.probe().await, Err(ExecutorError::Launch(_))));
    }
}
