//! Picks the concrete video and audio stream URLs of a content unit.
//!
//! The video track must match the requested quality exactly; a missing tier is
//! an error rather than a silent downgrade. Between encodings of the same tier,
//! the one with the most bandwidth wins. Audio is chosen independently: the
//! Hi-Res variant when offered, otherwise the highest-bandwidth candidate.

use crate::client::BiliClient;
use crate::error::{ApiError, ResolveError};
use crate::model::{PlayInfo, StreamCandidate, StreamUrls, TrackKind};
use std::future::Future;

/// Anything that can list the stream candidates of a content unit.
pub trait StreamSource {
    /// Fetches the richest manifest available for the given page and quality.
    fn play_info(
        &self,
        bvid: &str,
        cid: i64,
        quality: u32,
    ) -> impl Future<Output = Result<PlayInfo, ApiError>> + Send;
}

impl StreamSource for BiliClient {
    async fn play_info(&self, bvid: &str, cid: i64, quality: u32) -> Result<PlayInfo, ApiError> {
        BiliClient::play_info(self, bvid, cid, quality).await
    }
}

/// Resolves stream URLs through a [`StreamSource`].
#[derive(Debug, Clone)]
pub struct Resolver<S> {
    source: S,
}

impl<S: StreamSource> Resolver<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Resolves the video and audio URLs of a page at the given quality.
    ///
    /// # Errors
    ///
    /// * [`ResolveError::Upstream`] when the platform rejects the request.
    /// * [`ResolveError::QualityUnavailable`] when no video stream has the
    ///   requested rank.
    /// * [`ResolveError::NoStreams`] when a track list is empty or has no URL.
    pub async fn resolve(
        &self,
        bvid: &str,
        cid: i64,
        quality: u32,
    ) -> Result<StreamUrls, ResolveError> {
        #[cfg(feature = "tracing")]
        tracing::debug!("Resolving streams for {}-{} at quality {}", bvid, cid, quality);

        let info = self.source.play_info(bvid, cid, quality).await?;
        select_streams(&info, quality)
    }
}

/// Applies the selection policy to a manifest.
pub fn select_streams(info: &PlayInfo, quality: u32) -> Result<StreamUrls, ResolveError> {
    if info.video.is_empty() {
        return Err(ResolveError::NoStreams(TrackKind::Video));
    }
    if info.audio.is_empty() {
        return Err(ResolveError::NoStreams(TrackKind::Audio));
    }

    let video = select_video(&info.video, quality).ok_or(ResolveError::QualityUnavailable(quality))?;
    let audio = select_audio(&info.audio).ok_or(ResolveError::NoStreams(TrackKind::Audio))?;

    if video.url.is_empty() {
        return Err(ResolveError::NoStreams(TrackKind::Video));
    }
    if audio.url.is_empty() {
        return Err(ResolveError::NoStreams(TrackKind::Audio));
    }

    #[cfg(feature = "tracing")]
    tracing::debug!("Selected {} and {}", video, audio);

    Ok(StreamUrls {
        video: video.url.clone(),
        audio: audio.url.clone(),
    })
}

/// The highest-bandwidth video candidate at exactly `quality`.
pub fn select_video(candidates: &[StreamCandidate], quality: u32) -> Option<&StreamCandidate> {
    candidates
        .iter()
        .filter(|candidate| candidate.id == quality)
        .max_by_key(|candidate| candidate.bandwidth)
}

/// The Hi-Res audio candidate if any, else the highest-bandwidth one.
pub fn select_audio(candidates: &[StreamCandidate]) -> Option<&StreamCandidate> {
    candidates
        .iter()
        .find(|candidate| candidate.hi_res)
        .or_else(|| candidates.iter().max_by_key(|candidate| candidate.bandwidth))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> PlayInfo {
        PlayInfo {
            video: vec![
                StreamCandidate::video(80, 500_000, "https://cdn/80-avc"),
                StreamCandidate::video(80, 900_000, "https://cdn/80-hevc"),
                StreamCandidate::video(80, 700_000, "https://cdn/80-av1"),
                StreamCandidate::video(64, 2_000_000, "https://cdn/64"),
            ],
            audio: vec![
                StreamCandidate::audio(30216, 100_000, "https://cdn/a-30216"),
                StreamCandidate::audio(30280, 320_000, "https://cdn/a-30280"),
            ],
        }
    }

    #[test]
    fn video_takes_max_bandwidth_at_requested_rank() {
        let urls = select_streams(&manifest(), 80).unwrap();
        assert_eq!(urls.video, "https://cdn/80-hevc");
    }

    #[test]
    fn video_never_falls_back_to_another_rank() {
        let error = select_streams(&manifest(), 116).unwrap_err();
        assert!(matches!(error, ResolveError::QualityUnavailable(116)));
    }

    #[test]
    fn hi_res_audio_wins_regardless_of_bandwidth() {
        let audio = vec![
            StreamCandidate::audio(30216, 100_000, "https://cdn/a-30216"),
            StreamCandidate::audio(30251, 50_000, "https://cdn/a-30251").hi_res(),
        ];

        assert_eq!(select_audio(&audio).map(|a| a.id), Some(30251));
    }

    #[test]
    fn audio_falls_back_to_max_bandwidth() {
        let urls = select_streams(&manifest(), 64).unwrap();
        assert_eq!(urls.video, "https://cdn/64");
        assert_eq!(urls.audio, "https://cdn/a-30280");
    }

    #[test]
    fn empty_track_lists_are_no_streams() {
        let mut info = manifest();
        info.audio.clear();
        assert!(matches!(
            select_streams(&info, 80),
            Err(ResolveError::NoStreams(TrackKind::Audio))
        ));

        let info = PlayInfo::default();
        assert!(matches!(
            select_streams(&info, 80),
            Err(ResolveError::NoStreams(TrackKind::Video))
        ));
    }

    #[test]
    fn blank_url_is_no_streams() {
        let info = PlayInfo {
            video: vec![StreamCandidate::video(80, 1, "")],
            audio: vec![StreamCandidate::audio(30280, 1, "https://cdn/a")],
        };

        assert!(matches!(
            select_streams(&info, 80),
            Err(ResolveError::NoStreams(TrackKind::Video))
        ));
    }
}
