//! Concrete stream offerings for a content unit.

use crate::model::TrackKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One encoded file offered for a track.
///
/// Several candidates may share an `id`: the platform serves the same nominal
/// quality in different codecs, and those differ in bandwidth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCandidate {
    /// The track this candidate belongs to.
    pub kind: TrackKind,
    /// The quality rank (video) or audio tier id (audio).
    pub id: u32,
    /// Bytes per second, only used to break ties.
    pub bandwidth: u64,
    /// Where the stream can be downloaded from.
    pub url: String,
    /// Whether this is the platform's lossless "Hi-Res" audio variant.
    pub hi_res: bool,
}

impl StreamCandidate {
    pub fn video(id: u32, bandwidth: u64, url: impl Into<String>) -> Self {
        Self {
            kind: TrackKind::Video,
            id,
            bandwidth,
            url: url.into(),
            hi_res: false,
        }
    }

    pub fn audio(id: u32, bandwidth: u64, url: impl Into<String>) -> Self {
        Self {
            kind: TrackKind::Audio,
            id,
            bandwidth,
            url: url.into(),
            hi_res: false,
        }
    }

    /// Flags the candidate as the high-resolution audio variant.
    pub fn hi_res(mut self) -> Self {
        self.hi_res = true;
        self
    }
}

impl fmt::Display for StreamCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StreamCandidate(kind={}, id={}, bandwidth={}, hi_res={})",
            self.kind, self.id, self.bandwidth, self.hi_res
        )
    }
}

/// The selected pair of stream URLs for a content unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamUrls {
    pub video: String,
    pub audio: String,
}

/// Every candidate the platform offers for one content unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayInfo {
    pub video: Vec<StreamCandidate>,
    pub audio: Vec<StreamCandidate>,
}
