//! The models used to represent videos, their pages and the available qualities.
//!
//! The wire formats returned by the platform live in [`crate::client::response`];
//! the types here are what the rest of the crate works with.

use derive_more::Constructor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

pub mod stream;

pub use stream::{PlayInfo, StreamCandidate, StreamUrls};

/// A video saved in a collection, possibly split into several pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoItem {
    /// The platform video key, e.g. `BV1xx411c7mD`.
    pub bvid: String,
    /// The display title.
    pub title: String,
    /// The uploader's display name.
    pub owner: String,
    /// The playable pages, in upload order.
    pub pages: Vec<PageUnit>,
}

impl VideoItem {
    /// Finds the page with the given content-unit identifier.
    pub fn page(&self, cid: i64) -> Option<&PageUnit> {
        self.pages.iter().find(|page| page.cid == cid)
    }
}

impl fmt::Display for VideoItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VideoItem(bvid={}, title=\"{}\", pages={})",
            self.bvid,
            self.title,
            self.pages.len()
        )
    }
}

/// One playable sub-part of a video.
#[derive(Constructor, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageUnit {
    /// The content-unit identifier, scoped within the video.
    pub cid: i64,
    /// The page label ("part" name).
    pub part: String,
}

/// A nominal encoding tier, e.g. `80 - 1080P`.
#[derive(Constructor, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualityTier {
    /// The rank code, higher is technically better.
    pub rank: u32,
    /// The human-readable description.
    pub description: String,
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.rank, self.description)
    }
}

/// The quality tiers a content unit is offered in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QualityCatalog {
    tiers: BTreeMap<u32, String>,
}

impl QualityCatalog {
    /// Builds a catalog from `(rank, description)` pairs; later duplicates win.
    pub fn new(tiers: impl IntoIterator<Item = (u32, String)>) -> Self {
        Self {
            tiers: tiers.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn contains(&self, rank: u32) -> bool {
        self.tiers.contains_key(&rank)
    }

    pub fn description(&self, rank: u32) -> Option<&str> {
        self.tiers.get(&rank).map(String::as_str)
    }

    /// The highest rank on offer.
    pub fn highest(&self) -> Option<u32> {
        self.tiers.keys().next_back().copied()
    }

    /// All tiers, best first.
    pub fn tiers(&self) -> Vec<QualityTier> {
        self.tiers
            .iter()
            .rev()
            .map(|(rank, description)| QualityTier::new(*rank, description.clone()))
            .collect()
    }
}

/// Which elementary stream a candidate or a temporary file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::Audio => write!(f, "audio"),
        }
    }
}

/// One unit of work: a page of a video at a quality, written to a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    /// The video the page belongs to.
    pub item: VideoItem,
    /// The page to download.
    pub page: PageUnit,
    /// The requested quality rank.
    pub quality: u32,
    /// The directory the final file is written to.
    pub destination: PathBuf,
    /// Appended to the file name, e.g. `HDR` for a second, HDR copy.
    pub suffix: Option<String>,
}

impl DownloadJob {
    /// Creates a job without a filename suffix.
    pub fn new(
        item: VideoItem,
        page: PageUnit,
        quality: u32,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            item,
            page,
            quality,
            destination: destination.into(),
            suffix: None,
        }
    }

    /// Sets the filename suffix.
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }
}

impl fmt::Display for DownloadJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} [{}]",
            self.item.title, self.page.part, self.quality
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_orders_tiers_best_first() {
        let catalog = QualityCatalog::new([
            (32, "480P".to_string()),
            (80, "1080P".to_string()),
            (64, "720P".to_string()),
        ]);

        let ranks: Vec<u32> = catalog.tiers().iter().map(|tier| tier.rank).collect();
        assert_eq!(ranks, vec![80, 64, 32]);
        assert_eq!(catalog.highest(), Some(80));
        assert_eq!(catalog.description(64), Some("720P"));
        assert!(!catalog.contains(120));
    }

    #[test]
    fn empty_catalog_has_no_highest() {
        assert_eq!(QualityCatalog::default().highest(), None);
    }

    #[test]
    fn item_finds_page_by_cid() {
        let item = VideoItem {
            bvid: "BV1".to_string(),
            title: "t".to_string(),
            owner: "o".to_string(),
            pages: vec![PageUnit::new(10, "P1".into()), PageUnit::new(11, "P2".into())],
        };

        assert_eq!(item.page(11).map(|p| p.part.as_str()), Some("P2"));
        assert!(item.page(12).is_none());
    }
}
