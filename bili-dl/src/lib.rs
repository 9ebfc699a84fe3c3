#![doc = include_str!("../README.md")]

pub mod client;
pub mod error;
pub mod executor;
pub mod fetcher;
pub mod ledger;
pub mod model;
pub mod muxer;
pub mod pipeline;
pub mod resolver;
pub mod selection;
pub mod utils;

// Re-export of the types most callers need
pub use client::BiliClient;
pub use error::{PipelineError, Result};
pub use ledger::Ledger;
pub use model::{DownloadJob, PageUnit, QualityCatalog, QualityTier, TrackKind, VideoItem};
pub use pipeline::{Outcome, Pipeline};
