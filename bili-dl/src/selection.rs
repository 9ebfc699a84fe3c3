//! Strategies for choosing a quality tier out of a catalog.

use crate::model::QualityCatalog;

/// Chooses the quality rank to download from the tiers on offer.
///
/// Returning `None` skips the content unit.
pub trait QualitySelector {
    fn select(&self, catalog: &QualityCatalog) -> Option<u32>;
}

/// Always takes the best tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Highest;

impl QualitySelector for Highest {
    fn select(&self, catalog: &QualityCatalog) -> Option<u32> {
        catalog.highest()
    }
}

/// Takes a fixed rank, skipping units that do not offer it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixed(pub u32);

impl QualitySelector for Fixed {
    fn select(&self, catalog: &QualityCatalog) -> Option<u32> {
        catalog.contains(self.0).then_some(self.0)
    }
}

impl<F> QualitySelector for F
where
    F: Fn(&QualityCatalog) -> Option<u32>,
{
    fn select(&self, catalog: &QualityCatalog) -> Option<u32> {
        self(catalog)
    }
}
