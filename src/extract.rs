//! Fingerprint extraction boundary.

use crate::{error::ExtractionError, work::Fingerprint};

/// Turns raw content into a fixed-size [`Fingerprint`].
pub trait FingerprintExtractor: Send + Sync {
    /// Extracts the fingerprint for `content`.
    fn extract(&self, content: &[u8]) -> Result<Fingerprint, ExtractionError>;

    /// Length of every fingerprint this extractor produces.
    fn dimension(&self) -> usize;
}

/// Byte-distribution extractor: folds byte values into `dimension` buckets
/// and normalises the counts so the components sum to one.
#[derive(Debug, Clone)]
pub struct HistogramExtractor {
    dimension: usize,
}

impl HistogramExtractor {
    /// Creates an extractor producing `dimension` buckets (clamped to `1..=256`).
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.clamp(1, 256),
        }
    }
}

impl FingerprintExtractor for HistogramExtractor {
    fn extract(&self, content: &[u8]) -> Result<Fingerprint, ExtractionError> {
        if content.is_empty() {
            return Err(ExtractionError::Empty);
        }
        let mut counts = vec![0u64; self.dimension];
        for byte in content {
            let bucket = (*byte as usize * self.dimension) / 256;
            counts[bucket] += 1;
        }
        let total = content.len() as f64;
        let values = counts
            .into_iter()
            .map(|count| (count as f64 / total) as f32)
            .collect();
        Ok(Fingerprint::new(values))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_is_normalised() {
        let extractor = HistogramExtractor::new(16);
        let fp = extractor.extract(b"the quick brown fox").unwrap();
        assert_eq!(fp.dimension(), 16);
        let sum: f32 = fp.values().iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_content_is_rejected() {
        let extractor = HistogramExtractor::new(8);
        assert_eq!(extractor.extract(b""), Err(ExtractionError::Empty));
    }

    #[test]
    fn dimension_is_bounded() {
        assert_eq!(HistogramExtractor::new(0).dimension(), 1);
        assert_eq!(HistogramExtractor::new(1024).dimension(), 256);
        let fp = HistogramExtractor::new(256).extract(&[255u8]).unwrap();
        assert_eq!(fp.values()[255], 1.0);
    }
}
