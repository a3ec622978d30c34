//! Streaming TDigest wrapper.
//!
//! The `tdigests` crate builds digests from batches of values. Samples are
//! buffered and folded into the digest in batches, so memory stays bounded by
//! the compression plus the batch size no matter how long the run is.

use tdigests::{Centroid, TDigest};

/// Samples buffered before they are merged into the digest.
const BATCH_SIZE: usize = 64;

/// A bounded-memory quantile estimator fed one sample at a time.
pub struct StreamingDigest {
    digest: Option<TDigest>,
    pending: Vec<f64>,
    compression: usize,
}

impl StreamingDigest {
    pub fn new(compression: usize) -> Self {
        Self {
            digest: None,
            pending: Vec::with_capacity(BATCH_SIZE),
            compression,
        }
    }

    pub fn add(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.pending.push(value);
        if self.pending.len() >= BATCH_SIZE {
            self.flush();
        }
    }

    /// Estimate quantile `q` in [0, 1], `None` when no samples were seen.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        let q = q.clamp(0.0, 1.0);
        if self.pending.is_empty() {
            return self.digest.as_ref().map(|td| td.estimate_quantile(q));
        }

        let batch = TDigest::from_values(self.pending.clone());
        let merged = match &self.digest {
            Some(td) => merge_digests(td, &batch, self.compression),
            None => batch,
        };
        Some(merged.estimate_quantile(q))
    }

    /// Number of centroids currently held, pending samples excluded.
    pub fn centroid_count(&self) -> usize {
        self.digest.as_ref().map_or(0, |td| td.centroids().len())
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let values = std::mem::take(&mut self.pending);
        let mut batch = TDigest::from_values(values);
        batch.compress(self.compression);

        self.digest = Some(match self.digest.take() {
            Some(td) => merge_digests(&td, &batch, self.compression),
            None => batch,
        });
        self.pending.reserve(BATCH_SIZE);
    }
}

impl std::fmt::Debug for StreamingDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingDigest")
            .field("centroids", &self.centroid_count())
            .field("pending", &self.pending.len())
            .field("compression", &self.compression)
            .finish()
    }
}

/// Merge two digests by pooling their centroids and recompressing.
fn merge_digests(a: &TDigest, b: &TDigest, compression: usize) -> TDigest {
    let mut centroids: Vec<Centroid> = a
        .centroids()
        .iter()
        .chain(b.centroids())
        .map(|c| Centroid::new(c.mean, c.weight))
        .collect();
    centroids.sort_by(|x, y| x.mean.total_cmp(&y.mean));

    let mut merged = TDigest::from_centroids(centroids);
    merged.compress(compression);
    merged
}
