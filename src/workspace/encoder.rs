/// Deterministic hashed encoding of summaries into fixed-size vectors.
///
/// The document store requires a vector per point; this keeps workspaces queryable without
/// an embedding service in the ingestion path.
#[derive(Debug, Clone, Copy)]
pub struct SummaryEncoder {
    dimension: usize,
}

impl SummaryEncoder {
    /// Construct an encoder producing `dimension`-sized vectors.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    /// Vector length produced by [`Self::encode`].
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// Encode `text` as an L2-normalized vector.
    pub fn encode(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimension];

        if text.is_empty() || self.dimension == 0 {
            return embedding;
        }

        for (idx, byte) in text.bytes().enumerate() {
            let position = idx % self.dimension;
            embedding[position] += f32::from(byte) / 255.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}
