use crate::{AlignedBatch, Result};

/// Output of one decoder call: an index sequence and a score per batch item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prediction {
    pub sequences: Vec<Vec<usize>>,
    pub scores: Vec<f32>,
}

/// A trained encoder/decoder pair operating in a fixed index space.
pub trait RecognitionModel {
    type Features;

    /// Number of classes the decoder predicts over. Must equal the vocabulary
    /// size the pipeline decodes with.
    fn num_classes(&self) -> usize;

    fn encode(&self, batch: &AlignedBatch) -> Result<Self::Features>;

    fn decode(&self, features: Self::Features, beam_width: usize, eos_id: usize)
        -> Result<Prediction>;
}
