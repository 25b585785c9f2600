use tracing::instrument;

use crate::{vocab::Vocabulary, Error, Result};

/// Converts a predicted index sequence into text.
///
/// Everything from the first `EOS` on is dropped. Every remaining index is
/// written as its symbol, so a predicted `PADDING` or `UNKNOWN` shows up in
/// the text by name.
#[instrument(level = "trace", skip(vocab))]
pub fn decode(sequence: &[usize], vocab: &Vocabulary) -> Result<String> {
    let eos_id = vocab.eos_id();
    let end = sequence
        .iter()
        .position(|&id| id == eos_id)
        .ok_or(Error::MissingEndMarker {
            len: sequence.len(),
        })?;

    sequence[..end]
        .iter()
        .map(|&id| vocab.id_to_symbol(id).map(|symbol| symbol.to_string()))
        .collect()
}
