use crate::Region;

#[derive(Debug, Clone)]
pub struct OcrResult {
    pub region: Region,
    pub text: TextLine,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub text: String,
    /// Sequence score reported by the decoder.
    pub score: f32,
}
