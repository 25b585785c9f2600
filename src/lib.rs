use std::{path::Path, sync::Mutex};

use tracing::instrument;

pub mod annotation;
mod aster_net;
pub mod collate;
pub mod config;
pub mod decode;
mod error;
pub mod eval;
pub mod model;
pub mod region;
mod result;
mod util;
pub mod vocab;

pub use aster_net::AsterNet;
pub use collate::{AlignCollator, AlignedBatch, BatchCollator};
pub use config::{Device, DuplicatePolicy, Enhancement, ImageFormat, PipelineConfig};
pub use error::{Error, Result};
pub use model::{Prediction, RecognitionModel};
pub use region::{extract_region, BoundingBox, NormalizedRegion, Region, SourceImage};
pub use result::*;
pub use vocab::{Symbol, Vocabulary};

pub use ort as runtime;

/// Region-to-text recognizer.
///
/// Holds the vocabulary and the model for its whole lifetime. Model calls are
/// serialized, one batch at a time.
pub struct Pipeline<M: RecognitionModel, C: BatchCollator = AlignCollator> {
    config: PipelineConfig,
    vocab: Vocabulary,
    model: Mutex<M>,
    collator: C,
}

impl Pipeline<AsterNet> {
    /// Loads the ONNX recognizer named in `config` on the configured device.
    #[instrument(skip(config), fields(device = ?config.device))]
    pub fn initialize(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let model = AsterNet::init(
            config.encoder_path.clone(),
            config.decoder_path.clone(),
            config.threads,
            config.height,
            config.max_len,
            &execution_providers(config.device),
            config.engine_cache.clone(),
        )?;
        Self::with_model(config, model)
    }
}

impl<M: RecognitionModel> Pipeline<M> {
    pub fn with_model(config: PipelineConfig, model: M) -> Result<Self> {
        Self::with_collator(config, model, AlignCollator::default())
    }
}

impl<M: RecognitionModel, C: BatchCollator> Pipeline<M, C> {
    /// Fails with [`Error::ModelLoadFailure`] when the model does not predict
    /// over exactly the vocabulary's classes.
    pub fn with_collator(config: PipelineConfig, model: M, collator: C) -> Result<Self> {
        config.validate()?;
        let vocab = Vocabulary::build();
        if model.num_classes() != vocab.len() {
            return Err(Error::ModelLoadFailure(format!(
                "model predicts {} classes but the vocabulary has {}",
                model.num_classes(),
                vocab.len()
            )));
        }
        log::debug!("Pipeline ready: {config:?}");

        Ok(Self {
            config,
            vocab,
            model: Mutex::new(model),
            collator,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    /// One text per box, in box order. The first failing box aborts the call.
    #[instrument(level = "debug", skip(self, image, boxes), fields(len = boxes.len()))]
    pub fn recognize(&self, image: &SourceImage, boxes: &[BoundingBox]) -> Result<Vec<String>> {
        Ok(self
            .recognize_lines(image, boxes)?
            .into_iter()
            .map(|line| line.text)
            .collect())
    }

    /// Like [`Pipeline::recognize`], keeping the decoder scores.
    #[instrument(level = "debug", skip(self, image, boxes), fields(len = boxes.len()))]
    pub fn recognize_lines(
        &self,
        image: &SourceImage,
        boxes: &[BoundingBox],
    ) -> Result<Vec<TextLine>> {
        let enhancement = self.config.enhancement_params();
        let regions = boxes
            .iter()
            .map(|bbox| extract_region(image, bbox, &enhancement))
            .collect::<Result<Vec<_>>>()?;

        self.predict(&regions)?
            .into_iter()
            .map(|(sequence, score)| self.to_text_line(&sequence, score))
            .collect()
    }

    /// Per-box results. Errors for which [`Error::is_region_local`] holds only
    /// fail their own entry; any other error fails the whole call.
    #[instrument(level = "debug", skip(self, image, boxes), fields(len = boxes.len()))]
    pub fn recognize_isolated(
        &self,
        image: &SourceImage,
        boxes: &[BoundingBox],
    ) -> Result<Vec<Result<TextLine>>> {
        let enhancement = self.config.enhancement_params();
        let mut failures = Vec::with_capacity(boxes.len());
        let mut regions = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            match extract_region(image, bbox, &enhancement) {
                Ok(region) => {
                    regions.push(region);
                    failures.push(None);
                }
                Err(err) if err.is_region_local() => {
                    log::debug!("Skipping region {bbox:?}: {err}");
                    failures.push(Some(err));
                }
                Err(err) => return Err(err),
            }
        }

        let mut predictions = self.predict(&regions)?.into_iter();
        let mut lines = Vec::with_capacity(boxes.len());
        for failure in failures {
            let line = match failure {
                Some(err) => Err(err),
                None => {
                    let (sequence, score) = predictions
                        .next()
                        .ok_or_else(|| Error::Inference("missing prediction".into()))?;
                    self.to_text_line(&sequence, score)
                }
            };
            match line {
                Err(err) if !err.is_region_local() => return Err(err),
                line => lines.push(line),
            }
        }
        Ok(lines)
    }

    /// Recognizes boxes on the image at `path` (or the image for an annotation
    /// stem).
    pub fn recognize_file(&self, path: &Path, boxes: &[BoundingBox]) -> Result<Vec<String>> {
        let image = annotation::load_image(path, self.config.image_format)?;
        self.recognize(&image, boxes)
    }

    /// Recognizes every region of an annotation, paired with its labeled region.
    pub fn recognize_annotation(&self, path: &Path) -> Result<Vec<OcrResult>> {
        let loaded =
            annotation::load(path, self.config.image_format, self.config.duplicate_policy)?;
        let lines = self.recognize_lines(&loaded.image, &loaded.boxes())?;
        Ok(loaded
            .regions
            .into_iter()
            .zip(lines)
            .map(|(region, text)| OcrResult { region, text })
            .collect())
    }

    fn to_text_line(&self, sequence: &[usize], score: f32) -> Result<TextLine> {
        Ok(TextLine {
            text: decode::decode(sequence, &self.vocab)?,
            score,
        })
    }

    /// Runs the model over `regions` in order, `batch_size` at a time.
    fn predict(&self, regions: &[NormalizedRegion]) -> Result<Vec<(Vec<usize>, f32)>> {
        let mut predictions = Vec::with_capacity(regions.len());
        for (index, batch) in regions.chunks(self.config.batch_size).enumerate() {
            predictions.extend(self.predict_batch(index, batch)?);
        }
        Ok(predictions)
    }

    #[instrument(level = "trace", skip(self, batch), fields(len = batch.len()))]
    fn predict_batch(
        &self,
        index: usize,
        batch: &[NormalizedRegion],
    ) -> Result<Vec<(Vec<usize>, f32)>> {
        let aligned = self.collator.collate(
            batch,
            self.config.height,
            self.config.width,
            self.config.keep_aspect_ratio,
        )?;

        let model = self
            .model
            .lock()
            .map_err(|_| Error::Inference("recognition model lock poisoned".into()))?;
        let features = model.encode(&aligned)?;
        let Prediction { sequences, scores } =
            model.decode(features, self.config.beam_width, self.vocab.eos_id())?;
        drop(model);

        if sequences.len() != batch.len() || scores.len() != batch.len() {
            return Err(Error::Inference(format!(
                "batch {index}: expected {} predictions, got {} sequences and {} scores",
                batch.len(),
                sequences.len(),
                scores.len()
            )));
        }
        log::trace!("Batch {index} decoded {} sequences", sequences.len());
        Ok(sequences.into_iter().zip(scores).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Default,
    #[cfg(feature = "tensorrt")]
    TensorRT,
    #[cfg(feature = "coreml")]
    CoreML,
    #[cfg(feature = "cuda")]
    Cuda,
    #[cfg(feature = "directml")]
    DirectML,
}

const ACCELERATED_PROVIDERS: &[ExecutionProvider] = &[
    #[cfg(feature = "tensorrt")]
    ExecutionProvider::TensorRT,
    #[cfg(feature = "coreml")]
    ExecutionProvider::CoreML,
    #[cfg(feature = "directml")]
    ExecutionProvider::DirectML,
    #[cfg(feature = "cuda")]
    ExecutionProvider::Cuda,
    ExecutionProvider::Default,
];

pub fn execution_providers(device: Device) -> Vec<ExecutionProvider> {
    match device {
        Device::Cpu => vec![ExecutionProvider::Default],
        Device::Accelerator => {
            if ACCELERATED_PROVIDERS.len() == 1 {
                log::warn!("No accelerator execution provider compiled in, running on CPU");
            }
            ACCELERATED_PROVIDERS.to_vec()
        }
    }
}
