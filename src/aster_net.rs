use std::path::{Path, PathBuf};

use ndarray::{arr1, ArrayD, Axis};
use ort::{inputs, ExecutionProviderDispatch, GraphOptimizationLevel, Session};
use tracing::instrument;

use crate::{
    model::{Prediction, RecognitionModel},
    AlignedBatch, Error, ExecutionProvider, Result,
};

const NUM_CLASSES_KEY: &str = "num_classes";

/// Attention recognizer exported as two ONNX graphs.
///
/// The encoder takes `x: f32[N, 3, H, W]` and its first output is the feature
/// tensor. The decoder takes `features`, plus `beam_width`, `eos` and
/// `max_len` as `i64[1]`, and yields `sequences: i64[N, T]` and
/// `scores: f32[N]`. Its metadata must carry `num_classes`.
pub struct AsterNet {
    encoder: Session,
    decoder: Session,
    num_classes: usize,
    max_len: usize,
}

#[cfg(feature = "tensorrt")]
fn setup_tensorrt(cache_path: PathBuf, height: u32) -> ExecutionProviderDispatch {
    use ort::TensorRTExecutionProvider;

    TensorRTExecutionProvider::default()
        .with_profile_min_shapes(format!("x:1x3x{height}x{height}"))
        .with_profile_max_shapes(format!("x:256x3x{height}x400"))
        .with_profile_opt_shapes(format!("x:32x3x{height}x256"))
        .with_engine_cache(true)
        .with_engine_cache_path(cache_path.to_string_lossy())
        .with_timing_cache(true)
        .with_builder_optimization_level(5)
        .build()
}

#[cfg(feature = "cuda")]
fn setup_cuda() -> ExecutionProviderDispatch {
    use ort::CUDAExecutionProvider;

    CUDAExecutionProvider::default().build()
}

#[cfg(feature = "coreml")]
fn setup_coreml() -> ExecutionProviderDispatch {
    use ort::CoreMLExecutionProvider;

    CoreMLExecutionProvider::default().build()
}

#[cfg(feature = "directml")]
fn setup_directml() -> ExecutionProviderDispatch {
    use ort::DirectMLExecutionProvider;

    DirectMLExecutionProvider::default().build()
}

#[allow(unused_variables)]
fn dispatch(
    providers: &[ExecutionProvider],
    model_path: &Path,
    cache_path: Option<&PathBuf>,
    height: u32,
) -> Vec<ExecutionProviderDispatch> {
    providers
        .iter()
        .filter_map(|provider| -> Option<ExecutionProviderDispatch> {
            match provider {
                ExecutionProvider::Default => None,
                #[cfg(feature = "tensorrt")]
                ExecutionProvider::TensorRT => Some(setup_tensorrt(
                    cache_path.cloned().unwrap_or_else(|| {
                        model_path
                            .parent()
                            .map_or_else(|| PathBuf::from(".cache"), |dir| dir.join(".cache"))
                    }),
                    height,
                )),
                #[cfg(feature = "cuda")]
                ExecutionProvider::Cuda => Some(setup_cuda()),
                #[cfg(feature = "coreml")]
                ExecutionProvider::CoreML => Some(setup_coreml()),
                #[cfg(feature = "directml")]
                ExecutionProvider::DirectML => Some(setup_directml()),
            }
        })
        .collect()
}

fn load_session(
    path: &Path,
    num_threads: usize,
    execution_providers: Vec<ExecutionProviderDispatch>,
) -> Result<Session> {
    if !path.is_file() {
        return Err(Error::ModelLoadFailure(format!(
            "model file does not exist: {}",
            path.display()
        )));
    }
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_inter_threads(num_threads)?
        .with_intra_threads(num_threads)?
        .with_execution_providers(execution_providers)?
        .commit_from_file(path)
        .map_err(|err| Error::ModelLoadFailure(format!("{}: {err}", path.display())))?;

    log::debug!("{} inputs: {:?}", path.display(), session.inputs);
    log::debug!("{} outputs: {:?}", path.display(), session.outputs);
    Ok(session)
}

impl AsterNet {
    #[instrument(level = "debug", skip(execution_providers))]
    pub fn init(
        encoder_path: PathBuf,
        decoder_path: PathBuf,
        num_threads: usize,
        height: u32,
        max_len: usize,
        execution_providers: &[ExecutionProvider],
        cache_path: Option<PathBuf>,
    ) -> Result<Self> {
        let encoder = load_session(
            &encoder_path,
            num_threads,
            dispatch(execution_providers, &encoder_path, cache_path.as_ref(), height),
        )?;
        let decoder = load_session(
            &decoder_path,
            num_threads,
            dispatch(execution_providers, &decoder_path, cache_path.as_ref(), height),
        )?;

        let num_classes = decoder
            .metadata()?
            .custom(NUM_CLASSES_KEY)?
            .ok_or_else(|| {
                Error::ModelLoadFailure(format!(
                    "decoder metadata has no `{NUM_CLASSES_KEY}` entry"
                ))
            })?;
        let num_classes = num_classes.trim().parse::<usize>().map_err(|_| {
            Error::ModelLoadFailure(format!("invalid `{NUM_CLASSES_KEY}`: {num_classes:?}"))
        })?;
        log::debug!("Decoder predicts over {num_classes} classes");

        Ok(Self {
            encoder,
            decoder,
            num_classes,
            max_len,
        })
    }
}

impl RecognitionModel for AsterNet {
    type Features = ArrayD<f32>;

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    #[instrument(level = "trace", skip(self, batch))]
    fn encode(&self, batch: &AlignedBatch) -> Result<Self::Features> {
        let outputs = self.encoder.run(inputs!["x" => batch.clone()]?)?;
        let features = outputs
            .first_key_value()
            .ok_or_else(|| Error::Inference("encoder produced no outputs".into()))?
            .1
            .try_extract_tensor::<f32>()?
            .to_owned();
        log::trace!("Encoder features: {:?}", features.shape());
        Ok(features)
    }

    #[instrument(level = "trace", skip(self, features))]
    fn decode(
        &self,
        features: Self::Features,
        beam_width: usize,
        eos_id: usize,
    ) -> Result<Prediction> {
        let outputs = self.decoder.run(inputs![
            "features" => features,
            "beam_width" => arr1(&[beam_width as i64]),
            "eos" => arr1(&[eos_id as i64]),
            "max_len" => arr1(&[self.max_len as i64])
        ]?)?;

        let sequences = outputs
            .get("sequences")
            .ok_or_else(|| Error::Inference("decoder output `sequences` missing".into()))?
            .try_extract_tensor::<i64>()?;
        let scores = outputs
            .get("scores")
            .ok_or_else(|| Error::Inference("decoder output `scores` missing".into()))?
            .try_extract_tensor::<f32>()?;

        let sequences = sequences
            .axis_iter(Axis(0))
            .map(|row| {
                row.iter()
                    .map(|&id| {
                        usize::try_from(id).map_err(|_| {
                            Error::Inference(format!("decoder produced negative index {id}"))
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Prediction {
            sequences,
            scores: scores.iter().copied().collect(),
        })
    }
}
