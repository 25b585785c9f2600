use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Accelerator,
}

/// In-memory representation images are loaded into. Selects the region
/// extraction strategy, see [`crate::region::extract_region`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// `(height, width, channel)` pixel array, cropped as is.
    Array,
    /// Decoded image, cropped then resized and enhanced.
    #[default]
    Image,
}

/// What to do with object entries that share identical coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// One region per coordinate tuple, at the position it first appeared,
    /// carrying the label of the last entry.
    #[default]
    LastWriteWins,
    /// Every entry in file order.
    KeepAll,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Enhancement {
    pub resize_factor: f32,
    pub sharpness: f32,
    pub contrast: f32,
}

impl Enhancement {
    pub const IDENTITY: Enhancement = Enhancement {
        resize_factor: 1.0,
        sharpness: 1.0,
        contrast: 1.0,
    };
}

impl Default for Enhancement {
    fn default() -> Self {
        Self {
            resize_factor: 1.5,
            sharpness: 1.0,
            contrast: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub device: Device,
    pub seed: u64,
    pub threads: usize,
    pub batch_size: usize,
    pub beam_width: usize,
    pub resize_factor: f32,
    pub sharpness: f32,
    pub contrast: f32,
    pub height: u32,
    pub width: u32,
    pub keep_aspect_ratio: bool,
    pub max_len: usize,
    pub image_format: ImageFormat,
    pub duplicate_policy: DuplicatePolicy,
    pub encoder_path: PathBuf,
    pub decoder_path: PathBuf,
    /// TensorRT engine cache, next to the models when unset.
    pub engine_cache: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let enhancement = Enhancement::default();
        Self {
            device: Device::Cpu,
            seed: 1,
            threads: 4,
            batch_size: 32,
            beam_width: 5,
            resize_factor: enhancement.resize_factor,
            sharpness: enhancement.sharpness,
            contrast: enhancement.contrast,
            height: 64,
            width: 256,
            keep_aspect_ratio: true,
            max_len: 100,
            image_format: ImageFormat::Image,
            duplicate_policy: DuplicatePolicy::LastWriteWins,
            encoder_path: "models/aster_encoder.onnx".into(),
            decoder_path: "models/aster_decoder.onnx".into(),
            engine_cache: None,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|err| Error::InvalidConfig(format!("{}: {err}", path.display())))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|err| Error::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn beam_width(mut self, beam_width: usize) -> Self {
        self.beam_width = beam_width;
        self
    }

    pub fn enhancement(mut self, enhancement: Enhancement) -> Self {
        self.resize_factor = enhancement.resize_factor;
        self.sharpness = enhancement.sharpness;
        self.contrast = enhancement.contrast;
        self
    }

    pub fn target_size(mut self, height: u32, width: u32) -> Self {
        self.height = height;
        self.width = width;
        self
    }

    pub fn keep_aspect_ratio(mut self, keep_aspect_ratio: bool) -> Self {
        self.keep_aspect_ratio = keep_aspect_ratio;
        self
    }

    pub fn max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn image_format(mut self, image_format: ImageFormat) -> Self {
        self.image_format = image_format;
        self
    }

    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn models(mut self, encoder: impl Into<PathBuf>, decoder: impl Into<PathBuf>) -> Self {
        self.encoder_path = encoder.into();
        self.decoder_path = decoder.into();
        self
    }

    pub fn engine_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.engine_cache = Some(path.into());
        self
    }

    pub fn enhancement_params(&self) -> Enhancement {
        Enhancement {
            resize_factor: self.resize_factor,
            sharpness: self.sharpness,
            contrast: self.contrast,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be > 0".into()));
        }
        if self.beam_width == 0 {
            return Err(Error::InvalidConfig("beam_width must be > 0".into()));
        }
        if self.height == 0 || self.width == 0 {
            return Err(Error::InvalidConfig(format!(
                "target size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.max_len == 0 {
            return Err(Error::InvalidConfig("max_len must be > 0".into()));
        }
        if !self.resize_factor.is_finite() || self.resize_factor <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "resize_factor must be a positive number, got {}",
                self.resize_factor
            )));
        }
        // 0.0 is meaningful for both: fully smoothed, fully grey
        for (name, value) in [("sharpness", self.sharpness), ("contrast", self.contrast)] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }
}
