//! Accuracy of a [`Pipeline`] over a labeled annotation corpus.

use std::path::{Path, PathBuf};

use rand::{rngs::StdRng, seq::index::sample, SeedableRng};
use tracing::instrument;

use crate::{BatchCollator, Pipeline, RecognitionModel, Result};

/// Expands `paths` into annotation files.
///
/// Directories contribute their `*.xml` files in name order. `.xml` files are
/// taken as is. Any other file is a list of annotation stems, one per line,
/// resolved against the list's directory.
pub fn collect_annotations(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut annotations = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries = std::fs::read_dir(path)?
                .map(|entry| entry.map(|entry| entry.path()))
                .collect::<std::io::Result<Vec<_>>>()?;
            entries.retain(|entry| is_xml(entry));
            entries.sort();
            annotations.extend(entries);
        } else if is_xml(path) {
            annotations.push(path.clone());
        } else {
            let base = path.parent().unwrap_or_else(|| Path::new(""));
            let list = std::fs::read_to_string(path)?;
            annotations.extend(
                list.lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(|stem| {
                        let entry = base.join(stem);
                        if is_xml(&entry) {
                            entry
                        } else {
                            PathBuf::from(format!("{}.xml", entry.display()))
                        }
                    }),
            );
        }
    }
    Ok(annotations)
}

fn is_xml(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"))
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionOutcome {
    pub label: Option<String>,
    pub predicted: String,
}

impl RegionOutcome {
    pub fn is_exact(&self) -> bool {
        self.label.as_deref() == Some(self.predicted.as_str())
    }

    pub fn is_case_insensitive(&self) -> bool {
        self.label
            .as_deref()
            .is_some_and(|label| label.to_lowercase() == self.predicted.to_lowercase())
    }
}

#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: PathBuf,
    /// `Err` holds the reason the file could not be evaluated.
    pub outcome: std::result::Result<Vec<RegionOutcome>, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EvalSummary {
    pub files: usize,
    pub failed_files: usize,
    pub regions: usize,
    pub exact: usize,
    pub case_insensitive: usize,
}

impl EvalSummary {
    fn add(&mut self, report: &FileReport) {
        self.files += 1;
        match &report.outcome {
            Ok(outcomes) => {
                self.regions += outcomes.len();
                self.exact += outcomes.iter().filter(|it| it.is_exact()).count();
                self.case_insensitive += outcomes
                    .iter()
                    .filter(|it| it.is_case_insensitive())
                    .count();
            }
            Err(_) => self.failed_files += 1,
        }
    }

    pub fn accuracy(&self) -> f32 {
        if self.regions == 0 {
            return 0.0;
        }
        self.exact as f32 / self.regions as f32
    }

    pub fn case_insensitive_accuracy(&self) -> f32 {
        if self.regions == 0 {
            return 0.0;
        }
        self.case_insensitive as f32 / self.regions as f32
    }
}

pub struct Evaluator<'a, M: RecognitionModel, C: BatchCollator> {
    pipeline: &'a Pipeline<M, C>,
    limit: Option<usize>,
    sample: Option<usize>,
}

impl<'a, M: RecognitionModel, C: BatchCollator> Evaluator<'a, M, C> {
    pub fn new(pipeline: &'a Pipeline<M, C>) -> Self {
        Self {
            pipeline,
            limit: None,
            sample: None,
        }
    }

    /// Evaluate only the first `limit` selected files.
    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Evaluate a random subset of `sample` files, drawn with the pipeline's
    /// seed. Selected files keep their relative order.
    pub fn sample(mut self, sample: Option<usize>) -> Self {
        self.sample = sample;
        self
    }

    pub fn select(&self, annotations: &[PathBuf]) -> Vec<PathBuf> {
        let mut selected = match self.sample {
            Some(amount) if amount < annotations.len() => {
                let mut rng = StdRng::seed_from_u64(self.pipeline.config().seed);
                let mut indices = sample(&mut rng, annotations.len(), amount).into_vec();
                indices.sort_unstable();
                indices
                    .into_iter()
                    .map(|index| annotations[index].clone())
                    .collect()
            }
            _ => annotations.to_vec(),
        };
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }

    /// Evaluates the selected annotations, handing each report to `on_file`
    /// as soon as it is ready. Files that fail to load or recognize are
    /// reported and counted, not fatal.
    #[instrument(skip_all, fields(len = annotations.len()))]
    pub fn run(
        &self,
        annotations: &[PathBuf],
        mut on_file: impl FnMut(&FileReport),
    ) -> EvalSummary {
        let mut summary = EvalSummary::default();
        for path in self.select(annotations) {
            let outcome = self
                .pipeline
                .recognize_annotation(&path)
                .map(|results| {
                    results
                        .into_iter()
                        .map(|result| RegionOutcome {
                            label: result.region.label,
                            predicted: result.text.text,
                        })
                        .collect()
                })
                .map_err(|err| {
                    log::warn!("Failed to evaluate {}: {err}", path.display());
                    err.to_string()
                });
            let report = FileReport { path, outcome };
            summary.add(&report);
            on_file(&report);
        }
        log::debug!("Evaluation finished: {summary:?}");
        summary
    }
}
