use std::fs;
use std::path::Path;
use std::sync::Arc;

use ndarray::{Array3, Axis};
use serde::Deserialize;

use crate::detect::engine::Classifier;
use crate::error::{InferenceError, ModelLoadError};

/// On-disk classifier artifact: a logistic scorer over the flattened,
/// normalized slice pixels. The artifact stays opaque to the rest of the
/// pipeline; anything implementing `Classifier` can replace this binding.
#[derive(Debug, Deserialize)]
struct ModelArtifact {
    /// `(height, width)` the weights were trained at.
    input_dim: [usize; 2],
    /// Row-major, `input_dim[0] * input_dim[1]` entries.
    weights: Vec<f32>,
    bias: f32,
}

#[derive(Debug)]
pub struct LogisticSliceModel {
    input_dim: (usize, usize),
    weights: Vec<f32>,
    bias: f32,
}

/// Binds the classifier artifact at `path`. Potentially slow (disk +
/// deserialization); always invoked off the interactive thread.
pub fn load_classifier(path: &Path) -> Result<Arc<dyn Classifier>, ModelLoadError> {
    log::info!("Loading classifier artifact: {}", path.display());
    let text = fs::read_to_string(path).map_err(|source| ModelLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let artifact: ModelArtifact =
        serde_json::from_str(&text).map_err(|source| ModelLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    let [height, width] = artifact.input_dim;
    if artifact.weights.len() != height * width {
        return Err(ModelLoadError::Malformed {
            path: path.to_path_buf(),
            reason: format!(
                "expected {} weights for a {height}x{width} input, got {}",
                height * width,
                artifact.weights.len()
            ),
        });
    }

    Ok(Arc::new(LogisticSliceModel {
        input_dim: (height, width),
        weights: artifact.weights,
        bias: artifact.bias,
    }))
}

impl Classifier for LogisticSliceModel {
    fn predict_batch(&self, batch: &Array3<f32>) -> Result<Vec<f32>, InferenceError> {
        let (_, height, width) = batch.dim();
        if (height, width) != self.input_dim {
            return Err(InferenceError(format!(
                "batch is {height}x{width}, model expects {}x{}",
                self.input_dim.0, self.input_dim.1
            )));
        }

        Ok(batch
            .axis_iter(Axis(0))
            .map(|image| {
                let logit: f32 = image
                    .iter()
                    .zip(&self.weights)
                    .map(|(pixel, weight)| pixel * weight)
                    .sum::<f32>()
                    + self.bias;
                sigmoid(logit)
            })
            .collect())
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
