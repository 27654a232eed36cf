use std::sync::Arc;

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};

use crate::error::InferenceError;

/// Opaque trained classifier. Input is a batch of normalized, resized 2D
/// images `[n, h, w]`; output is one confidence in `[0, 1]` per image, in
/// batch order.
pub trait Classifier: std::fmt::Debug + Send + Sync {
    fn predict_batch(&self, batch: &Array3<f32>) -> Result<Vec<f32>, InferenceError>;
}

/// Fixed slice-sampling window and resize target for prediction. Identical
/// across calls so per-slice scores are reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingPlan {
    /// Half-open sagittal slice range `[lower, upper)`.
    pub slice_range: (usize, usize),
    pub stride: usize,
    /// `(height, width)` each sampled slice is resized to.
    pub target_dim: (usize, usize),
}

impl Default for SamplingPlan {
    fn default() -> Self {
        // 100 central sagittal slices at 128x128, the window the shipped
        // classifier was trained on.
        Self {
            slice_range: (78, 178),
            stride: 1,
            target_dim: (128, 128),
        }
    }
}

impl SamplingPlan {
    /// Sampled slice positions for a volume with `extent` sagittal slices,
    /// ascending, deterministic.
    pub fn positions(&self, extent: usize) -> Vec<usize> {
        let (lower, upper) = self.slice_range;
        (lower..upper.min(extent))
            .step_by(self.stride.max(1))
            .collect()
    }
}

/// Wraps the bound classifier with the slice preprocessing it expects:
/// max-normalize the volume, sample sagittal planes per the plan, resize
/// nearest-neighbor, batch.
#[derive(Debug, Clone)]
pub struct InferenceEngine {
    classifier: Arc<dyn Classifier>,
    plan: SamplingPlan,
}

impl InferenceEngine {
    pub fn new(classifier: Arc<dyn Classifier>, plan: SamplingPlan) -> Self {
        Self { classifier, plan }
    }

    /// Per-slice confidences for one 3D volume, in sampling order. `None` if
    /// the classifier invocation fails; a failed volume must not abort the
    /// surrounding batch, so the failure is logged and swallowed here.
    pub fn predict_volume(&self, volume: ArrayView3<'_, f32>) -> Option<Vec<f32>> {
        let positions = self.plan.positions(volume.shape()[0]);
        let (height, width) = self.plan.target_dim;

        // Normalization divisor is the volume's own max voxel, so scores are
        // only comparable within one volume's prediction run.
        let max = volume.iter().copied().fold(0.0f32, f32::max);
        let scale = if max > 0.0 { 1.0 / max } else { 0.0 };

        let mut batch = Array3::<f32>::zeros((positions.len(), height, width));
        for (i, &position) in positions.iter().enumerate() {
            let plane = volume.index_axis(Axis(0), position);
            let resized = resize_nearest(plane, height, width);
            batch
                .index_axis_mut(Axis(0), i)
                .assign(&resized.mapv(|v| v * scale));
        }

        match self.classifier.predict_batch(&batch) {
            Ok(scores) => Some(scores),
            Err(err) => {
                log::warn!("volume prediction failed: {err}");
                None
            }
        }
    }
}

/// Nearest-neighbor resize: `src_index = dst_index * src_extent / dst_extent`.
pub fn resize_nearest(image: ArrayView2<'_, f32>, height: usize, width: usize) -> Array2<f32> {
    let (src_h, src_w) = image.dim();
    Array2::from_shape_fn((height, width), |(i, j)| {
        let si = i * src_h / height;
        let sj = j * src_w / width;
        image[[si, sj]]
    })
}
