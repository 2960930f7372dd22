//! Label-aware augmentations over whole batches.

use ndarray::{Array1, Array4, ArrayView1, ArrayView4, Axis};

use crate::dataset::DrivingDataset;
use crate::error::Result;

pub type ImageTransform = fn(ArrayView4<'_, f32>) -> Array4<f32>;
pub type LabelTransform = fn(ArrayView1<'_, f32>) -> Array1<f32>;

/// Augmentations applied by [`augment_dataset`], in order. Each pair appends
/// one transformed copy of the dataset it receives.
pub const AUGMENTATIONS: &[(ImageTransform, LabelTransform)] = &[(
    flip_images as ImageTransform,
    negate_labels as LabelTransform,
)];

/// Mirrors every `[N, H, W, C]` image along its width axis.
pub fn flip_images(images: ArrayView4<'_, f32>) -> Array4<f32> {
    let mut flipped = images.to_owned();
    flipped.invert_axis(Axis(2));
    flipped.as_standard_layout().into_owned()
}

/// Steering left in a mirrored frame is steering right in the original.
pub fn negate_labels(labels: ArrayView1<'_, f32>) -> Array1<f32> {
    labels.mapv(|label| label * -1.0)
}

pub fn augment_dataset(dataset: &DrivingDataset) -> Result<DrivingDataset> {
    let mut augmented = dataset.clone();
    for (image_transform, label_transform) in AUGMENTATIONS {
        augmented = augmented.augment(*image_transform, *label_transform)?;
    }

    log::info!(
        "Augmented dataset from {} to {} samples",
        dataset.len(),
        augmented.len()
    );
    Ok(augmented)
}
