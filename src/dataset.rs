//! In-memory driving samples.
//!
//! A [`DrivingDataset`] owns two parallel arrays: images laid out as
//! `[N, H, W, C]` and steering labels of length `N`. Transforms never mutate a
//! dataset; [`DrivingDataset::concat`] and [`DrivingDataset::augment`] return a
//! fresh instance with its own storage.

use std::ops::Range;
use std::sync::Arc;

use burn::data::dataset::Dataset;
use ndarray::{Array1, Array3, Array4, ArrayView1, ArrayView4, Axis, concatenate};

use crate::error::{Error, Result};

/// One preprocessed frame with its steering angle.
#[derive(Debug, Clone, PartialEq)]
pub struct SteeringItem {
    /// Pixels in `[H, W, C]` row-major order.
    pub image: Vec<f32>,
    pub label: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrivingDataset {
    images: Array4<f32>,
    labels: Array1<f32>,
}

impl DrivingDataset {
    pub fn new(images: Array4<f32>, labels: Array1<f32>) -> Result<Self> {
        if images.len_of(Axis(0)) != labels.len() {
            return Err(Error::Validation(format!(
                "{} images but {} labels",
                images.len_of(Axis(0)),
                labels.len()
            )));
        }

        Ok(Self { images, labels })
    }

    /// Stacks per-sample `[H, W, C]` arrays that must all have `image_shape`.
    pub fn from_samples(
        image_shape: [usize; 3],
        images: Vec<Array3<f32>>,
        labels: Vec<f32>,
    ) -> Result<Self> {
        if images.len() != labels.len() {
            return Err(Error::Validation(format!(
                "{} images but {} labels",
                images.len(),
                labels.len()
            )));
        }

        let [h, w, c] = image_shape;
        let mut pixels = Vec::with_capacity(images.len() * h * w * c);
        for image in &images {
            if image.shape() != image_shape.as_slice() {
                return Err(Error::ShapeMismatch {
                    expected: image_shape.to_vec(),
                    actual: image.shape().to_vec(),
                });
            }
            pixels.extend(image.iter().copied());
        }

        let images = Array4::from_shape_vec((labels.len(), h, w, c), pixels)
            .map_err(|err| Error::Validation(err.to_string()))?;

        Self::new(images, Array1::from(labels))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// `[H, W, C]` of every image.
    pub fn image_shape(&self) -> [usize; 3] {
        let (_, h, w, c) = self.images.dim();
        [h, w, c]
    }

    pub fn images(&self) -> ArrayView4<'_, f32> {
        self.images.view()
    }

    pub fn labels(&self) -> ArrayView1<'_, f32> {
        self.labels.view()
    }

    pub fn get(&self, index: usize) -> Option<SteeringItem> {
        if index >= self.len() {
            return None;
        }

        Some(SteeringItem {
            image: self
                .images
                .index_axis(Axis(0), index)
                .iter()
                .copied()
                .collect(),
            label: self.labels[index],
        })
    }

    /// Returns `self`'s samples followed by `other`'s.
    pub fn concat(&self, other: &Self) -> Result<Self> {
        if self.image_shape() != other.image_shape() {
            return Err(Error::ShapeMismatch {
                expected: self.image_shape().to_vec(),
                actual: other.image_shape().to_vec(),
            });
        }

        let images = concatenate(Axis(0), &[self.images.view(), other.images.view()])
            .map_err(|err| Error::Validation(err.to_string()))?;
        let labels = concatenate(Axis(0), &[self.labels.view(), other.labels.view()])
            .map_err(|err| Error::Validation(err.to_string()))?;

        Self::new(images, labels)
    }

    /// Appends `(image_transform(images), label_transform(labels))` to the
    /// original samples, doubling the dataset.
    pub fn augment<F, G>(&self, image_transform: F, label_transform: G) -> Result<Self>
    where
        F: Fn(ArrayView4<'_, f32>) -> Array4<f32>,
        G: Fn(ArrayView1<'_, f32>) -> Array1<f32>,
    {
        let extra = Self::new(
            image_transform(self.images.view()),
            label_transform(self.labels.view()),
        )?;

        self.concat(&extra)
    }

    /// Splits off the trailing `fraction` of samples for validation.
    ///
    /// The cut happens in storage order, before any shuffling, so the same
    /// dataset always yields the same validation samples.
    pub fn split_validation(
        self: &Arc<Self>,
        fraction: f64,
    ) -> Result<(DatasetSplit, DatasetSplit)> {
        if !(0.0..1.0).contains(&fraction) {
            return Err(Error::Config(format!(
                "validation fraction must be in [0, 1), got {fraction}"
            )));
        }

        let split_at = (self.len() as f64 * (1.0 - fraction)) as usize;
        let train = DatasetSplit {
            dataset: Arc::clone(self),
            range: 0..split_at,
        };
        let valid = DatasetSplit {
            dataset: Arc::clone(self),
            range: split_at..self.len(),
        };

        Ok((train, valid))
    }
}

/// A contiguous, read-only window over a shared [`DrivingDataset`].
#[derive(Debug, Clone)]
pub struct DatasetSplit {
    dataset: Arc<DrivingDataset>,
    range: Range<usize>,
}

impl DatasetSplit {
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }
}

impl Dataset<SteeringItem> for DatasetSplit {
    fn get(&self, index: usize) -> Option<SteeringItem> {
        if index >= self.range.len() {
            return None;
        }
        self.dataset.get(self.range.start + index)
    }

    fn len(&self) -> usize {
        self.range.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn dataset(n: usize, offset: f32) -> DrivingDataset {
        let images = Array::from_shape_fn((n, 2, 3, 3), |(i, y, x, c)| {
            offset + (i * 100 + y * 10 + x) as f32 + c as f32 * 0.1
        });
        let labels = Array1::from_shape_fn(n, |i| offset + i as f32);
        DrivingDataset::new(images, labels).unwrap()
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let images = Array4::<f32>::zeros((3, 2, 2, 3));
        let labels = Array1::<f32>::zeros(2);

        let result = DrivingDataset::new(images, labels);

        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn from_samples_rejects_mismatched_lengths() {
        let images = vec![Array3::<f32>::zeros((2, 2, 3)); 3];

        let result = DrivingDataset::from_samples([2, 2, 3], images, vec![0.0, 1.0]);

        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn from_samples_rejects_odd_shapes() {
        let images = vec![Array3::<f32>::zeros((2, 2, 3)), Array3::zeros((2, 3, 3))];

        let result = DrivingDataset::from_samples([2, 2, 3], images, vec![0.0, 1.0]);

        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn from_samples_keeps_order() {
        let images = vec![
            Array3::from_elem((2, 2, 3), 1.0),
            Array3::from_elem((2, 2, 3), 2.0),
        ];

        let ds = DrivingDataset::from_samples([2, 2, 3], images, vec![0.1, 0.2]).unwrap();

        assert_eq!(ds.len(), 2);
        assert_eq!(ds.get(1).unwrap().image, vec![2.0; 12]);
        assert_eq!(ds.get(1).unwrap().label, 0.2);
        assert!(ds.get(2).is_none());
    }

    #[test]
    fn concat_appends_in_order() {
        let a = dataset(3, 0.0);
        let b = dataset(2, 1000.0);

        let joined = a.concat(&b).unwrap();

        assert_eq!(joined.len(), a.len() + b.len());
        for i in 0..a.len() {
            assert_eq!(joined.get(i), a.get(i));
        }
        for i in 0..b.len() {
            assert_eq!(joined.get(a.len() + i), b.get(i));
        }
    }

    #[test]
    fn concat_rejects_different_image_shapes() {
        let a = dataset(2, 0.0);
        let b = DrivingDataset::new(Array4::zeros((1, 3, 3, 3)), Array1::zeros(1)).unwrap();

        assert!(matches!(a.concat(&b), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn augment_is_additive() {
        let a = dataset(4, 0.0);

        let augmented = a
            .augment(|images| images.mapv(|p| p * 2.0), |labels| labels.mapv(|l| l + 0.5))
            .unwrap();

        assert_eq!(augmented.len(), 2 * a.len());
        for i in 0..a.len() {
            assert_eq!(augmented.get(i), a.get(i));
            let extra = augmented.get(a.len() + i).unwrap();
            let original = a.get(i).unwrap();
            assert_eq!(extra.label, original.label + 0.5);
            let doubled: Vec<f32> = original.image.iter().map(|p| p * 2.0).collect();
            assert_eq!(extra.image, doubled);
        }
    }

    #[test]
    fn augment_rejects_label_transform_changing_length() {
        let a = dataset(2, 0.0);

        let result = a.augment(|images| images.to_owned(), |_| Array1::zeros(5));

        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn validation_split_takes_the_tail() {
        let ds = Arc::new(dataset(20, 0.0));

        let (train, valid) = ds.split_validation(0.1).unwrap();

        assert_eq!(train.len(), 18);
        assert_eq!(valid.len(), 2);
        assert_eq!(valid.get(0).unwrap().label, 18.0);
        assert_eq!(valid.get(1).unwrap().label, 19.0);
        assert!(valid.get(2).is_none());
    }

    #[test]
    fn validation_fraction_must_be_below_one() {
        let ds = Arc::new(dataset(4, 0.0));

        assert!(matches!(ds.split_validation(1.0), Err(Error::Config(_))));
    }
}
