use burn::{data::dataloader::batcher::Batcher, prelude::*};

use crate::dataset::SteeringItem;

/// Packs [`SteeringItem`]s into channels-first tensors.
#[derive(Clone, Debug)]
pub struct SteeringBatcher {
    image_shape: [usize; 3],
}

impl SteeringBatcher {
    pub fn new(image_shape: [usize; 3]) -> Self {
        Self { image_shape }
    }
}

#[derive(Clone, Debug)]
pub struct SteeringBatch<B: Backend> {
    /// `[batch, channels, height, width]`
    pub images: Tensor<B, 4>,
    /// `[batch, 1]`
    pub targets: Tensor<B, 2>,
}

impl<B: Backend> Batcher<B, SteeringItem, SteeringBatch<B>> for SteeringBatcher {
    fn batch(&self, items: Vec<SteeringItem>, device: &B::Device) -> SteeringBatch<B> {
        let [height, width, channels] = self.image_shape;
        let batch_size = items.len();

        let mut pixels = Vec::with_capacity(batch_size * height * width * channels);
        let mut labels = Vec::with_capacity(batch_size);
        for item in items {
            debug_assert_eq!(item.image.len(), height * width * channels);
            pixels.extend(item.image);
            labels.push(item.label);
        }

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(pixels, [batch_size, height, width, channels]),
            device,
        )
        .permute([0, 3, 1, 2]);
        let targets =
            Tensor::<B, 2>::from_data(TensorData::new(labels, [batch_size, 1]), device);

        SteeringBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn batch_is_channels_first() {
        let device = Default::default();
        let batcher = SteeringBatcher::new([2, 3, 3]);
        // pixel value encodes (y, x, c)
        let item = |label: f32| SteeringItem {
            image: (0..2)
                .flat_map(|y| {
                    (0..3).flat_map(move |x| (0..3).map(move |c| (y * 100 + x * 10 + c) as f32))
                })
                .collect(),
            label,
        };

        let batch: SteeringBatch<NdArray> =
            batcher.batch(vec![item(0.5), item(-0.25)], &device);

        assert_eq!(batch.images.dims(), [2, 3, 2, 3]);
        assert_eq!(batch.targets.dims(), [2, 1]);
        let pixel = batch
            .images
            .slice([1..2, 2..3, 1..2, 0..1])
            .into_scalar();
        assert_eq!(pixel, 102.0);
        let targets = batch.targets.into_data().to_vec::<f32>().unwrap();
        assert_eq!(targets, vec![0.5, -0.25]);
    }
}
