use burn::{
    data::{dataloader::batcher::Batcher, dataset::vision::MnistItem},
    prelude::*,
};

/// Number of digit classes.
pub const NUM_CLASSES: usize = 10;

#[derive(Clone, Default)]
pub struct MnistBatcher {}

#[derive(Clone, Debug)]
pub struct MnistBatch<B: Backend> {
    /// Images scaled to `[0, 1]`, shape `[batch_size, 1, 28, 28]`.
    pub images: Tensor<B, 4>,
    /// Class indices, shape `[batch_size]`.
    pub targets: Tensor<B, 1, Int>,
    /// Signed one-hot targets (`-1` or `+1`) for the hinge loss, shape `[batch_size, 10]`.
    pub targets_signed: Tensor<B, 2>,
}

impl<B: Backend> Batcher<B, MnistItem, MnistBatch<B>> for MnistBatcher {
    fn batch(&self, items: Vec<MnistItem>, device: &B::Device) -> MnistBatch<B> {
        let images = items
            .iter()
            .map(|item| TensorData::from(item.image).convert::<B::FloatElem>())
            .map(|data| Tensor::<B, 2>::from_data(data, device))
            .map(|tensor| tensor.reshape([1, 1, 28, 28]))
            .map(|tensor| tensor / 255)
            .collect();

        let targets = items
            .iter()
            .map(|item| {
                Tensor::<B, 1, Int>::from_data(
                    [(item.label as i64).elem::<B::IntElem>()],
                    device,
                )
            })
            .collect();

        let labels = items.iter().map(|item| item.label).collect::<Vec<_>>();
        let targets_signed = Tensor::<B, 2>::from_data(
            TensorData::new(
                signed_one_hot(&labels, NUM_CLASSES),
                [labels.len(), NUM_CLASSES],
            )
            .convert::<B::FloatElem>(),
            device,
        );

        let images = Tensor::cat(images, 0);
        let targets = Tensor::cat(targets, 0);

        MnistBatch {
            images,
            targets,
            targets_signed,
        }
    }
}

/// Row-major one-hot encoding of `labels` with `-1` off the label and `+1` on it.
pub fn signed_one_hot(labels: &[u8], num_classes: usize) -> Vec<f32> {
    labels
        .iter()
        .flat_map(|label| {
            (0..num_classes).map(move |class| {
                if class == *label as usize {
                    1.0
                } else {
                    -1.0
                }
            })
        })
        .collect()
}
