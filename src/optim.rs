use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    tensor::backend::AutodiffBackend,
    LearningRate,
};

use crate::model::Model;

/// Modules holding binarized kernels that must stay within their scale.
pub trait ClipKernel {
    /// Clamps the latent kernels to `[-h, h]`.
    fn clip_kernel(self) -> Self;
}

impl<B: AutodiffBackend> ClipKernel for Model<B> {
    fn clip_kernel(self) -> Self {
        Model::clip_kernel(self)
    }
}

/// Optimizer wrapper clamping the binarized kernels after every step of the inner optimizer.
#[derive(Clone)]
pub struct KernelClipping<O> {
    inner: O,
}

impl<O> KernelClipping<O> {
    pub fn new(inner: O) -> Self {
        Self { inner }
    }
}

impl<M, B, O> Optimizer<M, B> for KernelClipping<O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + ClipKernel,
    O: Optimizer<M, B>,
{
    type Record = O::Record;

    fn step(&mut self, lr: LearningRate, module: M, grads: GradientsParams) -> M {
        self.inner.step(lr, module, grads).clip_kernel()
    }

    fn to_record(&self) -> Self::Record {
        self.inner.to_record()
    }

    fn load_record(mut self, record: Self::Record) -> Self {
        self.inner = self.inner.load_record(record);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MnistBatch, MnistBatcher};
    use crate::model::{Model, ModelConfig};
    use burn::backend::{Autodiff, NdArray};
    use burn::data::{dataloader::batcher::Batcher, dataset::vision::MnistItem};
    use burn::optim::AdamConfig;
    use burn::train::TrainStep;

    type TestAutodiffBackend = Autodiff<NdArray>;

    #[test]
    fn step_keeps_kernel_within_scale() {
        let device = Default::default();
        let model = ModelConfig::new()
            .with_filters(2)
            .with_hidden_units(4)
            .with_h(0.5)
            .init::<TestAutodiffBackend>(&device);
        let mut image = [[0.0f32; 28]; 28];
        image[14][14] = 255.0;
        image[3][20] = 120.0;
        let batch: MnistBatch<TestAutodiffBackend> = MnistBatcher::default().batch(
            vec![
                MnistItem { image, label: 4 },
                MnistItem {
                    image: [[30.0; 28]; 28],
                    label: 9,
                },
            ],
            &device,
        );
        let mut optim = KernelClipping::new(
            AdamConfig::new().init::<TestAutodiffBackend, Model<TestAutodiffBackend>>(),
        );

        let output = TrainStep::step(&model, batch);
        let grads: GradientsParams = output.grads;
        // Adam moves every weight with a gradient by about the learning rate.
        let model = optim.step(10.0, model, grads);

        let kernel = model.conv1().weight.val().into_data().to_vec::<f32>().unwrap();
        assert!(kernel.iter().all(|value| (-0.5..=0.5).contains(value)));
        assert!(kernel.iter().any(|value| value.abs() == 0.5));
    }
}
