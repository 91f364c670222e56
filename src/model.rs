use burn::{
    module::Param,
    nn::{
        loss::Reduction, BatchNorm, BatchNormConfig, Initializer, Linear, LinearConfig, Relu,
    },
    prelude::*,
    tensor::{activation::softmax, module::conv2d, ops::ConvOptions},
    train::ClassificationOutput,
};

use crate::binarize::{binarize, binarize_ste, binary_tanh};
use crate::loss::SquaredHingeLossConfig;

/// Configuration to create a [binary 2D convolution](BinaryConv2d).
#[derive(Config, Debug)]
pub struct BinaryConv2dConfig {
    /// The number of channels, `[channels_in, channels_out]`.
    pub channels: [usize; 2],
    /// The size of the kernel. Both sides must be odd, the output keeps the input size.
    pub kernel_size: [usize; 2],
    /// The scale factor of the binarized weights.
    #[config(default = 1.0)]
    pub h: f64,
}

/// 2D convolution whose kernel is binarized to `{-h, +h}` on every forward pass.
///
/// The latent full-precision kernel is what the optimizer updates. Gradients reach it through
/// a straight-through estimator, see [binarize_ste]. Stride 1, same padding, no bias.
#[derive(Module, Debug)]
pub struct BinaryConv2d<B: Backend> {
    /// Latent kernel of shape `[channels_out, channels_in, kernel_height, kernel_width]`.
    pub weight: Param<Tensor<B, 4>>,
    h: f64,
    padding: [usize; 2],
}

impl BinaryConv2dConfig {
    /// Initialize a new [binary conv2d](BinaryConv2d) module.
    pub fn init<B: Backend>(&self, device: &B::Device) -> BinaryConv2d<B> {
        assert!(
            self.h.is_finite() && self.h > 0.0,
            "Scale factor H must be a positive number."
        );
        assert!(
            self.kernel_size.iter().all(|size| size % 2 == 1),
            "Same padding requires odd kernel sizes, got {:?}",
            self.kernel_size
        );

        let [channels_in, channels_out] = self.channels;
        let [kernel_height, kernel_width] = self.kernel_size;
        let weight = Initializer::Uniform {
            min: -self.h,
            max: self.h,
        }
        .init([channels_out, channels_in, kernel_height, kernel_width], device);

        BinaryConv2d {
            weight,
            h: self.h,
            padding: [kernel_height / 2, kernel_width / 2],
        }
    }
}

impl<B: Backend> BinaryConv2d<B> {
    /// Applies the forward pass on the input tensor.
    ///
    /// # Shapes
    ///
    /// - input: `[batch_size, channels_in, height, width]`
    /// - output: `[batch_size, channels_out, height, width]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let weight = binarize_ste(self.weight.val(), self.h);

        conv2d(
            input,
            weight,
            None,
            ConvOptions::new([1, 1], self.padding, [1, 1], 1),
        )
    }

    /// The kernel as used by the forward pass, without gradient tracking.
    pub fn binarized_weight(&self) -> Tensor<B, 4> {
        binarize(self.weight.val(), self.h).detach()
    }

    /// The scale factor of the binarized kernel.
    pub fn h(&self) -> f64 {
        self.h
    }

    /// Clamps the latent kernel to `[-h, h]`, keeping its parameter id.
    ///
    /// Applied after every optimizer step so that a weight pushed past the bounds keeps
    /// receiving gradients and can still change sign.
    pub fn clip_weight(mut self) -> Self {
        let weight = self
            .weight
            .val()
            .clamp(-self.h, self.h)
            .detach()
            .require_grad();
        self.weight = Param::initialized(self.weight.id.clone(), weight);
        self
    }
}

/// Hyperparameters of the binarized network.
#[derive(Config, Debug)]
pub struct ModelConfig {
    #[config(default = 10)]
    pub num_classes: usize,
    #[config(default = 1)]
    pub channels: usize,
    #[config(default = 28)]
    pub image_size: usize,
    #[config(default = 128)]
    pub filters: usize,
    #[config(default = 3)]
    pub kernel_size: usize,
    #[config(default = 128)]
    pub hidden_units: usize,
    /// Scale factor of the binarized convolution kernel.
    #[config(default = 1.0)]
    pub h: f64,
    #[config(default = 1e-6)]
    pub bn_epsilon: f64,
    /// Weight of the current batch in the running statistics.
    #[config(default = 0.1)]
    pub bn_momentum: f64,
}

/// Binary convolution, batch norm and binary activation, followed by a dense classifier.
#[derive(Module, Debug)]
pub struct Model<B: Backend> {
    conv1: BinaryConv2d<B>,
    bn1: BatchNorm<B, 2>,
    dense1: Linear<B>,
    activation: Relu,
    bn5: BatchNorm<B, 0>,
    dense2: Linear<B>,
}

impl ModelConfig {
    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Model<B> {
        let flattened = self.filters * self.image_size * self.image_size;

        Model {
            conv1: BinaryConv2dConfig::new(
                [self.channels, self.filters],
                [self.kernel_size, self.kernel_size],
            )
            .with_h(self.h)
            .init(device),
            bn1: BatchNormConfig::new(self.filters)
                .with_epsilon(self.bn_epsilon)
                .with_momentum(self.bn_momentum)
                .init(device),
            dense1: LinearConfig::new(flattened, self.hidden_units).init(device),
            activation: Relu::new(),
            bn5: BatchNormConfig::new(self.hidden_units)
                .with_epsilon(self.bn_epsilon)
                .with_momentum(self.bn_momentum)
                .init(device),
            dense2: LinearConfig::new(self.hidden_units, self.num_classes).init(device),
        }
    }
}

impl<B: Backend> Model<B> {
    /// Class probabilities for a batch of images.
    ///
    /// # Shapes
    ///   - Images `[batch_size, channels, height, width]`
    ///   - Output `[batch_size, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(images);
        let x = self.bn1.forward(x);
        let x = binary_tanh(x);

        let [batch_size, channels, height, width] = x.dims();
        let x = x.reshape([batch_size, channels * height * width]);

        let x = self.dense1.forward(x);
        let x = self.activation.forward(x);
        let x = self.bn5.forward(x);
        let x = self.dense2.forward(x);

        softmax(x, 1)
    }

    /// Forward pass with the squared hinge loss against signed one-hot targets.
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
        targets_signed: Tensor<B, 2>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = SquaredHingeLossConfig::new()
            .init()
            .forward(output.clone(), targets_signed, Reduction::Mean);

        ClassificationOutput::new(loss, output, targets)
    }

    /// The first layer, whose kernel is exported after training.
    pub fn conv1(&self) -> &BinaryConv2d<B> {
        &self.conv1
    }

    /// Clamps the latent kernel of every binary layer to its scale.
    pub fn clip_kernel(mut self) -> Self {
        self.conv1 = self.conv1.clip_weight();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn binary_conv_initializer_within_scale() {
        TestBackend::seed(0);
        let device = Default::default();

        let conv = BinaryConv2dConfig::new([1, 8], [3, 3])
            .with_h(0.5)
            .init::<TestBackend>(&device);

        assert_eq!(conv.weight.dims(), [8, 1, 3, 3]);
        let values = conv.weight.val().into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|value| (-0.5..=0.5).contains(value)));
    }

    #[test]
    fn binary_conv_uses_binarized_kernel() {
        let device = Default::default();
        let mut conv = BinaryConv2dConfig::new([1, 1], [3, 3]).init::<TestBackend>(&device);
        let kernel = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(
                vec![0.2f32, -0.3, 0.1, 0.0, -0.5, 0.4, 0.9, -0.1, 0.3],
                [1, 1, 3, 3],
            ),
            &device,
        );
        conv.weight = Param::from_tensor(kernel);

        let output = conv.forward(Tensor::ones([1, 1, 3, 3], &device));

        assert_eq!(output.dims(), [1, 1, 3, 3]);
        let values = output.into_data().to_vec::<f32>().unwrap();
        // Center sees the whole kernel: six positive and three negative signs.
        assert_eq!(values[4], 3.0);
        // Top-left corner only overlaps the bottom-right 2x2 of the kernel.
        assert_eq!(values[0], 0.0);
    }

    #[test]
    fn binarized_weight_has_two_levels() {
        let device = Default::default();
        let conv = BinaryConv2dConfig::new([1, 4], [3, 3])
            .with_h(2.0)
            .init::<TestBackend>(&device);

        let values = conv
            .binarized_weight()
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        assert_eq!(values.len(), 36);
        assert!(values.iter().all(|value| *value == 2.0 || *value == -2.0));
    }

    #[test]
    fn clipped_weight_receives_gradient_again() {
        type TestAutodiffBackend = burn::backend::Autodiff<NdArray>;

        let device = Default::default();
        let mut conv =
            BinaryConv2dConfig::new([1, 1], [1, 1]).init::<TestAutodiffBackend>(&device);
        conv.weight = Param::from_tensor(
            Tensor::<TestAutodiffBackend, 4>::from_data(
                TensorData::new(vec![1.05f32], [1, 1, 1, 1]),
                &device,
            )
            .require_grad(),
        );
        let input = || Tensor::<TestAutodiffBackend, 4>::ones([1, 1, 2, 2], &device);

        let grads = conv.forward(input()).sum().backward();
        let grad = conv.weight.grad(&grads).unwrap();
        assert_eq!(grad.into_data().to_vec::<f32>().unwrap(), vec![0.0]);

        let id = conv.weight.id.clone();
        let conv = conv.clip_weight();
        assert_eq!(conv.weight.id, id);
        assert_eq!(
            conv.weight.val().into_data().to_vec::<f32>().unwrap(),
            vec![1.0]
        );

        let grads = conv.forward(input()).sum().backward();
        let grad = conv.weight.grad(&grads).unwrap();
        // Every one of the four output pixels sees the single kernel weight.
        assert_eq!(grad.into_data().to_vec::<f32>().unwrap(), vec![4.0]);
    }

    #[test]
    #[should_panic = "Same padding requires odd kernel sizes"]
    fn binary_conv_rejects_even_kernel() {
        BinaryConv2dConfig::new([1, 1], [2, 2]).init::<TestBackend>(&Default::default());
    }

    #[test]
    fn model_outputs_class_probabilities() {
        let device = Default::default();
        let model = ModelConfig::new()
            .with_filters(4)
            .with_hidden_units(8)
            .init::<TestBackend>(&device);

        let output = model.forward(Tensor::random(
            [2, 1, 28, 28],
            burn::tensor::Distribution::Uniform(0.0, 1.0),
            &device,
        ));

        assert_eq!(output.dims(), [2, 10]);
        let sums = output.sum_dim(1).into_data().to_vec::<f32>().unwrap();
        assert!(sums.iter().all(|sum| (sum - 1.0).abs() < 1e-4));
    }
}
