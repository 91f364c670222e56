use core::marker::PhantomData;

use burn::config::Config;
use burn::module::Module;
use burn::nn::loss::Reduction;
use burn::tensor::{backend::Backend, Tensor};

/// Configuration to create a [squared hinge loss](SquaredHingeLoss).
#[derive(Config, Debug)]
pub struct SquaredHingeLossConfig {
    /// The margin targets must be exceeded by. Default: 1.0
    #[config(default = 1.0)]
    pub margin: f32,
}

impl SquaredHingeLossConfig {
    /// Initialize [squared hinge loss](SquaredHingeLoss).
    pub fn init<B: Backend>(&self) -> SquaredHingeLoss<B> {
        assert!(
            self.margin > 0.,
            "Margin for squared hinge loss must be a positive number."
        );

        SquaredHingeLoss {
            margin: self.margin,
            _backend: PhantomData,
        }
    }
}

/// Squared hinge loss for targets encoded as `-1/+1`.
///
/// ```text
/// L(p, y) = max(0, margin - y * p)^2
/// ```
#[derive(Module, Debug)]
pub struct SquaredHingeLoss<B: Backend> {
    margin: f32,
    _backend: PhantomData<B>,
}

impl<B: Backend> SquaredHingeLoss<B> {
    /// Compute the loss element-wise, then reduce to a single value.
    ///
    /// `Reduction::Auto` behaves as `Reduction::Mean`.
    ///
    /// # Shapes
    ///
    /// - predictions: `[...dims]`
    /// - targets: `[...dims]`
    /// - output: `[1]`
    pub fn forward<const D: usize>(
        &self,
        predictions: Tensor<B, D>,
        targets: Tensor<B, D>,
        reduction: Reduction,
    ) -> Tensor<B, 1> {
        let loss = self.forward_no_reduction(predictions, targets);
        match reduction {
            Reduction::Mean | Reduction::Auto => loss.mean(),
            Reduction::Sum => loss.sum(),
        }
    }

    /// Compute the loss element-wise.
    pub fn forward_no_reduction<const D: usize>(
        &self,
        predictions: Tensor<B, D>,
        targets: Tensor<B, D>,
    ) -> Tensor<B, D> {
        let slack = (targets * predictions).neg().add_scalar(self.margin);

        slack.clamp_min(0.0).powf_scalar(2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = NdArray;

    fn assert_close(actual: Vec<f32>, expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-5, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn squared_hinge_loss_values() {
        let device = Default::default();
        let predictions =
            Tensor::<TestBackend, 2>::from_data([[0.5, -2.0], [1.5, 0.0]], &device);
        let targets = Tensor::<TestBackend, 2>::from_data([[1.0, -1.0], [-1.0, 1.0]], &device);
        let loss = SquaredHingeLossConfig::new().init();

        let no_reduction = loss.forward_no_reduction(predictions.clone(), targets.clone());
        let mean = loss.forward(predictions.clone(), targets.clone(), Reduction::Auto);
        let sum = loss.forward(predictions, targets, Reduction::Sum);

        assert_close(
            no_reduction.into_data().to_vec::<f32>().unwrap(),
            &[0.25, 0.0, 6.25, 1.0],
        );
        assert_close(mean.into_data().to_vec::<f32>().unwrap(), &[1.875]);
        assert_close(sum.into_data().to_vec::<f32>().unwrap(), &[7.5]);
    }

    #[test]
    fn squared_hinge_loss_gradient() {
        type TestAutodiffBackend = Autodiff<NdArray>;

        let device = Default::default();
        let predictions =
            Tensor::<TestAutodiffBackend, 1>::from_data([0.5, 2.0, -0.5], &device).require_grad();
        let targets = Tensor::<TestAutodiffBackend, 1>::from_data([1.0, 1.0, 1.0], &device);
        let loss = SquaredHingeLossConfig::new().init();

        let grads = loss
            .forward(predictions.clone(), targets, Reduction::Sum)
            .backward();
        let grad = predictions.grad(&grads).unwrap();

        // d/dp (1 - p)^2 = -2 (1 - p) inside the margin, zero beyond it.
        assert_close(grad.into_data().to_vec::<f32>().unwrap(), &[-1.0, 0.0, -3.0]);
    }

    #[test]
    #[should_panic = "Margin for squared hinge loss must be a positive number."]
    fn config_rejects_zero_margin() {
        SquaredHingeLossConfig::new().with_margin(0.0).init::<TestBackend>();
    }
}
