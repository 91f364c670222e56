//! Binarized convolutional network for MNIST.
//!
//! The first layer is a [binary convolution](model::BinaryConv2d) whose kernel is quantized to
//! `{-H, +H}`. After training, the quantized kernel is appended to a text file, one output
//! channel per line (see [export]).

pub mod binarize;
pub mod cli;
pub mod data;
pub mod error;
pub mod export;
pub mod loss;
pub mod model;
pub mod optim;
pub mod training;

pub use error::{Error, Result};
