use std::time::Instant;

use crate::{
    binarize::check_scale,
    data::{MnistBatch, MnistBatcher},
    error::Error,
    export::{export_binarized, ExportConfig},
    model::{Model, ModelConfig},
    optim::KernelClipping,
};
use burn::{
    data::{
        dataloader::DataLoaderBuilder,
        dataset::{vision::MnistDataset, Dataset},
    },
    lr_scheduler::step::{StepLrScheduler, StepLrSchedulerConfig},
    module::AutodiffModule,
    optim::AdamConfig,
    prelude::*,
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
    train::{
        metric::{AccuracyMetric, LearningRateMetric, LossMetric},
        ClassificationOutput, LearnerBuilder, TrainOutput, TrainStep, ValidStep,
    },
};

impl<B: AutodiffBackend> TrainStep<MnistBatch<B>, ClassificationOutput<B>> for Model<B> {
    fn step(&self, batch: MnistBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets, batch.targets_signed);

        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<MnistBatch<B>, ClassificationOutput<B>> for Model<B> {
    fn step(&self, batch: MnistBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets, batch.targets_signed)
    }
}

#[derive(Config)]
pub struct TrainingConfig {
    pub model: ModelConfig,
    pub optimizer: AdamConfig,
    pub export: ExportConfig,
    #[config(default = 20)]
    pub num_epochs: usize,
    #[config(default = 50)]
    pub batch_size: usize,
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 1337)]
    pub seed: u64,
    /// Learning rate of the first epoch.
    #[config(default = 1e-3)]
    pub lr_start: f64,
    /// Learning rate the schedule would reach after `num_epochs` epochs.
    #[config(default = 1e-4)]
    pub lr_end: f64,
}

impl TrainingConfig {
    /// Factor applied to the learning rate at the end of every epoch.
    pub fn lr_decay(&self) -> f64 {
        (self.lr_end / self.lr_start).powf(1.0 / self.num_epochs as f64)
    }

    /// Learning rate used during `epoch` (zero based).
    pub fn learning_rate(&self, epoch: usize) -> f64 {
        self.lr_start * self.lr_decay().powi(epoch as i32)
    }

    /// Number of batches in one pass over `samples` items.
    pub fn iterations_per_epoch(&self, samples: usize) -> crate::Result<usize> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch size must be at least 1".into()));
        }

        Ok(samples.div_ceil(self.batch_size))
    }

    /// Per-iteration scheduler that keeps the rate constant within an epoch.
    pub fn lr_scheduler(&self, iterations_per_epoch: usize) -> crate::Result<StepLrScheduler> {
        if self.num_epochs == 0 {
            return Err(Error::Schedule("at least one epoch is required".into()));
        }
        if !(self.lr_start > 0.0 && self.lr_end > 0.0 && self.lr_end <= self.lr_start) {
            return Err(Error::Schedule(format!(
                "expected 0 < lr_end <= lr_start, got lr_start={} lr_end={}",
                self.lr_start, self.lr_end
            )));
        }

        StepLrSchedulerConfig::new(self.lr_start, iterations_per_epoch.max(1))
            .with_gamma(self.lr_decay())
            .init()
            .map_err(Error::Schedule)
    }
}

/// Loss and accuracy over a dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Mean squared hinge loss per sample.
    pub loss: f64,
    /// Fraction of correctly classified samples.
    pub accuracy: f64,
    pub samples: usize,
}

fn create_artifact_dir(artifact_dir: &str) -> crate::Result<()> {
    std::fs::create_dir_all(artifact_dir).map_err(|err| Error::io(artifact_dir, err))
}

pub fn train<B: AutodiffBackend>(
    artifact_dir: &str,
    config: TrainingConfig,
    device: B::Device,
) -> crate::Result<Model<B>> {
    check_scale(config.model.h)?;
    create_artifact_dir(artifact_dir)?;
    let config_path = format!("{artifact_dir}/config.json");
    config
        .save(&config_path)
        .map_err(|err| Error::io(&config_path, err))?;

    B::seed(config.seed);

    let dataset_train = MnistDataset::train();
    let dataset_test = MnistDataset::test();
    println!("{} train samples", dataset_train.len());
    println!("{} test samples", dataset_test.len());

    let iterations_per_epoch = config.iterations_per_epoch(dataset_train.len())?;
    let lr_scheduler = config.lr_scheduler(iterations_per_epoch)?;
    log::info!(
        "Learning rate decays by {:.6} per epoch, from {} to {}",
        config.lr_decay(),
        config.learning_rate(0),
        config.learning_rate(config.num_epochs.saturating_sub(1))
    );

    let dataloader_train = DataLoaderBuilder::new(MnistBatcher::default())
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(dataset_train);

    // The test set doubles as the validation set.
    let dataloader_test = DataLoaderBuilder::new(MnistBatcher::default())
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(dataset_test);

    let model = config.model.init::<B>(&device);
    println!("{model}");
    println!("Total params: {}", model.num_params());

    let learner = LearnerBuilder::new(artifact_dir)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .metric_train_numeric(LearningRateMetric::new())
        .with_file_checkpointer(CompactRecorder::new())
        .devices(vec![device.clone()])
        .num_epochs(config.num_epochs)
        .summary()
        .build(
            model,
            KernelClipping::new(config.optimizer.init::<B, Model<B>>()),
            lr_scheduler,
        );

    let now = Instant::now();
    let model_trained = learner.fit(dataloader_train, dataloader_test);
    let elapsed = now.elapsed().as_secs();
    log::info!("Training completed in {}m{}s", elapsed / 60, elapsed % 60);

    model_trained
        .clone()
        .save_file(format!("{artifact_dir}/model"), &CompactRecorder::new())
        .map_err(|err| Error::Record(format!("{err:?}")))?;

    let evaluation = evaluate(
        &model_trained.valid(),
        config.batch_size,
        config.num_workers,
        &device,
    );
    println!("Test score: {}", evaluation.loss);
    println!("Test accuracy: {}", evaluation.accuracy);

    export_conv1(&model_trained, &config.export)?;

    Ok(model_trained)
}

/// Mean loss and accuracy of `model` over the MNIST test set.
pub fn evaluate<B: Backend>(
    model: &Model<B>,
    batch_size: usize,
    num_workers: usize,
    device: &B::Device,
) -> Evaluation {
    let dataloader = DataLoaderBuilder::new(MnistBatcher::default())
        .batch_size(batch_size)
        .num_workers(num_workers)
        .build(MnistDataset::test());

    let mut evaluation = Accumulator::default();
    for batch in dataloader.iter() {
        let batch: MnistBatch<B> = batch;
        evaluation.update(model.forward_classification(
            batch.images.to_device(device),
            batch.targets.to_device(device),
            batch.targets_signed.to_device(device),
        ));
    }

    evaluation.finish()
}

#[derive(Default)]
struct Accumulator {
    loss_sum: f64,
    correct: usize,
    samples: usize,
}

impl Accumulator {
    fn update<B: Backend>(&mut self, item: ClassificationOutput<B>) {
        let [batch_size] = item.targets.dims();
        let loss = item.loss.into_scalar().elem::<f64>();
        let predictions = item.output.argmax(1).squeeze::<1>(1);
        let correct = predictions
            .equal(item.targets)
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>();

        self.loss_sum += loss * batch_size as f64;
        self.correct += correct as usize;
        self.samples += batch_size;
    }

    fn finish(self) -> Evaluation {
        if self.samples == 0 {
            return Evaluation {
                loss: 0.0,
                accuracy: 0.0,
                samples: 0,
            };
        }

        Evaluation {
            loss: self.loss_sum / self.samples as f64,
            accuracy: self.correct as f64 / self.samples as f64,
            samples: self.samples,
        }
    }
}

/// Reorders a kernel from `[channels_out, channels_in, kernel_height, kernel_width]` to
/// `[kernel_height, kernel_width, channels_in, channels_out]`.
pub fn channels_last<B: Backend>(kernel: Tensor<B, 4>) -> Tensor<B, 4> {
    kernel.permute([2, 3, 1, 0])
}

/// Prints the `conv1` kernel before and after binarization, then exports the binarized one.
///
/// The kernel is written channels last, one line per kernel row.
pub fn export_conv1<B: Backend>(model: &Model<B>, export: &ExportConfig) -> crate::Result<usize> {
    let conv1 = model.conv1();

    println!("{:=^88}", "NON_BINARIZE");
    println!("{}", channels_last(conv1.weight.val()));
    println!("{:=^88}", "BINARIZE");
    println!("{}", channels_last(conv1.binarized_weight()));

    export_binarized(
        channels_last(conv1.weight.val()),
        conv1.h(),
        &export.path,
        export.mode,
    )
}

/// Reloads a trained model from `artifact_dir` and exports its binarized `conv1` kernel.
///
/// `export` receives the export settings saved with the training configuration and returns
/// the ones to use.
pub fn export_from_artifacts<B: Backend>(
    artifact_dir: &str,
    export: impl FnOnce(ExportConfig) -> ExportConfig,
    device: &B::Device,
) -> crate::Result<usize> {
    let config = TrainingConfig::load(format!("{artifact_dir}/config.json"))
        .map_err(|err| Error::Config(format!("{err:?}")))?;
    let model = config
        .model
        .init::<B>(device)
        .load_file(format!("{artifact_dir}/model"), &CompactRecorder::new(), device)
        .map_err(|err| Error::Record(format!("{err:?}")))?;
    log::info!("Loaded trained model from '{artifact_dir}'");

    export_conv1(&model, &export(config.export))
}
