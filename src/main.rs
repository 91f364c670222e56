#![recursion_limit = "256"]

use burn::{
    config::Config,
    optim::AdamConfig,
    tensor::backend::AutodiffBackend,
};
use bnn_mnist::{
    cli::{Cli, Commands},
    export::ExportConfig,
    model::ModelConfig,
    training::{self, TrainingConfig},
    Error,
};
use clap::Parser;

#[cfg(any(
    feature = "ndarray",
    feature = "ndarray-blas-netlib",
    feature = "ndarray-blas-openblas",
    feature = "ndarray-blas-accelerate",
))]
mod backend {
    use burn::backend::{
        ndarray::{NdArray, NdArrayDevice},
        Autodiff,
    };

    pub type Train = Autodiff<NdArray>;

    pub fn device() -> NdArrayDevice {
        NdArrayDevice::Cpu
    }
}

#[cfg(all(
    any(feature = "tch-gpu", feature = "tch-cpu"),
    not(any(
        feature = "ndarray",
        feature = "ndarray-blas-netlib",
        feature = "ndarray-blas-openblas",
        feature = "ndarray-blas-accelerate",
    ))
))]
mod backend {
    use burn::backend::{
        libtorch::{LibTorch, LibTorchDevice},
        Autodiff,
    };

    pub type Train = Autodiff<LibTorch>;

    #[cfg(feature = "tch-gpu")]
    pub fn device() -> LibTorchDevice {
        #[cfg(not(target_os = "macos"))]
        let device = LibTorchDevice::Cuda(0);
        #[cfg(target_os = "macos")]
        let device = LibTorchDevice::Mps;

        device
    }

    #[cfg(not(feature = "tch-gpu"))]
    pub fn device() -> LibTorchDevice {
        LibTorchDevice::Cpu
    }
}

#[cfg(all(
    feature = "wgpu",
    not(any(
        feature = "ndarray",
        feature = "ndarray-blas-netlib",
        feature = "ndarray-blas-openblas",
        feature = "ndarray-blas-accelerate",
        feature = "tch-gpu",
        feature = "tch-cpu",
    ))
))]
mod backend {
    use burn::backend::{
        wgpu::{Wgpu, WgpuDevice},
        Autodiff,
    };

    pub type Train = Autodiff<Wgpu>;

    pub fn device() -> WgpuDevice {
        WgpuDevice::default()
    }
}

fn load_config(path: Option<&str>) -> Result<TrainingConfig, Error> {
    match path {
        Some(path) => {
            TrainingConfig::load(path).map_err(|err| Error::Config(format!("{path}: {err:?}")))
        }
        None => Ok(TrainingConfig::new(
            ModelConfig::new(),
            AdamConfig::new(),
            ExportConfig::new(),
        )),
    }
}

fn run<B: AutodiffBackend>(cli: Cli, device: B::Device) -> Result<(), Error> {
    match cli.command {
        Commands::Train {
            artifact_dir,
            config,
            overrides,
        } => {
            let config = overrides.apply(load_config(config.as_deref())?);

            training::train::<B>(&artifact_dir, config, device)?;
        }
        Commands::Export {
            artifact_dir,
            export,
        } => {
            tracing_subscriber::fmt()
                .with_max_level(tracing_subscriber::filter::LevelFilter::INFO)
                .try_init()
                .ok();

            training::export_from_artifacts::<B::InnerBackend>(
                &artifact_dir,
                |saved| export.apply(saved),
                &device,
            )?;
        }
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if let Err(err) = run::<backend::Train>(cli, backend::device()) {
        log::error!("{err}");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
