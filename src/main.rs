#![recursion_limit = "256"]

use std::process::ExitCode;

use burn::backend::{
    Autodiff,
    wgpu::{Wgpu, WgpuDevice},
};
use clap::Parser;
use steering_trainer::cli::{self, Cli};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let device = WgpuDevice::default();

    match cli::run::<Autodiff<Wgpu>>(&cli, &device) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
