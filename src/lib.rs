//! Steering-angle regression from simulator camera frames.
//!
//! Driving logs are read by [`driving_log::DatasetLoader`] into a
//! [`dataset::DrivingDataset`], mirrored by [`augment::augment_dataset`] and
//! fitted with [`training::train`].

pub mod augment;
pub mod cli;
pub mod data;
pub mod dataset;
pub mod driving_log;
pub mod error;
pub mod model;
pub mod preprocess;
pub mod training;

pub use error::{Error, Result};
