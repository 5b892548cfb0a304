use std::io;

use thiserror::Error;

use crate::fits::FitsError;
use crate::region_lock::LockError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Region lock error: {0}")]
    Lock(#[from] LockError),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Pixel storage I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("FITS layout error: {0}")]
    Fits(#[from] FitsError),
    #[error("Config error: {0}")]
    Config(#[from] common::config_format::ConfigError),
}

pub type StoreResult<T> = Result<T, StoreError>;
