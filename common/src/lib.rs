#[macro_use]
pub mod macros;
pub mod buffer2;
pub mod config_format;
pub mod log_setup;

pub use buffer2::Buffer2;
