pub mod arrow_utils;
pub mod logging;

pub use logging::{FileAction, log_file_done, log_file_start};
