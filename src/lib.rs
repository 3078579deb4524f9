//! dirtail - tail every file under a set of directories, line by line.

pub mod config;
pub mod metrics;
pub mod tail;
