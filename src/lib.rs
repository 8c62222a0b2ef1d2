// imgsrv - image optimizing proxy library

pub mod config;
pub mod constants;
pub mod error;
pub mod image_optimizer;
pub mod logging;
pub mod origin;
pub mod pipeline;
pub mod proxy;
pub mod server;
pub mod temp_tracker;
