pub mod catalog;
pub mod config;
pub mod errors;
pub mod features;
pub mod logging;
pub mod pipeline;
pub mod recommend;
pub mod server;
pub mod similarity;
pub mod source;
pub mod store;
