//! Release notes from commits, issues and earlier releases, published to
//! wherever the team reads them.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod github;
pub mod model;
pub mod pipeline;
pub mod publish;
pub mod render;
pub mod sources;

pub use config::{Config, Credentials};
pub use error::{Error, Result};
pub use pipeline::{GenerationRequest, GenerationResponse, Pipeline};
