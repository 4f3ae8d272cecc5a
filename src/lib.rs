pub mod dataset;
pub mod error;
pub mod layers;
pub mod metrics;
pub mod mnist_dataset;
pub mod model;
pub mod optim;
pub mod preprocess;
pub mod summary;
pub mod train;

pub use error::{Error, Result};
