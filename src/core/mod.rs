//! Reading, retrying and serving sheet records.

mod builder;
mod config;
mod loader;
mod reader;
mod record;
mod service;
mod validation;

pub use builder::DataServiceBuilder;
pub use config::{PullFailurePolicy, ServiceConfig};
pub use loader::{RetryPolicy, RetryingLoader};
pub use reader::{HeaderPolicy, TabularReader};
pub use record::{CellValue, Record, RecordSet};
pub use service::DataService;
pub use validation::Validate;
