//! # sheetwatch
//!
//! Serve the rows of a spreadsheet as JSON records, and push a fresh copy to
//! subscribers whenever the file changes on disk.
//!
//! ## Overview
//!
//! `sheetwatch` watches a single `.xlsx` workbook and:
//! - Converts the first worksheet into header-keyed records with typed cells
//! - Retries reads while another program holds the file locked
//! - Broadcasts every completed read on the `data-updates` topic
//! - Answers on-demand pulls through the same read pipeline
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sheetwatch::prelude::*;
//!
//! # async fn example() -> sheetwatch::error::Result<()> {
//! let registry = SubscriberRegistry::new();
//! let _updates = registry
//!     .subscribe(DATA_UPDATES, |message| {
//!         if let Some(records) = message.payload.records() {
//!             println!("sheet now has {} rows", records.len());
//!         }
//!     })
//!     .await;
//!
//! let service = DataService::builder()
//!     .with_path("data/records.xlsx")
//!     .with_broadcaster(registry.clone())
//!     .build()?;
//!
//! // Broadcast on every save
//! service.start()?;
//!
//! // Or read on demand
//! let records = service.pull().await?;
//! println!("{}", records.to_json()?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Typed cells**: text, numbers, booleans and date-formatted numbers
//! - **Lock tolerance**: fixed-delay retries on a blocking thread
//! - **Snapshots**: the latest read is held in `arc-swap` for lock-free access
//! - **Pluggable transport**: implement [`Broadcaster`](broadcast::Broadcaster)
//!
//! ## Feature Flags
//!
//! - `file-watch` (default): directory watching through `notify`, plus
//!   [`DataService::start`](core::DataService::start) and
//!   [`DataService::stop`](core::DataService::stop)
//!
//! ```toml
//! [dependencies]
//! sheetwatch = { version = "0.1", default-features = false }
//! ```

#![warn(missing_docs, rust_2024_compatibility)]
#![deny(unsafe_code)]

pub mod broadcast;
pub mod core;
pub mod error;
pub mod sources;

#[cfg(feature = "file-watch")]
pub mod watch;

/// Convenient re-exports for common usage patterns.
pub mod prelude {
    pub use crate::broadcast::{
        Broadcaster, DATA_UPDATES, MESSAGES, Message, Payload, SubscriberRegistry,
    };
    pub use crate::core::{
        CellValue, DataService, DataServiceBuilder, HeaderPolicy, PullFailurePolicy, Record,
        RecordSet, ServiceConfig, Validate,
    };
    pub use crate::error::{Result, SheetError, ValidationError};

    #[cfg(feature = "file-watch")]
    pub use crate::watch::WatchState;
}
