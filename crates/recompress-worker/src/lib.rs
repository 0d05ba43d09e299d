//! recompress-worker: runs the recompression loop on tokio.
//!
//! `recompress-pipeline` decides *what* happens; this crate makes it
//! happen. Timers are `tokio::time::sleep`, the isolated executor is
//! the blocking thread pool, and the loop's state is observable through
//! a `watch` channel and a `broadcast` stream of events.
//!
//! ```no_run
//! # async fn demo(image: recompress_pipeline::RgbaImage) -> Result<(), recompress_worker::WorkerError> {
//! use std::sync::Arc;
//! use recompress_pipeline::{ImageCodec, RecompressConfig};
//!
//! let config = RecompressConfig { iteration_limit: Some(50), ..RecompressConfig::default() };
//! let (driver, _task) = recompress_worker::spawn(&config, Arc::new(ImageCodec), None)?;
//! driver.select_image(image).await?;
//! driver.set_iterating(true).await?;
//! let done = driver.wait_for(|s| s.stats.count == 50).await?;
//! # let _ = done;
//! # Ok(())
//! # }
//! ```

pub mod driver;
pub mod encode;

pub use driver::{DriverEvent, DriverHandle, Snapshot, WorkerError, spawn};
pub use encode::EncodeWorker;
