//! # Resilience Module
//!
//! Protects the remote data store from overload. The [`AdmissionController`]
//! caps concurrently executing queries at the connection budget and queues the
//! rest by priority.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pos_query_core::resilience::AdmissionController;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let controller = AdmissionController::new("database_operations", 10);
//!
//! let rows = controller
//!     .execute(|| async { Ok::<_, String>(vec!["row"]) }, 5)
//!     .await?;
//!
//! let status = controller.status();
//! println!("{} running, {} waiting", status.active, status.queued);
//! # Ok(())
//! # }
//! ```

pub mod admission;

pub use admission::{AdmissionController, AdmissionError, AdmissionPermit, AdmissionStatus};
