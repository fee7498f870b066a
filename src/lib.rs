//! # lokiload - Load generator for Loki-compatible log backends
//!
//! Pushes synthetic log streams and issues LogQL queries over a bounded,
//! configurable label space, reporting pass/fail checks per request type.
//!
//! ## Features
//!
//! - Label cardinality model with uniform or top-weighted value sampling
//! - Byte-bounded push batches in eight log line formats
//! - Instant, range, series, labels and label-values queries built from
//!   templates over the configured labels
//! - Discovery-driven read-write scenario that queries what the backend reports
//! - Virtual-user runner with durations, iteration budgets and pacing
//!
//! ## Usage
//!
//! ### As a CLI
//!
//! ```bash
//! lokiload run --config load.yaml
//! ```
//!
//! ### As a Library
//!
//! ```rust,no_run
//! use lokiload::{LabelModel, QueryBuilder, QueryKind};
//! use rand::SeedableRng;
//! use std::sync::Arc;
//!
//! let model = Arc::new(LabelModel::from_cardinalities([("app", 5), ("pod", 20)]).unwrap());
//! let builder = QueryBuilder::with_defaults(model).unwrap();
//!
//! let mut rng = rand::rngs::SmallRng::seed_from_u64(1);
//! let query = builder.random_query(QueryKind::Range, &mut rng).unwrap();
//! println!("{}", query.endpoint());
//! ```

// Core library modules
pub mod driver;
pub mod errors;
pub mod generator;
pub mod labels;
pub mod pacing;
pub mod query;
pub mod stats;
pub mod stream;
pub mod transport;
pub mod weighted;

// CLI module (for `lokiload run` and `lokiload sample`)
pub mod cli;

// Re-export commonly used types
pub use driver::{IterationOutcome, PushShape, Scenario, Workload, WorkloadDriver};
pub use errors::{DriverError, ModelError, PickError, SamplingError, SynthesisError, TransportError};
pub use generator::{create_line_generator, LineGenerator, LogFormat};
pub use labels::{LabelConfig, LabelDomain, LabelModel, LabelSampling, LabelSet};
pub use pacing::PacingProfile;
pub use query::{QueryBuilder, QueryKind, QueryRequest, Selector, TimeRange};
pub use stats::{new_shared_stats, Operation, SharedStats, Stats, StatsSnapshot};
pub use stream::{Entry, LogStream, PushRequest, StreamSynthesizer};
pub use transport::{HttpTransport, Transport, TransportConfig, TransportResponse};
pub use weighted::WeightedSelector;
