pub mod batch;
pub mod batcher;
pub mod delivery;
pub mod dispatch;
pub mod hasher;
pub mod header_mask;
pub mod metrics;
pub mod prometheus_exporter;
pub mod sanitizer;
pub mod spill;

pub use batch::Batch;
pub use batcher::{BatchConfig, Shipper, ShipperError};
pub use delivery::{Delivery, DeliveryOutcome};
pub use dispatch::{DispatchError, Dispatcher};
pub use hasher::Digest;
pub use header_mask::{mask_headers, mask_headers_with};
pub use metrics::ShipperMetrics;
pub use sanitizer::Sanitizer;
