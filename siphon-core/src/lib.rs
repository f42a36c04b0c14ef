pub mod config;
pub mod error;
pub mod mask;
pub mod record;

pub use config::SiphonConfig;
pub use error::SiphonError;
pub use mask::{HeaderMaskPolicy, MaskTable};
pub use record::{Headers, LogRecord, RequestRecord, ResponseRecord};
