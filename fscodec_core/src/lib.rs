pub mod block;
pub mod error;
pub mod request;
pub mod service;
pub mod transform;

pub use block::{blocks_for_len, BlockBuffer, FileContext, LogicalRange, PAGE_SIZE};
pub use error::{ServiceError, TransformError};
pub use request::{ReadRequest, ReassemblyConsumer};
pub use service::{BufferCache, ConfidentialityService, MemCache};
pub use transform::{
    CompressionAlgorithm, EncodedExtent, ExtentTransform, TransformConfig, TransformKind,
};
