mod chacha;
mod compress;
mod encrypt;

pub use chacha::{ChaChaService, MasterKey};
pub use compress::CompressTransform;
pub use encrypt::EncryptTransform;

use std::sync::Arc;

use fscodec_core::transform::DEFAULT_ZSTD_LEVEL;
use fscodec_core::{
    CompressionAlgorithm, ConfidentialityService, ExtentTransform, TransformConfig,
    TransformError, TransformKind,
};

/// Every transform kind the registry can build, in id order.
pub fn registered() -> [TransformKind; 3] {
    [
        TransformKind::Encrypt,
        TransformKind::Compress(CompressionAlgorithm::Zstd {
            level: DEFAULT_ZSTD_LEVEL,
        }),
        TransformKind::Compress(CompressionAlgorithm::Lz4),
    ]
}

/// Build the transform for `kind`.
///
/// `service` is only consulted for [`TransformKind::Encrypt`], which fails
/// with a configuration error when none is supplied.
pub fn transform_for(
    kind: TransformKind,
    config: TransformConfig,
    service: Option<Arc<dyn ConfidentialityService>>,
) -> Result<Arc<dyn ExtentTransform>, TransformError> {
    match kind {
        TransformKind::Encrypt => {
            let service = service.ok_or_else(|| {
                TransformError::Configuration(
                    "the encrypt transform needs a confidentiality service".into(),
                )
            })?;
            Ok(Arc::new(EncryptTransform::new(service, config)?))
        }
        TransformKind::Compress(algorithm) => {
            Ok(Arc::new(CompressTransform::new(algorithm, config)?))
        }
    }
}

/// Resolve a transform from the numeric id recorded with an extent.
pub fn transform_by_id(
    id: u16,
    config: TransformConfig,
    service: Option<Arc<dyn ConfidentialityService>>,
) -> Result<Arc<dyn ExtentTransform>, TransformError> {
    let kind = TransformKind::from_id(id).ok_or_else(|| {
        TransformError::InvalidArgument(format!(
            "unknown transform id {}; known ids are 0 (encrypt), 1 (zstd), 2 (lz4)",
            id
        ))
    })?;
    transform_for(kind, config, service)
}
