use effect_bridge_core::{BlobError, GUID};
use thiserror::Error;
use windows_core::HRESULT;

use crate::native::{E_FAIL, E_INVALIDARG};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EffectError {
    #[error("malformed registration blob: {0}")]
    MalformedBlob(#[from] BlobError),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("host call failed with {0}")]
    Host(HRESULT),

    #[error("effect {class_id:?} is already registered with a different shape")]
    ConflictingRegistration { class_id: GUID },
}

pub type Result<T> = std::result::Result<T, EffectError>;

impl EffectError {
    /// Status code reported when this error has to cross the native boundary.
    pub fn hresult(&self) -> HRESULT {
        match self {
            EffectError::MalformedBlob(_) | EffectError::InvalidArgument(_) => E_INVALIDARG,
            EffectError::Host(hr) => *hr,
            EffectError::ConflictingRegistration { .. } => E_FAIL,
        }
    }
}

impl From<HRESULT> for EffectError {
    fn from(hr: HRESULT) -> Self {
        EffectError::Host(hr)
    }
}

impl From<windows_core::Error> for EffectError {
    fn from(error: windows_core::Error) -> Self {
        EffectError::Host(error.code())
    }
}

impl From<EffectError> for windows_core::Error {
    fn from(error: EffectError) -> Self {
        windows_core::Error::from_hresult(error.hresult())
    }
}
