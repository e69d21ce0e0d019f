use std::fmt;

use anyhow::Error;
use serde::Serialize;
use serde_json::Value;

use crate::assets::AssetFetchError;
use crate::codec::LabelCodecError;
use crate::texture_stage::InitError;

pub const BUFFER_SIZE_MISMATCH: &str = "BUFFER_SIZE_MISMATCH";
pub const INVALID_DIMENSIONS: &str = "INVALID_DIMENSIONS";
pub const VERTEX_SHADER_COMPILE: &str = "VERTEX_SHADER_COMPILE";
pub const FRAGMENT_SHADER_COMPILE: &str = "FRAGMENT_SHADER_COMPILE";
pub const PROGRAM_LINK: &str = "PROGRAM_LINK";
pub const GPU_RESOURCE: &str = "GPU_RESOURCE";
pub const ASSET_FETCH: &str = "ASSET_FETCH";
pub const NO_GPU_ADAPTER: &str = "NO_GPU_ADAPTER";
pub const INVALID_CONFIG: &str = "INVALID_CONFIG";
pub const USAGE: &str = "USAGE";
pub const INTERNAL: &str = "INTERNAL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodedErrorKind {
    Usage,
    Runtime,
}

#[derive(Debug, Clone)]
pub struct CodedError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
    pub kind: CodedErrorKind,
}

impl CodedError {
    pub fn usage(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Usage,
        }
    }

    pub fn runtime(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Runtime,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code.to_owned(),
                message: self.message.clone(),
                details: self.details.clone(),
            },
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

pub fn find_coded_error(error: &Error) -> Option<&CodedError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CodedError>())
}

fn codec_code(error: &LabelCodecError) -> &'static str {
    match error {
        LabelCodecError::BufferSizeMismatch { .. } => BUFFER_SIZE_MISMATCH,
        LabelCodecError::ZeroDimensions { .. } | LabelCodecError::DimensionsOverflow => {
            INVALID_DIMENSIONS
        }
    }
}

fn init_code(error: &InitError) -> &'static str {
    match error {
        InitError::InvalidDimensions { .. } | InitError::ExceedsDeviceLimit { .. } => {
            INVALID_DIMENSIONS
        }
        InitError::ImageSizeMismatch { .. } | InitError::LabelGridMismatch { .. } => {
            BUFFER_SIZE_MISMATCH
        }
        InitError::VertexShaderCompile { .. } => VERTEX_SHADER_COMPILE,
        InitError::FragmentShaderCompile { .. } => FRAGMENT_SHADER_COMPILE,
        InitError::ProgramLink { .. } => PROGRAM_LINK,
        InitError::ResourceAllocation { .. } => GPU_RESOURCE,
    }
}

/// Stable code for the first recognised error in the chain.
pub fn error_code(error: &Error) -> &'static str {
    for cause in error.chain() {
        if let Some(coded) = cause.downcast_ref::<CodedError>() {
            return coded.code;
        }
        if let Some(fetch) = cause.downcast_ref::<AssetFetchError>() {
            return match fetch {
                AssetFetchError::Codec { source, .. } => codec_code(source),
                AssetFetchError::InvalidId { .. } => USAGE,
                _ => ASSET_FETCH,
            };
        }
        if let Some(init) = cause.downcast_ref::<InitError>() {
            return init_code(init);
        }
        if let Some(codec) = cause.downcast_ref::<LabelCodecError>() {
            return codec_code(codec);
        }
    }
    INTERNAL
}

/// Envelope for any error: coded errors keep their details, everything else
/// is classified by [`error_code`] and carries the full context chain.
pub fn envelope_for(error: &Error) -> ErrorEnvelope {
    if let Some(coded) = find_coded_error(error) {
        return coded.envelope();
    }
    ErrorEnvelope {
        ok: false,
        error: ErrorEnvelopeBody {
            code: error_code(error).to_owned(),
            message: format!("{error:#}"),
            details: None,
        },
    }
}
