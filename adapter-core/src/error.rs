use std::fmt::{self, Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    UnsupportedContentType { content_type: String },
    UnsupportedAccept { accept: String },
    MalformedRequest { reason: String },
    FeatureListMissing { variable: String },
    InvalidFeatureList { reason: String },
    ModelNotLoaded,
}

impl AdapterError {
    pub fn unsupported_content_type(content_type: impl Into<String>) -> Self {
        Self::UnsupportedContentType {
            content_type: content_type.into(),
        }
    }

    pub fn unsupported_accept(accept: impl Into<String>) -> Self {
        Self::UnsupportedAccept {
            accept: accept.into(),
        }
    }

    pub fn malformed_request(reason: impl Into<String>) -> Self {
        Self::MalformedRequest {
            reason: reason.into(),
        }
    }

    pub fn invalid_feature_list(reason: impl Into<String>) -> Self {
        Self::InvalidFeatureList {
            reason: reason.into(),
        }
    }
}

impl Display for AdapterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedContentType { content_type } => {
                write!(f, "Content type '{}' is not supported", content_type)
            }
            Self::UnsupportedAccept { accept } => {
                write!(f, "Accept type '{}' is not supported", accept)
            }
            Self::MalformedRequest { reason } => write!(f, "Malformed request body: {}", reason),
            Self::FeatureListMissing { variable } => {
                write!(f, "Environment variable '{}' is not set", variable)
            }
            Self::InvalidFeatureList { reason } => write!(f, "Invalid feature list: {}", reason),
            Self::ModelNotLoaded => write!(f, "Scoring requested but no model is loaded"),
        }
    }
}

impl std::error::Error for AdapterError {}
