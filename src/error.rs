use std::fmt;

/// Numeric failure taxonomy shared with bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderErrorCode {
    InvalidDocument = 1,
    UnsupportedFeature = 2,
    ExternalResourceBlocked = 3,
    ExternalResourceFailed = 4,
    RenderFailed = 5,
}

impl RenderErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

#[derive(Debug)]
pub enum RenderError {
    InvalidDocument(String),
    UnsupportedFeature(String),
    ExternalResourceBlocked(String),
    ExternalResourceFailed(String),
    RenderFailed(String),
    InvalidConfiguration(String),
    Io(std::io::Error),
}

impl RenderError {
    pub fn code(&self) -> RenderErrorCode {
        match self {
            RenderError::InvalidDocument(_) => RenderErrorCode::InvalidDocument,
            RenderError::UnsupportedFeature(_) => RenderErrorCode::UnsupportedFeature,
            RenderError::ExternalResourceBlocked(_) => RenderErrorCode::ExternalResourceBlocked,
            RenderError::ExternalResourceFailed(_) => RenderErrorCode::ExternalResourceFailed,
            RenderError::RenderFailed(_)
            | RenderError::InvalidConfiguration(_)
            | RenderError::Io(_) => RenderErrorCode::RenderFailed,
        }
    }

    pub fn message(&self) -> String {
        match self {
            RenderError::InvalidDocument(message)
            | RenderError::UnsupportedFeature(message)
            | RenderError::ExternalResourceBlocked(message)
            | RenderError::ExternalResourceFailed(message)
            | RenderError::RenderFailed(message)
            | RenderError::InvalidConfiguration(message) => message.clone(),
            RenderError::Io(err) => err.to_string(),
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::InvalidDocument(message) => write!(f, "invalid document: {}", message),
            RenderError::UnsupportedFeature(message) => {
                write!(f, "unsupported feature: {}", message)
            }
            RenderError::ExternalResourceBlocked(message) => {
                write!(f, "external resource blocked: {}", message)
            }
            RenderError::ExternalResourceFailed(message) => {
                write!(f, "external resource failed: {}", message)
            }
            RenderError::RenderFailed(message) => write!(f, "render failed: {}", message),
            RenderError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            RenderError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RenderError {
    fn from(value: std::io::Error) -> Self {
        RenderError::Io(value)
    }
}

impl From<roxmltree::Error> for RenderError {
    fn from(value: roxmltree::Error) -> Self {
        RenderError::InvalidDocument(format!("XML parse error: {}", value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_taxonomy_numbers() {
        assert_eq!(
            RenderError::InvalidDocument("x".to_string()).code().as_i32(),
            1
        );
        assert_eq!(
            RenderError::ExternalResourceBlocked("x".to_string())
                .code()
                .as_i32(),
            3
        );
        assert_eq!(
            RenderError::InvalidConfiguration("x".to_string()).code(),
            RenderErrorCode::RenderFailed
        );
    }

    #[test]
    fn io_errors_expose_source() {
        use std::error::Error;
        let err = RenderError::from(std::io::Error::other("disk"));
        assert!(err.source().is_some());
        assert_eq!(err.message(), "disk");
    }
}
