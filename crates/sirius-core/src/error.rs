use thiserror::Error;

/// Errors reported by the extraction core.
///
/// Every variant maps to a stable integer status code so callers that track
/// failures numerically (batch drivers, logs) can do so without string
/// matching. The `Display` string is a short one-line message; [`detail`]
/// produces a longer description including limits and dimensions.
///
/// [`detail`]: SiriusError::detail
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SiriusError {
    #[error("memory allocation failed")]
    AllocFail { what: &'static str },

    #[error("internal pixel buffer full")]
    PixstackFull { capacity: usize },

    #[error("unsupported image data type")]
    UnsupportedDtype { operation: &'static str },

    #[error("illegal argument: {reason}")]
    IllegalArg { reason: String },

    #[error("object deblending overflow")]
    DeblendOverflow { limit: usize },

    #[error("too many provisional objects")]
    ObjectsLimit { limit: usize },

    #[error("relative threshold requires noise information")]
    RelthreshNoNoise,
}

impl SiriusError {
    /// Stable integer status code for this error kind.
    pub fn status(&self) -> i32 {
        match self {
            SiriusError::AllocFail { .. } => 1,
            SiriusError::PixstackFull { .. } => 2,
            SiriusError::UnsupportedDtype { .. } => 3,
            SiriusError::IllegalArg { .. } => 4,
            SiriusError::DeblendOverflow { .. } => 5,
            SiriusError::ObjectsLimit { .. } => 6,
            SiriusError::RelthreshNoNoise => 7,
        }
    }

    /// Longer description of the failure, including the knob to raise for
    /// resource-exhaustion errors.
    pub fn detail(&self) -> String {
        match self {
            SiriusError::AllocFail { what } => {
                format!("allocation of {what} failed; the image may be too large for available memory")
            }
            SiriusError::PixstackFull { capacity } => format!(
                "the shared pixel stack ({capacity} entries) was exhausted during segmentation; \
                 raise it with knobs::set_extract_pixstack and retry"
            ),
            SiriusError::UnsupportedDtype { operation } => {
                format!("{operation} does not support the requested element type")
            }
            SiriusError::IllegalArg { reason } => reason.clone(),
            SiriusError::DeblendOverflow { limit } => format!(
                "deblending produced more than {limit} sub-objects for a single detection; \
                 raise it with knobs::set_sub_object_limit and retry"
            ),
            SiriusError::ObjectsLimit { limit } => format!(
                "the provisional object table ({limit} entries) was exhausted; \
                 raise it with knobs::set_extract_object_limit and retry"
            ),
            SiriusError::RelthreshNoNoise => {
                "a relative detection threshold was requested but the image carries neither a \
                 noise array nor a scalar noise value"
                    .to_string()
            }
        }
    }

    pub(crate) fn illegal<S: Into<String>>(reason: S) -> Self {
        SiriusError::IllegalArg {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SiriusError>;
