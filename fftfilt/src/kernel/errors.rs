use core::fmt;

use crate::accel::DeviceError;

/// Validation errors raised at kernel construction, adapter binding or
/// configuration load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required input or configuration field is empty.
    EmptyInput {
        /// Name of the argument that is empty.
        arg: &'static str,
    },
    /// A configuration argument value is invalid.
    InvalidArgument {
        /// Name of the argument.
        arg: &'static str,
        /// Human readable reason.
        reason: &'static str,
    },
    /// A contiguous 1D slice view could not be obtained.
    NonContiguous {
        /// Name of the argument that is non-contiguous.
        arg: &'static str,
    },
    /// A configuration file exists but could not be read or parsed.
    InvalidFile {
        /// Path of the offending file.
        path: String,
        /// Underlying reader or parser message.
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EmptyInput { arg } => write!(f, "Input `{arg}` was empty."),
            ConfigError::InvalidArgument { arg, reason } => {
                write!(f, "Invalid argument `{arg}`: {reason}")
            }
            ConfigError::NonContiguous { arg } => {
                write!(f, "Argument `{arg}` is not contiguous in memory.")
            }
            ConfigError::InvalidFile { path, reason } => {
                write!(f, "Could not load config file `{path}`: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Runtime failures for checked kernel entrypoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecInvariantViolation {
    /// Input or output length mismatched the expected runtime shape.
    LengthMismatch {
        /// Name of the argument.
        arg: &'static str,
        /// Required length.
        expected: usize,
        /// Received length.
        got: usize,
    },
    /// Adapter binding/configuration failure.
    Config(ConfigError),
    /// The device failed while executing an already prepared context.
    Device(DeviceError),
}

impl From<ConfigError> for ExecInvariantViolation {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<DeviceError> for ExecInvariantViolation {
    fn from(value: DeviceError) -> Self {
        Self::Device(value)
    }
}

impl fmt::Display for ExecInvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecInvariantViolation::LengthMismatch { arg, expected, got } => {
                write!(
                    f,
                    "Execution length mismatch on `{arg}`. Expected {expected}, got {got}."
                )
            }
            ExecInvariantViolation::Config(err) => write!(f, "{err}"),
            ExecInvariantViolation::Device(err) => write!(f, "Device execution failed: {err}"),
        }
    }
}

impl std::error::Error for ExecInvariantViolation {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExecInvariantViolation::Config(err) => Some(err),
            ExecInvariantViolation::Device(err) => Some(err),
            ExecInvariantViolation::LengthMismatch { .. } => None,
        }
    }
}
