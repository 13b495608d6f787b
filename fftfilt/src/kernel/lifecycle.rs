use super::ConfigError;

/// Constructor validation lifecycle shared by kernel structs.
///
/// Everything expensive (transform plans, device buffers, uploaded filter
/// coefficients) happens once in [`KernelLifecycle::try_new`]; the resulting
/// kernel is then run many times against same-length signals.
pub trait KernelLifecycle: Sized {
    /// Kernel config type.
    type Config;

    /// Construct a validated kernel from config.
    fn try_new(config: Self::Config) -> Result<Self, ConfigError>;
}
