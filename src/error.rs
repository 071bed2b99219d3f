use thiserror::Error;

/// Errors raised while setting up a reconciliation run.
///
/// Everything that can go wrong per record or per thread is recovered from
/// and reported in `ReconcileReport`; only configuration problems end up here.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("self identifier {0:?} looks like a phone number but does not normalize to 10 digits")]
    InvalidSelfIdentifier(String),

    #[error("alias key {0:?} is empty after normalization")]
    InvalidAlias(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid alias {0:?}, expected NUMBER=NAME")]
    Alias(String),
}
