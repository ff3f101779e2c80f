#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Guard(#[from] tripwire_guard::GuardError),

    #[error("{0}")]
    Settings(#[from] tripwire_settings::SettingsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
