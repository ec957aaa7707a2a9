use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    BadIPFormatting(String),
    DirectoryDoesNotExist(String),
    NotInRange(String),
    UnknownBackend(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::BadIPFormatting(e) => write!(f, "IP formatting error: {}", e),
            ConfigError::DirectoryDoesNotExist(e) => write!(f, "Directory error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
            ConfigError::UnknownBackend(e) => write!(f, "Unknown storage backend: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Failures of the capture engine.
///
/// `DeviceUnavailable` is fatal to `start()` only. `ReadFault` is transient,
/// travels in `DiagnosticEvent::ReadFault` and never ends a session on its own. `HandleInvalid` ends the session; by the
/// time it is observed the handle is closed and the worker has exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    DeviceUnavailable(String),
    ReadFault(String),
    HandleInvalid(String),
    AlreadyRunning,
    WorkerPanicked,
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::DeviceUnavailable(e) => write!(f, "Capture device unavailable: {}", e),
            CaptureError::ReadFault(e) => write!(f, "Capture read fault: {}", e),
            CaptureError::HandleInvalid(e) => write!(f, "Capture handle no longer usable: {}", e),
            CaptureError::AlreadyRunning => write!(f, "A capture session is already running"),
            CaptureError::WorkerPanicked => write!(f, "Capture worker panicked"),
        }
    }
}

impl std::error::Error for CaptureError {}

/// Reasons a frame produced no `PacketRecord`. Never surfaced as an error,
/// only counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationSkip {
    NotIpv4,
    Malformed(String),
}

impl fmt::Display for ClassificationSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassificationSkip::NotIpv4 => write!(f, "Frame does not carry IPv4"),
            ClassificationSkip::Malformed(e) => write!(f, "Malformed frame: {}", e),
        }
    }
}

impl std::error::Error for ClassificationSkip {}

#[derive(Debug)]
pub enum ConsumerError {
    Failed(String),
    Panicked(String),
    StorageError(StorageError),
}

impl fmt::Display for ConsumerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumerError::Failed(e) => write!(f, "Consumer failed: {}", e),
            ConsumerError::Panicked(e) => write!(f, "Consumer panicked: {}", e),
            ConsumerError::StorageError(e) => write!(f, "Consumer storage error: {}", e),
        }
    }
}

impl std::error::Error for ConsumerError {}

impl From<StorageError> for ConsumerError {
    fn from(err: StorageError) -> Self {
        ConsumerError::StorageError(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    ConnectionFailed,
    WriteFailed,
    ReadFailed,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed => write!(f, "Storage connection failed"),
            StorageError::WriteFailed => write!(f, "Storage write failed"),
            StorageError::ReadFailed => write!(f, "Storage read failed"),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    UnknownProtocol(String),
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::UnknownProtocol(p) => write!(f, "Unknown protocol filter: {}", p),
        }
    }
}

impl std::error::Error for FilterError {}

#[derive(Debug)]
pub enum WebError {
    BindFailed(String),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::BindFailed(e) => write!(f, "Web server bind failed: {}", e),
        }
    }
}

impl std::error::Error for WebError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    CaptureError(CaptureError),
    StorageError(StorageError),
    WebError(WebError),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::CaptureError(e) => write!(f, "Capture error: {}", e),
            ControllerError::StorageError(e) => write!(f, "Storage error: {}", e),
            ControllerError::WebError(e) => write!(f, "Web error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<CaptureError> for ControllerError {
    fn from(err: CaptureError) -> Self {
        ControllerError::CaptureError(err)
    }
}

impl From<StorageError> for ControllerError {
    fn from(err: StorageError) -> Self {
        ControllerError::StorageError(err)
    }
}

impl From<WebError> for ControllerError {
    fn from(err: WebError) -> Self {
        ControllerError::WebError(err)
    }
}
