use thiserror::Error;
use vspace_hook::HookError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is not initialized")]
    NotInitialized,

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("library not registered: {0}")]
    LibraryNotLoaded(String),

    #[error("failed to open library {path}: {reason}")]
    LibraryOpen { path: String, reason: String },

    #[error("{path} is not a usable ELF image: {reason}")]
    BadElf { path: String, reason: String },

    #[error(transparent)]
    Hook(#[from] HookError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
