// hwsentry - connector execution engine for hardware monitoring

// Re-export error types
pub mod error;
pub use error::{Result, SentryError};

// Module declarations
pub mod core;

// Re-export commonly used types
pub use core::config::{EngineConfig, HostConfiguration};
pub use core::extension::{ExtensionRegistry, ProtocolExtension};
pub use core::strategy::Scheduler;

// Initialize logging
pub fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
}
