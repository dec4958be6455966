//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::signing::UploadAuthorizer;
use crate::upload::ChunkAssembler;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    assembler: ChunkAssembler,
    authorizer: UploadAuthorizer,
}

impl AppState {
    /// Create the application state from configuration
    pub fn new(config: Config) -> Self {
        let assembler = ChunkAssembler::new(&config.upload);
        let authorizer = UploadAuthorizer::from_config(&config);
        Self::with_components(config, assembler, authorizer)
    }

    /// Create the application state from pre-built components
    pub fn with_components(
        config: Config,
        assembler: ChunkAssembler,
        authorizer: UploadAuthorizer,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                assembler,
                authorizer,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the chunk assembler
    pub fn assembler(&self) -> &ChunkAssembler {
        &self.inner.assembler
    }

    /// Get the upload authorizer
    pub fn authorizer(&self) -> &UploadAuthorizer {
        &self.inner.authorizer
    }
}
