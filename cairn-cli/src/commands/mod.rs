pub mod aggregate;
pub mod publish;
pub mod rollback;
pub mod run;
pub mod stage;
pub mod status;

use std::future::Future;
use std::process::ExitCode;

use anyhow::{Context, Result};
use cairn_core::{config, Config};
use cairn_publish::{CollapseMode, Pipeline};
use cairn_store::KuboStore;

use crate::{GlobalArgs, EXIT_UNCHANGED};

/// Loaded config plus the store it points at.
pub struct Session {
    pub config: Config,
    pub store: KuboStore,
}

impl Session {
    pub fn open(global: &GlobalArgs) -> Result<Self> {
        let mut config =
            config::load(global.config.as_deref()).context("failed to load configuration")?;
        if let Some(path) = &global.descriptor {
            config.descriptor = path.clone();
        }
        tracing::debug!(api = %config.api_url, raw_key = %config.raw_key, production_key = %config.production_key, "configuration loaded");
        let store = KuboStore::from_config(&config);
        Ok(Self { config, store })
    }

    /// `collapse` overrides the configured collapse mode.
    pub fn pipeline(&self, collapse: Option<CollapseMode>) -> Pipeline<'_> {
        let pipeline = Pipeline::new(&self.store, &self.config);
        match collapse {
            Some(mode) => pipeline.with_collapse(mode),
            None => pipeline,
        }
    }
}

/// Drive `future` to completion on a fresh multi-threaded runtime.
pub fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    Ok(runtime.block_on(future))
}

pub fn exit_for(changed: bool) -> ExitCode {
    if changed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_UNCHANGED)
    }
}
