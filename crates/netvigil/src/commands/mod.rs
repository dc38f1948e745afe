//! Command dispatch: loads config, seeds the store, builds the engine.

pub mod config_cmd;
pub mod devices;
pub mod probe;
pub mod run;
pub mod scan;

use std::path::PathBuf;
use std::sync::Arc;

use netvigil_config::Config;
use netvigil_core::{DeviceStore, MemoryStore, ProbingEngine};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;
use crate::notify::LogNotifier;

/// Everything an engine-bound command needs.
pub struct Context {
    pub store: Arc<MemoryStore>,
    pub engine: ProbingEngine,
}

impl Context {
    pub fn load(global: &GlobalOpts) -> Result<Self, CliError> {
        let config = load_config(global)?;
        let inventory = config.inventory()?;

        let store = Arc::new(MemoryStore::new(config.engine.to_settings()));
        inventory.seed(&store);
        tracing::info!(devices = store.device_count(), "inventory loaded");

        let engine = ProbingEngine::builder(Arc::clone(&store) as Arc<dyn DeviceStore>)
            .pool_config(config.pool.to_pool_config())
            .notifier(Arc::new(LogNotifier))
            .build();

        Ok(Self { store, engine })
    }
}

/// `--config` or the platform default.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(netvigil_config::config_path)
}

pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(netvigil_config::load_config_from(&config_file(global))?)
}

/// Dispatch an engine-bound command to its handler.
pub async fn dispatch(cmd: Command, ctx: &Context, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Run(args) => run::handle(ctx, args, global).await,
        Command::Probe(args) => probe::handle(ctx, &args, global).await,
        Command::Devices(args) => devices::handle(ctx, args, global).await,
        Command::Scan(args) => scan::handle(ctx, &args, global).await,
        Command::Config(_) | Command::Completions(_) => Err(CliError::Engine {
            message: "command does not use the engine".into(),
        }),
    }
}
