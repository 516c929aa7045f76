//! Application state wiring the database and services together.
//!
//! `EnsembleService` is generic over the repository trait; AppState pins it
//! to the SQLite implementation.

use std::path::PathBuf;

use anyhow::Context;
use ensemble_core::service::ensemble::EnsembleService;
use ensemble_infra::config::{load_manager_config, resolve_database_url};
use ensemble_infra::filesystem::{ensure_data_dir, resolve_data_dir};
use ensemble_infra::sqlite::ensemble::SqliteEnsembleRepository;
use ensemble_infra::sqlite::pool::DatabasePool;
use ensemble_types::config::ManagerConfig;

pub type ConcreteEnsembleService = EnsembleService<SqliteEnsembleRepository>;

/// Shared state for every subcommand.
pub struct AppState {
    pub service: ConcreteEnsembleService,
    pub repo: SqliteEnsembleRepository,
    pub config: ManagerConfig,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Resolve the data directory, load `config.toml` and open the database.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        ensure_data_dir(&data_dir)
            .await
            .with_context(|| format!("unable to create data directory {}", data_dir.display()))?;

        let config = load_manager_config(&data_dir).await;

        let db_url = resolve_database_url(&config, &data_dir);
        let db_pool = DatabasePool::new(&db_url)
            .await
            .with_context(|| format!("unable to open database {db_url}"))?;

        let repo = SqliteEnsembleRepository::new(db_pool.clone());
        let service = EnsembleService::new(repo.clone(), current_username()?);

        Ok(Self {
            service,
            repo,
            config,
            data_dir,
            db_pool,
        })
    }
}

/// Name of the user running this process. Ensembles are scoped per user.
#[cfg(unix)]
pub fn current_username() -> anyhow::Result<String> {
    use nix::unistd::{User, getuid};

    let uid = getuid();
    match User::from_uid(uid).context("unable to look up current user")? {
        Some(user) => Ok(user.name),
        None => std::env::var("USER").with_context(|| format!("no passwd entry for uid {uid}")),
    }
}

#[cfg(not(unix))]
pub fn current_username() -> anyhow::Result<String> {
    std::env::var("USERNAME")
        .or_else(|_| std::env::var("USER"))
        .context("unable to determine current user")
}
