// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared application state handed to every handler.

use std::sync::Arc;

use tokio::sync::Notify;

use crate::auth::TokenService;
use crate::config::Config;
use crate::crypto::{CryptoError, FieldCipher};
use crate::rate_limit::RateLimiter;
use crate::storage::{
    BeneficiaryRepository, FileError, FileStorage, FundRepository, GrievanceRepository,
    PortalDatabase, StoragePaths, StoreError, UserRepository,
};

/// Failures while assembling the state at startup.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("database: {0}")]
    Store(#[from] StoreError),

    #[error("data directory: {0}")]
    Files(#[from] FileError),

    #[error("field encryption: {0}")]
    Crypto(#[from] CryptoError),
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Arc<PortalDatabase>,
    pub files: Arc<FileStorage>,
    pub cipher: Arc<FieldCipher>,
    pub tokens: Arc<TokenService>,
    pub rate_limiter: Arc<RateLimiter>,
    /// Wakes the settlement worker when a job is enqueued.
    pub disbursements: Arc<Notify>,
}

impl AppState {
    /// Open the database and data directory described by `config`.
    pub fn new(config: Config) -> Result<Self, StateError> {
        let mut files = FileStorage::new(StoragePaths::new(&config.data_dir));
        files.initialize()?;
        let db = PortalDatabase::open(&files.paths().database_file())?;
        let cipher = FieldCipher::new(&config.field_encryption_key)?;

        Ok(Self {
            tokens: Arc::new(TokenService::from_config(&config)),
            rate_limiter: Arc::new(RateLimiter::new(
                config.rate_limit_max_requests,
                config.rate_limit_window,
            )),
            config: Arc::new(config),
            db: Arc::new(db),
            files: Arc::new(files),
            cipher: Arc::new(cipher),
            disbursements: Arc::new(Notify::new()),
        })
    }

    /// Delay between initiation and settlement of a disbursement.
    pub fn settlement_delay(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.disbursement_delay)
            .unwrap_or_else(|_| chrono::Duration::seconds(crate::storage::repository::DEFAULT_SETTLEMENT_DELAY_SECS))
    }

    pub fn users(&self) -> UserRepository<'_> {
        UserRepository::new(&self.db)
    }

    pub fn beneficiaries(&self) -> BeneficiaryRepository<'_> {
        BeneficiaryRepository::new(&self.db)
    }

    pub fn funds(&self) -> FundRepository<'_> {
        FundRepository::new(&self.db).with_settlement_delay(self.settlement_delay())
    }

    pub fn grievances(&self) -> GrievanceRepository<'_> {
        GrievanceRepository::new(&self.db)
    }
}
