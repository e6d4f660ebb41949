//! Wiring of the concrete ledger, blob store and Drive client into the
//! pipeline stages.

use anyhow::Context;
use ferry_core::{Classifier, MigrationConfig};
use ferry_db::{FileRecordRepository, Ledger};
use ferry_drive::{GoogleDriveClient, RemoteDirectory, StaticTokenProvider};
use ferry_worker::{
    DiscoveryStage, DriverSettings, PipelineDriver, TransferSettings, TransferStage,
};
use std::sync::Arc;

pub struct App {
    pub config: MigrationConfig,
    repository: Arc<FileRecordRepository>,
}

impl App {
    /// Configure the ledger pool. Nothing remote is touched yet; the
    /// database is first reached by the command that needs it.
    pub fn new(config: MigrationConfig) -> anyhow::Result<Self> {
        let pool = ferry_db::connect(&config.database)
            .context("Invalid ledger database configuration")?;
        Ok(Self {
            config,
            repository: Arc::new(FileRecordRepository::new(pool)),
        })
    }

    pub fn ledger(&self) -> Arc<dyn Ledger> {
        self.repository.clone()
    }

    pub async fn bootstrap(&self) -> anyhow::Result<()> {
        ferry_db::schema::bootstrap(self.repository.pool())
            .await
            .context("Schema bootstrap failed")
    }

    fn directory(&self) -> anyhow::Result<Arc<dyn RemoteDirectory>> {
        let token = self
            .config
            .drive
            .access_token
            .clone()
            .context("DRIVE_ACCESS_TOKEN must be set to talk to Google Drive")?;
        let tokens = StaticTokenProvider::new(token).context("Invalid Drive credential")?;
        let client = GoogleDriveClient::new(&self.config.drive, Arc::new(tokens))
            .context("Failed to build Google Drive client")?;
        Ok(Arc::new(client))
    }

    /// Build both stages and the driver from configuration.
    pub async fn driver(&self) -> anyhow::Result<PipelineDriver> {
        let directory = self.directory()?;
        let store = ferry_storage::create_blob_store(&self.config.storage)
            .await
            .context("Failed to initialize blob store")?;
        tracing::info!(backend = %store.backend_type(), "Blob store ready");

        let classifier = Classifier::new(self.config.pipeline.document_mime_types.clone());
        let discovery = DiscoveryStage::new(directory.clone(), self.ledger(), classifier);
        let transfer = TransferStage::new(
            directory,
            self.ledger(),
            store,
            TransferSettings::from_config(&self.config.pipeline),
        );

        Ok(PipelineDriver::new(
            discovery,
            transfer,
            DriverSettings::from_config(&self.config),
        ))
    }
}
