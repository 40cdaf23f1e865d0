mod backup;
pub mod config;
pub mod crypto;
pub mod deadlines;
mod error;
pub mod income;
pub mod migrate;
pub mod model;
pub mod progress;
pub mod remote;
mod restore;
pub mod run_log;
pub mod snapshot;
pub mod store;

pub const APP_NAME: &str = "Seishin";

pub use backup::{BackupConfig, BackupOptions, BackupResult, run_backup, run_backup_with};
pub use crypto::{EncryptedPayload, KdfParams};
pub use error::{Error, Result};
pub use migrate::{CURRENT_VERSION, MIGRATIONS, Migration, MigrationReport, run_migrations};
pub use progress::{ProgressSink, TaskProgress};
pub use remote::{
    BlobHandle, BlobInfo, BlobStore, InMemoryBlobStore, LocalDirBlobStore, UploadReceipt,
};
pub use restore::{
    RestoreConfig, RestoreOptions, RestorePreview, RestoreResult, apply_snapshot, confirm_restore,
    fetch_restore, fetch_restore_with, remote_backup_info,
};
pub use snapshot::{BackupSnapshot, SNAPSHOT_FORMAT_VERSION, SnapshotTables, TableCounts};
pub use store::{Store, StoreChange, Table};
