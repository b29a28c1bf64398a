//! The per-collection backup contract.

use crate::diff::{
    cumulative_hash, BackupEntry, CollectionDiff, CollectionSnapshot, DiffAction, DiffActionType,
    SnapshotRow,
};
use crate::BackupResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Abstract backup contract for one document collection.
///
/// Implementations provide the scans, the hashing, and the field-level diff
/// for their document type; the default driver methods turn those into full
/// backups and incremental diffs. A row is divergent and must be re-sent
/// whenever either hash differs from the last acknowledged snapshot.
#[async_trait]
pub trait CollectionBackup: Send + Sync {
    type Doc: Clone + Send + Sync + 'static;

    /// Stable row identifier.
    fn row_id(&self, row: &Self::Doc) -> String;

    /// Full scan, or incremental when `since` is given. Excludes tombstones.
    /// Interruptible and resumable through `since`.
    async fn find_documents(&self, since: Option<DateTime<Utc>>)
        -> BackupResult<Vec<Self::Doc>>;

    /// Tombstone scan.
    async fn find_deleted_documents(&self) -> BackupResult<Vec<Self::Doc>>;

    /// Snapshot of the row's current hashes.
    fn create_backup_data(&self, row: &Self::Doc) -> BackupEntry;

    /// Minimal field-level difference. For updates only changed top-level
    /// fields are included; storage-file pointers are never part of the
    /// payload (large bodies are re-fetched, not diffed byte-wise).
    fn create_diff_data(
        &self,
        new_row: &Self::Doc,
        old_row: Option<&Self::Doc>,
    ) -> serde_json::Value;

    /// True if either hash differs, meaning a full or partial re-sync.
    fn check_document(&self, new_entry: &BackupEntry, old_entry: &BackupEntry) -> bool {
        new_entry.prop_hash != old_entry.prop_hash || new_entry.doc_hash != old_entry.doc_hash
    }

    /// True only when the body hash differs; avoids redundant large fetches.
    fn need_load_file(&self, new_entry: &BackupEntry, old_entry: Option<&BackupEntry>) -> bool {
        match old_entry {
            None => true,
            Some(old) => old.doc_hash != new_entry.doc_hash,
        }
    }

    /// Fetch the externally stored body and inline it into the row. On
    /// transient failure the row is re-queried up to 10 times; after that the
    /// row comes back without the body and callers treat the missing body as
    /// "unchanged, skip".
    async fn load_file(&self, row: Self::Doc, retry: u32) -> Self::Doc;

    /// Produce a full backup: every live row becomes an insert action.
    async fn create_collection_backup(
        &self,
    ) -> BackupResult<(CollectionSnapshot<Self::Doc>, CollectionDiff)> {
        self.run_pass(&CollectionSnapshot::new(), true).await
    }

    /// Produce an incremental diff against the last acknowledged snapshot.
    async fn create_collection_diff(
        &self,
        old: &CollectionSnapshot<Self::Doc>,
    ) -> BackupResult<(CollectionSnapshot<Self::Doc>, CollectionDiff)> {
        self.run_pass(old, false).await
    }

    /// Shared scan-compare-emit pass.
    async fn run_pass(
        &self,
        old: &CollectionSnapshot<Self::Doc>,
        full: bool,
    ) -> BackupResult<(CollectionSnapshot<Self::Doc>, CollectionDiff)> {
        let last_update = Utc::now();
        let since = if full { None } else { old.last_update };

        let mut snapshot = CollectionSnapshot {
            rows: if full {
                Default::default()
            } else {
                old.rows.clone()
            },
            last_update: Some(last_update),
            hash: old.hash.clone(),
            index: old.index + if full { 0 } else { 1 },
        };
        let mut actions = Vec::new();

        for row in self.find_documents(since).await? {
            let id = self.row_id(&row);
            let entry = self.create_backup_data(&row);

            match old.rows.get(&id) {
                None => {
                    let enriched = if self.need_load_file(&entry, None) {
                        self.load_file(row.clone(), 0).await
                    } else {
                        row.clone()
                    };
                    actions.push(DiffAction {
                        action: DiffActionType::Insert,
                        id: id.clone(),
                        prop_hash: entry.prop_hash.clone(),
                        doc_hash: entry.doc_hash.clone(),
                        diff: Some(self.create_diff_data(&enriched, None)),
                    });
                    snapshot.rows.insert(id, SnapshotRow { entry, row });
                }
                Some(previous) => {
                    if !self.check_document(&entry, &previous.entry) {
                        continue;
                    }
                    let enriched = if self.need_load_file(&entry, Some(&previous.entry)) {
                        self.load_file(row.clone(), 0).await
                    } else {
                        row.clone()
                    };
                    actions.push(DiffAction {
                        action: DiffActionType::Update,
                        id: id.clone(),
                        prop_hash: entry.prop_hash.clone(),
                        doc_hash: entry.doc_hash.clone(),
                        diff: Some(self.create_diff_data(&enriched, Some(&previous.row))),
                    });
                    snapshot.rows.insert(id, SnapshotRow { entry, row });
                }
            }
        }

        for row in self.find_deleted_documents().await? {
            let id = self.row_id(&row);
            let already_deleted = old.entry(&id).map(|e| e.deleted).unwrap_or(full);
            if already_deleted {
                continue;
            }
            let mut entry = self.create_backup_data(&row);
            entry.deleted = true;
            actions.push(DiffAction {
                action: DiffActionType::Delete,
                id: id.clone(),
                prop_hash: entry.prop_hash.clone(),
                doc_hash: entry.doc_hash.clone(),
                diff: None,
            });
            snapshot.rows.insert(id, SnapshotRow { entry, row });
        }

        let seed = if full { "" } else { old.hash.as_str() };
        let hash = cumulative_hash(seed, &actions);
        snapshot.hash = hash.clone();

        tracing::debug!(
            actions = actions.len(),
            index = snapshot.index,
            full,
            "Backup pass finished"
        );

        Ok((
            snapshot,
            CollectionDiff {
                uuid: uuid::Uuid::new_v4().to_string(),
                full,
                index: old.index + if full { 0 } else { 1 },
                last_update,
                actions,
                hash,
            },
        ))
    }
}
