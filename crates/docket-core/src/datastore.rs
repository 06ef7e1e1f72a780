use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::ImportError;
use crate::task::{Group, Snapshot, Task, ViewState};

pub const EXPORT_VERSION: &str = "1.0";
pub const VIEW_FILE_NAME: &str = "view.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Tasks,
    Groups,
}

impl CollectionKind {
    pub fn file_name(self) -> &'static str {
        match self {
            CollectionKind::Tasks => "tasks.json",
            CollectionKind::Groups => "groups.json",
        }
    }

    fn bundle_field(self) -> &'static str {
        match self {
            CollectionKind::Tasks => "tasks",
            CollectionKind::Groups => "groups",
        }
    }
}

/// Backup file layout: both collections plus an envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub tasks: Vec<Task>,
    pub groups: Vec<Group>,
    pub exported_at: DateTime<Utc>,
    pub version: String,
}

impl ExportBundle {
    pub fn new(snapshot: Snapshot, exported_at: DateTime<Utc>) -> Self {
        Self {
            tasks: snapshot.tasks,
            groups: snapshot.groups,
            exported_at,
            version: EXPORT_VERSION.to_string(),
        }
    }
}

/// Task and group collections stored as JSON arrays in a data directory,
/// plus the listing filters in `view.json`.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub tasks_path: PathBuf,
    pub groups_path: PathBuf,
    pub view_path: PathBuf,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let tasks_path = data_dir.join(CollectionKind::Tasks.file_name());
        let groups_path = data_dir.join(CollectionKind::Groups.file_name());
        let view_path = data_dir.join(VIEW_FILE_NAME);

        for path in [&tasks_path, &groups_path] {
            if !path.exists() {
                fs::write(path, "[]")
                    .with_context(|| format!("failed to create {}", path.display()))?;
            }
        }

        info!(
            data_dir = %data_dir.display(),
            tasks = %tasks_path.display(),
            groups = %groups_path.display(),
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            tasks_path,
            groups_path,
            view_path,
        })
    }

    pub fn path_for(&self, kind: CollectionKind) -> &Path {
        match kind {
            CollectionKind::Tasks => &self.tasks_path,
            CollectionKind::Groups => &self.groups_path,
        }
    }

    #[tracing::instrument(skip(self))]
    pub fn load<T: DeserializeOwned>(&self, kind: CollectionKind) -> anyhow::Result<Vec<T>> {
        load_json_array(self.path_for(kind))
            .with_context(|| format!("failed to load {}", kind.file_name()))
    }

    #[tracing::instrument(skip(self, items), fields(count = items.len()))]
    pub fn save<T: Serialize>(&self, kind: CollectionKind, items: &[T]) -> anyhow::Result<()> {
        save_json_atomic(self.path_for(kind), items)
            .with_context(|| format!("failed to save {}", kind.file_name()))
    }

    /// Like [`DataStore::load`], but an unreadable collection is logged and
    /// read as empty.
    pub fn load_or_default<T: DeserializeOwned>(&self, kind: CollectionKind) -> Vec<T> {
        self.load(kind).unwrap_or_else(|err| {
            warn!(kind = ?kind, error = %format!("{err:#}"), "storage read failed; starting empty");
            Vec::new()
        })
    }

    /// Like [`DataStore::save`], but a failed write is only logged.
    pub fn save_or_log<T: Serialize>(&self, kind: CollectionKind, items: &[T]) {
        if let Err(err) = self.save(kind, items) {
            warn!(kind = ?kind, error = %format!("{err:#}"), "storage write failed; continuing in memory");
        }
    }

    /// Reads both collections and repairs whatever would break the board,
    /// so a half-readable data directory still yields an importable snapshot.
    pub fn load_snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot {
            tasks: self.load_or_default(CollectionKind::Tasks),
            groups: self.load_or_default(CollectionKind::Groups),
        };
        let repaired = snapshot.repair();
        if repaired > 0 {
            warn!(
                repaired,
                data_dir = %self.data_dir.display(),
                "stored collections were inconsistent; repaired in memory"
            );
        }
        snapshot
    }

    pub fn save_snapshot(&self, snapshot: &Snapshot) {
        self.save_or_log(CollectionKind::Tasks, &snapshot.tasks);
        self.save_or_log(CollectionKind::Groups, &snapshot.groups);
    }

    /// A missing file means no filters; an unreadable one is logged and
    /// ignored.
    pub fn load_view_state(&self) -> ViewState {
        if !self.view_path.exists() {
            return ViewState::default();
        }
        load_json(&self.view_path).unwrap_or_else(|err| {
            warn!(error = %format!("{err:#}"), "view state read failed; showing everything");
            ViewState::default()
        })
    }

    pub fn save_view_state(&self, state: &ViewState) {
        if let Err(err) = save_json_atomic(&self.view_path, state) {
            warn!(error = %format!("{err:#}"), "view state write failed; continuing in memory");
        }
    }

    /// Bundles whatever is currently stored.
    #[tracing::instrument(skip(self))]
    pub fn export_snapshot(&self, exported_at: DateTime<Utc>) -> ExportBundle {
        ExportBundle::new(self.load_snapshot(), exported_at)
    }
}

/// Parses a backup. Both `tasks` and `groups` must be arrays of well-formed
/// records; the envelope fields are ignored.
#[tracing::instrument(skip(bytes), fields(len = bytes.len()))]
pub fn import_snapshot(bytes: &[u8]) -> Result<Snapshot, ImportError> {
    let mut root: Value = serde_json::from_slice(bytes).map_err(ImportError::Json)?;

    let tasks = take_records(&mut root, CollectionKind::Tasks)?;
    let groups = take_records(&mut root, CollectionKind::Groups)?;

    let snapshot = Snapshot { tasks, groups };
    snapshot.validate()?;
    debug!(
        tasks = snapshot.tasks.len(),
        groups = snapshot.groups.len(),
        "parsed backup"
    );
    Ok(snapshot)
}

fn take_records<T: DeserializeOwned>(
    root: &mut Value,
    kind: CollectionKind,
) -> Result<Vec<T>, ImportError> {
    let field = kind.bundle_field();
    let Some(Value::Array(items)) = root.get_mut(field).map(Value::take) else {
        return Err(ImportError::MissingArray(field));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value(item).map_err(|source| ImportError::BadRecord {
                kind: field,
                index,
                source,
            })
        })
        .collect()
}

/// Default backup name, e.g. `docket-backup-2024-06-01.json`.
pub fn default_export_file_name(date: NaiveDate) -> String {
    format!("docket-backup-{}.json", date.format("%Y-%m-%d"))
}

#[tracing::instrument(skip(bundle))]
pub fn write_bundle(path: &Path, bundle: &ExportBundle) -> anyhow::Result<()> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut temp, bundle)?;
    writeln!(temp)?;
    temp.flush()?;
    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
    info!(file = %path.display(), tasks = bundle.tasks.len(), groups = bundle.groups.len(), "wrote backup");
    Ok(())
}

#[tracing::instrument]
pub fn read_bundle_file(path: &Path) -> anyhow::Result<Snapshot> {
    let bytes =
        fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    import_snapshot(&bytes).with_context(|| format!("cannot import {}", path.display()))
}

fn load_json_array<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    debug!(file = %path.display(), "loading collection");
    let raw = fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let items: Vec<T> = serde_json::from_str(&raw)
        .with_context(|| format!("failed parsing {}", path.display()))?;
    debug!(count = items.len(), "loaded collection");
    Ok(items)
}

fn load_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed parsing {}", path.display()))
}

fn save_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    debug!(file = %path.display(), "saving atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&mut temp, value)?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{default_export_file_name, import_snapshot};
    use crate::error::ImportError;

    #[test]
    fn rejects_missing_or_non_array_fields() {
        let cases: [&[u8]; 4] = [
            br#"{"groups": []}"#,
            br#"{"tasks": [], "groups": {}}"#,
            br#"{"tasks": null, "groups": []}"#,
            br#"[]"#,
        ];
        for raw in cases {
            let err = import_snapshot(raw).expect_err("malformed");
            assert!(matches!(err, ImportError::MissingArray(_)), "{err}");
        }

        assert!(matches!(
            import_snapshot(b"not json"),
            Err(ImportError::Json(_))
        ));
    }

    #[test]
    fn rejects_bad_records() {
        let raw = br#"{"tasks": [{"title": "no id"}], "groups": []}"#;
        let err = import_snapshot(raw).expect_err("bad record");
        assert!(
            matches!(err, ImportError::BadRecord { kind: "tasks", index: 0, .. }),
            "{err}"
        );
    }

    #[test]
    fn rejects_dangling_group_reference() {
        let raw = br#"{
            "tasks": [{
                "id": "00000000-0000-0000-0000-000000000009",
                "title": "orphan",
                "groupId": "00000000-0000-0000-0000-000000000001",
                "createdAt": "2024-06-01T00:00:00Z"
            }],
            "groups": []
        }"#;
        assert!(matches!(
            import_snapshot(raw),
            Err(ImportError::Inconsistent(_))
        ));
    }

    #[test]
    fn accepts_legacy_backup_shape() {
        let raw = br#"{
            "tasks": [{
                "id": "00000000-0000-0000-0000-000000000009",
                "title": "Watch talk",
                "link": "https://youtu.be/abc123",
                "priority": "GAP",
                "groupId": "00000000-0000-0000-0000-000000000001",
                "createdAt": "2024-06-01T00:00:00.000Z",
                "deadline": "2024-06-03",
                "completed": true,
                "completedAt": "2024-06-02T08:00:00.000Z"
            }],
            "groups": [{
                "id": "00000000-0000-0000-0000-000000000001",
                "name": "Videos",
                "createdAt": "2024-05-30T00:00:00.000Z"
            }],
            "exportedAt": "2024-06-02T09:00:00.000Z",
            "version": "1.0"
        }"#;
        let snapshot = import_snapshot(raw).expect("legacy backup");
        assert_eq!(snapshot.tasks.len(), 1);
        assert_eq!(snapshot.groups[0].name, "Videos");
    }

    #[test]
    fn export_file_name_uses_date() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 6, 1).expect("valid date");
        assert_eq!(
            default_export_file_name(date),
            "docket-backup-2024-06-01.json"
        );
    }
}
