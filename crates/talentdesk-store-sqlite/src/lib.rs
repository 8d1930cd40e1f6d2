#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use talentdesk_core::{
    derive_fields, domains, format_timestamp, now_utc, parse_timestamp, DomainSchema, Record,
    RecordId, RecordStore, StoreError,
};
use time::OffsetDateTime;
use ulid::Ulid;

const MIGRATION_VERSION: i64 = 1;

const SCHEMA_RECORDS_V1: &str = r"
CREATE TABLE IF NOT EXISTS domain_schemas (
  resource TEXT PRIMARY KEY,
  schema_json TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS records (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  record_id TEXT NOT NULL UNIQUE,
  resource TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  fields_json TEXT NOT NULL DEFAULT '{}',
  FOREIGN KEY (resource) REFERENCES domain_schemas(resource)
);

CREATE INDEX IF NOT EXISTS idx_records_resource_seq
  ON records(resource, seq);
";

/// SQLite-backed record store. One database holds every resource; `seq`
/// keeps the insertion order that `list()` must preserve.
pub struct SqliteRecordStore {
    conn: Connection,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct SeedReport {
    pub seeded: BTreeMap<String, usize>,
    pub skipped: Vec<String>,
}

impl SqliteRecordStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Applies the record schema and registers the built-in domain schemas.
    /// Idempotent; existing (possibly customized) schema rows are kept.
    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_RECORDS_V1)
            .context("failed to apply records schema")?;

        let now = stamp_anyhow(now_utc())?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![MIGRATION_VERSION, now],
            )
            .context("failed to register records schema migration")?;

        for schema in domains::builtin_schemas() {
            self.register_schema_if_absent(&schema)?;
        }

        Ok(())
    }

    fn register_schema_if_absent(&self, schema: &DomainSchema) -> Result<()> {
        let payload = serde_json::to_string(schema).context("failed to serialize schema")?;
        let now = stamp_anyhow(now_utc())?;
        self.conn
            .execute(
                "INSERT INTO domain_schemas(resource, schema_json, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(resource) DO NOTHING",
                params![schema.resource, payload, now],
            )
            .with_context(|| format!("failed to register schema for {}", schema.resource))?;
        Ok(())
    }

    /// Registers or replaces a domain schema.
    pub fn upsert_schema(&self, schema: &DomainSchema) -> Result<()> {
        schema
            .validate()
            .map_err(|err| anyhow!("invalid domain schema: {err}"))?;

        let payload = serde_json::to_string(schema).context("failed to serialize schema")?;
        let now = stamp_anyhow(now_utc())?;

        self.conn
            .execute(
                "INSERT INTO domain_schemas(resource, schema_json, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(resource) DO UPDATE SET
                   schema_json = excluded.schema_json,
                   created_at = excluded.created_at",
                params![schema.resource, payload, now],
            )
            .context("failed to upsert schema")?;

        Ok(())
    }

    pub fn get_schemas(&self) -> Result<BTreeMap<String, DomainSchema>> {
        let mut stmt = self
            .conn
            .prepare("SELECT resource, schema_json FROM domain_schemas ORDER BY resource ASC")?;

        let mut rows = stmt.query([])?;
        let mut map = BTreeMap::new();

        while let Some(row) = rows.next()? {
            let resource: String = row.get(0)?;
            let json: String = row.get(1)?;
            let value: Value = serde_json::from_str(&json).context("invalid stored schema JSON")?;
            let schema = DomainSchema::from_json(&value)
                .map_err(|err| anyhow!("failed to parse schema for {resource}: {err}"))?;
            let _ = map.insert(resource, schema);
        }

        Ok(map)
    }

    pub fn get_schema(&self, resource: &str) -> Result<Option<DomainSchema>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT schema_json FROM domain_schemas WHERE resource = ?1",
                params![resource],
                |row| row.get(0),
            )
            .optional()?;

        let Some(json) = json else {
            return Ok(None);
        };
        let value: Value = serde_json::from_str(&json).context("invalid stored schema JSON")?;
        let schema = DomainSchema::from_json(&value)
            .map_err(|err| anyhow!("failed to parse schema for {resource}: {err}"))?;
        Ok(Some(schema))
    }

    pub fn count_records(&self, resource: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE resource = ?1",
            params![resource],
            |row| row.get(0),
        )?;
        usize::try_from(count).context("negative record count")
    }

    /// Loads built-in fixtures into every empty built-in resource. Resources
    /// that already hold records are left untouched and reported as skipped.
    pub fn seed_fixtures(&self) -> Result<SeedReport> {
        let mut seeded = BTreeMap::new();
        let mut skipped = Vec::new();

        for schema in domains::builtin_schemas() {
            if self.count_records(&schema.resource)? > 0 {
                skipped.push(schema.resource.clone());
                continue;
            }

            let fixtures = domains::fixture_records(&schema.resource);
            let mut inserted = 0_usize;
            for mut fields in fixtures {
                derive_fields(&schema, &mut fields);
                let _ = self
                    .create_row(&schema.resource, fields)
                    .map_err(|err| anyhow!("failed seeding {}: {err}", schema.resource))?;
                inserted += 1;
            }
            let _ = seeded.insert(schema.resource.clone(), inserted);
        }

        Ok(SeedReport { seeded, skipped })
    }

    /// A view of one resource implementing the [`RecordStore`] trait.
    #[must_use]
    pub fn scoped(&self, resource: &str) -> ScopedStore<'_> {
        ScopedStore {
            store: self,
            resource: resource.to_string(),
        }
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn list_rows(&self, resource: &str) -> Result<Vec<Record>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT record_id, created_at, updated_at, fields_json
                 FROM records WHERE resource = ?1 ORDER BY seq ASC",
            )
            .map_err(backend)?;

        let mut rows = stmt.query(params![resource]).map_err(backend)?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().map_err(backend)? {
            records.push(parse_record_row(row)?);
        }
        Ok(records)
    }

    fn get_row(&self, resource: &str, id: RecordId) -> Result<Record, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT record_id, created_at, updated_at, fields_json
                 FROM records WHERE resource = ?1 AND record_id = ?2",
            )
            .map_err(backend)?;

        let mut rows = stmt
            .query(params![resource, id.to_string()])
            .map_err(backend)?;
        match rows.next().map_err(backend)? {
            Some(row) => parse_record_row(row),
            None => Err(StoreError::NotFound(id)),
        }
    }

    fn create_row(&self, resource: &str, fields: Map<String, Value>) -> Result<Record, StoreError> {
        let record = Record {
            id: RecordId(Ulid::new()),
            created_at: now_utc(),
            updated_at: now_utc(),
            fields,
        };

        let _ = self
            .conn
            .execute(
                "INSERT INTO records(record_id, resource, created_at, updated_at, fields_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id.to_string(),
                    resource,
                    stamp(record.created_at)?,
                    stamp(record.updated_at)?,
                    serde_json::to_string(&record.fields).map_err(backend)?,
                ],
            )
            .map_err(backend)?;

        Ok(record)
    }

    fn update_row(
        &self,
        resource: &str,
        id: RecordId,
        partial: &Map<String, Value>,
    ) -> Result<Record, StoreError> {
        let mut record = self.get_row(resource, id)?;
        for (name, value) in partial {
            let _ = record.fields.insert(name.clone(), value.clone());
        }
        record.updated_at = now_utc();

        let changed = self
            .conn
            .execute(
                "UPDATE records SET fields_json = ?1, updated_at = ?2
                 WHERE resource = ?3 AND record_id = ?4",
                params![
                    serde_json::to_string(&record.fields).map_err(backend)?,
                    stamp(record.updated_at)?,
                    resource,
                    id.to_string(),
                ],
            )
            .map_err(backend)?;

        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(record)
    }

    fn delete_row(&self, resource: &str, id: RecordId) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute(
                "DELETE FROM records WHERE resource = ?1 AND record_id = ?2",
                params![resource, id.to_string()],
            )
            .map_err(backend)?;

        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }
}

/// One resource's view of the shared database.
pub struct ScopedStore<'a> {
    store: &'a SqliteRecordStore,
    resource: String,
}

impl RecordStore for ScopedStore<'_> {
    fn list(&self) -> Result<Vec<Record>, StoreError> {
        self.store.list_rows(&self.resource)
    }

    fn get(&self, id: RecordId) -> Result<Record, StoreError> {
        self.store.get_row(&self.resource, id)
    }

    fn create(&mut self, fields: Map<String, Value>) -> Result<Record, StoreError> {
        self.store.create_row(&self.resource, fields)
    }

    fn update(&mut self, id: RecordId, partial: &Map<String, Value>) -> Result<Record, StoreError> {
        self.store.update_row(&self.resource, id, partial)
    }

    fn delete(&mut self, id: RecordId) -> Result<(), StoreError> {
        self.store.delete_row(&self.resource, id)
    }
}

fn backend<E: std::fmt::Display>(err: E) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn stamp(value: OffsetDateTime) -> Result<String, StoreError> {
    format_timestamp(value).map_err(backend)
}

fn stamp_anyhow(value: OffsetDateTime) -> Result<String> {
    format_timestamp(value).map_err(|err| anyhow!(err.to_string()))
}

fn parse_record_row(row: &rusqlite::Row<'_>) -> Result<Record, StoreError> {
    let raw_id: String = row.get(0).map_err(backend)?;
    let created_at: String = row.get(1).map_err(backend)?;
    let updated_at: String = row.get(2).map_err(backend)?;
    let fields_json: String = row.get(3).map_err(backend)?;

    let id = Ulid::from_string(&raw_id)
        .map_err(|err| StoreError::Backend(format!("invalid stored record id '{raw_id}': {err}")))?;
    let fields: Value = serde_json::from_str(&fields_json)
        .map_err(|err| StoreError::Backend(format!("invalid stored fields JSON: {err}")))?;
    let Value::Object(fields) = fields else {
        return Err(StoreError::Backend(
            "invalid stored fields JSON: not an object".to_string(),
        ));
    };

    Ok(Record {
        id: RecordId(id),
        created_at: parse_timestamp(&created_at).map_err(backend)?,
        updated_at: parse_timestamp(&updated_at).map_err(backend)?,
        fields,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::manual_let_else)]

    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use talentdesk_core::{FieldSpec, MemoryStore};

    fn must<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    fn fixture_store() -> SqliteRecordStore {
        let store = must(SqliteRecordStore::open(Path::new(":memory:")));
        must(store.migrate());
        store
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("fixture must be a JSON object, got {other}"),
        }
    }

    fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn ensure_table_has_columns(conn: &Connection, table: &str, columns: &[&str]) -> Result<()> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for column in columns {
            if !names.iter().any(|name| name == column) {
                return Err(anyhow!("missing column {column} in {table}"));
            }
        }
        Ok(())
    }

    #[test]
    fn migrate_is_idempotent() {
        let store = fixture_store();
        must(store.migrate());
        must(store.migrate());
    }

    #[test]
    fn migrate_registers_builtin_schemas() {
        let store = fixture_store();
        let schemas = must(store.get_schemas());
        assert_eq!(schemas.len(), 8);
        assert!(schemas.contains_key("leave_requests"));
        assert!(must(store.get_schema("documents")).is_some());
        assert!(must(store.get_schema("payroll")).is_none());
    }

    #[test]
    fn migrate_keeps_customized_schemas() {
        let store = fixture_store();
        let mut customized = match must(store.get_schema("skills")) {
            Some(schema) => schema,
            None => panic!("missing builtin skills schema"),
        };
        customized.fields.push(FieldSpec::text("notes"));
        must(store.upsert_schema(&customized));

        must(store.migrate());
        let reread = match must(store.get_schema("skills")) {
            Some(schema) => schema,
            None => panic!("missing skills schema after re-migrate"),
        };
        assert!(reread.field("notes").is_some());
    }

    #[test]
    fn scoped_store_round_trip() {
        let store = fixture_store();
        let mut scoped = store.scoped("leave_requests");

        let created = must(scoped.create(object(json!({"employee": "John", "days": 4}))));
        let fetched = must(scoped.get(created.id));
        assert_eq!(fetched.fields, created.fields);
        assert_eq!(fetched.created_at, created.created_at);

        let updated = must(scoped.update(created.id, &object(json!({"days": 6}))));
        assert_eq!(updated.fields["employee"], json!("John"));
        assert_eq!(updated.fields["days"], json!(6));

        must(scoped.delete(created.id));
        let err = match scoped.get(created.id) {
            Ok(_) => panic!("expected NotFound after delete"),
            Err(err) => err,
        };
        assert_eq!(err, StoreError::NotFound(created.id));

        let err = match scoped.delete(created.id) {
            Ok(()) => panic!("expected second delete to fail"),
            Err(err) => err,
        };
        assert_eq!(err, StoreError::NotFound(created.id));
    }

    #[test]
    fn list_preserves_insertion_order_per_resource() {
        let store = fixture_store();
        let mut leave = store.scoped("leave_requests");
        for index in 0..4 {
            let _ = must(leave.create(object(json!({"employee": "x", "n": index}))));
        }
        let mut docs = store.scoped("documents");
        let _ = must(docs.create(object(json!({"title": "elsewhere"}))));

        let listed = must(store.scoped("leave_requests").list());
        let order: Vec<i64> = listed
            .iter()
            .filter_map(|record| record.fields["n"].as_i64())
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert_eq!(must(store.scoped("documents").list()).len(), 1);
    }

    #[test]
    fn create_for_unregistered_resource_fails() {
        let store = fixture_store();
        let mut scoped = store.scoped("payroll");
        assert!(scoped.create(object(json!({"x": 1}))).is_err());
    }

    #[test]
    fn seed_fixtures_populates_once() {
        let store = fixture_store();
        let first = must(store.seed_fixtures());
        assert!(first.skipped.is_empty());
        assert_eq!(first.seeded["leave_requests"], 5);
        assert!(must(store.count_records("documents")) > 0);

        let second = must(store.seed_fixtures());
        assert!(second.seeded.is_empty());
        assert_eq!(second.skipped.len(), 8);
    }

    #[test]
    fn seeded_records_carry_derived_fields() {
        let store = fixture_store();
        let _ = must(store.seed_fixtures());
        let enrollments = must(store.scoped("enrollments").list());
        assert!(!enrollments.is_empty());
        for record in &enrollments {
            assert!(
                record.fields.get("completion_rate").is_some(),
                "seeded enrollment missing completion_rate"
            );
        }
    }

    #[test]
    fn invalid_stored_fields_json_is_reported_clearly() {
        let store = fixture_store();
        let inserted = store.connection().execute(
            "INSERT INTO records(record_id, resource, created_at, updated_at, fields_json)
             VALUES (?1, 'leave_requests', '2026-08-01T00:00:00Z', '2026-08-01T00:00:00Z', '{')",
            params![Ulid::new().to_string()],
        );
        if let Err(err) = inserted {
            panic!("failed to insert corrupt fixture: {err}");
        }

        let err = match store.scoped("leave_requests").list() {
            Ok(_) => panic!("expected list failure on corrupt fields JSON"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("invalid stored fields JSON"));
    }

    #[test]
    fn schema_contract_contains_expected_tables_and_columns() {
        let store = fixture_store();
        assert!(must(table_exists(store.connection(), "records")));
        assert!(must(table_exists(store.connection(), "domain_schemas")));
        assert!(must(table_exists(store.connection(), "schema_migrations")));

        must(ensure_table_has_columns(
            store.connection(),
            "records",
            &[
                "seq",
                "record_id",
                "resource",
                "created_at",
                "updated_at",
                "fields_json",
            ],
        ));
        must(ensure_table_has_columns(
            store.connection(),
            "domain_schemas",
            &["resource", "schema_json", "created_at"],
        ));
    }

    #[test]
    fn custom_schema_enables_new_resource() {
        let store = fixture_store();
        let schema = must(DomainSchema::from_json(&json!({
            "resource": "trainers",
            "fields": [
                {"name": "name", "kind": "text", "required": true, "searchable": true},
                {"name": "active", "kind": "bool"}
            ]
        })));
        must(store.upsert_schema(&schema));

        let mut scoped = store.scoped("trainers");
        let created = must(scoped.create(object(json!({"name": "Ada", "active": true}))));
        assert_eq!(must(scoped.get(created.id)).fields["name"], json!("Ada"));
    }

    fn apply_op<S: RecordStore>(store: &mut S, code: u8, counter: usize) {
        let records = must(store.list());
        if code % 4 == 3 && !records.is_empty() {
            let target = records[usize::from(code) % records.len()].id;
            must(store.delete(target));
        } else {
            let _ = must(store.create(object(json!({"n": counter}))));
        }
    }

    fn field_sequence<S: RecordStore>(store: &S) -> Vec<i64> {
        must(store.list())
            .iter()
            .filter_map(|record| record.fields["n"].as_i64())
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_sqlite_store_matches_memory_store(codes in prop::collection::vec(any::<u8>(), 1..60)) {
            let sqlite = fixture_store();
            let mut scoped = sqlite.scoped("leave_requests");
            let mut memory = MemoryStore::new();

            for (counter, code) in codes.iter().copied().enumerate() {
                apply_op(&mut scoped, code, counter);
                apply_op(&mut memory, code, counter);
            }

            prop_assert_eq!(field_sequence(&scoped), field_sequence(&memory));
        }
    }
}
