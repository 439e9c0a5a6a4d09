use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashMap;

use super::{RowStream, ShadowRow, Storage};
use crate::config::TableConfig;
use crate::error::{Error, Result};
use crate::hasher::TRIGGER_HASH;
use crate::metadata::{Flag, MetadataEntry, Revision};
use crate::row::{KeyPart, PrimaryKey, Row, Value};

const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS __shadowsync_state (
    key TEXT PRIMARY KEY NOT NULL,
    value INTEGER NOT NULL
) WITHOUT ROWID;

PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
"#;

const REVISION_KEY: &str = "revision";

#[derive(Debug, Clone)]
struct TableSchema {
    key_columns: Vec<String>,
    metadata_table: String,
}

/// Storage over SQLite data tables. Data tables are created by the caller;
/// `prepare_table` adds the `<table><suffix>` metadata companion.
pub struct SqliteStorage {
    conn: Connection,
    in_transaction: bool,
    schemas: HashMap<String, TableSchema>,
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// SQL expression producing `PrimaryKey::encode` for the row aliased by `prefix`.
fn key_expr(prefix: &str, key_columns: &[String]) -> String {
    key_columns
        .iter()
        .map(|col| {
            let c = format!("{}{}", prefix, quote(col));
            format!("(CASE typeof({c}) WHEN 'integer' THEN 'i:' ELSE 's:' END || {c})")
        })
        .collect::<Vec<_>>()
        .join(" || char(31) || ")
}

fn key_where(key_columns: &[String], first_param: usize) -> String {
    key_columns
        .iter()
        .enumerate()
        .map(|(i, col)| format!("{} = ?{}", quote(col), first_param + i))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn key_params(pk: &PrimaryKey) -> Vec<SqlValue> {
    pk.parts()
        .iter()
        .map(|part| match part {
            KeyPart::Int(i) => SqlValue::Integer(*i),
            KeyPart::Text(s) => SqlValue::Text(s.clone()),
        })
        .collect()
}

fn sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Real(r) => SqlValue::Real(*r),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Blob(b) => SqlValue::Blob(b.clone()),
    }
}

fn engine_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(r) => Value::Real(r),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

type RawEntry = (String, Revision, Option<String>, String);

fn raw_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode_entry(table: &str, raw: RawEntry) -> Result<MetadataEntry> {
    let (pk, revision, hash, flag) = raw;
    Ok(MetadataEntry {
        table: table.to_string(),
        primary_key: PrimaryKey::decode(&pk)?,
        revision,
        hash,
        flag: Flag::from_code(&flag)?,
    })
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        conn.execute_batch(INIT_SQL)?;
        Ok(Self { conn, in_transaction: false, schemas: HashMap::new() })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    /// Direct access for creating data tables and making application edits.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn schema(&self, table: &str) -> Result<&TableSchema> {
        self.schemas
            .get(table)
            .ok_or_else(|| Error::InvalidState(format!("table {} was not prepared", table)))
    }

    /// Installs triggers that stamp the metadata table on every data write,
    /// for use with `HashMode::Trigger`.
    pub fn install_change_triggers(&mut self, table: &str) -> Result<()> {
        let schema = self.schema(table)?.clone();
        let t = quote(table);
        let md = quote(&schema.metadata_table);
        let new_key = key_expr("NEW.", &schema.key_columns);
        let old_key = key_expr("OLD.", &schema.key_columns);
        let trigger = |suffix: &str| quote(&format!("{}_shadowsync_{}", table, suffix));

        let sql = format!(
            r#"
            CREATE TRIGGER IF NOT EXISTS {ins} AFTER INSERT ON {t} BEGIN
                INSERT INTO {md} (pk, revision, hash, flag) VALUES ({new_key}, 0, '{marker}', 'M')
                ON CONFLICT(pk) DO UPDATE SET hash = '{marker}', flag = 'M';
            END;

            CREATE TRIGGER IF NOT EXISTS {upd} AFTER UPDATE ON {t} BEGIN
                UPDATE {md} SET hash = NULL, flag = 'D'
                WHERE pk = {old_key} AND pk <> {new_key};
                INSERT INTO {md} (pk, revision, hash, flag) VALUES ({new_key}, 0, '{marker}', 'M')
                ON CONFLICT(pk) DO UPDATE SET hash = '{marker}', flag = 'M';
            END;

            CREATE TRIGGER IF NOT EXISTS {del} AFTER DELETE ON {t} BEGIN
                INSERT INTO {md} (pk, revision, hash, flag) VALUES ({old_key}, 0, NULL, 'D')
                ON CONFLICT(pk) DO UPDATE SET hash = NULL, flag = 'D';
            END;
            "#,
            ins = trigger("ins"),
            upd = trigger("upd"),
            del = trigger("del"),
            marker = TRIGGER_HASH,
        );
        self.conn.execute_batch(&sql)?;
        Ok(())
    }

    fn read_rows(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let mut stmt = self.conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;

        let mut out = Vec::new();
        while let Some(r) = rows.next()? {
            let mut row = Row::new();
            for (idx, name) in names.iter().enumerate() {
                row.insert(name.clone(), engine_value(r.get_ref(idx)?));
            }
            out.push(row);
        }
        Ok(out)
    }

    fn read_entries(&self, table: &str, sql: &str, params: &[SqlValue]) -> Result<Vec<MetadataEntry>> {
        let mut stmt = self.conn.prepare(sql)?;
        let raw = stmt
            .query_map(params_from_iter(params.iter()), raw_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        raw.into_iter().map(|r| decode_entry(table, r)).collect()
    }

    fn with_rows(&self, table: &str, entries: Vec<MetadataEntry>) -> Result<Vec<ShadowRow>> {
        entries
            .into_iter()
            .map(|entry| Ok((self.get_row(table, &entry.primary_key)?, entry)))
            .collect()
    }
}

impl Storage for SqliteStorage {
    fn prepare_table(&mut self, table: &TableConfig, metadata_suffix: &str) -> Result<()> {
        let metadata_table = format!("{}{}", table.name, metadata_suffix);
        let md = quote(&metadata_table);
        self.conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {md} (
                pk TEXT PRIMARY KEY NOT NULL,
                revision INTEGER NOT NULL,
                hash TEXT,
                flag TEXT NOT NULL
            ) WITHOUT ROWID;

            CREATE INDEX IF NOT EXISTS {idx} ON {md}(revision);
            "#,
            idx = quote(&format!("{}_revision", metadata_table)),
        ))?;
        self.schemas.insert(
            table.name.clone(),
            TableSchema { key_columns: table.primary_key.clone(), metadata_table },
        );
        Ok(())
    }

    // Materialized: the differ writes shadow rows while it walks the scan.
    fn scan_rows(&self, table: &str) -> Result<RowStream> {
        let key_columns = self.schema(table)?.key_columns.clone();
        let rows = self.read_rows(&format!("SELECT * FROM {}", quote(table)), &[])?;
        let keyed = rows
            .into_iter()
            .map(|row| Ok((PrimaryKey::from_row(&row, &key_columns)?, row)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(keyed.into_iter()))
    }

    fn get_row(&self, table: &str, pk: &PrimaryKey) -> Result<Option<Row>> {
        let schema = self.schema(table)?;
        let sql = format!(
            "SELECT * FROM {} WHERE {} LIMIT 1",
            quote(table),
            key_where(&schema.key_columns, 1)
        );
        Ok(self.read_rows(&sql, &key_params(pk))?.into_iter().next())
    }

    fn insert_row(&mut self, table: &str, pk: &PrimaryKey, row: &Row) -> Result<()> {
        let schema = self.schema(table)?;
        let mut row = row.clone();
        for (col, part) in schema.key_columns.iter().zip(pk.parts()) {
            if row.get(col).is_none() {
                row.insert(col.clone(), part.to_value());
            }
        }

        let mut columns: Vec<_> = row.columns().collect();
        columns.sort_by(|a, b| a.0.cmp(b.0));
        let names = columns.iter().map(|(c, _)| quote(c)).collect::<Vec<_>>().join(", ");
        let slots = (1..=columns.len()).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ");
        let values: Vec<SqlValue> = columns.iter().map(|(_, v)| sql_value(v)).collect();

        self.conn.execute(
            &format!("INSERT INTO {} ({}) VALUES ({})", quote(table), names, slots),
            params_from_iter(values.iter()),
        )?;
        Ok(())
    }

    fn update_row(&mut self, table: &str, pk: &PrimaryKey, row: &Row) -> Result<()> {
        let schema = self.schema(table)?;
        let mut columns: Vec<_> = row
            .columns()
            .filter(|(c, _)| !schema.key_columns.iter().any(|k| k == c))
            .collect();
        columns.sort_by(|a, b| a.0.cmp(b.0));

        let affected = if columns.is_empty() {
            let sql = format!(
                "SELECT COUNT(*) FROM {} WHERE {}",
                quote(table),
                key_where(&schema.key_columns, 1)
            );
            self.conn
                .query_row(&sql, params_from_iter(key_params(pk).iter()), |r| r.get::<_, i64>(0))?
                as usize
        } else {
            let sets = columns
                .iter()
                .enumerate()
                .map(|(i, (c, _))| format!("{} = ?{}", quote(c), i + 1))
                .collect::<Vec<_>>()
                .join(", ");
            let mut values: Vec<SqlValue> = columns.iter().map(|(_, v)| sql_value(v)).collect();
            values.extend(key_params(pk));
            let sql = format!(
                "UPDATE {} SET {} WHERE {}",
                quote(table),
                sets,
                key_where(&schema.key_columns, columns.len() + 1)
            );
            self.conn.execute(&sql, params_from_iter(values.iter()))?
        };

        if affected == 0 {
            return Err(Error::InvalidState(format!("no row {} in {} to update", pk, table)));
        }
        Ok(())
    }

    fn delete_row(&mut self, table: &str, pk: &PrimaryKey) -> Result<bool> {
        let schema = self.schema(table)?;
        let sql = format!("DELETE FROM {} WHERE {}", quote(table), key_where(&schema.key_columns, 1));
        let affected = self.conn.execute(&sql, params_from_iter(key_params(pk).iter()))?;
        Ok(affected > 0)
    }

    fn get_metadata(&self, table: &str, pk: &PrimaryKey) -> Result<Option<MetadataEntry>> {
        let md = quote(&self.schema(table)?.metadata_table);
        let raw = self
            .conn
            .query_row(
                &format!("SELECT pk, revision, hash, flag FROM {} WHERE pk = ?1", md),
                params![pk.encode()],
                raw_entry,
            )
            .optional()?;
        raw.map(|r| decode_entry(table, r)).transpose()
    }

    fn insert_metadata(&mut self, entry: &MetadataEntry) -> Result<()> {
        let md = quote(&self.schema(&entry.table)?.metadata_table);
        self.conn.execute(
            &format!("INSERT INTO {} (pk, revision, hash, flag) VALUES (?1, ?2, ?3, ?4)", md),
            params![entry.primary_key.encode(), entry.revision, entry.hash, entry.flag.code()],
        )?;
        Ok(())
    }

    fn update_metadata(&mut self, entry: &MetadataEntry) -> Result<()> {
        let md = quote(&self.schema(&entry.table)?.metadata_table);
        let affected = self.conn.execute(
            &format!("UPDATE {} SET revision = ?2, hash = ?3, flag = ?4 WHERE pk = ?1", md),
            params![entry.primary_key.encode(), entry.revision, entry.hash, entry.flag.code()],
        )?;
        if affected == 0 {
            return Err(Error::InvalidState(format!(
                "no metadata for {} in {} to update",
                entry.primary_key, entry.table
            )));
        }
        Ok(())
    }

    fn update_revision(&mut self, table: &str, pk: &PrimaryKey, revision: Revision) -> Result<usize> {
        let md = quote(&self.schema(table)?.metadata_table);
        let affected = self.conn.execute(
            &format!(
                "UPDATE {} SET revision = ?1, flag = 'P' WHERE pk = ?2 AND revision <= ?1",
                md
            ),
            params![revision, pk.encode()],
        )?;
        Ok(affected)
    }

    fn orphaned_metadata(&self, table: &str) -> Result<Vec<MetadataEntry>> {
        let schema = self.schema(table)?;
        let sql = format!(
            "SELECT m.pk, m.revision, m.hash, m.flag FROM {md} m
             WHERE NOT EXISTS (SELECT 1 FROM {t} d WHERE {key} = m.pk)
             ORDER BY m.pk",
            md = quote(&schema.metadata_table),
            t = quote(table),
            key = key_expr("d.", &schema.key_columns),
        );
        self.read_entries(table, &sql, &[])
    }

    fn pending_changes(&self, table: &str) -> Result<Vec<ShadowRow>> {
        let md = quote(&self.schema(table)?.metadata_table);
        let sql = format!(
            "SELECT pk, revision, hash, flag FROM {} WHERE flag <> 'P' ORDER BY pk",
            md
        );
        let entries = self.read_entries(table, &sql, &[])?;
        self.with_rows(table, entries)
    }

    fn changes_since(&self, table: &str, revision: Revision) -> Result<Vec<ShadowRow>> {
        let md = quote(&self.schema(table)?.metadata_table);
        let sql = format!(
            "SELECT pk, revision, hash, flag FROM {} WHERE revision > ?1 ORDER BY pk",
            md
        );
        let entries = self.read_entries(table, &sql, &[SqlValue::Integer(revision as i64)])?;
        self.with_rows(table, entries)
    }

    fn load_revision(&self) -> Result<Revision> {
        let revision = self
            .conn
            .query_row(
                "SELECT value FROM __shadowsync_state WHERE key = ?1",
                params![REVISION_KEY],
                |row| row.get::<_, Revision>(0),
            )
            .optional()?;
        Ok(revision.unwrap_or(0))
    }

    fn store_revision(&mut self, revision: Revision) -> Result<()> {
        self.conn.execute(
            "INSERT INTO __shadowsync_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![REVISION_KEY, revision],
        )?;
        Ok(())
    }

    fn begin_transaction(&mut self) -> Result<()> {
        if !self.in_transaction {
            self.conn.execute("BEGIN", [])?;
            self.in_transaction = true;
        }
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<()> {
        if self.in_transaction {
            self.conn.execute("COMMIT", [])?;
            self.in_transaction = false;
        }
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Result<()> {
        if self.in_transaction {
            self.conn.execute("ROLLBACK", [])?;
            self.in_transaction = false;
        }
        Ok(())
    }
}
