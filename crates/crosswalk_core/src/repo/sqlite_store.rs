//! SQLite-backed registry store.
//!
//! # Responsibility
//! - Persist the registry tables in normalized form (one mapping row per
//!   canonical row and environment).
//!
//! # Invariants
//! - Connections must be migrated to the latest schema before use.
//! - Saving a table replaces it atomically and keeps row order via
//!   `position`.

use crate::db::migrations::{current_user_version, latest_version};
use crate::model::environment::Environment;
use crate::model::registry::{
    FieldMapping, FieldRecord, FieldTable, FormMapping, FormRecord, FormTable, ProtocolRecord,
    ProtocolTable, RegistryTable,
};
use crate::repo::registry_repo::{RegistryStore, RepoError, RepoResult};
use log::info;
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use std::collections::HashMap;

/// Registry store over a migrated SQLite connection.
pub struct SqliteRegistryStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRegistryStore<'conn> {
    /// Creates a store from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        let expected_version = latest_version();
        let actual_version = current_user_version(conn)?;
        if actual_version != expected_version {
            return Err(RepoError::UninitializedConnection {
                expected_version,
                actual_version,
            });
        }
        Ok(Self { conn })
    }

    fn begin(&self) -> RepoResult<Transaction<'conn>> {
        Ok(Transaction::new_unchecked(
            self.conn,
            TransactionBehavior::Immediate,
        )?)
    }
}

impl RegistryStore for SqliteRegistryStore<'_> {
    fn load_protocols(&self) -> RepoResult<ProtocolTable> {
        let mut stmt = self
            .conn
            .prepare("SELECT short_title, title FROM protocols ORDER BY position ASC;")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ProtocolRecord::new(
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut table = RegistryTable::from_records(rows);

        let mut stmt = self
            .conn
            .prepare("SELECT short_title, environment, local_id FROM protocol_mappings;")?;
        let mut mappings = stmt.query([])?;
        while let Some(row) = mappings.next()? {
            let short_title: String = row.get(0)?;
            let env = parse_environment(&row.get::<_, String>(1)?)?;
            if let Some(record) = table.get_mut(&short_title) {
                record.local_ids.insert(env, row.get(2)?);
            }
        }
        Ok(table)
    }

    fn save_protocols(&self, table: &ProtocolTable) -> RepoResult<()> {
        let tx = self.begin()?;
        tx.execute("DELETE FROM protocol_mappings;", [])?;
        tx.execute("DELETE FROM protocols;", [])?;
        for (position, record) in table.iter().enumerate() {
            tx.execute(
                "INSERT INTO protocols (position, short_title, title) VALUES (?1, ?2, ?3);",
                params![position as i64, record.short_title, record.title],
            )?;
            for (env, local_id) in &record.local_ids {
                tx.execute(
                    "INSERT INTO protocol_mappings (short_title, environment, local_id)
                     VALUES (?1, ?2, ?3);",
                    params![record.short_title, env.as_str(), local_id],
                )?;
            }
        }
        tx.commit()?;
        log_saved("protocols", table.len());
        Ok(())
    }

    fn load_forms(&self) -> RepoResult<FormTable> {
        let mut stmt = self
            .conn
            .prepare("SELECT caption FROM forms ORDER BY position ASC;")?;
        let rows = stmt
            .query_map([], |row| Ok(FormRecord::new(row.get::<_, String>(0)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut table = RegistryTable::from_records(rows);

        let mut stmt = self.conn.prepare(
            "SELECT caption, environment, local_id, short_name, last_modified FROM form_mappings;",
        )?;
        let mut mappings = stmt.query([])?;
        while let Some(row) = mappings.next()? {
            let caption: String = row.get(0)?;
            let env = parse_environment(&row.get::<_, String>(1)?)?;
            if let Some(record) = table.get_mut(&caption) {
                record.mappings.insert(
                    env,
                    FormMapping {
                        local_id: row.get(2)?,
                        short_name: row.get(3)?,
                        last_modified: row.get(4)?,
                    },
                );
            }
        }
        Ok(table)
    }

    fn save_forms(&self, table: &FormTable) -> RepoResult<()> {
        let tx = self.begin()?;
        tx.execute("DELETE FROM form_mappings;", [])?;
        tx.execute("DELETE FROM forms;", [])?;
        for (position, record) in table.iter().enumerate() {
            tx.execute(
                "INSERT INTO forms (position, caption) VALUES (?1, ?2);",
                params![position as i64, record.caption],
            )?;
            for (env, mapping) in &record.mappings {
                tx.execute(
                    "INSERT INTO form_mappings (caption, environment, local_id, short_name, last_modified)
                     VALUES (?1, ?2, ?3, ?4, ?5);",
                    params![
                        record.caption,
                        env.as_str(),
                        mapping.local_id,
                        mapping.short_name.as_deref(),
                        mapping.last_modified,
                    ],
                )?;
            }
        }
        tx.commit()?;
        log_saved("forms", table.len());
        Ok(())
    }

    fn load_fields(&self) -> RepoResult<FieldTable> {
        let mut stmt = self.conn.prepare(
            "SELECT position, form_name, is_sub_form, field_name, is_sub_field, parent_subform
             FROM fields
             ORDER BY position ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        let mut slots = HashMap::new();
        while let Some(row) = rows.next()? {
            let position: i64 = row.get(0)?;
            let parent_subform: String = row.get(5)?;
            slots.insert(position, records.len());
            records.push(FieldRecord {
                form_name: row.get(1)?,
                is_sub_form: row.get::<_, i64>(2)? == 1,
                field_name: row.get(3)?,
                is_sub_field: row.get::<_, i64>(4)? == 1,
                parent_subform: (!parent_subform.is_empty()).then_some(parent_subform),
                mappings: Default::default(),
            });
        }

        let mut stmt = self.conn.prepare(
            "SELECT field_position, environment, local_code, udn, subform_udn, subform_name
             FROM field_mappings;",
        )?;
        let mut mappings = stmt.query([])?;
        while let Some(row) = mappings.next()? {
            let position: i64 = row.get(0)?;
            let Some(slot) = slots.get(&position) else {
                continue;
            };
            let env = parse_environment(&row.get::<_, String>(1)?)?;
            records[*slot].mappings.insert(
                env,
                FieldMapping {
                    local_code: row.get(2)?,
                    udn: row.get(3)?,
                    subform_udn: row.get(4)?,
                    subform_name: row.get(5)?,
                },
            );
        }
        Ok(RegistryTable::from_records(records))
    }

    fn save_fields(&self, table: &FieldTable) -> RepoResult<()> {
        let tx = self.begin()?;
        tx.execute("DELETE FROM field_mappings;", [])?;
        tx.execute("DELETE FROM fields;", [])?;
        for (position, record) in table.iter().enumerate() {
            let position = position as i64;
            tx.execute(
                "INSERT INTO fields (position, form_name, is_sub_form, field_name, is_sub_field, parent_subform)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
                params![
                    position,
                    record.form_name,
                    i64::from(record.is_sub_form),
                    record.field_name,
                    i64::from(record.is_sub_field),
                    record.parent_subform.as_deref().unwrap_or(""),
                ],
            )?;
            for (env, mapping) in &record.mappings {
                tx.execute(
                    "INSERT INTO field_mappings (field_position, environment, local_code, udn, subform_udn, subform_name)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
                    params![
                        position,
                        env.as_str(),
                        mapping.local_code,
                        mapping.udn.as_deref(),
                        mapping.subform_udn.as_deref(),
                        mapping.subform_name.as_deref(),
                    ],
                )?;
            }
        }
        tx.commit()?;
        log_saved("fields", table.len());
        Ok(())
    }
}

fn parse_environment(value: &str) -> RepoResult<Environment> {
    Environment::parse(value)
        .map_err(|err| RepoError::InvalidData(format!("invalid environment `{value}`: {err}")))
}

fn log_saved(table: &'static str, rows: usize) {
    info!(
        "event=registry_save module=repo status=ok store=sqlite table={} rows={}",
        table, rows
    );
}
