// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Deterministic SQL generation from model descriptors. Conflict and update
//! column lists are sorted so generated statements are stable and cacheable
//! per `(model, schema version)`.

use crate::model::{ModelSpec, Value};

/// Generates the two fragments of an upsert clause: the conflict target
/// (sorted primary-key columns) and the update list (sorted non-key
/// columns). Ignored and version-excluded fields appear in neither.
pub fn generate_upsert_strings(spec: &ModelSpec, major: u64) -> (String, String) {
    let mut pks: Vec<&str> = spec
        .fields
        .iter()
        .filter(|f| f.included_at(major) && f.is_pk())
        .map(|f| f.column)
        .collect();
    pks.sort_unstable();

    let mut cols: Vec<&str> = spec
        .fields
        .iter()
        .filter(|f| f.included_at(major) && !f.is_pk())
        .map(|f| f.column)
        .collect();
    cols.sort_unstable();

    let conflict = format!("({}) DO UPDATE", pks.join(", "));
    let update = cols
        .iter()
        .map(|c| format!("\"{}\" = EXCLUDED.{}", c, c))
        .collect::<Vec<_>>()
        .join(", ");

    (conflict, update)
}

/// Placeholder with the cast some value kinds need for parameter-type
/// inference.
fn placeholder(index: usize, value: &Value) -> String {
    match value {
        Value::Numeric(_) => format!("${}::numeric", index),
        _ => format!("${}", index),
    }
}

/// Builds the full INSERT (or upsert) statement for one row. The returned
/// index list selects which of the row's values to bind, in order, since
/// version gating can elide columns.
pub fn insert_sql(
    schema: &str,
    spec: &ModelSpec,
    major: u64,
    upsert: bool,
    values: &[Value],
) -> (String, Vec<usize>) {
    let mut columns = Vec::new();
    let mut placeholders = Vec::new();
    let mut bind_indexes = Vec::new();

    for (i, field) in spec.fields.iter().enumerate() {
        if !field.included_at(major) {
            continue;
        }
        columns.push(format!("\"{}\"", field.column));
        placeholders.push(placeholder(placeholders.len() + 1, &values[i]));
        bind_indexes.push(i);
    }

    let mut sql = format!(
        "INSERT INTO \"{}\".\"{}\" ({}) VALUES ({})",
        schema,
        spec.table,
        columns.join(", "),
        placeholders.join(", "),
    );

    if upsert {
        let (conflict, update) = generate_upsert_strings(spec, major);
        if update.is_empty() {
            // Every persisted column is part of the key.
            let pks = conflict
                .strip_suffix(" DO UPDATE")
                .unwrap_or(&conflict)
                .to_string();
            sql.push_str(&format!(" ON CONFLICT {} DO NOTHING", pks));
        } else {
            sql.push_str(&format!(" ON CONFLICT {} SET {}", conflict, update));
        }
    }

    (sql, bind_indexes)
}
