use chrono::{DateTime, NaiveTime};
use duckdb::types::ValueRef;
use duckdb::Connection;
use serde_json::{Number, Value};
use std::collections::HashSet;

use super::{ColumnSchema, Row};

/// Converts a DuckDB cell into JSON. NULL stays null; numbers and booleans keep
/// their JSON type; anything without a lossless JSON form is rendered as text.
///
/// Temporal values use ISO-8601 (`2023-11-26`, `2023-11-26T13:00:00`,
/// `13:05:00`, `P1M2DT10800S`) and blobs are `0x`-prefixed lowercase hex.
/// Nested types (lists, structs, maps) fall back to their debug rendering.
pub fn value_ref_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(v) => Value::from(v),
        ValueRef::SmallInt(v) => Value::from(v),
        ValueRef::Int(v) => Value::from(v),
        ValueRef::BigInt(v) => Value::from(v),
        ValueRef::UTinyInt(v) => Value::from(v),
        ValueRef::USmallInt(v) => Value::from(v),
        ValueRef::UInt(v) => Value::from(v),
        ValueRef::UBigInt(v) => Value::from(v),
        ValueRef::HugeInt(v) => Value::String(v.to_string()),
        ValueRef::Float(v) => float_to_json(f64::from(v)),
        ValueRef::Double(v) => float_to_json(v),
        ValueRef::Decimal(d) => Value::String(d.to_string()),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(blob_to_hex(bytes)),
        ValueRef::Date32(days) => DateTime::from_timestamp(i64::from(days) * 86_400, 0)
            .map(|dt| Value::String(dt.date_naive().format("%Y-%m-%d").to_string()))
            .unwrap_or_else(|| Value::from(days)),
        ValueRef::Timestamp(unit, v) => DateTime::from_timestamp_micros(unit.to_micros(v))
            .map(|dt| Value::String(dt.naive_utc().format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
            .unwrap_or_else(|| Value::from(v)),
        ValueRef::Time64(unit, v) => time_of_day(unit.to_micros(v))
            .map(|t| Value::String(t.format("%H:%M:%S%.f").to_string()))
            .unwrap_or_else(|| Value::from(v)),
        ValueRef::Interval { months, days, nanos } => Value::String(iso_duration(months, days, nanos)),
        other => Value::String(format!("{:?}", other)),
    }
}

fn blob_to_hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(2 + bytes.len() * 2);
    hex.push_str("0x");
    for byte in bytes {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

fn time_of_day(micros: i64) -> Option<NaiveTime> {
    let secs = u32::try_from(micros.div_euclid(1_000_000)).ok()?;
    let nanos = u32::try_from(micros.rem_euclid(1_000_000) * 1_000).ok()?;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
}

/// ISO-8601 duration with only the non-zero parts, `PT0S` when empty
fn iso_duration(months: i32, days: i32, nanos: i64) -> String {
    let mut out = String::from("P");
    if months != 0 {
        out.push_str(&format!("{}M", months));
    }
    if days != 0 {
        out.push_str(&format!("{}D", days));
    }
    if nanos != 0 || out.len() == 1 {
        let sign = if nanos < 0 { "-" } else { "" };
        let secs = (nanos / 1_000_000_000).unsigned_abs();
        let fraction = (nanos % 1_000_000_000).unsigned_abs();
        out.push_str(&format!("T{}{}", sign, secs));
        if fraction != 0 {
            let digits = format!("{:09}", fraction);
            out.push('.');
            out.push_str(digits.trim_end_matches('0'));
        }
        out.push('S');
    }
    out
}

/// Result column keys, with repeated names suffixed `_2`, `_3`, ... so no
/// cell is overwritten when rows become maps.
pub fn unique_column_names(names: &[String]) -> Vec<String> {
    let mut taken: HashSet<String> = names.iter().cloned().collect();
    let mut seen: HashSet<&str> = HashSet::new();

    names
        .iter()
        .map(|name| {
            if seen.insert(name.as_str()) {
                return name.clone();
            }
            let mut n = 2;
            loop {
                let candidate = format!("{}_{}", name, n);
                if taken.insert(candidate.clone()) {
                    return candidate;
                }
                n += 1;
            }
        })
        .collect()
}

fn float_to_json(v: f64) -> Value {
    // NaN and infinities have no JSON representation
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

/// Runs a statement and collects every row as a column-ordered map.
pub fn query_rows(conn: &Connection, sql: &str) -> Result<Vec<Row>, duckdb::Error> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;

    let columns = unique_column_names(
        &rows
            .as_ref()
            .map(|stmt| stmt.column_names())
            .unwrap_or_default(),
    );

    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Row::new();
        for (i, column) in columns.iter().enumerate() {
            record.insert(column.clone(), value_ref_to_json(row.get_ref(i)?));
        }
        result.push(record);
    }

    Ok(result)
}

pub fn query_columns(
    conn: &Connection,
    schema: &str,
    table: &str,
) -> Result<Vec<ColumnSchema>, duckdb::Error> {
    let mut stmt = conn.prepare(
        "SELECT column_name, data_type, is_nullable
         FROM information_schema.columns
         WHERE table_schema = ? AND table_name = ?
         ORDER BY ordinal_position",
    )?;

    let columns = stmt
        .query_map([schema, table], |row| {
            Ok(ColumnSchema {
                name: row.get::<_, String>(0)?,
                data_type: row.get::<_, String>(1)?,
                nullable: row.get::<_, String>(2)? == "YES",
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(columns)
}
