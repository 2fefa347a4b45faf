//! Read-only dataset injected as `sample`.

use mlua::{Lua, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRecord {
    pub first_name: &'static str,
    pub last_name: &'static str,
    pub age: i64,
}

pub const SAMPLE_RECORDS: [SampleRecord; 2] = [
    SampleRecord {
        first_name: "Ada",
        last_name: "Lovelace",
        age: 36,
    },
    SampleRecord {
        first_name: "Alan",
        last_name: "Turing",
        age: 41,
    },
];

pub const CSV_HEADER: &str = "firstName,lastName,age";

/// The text a correct transform must produce, already normalized.
#[must_use]
pub fn expected_csv() -> String {
    let mut lines = vec![CSV_HEADER.to_string()];
    lines.extend(
        SAMPLE_RECORDS
            .iter()
            .map(|r| format!("{},{},{}", r.first_name, r.last_name, r.age)),
    );
    lines.join("\n")
}

/// Builds the plain (still writable) Lua array of records.
pub(crate) fn build_table(lua: &Lua) -> mlua::Result<Table> {
    let rows = lua.create_table()?;
    for (index, record) in SAMPLE_RECORDS.iter().enumerate() {
        let row = lua.create_table()?;
        row.raw_set("firstName", record.first_name)?;
        row.raw_set("lastName", record.last_name)?;
        row.raw_set("age", record.age)?;
        rows.raw_set(index + 1, row)?;
    }
    Ok(rows)
}
