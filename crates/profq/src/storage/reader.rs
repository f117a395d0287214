use super::schema::{self, SCHEMA_VERSION};
use crate::error::{Error, Result};
use crate::profile::{Func, Lib, Marker, Profile, ProfileMeta, SampleTable, StackEntry, Thread};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

fn meta_f64(conn: &Connection, key: &str) -> Result<Option<f64>> {
    Ok(schema::get_meta(conn, key)?.and_then(|v| v.parse().ok()))
}

/// Read a profile database written by [`super::save_profile`].
pub fn read_profile(path: &Path) -> Result<Profile> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;

    let version: Option<i32> = schema::get_meta(&conn, "version")?.and_then(|v| v.parse().ok());
    if version != Some(SCHEMA_VERSION) {
        return Err(Error::ProfileLoad(format!(
            "{} is not a profile database (schema version {:?}, expected {SCHEMA_VERSION})",
            path.display(),
            version
        )));
    }

    let meta = ProfileMeta {
        product: schema::get_meta(&conn, "product")?.unwrap_or_default(),
        platform: schema::get_meta(&conn, "platform")?,
        start_time: meta_f64(&conn, "start_time")?.unwrap_or(0.0),
        interval: meta_f64(&conn, "interval")?.unwrap_or(1.0),
        version: schema::get_meta(&conn, "profile_version")?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
    };

    let libs = {
        let mut stmt = conn.prepare("SELECT name, path FROM libs ORDER BY id")?;
        stmt.query_map([], |row| {
            Ok(Lib {
                name: row.get(0)?,
                path: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?
    };

    let funcs = {
        let mut stmt = conn.prepare("SELECT name, lib_id, file, line FROM funcs ORDER BY id")?;
        stmt.query_map([], |row| {
            let lib: Option<i64> = row.get(1)?;
            let line: Option<i64> = row.get(3)?;
            Ok(Func {
                name: row.get(0)?,
                lib: lib.map(|l| l as usize),
                file: row.get(2)?,
                line: line.map(|l| l as u32),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?
    };

    let stacks = {
        let mut stmt = conn.prepare("SELECT prefix_id, func_id FROM stacks ORDER BY id")?;
        stmt.query_map([], |row| {
            let prefix: Option<i64> = row.get(0)?;
            let func: i64 = row.get(1)?;
            Ok(StackEntry {
                prefix: prefix.map(|p| p as usize),
                func: func as usize,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?
    };

    let mut threads = {
        let mut stmt = conn.prepare(
            "SELECT name, process_name, pid, tid, is_main, register_time, unregister_time \
             FROM threads ORDER BY id",
        )?;
        stmt.query_map([], |row| {
            Ok(Thread {
                name: row.get(0)?,
                process_name: row.get(1)?,
                pid: row.get(2)?,
                tid: row.get(3)?,
                is_main_thread: row.get(4)?,
                register_time: row.get(5)?,
                unregister_time: row.get(6)?,
                samples: SampleTable::default(),
                markers: Vec::new(),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?
    };

    {
        let mut stmt = conn.prepare(
            "SELECT thread_id, time, stack_id, weight, cpu_delta FROM samples ORDER BY thread_id, idx",
        )?;
        let mut rows = stmt.query([])?;
        let mut weights: Vec<Vec<Option<f64>>> = vec![Vec::new(); threads.len()];
        let mut deltas: Vec<Vec<Option<f64>>> = vec![Vec::new(); threads.len()];
        while let Some(row) = rows.next()? {
            let thread: i64 = row.get(0)?;
            let Some(table) = threads.get_mut(thread as usize).map(|t| &mut t.samples) else {
                return Err(Error::ProfileLoad(format!("sample for missing thread {thread}")));
            };
            let stack: Option<i64> = row.get(2)?;
            table.time.push(row.get(1)?);
            table.stack.push(stack.map(|s| s as usize));
            weights[thread as usize].push(row.get(3)?);
            deltas[thread as usize].push(row.get(4)?);
        }
        // A column is present for a thread only if some row carries a value.
        for ((thread, weights), deltas) in threads.iter_mut().zip(weights).zip(deltas) {
            if weights.iter().any(Option::is_some) {
                thread.samples.weight =
                    Some(weights.into_iter().map(|w| w.unwrap_or(1.0)).collect());
            }
            if deltas.iter().any(Option::is_some) {
                thread.samples.thread_cpu_delta =
                    Some(deltas.into_iter().map(|d| d.unwrap_or(0.0)).collect());
            }
        }
    }

    {
        let mut stmt = conn.prepare(
            "SELECT thread_id, name, category, start, end, data, stack_id FROM markers \
             ORDER BY thread_id, idx",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let thread: i64 = row.get(0)?;
            let data: Option<String> = row.get(5)?;
            let stack: Option<i64> = row.get(6)?;
            let marker = Marker {
                name: row.get(1)?,
                category: row.get(2)?,
                start: row.get(3)?,
                end: row.get(4)?,
                data: data.as_deref().map(serde_json::from_str).transpose()?,
                stack: stack.map(|s| s as usize),
            };
            match threads.get_mut(thread as usize) {
                Some(t) => t.markers.push(marker),
                None => {
                    return Err(Error::ProfileLoad(format!("marker for missing thread {thread}")));
                }
            }
        }
    }

    Ok(Profile {
        meta,
        libs,
        funcs,
        stacks,
        threads,
    })
}
