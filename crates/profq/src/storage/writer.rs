use super::schema::{self, SCHEMA_VERSION};
use crate::error::Result;
use crate::profile::Profile;
use rusqlite::Connection;
use std::path::Path;

/// Write `profile` to a SQLite profile database at `path`, replacing any
/// tables already there.
pub fn save_profile(path: &Path, profile: &Profile) -> Result<()> {
    let mut conn = Connection::open(path)?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;",
    )?;

    // Create tables (drops existing tables first)
    schema::create_tables(&conn)?;

    schema::set_meta(&conn, "version", &SCHEMA_VERSION.to_string())?;
    schema::set_meta(&conn, "product", &profile.meta.product)?;
    if let Some(platform) = &profile.meta.platform {
        schema::set_meta(&conn, "platform", platform)?;
    }
    schema::set_meta(&conn, "start_time", &profile.meta.start_time.to_string())?;
    schema::set_meta(&conn, "interval", &profile.meta.interval.to_string())?;
    schema::set_meta(&conn, "profile_version", &profile.meta.version.to_string())?;
    schema::set_meta(&conn, "saved_at", &chrono::Utc::now().to_rfc3339())?;

    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached("INSERT INTO libs (id, name, path) VALUES (?, ?, ?)")?;
        for (id, lib) in profile.libs.iter().enumerate() {
            stmt.execute(rusqlite::params![id as i64, &lib.name, &lib.path])?;
        }
    }

    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO funcs (id, name, lib_id, file, line) VALUES (?, ?, ?, ?, ?)",
        )?;
        for (id, func) in profile.funcs.iter().enumerate() {
            stmt.execute(rusqlite::params![
                id as i64,
                &func.name,
                func.lib.map(|l| l as i64),
                &func.file,
                func.line.map(i64::from)
            ])?;
        }
    }

    {
        let mut stmt =
            tx.prepare_cached("INSERT INTO stacks (id, prefix_id, func_id) VALUES (?, ?, ?)")?;
        for (id, entry) in profile.stacks.iter().enumerate() {
            stmt.execute(rusqlite::params![
                id as i64,
                entry.prefix.map(|p| p as i64),
                entry.func as i64
            ])?;
        }
    }

    {
        let mut thread_stmt = tx.prepare_cached(
            "INSERT INTO threads (id, name, process_name, pid, tid, is_main, register_time, unregister_time) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        let mut sample_stmt = tx.prepare_cached(
            "INSERT INTO samples (thread_id, idx, time, stack_id, weight, cpu_delta) VALUES (?, ?, ?, ?, ?, ?)",
        )?;
        let mut marker_stmt = tx.prepare_cached(
            "INSERT INTO markers (thread_id, idx, name, category, start, end, data, stack_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )?;

        for (id, thread) in profile.threads.iter().enumerate() {
            let id = id as i64;
            thread_stmt.execute(rusqlite::params![
                id,
                &thread.name,
                &thread.process_name,
                &thread.pid,
                &thread.tid,
                thread.is_main_thread,
                thread.register_time,
                thread.unregister_time
            ])?;

            let samples = &thread.samples;
            for i in 0..samples.len() {
                let weight = samples.weight.as_ref().map(|w| w.get(i).copied().unwrap_or(1.0));
                let cpu_delta = samples
                    .thread_cpu_delta
                    .as_ref()
                    .map(|d| d.get(i).copied().unwrap_or(0.0));
                sample_stmt.execute(rusqlite::params![
                    id,
                    i as i64,
                    samples.time[i],
                    samples.stack[i].map(|s| s as i64),
                    weight,
                    cpu_delta
                ])?;
            }

            for (idx, marker) in thread.markers.iter().enumerate() {
                let data = marker
                    .data
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                marker_stmt.execute(rusqlite::params![
                    id,
                    idx as i64,
                    &marker.name,
                    &marker.category,
                    marker.start,
                    marker.end,
                    data,
                    marker.stack.map(|s| s as i64)
                ])?;
            }
        }
    }
    tx.commit()?;
    Ok(())
}
