use crate::error::Result;
use crate::storage::session_summary;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Session info extracted from a database file
pub struct SessionInfo {
    pub path: PathBuf,
    pub process_name: String,
    pub duration_secs: f64,
    pub samples: u64,
    pub leaks: u64,
    pub created: String,
}

/// Find all vigil session databases in a directory
pub fn find_sessions(dir: &Path) -> Result<Vec<SessionInfo>> {
    let mut sessions = Vec::new();

    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.extension().map(|e| e == "db").unwrap_or(false)
            && let Some(name) = path.file_name().and_then(|n| n.to_str())
            && name.starts_with("vigil.")
            && let Ok(info) = get_session_info(&path)
        {
            sessions.push(info);
        }
    }

    // Most recent first
    sessions.sort_by(|a, b| b.created.cmp(&a.created));

    Ok(sessions)
}

/// Get the most recent session in a directory
pub fn most_recent_session(dir: &Path) -> Result<Option<PathBuf>> {
    let sessions = find_sessions(dir)?;
    Ok(sessions.into_iter().next().map(|s| s.path))
}

fn get_session_info(path: &Path) -> Result<SessionInfo> {
    let conn = Connection::open(path)?;
    let summary = session_summary(&conn)?;

    Ok(SessionInfo {
        path: path.to_path_buf(),
        process_name: summary.process_name,
        duration_secs: summary.duration_secs,
        samples: summary.samples,
        leaks: summary.leaks_detected,
        created: summary.started,
    })
}

/// Run the list command
pub fn run(dir: Option<&Path>) -> Result<()> {
    let search_dir = dir.unwrap_or_else(|| Path::new("."));
    let sessions = find_sessions(search_dir)?;

    if sessions.is_empty() {
        println!("No vigil sessions found in {}", search_dir.display());
        return Ok(());
    }

    println!(
        "{:<40} {:>12} {:>10} {:>9} {:>7}",
        "FILE", "PROCESS", "DURATION", "SAMPLES", "LEAKS"
    );
    println!("{}", "-".repeat(82));

    for session in sessions {
        let filename = session
            .path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        let duration = if session.duration_secs >= 60.0 {
            format!(
                "{:.0}m{:.0}s",
                session.duration_secs / 60.0,
                session.duration_secs % 60.0
            )
        } else {
            format!("{:.1}s", session.duration_secs)
        };

        println!(
            "{:<40} {:>12} {:>10} {:>9} {:>7}",
            filename, session.process_name, duration, session.samples, session.leaks
        );
    }

    Ok(())
}
