use crate::error::{Error, Result};
use std::fs;

/// Information about a monitored process
pub struct ProcessInfo {
    pid: u32,
    name: String,
}

impl ProcessInfo {
    /// Create ProcessInfo for a given PID
    pub fn new(pid: u32) -> Result<Self> {
        let proc_path = format!("/proc/{pid}");

        if !std::path::Path::new(&proc_path).exists() {
            return Err(Error::ProcessNotFound(format!("PID {pid}")));
        }

        let name = fs::read_to_string(format!("{proc_path}/comm"))
            .map_err(|_| Error::ProcessNotFound(format!("Cannot read comm for PID {pid}")))?
            .trim()
            .to_string();

        Ok(ProcessInfo { pid, name })
    }

    /// The calling process itself.
    pub fn current() -> Result<Self> {
        Self::new(std::process::id())
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Find a process by name (pgrep-style matching)
pub fn find_process_by_name(pattern: &str) -> Result<u32> {
    let mut matches: Vec<(u32, String)> = Vec::new();

    for entry in fs::read_dir("/proc")? {
        let entry = entry?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();

        // Only PID directories
        if let Ok(pid) = name_str.parse::<u32>()
            && let Ok(comm) = fs::read_to_string(format!("/proc/{pid}/comm"))
        {
            let comm = comm.trim();
            // Substring match like pgrep
            if comm.contains(pattern) && pid != std::process::id() {
                matches.push((pid, comm.to_string()));
            }
        }
    }

    match matches.len() {
        0 => Err(Error::ProcessNotFound(format!(
            "No process matching '{pattern}'"
        ))),
        1 => Ok(matches[0].0),
        _ => {
            let match_list = matches
                .iter()
                .map(|(pid, name)| format!("  PID {pid}: {name}\n"))
                .collect::<String>();
            Err(Error::MultipleProcesses {
                pattern: pattern.to_string(),
                matches: match_list,
            })
        }
    }
}

/// Sanitize a process name for use in filenames
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .take(32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_resolves() {
        let info = ProcessInfo::current().unwrap();
        assert_eq!(info.pid(), std::process::id());
        assert!(!info.name().is_empty());
    }

    #[test]
    fn unknown_pid_is_not_found() {
        // PID 0 never has a /proc entry.
        assert!(matches!(
            ProcessInfo::new(0),
            Err(Error::ProcessNotFound(_))
        ));
    }

    #[test]
    fn sanitize_replaces_awkward_characters() {
        assert_eq!(sanitize_name("my app/v2"), "my-app-v2");
        assert_eq!(sanitize_name("plain_name"), "plain_name");
    }
}
