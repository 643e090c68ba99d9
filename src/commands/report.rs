use crate::error::Result;
use crate::storage::{LeakRow, SessionSummary, query_leaks, session_summary};
use rusqlite::Connection;
use std::path::Path;

pub fn run(file: &Path, json: bool, csv: bool) -> Result<()> {
    let conn = Connection::open(file)?;
    let summary = session_summary(&conn)?;
    let leaks = query_leaks(&conn)?;

    if json {
        print_json(file, &summary, &leaks);
    } else if csv {
        print_csv(&summary, &leaks);
    } else {
        print_table(file, &summary, &leaks);
    }

    Ok(())
}

fn print_table(file: &Path, summary: &SessionSummary, leaks: &[LeakRow]) {
    // Header comment
    println!("# {}", file.display());
    println!(
        "# {} (PID {}) | started {}",
        summary.process_name, summary.pid, summary.started
    );
    println!(
        "# Duration: {} | Samples: {}",
        format_duration(summary.duration_secs),
        summary.samples
    );
    println!();

    println!("{:<12} {:>10} {:>10}", "METRIC", "AVG", "MAX");
    println!("{}", "-".repeat(34));
    println!(
        "{:<12} {:>9.1}% {:>9.1}%",
        "cpu", summary.avg_cpu, summary.max_cpu
    );
    println!(
        "{:<12} {:>8.1}MB {:>8.1}MB",
        "memory", summary.avg_memory_mb, summary.max_memory_mb
    );
    match summary.min_fps {
        Some(min) => println!(
            "{:<12} {:>6.0} min {:>6.0} max",
            "fps", min, summary.max_fps
        ),
        None => println!("{:<12} {:>10} {:>10.0}", "fps", "-", summary.max_fps),
    }

    println!();
    if leaks.is_empty() {
        println!("No leaks recorded.");
        return;
    }

    println!(
        "# Leaks: {} detected, {} resolved",
        summary.leaks_detected, summary.leaks_resolved
    );
    println!(
        "{:>6}  {:<10} {:<12} {:<30} {}",
        "ID", "STATE", "LIFETIME", "KIND", "DETAILS"
    );
    println!("{}", "-".repeat(76));
    for leak in leaks {
        let state = if leak.resolved { "resolved" } else { "LEAKED" };
        let lifetime = leak
            .resolution_secs
            .map(|s| format!("{s:.3}s"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>6}  {:<10} {:<12} {:<30} {}",
            leak.correlation, state, lifetime, leak.kind, leak.details
        );
    }
}

fn print_json(file: &Path, summary: &SessionSummary, leaks: &[LeakRow]) {
    println!("{{");
    println!("  \"file\": \"{}\",", file.display());
    println!("  \"process\": \"{}\",", escape(&summary.process_name));
    println!("  \"pid\": {},", summary.pid);
    println!("  \"duration_secs\": {:.3},", summary.duration_secs);
    println!("  \"samples\": {},", summary.samples);
    println!("  \"avg_cpu\": {:.2},", summary.avg_cpu);
    println!("  \"max_cpu\": {:.2},", summary.max_cpu);
    println!("  \"avg_memory_mb\": {:.2},", summary.avg_memory_mb);
    println!("  \"max_memory_mb\": {:.2},", summary.max_memory_mb);
    match summary.min_fps {
        Some(min) => println!("  \"min_fps\": {min:.1},"),
        None => println!("  \"min_fps\": null,"),
    }
    println!("  \"max_fps\": {:.1},", summary.max_fps);
    println!("  \"leaks\": [");
    for (i, leak) in leaks.iter().enumerate() {
        let comma = if i < leaks.len() - 1 { "," } else { "" };
        let resolution = leak
            .resolution_secs
            .map(|s| format!("{s:.3}"))
            .unwrap_or_else(|| "null".to_string());
        println!(
            "    {{ \"id\": {}, \"kind\": \"{}\", \"details\": \"{}\", \"detected_at\": \"{}\", \"resolved\": {}, \"resolution_secs\": {} }}{}",
            leak.correlation,
            escape(&leak.kind),
            escape(&leak.details),
            escape(&leak.detected_at),
            leak.resolved,
            resolution,
            comma
        );
    }
    println!("  ]");
    println!("}}");
}

fn print_csv(summary: &SessionSummary, leaks: &[LeakRow]) {
    println!("metric,avg,max");
    println!("cpu,{:.2},{:.2}", summary.avg_cpu, summary.max_cpu);
    println!(
        "memory_mb,{:.2},{:.2}",
        summary.avg_memory_mb, summary.max_memory_mb
    );
    println!(
        "fps,{},{:.1}",
        summary
            .min_fps
            .map(|m| format!("{m:.1}"))
            .unwrap_or_default(),
        summary.max_fps
    );
    println!();
    println!("leak_id,kind,details,detected_at,resolved,resolution_secs");
    for leak in leaks {
        println!(
            "{},{},\"{}\",{},{},{}",
            leak.correlation,
            leak.kind,
            leak.details,
            leak.detected_at,
            leak.resolved,
            leak.resolution_secs
                .map(|s| format!("{s:.3}"))
                .unwrap_or_default()
        );
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn format_duration(secs: f64) -> String {
    if secs >= 60.0 {
        format!("{:.0}m{:02.0}s", (secs / 60.0).floor(), secs % 60.0)
    } else {
        format!("{secs:.1}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_format_compactly() {
        assert_eq!(format_duration(5.25), "5.2s");
        assert_eq!(format_duration(90.0), "1m30s");
    }

    #[test]
    fn json_strings_are_escaped() {
        assert_eq!(escape(r#"a "b" \c"#), r#"a \"b\" \\c"#);
    }
}
