use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use vigil::cli::{Cli, Command};
use vigil::error::exit_code;
use vigil::metrics::{MetricsSampler, SamplerConfig, SamplerSources};
use vigil::storage::Storage;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS as u8),
        Err(e) => {
            eprintln!("Error: {e:#}");
            if let Some(vigil_err) = e.downcast_ref::<vigil::Error>() {
                ExitCode::from(vigil_err.exit_code() as u8)
            } else {
                ExitCode::from(exit_code::GENERAL_ERROR as u8)
            }
        }
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    cli.validate()
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("Invalid arguments")?;

    match cli.command {
        Some(Command::Report { file, json, csv }) => {
            let session_path = match file {
                Some(f) => f,
                None => vigil::commands::list::most_recent_session(std::path::Path::new("."))?
                    .ok_or_else(|| {
                        anyhow::anyhow!(
                            "No sessions found. Run 'vigil list' to see available sessions."
                        )
                    })?,
            };
            vigil::commands::report::run(&session_path, json, csv)?;
        }
        Some(Command::Query { file, sql }) => {
            vigil::commands::query::run(&file, &sql)?;
        }
        Some(Command::List { dir }) => {
            vigil::commands::list::run(dir.as_deref())?;
        }
        Some(Command::Completions { shell }) => {
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "vigil", &mut std::io::stdout());
        }
        None => {
            run_monitor(&cli)?;
        }
    }

    Ok(())
}

fn run_monitor(cli: &Cli) -> anyhow::Result<()> {
    // Resolve PID
    let pid = match (cli.pid, &cli.process) {
        (Some(pid), _) => pid,
        (_, Some(name)) => vigil::process::find_process_by_name(name)?,
        _ => unreachable!("validated in cli"),
    };

    let proc_info = vigil::process::ProcessInfo::new(pid)?;
    eprintln!(
        "Monitoring {} (PID {})",
        proc_info.name(),
        proc_info.pid()
    );

    // Determine output path
    let output_path = cli.output.clone().unwrap_or_else(|| {
        let timestamp = chrono::Local::now().format("%y%m%d%H%M%S");
        std::path::PathBuf::from(format!(
            "vigil.{}.{}.db",
            vigil::process::sanitize_name(proc_info.name()),
            timestamp
        ))
    });
    eprintln!("Output: {}", output_path.display());

    let mut storage = Storage::new(
        &output_path,
        proc_info.name(),
        proc_info.pid(),
        cli.interval,
        cli.capacity,
    )?;

    // Frame pacing is not observable from outside the process; the frame
    // channel records 0 and is excluded from extrema by the zero-skip rule.
    let (sources, _frame_clock) = SamplerSources::for_process(pid);
    let sampler = MetricsSampler::new(
        sources,
        SamplerConfig {
            capacity: cli.capacity,
        },
    );

    // Every published snapshot flows to the recording loop.
    let (tx, rx) = mpsc::channel();
    sampler.on_sample(move |snap| {
        let _ = tx.send(*snap);
    });

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl-C handler")?;

    sampler.start(cli.interval);
    eprintln!("Recording (Ctrl-C to stop)...");

    let start = Instant::now();
    let mut samples = 0u64;
    let mut last_flush = Instant::now();

    while running.load(Ordering::SeqCst) {
        if let Some(max_duration) = cli.duration
            && start.elapsed() >= max_duration
        {
            break;
        }

        // The target may exit mid-session; stop cleanly when it does.
        if !std::path::Path::new(&format!("/proc/{pid}")).exists() {
            eprintln!("\nTarget process exited.");
            break;
        }

        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(snap) => {
                samples += 1;
                storage.record_sample(&snap);

                if !cli.quiet {
                    eprint!(
                        "\rCPU {:5.1}% (max {:5.1}%) | MEM {:7.1} MB (max {:7.1}) | samples {}",
                        snap.cpu, snap.max_cpu, snap.memory_mb, snap.max_memory_mb, samples
                    );
                }

                if last_flush.elapsed() >= Duration::from_secs(5) {
                    storage.flush()?;
                    last_flush = Instant::now();
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    sampler.stop();
    storage.flush()?;

    let snap = sampler.current_snapshot();
    eprintln!(
        "\nRecorded {} samples over {:?}. Peak CPU {:.1}%, peak memory {:.1} MB.",
        samples,
        start.elapsed(),
        snap.max_cpu,
        snap.max_memory_mb
    );

    Ok(())
}
