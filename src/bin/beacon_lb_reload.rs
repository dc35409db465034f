//! External proxy reload helper (spec §6 "Proxy reload helper contract").
//!
//! Invoked as `beacon-lb-reload <config-path>`: finds every running proxy
//! process, keeps the newest, SIGTERMs the rest (SIGKILL after a grace
//! period), and starts a new proxy with `-sf <newest_pid>` so connections
//! drain instead of dropping.

use beacond::error::{BeaconResult, BeaconWrap};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

const PROXY_BINARY: &str = "haproxy";
const PROXY_COMM: &str = "haproxy";
const KILL_GRACE: Duration = Duration::from_secs(5);

fn main() {
    env_logger::init();
    let config_path = match std::env::args().nth(1) {
        Some(p) => p,
        None => {
            eprintln!("usage: beacon-lb-reload <config-path>");
            std::process::exit(2);
        }
    };

    if let Err(e) = reload(&config_path) {
        eprintln!("beacon-lb-reload: {e}");
        std::process::exit(1);
    }
}

fn reload(config_path: &str) -> BeaconResult<()> {
    let mut running = find_proxy_pids()?;
    // Highest PID is not a reliable "newest" signal across PID wraparound,
    // but it is the same heuristic available without parsing
    // /proc/<pid>/stat start-time, and matches this helper's single-host,
    // low-churn deployment model.
    running.sort_unstable();
    let newest = running.last().copied();

    let mut child_args = vec!["-f".to_string(), config_path.to_string()];
    if let Some(pid) = newest {
        child_args.push("-sf".to_string());
        child_args.push(pid.to_string());
    }

    Command::new(PROXY_BINARY)
        .args(&child_args)
        .spawn()
        .wrap(format!("spawn {PROXY_BINARY}"))?;

    for pid in running {
        if Some(pid) == newest {
            continue;
        }
        terminate(pid);
    }

    Ok(())
}

fn terminate(pid: i32) {
    let target = Pid::from_raw(pid);
    // Tolerate a PID that's already gone: the process table is the only
    // hand-off mechanism here and it may be stale (spec §5).
    if kill(target, Signal::SIGTERM).is_err() {
        return;
    }
    std::thread::sleep(KILL_GRACE);
    if process_alive(pid) {
        let _ = kill(target, Signal::SIGKILL);
    }
}

fn process_alive(pid: i32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

fn find_proxy_pids() -> BeaconResult<Vec<i32>> {
    let mut pids = Vec::new();
    for entry in std::fs::read_dir("/proc").wrap("read /proc")? {
        let entry = entry.wrap("read /proc entry")?;
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<i32>() else {
            continue;
        };
        let comm_path = entry.path().join("comm");
        let Ok(comm) = std::fs::read_to_string(&comm_path) else {
            continue;
        };
        if comm.trim() == PROXY_COMM {
            pids.push(pid);
        }
    }
    Ok(pids)
}

