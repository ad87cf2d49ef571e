//! Platform-specific termination of the proxy process tree.

#[cfg(unix)]
pub fn terminate_process_tree(pid: u32) -> anyhow::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)?;
    kill(Pid::from_raw(raw), Signal::SIGTERM)?;
    Ok(())
}

/// Child trees are not reliably torn down by a plain terminate on Windows,
/// so the whole tree is force-killed with `taskkill`.
#[cfg(windows)]
pub fn terminate_process_tree(pid: u32) -> anyhow::Result<()> {
    let status = std::process::Command::new("taskkill").args(["/PID", &pid.to_string(), "/T", "/F"]).status()?;
    if !status.success() {
        anyhow::bail!("taskkill exited with {status}");
    }
    Ok(())
}
