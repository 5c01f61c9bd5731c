use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessStatus, Signal, System};

use crate::config::Interpreters;
use crate::error::{CoreError, CoreResult};
use crate::logger;

/// Time survivors get between the graceful signal and the force kill.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Return as soon as the process is spawned.
    Detached,
    /// Wait for exit; a non-zero exit status is a launch failure.
    Blocking,
}

/// A process started by the supervisor.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    script: PathBuf,
    child: Option<Child>,
}

impl ProcessHandle {
    /// A handle for a process this supervisor did not spawn.
    pub fn untracked(pid: u32, script: impl Into<PathBuf>) -> Self {
        Self { pid, script: script.into(), child: None }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn script(&self) -> &Path {
        &self.script
    }
}

/// Launch and tear-down of external scripts.
pub trait ProcessControl: Send + Sync {
    fn launch(&self, script: &Path, mode: LaunchMode) -> CoreResult<ProcessHandle>;
    /// Terminate the process and all of its descendants. A process that has
    /// already exited counts as terminated.
    fn terminate(&self, handle: ProcessHandle) -> CoreResult<()>;
}

/// OS-backed supervisor. Picks the interpreter by file extension and starts
/// each script in its own console (Windows) or process group (Unix).
pub struct Supervisor {
    python: PathBuf,
    external: Option<PathBuf>,
    grace: Duration,
}

impl Supervisor {
    pub fn new(interpreters: &Interpreters) -> Self {
        Self {
            python: interpreters.python.clone(),
            external: interpreters.external.clone(),
            grace: TERMINATE_GRACE,
        }
    }

    /// Program and arguments used to run `script`.
    pub fn command_line(&self, script: &Path) -> (PathBuf, Vec<PathBuf>) {
        let script = absolute(script);
        let is_python = script
            .extension()
            .map_or(false, |e| e.eq_ignore_ascii_case("py"));
        match (&self.external, is_python) {
            (_, true) => (self.python.clone(), vec![script]),
            (Some(interp), false) => (interp.clone(), vec![script]),
            (None, false) => (script, Vec::new()),
        }
    }

    fn spawn(&self, script: &Path) -> CoreResult<Child> {
        let (program, args) = self.command_line(script);
        let mut cmd = Command::new(&program);
        cmd.args(&args);
        cmd.stdin(Stdio::null());

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NEW_CONSOLE: u32 = 0x0000_0010;
            cmd.creation_flags(CREATE_NEW_CONSOLE);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        cmd.spawn().map_err(|e| CoreError::LaunchFailed {
            path: script.to_path_buf(),
            reason: format!("{}: {}", program.display(), e),
        })
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// `root` and every process whose parent chain leads to it, root first.
fn process_tree(sys: &System, root: Pid) -> Vec<Pid> {
    let mut tree = Vec::new();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        if !seen.insert(pid) {
            continue;
        }
        tree.push(pid);
        for (child, process) in sys.processes() {
            if process.parent() == Some(pid) {
                queue.push_back(*child);
            }
        }
    }
    tree
}

fn is_alive(sys: &System, pid: Pid) -> bool {
    sys.process(pid)
        .map_or(false, |p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
}

impl ProcessControl for Supervisor {
    fn launch(&self, script: &Path, mode: LaunchMode) -> CoreResult<ProcessHandle> {
        let mut child = self.spawn(script)?;
        let pid = child.id();

        if mode == LaunchMode::Detached {
            logger::info_p("supervisor", &format!("started {} (pid {})", script.display(), pid));
            return Ok(ProcessHandle { pid, script: script.to_path_buf(), child: Some(child) });
        }

        let status = child.wait().map_err(|e| CoreError::LaunchFailed {
            path: script.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !status.success() {
            return Err(CoreError::LaunchFailed {
                path: script.to_path_buf(),
                reason: format!("exited with {}", status),
            });
        }
        logger::info_p("supervisor", &format!("ran {} (pid {})", script.display(), pid));
        Ok(ProcessHandle { pid, script: script.to_path_buf(), child: None })
    }

    fn terminate(&self, mut handle: ProcessHandle) -> CoreResult<()> {
        let root = Pid::from_u32(handle.pid);

        // Reap first so an exited direct child is not mistaken for a live one.
        if let Some(child) = handle.child.as_mut() {
            if let Ok(Some(_)) = child.try_wait() {
                handle.child = None;
            }
        }

        let mut sys = System::new();
        sys.refresh_processes();
        let tree: Vec<Pid> = process_tree(&sys, root)
            .into_iter()
            .filter(|pid| is_alive(&sys, *pid))
            .collect();
        if tree.is_empty() {
            logger::info_p("supervisor", &format!("{} already exited", handle.script.display()));
            return Ok(());
        }

        for pid in &tree {
            if let Some(process) = sys.process(*pid) {
                // No graceful signal on this platform: fall straight through to kill.
                if process.kill_with(Signal::Term).is_none() {
                    process.kill();
                }
            }
        }

        let deadline = Instant::now() + self.grace;
        let mut survivors = tree.clone();
        while !survivors.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(100));
            if let Some(child) = handle.child.as_mut() {
                let _ = child.try_wait();
            }
            sys.refresh_processes();
            survivors.retain(|pid| is_alive(&sys, *pid));
        }

        let mut failed = Vec::new();
        for pid in &survivors {
            let killed = sys.process(*pid).map_or(true, |p| p.kill());
            if !killed {
                failed.push(pid.as_u32());
            }
        }
        if let Some(mut child) = handle.child.take() {
            let _ = child.wait();
        }

        if !failed.is_empty() {
            return Err(CoreError::TerminateFailed {
                pid: handle.pid,
                reason: format!("could not kill {:?}", failed),
            });
        }
        logger::info_p(
            "supervisor",
            &format!(
                "terminated {} ({} process(es), {} forced)",
                handle.script.display(),
                tree.len(),
                survivors.len()
            ),
        );
        Ok(())
    }
}

/// Supervisor for `--stub` runs and tests: records launches and terminations
/// without touching the OS.
#[derive(Default)]
pub struct DryRunSupervisor {
    next_pid: AtomicU32,
    launches: Mutex<Vec<(PathBuf, LaunchMode)>>,
    terminated: Mutex<Vec<u32>>,
    failing: Mutex<HashSet<PathBuf>>,
}

impl DryRunSupervisor {
    pub fn new() -> Self {
        Self { next_pid: AtomicU32::new(1000), ..Default::default() }
    }

    /// Make every later launch of `script` fail.
    pub fn fail_on(&self, script: impl Into<PathBuf>) {
        self.failing.lock().unwrap_or_else(|p| p.into_inner()).insert(script.into());
    }

    pub fn launches(&self) -> Vec<(PathBuf, LaunchMode)> {
        self.launches.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn launch_count(&self, script: &Path) -> usize {
        self.launches().iter().filter(|(p, _)| p == script).count()
    }

    /// Pids passed to `terminate`, oldest first.
    pub fn terminations(&self) -> Vec<u32> {
        self.terminated.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl ProcessControl for DryRunSupervisor {
    fn launch(&self, script: &Path, mode: LaunchMode) -> CoreResult<ProcessHandle> {
        if self.failing.lock().unwrap_or_else(|p| p.into_inner()).contains(script) {
            return Err(CoreError::LaunchFailed { path: script.to_path_buf(), reason: "dry-run failure".into() });
        }
        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        logger::info_p("stub", &format!("launch {} ({:?}) -> pid {}", script.display(), mode, pid));
        self.launches.lock().unwrap_or_else(|p| p.into_inner()).push((script.to_path_buf(), mode));
        Ok(ProcessHandle::untracked(pid, script))
    }

    fn terminate(&self, handle: ProcessHandle) -> CoreResult<()> {
        logger::info_p("stub", &format!("terminate {} (pid {})", handle.script().display(), handle.pid()));
        self.terminated.lock().unwrap_or_else(|p| p.into_inner()).push(handle.pid());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_run_records_and_fails_on_request() {
        let sup = DryRunSupervisor::new();
        let a = sup.launch(Path::new("a.py"), LaunchMode::Detached).unwrap();
        sup.fail_on("b.py");
        assert!(sup.launch(Path::new("b.py"), LaunchMode::Blocking).is_err());
        let pid = a.pid();
        sup.terminate(a).unwrap();
        assert_eq!(sup.launches(), vec![(PathBuf::from("a.py"), LaunchMode::Detached)]);
        assert_eq!(sup.terminations(), vec![pid]);
    }

    fn supervisor(external: Option<&str>) -> Supervisor {
        Supervisor::new(&Interpreters {
            python: PathBuf::from("python3"),
            external: external.map(PathBuf::from),
        })
    }

    #[test]
    fn python_scripts_use_the_python_runtime() {
        let (program, args) = supervisor(Some("ahk.exe")).command_line(Path::new("/opt/a/run.PY"));
        assert_eq!(program, PathBuf::from("python3"));
        assert_eq!(args, vec![PathBuf::from("/opt/a/run.PY")]);
    }

    #[test]
    fn other_scripts_use_the_external_interpreter_or_run_directly() {
        let (program, args) = supervisor(Some("ahk.exe")).command_line(Path::new("/opt/a/keys.ahk"));
        assert_eq!(program, PathBuf::from("ahk.exe"));
        assert_eq!(args, vec![PathBuf::from("/opt/a/keys.ahk")]);

        let (program, args) = supervisor(None).command_line(Path::new("/opt/a/tool"));
        assert_eq!(program, PathBuf::from("/opt/a/tool"));
        assert!(args.is_empty());
    }

    #[test]
    fn relative_scripts_are_made_absolute() {
        let (_, args) = supervisor(Some("sh")).command_line(Path::new("scripts/x.sh"));
        assert!(args[0].is_absolute());
        assert!(args[0].ends_with("scripts/x.sh"));
    }

    #[test]
    fn missing_interpreter_is_a_launch_failure() {
        let sup = Supervisor::new(&Interpreters {
            python: PathBuf::from("/nonexistent/python"),
            external: None,
        });
        let err = sup.launch(Path::new("x.py"), LaunchMode::Detached).unwrap_err();
        assert!(matches!(err, CoreError::LaunchFailed { .. }));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::fs;

        fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            fs::write(&path, body).unwrap();
            path
        }

        fn alive(pid: u32) -> bool {
            let mut sys = System::new();
            sys.refresh_processes();
            is_alive(&sys, Pid::from_u32(pid))
        }

        #[test]
        fn blocking_launch_reports_non_zero_exit() {
            let dir = tempfile::tempdir().unwrap();
            let ok = script(dir.path(), "ok.sh", "exit 0\n");
            let bad = script(dir.path(), "bad.sh", "exit 3\n");
            let sup = supervisor(Some("sh"));
            assert!(sup.launch(&ok, LaunchMode::Blocking).is_ok());
            assert!(matches!(
                sup.launch(&bad, LaunchMode::Blocking),
                Err(CoreError::LaunchFailed { .. })
            ));
        }

        #[test]
        fn terminate_kills_the_whole_tree() {
            let dir = tempfile::tempdir().unwrap();
            let pid_file = dir.path().join("grandchild.pid");
            let body = format!("sleep 30 &\necho $! > {}\nwait\n", pid_file.display());
            let path = script(dir.path(), "tree.sh", &body);
            let sup = supervisor(Some("sh"));

            let handle = sup.launch(&path, LaunchMode::Detached).unwrap();
            let root = handle.pid();
            let deadline = Instant::now() + Duration::from_secs(5);
            while !pid_file.exists() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(50));
            }
            std::thread::sleep(Duration::from_millis(100));
            let grandchild: u32 = fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
            assert!(alive(grandchild));

            sup.terminate(handle).unwrap();
            assert!(!alive(root));
            assert!(!alive(grandchild));
        }

        #[test]
        fn terminating_an_exited_process_succeeds() {
            let dir = tempfile::tempdir().unwrap();
            let path = script(dir.path(), "quick.sh", "exit 0\n");
            let sup = supervisor(Some("sh"));
            let handle = sup.launch(&path, LaunchMode::Detached).unwrap();
            std::thread::sleep(Duration::from_millis(300));
            assert!(sup.terminate(handle).is_ok());
        }
    }
}
