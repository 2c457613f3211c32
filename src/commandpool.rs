//! Command pool: a fixed number of persistent worker threads that spawn
//! shell subprocesses on behalf of callers with constant per-call overhead.
//!
//! Pre-forking helper *processes* makes sense to dodge fork/COW cost scaling
//! with parent RSS, but that pressure doesn't exist in a language without a
//! fork-based runtime (see DESIGN.md). The pool shape is kept anyway:
//! persistent OS threads instead of processes, so concurrency accounting and
//! kill/killpg handling stay centralized in one place.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub exit_code: i32,
}

struct Job {
    argv: Vec<String>,
    env: HashMap<String, String>,
    cwd: PathBuf,
    child_slot: Arc<Mutex<Option<Child>>>,
    done_tx: mpsc::Sender<CommandResult>,
}

/// A single in-flight (or completed) subprocess. Exactly one of `wait`,
/// `kill`, `killpg` should be called against a given handle.
pub struct CommandHandle {
    child_slot: Arc<Mutex<Option<Child>>>,
    done_rx: mpsc::Receiver<CommandResult>,
}

impl CommandHandle {
    /// Blocks until the command completes, returning its captured stdout and
    /// exit code.
    pub fn wait(self) -> CommandResult {
        self.done_rx.recv().unwrap_or(CommandResult {
            stdout: String::new(),
            exit_code: -1,
        })
    }

    /// SIGKILL (or the configured signal) just the child process.
    pub fn kill(&self) -> io::Result<()> {
        if let Some(child) = self.child_slot.lock().unwrap().as_mut() {
            child.kill()?;
        }
        Ok(())
    }

    /// Signal the whole process group the child was placed in, defaulting
    /// to SIGKILL, for commands that themselves spawn children (e.g. `make`).
    pub fn killpg(&self, sig: Signal) -> nix::Result<()> {
        let guard = self.child_slot.lock().unwrap();
        if let Some(child) = guard.as_ref() {
            let pgid = Pid::from_raw(child.id() as i32);
            signal::killpg(pgid, sig)?;
        }
        Ok(())
    }
}

/// Pool of `J` persistent worker threads. `run()` enqueues a job and returns
/// immediately with a handle; the actual subprocess spawn happens on
/// whichever worker picks the job up next.
pub struct CommandPool {
    job_tx: mpsc::Sender<Job>,
    _workers: Vec<thread::JoinHandle<()>>,
}

impl CommandPool {
    pub fn new(jobs: usize) -> Self {
        let jobs = jobs.max(1);
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let mut workers = Vec::with_capacity(jobs);
        for _ in 0..jobs {
            let job_rx = job_rx.clone();
            workers.push(thread::spawn(move || loop {
                let job = {
                    let rx = job_rx.lock().unwrap();
                    rx.recv()
                };
                match job {
                    Ok(job) => run_job(job),
                    Err(_) => break,
                }
            }));
        }

        Self { job_tx, _workers: workers }
    }

    /// Spawns `argv` (argv[0] is the program) with `env` merged over the
    /// current process environment, in `cwd`. Returns a handle immediately.
    pub fn run(&self, argv: Vec<String>, env: HashMap<String, String>, cwd: PathBuf) -> CommandHandle {
        let child_slot = Arc::new(Mutex::new(None));
        let (done_tx, done_rx) = mpsc::channel();

        let job = Job {
            argv,
            env,
            cwd,
            child_slot: child_slot.clone(),
            done_tx,
        };
        // The channel only closes if every worker thread has panicked; a
        // send failure there is unrecoverable for the whole pool.
        self.job_tx.send(job).expect("command pool worker threads are gone");

        CommandHandle { child_slot, done_rx }
    }
}

fn run_job(job: Job) {
    let Job { argv, env, cwd, child_slot, done_tx } = job;

    if argv.is_empty() {
        let _ = done_tx.send(CommandResult { stdout: String::new(), exit_code: -1 });
        return;
    }

    let mut command = Command::new(&argv[0]);
    command
        .args(&argv[1..])
        .current_dir(&cwd)
        .envs(&env)
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let result = match command.spawn() {
        Ok(mut child) => {
            use std::io::Read;
            let mut stdout_pipe = child.stdout.take();
            *child_slot.lock().unwrap() = Some(child);

            // Read while the child is still reachable through the slot (for
            // kill/killpg) rather than consuming it via `wait_with_output`.
            let mut stdout = String::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut stdout);
            }

            let exit_code = {
                let mut guard = child_slot.lock().unwrap();
                match guard.as_mut().map(|c| c.wait()) {
                    Some(Ok(status)) => status.code().unwrap_or(-1),
                    _ => -1,
                }
            };
            *child_slot.lock().unwrap() = None;

            CommandResult { stdout, exit_code }
        }
        Err(_) => CommandResult { stdout: String::new(), exit_code: -1 },
    };

    let _ = done_tx.send(result);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_a_trivial_command_and_captures_stdout() {
        let pool = CommandPool::new(1);
        let handle = pool.run(
            vec!["echo".to_string(), "hello".to_string()],
            HashMap::new(),
            PathBuf::from("."),
        );
        let result = handle.wait();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[test]
    fn nonzero_exit_is_reported_without_erroring() {
        let pool = CommandPool::new(1);
        let handle = pool.run(
            vec!["false".to_string()],
            HashMap::new(),
            PathBuf::from("."),
        );
        assert_ne!(handle.wait().exit_code, 0);
    }

    #[test]
    fn multiple_jobs_run_across_worker_threads() {
        let pool = CommandPool::new(2);
        let handles: Vec<_> = (0..4)
            .map(|i| pool.run(vec!["echo".to_string(), i.to_string()], HashMap::new(), PathBuf::from(".")))
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.wait()).collect();
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.exit_code == 0));
    }
}
