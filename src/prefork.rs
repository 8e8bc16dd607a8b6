//! Prefork process model.
//!
//! The master process starts one worker per available core by re-executing
//! the current binary with `LIFELINE_PREFORK_CHILD=1` in its environment.
//! Workers share the listening address either through `SO_REUSEPORT` or by
//! adopting a socket the master binds once and hands down as descriptor 3.
//! Crashed workers are restarted until the recovery threshold is exceeded.
//! On Linux, workers are killed by the kernel when the master dies.

use std::{
    env,
    ffi::OsString,
    io,
    os::fd::{AsRawFd, FromRawFd, RawFd},
    path::PathBuf,
    process::{self, ExitStatus, Stdio},
    sync::Arc,
    thread,
};

use futures_util::future::BoxFuture;
use tokio::{
    process::{Child, Command},
    task::JoinSet,
};

use crate::{
    config::Network,
    errors::{ForkError, LifelineError},
    logger::Logger,
    server::listener::{self, Listener},
};

/// Environment variable that marks a worker process.
pub const PREFORK_CHILD_ENV: &str = "LIFELINE_PREFORK_CHILD";

/// Descriptor on which workers find the listener bound by the master.
pub const INHERITED_LISTENER_FD: RawFd = 3;

/// Serve callback run by every worker on its listener.
pub type ServeFn =
    Arc<dyn Fn(Listener) -> BoxFuture<'static, Result<(), LifelineError>> + Send + Sync>;

/// Checks whether the current process is a prefork worker.
pub fn is_prefork_child() -> bool {
    env::var(PREFORK_CHILD_ENV).map_or(false, |value| value == "1")
}

/// Prefork master and worker logic.
pub struct Prefork {
    pub network: Network,
    pub reuseport: bool,
    /// Worker exits tolerated before the master gives up.
    pub recover_threshold: usize,
    /// Number of workers kept running.
    pub workers: usize,
    pub logger: Arc<dyn Logger>,
    pub serve_fn: ServeFn,
    /// Program started for each worker.
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl Prefork {
    /// Creates a prefork that re-executes the current binary with its current
    /// arguments, one worker per available core.
    pub fn new(
        network: Network,
        reuseport: bool,
        recover_threshold: usize,
        logger: Arc<dyn Logger>,
        serve_fn: ServeFn,
    ) -> Result<Self, ForkError> {
        let program = env::current_exe().map_err(ForkError::CurrentExe)?;
        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Ok(Self {
            network,
            reuseport,
            recover_threshold,
            workers,
            logger,
            serve_fn,
            program,
            args: env::args_os()
                .skip(1)
                .collect(),
        })
    }

    /// Runs as a worker when [`is_prefork_child`] is true, otherwise starts
    /// and supervises the workers.
    ///
    /// Returns whatever the serve callback returns in a worker. In the master
    /// it returns only on a fork-level error.
    pub async fn listen_and_serve(&self, addr: &str) -> Result<(), LifelineError> {
        if is_prefork_child() {
            return self
                .serve_child(addr)
                .await;
        }

        self.supervise(addr)
            .await
    }

    pub(crate) async fn serve_child(&self, addr: &str) -> Result<(), LifelineError> {
        let listener = if self.reuseport {
            let socket_addr = listener::resolve(self.network, addr).await?;
            let inner = listener::bind_tcp(self.network, socket_addr, true)
                .map_err(|e| LifelineError::bind(addr, e))?;
            Listener::from_std(inner).map_err(|e| LifelineError::bind(addr, e))?
        } else {
            // SAFETY: the master dup2'ed its listening socket onto this
            // descriptor right before exec, and nothing else in the worker
            // owns it.
            let inherited = unsafe { std::net::TcpListener::from_raw_fd(INHERITED_LISTENER_FD) };
            Listener::from_std(inherited).map_err(ForkError::InheritListener)?
        };

        (self.serve_fn)(listener).await
    }

    pub(crate) async fn supervise(&self, addr: &str) -> Result<(), LifelineError> {
        if !self
            .network
            .is_tcp()
        {
            return Err(ForkError::UnsupportedNetwork(self.network).into());
        }

        // Kept open for the master's lifetime so restarted workers can inherit it.
        let shared = if self.reuseport {
            None
        } else {
            let socket_addr = listener::resolve(self.network, addr).await?;
            let inner = listener::bind_tcp(self.network, socket_addr, false)
                .map_err(|e| LifelineError::bind(addr, e))?;
            Some(inner)
        };
        let inherited_fd = shared
            .as_ref()
            .map(|listener| listener.as_raw_fd());

        let mut children = JoinSet::new();
        let result = self
            .run_children(&mut children, inherited_fd)
            .await;

        // Aborting the wait tasks drops their `Child` handles, which kills them.
        children
            .shutdown()
            .await;

        result.map_err(LifelineError::from)
    }

    async fn run_children(
        &self,
        children: &mut JoinSet<(Option<u32>, io::Result<ExitStatus>)>,
        inherited_fd: Option<RawFd>,
    ) -> Result<(), ForkError> {
        for _ in 0..self.workers {
            let child = self.spawn_child(inherited_fd)?;
            watch(children, child);
        }

        let mut exited = 0;
        while let Some(joined) = children
            .join_next()
            .await
        {
            let description = match joined {
                Ok((pid, Ok(status))) => format!("{} (pid {})", status, describe_pid(pid)),
                Ok((pid, Err(e))) => format!("{} (pid {})", e, describe_pid(pid)),
                Err(e) => e.to_string(),
            };
            self.logger
                .print(&format!(
                    "one of the child prefork processes exited with status: {}",
                    description
                ));

            exited += 1;
            if exited > self.recover_threshold {
                self.logger
                    .print(&format!(
                        "child prefork processes exit too many times, which exceeds the value of \
                         RecoverThreshold({}), exiting the master process.",
                        self.recover_threshold
                    ));
                return Err(ForkError::OverRecovery { threshold: self.recover_threshold });
            }

            let child = self.spawn_child(inherited_fd)?;
            watch(children, child);
        }

        Ok(())
    }

    fn spawn_child(&self, inherited_fd: Option<RawFd>) -> Result<Child, ForkError> {
        let master = process::id() as libc::pid_t;
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env(PREFORK_CHILD_ENV, "1")
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        // SAFETY: the closure only calls async-signal-safe libc functions.
        unsafe {
            command.pre_exec(move || prepare_worker(inherited_fd, master));
        }

        command
            .spawn()
            .map_err(|e| {
                self.logger
                    .print(&format!("failed to start a child prefork process, error: {}", e));
                ForkError::Spawn(e)
            })
    }
}

fn watch(children: &mut JoinSet<(Option<u32>, io::Result<ExitStatus>)>, mut child: Child) {
    children.spawn(async move {
        let pid = child.id();
        let status = child
            .wait()
            .await;
        (pid, status)
    });
}

fn describe_pid(pid: Option<u32>) -> String {
    pid.map_or_else(|| "unknown".to_string(), |pid| pid.to_string())
}

/// Runs in the forked worker before exec.
///
/// On Linux the worker is killed when the master dies, even if the master
/// is killed by a signal and never reaps it. Fails when `master` is already
/// gone by the time the death signal is armed.
pub(crate) fn prepare_worker(inherited_fd: Option<RawFd>, master: libc::pid_t) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: prctl with integer arguments only.
        if unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) } == -1 {
            return Err(io::Error::last_os_error());
        }
    }

    // SAFETY: getppid cannot fail.
    if unsafe { libc::getppid() } != master {
        return Err(io::Error::from_raw_os_error(libc::ESRCH));
    }

    match inherited_fd {
        Some(fd) => inherit_fd(fd),
        None => Ok(()),
    }
}

/// Places `fd` on [`INHERITED_LISTENER_FD`] without close-on-exec.
fn inherit_fd(fd: RawFd) -> io::Result<()> {
    if fd == INHERITED_LISTENER_FD {
        // SAFETY: plain fcntl calls on a descriptor owned by this process.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if flags == -1
            || unsafe { libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } == -1
        {
            return Err(io::Error::last_os_error());
        }
        return Ok(());
    }

    // SAFETY: dup2 onto a fixed descriptor; the new descriptor never carries
    // close-on-exec.
    if unsafe { libc::dup2(fd, INHERITED_LISTENER_FD) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
