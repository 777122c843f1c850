//! Xvnc-backed session broker
//!
//! Each user gets one Xvnc server listening on a Unix socket plus a
//! desktop session started from the user's `~/.xinitrc` (or the system
//! one), both run through `su -l` as that user. Display numbers are handed
//! out monotonically.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use vg_core::config::BackendConfig;
use vg_core::error::BackendError;
use vg_core::traits::SessionBroker;
use vg_core::{BackendEndpoint, Username};

use super::registry::{LiveSession, SessionRegistry};

/// Printed by Xvnc once its RFB listener is up
const READY_MARKER: &str = "Listening for VNC connections";

/// How long a process gets to exit after SIGTERM before it is killed
const STOP_GRACE: Duration = Duration::from_secs(5);

/// A running Xvnc server and desktop session for one user
pub struct XvncSession {
    username: Username,
    display: u32,
    endpoint: BackendEndpoint,
    alive: Arc<AtomicBool>,
    stop: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl XvncSession {
    /// Owning user
    pub fn username(&self) -> &Username {
        &self.username
    }

    /// X display number
    pub fn display(&self) -> u32 {
        self.display
    }

    /// Socket the display server listens on
    pub fn endpoint(&self) -> &BackendEndpoint {
        &self.endpoint
    }

    /// Stop both processes and wait for the supervisor to finish
    pub async fn terminate(&self) {
        self.stop.cancel();
        let handle = self.supervisor.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl LiveSession for XvncSession {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.stop.is_cancelled()
    }
}

/// Starts and supervises per-user Xvnc sessions
pub struct XvncSessionBroker {
    config: BackendConfig,
    registry: Arc<SessionRegistry<XvncSession>>,
    next_display: AtomicU32,
}

impl XvncSessionBroker {
    /// Create a broker; no processes are started until the first resolve
    pub fn new(config: BackendConfig) -> Self {
        let next_display = AtomicU32::new(config.first_display);
        Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
            next_display,
        }
    }

    /// The session registry
    pub fn registry(&self) -> &SessionRegistry<XvncSession> {
        &self.registry
    }

    /// Terminate every supervised session
    pub async fn shutdown(&self) {
        for (username, session) in self.registry.list() {
            info!(%username, display_num = session.display, "stopping display session");
            session.terminate().await;
        }
    }

    fn xvnc_command(&self, socket: &Path, display: u32) -> String {
        format!(
            "{} -SecurityTypes None -RfbPort -1 -RfbUnixPath '{}' :{}",
            self.config.xvnc_path.display(),
            socket.display(),
            display
        )
    }

    fn session_command(&self, display: u32) -> String {
        format!(
            r#"cd "$HOME"; export DISPLAY=:{}; if [[ -f "$HOME/.xinitrc" ]]; then source "$HOME/.xinitrc"; else source "{}"; fi"#,
            display,
            self.config.system_xinitrc.display()
        )
    }

    fn su(&self, user: &Username, command: &str) -> Command {
        let mut cmd = Command::new(&self.config.su_path);
        cmd.arg("-l")
            .arg(user.as_str())
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    async fn launch(&self, user: &Username) -> Result<XvncSession, BackendError> {
        let display_num = self.next_display.fetch_add(1, Ordering::SeqCst);
        let socket = self.config.socket_path(user.as_str());
        remove_socket(&socket);
        info!(username = %user, display_num, socket = %socket.display(), "starting display server");

        let mut xvnc = self
            .su(user, &self.xvnc_command(&socket, display_num))
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| BackendError::Spawn {
                what: "Xvnc",
                source,
            })?;
        let stderr = xvnc.stderr.take().ok_or_else(|| BackendError::Spawn {
            what: "Xvnc",
            source: io::Error::other("stderr was not captured"),
        })?;
        let mut lines = BufReader::new(stderr).lines();

        let mut desktop = match self
            .su(user, &self.session_command(display_num))
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(source) => {
                stop_child(&mut xvnc).await;
                return Err(BackendError::Spawn {
                    what: "desktop session",
                    source,
                });
            }
        };

        let timeout = self.config.start_timeout;
        match tokio::time::timeout(timeout, wait_until_listening(&mut lines)).await {
            Ok(true) => {}
            Ok(false) => {
                let status = match xvnc.wait().await {
                    Ok(status) => status.to_string(),
                    Err(e) => e.to_string(),
                };
                stop_child(&mut desktop).await;
                return Err(BackendError::ExitedBeforeReady {
                    username: user.to_string(),
                    status,
                });
            }
            Err(_) => {
                stop_child(&mut desktop).await;
                stop_child(&mut xvnc).await;
                return Err(BackendError::StartTimeout {
                    username: user.to_string(),
                    timeout,
                });
            }
        }
        info!(username = %user, display_num, "display server ready");

        let alive = Arc::new(AtomicBool::new(true));
        let stop = CancellationToken::new();
        let supervisor = tokio::spawn(supervise(Supervised {
            username: user.clone(),
            display: display_num,
            socket: socket.clone(),
            xvnc,
            desktop,
            lines,
            alive: Arc::clone(&alive),
            stop: stop.clone(),
            registry: Arc::clone(&self.registry),
        }));

        Ok(XvncSession {
            username: user.clone(),
            display: display_num,
            endpoint: BackendEndpoint::Unix(socket),
            alive,
            stop,
            supervisor: Mutex::new(Some(supervisor)),
        })
    }
}

#[async_trait]
impl SessionBroker for XvncSessionBroker {
    async fn resolve(&self, username: &str) -> Result<BackendEndpoint, BackendError> {
        let user = Username::parse(username)
            .ok_or_else(|| BackendError::InvalidUsername(username.to_string()))?;

        let session = self
            .registry
            .get_or_start(user.as_str(), || self.launch(&user))
            .await?;
        debug!(username = %user, display_num = session.display, "resolved display session");
        Ok(session.endpoint.clone())
    }
}

/// Read Xvnc's stderr until it reports readiness; false if it closed first
async fn wait_until_listening(lines: &mut Lines<BufReader<ChildStderr>>) -> bool {
    while let Ok(Some(line)) = lines.next_line().await {
        trace!("Xvnc: {}", line);
        if line.contains(READY_MARKER) {
            return true;
        }
    }
    false
}

struct Supervised {
    username: Username,
    display: u32,
    socket: PathBuf,
    xvnc: Child,
    desktop: Child,
    lines: Lines<BufReader<ChildStderr>>,
    alive: Arc<AtomicBool>,
    stop: CancellationToken,
    registry: Arc<SessionRegistry<XvncSession>>,
}

async fn supervise(mut s: Supervised) {
    let display_num = s.display;
    let lines = &mut s.lines;
    let drain = async move {
        while let Ok(Some(line)) = lines.next_line().await {
            trace!(display_num, "Xvnc: {}", line);
        }
        std::future::pending::<()>().await
    };

    tokio::select! {
        status = s.xvnc.wait() => {
            warn!(username = %s.username, display_num, ?status, "display server exited");
            stop_child(&mut s.desktop).await;
        }
        status = s.desktop.wait() => {
            info!(username = %s.username, display_num, ?status, "desktop session ended");
            stop_child(&mut s.xvnc).await;
        }
        _ = s.stop.cancelled() => {
            stop_child(&mut s.desktop).await;
            stop_child(&mut s.xvnc).await;
        }
        _ = drain => {}
    }

    s.alive.store(false, Ordering::SeqCst);
    s.registry.evict(s.username.as_str());
    remove_socket(&s.socket);
    debug!(username = %s.username, display_num, "display session cleaned up");
}

/// SIGTERM, then SIGKILL after a grace period
async fn stop_child(child: &mut Child) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }

    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: `pid` is our own child and has not been reaped yet
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            if tokio::time::timeout(STOP_GRACE, child.wait()).await.is_ok() {
                return;
            }
        }
    }

    let _ = child.start_kill();
    let _ = child.wait().await;
}

fn remove_socket(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed stale socket"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "failed to remove socket: {}", e),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    const READY_XVNC: &str = "echo 'Xvnc TigerVNC' >&2\n\
        echo \" vncext:      Listening for VNC connections on $5\" >&2\n\
        exec sleep 30\n";

    fn script(path: &Path, body: &str) {
        std::fs::write(path, format!("#!/bin/sh\n{}", body)).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// A config whose `su` runs commands as the current user
    fn fixture(dir: &Path, xvnc_body: &str, desktop_body: &str) -> BackendConfig {
        let su = dir.join("su");
        let xvnc = dir.join("Xvnc");
        script(
            &su,
            &format!(
                "case \"$4\" in\n  *DISPLAY=*) {} ;;\n  *) exec /bin/sh -c \"$4\" ;;\nesac\n",
                desktop_body
            ),
        );
        script(&xvnc, xvnc_body);

        BackendConfig {
            xvnc_path: xvnc,
            su_path: su,
            socket_dir: dir.to_path_buf(),
            first_display: 40,
            start_timeout: Duration::from_secs(10),
            system_xinitrc: PathBuf::from("/etc/X11/xinit/xinitrc"),
        }
    }

    #[test]
    fn test_command_lines() {
        let broker = XvncSessionBroker::new(BackendConfig::default());
        assert_eq!(
            broker.xvnc_command(Path::new("/tmp/rfb-bob.sock"), 100),
            "/usr/bin/Xvnc -SecurityTypes None -RfbPort -1 -RfbUnixPath '/tmp/rfb-bob.sock' :100"
        );
        assert_eq!(
            broker.session_command(101),
            r#"cd "$HOME"; export DISPLAY=:101; if [[ -f "$HOME/.xinitrc" ]]; then source "$HOME/.xinitrc"; else source "/etc/X11/xinit/xinitrc"; fi"#
        );
    }

    #[tokio::test]
    async fn test_rejects_unsafe_username() {
        let dir = tempfile::tempdir().unwrap();
        let broker = XvncSessionBroker::new(fixture(dir.path(), READY_XVNC, "exec sleep 30"));

        let err = broker.resolve("bob; reboot").await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidUsername(_)));
        assert!(broker.registry().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_reuses_running_session() {
        let dir = tempfile::tempdir().unwrap();
        let broker = XvncSessionBroker::new(fixture(dir.path(), READY_XVNC, "exec sleep 30"));

        let first = broker.resolve("bob").await.unwrap();
        assert_eq!(first, BackendEndpoint::Unix(dir.path().join("rfb-bob.sock")));
        let second = broker.resolve("bob").await.unwrap();
        assert_eq!(first, second);

        let session = broker.registry().get("bob").unwrap();
        assert_eq!(session.display(), 40);
        assert!(session.is_alive());

        let other = broker.resolve("alice").await.unwrap();
        assert_ne!(other, first);
        assert_eq!(broker.registry().get("alice").unwrap().display(), 41);

        broker.shutdown().await;
        assert!(!session.is_alive());
        assert!(broker.registry().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_resolve_starts_one_server() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(XvncSessionBroker::new(fixture(
            dir.path(),
            READY_XVNC,
            "exec sleep 30",
        )));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let broker = Arc::clone(&broker);
                tokio::spawn(async move { broker.resolve("bob").await.unwrap() })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(broker.registry().get("bob").unwrap().display(), 40);
        assert_eq!(broker.next_display.load(Ordering::SeqCst), 41);
        broker.shutdown().await;
    }

    #[tokio::test]
    async fn test_exit_before_ready() {
        let dir = tempfile::tempdir().unwrap();
        let broker = XvncSessionBroker::new(fixture(
            dir.path(),
            "echo 'Fatal server error' >&2\nexit 3\n",
            "exec sleep 30",
        ));

        let err = broker.resolve("bob").await.unwrap_err();
        assert!(matches!(err, BackendError::ExitedBeforeReady { .. }));
        assert!(broker.registry().get("bob").is_none());
    }

    #[tokio::test]
    async fn test_start_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = fixture(dir.path(), "exec sleep 30\n", "exec sleep 30");
        config.start_timeout = Duration::from_millis(300);
        let broker = XvncSessionBroker::new(config);

        let err = broker.resolve("bob").await.unwrap_err();
        assert!(matches!(err, BackendError::StartTimeout { .. }));
    }

    #[tokio::test]
    async fn test_desktop_exit_tears_down_session() {
        let dir = tempfile::tempdir().unwrap();
        let broker = XvncSessionBroker::new(fixture(dir.path(), READY_XVNC, "exit 0"));

        broker.resolve("bob").await.unwrap();

        let evicted = async {
            while broker.registry().get("bob").map_or(false, |s| s.is_alive()) {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(10), evicted)
            .await
            .unwrap();

        // The next viewer gets a fresh server on a new display
        broker.resolve("bob").await.unwrap();
        assert_eq!(broker.registry().get("bob").unwrap().display(), 41);
        broker.shutdown().await;
    }
}
