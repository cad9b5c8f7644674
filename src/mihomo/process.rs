//! Mihomo core process lifecycle
//!
//! Downloads and caches the core binary, spawns it against a config
//! file and a control socket, polls the control API until ready, and
//! stops it with SIGINT escalating to a forced kill.

use super::ControlClient;
use crate::{Error, Result};
use flate2::read::GzDecoder;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Pinned core release
pub const MIHOMO_VERSION: &str = "1.19.1";

/// Cached compressed artifact name
const ARCHIVE_NAME: &str = "mihomo.gz";

/// Cached executable name
const BINARY_NAME: &str = "mihomo";

/// Interval between readiness polls
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Readiness poll attempts before giving up
const READY_MAX_ATTEMPTS: u32 = 20;

/// Grace period between SIGINT and a forced kill
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Download URL for the pinned release
fn artifact_url() -> String {
    format!(
        "https://github.com/MetaCubeX/mihomo/releases/download/v{v}/mihomo-linux-amd64-v{v}.gz",
        v = MIHOMO_VERSION
    )
}

/// Handle to one (optional) running core process
pub struct MihomoCore {
    work_dir: PathBuf,
    socket_path: PathBuf,
    child: Option<Child>,
    client: ControlClient,
}

impl MihomoCore {
    /// Create a handle rooted at `work_dir`; nothing is spawned yet.
    pub fn new<P: Into<PathBuf>>(work_dir: P) -> Self {
        let work_dir = work_dir.into();
        let socket_path = work_dir.join("mihomo.sock");
        let client = ControlClient::new(&socket_path);
        MihomoCore { work_dir, socket_path, child: None, client }
    }

    /// Control client bound to this core's socket
    pub fn client(&self) -> &ControlClient {
        &self.client
    }

    pub fn archive_path(&self) -> PathBuf {
        self.work_dir.join(ARCHIVE_NAME)
    }

    pub fn binary_path(&self) -> PathBuf {
        self.work_dir.join(BINARY_NAME)
    }

    /// Make sure the core executable exists, downloading and unpacking
    /// the release artifact if needed. A failed download is fatal to
    /// the run.
    pub async fn ensure_binary(&self, http: &reqwest::Client) -> Result<()> {
        if self.binary_path().exists() {
            debug!("core binary already cached at {}", self.binary_path().display());
            return Ok(());
        }

        if !self.archive_path().exists() {
            let url = artifact_url();
            info!("downloading mihomo core from {url}");

            let response = http.get(&url).send().await.map_err(|e| Error::network(e.to_string()))?;
            if !response.status().is_success() {
                return Err(Error::network(format!(
                    "core download failed: status {}",
                    response.status()
                )));
            }
            let bytes = response.bytes().await.map_err(|e| Error::network(e.to_string()))?;
            debug!("downloaded {} bytes", bytes.len());
            tokio::fs::write(self.archive_path(), &bytes).await?;
        }

        self.unpack_archive()?;
        info!("mihomo core ready at {}", self.binary_path().display());
        Ok(())
    }

    /// Gunzip the cached artifact and set the executable bit
    fn unpack_archive(&self) -> Result<()> {
        let archive = std::fs::File::open(self.archive_path())?;
        let mut decoder = GzDecoder::new(std::io::BufReader::new(archive));
        let mut binary = std::fs::File::create(self.binary_path())?;
        std::io::copy(&mut decoder, &mut binary)?;
        drop(binary);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(self.binary_path())?.permissions();
            perms.set_mode(perms.mode() | 0o111);
            std::fs::set_permissions(self.binary_path(), perms)?;
        }

        Ok(())
    }

    /// Spawn the core against `config_path` and poll the control socket
    /// until it answers the version call.
    ///
    /// The child exiting before it becomes ready and the polls running
    /// out are both fatal; the bounded poll never loops forever.
    pub async fn start(&mut self, config_path: &Path) -> Result<()> {
        if self.child.is_some() {
            return Ok(());
        }

        // Stale socket from a previous run would answer nobody
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!("failed to remove stale control socket: {}", e);
            }
        }

        info!(
            "starting mihomo: {} -f {} -ext-ctl-unix {}",
            self.binary_path().display(),
            config_path.display(),
            self.socket_path.display()
        );

        let mut child = Command::new(self.binary_path())
            .arg("-f")
            .arg(config_path)
            .arg("-ext-ctl-unix")
            .arg(&self.socket_path)
            .arg("-d")
            .arg(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::process(format!("failed to spawn mihomo: {e}")))?;

        for attempt in 1..=READY_MAX_ATTEMPTS {
            if let Some(status) = child
                .try_wait()
                .map_err(|e| Error::process(e.to_string()))?
            {
                return Err(Error::process(format!("mihomo exited before ready: {status}")));
            }

            if let Some(version) = self.client.version().await {
                info!("mihomo {} ready after {} poll(s)", version, attempt);
                self.child = Some(child);
                return Ok(());
            }

            sleep(READY_POLL_INTERVAL).await;
        }

        let _ = child.kill().await;
        Err(Error::timeout(format!(
            "mihomo control socket not ready after {READY_MAX_ATTEMPTS} polls"
        )))
    }

    /// Whether the child process is still alive
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Stop the core: SIGINT, bounded wait, forced kill on timeout.
    /// Idempotent; a handle that never started is a no-op.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        info!("stopping mihomo");

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            if let Some(pid) = child.id() {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGINT);
            }
        }

        match timeout(STOP_GRACE, child.wait()).await {
            Ok(Ok(status)) => info!("mihomo exited with status: {}", status),
            Ok(Err(e)) => warn!("error waiting for mihomo: {}", e),
            Err(_) => {
                warn!("mihomo didn't exit within {:?}, forcing kill", STOP_GRACE);
                let _ = child.kill().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_artifact_url_is_pinned() {
        let url = artifact_url();
        assert!(url.contains("v1.19.1"));
        assert!(url.ends_with(".gz"));
    }

    #[test]
    fn test_cache_paths() {
        let core = MihomoCore::new("/tmp/work");
        assert_eq!(core.archive_path(), PathBuf::from("/tmp/work/mihomo.gz"));
        assert_eq!(core.binary_path(), PathBuf::from("/tmp/work/mihomo"));
    }

    #[test]
    fn test_unpack_archive_sets_exec_bit() {
        let dir = tempfile::tempdir().unwrap();
        let core = MihomoCore::new(dir.path());

        let mut encoder = GzEncoder::new(
            std::fs::File::create(core.archive_path()).unwrap(),
            Compression::default(),
        );
        encoder.write_all(b"#!/bin/sh\nexit 0\n").unwrap();
        encoder.finish().unwrap();

        core.unpack_archive().unwrap();

        let content = std::fs::read(core.binary_path()).unwrap();
        assert_eq!(content, b"#!/bin/sh\nexit 0\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(core.binary_path()).unwrap().permissions().mode();
            assert_ne!(mode & 0o111, 0);
        }
    }

    #[tokio::test]
    async fn test_ensure_binary_skips_when_cached() {
        let dir = tempfile::tempdir().unwrap();
        let core = MihomoCore::new(dir.path());
        std::fs::write(core.binary_path(), b"stub").unwrap();

        // Cached binary short-circuits before any network use
        let http = reqwest::Client::new();
        core.ensure_binary(&http).await.unwrap();
    }

    #[tokio::test]
    async fn test_start_missing_binary_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut core = MihomoCore::new(dir.path());

        let err = core.start(Path::new("config.yaml")).await.unwrap_err();
        assert!(matches!(err, Error::Process(_)));
        assert!(!core.is_running());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut core = MihomoCore::new(dir.path());
        core.stop().await;
        assert!(!core.is_running());
    }
}
