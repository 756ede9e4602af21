//! TLS client certificate detection.
//!
//! Certificate provisioning happens out of band; the agent only observes
//! whether the certificate file exists. An initial scan sets the flag and
//! a filesystem watcher on the certificate's directory keeps it current,
//! so install/remove is picked up without polling.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::AgentError;

pub struct CertificateMonitor {
    cert_path: PathBuf,
    installed: Arc<AtomicBool>,
    /// Held to keep the watcher alive.
    _watcher: RecommendedWatcher,
}

impl CertificateMonitor {
    /// Scan once and start watching the certificate's directory.
    ///
    /// The directory is created if it does not exist, so the watcher has
    /// something to attach to before the first install.
    pub fn start(cert_path: PathBuf) -> Result<Self, AgentError> {
        let watch_dir = cert_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf();
        if !watch_dir.exists() {
            std::fs::create_dir_all(&watch_dir)?;
        }

        let installed = Arc::new(AtomicBool::new(cert_path.exists()));
        info!(
            path = %cert_path.display(),
            installed = installed.load(Ordering::SeqCst),
            "certificate monitor started"
        );

        let flag = installed.clone();
        let watched_path = cert_path.clone();
        let mut watcher =
            notify::recommended_watcher(move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    if event.paths.iter().any(|p| p == &watched_path) {
                        let present = watched_path.exists();
                        let previous = flag.swap(present, Ordering::SeqCst);
                        if previous != present {
                            info!(
                                path = %watched_path.display(),
                                installed = present,
                                "certificate state changed"
                            );
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "certificate watcher error");
                }
            })?;
        watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;

        Ok(Self {
            cert_path,
            installed,
            _watcher: watcher,
        })
    }

    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    /// Re-check the filesystem directly. The watcher normally keeps the
    /// flag current; this is the belt for the first heartbeat after a
    /// missed event.
    pub fn rescan(&self) -> bool {
        let present = self.cert_path.exists();
        self.installed.store(present, Ordering::SeqCst);
        present
    }

    /// The `certificate_status` object carried in heartbeats and status
    /// reports.
    pub fn status_value(&self) -> Value {
        if self.is_installed() {
            json!({ "status": "installed" })
        } else {
            json!({ "status": "removed" })
        }
    }
}
