use crate::config::Config;
use crate::types::{Event, Role};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

/// Per-role provisioning scripts on disk. Scripts are re-read on every use
/// so an edited file is always picked up in full, never half-cached.
pub struct ProvisionStore {
    master_path: PathBuf,
    worker_path: PathBuf,
}

impl ProvisionStore {
    pub fn new(conf: &Config) -> Self {
        Self {
            master_path: PathBuf::from(&conf.master_setup_path),
            worker_path: PathBuf::from(&conf.worker_setup_path),
        }
    }

    pub fn path(&self, role: Role) -> &Path {
        match role {
            Role::Master => &self.master_path,
            Role::Worker => &self.worker_path,
        }
    }

    /// One statement per line, order and duplicates preserved as written.
    pub fn load(&self, role: Role) -> io::Result<Vec<String>> {
        let contents = fs::read_to_string(self.path(role))?;
        Ok(contents.lines().map(str::to_owned).collect())
    }
}

/// Polls one provisioning file and reports content changes on the event
/// channel. Detection is by content hash, so a touch without an edit stays
/// quiet.
pub struct FileWatcher {
    path: PathBuf,
    role: Role,
    events: mpsc::Sender<Event>,
    poll_interval: std::time::Duration,
    current: md5::Digest,
}

impl FileWatcher {
    /// Fails when the file cannot be hashed at startup; a manager watching
    /// a missing script is misconfigured.
    pub fn new(
        path: impl Into<PathBuf>,
        role: Role,
        events: mpsc::Sender<Event>,
    ) -> io::Result<Self> {
        let path = path.into();
        let current = digest(&path)?;
        Ok(Self {
            path,
            role,
            events,
            poll_interval: POLL_INTERVAL,
            current,
        })
    }

    pub async fn run(mut self) {
        info!("Start watcher for: {}", self.path.display());
        loop {
            tokio::time::sleep(self.poll_interval).await;
            match digest(&self.path) {
                Ok(new) if new != self.current => {
                    info!("File {} has changed, starting provisioning", self.path.display());
                    self.current = new;
                    if self.events.send(Event::ProvisionChange(self.role)).await.is_err() {
                        return;
                    }
                }
                Ok(_) => debug!("No changes for {}", self.path.display()),
                // Keep the previous digest; the next poll retries the read.
                Err(e) => warn!("could not read {}: {}", self.path.display(), e),
            }
        }
    }
}

fn digest(path: &Path) -> io::Result<md5::Digest> {
    Ok(md5::compute(fs::read(path)?))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::time::timeout;

    fn write_file(path: &Path, contents: &str) {
        let mut f = fs::File::create(path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    fn store_for(dir: &Path) -> ProvisionStore {
        ProvisionStore {
            master_path: dir.join("master.setup"),
            worker_path: dir.join("worker.setup"),
        }
    }

    #[test]
    fn load_preserves_order_duplicates_and_blanks() {
        let dir = tempdir().unwrap();
        write_file(
            &dir.path().join("worker.setup"),
            "CREATE EXTENSION IF NOT EXISTS citus\n\nSELECT 1\nSELECT 1\n",
        );
        let store = store_for(dir.path());
        let script = store.load(Role::Worker).unwrap();
        assert_eq!(
            script,
            vec!["CREATE EXTENSION IF NOT EXISTS citus", "", "SELECT 1", "SELECT 1"]
        );
    }

    #[test]
    fn digest_tracks_content_not_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("master.setup");
        write_file(&path, "SELECT 1\n");
        let first = digest(&path).unwrap();
        // Rewriting identical bytes updates mtime but not the digest.
        write_file(&path, "SELECT 1\n");
        assert_eq!(first, digest(&path).unwrap());
        write_file(&path, "SELECT 2\n");
        assert_ne!(first, digest(&path).unwrap());
    }

    #[tokio::test]
    async fn change_and_revert_fire_one_event_each() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("worker.setup");
        write_file(&path, "SELECT 1\n");

        let (tx, mut rx) = mpsc::channel(8);
        let watcher = FileWatcher {
            path: path.clone(),
            role: Role::Worker,
            events: tx,
            poll_interval: Duration::from_millis(20),
            current: digest(&path).unwrap(),
        };
        tokio::spawn(watcher.run());

        write_file(&path, "SELECT 2\n");
        let event = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(event, Some(Event::ProvisionChange(Role::Worker)));

        write_file(&path, "SELECT 1\n");
        let event = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(event, Some(Event::ProvisionChange(Role::Worker)));
    }

    #[tokio::test]
    async fn unchanged_content_stays_quiet() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("master.setup");
        write_file(&path, "SELECT 1\n");

        let (tx, mut rx) = mpsc::channel(8);
        let watcher = FileWatcher {
            path: path.clone(),
            role: Role::Master,
            events: tx,
            poll_interval: Duration::from_millis(20),
            current: digest(&path).unwrap(),
        };
        tokio::spawn(watcher.run());

        // Same bytes again: several polls, no event.
        write_file(&path, "SELECT 1\n");
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn missing_file_fails_watch_startup() {
        let dir = tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(8);
        assert!(FileWatcher::new(dir.path().join("absent.setup"), Role::Master, tx).is_err());
    }
}
