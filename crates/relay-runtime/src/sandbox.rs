//! Command execution shared across a task tree.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use relay_config::schema::SandboxConfig;
use relay_core::{ConversationId, RelayError, Result, Sandbox, SandboxFactory};

const MAX_OUTPUT_CHARS: usize = 20_000;

/// Runs `<shell> -c <command>` in a per-root workspace directory.
pub struct LocalSandbox {
    workdir: PathBuf,
    shell: String,
    timeout: Option<Duration>,
    running: AtomicBool,
}

impl LocalSandbox {
    pub fn new(workdir: PathBuf, shell: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            workdir,
            shell: shell.into(),
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            running: AtomicBool::new(false),
        }
    }

    pub fn workdir(&self) -> &PathBuf {
        &self.workdir
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.workdir).await?;
        self.running.store(true, Ordering::SeqCst);
        info!(workdir = ?self.workdir, "sandbox ready");
        Ok(())
    }

    async fn run_command(&self, command: &str) -> Result<String> {
        if !self.is_running() {
            return Err(RelayError::Sandbox("sandbox is not running".into()));
        }
        debug!(command, workdir = ?self.workdir, "running command");

        let mut cmd = tokio::process::Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            // stdin closed so prompting commands fail fast instead of hanging
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, cmd.output())
                .await
                .map_err(|_| {
                    RelayError::Sandbox(format!("command timed out after {}s", limit.as_secs()))
                })?,
            None => cmd.output().await,
        }
        .map_err(|e| RelayError::Sandbox(e.to_string()))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        if combined.chars().count() > MAX_OUTPUT_CHARS {
            combined = combined.chars().take(MAX_OUTPUT_CHARS).collect();
            combined.push_str("\n[output truncated]");
        }
        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            combined.push_str(&format!("\n[exit code {code}]"));
        }
        Ok(combined)
    }

    async fn destroy(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        info!(workdir = ?self.workdir, "sandbox stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Creates one [`LocalSandbox`] per root conversation under the workspace root.
pub struct LocalSandboxFactory {
    config: SandboxConfig,
}

impl LocalSandboxFactory {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }
}

impl SandboxFactory for LocalSandboxFactory {
    fn create(&self, root: &ConversationId) -> Arc<dyn Sandbox> {
        Arc::new(LocalSandbox::new(
            self.config.workspace_root.join(root.as_str()),
            self.config.shell.clone(),
            self.config.command_timeout_secs,
        ))
    }
}

struct PoolEntry {
    sandbox: Arc<dyn Sandbox>,
    holders: HashSet<ConversationId>,
}

/// One sandbox per root conversation, reference-counted by the set of
/// conversations holding it. Destroyed when the last holder releases it.
pub struct SandboxPool {
    factory: Arc<dyn SandboxFactory>,
    entries: Mutex<HashMap<ConversationId, PoolEntry>>,
}

impl SandboxPool {
    pub fn new(factory: Arc<dyn SandboxFactory>) -> Self {
        Self {
            factory,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Get (creating and initialising on first use) the sandbox of `root`,
    /// recording `holder` as a reference. Repeated acquires by one holder count once.
    pub async fn acquire(
        &self,
        root: &ConversationId,
        holder: &ConversationId,
    ) -> Result<Arc<dyn Sandbox>> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(root) {
            entry.holders.insert(holder.clone());
            return Ok(entry.sandbox.clone());
        }

        let sandbox = self.factory.create(root);
        sandbox.init().await?;
        debug!(root = %root, holder = %holder, "sandbox created");
        entries.insert(
            root.clone(),
            PoolEntry {
                sandbox: sandbox.clone(),
                holders: HashSet::from([holder.clone()]),
            },
        );
        Ok(sandbox)
    }

    /// Drop `holder`'s reference; tears the sandbox down when none remain.
    pub async fn release(&self, root: &ConversationId, holder: &ConversationId) {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(root) else {
            return;
        };
        entry.holders.remove(holder);
        if !entry.holders.is_empty() {
            return;
        }
        if let Some(entry) = entries.remove(root)
            && let Err(e) = entry.sandbox.destroy().await
        {
            warn!(root = %root, error = %e, "failed to destroy sandbox");
        }
    }

    /// Number of holders currently referencing `root`'s sandbox.
    pub async fn ref_count(&self, root: &ConversationId) -> usize {
        self.entries
            .lock()
            .await
            .get(root)
            .map(|e| e.holders.len())
            .unwrap_or(0)
    }

    /// Destroy every sandbox regardless of holders.
    pub async fn shutdown(&self) {
        let drained: Vec<(ConversationId, PoolEntry)> =
            self.entries.lock().await.drain().collect();
        for (root, entry) in drained {
            if let Err(e) = entry.sandbox.destroy().await {
                warn!(root = %root, error = %e, "failed to destroy sandbox");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingSandbox {
        running: AtomicBool,
        destroyed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Sandbox for CountingSandbox {
        async fn init(&self) -> Result<()> {
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn run_command(&self, command: &str) -> Result<String> {
            Ok(command.to_string())
        }
        async fn destroy(&self) -> Result<()> {
            self.running.store(false, Ordering::SeqCst);
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
    }

    struct CountingFactory {
        created: AtomicUsize,
        destroyed: Arc<AtomicUsize>,
    }

    impl SandboxFactory for CountingFactory {
        fn create(&self, _root: &ConversationId) -> Arc<dyn Sandbox> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Arc::new(CountingSandbox {
                running: AtomicBool::new(false),
                destroyed: self.destroyed.clone(),
            })
        }
    }

    #[tokio::test]
    async fn test_pool_shares_per_root_and_refcounts() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let factory = Arc::new(CountingFactory {
            created: AtomicUsize::new(0),
            destroyed: destroyed.clone(),
        });
        let pool = SandboxPool::new(factory.clone());
        let root = ConversationId::new();
        let child = ConversationId::new();

        let a = pool.acquire(&root, &root).await.unwrap();
        let b = pool.acquire(&root, &child).await.unwrap();
        pool.acquire(&root, &child).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(pool.ref_count(&root).await, 2);

        pool.release(&root, &child).await;
        assert!(a.is_running());
        pool.release(&root, &root).await;
        assert!(!a.is_running());
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.ref_count(&root).await, 0);
    }

    #[tokio::test]
    async fn test_local_sandbox_runs_in_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = LocalSandbox::new(dir.path().join("ws"), "sh", 10);
        sandbox.init().await.unwrap();
        sandbox.run_command("echo hi > out.txt").await.unwrap();
        assert!(dir.path().join("ws").join("out.txt").exists());
        let out = sandbox.run_command("echo err 1>&2; exit 3").await.unwrap();
        assert!(out.contains("err"));
        assert!(out.contains("[exit code 3]"));
    }

    #[tokio::test]
    async fn test_local_sandbox_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = LocalSandbox::new(dir.path().to_path_buf(), "sh", 1);
        sandbox.init().await.unwrap();
        let err = sandbox.run_command("sleep 5").await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_stopped_sandbox_rejects_commands() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = LocalSandbox::new(dir.path().to_path_buf(), "sh", 0);
        assert!(sandbox.run_command("true").await.is_err());
    }
}
