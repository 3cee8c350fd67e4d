//! Periodic weight snapshots of a shared agent

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use hrl_core::{CheckpointPaths, FeatureEncoder, RLError, Result};

use crate::smdp::SmdpAgent;

/// Running autosave task
#[derive(Debug)]
pub struct AutosaveHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<u64>,
}

impl AutosaveHandle {
    /// Stop the task and wait for it. Returns the number of snapshots written.
    pub async fn stop(mut self) -> Result<u64> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        (&mut self.task)
            .await
            .map_err(|e| RLError::Other(anyhow::anyhow!("autosave task failed: {e}")))
    }

    /// Abort without waiting
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Every `period`, snapshot `agent` under a read lock and write the
/// weights to the files at `prefix`. The first snapshot is taken after one
/// full period.
pub fn spawn_autosave<E>(
    agent: Arc<RwLock<SmdpAgent<E>>>,
    prefix: impl Into<PathBuf>,
    period: Duration,
) -> AutosaveHandle
where
    E: FeatureEncoder,
{
    let paths = Arc::new(CheckpointPaths::new(prefix.into()));
    let (stop_tx, mut stop_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        let mut written = 0u64;
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = interval.tick() => {
                    let snapshot = agent.read().await.snapshot();
                    let paths = Arc::clone(&paths);
                    let result = tokio::task::spawn_blocking(move || {
                        snapshot.write(&paths).map(|()| (snapshot.steps, snapshot.taken_at))
                    })
                    .await;

                    match result {
                        Ok(Ok((steps, taken_at))) => {
                            written += 1;
                            metrics::counter!("hrl.autosave.snapshots", 1);
                            info!(steps, %taken_at, "autosaved weights");
                        }
                        Ok(Err(e)) => warn!(error = %e, "autosave failed"),
                        Err(e) => warn!(error = %e, "autosave writer panicked"),
                    }
                }
            }
        }
        written
    });

    AutosaveHandle {
        stop: Some(stop_tx),
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SmdpConfig;
    use hrl_core::{ActionSet, TabularEncoder};

    fn test_agent() -> SmdpAgent<TabularEncoder> {
        SmdpAgent::new(SmdpConfig::default(), ActionSet::cardinal(), TabularEncoder::new(2)).unwrap()
    }

    #[tokio::test]
    async fn test_autosave_writes_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("auto");
        let agent = test_agent();
        let agent = Arc::new(RwLock::new(agent));

        let handle = spawn_autosave(Arc::clone(&agent), &prefix, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(90)).await;
        let written = handle.stop().await.unwrap();

        assert!(written >= 1);
        assert!(dir.path().join("auto_state_decoders.txt").exists());
        assert!(dir.path().join("auto_old_state_decoders.txt").exists());
        assert!(dir.path().join("auto_state_encoders.txt").exists());
    }

    #[tokio::test]
    async fn test_stop_before_first_period() {
        let dir = tempfile::tempdir().unwrap();
        let agent = test_agent();
        let handle = spawn_autosave(
            Arc::new(RwLock::new(agent)),
            dir.path().join("never"),
            Duration::from_secs(3600),
        );
        assert_eq!(handle.stop().await.unwrap(), 0);
        assert!(!dir.path().join("never_state_decoders.txt").exists());
    }
}
