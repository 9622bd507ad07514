//! Background writer that serializes saves.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::atomic::write_snapshot;
use crate::codec::{Codec, CodecError};
use crate::error::{Result, StoreError};

/// One save request; the outcome goes back through `reply`.
pub(crate) struct SaveTask {
    pub(crate) reply: oneshot::Sender<Result<()>>,
}

/// Consumes save requests one at a time, so writes to the target never overlap.
pub(crate) struct Writer<T, C> {
    object: Arc<RwLock<T>>,
    path: PathBuf,
    codec: Arc<C>,
    sync: bool,
    tasks: mpsc::Receiver<SaveTask>,
}

impl<T, C> Writer<T, C>
where
    T: Serialize + Send + Sync + 'static,
    C: Codec,
{
    pub(crate) fn new(
        object: Arc<RwLock<T>>,
        path: PathBuf,
        codec: Arc<C>,
        sync: bool,
        tasks: mpsc::Receiver<SaveTask>,
    ) -> Self {
        Self {
            object,
            path,
            codec,
            sync,
            tasks,
        }
    }

    /// Runs until every sender is gone and the queue is drained.
    pub(crate) async fn run(mut self) {
        debug!(path = %self.path.display(), "writer started");

        while let Some(task) = self.tasks.recv().await {
            let result = self.write().await;
            match &result {
                Ok(()) => debug!(path = %self.path.display(), "snapshot committed"),
                Err(e) => warn!(path = %self.path.display(), error = %e, "save failed"),
            }
            // The caller may have stopped waiting
            let _ = task.reply.send(result);
        }

        debug!(path = %self.path.display(), "writer stopped");
    }

    /// Snapshots the object as it is now and commits it.
    async fn write(&self) -> Result<()> {
        let object = Arc::clone(&self.object);
        let path = self.path.clone();
        let codec = Arc::clone(&self.codec);
        let sync = self.sync;

        let outcome = tokio::task::spawn_blocking(move || {
            let guard = object
                .read()
                .map_err(|_| StoreError::InvalidObject("object lock is poisoned".to_string()))?;
            write_snapshot(&path, &*guard, codec.as_ref(), sync)
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(e) => Err(StoreError::Encode {
                path: self.path.clone(),
                source: CodecError::new(std::io::Error::other(format!(
                    "encoder panicked: {}",
                    e
                ))),
            }),
        }
    }
}
