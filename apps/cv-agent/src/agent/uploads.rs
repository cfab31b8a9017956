use std::path::Path;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::llm_client::{FilePurpose, LlmError, LlmTransport};

/// Remote file ids created during one run. `release` drains the registry, so
/// each id is deleted at most once no matter how many exit paths call it.
/// Ids still held when the registry is dropped are deleted in the background.
pub struct UploadRegistry {
    transport: Arc<dyn LlmTransport>,
    file_ids: Vec<String>,
}

impl UploadRegistry {
    pub fn new(transport: Arc<dyn LlmTransport>) -> Self {
        Self {
            transport,
            file_ids: Vec::new(),
        }
    }

    /// Uploads a file and records its id.
    ///
    /// The upload runs in its own task. If this future is dropped before the
    /// upload finishes, the task deletes the remote file itself.
    pub async fn upload(&mut self, path: &Path, purpose: FilePurpose) -> Result<String, LlmError> {
        let (tx, rx) = oneshot::channel();
        let transport = self.transport.clone();
        let owned = path.to_path_buf();
        tokio::spawn(async move {
            let uploaded = transport.upload_file(&owned, purpose).await;
            if let Err(Ok(file_id)) = tx.send(uploaded) {
                warn!(file_id = %file_id, "Upload finished after its run ended; deleting it");
                delete_all(transport.as_ref(), vec![file_id]).await;
            }
        });

        let file_id = rx.await.map_err(|_| LlmError::Upload {
            path: path.display().to_string(),
            message: "upload task ended without a result".to_string(),
        })??;
        self.file_ids.push(file_id.clone());
        Ok(file_id)
    }

    pub fn len(&self) -> usize {
        self.file_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file_ids.is_empty()
    }

    /// Deletes every recorded file. Failures are logged and never raised.
    /// Returns how many deletions succeeded.
    pub async fn release(&mut self) -> usize {
        debug!(pending = self.len(), "Releasing remote uploads");
        let file_ids = std::mem::take(&mut self.file_ids);
        delete_all(self.transport.as_ref(), file_ids).await
    }
}

impl Drop for UploadRegistry {
    fn drop(&mut self) {
        if self.is_empty() {
            return;
        }
        let file_ids = std::mem::take(&mut self.file_ids);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(count = file_ids.len(), "Run dropped before cleanup; releasing uploads in the background");
                let transport = self.transport.clone();
                handle.spawn(async move {
                    delete_all(transport.as_ref(), file_ids).await;
                });
            }
            Err(_) => warn!(?file_ids, "No runtime left to delete uploaded files"),
        }
    }
}

async fn delete_all(transport: &dyn LlmTransport, file_ids: Vec<String>) -> usize {
    let mut deleted = 0;
    for file_id in file_ids {
        match transport.delete_file(&file_id).await {
            Ok(()) => {
                debug!(file_id = %file_id, "Deleted uploaded file");
                deleted += 1;
            }
            Err(e) => warn!(file_id = %file_id, "Could not delete uploaded file: {e}"),
        }
    }
    deleted
}
