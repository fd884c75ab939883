//! Deployment Pipeline
//!
//! Runs each [`FileDescriptor`] through three stages, strictly in order:
//!
//! 1. upload to `<staging_base>/<file name>`
//! 2. `kubectl cp` into the selected pod
//! 3. `chmod -R` inside the pod
//!
//! The pipeline stops at the first failing stage of the first failing file.
//! Later files are not touched, nothing already placed is rolled back and no
//! stage is retried.

mod descriptor;

pub use descriptor::{DescriptorError, FileDescriptor, TransferJob, DEFAULT_PERMISSIONS};

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::logging::LogSink;
use crate::transfer::{FileTransferEngine, TransferError, UploadReport};

/// Stage of the per-file pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStage {
    Upload,
    CopyToContainer,
    SetPermissions,
}

impl fmt::Display for DeployStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployStage::Upload => write!(f, "upload"),
            DeployStage::CopyToContainer => write!(f, "copy to container"),
            DeployStage::SetPermissions => write!(f, "set permissions"),
        }
    }
}

/// Where deployed files go.
#[derive(Debug, Clone)]
pub struct DeployTarget {
    pub staging_base: String,
    pub namespace: String,
    pub container_selector: String,
}

/// First failure of a pipeline run
#[derive(Debug, Error, Serialize)]
#[error("File {} ({}) failed at stage '{stage}': {error}", .index + 1, .local_path.display())]
pub struct StageFailure {
    /// Zero-based position in the input list
    pub index: usize,
    pub local_path: PathBuf,
    pub stage: DeployStage,
    #[source]
    pub error: TransferError,
}

/// Per-file record of a completed deployment
#[derive(Debug, Clone, Serialize)]
pub struct DeployedFile {
    pub local_path: PathBuf,
    pub staging_path: String,
    pub container_path: String,
    pub upload: UploadReport,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeploymentReport {
    pub files: Vec<DeployedFile>,
}

/// Drives a [`FileTransferEngine`] over a batch of descriptors.
pub struct DeploymentPipeline<'a> {
    engine: &'a FileTransferEngine<'a>,
    target: DeployTarget,
    sink: &'a dyn LogSink,
}

impl<'a> DeploymentPipeline<'a> {
    pub fn new(engine: &'a FileTransferEngine<'a>, target: DeployTarget, sink: &'a dyn LogSink) -> Self {
        Self {
            engine,
            target,
            sink,
        }
    }

    /// Deploy `files` in order, fail-fast.
    pub async fn run(&self, files: &[FileDescriptor]) -> Result<DeploymentReport, StageFailure> {
        let total = files.len();
        self.sink
            .info(&format!("Starting batch upload of {} files", total));

        let mut report = DeploymentReport::default();

        for (index, descriptor) in files.iter().enumerate() {
            let job = TransferJob::new(descriptor, &self.target.staging_base);
            self.sink.info(&format!(
                "Processing file {}/{}: {}",
                index + 1,
                total,
                descriptor.file_name()
            ));

            match self.deploy_one(&job).await {
                Ok(upload) => report.files.push(DeployedFile {
                    local_path: descriptor.local_path().to_path_buf(),
                    staging_path: job.staging_path,
                    container_path: descriptor.container_path().to_string(),
                    upload,
                }),
                Err((stage, error)) => {
                    let failure = StageFailure {
                        index,
                        local_path: descriptor.local_path().to_path_buf(),
                        stage,
                        error,
                    };
                    self.sink.error(&format!("Batch upload failed: {}", failure));
                    if index + 1 < total {
                        self.sink.warning(&format!(
                            "Skipping {} remaining file(s)",
                            total - index - 1
                        ));
                    }
                    return Err(failure);
                }
            }
        }

        info!("[deploy] {} file(s) deployed", report.files.len());
        self.sink.info("All files uploaded successfully");
        Ok(report)
    }

    async fn deploy_one(
        &self,
        job: &TransferJob<'_>,
    ) -> Result<UploadReport, (DeployStage, TransferError)> {
        let fd = job.descriptor;
        let target = &self.target;

        let upload = self
            .engine
            .upload_to_staging(fd.local_path(), &job.staging_path)
            .await
            .map_err(|e| (DeployStage::Upload, e))?;

        self.engine
            .copy_to_container(
                &job.staging_path,
                fd.container_path(),
                &target.namespace,
                &target.container_selector,
            )
            .await
            .map_err(|e| (DeployStage::CopyToContainer, e))?;

        self.engine
            .set_permissions(
                fd.container_path(),
                fd.permissions(),
                &target.namespace,
                &target.container_selector,
            )
            .await
            .map_err(|e| (DeployStage::SetPermissions, e))?;

        Ok(upload)
    }
}
