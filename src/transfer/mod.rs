//! File Transfer Engine: local file → remote staging area → container.
//!
//! Workflow for one file:
//! 1. Make sure the staging directory exists (created recursively)
//! 2. Stream the local file over SFTP in fixed-size chunks
//! 3. Resolve the target pod (`kubectl get pods`, first line matching the
//!    selector) and `kubectl cp` the staged file into it
//! 4. Resolve again and `kubectl exec ... chmod -R`
//!
//! Every constructed command is logged before it runs. Nothing is retried
//! and a partially written staging file is left in place on failure.

use std::path::Path;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::logging::LogSink;
use crate::session::CommandResult;
use crate::ssh::{CommandRunner, RemoteFs};

mod error;
pub mod kubectl;

pub use error::TransferError;

/// Upload chunk size (1 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Timeout for each kubectl invocation
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of a successful staging upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct UploadReport {
    pub bytes: u64,
    pub chunks: usize,
}

/// Moves files into a container through a staging area on the SSH host.
///
/// `fs` is the SFTP side of the session; `runner` executes kubectl. They are
/// separate so that commands can go through an elevated session while files
/// are still written over the plain SFTP channel.
pub struct FileTransferEngine<'a> {
    fs: &'a dyn RemoteFs,
    runner: &'a dyn CommandRunner,
    sink: &'a dyn LogSink,
    chunk_size: usize,
    command_timeout: Duration,
}

impl<'a> FileTransferEngine<'a> {
    pub fn new(fs: &'a dyn RemoteFs, runner: &'a dyn CommandRunner, sink: &'a dyn LogSink) -> Self {
        Self {
            fs,
            runner,
            sink,
            chunk_size: DEFAULT_CHUNK_SIZE,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Upload `local_path` to `remote_path`, creating missing parent
    /// directories first.
    pub async fn upload_to_staging(
        &self,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<UploadReport, TransferError> {
        let step = format!("Uploading file: {} -> {}", local_path.display(), remote_path);
        self.sink.step_start(&step);

        let result = async {
            if let Some(dir) = remote_parent(remote_path) {
                self.ensure_remote_dir(dir).await?;
            }
            self.stream_chunks(local_path, remote_path).await
        }
        .await;

        match &result {
            Ok(report) => {
                self.sink.info(&format!(
                    "Successfully uploaded: {} ({} bytes, {} chunks)",
                    local_path.display(),
                    report.bytes,
                    report.chunks
                ));
                self.sink.step_complete(&step);
            }
            Err(e) => self.sink.error(&format!(
                "Failed to upload file {}: {}",
                local_path.display(),
                e
            )),
        }
        result
    }

    /// Create `dir` on the remote host. When the plain create fails, the
    /// parent is ensured first and the create is retried once.
    fn ensure_remote_dir<'b>(&'b self, dir: &'b str) -> BoxFuture<'b, Result<(), TransferError>> {
        async move {
            if dir.is_empty() || dir == "/" || dir == "." {
                return Ok(());
            }
            if self.fs.exists(dir).await? {
                return Ok(());
            }

            if let Err(first) = self.fs.create_dir(dir).await {
                let parent = remote_parent(dir).filter(|p| *p != dir).ok_or_else(|| {
                    TransferError::CreateDir {
                        path: dir.to_string(),
                        reason: first.to_string(),
                    }
                })?;
                debug!("[transfer] mkdir {} failed ({}), creating parent", dir, first);

                self.ensure_remote_dir(parent).await?;
                self.fs
                    .create_dir(dir)
                    .await
                    .map_err(|e| TransferError::CreateDir {
                        path: dir.to_string(),
                        reason: e.to_string(),
                    })?;
            }

            self.sink
                .info(&format!("Created remote directory: {}", dir));
            Ok(())
        }
        .boxed()
    }

    async fn stream_chunks(
        &self,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<UploadReport, TransferError> {
        let upload_err = |e: &dyn std::fmt::Display| TransferError::Upload {
            path: remote_path.to_string(),
            reason: e.to_string(),
        };

        let mut local = tokio::fs::File::open(local_path)
            .await
            .map_err(|e| TransferError::local_io(local_path, e))?;
        let mut remote = self
            .fs
            .create_file(remote_path)
            .await
            .map_err(|e| upload_err(&e))?;

        let mut buffer = vec![0u8; self.chunk_size];
        let mut report = UploadReport {
            bytes: 0,
            chunks: 0,
        };

        loop {
            let n = read_chunk(&mut local, &mut buffer)
                .await
                .map_err(|e| TransferError::local_io(local_path, e))?;
            if n == 0 {
                break;
            }

            remote
                .write_all(&buffer[..n])
                .await
                .map_err(|e| upload_err(&e))?;
            report.chunks += 1;
            report.bytes += n as u64;

            if n < buffer.len() {
                break;
            }
        }

        remote.shutdown().await.map_err(|e| upload_err(&e))?;
        debug!(
            "[transfer] {} -> {}: {} bytes in {} chunks",
            local_path.display(),
            remote_path,
            report.bytes,
            report.chunks
        );
        Ok(report)
    }

    /// Name of the first pod in `namespace` whose listing line contains
    /// `selector`.
    pub async fn resolve_container(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<String, TransferError> {
        let command = kubectl::list_pods_command(namespace);
        let listing = self.run_checked("kubectl list command", &command).await?;

        match kubectl::first_matching_pod(&listing.stdout, selector) {
            Some(pod) => {
                debug!("[transfer] selector '{}' resolved to {}", selector, pod);
                Ok(pod)
            }
            None => Err(TransferError::ContainerNotFound {
                namespace: namespace.to_string(),
                selector: selector.to_string(),
            }),
        }
    }

    /// Listing lines of every pod matching `selector`.
    pub async fn list_containers(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<String>, TransferError> {
        self.sink.info("Getting container information");
        let command = kubectl::list_pods_command(namespace);
        let listing = self.run_checked("kubectl list command", &command).await?;

        let lines: Vec<String> = kubectl::matching_lines(&listing.stdout, selector)
            .into_iter()
            .map(str::to_string)
            .collect();

        if lines.is_empty() {
            self.sink.warning(&format!(
                "No containers found with filter: {}",
                selector
            ));
        } else {
            self.sink
                .info(&format!("Found containers:\n{}", lines.join("\n")));
        }
        Ok(lines)
    }

    /// Copy a staged file into the resolved pod.
    pub async fn copy_to_container(
        &self,
        staging_path: &str,
        container_path: &str,
        namespace: &str,
        selector: &str,
    ) -> Result<(), TransferError> {
        let step = format!(
            "Copying file to container: {} -> {}",
            staging_path, container_path
        );
        self.sink.step_start(&step);

        let result = async {
            let pod = self.resolve_container(namespace, selector).await?;
            let command = kubectl::copy_command(namespace, staging_path, &pod, container_path);
            self.sink.info("Executing kubectl copy command");
            self.run_checked("kubectl command", &command).await
        }
        .await;

        self.finish_step(&step, result, "Successfully copied file to container", "copy file to container")
    }

    /// `chmod -R <permission_spec>` inside the resolved pod.
    pub async fn set_permissions(
        &self,
        container_path: &str,
        permission_spec: &str,
        namespace: &str,
        selector: &str,
    ) -> Result<(), TransferError> {
        let step = format!(
            "Setting file permissions: {} -> {}",
            container_path, permission_spec
        );
        self.sink.step_start(&step);

        let result = async {
            let pod = self.resolve_container(namespace, selector).await?;
            let command = kubectl::chmod_command(namespace, &pod, permission_spec, container_path);
            self.sink.info("Executing chmod command");
            self.run_checked("chmod command", &command).await
        }
        .await;

        let success = format!("Successfully set file permissions to {}", permission_spec);
        self.finish_step(&step, result, &success, "set file permissions")
    }

    /// Run an arbitrary shell command inside the resolved pod.
    ///
    /// A non-zero exit is returned as `Ok` so callers can inspect the
    /// output; only resolution and transport problems are errors.
    pub async fn execute_in_container(
        &self,
        command: &str,
        namespace: &str,
        selector: &str,
        timeout: Duration,
    ) -> Result<CommandResult, TransferError> {
        self.sink
            .info(&format!("Executing command in container: {}", command));
        let pod = self.resolve_container(namespace, selector).await?;
        let full = kubectl::exec_command(namespace, &pod, command);
        self.sink.command_output("kubectl exec command", &full);

        let result = self.runner.execute(&full, timeout, false).await?;
        self.sink.command_output(&full, &result.stdout);
        if !result.success() {
            self.sink.error(&format!(
                "Command failed with exit code {}",
                result.exit_code
            ));
        }
        Ok(result)
    }

    /// Execute `command`, logging it first; a non-zero exit becomes
    /// `TransferError::CommandFailed`.
    async fn run_checked(
        &self,
        label: &str,
        command: &str,
    ) -> Result<CommandResult, TransferError> {
        self.sink.command_output(label, command);

        let result = self
            .runner
            .execute(command, self.command_timeout, false)
            .await?;

        if result.success() {
            if !result.stdout.trim().is_empty() {
                debug!("[transfer] stdout of '{}': {}", command, result.stdout.trim());
            }
            Ok(result)
        } else {
            Err(TransferError::CommandFailed {
                command: command.to_string(),
                exit_code: result.exit_code,
                stdout: result.stdout,
                stderr: result.stderr,
            })
        }
    }

    fn finish_step(
        &self,
        step: &str,
        result: Result<CommandResult, TransferError>,
        success_message: &str,
        action: &str,
    ) -> Result<(), TransferError> {
        match result {
            Ok(output) => {
                self.sink.info(success_message);
                if !output.stdout.trim().is_empty() {
                    self.sink.command_output(action, &output.stdout);
                }
                self.sink.step_complete(step);
                Ok(())
            }
            Err(e) => {
                self.sink.error(&format!("Failed to {}: {}", action, e));
                if let Some(output) = e.failure_output() {
                    self.sink.error(&format!("Error output: {}", output));
                }
                Err(e)
            }
        }
    }
}

/// Fill `buffer` from `reader`; returns fewer bytes than the buffer only at
/// end of file.
async fn read_chunk<R: AsyncRead + Unpin>(
    reader: &mut R,
    buffer: &mut [u8],
) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = reader.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Parent directory of a POSIX remote path.
pub fn remote_parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&trimmed[..idx]),
        None => None,
    }
}

/// Join a remote directory and a file name with exactly one separator.
pub fn remote_join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogLevel, RecordingSink};
    use crate::ssh::SshError;
    use crate::test_support::FakeRemote;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn local_file(len: usize) -> (NamedTempFile, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        file.flush().unwrap();
        (file, data)
    }

    #[test]
    fn test_remote_parent() {
        assert_eq!(remote_parent("/tmp/stage/a.bin"), Some("/tmp/stage"));
        assert_eq!(remote_parent("/a.bin"), Some("/"));
        assert_eq!(remote_parent("/tmp/stage/"), Some("/tmp"));
        assert_eq!(remote_parent("a.bin"), None);
    }

    #[test]
    fn test_remote_join() {
        assert_eq!(remote_join("/tmp/stage", "a.bin"), "/tmp/stage/a.bin");
        assert_eq!(remote_join("/tmp/stage/", "a.bin"), "/tmp/stage/a.bin");
        assert_eq!(remote_join("", "a.bin"), "a.bin");
    }

    #[tokio::test]
    async fn test_chunked_round_trip_around_chunk_boundary() {
        let chunk = 4096;
        for (len, expected_chunks) in [(100, 1), (chunk, 1), (chunk + 1, 2), (3 * chunk, 3)] {
            let remote = FakeRemote::new();
            let sink = RecordingSink::new();
            let engine = FileTransferEngine::new(&remote, &remote, &sink).with_chunk_size(chunk);
            let (file, data) = local_file(len);

            let report = engine
                .upload_to_staging(file.path(), "/tmp/stage/blob")
                .await
                .unwrap();

            assert_eq!(report.bytes, len as u64);
            assert_eq!(report.chunks, expected_chunks, "len {}", len);
            assert_eq!(remote.read_file("/tmp/stage/blob").await.unwrap(), data);
            assert_eq!(remote.chunk_sizes("/tmp/stage/blob").len(), expected_chunks);
        }
    }

    #[tokio::test]
    async fn test_empty_file_uploads_zero_chunks() {
        let remote = FakeRemote::new();
        let sink = RecordingSink::new();
        let engine = FileTransferEngine::new(&remote, &remote, &sink);
        let (file, _) = local_file(0);

        let report = engine
            .upload_to_staging(file.path(), "/tmp/empty")
            .await
            .unwrap();
        assert_eq!(report.chunks, 0);
        assert!(remote.read_file("/tmp/empty").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_directories_are_created_recursively() {
        let remote = FakeRemote::new();
        let sink = RecordingSink::new();
        let engine = FileTransferEngine::new(&remote, &remote, &sink);
        let (file, _) = local_file(10);

        engine
            .upload_to_staging(file.path(), "/srv/deep/nested/stage/x.bin")
            .await
            .unwrap();

        for dir in ["/srv", "/srv/deep", "/srv/deep/nested", "/srv/deep/nested/stage"] {
            assert!(remote.exists(dir).await.unwrap(), "{} missing", dir);
        }
        assert!(sink.contains(LogLevel::Info, "Created remote directory: /srv/deep/nested/stage"));
    }

    #[tokio::test]
    async fn test_directory_creation_failure_aborts_upload() {
        let remote = FakeRemote::new().deny_mkdir("/readonly");
        let sink = RecordingSink::new();
        let engine = FileTransferEngine::new(&remote, &remote, &sink);
        let (file, _) = local_file(10);

        let err = engine
            .upload_to_staging(file.path(), "/readonly/stage/x.bin")
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::CreateDir { .. }));
        assert!(!remote.exists("/readonly/stage/x.bin").await.unwrap());
        assert!(sink.contains(LogLevel::Error, "Failed to upload file"));
    }

    #[tokio::test]
    async fn test_missing_local_file_is_local_io_error() {
        let remote = FakeRemote::new();
        let sink = RecordingSink::new();
        let engine = FileTransferEngine::new(&remote, &remote, &sink);

        let err = engine
            .upload_to_staging(Path::new("/nonexistent/podstage/file"), "/tmp/x")
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::LocalIo { .. }));
    }

    #[tokio::test]
    async fn test_copy_resolves_pod_before_copying() {
        let remote = FakeRemote::new().with_pods("my-app-6c5b7-x2k9p   1/1   Running   0   1d\n");
        let sink = RecordingSink::new();
        let engine = FileTransferEngine::new(&remote, &remote, &sink);

        engine
            .copy_to_container("/tmp/stage/a.bin", "/opt/app/a.bin", "qa", "my-app")
            .await
            .unwrap();

        let commands = remote.commands();
        assert_eq!(commands[0], "kubectl -n qa get pods --no-headers");
        assert_eq!(
            commands[1],
            "kubectl -n qa cp /tmp/stage/a.bin my-app-6c5b7-x2k9p:/opt/app/a.bin"
        );
        // Command text is logged before execution.
        assert!(sink.contains(LogLevel::Info, "Command: kubectl command\nOutput:\nkubectl -n qa cp"));
    }

    #[tokio::test]
    async fn test_zero_matching_pods_is_command_failure_without_copy() {
        let remote = FakeRemote::new().with_pods("other-1   1/1   Running   0   1d\n");
        let sink = RecordingSink::new();
        let engine = FileTransferEngine::new(&remote, &remote, &sink);

        let err = engine
            .copy_to_container("/tmp/stage/a.bin", "/opt/app/a.bin", "qa", "my-app")
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::ContainerNotFound { .. }));
        assert!(err.is_command_failure());
        // Nothing was addressed to an empty pod name.
        assert_eq!(remote.commands().len(), 1);

        let err = engine
            .set_permissions("/opt/app/a.bin", "755", "qa", "my-app")
            .await
            .unwrap_err();
        assert!(err.is_command_failure());
    }

    #[tokio::test]
    async fn test_non_zero_exit_surfaces_stderr() {
        let remote = FakeRemote::new()
            .with_pods("my-app-1   1/1   Running   0   1d\n")
            .fail_command("chmod", 1, "chmod: /opt/app/a.bin: No such file");
        let sink = RecordingSink::new();
        let engine = FileTransferEngine::new(&remote, &remote, &sink);

        let err = engine
            .set_permissions("/opt/app/a.bin", "644", "qa", "my-app")
            .await
            .unwrap_err();

        match &err {
            TransferError::CommandFailed { exit_code, stderr, .. } => {
                assert_eq!(*exit_code, 1);
                assert!(stderr.contains("No such file"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(sink.contains(LogLevel::Error, "Error output: chmod: /opt/app/a.bin"));
    }

    #[tokio::test]
    async fn test_pty_merged_failure_output_is_logged() {
        let remote = FakeRemote::new().with_pods("my-app-1   1/1   Running   0   1d\n").respond(
            " cp ",
            CommandResult {
                exit_code: 1,
                stdout: "error: unable to upgrade connection: pod does not exist\r\n".to_string(),
                stderr: String::new(),
            },
        );
        let sink = RecordingSink::new();
        let engine = FileTransferEngine::new(&remote, &remote, &sink);

        let err = engine
            .copy_to_container("/tmp/stage/a.bin", "/opt/app/a.bin", "qa", "my-app")
            .await
            .unwrap_err();

        assert_eq!(
            err.failure_output(),
            Some("error: unable to upgrade connection: pod does not exist")
        );
        assert!(sink.contains(
            LogLevel::Error,
            "Error output: error: unable to upgrade connection"
        ));
    }

    #[tokio::test]
    async fn test_runner_timeout_is_not_command_failure() {
        let remote = FakeRemote::new()
            .with_pods("my-app-1   1/1   Running   0   1d\n")
            .time_out("chmod");
        let sink = RecordingSink::new();
        let engine = FileTransferEngine::new(&remote, &remote, &sink)
            .with_command_timeout(Duration::from_secs(7));

        let err = engine
            .set_permissions("/opt/app/a.bin", "755", "qa", "my-app")
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Ssh(SshError::Timeout(t)) if t == Duration::from_secs(7)));
        assert!(!err.is_command_failure());
        assert!(err.failure_output().is_none());
        assert!(sink.contains(LogLevel::Error, "Failed to set file permissions"));
    }

    #[tokio::test]
    async fn test_listing_failure_is_command_failure() {
        let remote = FakeRemote::new().fail_command("get pods", 1, "connection refused");
        let sink = RecordingSink::new();
        let engine = FileTransferEngine::new(&remote, &remote, &sink);

        let err = engine.resolve_container("qa", "my-app").await.unwrap_err();
        assert!(matches!(err, TransferError::CommandFailed { exit_code: 1, .. }));
    }

    #[tokio::test]
    async fn test_execute_in_container_returns_output() {
        let remote = FakeRemote::new()
            .with_pods("my-app-1   1/1   Running   0   1d\n")
            .respond("sh -c", CommandResult::ok("total 0\n"));
        let sink = RecordingSink::new();
        let engine = FileTransferEngine::new(&remote, &remote, &sink);

        let result = engine
            .execute_in_container("ls /opt", "qa", "my-app", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "total 0\n");
        assert_eq!(
            remote.commands()[1],
            "kubectl -n qa exec my-app-1 -- sh -c 'ls /opt'"
        );
    }

    #[tokio::test]
    async fn test_list_containers() {
        let remote = FakeRemote::new().with_pods(
            "my-app-1   1/1   Running   0   1d\nmy-app-2   1/1   Running   0   1d\nother   1/1   Running   0   1d\n",
        );
        let sink = RecordingSink::new();
        let engine = FileTransferEngine::new(&remote, &remote, &sink);

        assert_eq!(engine.list_containers("qa", "my-app").await.unwrap().len(), 2);
        assert!(engine.list_containers("qa", "db").await.unwrap().is_empty());
        assert!(sink.contains(LogLevel::Warning, "No containers found with filter: db"));
    }
}
