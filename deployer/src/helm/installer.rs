//! Chart installer process runner

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::DeployerError;
use crate::output::{spawn_line_reader, OutputSink};

/// Prefix attached to every forwarded installer line
pub const INSTALLER_OUTPUT_SOURCE: &str = "HELM";

/// Runs the helm binary, one invocation at a time
#[derive(Clone)]
pub struct HelmInstaller {
    binary: PathBuf,
    output: Option<Arc<dyn OutputSink>>,
}

impl HelmInstaller {
    /// Create an installer for the given binary; output is discarded
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            output: None,
        }
    }

    /// Stream the installer's stdout into `sink`
    pub fn with_output(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.output = Some(sink);
        self
    }

    /// Run the installer with `args` and wait for it to exit
    ///
    /// A non-zero exit is returned as `InstallerFailure`; a process killed by
    /// a signal reports exit code -1. Stderr is inherited and never inspected.
    pub async fn run<I, S>(&self, args: I) -> Result<ExitStatus, DeployerError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<OsString> = args
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect();
        debug!("Running {} {:?}", self.binary.display(), args);

        let stdout = if self.output.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        };

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DeployerError::InstallerError(format!(
                    "Failed to run {}: {}",
                    self.binary.display(),
                    e
                ))
            })?;

        let reader = child.stdout.take().map(|stdout| {
            spawn_line_reader(
                stdout,
                INSTALLER_OUTPUT_SOURCE.to_string(),
                self.output.clone(),
            )
        });

        let status = child.wait().await?;

        if let Some(reader) = reader {
            match reader.await {
                Ok(Ok(lines)) => debug!("Installer produced {} lines of output", lines),
                Ok(Err(e)) => warn!("Failed to read installer output: {}", e),
                Err(e) => warn!("Installer output reader failed: {}", e),
            }
        }

        if !status.success() {
            return Err(DeployerError::InstallerFailure {
                exit_code: status.code().unwrap_or(-1),
            });
        }

        Ok(status)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::output::CollectingSink;

    #[tokio::test]
    async fn test_zero_exit_is_success() {
        let status = HelmInstaller::new("sh").run(["-c", "exit 0"]).await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_non_zero_exit_carries_code() {
        let err = HelmInstaller::new("sh").run(["-c", "exit 1"]).await.unwrap_err();
        assert!(matches!(err, DeployerError::InstallerFailure { exit_code: 1 }));
    }

    #[tokio::test]
    async fn test_verbose_output_is_tagged() {
        let sink = Arc::new(CollectingSink::new());
        HelmInstaller::new("sh")
            .with_output(sink.clone())
            .run(["-c", "echo first; echo second"])
            .await
            .unwrap();

        assert_eq!(
            sink.lines(),
            vec![
                ("HELM".to_string(), "first".to_string()),
                ("HELM".to_string(), "second".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_large_output_does_not_stall_child() {
        let sink = Arc::new(CollectingSink::new());
        HelmInstaller::new("sh")
            .with_output(sink.clone())
            .run(["-c", "i=0; while [ $i -lt 20000 ]; do echo line-$i; i=$((i+1)); done"])
            .await
            .unwrap();
        assert_eq!(sink.lines().len(), 20000);
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let err = HelmInstaller::new("/nonexistent/helm")
            .run(["version"])
            .await
            .unwrap_err();
        assert!(matches!(err, DeployerError::InstallerError(_)));
    }
}
