//! A tool for executing commands.

use crate::error::ExecutorError;
use std::path::PathBuf;
use std::time::Duration;

/// Represents a command executor.
///
/// # Example
///
/// ```rust,no_run
/// # use bili_dl::utils;
/// # use std::path::PathBuf;
/// # use std::time::Duration;
/// # use bili_dl::executor::Executor;
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let args = vec!["-version"];
///
/// let executor = Executor {
///     executable_path: PathBuf::from("ffmpeg"),
///     timeout: Duration::from_secs(30),
///     args: utils::to_owned(args),
/// };
///
/// let output = executor.execute().await?;
/// println!("Output: {}", output.stdout);
///
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Executor {
    /// The path to the command executable.
    pub executable_path: PathBuf,
    /// The timeout for the process.
    pub timeout: Duration,

    /// The arguments to pass to the command.
    pub args: Vec<String>,
}

/// Represents the output of a process.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    /// The stdout of the process.
    pub stdout: String,
    /// The stderr of the process.
    pub stderr: String,
    /// The exit code of the process.
    pub code: i32,
}

impl Executor {
    /// Executes the command and returns the output.
    ///
    /// # Errors
    ///
    /// This function will return an error if the command could not be executed,
    /// exited with a non-zero status, or if the process timed out.
    pub async fn execute(&self) -> Result<ProcessOutput, ExecutorError> {
        #[cfg(feature = "tracing")]
        tracing::debug!("Executing command: {:?}", self);

        let mut command = tokio::process::Command::new(&self.executable_path);
        command.stdin(std::process::Stdio::null());
        command.stdout(std::process::Stdio::piped());
        command.stderr(std::process::Stdio::piped());
        command.kill_on_drop(true);

        cfg_if::cfg_if! {
            if #[cfg(target_os = "windows")] {
                // CREATE_NO_WINDOW
                command.creation_flags(0x08000000);
            }
        }

        command.args(&self.args);
        let mut child = command.spawn()?;

        // Drain both pipes while waiting, a full pipe would block the child forever.
        let stdout_handle = child.stdout.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "Failed to capture stdout")
        })?;
        let stderr_handle = child.stderr.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "Failed to capture stderr")
        })?;

        let stdout_task = tokio::spawn(async move {
            let mut buffer = Vec::new();
            tokio::io::copy(&mut tokio::io::BufReader::new(stdout_handle), &mut buffer).await?;
            Ok::<Vec<u8>, std::io::Error>(buffer)
        });

        let stderr_task = tokio::spawn(async move {
            let mut buffer = Vec::new();
            tokio::io::copy(&mut tokio::io::BufReader::new(stderr_handle), &mut buffer).await?;
            Ok::<Vec<u8>, std::io::Error>(buffer)
        });

        let exit_status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(result) => result?,
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Process timed out after {:?}, killing it", self.timeout);

                if let Err(_e) = child.kill().await {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Failed to kill process after timeout: {}", _e);
                }

                return Err(ExecutorError::Timeout(self.timeout));
            }
        };

        let stdout = String::from_utf8_lossy(&stdout_task.await??).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_task.await??).into_owned();

        let code = exit_status.code().unwrap_or(-1);
        if exit_status.success() {
            return Ok(ProcessOutput {
                stdout,
                stderr,
                code,
            });
        }

        Err(ExecutorError::Failed {
            code,
            stderr: stderr.trim().to_string(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::utils;

    fn shell(script: &str) -> Executor {
        Executor {
            executable_path: PathBuf::from("sh"),
            timeout: Duration::from_secs(5),
            args: utils::to_owned(vec!["-c", script]),
        }
    }

    #[tokio::test]
    async fn captures_stdout_on_success() {
        let output = shell("echo hello").execute().await.unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.code, 0);
    }

    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let error = shell("echo broken >&2; exit 3").execute().await.unwrap_err();
        match error {
            ExecutorError::Failed { code, stderr } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_launch_error() {
        let executor = Executor {
            executable_path: PathBuf::from("/nonexistent/ffmpeg"),
            timeout: Duration::from_secs(5),
            args: Vec::new(),
        };

        assert!(matches!(
            executor.execute().await,
            Err(ExecutorError::Launch(_))
        ));
    }

    #[tokio::test]
    async fn slow_process_times_out() {
        let mut executor = shell("sleep 5");
        executor.timeout = Duration::from_millis(100);

        assert!(matches!(
            executor.execute().await,
            Err(ExecutorError::Timeout(_))
        ));
    }
}
