//! Bounded execution of external backend processes.
//!
//! Adapters are synchronous from the chain's point of view. These helpers
//! drive tokio futures to completion from that synchronous code, either on
//! the ambient runtime (when called from a blocking worker thread) or on a
//! private current-thread runtime.

use crate::error::AdapterError;
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Longest stderr excerpt carried in a failure reason.
const STDERR_EXCERPT: usize = 400;

/// Runs `fut` to completion.
///
/// Must not be called from an async task; batch workers call the pipeline
/// through `spawn_blocking`.
pub fn block_on<F: Future>(fut: F) -> Result<F::Output, AdapterError> {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Ok(handle.block_on(fut)),
        Err(_) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| AdapterError::BackendFailed(format!("failed to start runtime: {e}")))?;
            Ok(runtime.block_on(fut))
        }
    }
}

/// Runs blocking in-process work on its own thread, abandoning it after
/// `timeout`.
pub fn run_with_timeout<T, F>(timeout: Duration, work: F) -> Result<T, AdapterError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = tokio::sync::oneshot::channel();
    std::thread::spawn(move || {
        let _ = tx.send(work());
    });

    block_on(async move {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(AdapterError::BackendFailed("backend worker panicked".to_string())),
            Err(_) => Err(AdapterError::TimedOut(timeout)),
        }
    })?
}

/// Runs an external program and waits for it to exit.
///
/// A program that cannot be found is [`AdapterError::BackendUnavailable`];
/// a non-zero exit is [`AdapterError::BackendFailed`] carrying the tail of
/// stderr. The child is killed if the timeout elapses.
pub fn run_command(
    program: &str,
    args: &[String],
    current_dir: Option<&Path>,
    timeout: Duration,
) -> Result<(), AdapterError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = current_dir {
        command.current_dir(dir);
    }

    debug!(program = %program, args = ?args, "Spawning backend process");

    block_on(async move {
        let child = command.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                AdapterError::BackendUnavailable(format!("{program}: {e}"))
            }
            _ => AdapterError::BackendFailed(format!("failed to spawn {program}: {e}")),
        })?;

        // Dropping the output future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result
                .map_err(|e| AdapterError::BackendFailed(format!("{program}: {e}")))?,
            Err(_) => return Err(AdapterError::TimedOut(timeout)),
        };

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(AdapterError::BackendFailed(format!(
                "{program} exited with {}: {}",
                output.status,
                excerpt(stderr.trim())
            )))
        }
    })?
}

fn excerpt(text: &str) -> &str {
    if text.len() <= STDERR_EXCERPT {
        return text;
    }
    let mut start = text.len() - STDERR_EXCERPT;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_program_is_unavailable() {
        let err = run_command(
            "nest-prep-definitely-missing-backend",
            &[],
            None,
            Duration::from_secs(5),
        )
        .unwrap_err();

        assert!(matches!(err, AdapterError::BackendUnavailable(_)));
    }

    #[test]
    fn test_run_with_timeout_returns_value() {
        let value = run_with_timeout(Duration::from_secs(5), || 21 * 2).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_run_with_timeout_expires() {
        let err = run_with_timeout(Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(500));
        })
        .unwrap_err();

        assert_eq!(err, AdapterError::TimedOut(Duration::from_millis(20)));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit_is_failure() {
        let err = run_command(
            "sh",
            &["-c".to_string(), "echo broken >&2; exit 3".to_string()],
            None,
            Duration::from_secs(5),
        )
        .unwrap_err();

        match err {
            AdapterError::BackendFailed(reason) => assert!(reason.contains("broken")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_slow_process_times_out() {
        let err = run_command(
            "sleep",
            &["5".to_string()],
            None,
            Duration::from_millis(50),
        )
        .unwrap_err();

        assert_eq!(err, AdapterError::TimedOut(Duration::from_millis(50)));
    }

    #[test]
    fn test_excerpt_keeps_tail() {
        let long = "x".repeat(1000) + "END";
        assert!(excerpt(&long).ends_with("END"));
        assert_eq!(excerpt(&long).len(), STDERR_EXCERPT);
    }
}
