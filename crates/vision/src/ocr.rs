use std::io::{Cursor, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use image::{ImageFormat, RgbImage};
use tracing::{debug, warn};

use common::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const WAIT_POLL: Duration = Duration::from_millis(10);

/// Text recognition backend. Returns whitespace-separated tokens.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image: &RgbImage) -> Result<Vec<String>>;
}

/// Runs the `tesseract` command-line tool, piping PNG bytes through stdin.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    binary: PathBuf,
    page_segmentation: u8,
    timeout: Duration,
}

impl TesseractCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            // Single uniform block of text.
            page_segmentation: 6,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Caps how long one recognition may run before the process is killed.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .args(["stdin", "stdout", "--psm"])
            .arg(self.page_segmentation.to_string());
        command
    }
}

impl TextRecognizer for TesseractCli {
    fn recognize(&self, image: &RgbImage) -> Result<Vec<String>> {
        let mut png = Vec::new();
        image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

        let output = run_piped(self.command(), png, self.timeout)
            .map_err(|e| Error::Ocr(format!("{}: {e}", self.binary.display())))?;
        if !output.status.success() {
            return Err(Error::Ocr(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let tokens: Vec<String> = text.split_whitespace().map(str::to_string).collect();
        debug!(tokens = ?tokens, "OCR tokens");
        Ok(tokens)
    }
}

/// Runs `command` with `input` on stdin and collects its output.
///
/// Stdin is fed and both output pipes are drained on helper threads, so a
/// child that stops reading or floods its output cannot wedge the caller.
/// The child is always reaped: on timeout or a wait failure it is killed
/// and waited for before the error is returned.
fn run_piped(mut command: Command, input: Vec<u8>, timeout: Duration) -> Result<Output> {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Ocr(format!("spawn: {e}")))?;

    let stdin = child.stdin.take();
    let writer = thread::spawn(move || match stdin {
        Some(mut stdin) => stdin.write_all(&input),
        None => Ok(()),
    });
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                reap(&mut child);
                return Err(Error::Ocr(format!("timed out after {timeout:?}")));
            }
            Ok(None) => thread::sleep(WAIT_POLL),
            Err(e) => {
                reap(&mut child);
                return Err(e.into());
            }
        }
    };

    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();
    // A child that exits without reading everything closes the pipe under
    // the writer; its exit status decides the outcome.
    if let Ok(Err(e)) = writer.join() {
        debug!(error = %e, "Child closed stdin before all input was written");
    }
    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!(error = %e, "Failed to kill OCR process");
    }
    let _ = child.wait();
}

/// A payout like `+$1.80` marks a win.
pub fn has_win_token(tokens: &[String]) -> bool {
    tokens.iter().any(|t| t.starts_with('+'))
}

/// A zero payout marks a loss.
pub fn has_loss_token(tokens: &[String]) -> bool {
    tokens.iter().any(|t| t == "$0")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn payout_tokens_are_classified() {
        assert!(has_win_token(&tokens(&["EUR/USD", "+$1.80"])));
        assert!(!has_win_token(&tokens(&["$1.80", "-$1"])));
        assert!(has_loss_token(&tokens(&["EUR/USD", "$0"])));
        assert!(!has_loss_token(&tokens(&["$0.50", "$00"])));
    }

    #[test]
    fn missing_binary_is_an_ocr_error() {
        let ocr = TesseractCli::new("/nonexistent/tesseract-binary");
        let err = ocr.recognize(&RgbImage::new(4, 4)).unwrap_err();
        assert!(matches!(err, Error::Ocr(_)));
    }

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.args(["-c", script]);
        command
    }

    #[cfg(unix)]
    #[test]
    fn piped_output_is_collected() {
        let output = run_piped(
            sh("cat > /dev/null; echo '+$1.80 EUR/USD'"),
            vec![0u8; 256 * 1024],
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "+$1.80 EUR/USD");
    }

    #[cfg(unix)]
    #[test]
    fn hung_child_is_killed_at_timeout() {
        let started = Instant::now();
        let err = run_piped(sh("sleep 30"), Vec::new(), Duration::from_millis(200)).unwrap_err();

        assert!(matches!(err, Error::Ocr(ref msg) if msg.contains("timed out")));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn child_that_ignores_stdin_still_returns() {
        // Exits without reading a payload far larger than the pipe buffer.
        let output = run_piped(
            sh("echo boom >&2; exit 3"),
            vec![0u8; 4 * 1024 * 1024],
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(String::from_utf8_lossy(&output.stderr).trim(), "boom");
    }
}
