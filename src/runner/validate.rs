//! Pre-flight checks on a test script. Reads at most the first few KiB and
//! never executes anything.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Serialize;

use super::ProcessError;

const SNIFF_LEN: usize = 8 * 1024;

/// What a script file looks like from its first bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ScriptKind {
    /// `#!` line present; holds the interpreter line.
    Interpreted(String),
    /// Text without a shebang, run by `sh`.
    Plain,
    /// Not valid UTF-8 text. Holds the sniffed MIME type when known.
    Binary(Option<String>),
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptKind::Interpreted(interp) => write!(f, "script ({})", interp),
            ScriptKind::Plain => write!(f, "shell text"),
            ScriptKind::Binary(Some(mime)) => write!(f, "binary ({})", mime),
            ScriptKind::Binary(None) => write!(f, "binary"),
        }
    }
}

/// Check that `script` is an existing, readable regular file and classify it.
pub fn validate(script: &Path) -> Result<ScriptKind, ProcessError> {
    let metadata = std::fs::metadata(script).map_err(|_| {
        ProcessError::Validation(format!("Script file does not exist: {}", script.display()))
    })?;
    if !metadata.is_file() {
        return Err(ProcessError::Validation(format!(
            "Not a regular file: {}",
            script.display()
        )));
    }

    let mut head = Vec::with_capacity(SNIFF_LEN);
    File::open(script)
        .and_then(|f| f.take(SNIFF_LEN as u64).read_to_end(&mut head))
        .map_err(|e| {
            ProcessError::Validation(format!("Script file is not readable: {} ({})", script.display(), e))
        })?;

    Ok(classify(&head))
}

fn classify(head: &[u8]) -> ScriptKind {
    if let Some(rest) = head.strip_prefix(b"#!") {
        let line = rest.split(|b| *b == b'\n').next().unwrap_or_default();
        return ScriptKind::Interpreted(String::from_utf8_lossy(line).trim().to_string());
    }

    let is_text = !head.contains(&0)
        && match std::str::from_utf8(head) {
            Ok(_) => true,
            // Only the sniff window cut a multi-byte sequence in half.
            Err(e) => e.error_len().is_none(),
        };

    if is_text {
        ScriptKind::Plain
    } else {
        ScriptKind::Binary(infer::get(head).map(|t| t.mime_type().to_string()))
    }
}
