use std::io::Write;
use std::sync::LazyLock;

use regex::Regex;
use tracing_subscriber::fmt::MakeWriter;

/// Log sink that masks credentials before they reach stderr. Telegram file
/// URLs embed the bot token, and Google errors can echo OAuth tokens.
pub struct RedactingWriter<W> {
    inner: W,
}

impl RedactingWriter<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self {
            inner: std::io::stderr(),
        }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let original = String::from_utf8_lossy(buf);
        self.inner.write_all(redact_secrets(&original).as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl<'a> MakeWriter<'a> for RedactingWriter<std::io::Stderr> {
    type Writer = RedactingWriter<std::io::Stderr>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::stderr()
    }
}

static SECRET_PATTERNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
          \d{8,10}:[A-Za-z0-9_-]{35}       # Telegram bot tokens
        | sk-[A-Za-z0-9_-]{20,}            # OpenAI-style keys
        | ya29\.[A-Za-z0-9_.-]{10,}        # Google access tokens
        | 1//[A-Za-z0-9_-]{10,}            # Google refresh tokens
        | GOCSPX-[A-Za-z0-9_-]{10,}        # Google OAuth client secrets
        ",
    )
    .expect("redaction regex should compile")
});

/// Replace known credential patterns with `[REDACTED]`.
pub fn redact_secrets(input: &str) -> String {
    SECRET_PATTERNS.replace_all(input, "[REDACTED]").into_owned()
}

/// Short fingerprint of a secret for diagnostics, e.g. `sk-a…(51 chars)`.
pub fn mask_secret(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    format!("{prefix}…({} chars)", secret.chars().count())
}
