//! Write-through digest for the single streaming pass

use sha2::{Digest, Sha256};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

pub const CHECKSUM_ALGORITHM: &str = "sha256";

/// Forwards writes to `inner` and hashes exactly the bytes it accepted
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: AsyncWrite + Unpin> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// `<algorithm>:<hex>` plus the total byte count
    pub fn finish(self) -> (String, u64, W) {
        let digest = hex::encode(self.hasher.finalize());
        (
            format!("{}:{}", CHECKSUM_ALGORITHM, digest),
            self.written,
            self.inner,
        )
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for HashingWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.hasher.update(&buf[..n]);
                this.written += n as u64;
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Hex sha256 of a byte slice, `<algorithm>:<hex>` form
pub fn sha256_checksum(data: &[u8]) -> String {
    format!("{}:{}", CHECKSUM_ALGORITHM, hex::encode(Sha256::digest(data)))
}

/// Compare a computed `sha256:<hex>` against a declared checksum.
///
/// Returns `None` when the declared checksum cannot be verified (empty or a
/// different algorithm), otherwise whether the digests match.
pub fn verify_checksum(computed: &str, expected: &str, algorithm: &str) -> Option<bool> {
    let expected = expected.trim();
    if expected.is_empty() {
        return None;
    }

    let expected_hex = match expected.split_once(':') {
        Some((algo, hex)) if algo.eq_ignore_ascii_case(CHECKSUM_ALGORITHM) => hex,
        Some(_) => return None,
        None if algorithm.trim().eq_ignore_ascii_case(CHECKSUM_ALGORITHM) => expected,
        None => return None,
    };

    let computed_hex = computed
        .strip_prefix(&format!("{}:", CHECKSUM_ALGORITHM))
        .unwrap_or(computed);
    Some(computed_hex.eq_ignore_ascii_case(expected_hex))
}
