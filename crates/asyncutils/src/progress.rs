use pin_project_lite::pin_project;
use std::io::Result;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

pin_project! {
    /// Wraps an [`AsyncRead`], reporting the running total of bytes read.
    ///
    /// The callback runs inline on every successful, non-empty read with the
    /// cumulative count, so it must be cheap and must not block.
    ///
    /// ```
    /// use shelf_asyncutils::ProgressReader;
    /// use tokio::io::AsyncReadExt;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> std::io::Result<()> {
    /// let mut seen = 0;
    /// let mut reader = ProgressReader::new(&b"hello"[..], |total| seen = total);
    /// let mut out = Vec::new();
    /// reader.read_to_end(&mut out).await?;
    /// drop(reader);
    /// assert_eq!(seen, 5);
    /// # Ok(())
    /// # }
    /// ```
    pub struct ProgressReader<R, F> {
        #[pin]
        inner: R,
        read: u64,
        on_progress: F,
    }
}

impl<R, F: FnMut(u64)> ProgressReader<R, F> {
    pub fn new(inner: R, on_progress: F) -> Self {
        Self { inner, read: 0, on_progress }
    }

    /// Bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.read
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead, F: FnMut(u64)> AsyncRead for ProgressReader<R, F> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        let poll = this.inner.poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let n = (buf.filled().len() - before) as u64;
            if n > 0 {
                *this.read += n;
                (this.on_progress)(*this.read);
            }
        }
        poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tokio::io::AsyncReadExt;

    #[rstest]
    #[case(0, 4)]
    #[case(1, 4)]
    #[case(10_000, 4)]
    #[case(10_000, 4096)]
    #[tokio::test]
    async fn test_reports_monotonic_totals(#[case] len: usize, #[case] chunk: usize) {
        let data = vec![7u8; len];
        let mut totals = Vec::new();
        let mut reader = ProgressReader::new(&data[..], |total| totals.push(total));
        let mut buf = vec![0u8; chunk];
        let mut out = Vec::new();
        loop {
            let n = reader.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(reader.bytes_read(), len as u64);
        drop(reader);
        assert_eq!(out, data);
        assert!(totals.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(totals.last().copied().unwrap_or(0), len as u64);
    }
}
