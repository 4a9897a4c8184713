//! HTTP download coordinator.
//!
//! Two strategies share one [`DownloadSink`]:
//!
//! - **Parallel**: discover the size, split the remainder into ranges of
//!   `chunk_size`, fetch up to `max_workers` ranges at once and write each
//!   at its own offset. Any failing range fails the whole download, after
//!   the sink is truncated to the prefix that is known to be complete.
//! - **Resumable**: one GET with `Range: bytes=<offset>-`, starting from
//!   the sink's current size. `416` or a plain `200` restart from zero.
//!
//! [`Downloader::download_with_fallback`] runs the first and falls back to
//! the second.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use encore_config::{log_download_debug, log_download_info, log_download_warn, DownloadConfig};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use tracing::instrument;

use crate::error::{DownloadError, Result};
use crate::range::{contiguous_prefix, parse_content_range, partition, ByteRange};
use crate::sink::DownloadSink;

/// Aggregated progress of one download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub current: u64,
    /// `None` when the server did not say
    pub total: Option<u64>,
}

impl Progress {
    /// Completed share in `[0, 1]`, if the total is known
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.current as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

fn header_u64(headers: &HeaderMap, name: HeaderName) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn status_error(url: &str, status: StatusCode) -> DownloadError {
    DownloadError::Status {
        url: url.to_string(),
        status: status.as_u16(),
    }
}

/// State shared by the range workers of one parallel download
struct Shared<'a, S, F> {
    sink: Mutex<&'a mut S>,
    written: Vec<AtomicU64>,
    base: u64,
    total: u64,
    progress: &'a F,
}

impl<S, F: Fn(Progress)> Shared<'_, S, F> {
    fn record(&self, index: usize, bytes: u64) {
        self.written[index].fetch_add(bytes, Ordering::SeqCst);
        let done: u64 = self.written.iter().map(|w| w.load(Ordering::SeqCst)).sum();
        (self.progress)(Progress {
            current: self.base + done,
            total: Some(self.total),
        });
    }

    fn written(&self) -> Vec<u64> {
        self.written.iter().map(|w| w.load(Ordering::SeqCst)).collect()
    }
}

#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    chunk_size: u64,
    max_workers: usize,
    timeout: Duration,
}

impl Downloader {
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let client = Client::builder()
            .connect_timeout(timeout)
            .user_agent(concat!("encore/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Use an existing client, e.g. one shared with the provider layer.
    pub fn with_client(client: Client, config: &DownloadConfig) -> Self {
        Self {
            client,
            chunk_size: config.chunk_size.max(1),
            max_workers: config.max_workers.max(1),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Bounds one wait on the network (a response or the next body chunk)
    /// by the configured timeout.
    async fn within<T>(&self, url: &str, fut: impl std::future::Future<Output = T>) -> Result<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| DownloadError::Timeout {
                url: url.to_string(),
                secs: self.timeout.as_secs(),
            })
    }

    /// Total size of the resource.
    ///
    /// Uses the `Content-Length` of a HEAD response. When that is missing
    /// or zero, probes with `Range: bytes=0-0` and reads the total from
    /// `Content-Range`.
    #[instrument(skip(self), level = "debug")]
    pub async fn content_length(&self, url: &str) -> Result<u64> {
        let head = self.client.head(url).timeout(self.timeout).send().await?;
        if head.status().is_success() {
            // Response::content_length() reflects the (empty) HEAD body,
            // so the header is read directly.
            if let Some(len) = header_u64(head.headers(), CONTENT_LENGTH).filter(|&n| n > 0) {
                return Ok(len);
            }
        } else {
            log_download_debug!("HEAD rejected, probing", status = head.status().as_u16());
        }

        let probe = self
            .client
            .get(url)
            .header(RANGE, "bytes=0-0")
            .timeout(self.timeout)
            .send()
            .await?;
        let total = match probe.status() {
            StatusCode::PARTIAL_CONTENT => probe
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range)
                .and_then(|(_, _, total)| total),
            status if status.is_success() => header_u64(probe.headers(), CONTENT_LENGTH),
            status => return Err(status_error(url, status)),
        };
        total.filter(|&n| n > 0).ok_or_else(|| DownloadError::UnknownSize {
            url: url.to_string(),
        })
    }

    /// Download with up to `max_workers` concurrent range requests,
    /// continuing from the sink's current size.
    ///
    /// On failure the sink is truncated to the contiguous completed prefix,
    /// which [`DownloadError::ChunkFailed`] reports.
    #[instrument(skip(self, sink, progress), level = "debug")]
    pub async fn download_parallel<S, F>(&self, url: &str, sink: &mut S, progress: F) -> Result<u64>
    where
        S: DownloadSink,
        F: Fn(Progress) + Sync,
    {
        let total = self.content_length(url).await?;
        let mut offset = sink.size()?;
        if offset > total {
            log_download_warn!(
                "Existing file is larger than the resource, restarting",
                url = url,
                existing = offset,
                total = total
            );
            sink.truncate(0)?;
            offset = 0;
        }

        let ranges = partition(offset, total, self.chunk_size);
        log_download_debug!(
            "Starting parallel download",
            url = url,
            offset = offset,
            total = total,
            ranges = ranges.len()
        );
        progress(Progress {
            current: offset,
            total: Some(total),
        });
        if ranges.is_empty() {
            return Ok(total);
        }

        let shared = Shared {
            sink: Mutex::new(sink),
            written: ranges.iter().map(|_| AtomicU64::new(0)).collect(),
            base: offset,
            total,
            progress: &progress,
        };

        let failure = {
            let shared = &shared;
            let mut results = stream::iter(ranges.iter().copied().enumerate())
                .map(|(index, range)| async move {
                    self.fetch_range(url, range, index, shared)
                        .await
                        .map_err(|e| (range, e))
                })
                .buffer_unordered(self.max_workers);
            let mut failure = None;
            while let Some(result) = results.next().await {
                if let Err(e) = result {
                    failure = Some(e);
                    break;
                }
            }
            // Dropping the stream cancels ranges still in flight.
            failure
        };

        let written = shared.written();
        let sink = shared.sink.into_inner();

        if let Some((range, err)) = failure {
            let completed = contiguous_prefix(&ranges, &written);
            sink.truncate(completed)?;
            log_download_warn!(
                "Parallel download failed",
                url = url,
                range = tracing::field::display(&range),
                completed = completed,
                error = tracing::field::display(&err)
            );
            if !err.is_retryable() {
                return Err(err);
            }
            return Err(DownloadError::ChunkFailed {
                start: range.start,
                end: range.end,
                completed,
                reason: err.to_string(),
            });
        }

        sink.flush_all()?;
        log_download_info!("Parallel download finished", url = url, bytes = total);
        Ok(total)
    }

    async fn fetch_range<S, F>(
        &self,
        url: &str,
        range: ByteRange,
        index: usize,
        shared: &Shared<'_, S, F>,
    ) -> Result<()>
    where
        S: DownloadSink,
        F: Fn(Progress) + Sync,
    {
        let response = self
            .client
            .get(url)
            .header(RANGE, range.header_value())
            .timeout(self.timeout)
            .send()
            .await?;
        match response.status() {
            StatusCode::PARTIAL_CONTENT => {}
            // A server may answer the whole-resource range with 200.
            StatusCode::OK if range.start == 0 && range.end == shared.total => {}
            StatusCode::OK => return Err(DownloadError::RangeIgnored { start: range.start }),
            status => return Err(status_error(url, status)),
        }

        let mut body = response.bytes_stream();
        let mut pos = range.start;
        while let Some(bytes) = self.within(url, body.next()).await? {
            let bytes = bytes?;
            let take = (bytes.len() as u64).min(range.end - pos) as usize;
            if take == 0 {
                break;
            }
            shared.sink.lock().write_at(pos, &bytes[..take])?;
            pos += take as u64;
            shared.record(index, take as u64);
        }

        if pos < range.end {
            return Err(DownloadError::ShortBody {
                expected: range.len(),
                received: pos - range.start,
            });
        }
        Ok(())
    }

    /// Single-stream download continuing from the sink's current size.
    #[instrument(skip(self, sink, progress), level = "debug")]
    pub async fn download_resumable<S, F>(&self, url: &str, sink: &mut S, progress: F) -> Result<u64>
    where
        S: DownloadSink,
        F: Fn(Progress) + Sync,
    {
        let mut offset = sink.size()?;
        let mut restarted = false;

        let response = loop {
            let mut request = self.client.get(url);
            if offset > 0 {
                request = request.header(RANGE, format!("bytes={}-", offset));
            }
            let response = self.within(url, request.send()).await??;
            if response.status() == StatusCode::RANGE_NOT_SATISFIABLE && offset > 0 && !restarted {
                log_download_warn!("Resume offset rejected, restarting", url = url, offset = offset);
                sink.truncate(0)?;
                offset = 0;
                restarted = true;
                continue;
            }
            break response;
        };

        let status = response.status();
        let (start, total) = match status {
            StatusCode::PARTIAL_CONTENT => {
                let content_range = response
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_content_range);
                match content_range {
                    Some((start, _, total)) => (start, total),
                    None => (
                        offset,
                        header_u64(response.headers(), CONTENT_LENGTH).map(|n| offset + n),
                    ),
                }
            }
            status if status.is_success() => {
                if offset > 0 {
                    log_download_warn!("Server ignored the resume range, restarting", url = url);
                    sink.truncate(0)?;
                }
                (0, header_u64(response.headers(), CONTENT_LENGTH))
            }
            status => return Err(status_error(url, status)),
        };
        if start > offset {
            return Err(DownloadError::RangeIgnored { start: offset });
        }

        log_download_debug!("Starting resumable download", url = url, offset = start);
        let mut pos = start;
        progress(Progress { current: pos, total });

        let mut body = response.bytes_stream();
        while let Some(bytes) = self.within(url, body.next()).await? {
            let bytes = bytes?;
            sink.write_at(pos, &bytes)?;
            pos += bytes.len() as u64;
            progress(Progress { current: pos, total });
        }

        if let Some(total) = total {
            if pos < total {
                return Err(DownloadError::ShortBody {
                    expected: total - start,
                    received: pos - start,
                });
            }
        }
        sink.flush_all()?;
        log_download_info!("Resumable download finished", url = url, bytes = pos);
        Ok(pos)
    }

    /// Parallel download, then a resumable retry from the completed prefix
    /// if a network failure interrupted it.
    pub async fn download_with_fallback<S, F>(
        &self,
        url: &str,
        sink: &mut S,
        progress: F,
    ) -> Result<u64>
    where
        S: DownloadSink,
        F: Fn(Progress) + Sync,
    {
        match self.download_parallel(url, sink, &progress).await {
            Ok(size) => Ok(size),
            Err(err) if err.is_retryable() => {
                log_download_warn!(
                    "Falling back to a single resumable stream",
                    url = url,
                    error = tracing::field::display(&err)
                );
                self.download_resumable(url, sink, &progress).await
            }
            Err(err) => Err(err),
        }
    }
}
