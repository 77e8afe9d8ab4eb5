//! Upload loop: manifest, parallel chunk workers, retries, completion.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sureroute_protocol::{
    CHUNK_HASH_HEADER, CompleteResponse, ErrorBody, ManifestRequest, ManifestResponse, Priority,
};
use sureroute_transfer::{ChunkReader, FileDigests, compute_file_digests, digests_match};
use tokio::sync::Mutex;

/// Per-request timeout for chunk uploads.
const CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra passes over failed chunks after the first.
const MAX_RETRY_PASSES: u32 = 3;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Fill byte of generated sample files.
const SAMPLE_BYTE: u8 = 0xAB;

const MIB: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct SendOptions {
    pub file: PathBuf,
    pub backend: String,
    pub chunk_size: u64,
    pub concurrency: usize,
    pub priority: Priority,
    pub transfer_id: Option<String>,
}

/// Writes `mb` MiB of [`SAMPLE_BYTE`] to `path`.
pub fn generate_sample(path: &Path, mb: u64) -> anyhow::Result<()> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let buf = vec![SAMPLE_BYTE; MIB];
    for _ in 0..mb {
        file.write_all(&buf)?;
    }
    file.sync_all()?;
    Ok(())
}

/// Delay before retry pass `pass` (1-based): 0.5 s, 1 s, 2 s, ...
fn retry_delay(pass: u32) -> Duration {
    RETRY_BASE_DELAY * 2u32.saturating_pow(pass.saturating_sub(1))
}

/// Sends `opts.file` and returns the server's completion result.
///
/// Fails if chunks are still missing after every retry pass, or if the
/// server's checksum differs from the local one.
pub async fn send_file(opts: &SendOptions) -> anyhow::Result<CompleteResponse> {
    let path = opts.file.clone();
    let chunk_size = opts.chunk_size;
    let digests: FileDigests =
        tokio::task::spawn_blocking(move || compute_file_digests(&path, chunk_size)).await??;
    tracing::info!(
        size = digests.file_size,
        chunks = digests.chunks.len(),
        "manifest prepared"
    );

    let file_name = opts
        .file
        .file_name()
        .and_then(|n| n.to_str())
        .context("file name is not valid UTF-8")?
        .to_string();

    let client = Client::new(&opts.backend)?;
    let manifest = ManifestRequest {
        transfer_id: opts.transfer_id.clone(),
        file_name: Some(file_name),
        file_size: Some(digests.file_size),
        chunk_size: Some(opts.chunk_size),
        chunks: digests.chunks.clone(),
        global_sha256: Some(digests.global_sha256.clone()),
        priority: Some(opts.priority.to_string()),
    };
    let negotiated = client.manifest(&manifest).await?;
    tracing::info!(
        transfer_id = %negotiated.transfer_id,
        missing = negotiated.missing_chunks.len(),
        "manifest accepted"
    );

    if let Some(bad) = negotiated
        .missing_chunks
        .iter()
        .find(|i| **i >= digests.chunks.len())
    {
        anyhow::bail!("server asked for chunk {bad}, file has {}", digests.chunks.len());
    }

    let digests = Arc::new(digests);
    let mut pending = negotiated.missing_chunks;
    let mut pass = 0;
    while !pending.is_empty() {
        if pass > 0 {
            if pass > MAX_RETRY_PASSES {
                anyhow::bail!("{} chunks still failing after {MAX_RETRY_PASSES} retries", pending.len());
            }
            let delay = retry_delay(pass);
            tracing::info!(pass, failed = pending.len(), ?delay, "retrying failed chunks");
            tokio::time::sleep(delay).await;
        }
        pending = upload_all(
            &client,
            &negotiated.transfer_id,
            opts,
            Arc::clone(&digests),
            pending,
        )
        .await;
        pass += 1;
    }

    let done = client.complete(&negotiated.transfer_id).await?;
    if !digests_match(&done.checksum, &digests.global_sha256) {
        anyhow::bail!(
            "checksum mismatch: server {} vs local {}",
            done.checksum,
            digests.global_sha256
        );
    }
    Ok(done)
}

/// Uploads `indices` with `opts.concurrency` workers. Returns the failures.
async fn upload_all(
    client: &Client,
    transfer_id: &str,
    opts: &SendOptions,
    digests: Arc<FileDigests>,
    indices: Vec<usize>,
) -> Vec<usize> {
    let total = indices.len();
    let queue = Arc::new(Mutex::new(VecDeque::from(indices)));
    let failed = Arc::new(Mutex::new(Vec::new()));
    let done = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let mut workers = Vec::with_capacity(opts.concurrency);
    for _ in 0..opts.concurrency {
        let client = client.clone();
        let transfer_id = transfer_id.to_string();
        let file = opts.file.clone();
        let chunk_size = opts.chunk_size;
        let digests = Arc::clone(&digests);
        let queue = Arc::clone(&queue);
        let failed = Arc::clone(&failed);
        let done = Arc::clone(&done);

        workers.push(tokio::spawn(async move {
            loop {
                let Some(index) = queue.lock().await.pop_front() else {
                    break;
                };
                let result = client
                    .upload_chunk(&transfer_id, &file, chunk_size, index, &digests.chunks[index])
                    .await;
                match result {
                    Ok(()) => {
                        let n = done.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
                        tracing::info!(index, "uploaded {n}/{total}");
                    }
                    Err(e) => {
                        tracing::warn!(index, "chunk upload failed: {e:#}");
                        failed.lock().await.push(index);
                    }
                }
            }
        }));
    }
    for w in workers {
        if let Err(e) = w.await {
            tracing::error!("upload worker panicked: {e}");
        }
    }

    let mut failed = std::mem::take(&mut *failed.lock().await);
    failed.sort_unstable();
    // Indices a panicked worker never reported are retried too.
    failed.extend(queue.lock().await.drain(..));
    failed
}

/// Thin reqwest wrapper for the transfer API.
#[derive(Clone)]
struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    fn new(base: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(CHUNK_TIMEOUT).build()?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    async fn manifest(&self, req: &ManifestRequest) -> anyhow::Result<ManifestResponse> {
        let resp = self
            .http
            .post(format!("{}/transfer/manifest", self.base))
            .json(req)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn upload_chunk(
        &self,
        transfer_id: &str,
        file: &Path,
        chunk_size: u64,
        index: usize,
        expected: &str,
    ) -> anyhow::Result<()> {
        let file = file.to_path_buf();
        let chunk = tokio::task::spawn_blocking(move || {
            ChunkReader::new(&file, chunk_size)?.read_at(index)
        })
        .await??
        .with_context(|| format!("chunk {index} is past the end of the file"))?;

        if !digests_match(&chunk.checksum, expected) {
            anyhow::bail!("chunk {index} changed on disk since the manifest was built");
        }

        let resp = self
            .http
            .post(format!("{}/transfer/{transfer_id}/chunk/{index}", self.base))
            .header(CHUNK_HASH_HEADER, &chunk.checksum)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(chunk.data)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn complete(&self, transfer_id: &str) -> anyhow::Result<CompleteResponse> {
        let resp = self
            .http
            .post(format!("{}/transfer/{transfer_id}/complete", self.base))
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }
}

/// Turns a non-2xx response into an error carrying the server's message.
async fn check(resp: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let message = serde_error(&text).unwrap_or(text);
    anyhow::bail!("server returned {status}: {message}")
}

fn serde_error(text: &str) -> Option<String> {
    let body: ErrorBody = serde_json::from_str(text).ok()?;
    Some(body.error)
}
