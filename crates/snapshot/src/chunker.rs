//! Content-defined chunking and object assembly.

use crate::error::Result;
use crate::put::put_blob_if_new;
use bytes::Bytes;
use fastcdc::v2020::FastCDC;
use silo_core::{shannon_entropy, Chunk, Object, ResourceKind};
use silo_repository::{Packer, Repository};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Chunk a reader into an [`Object`], emitting unseen chunk blobs into the
/// packer.
///
/// Empty files get one zero-length chunk so every file has at least one;
/// files under the minimum chunk size become a single chunk; everything
/// else goes through the content-defined chunker. The object's MAC is the
/// running hash over all chunk bytes, and its MIME type is sniffed from the
/// first chunk with the filename extension as fallback.
pub async fn chunkify(
    repository: &Repository,
    packer: &Packer,
    mut reader: impl AsyncRead + Unpin,
    pathname: &str,
    size: u64,
) -> Result<Object> {
    let chunking = repository.config().chunking.clone();

    let mut object = Object::new();
    let mut object_hasher = repository.mac_hasher();
    let mut first_chunk = true;

    let mut total_entropy = 0.0f64;
    let mut total_freq = [0f64; 256];
    let mut total_size = 0u64;

    let mut process_chunk = |data: &[u8]| {
        let mut chunk_hasher = repository.mac_hasher();
        chunk_hasher.update(data);
        let mac = chunk_hasher.finalize();

        if first_chunk {
            object.content_type = detect_content_type(data, pathname);
            first_chunk = false;
        }
        object_hasher.update(data);

        let (entropy, freq) = shannon_entropy(data);
        for (total, f) in total_freq.iter_mut().zip(freq.iter()) {
            *total += f;
        }
        total_entropy += entropy * data.len() as f64;
        total_size += data.len() as u64;

        object.chunks.push(Chunk {
            mac,
            length: data.len() as u32,
            entropy,
        });
        mac
    };

    if size == 0 {
        let mac = process_chunk(&[]);
        put_blob_if_new(repository, packer, ResourceKind::Chunk, mac, Bytes::new()).await?;
    } else if size < u64::from(chunking.min_size) {
        let mut data = Vec::with_capacity(size as usize);
        reader.read_to_end(&mut data).await?;
        let mac = process_chunk(&data);
        put_blob_if_new(repository, packer, ResourceKind::Chunk, mac, Bytes::from(data)).await?;
    } else {
        // Streaming cut: keep at least one maximum-size window buffered so
        // every cut sees full lookahead, then emit the first chunk of the
        // window and slide.
        let min = chunking.min_size;
        let normal = chunking.normal_size;
        let max = chunking.max_size;

        let mut buffer: Vec<u8> = Vec::with_capacity(2 * max as usize);
        let mut read_buf = vec![0u8; 256 * 1024];
        let mut eof = false;

        loop {
            while !eof && buffer.len() < 2 * max as usize {
                let n = reader.read(&mut read_buf).await?;
                if n == 0 {
                    eof = true;
                } else {
                    buffer.extend_from_slice(&read_buf[..n]);
                }
            }
            if buffer.is_empty() {
                break;
            }

            let cut = FastCDC::new(&buffer, min, normal, max)
                .next()
                .map(|c| c.length)
                .unwrap_or(buffer.len());

            let data: Vec<u8> = buffer.drain(..cut).collect();
            let mac = process_chunk(&data);
            put_blob_if_new(repository, packer, ResourceKind::Chunk, mac, Bytes::from(data)).await?;

            if eof && buffer.is_empty() {
                break;
            }
        }
    }

    if total_size > 0 {
        object.entropy = total_entropy / total_size as f64;
        object.distribution = total_freq.iter().map(|f| f / total_size as f64).collect();
    }
    object.mac = object_hasher.finalize();
    Ok(object)
}

fn detect_content_type(data: &[u8], pathname: &str) -> String {
    if let Some(kind) = infer::get(data) {
        return kind.mime_type().to_string();
    }
    if let Some(mime) = mime_guess::from_path(pathname).first_raw() {
        return mime.to_string();
    }
    if data.is_empty() || std::str::from_utf8(data).is_ok() {
        "text/plain".to_string()
    } else {
        "application/octet-stream".to_string()
    }
}
