//! # Record Fragmenter (component B)
//!
//! Splits the first TLS handshake record of a `CONNECT` tunnel into 2-3
//! synthetic records so the ClientHello's SNI never appears whole in a
//! single TCP segment. This is the heart of the DPI-evasion behavior; the
//! chunking policy below mirrors the original tool byte-for-byte.

use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::ProxyError;

/// Read/write timeout applied to each header or body read inside the
/// fragmenter, independent of the handler's own request-read timeout.
pub const FRAGMENT_IO_TIMEOUT: Duration = Duration::from_secs(5);

const TLS_HANDSHAKE_CONTENT_TYPE: u8 = 0x16;
const SYNTHETIC_RECORD_VERSION: [u8; 2] = [0x03, 0x04];
const PASSTHROUGH_BUF_SIZE: usize = 16 * 1024;

/// Reads the first TLS record from `reader` and, if it is a Handshake
/// record, rewrites it as 2-3 smaller records on `writer`. Returns
/// `Ok(true)` if fragmentation occurred, `Ok(false)` if the record was
/// passed through unchanged (non-handshake content, zero-length record, or
/// the client closed before sending anything).
pub async fn fragment_first_record<R, W>(reader: &mut R, writer: &mut W) -> Result<bool, ProxyError>
where
    R: AsyncReadExt + Unpin,
    W: AsyncWriteExt + Unpin,
{
    let mut head = [0u8; 5];
    match timeout(FRAGMENT_IO_TIMEOUT, reader.read_exact(&mut head)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(false),
        Ok(Err(e)) => return Err(ProxyError::Fragmentation(format!("failed to read TLS header: {e}"))),
        Err(_) => return Err(ProxyError::Fragmentation("timeout reading TLS header".to_string())),
    }

    if head[0] != TLS_HANDSHAKE_CONTENT_TYPE {
        let mut rest = vec![0u8; PASSTHROUGH_BUF_SIZE];
        let n = reader
            .read(&mut rest)
            .await
            .map_err(|e| ProxyError::Fragmentation(format!("failed to pass through non-TLS data: {e}")))?;
        writer
            .write_all(&head)
            .await
            .map_err(|e| ProxyError::Fragmentation(format!("failed to pass through non-TLS data: {e}")))?;
        if n > 0 {
            writer
                .write_all(&rest[..n])
                .await
                .map_err(|e| ProxyError::Fragmentation(format!("failed to pass through non-TLS data: {e}")))?;
        }
        writer
            .flush()
            .await
            .map_err(|e| ProxyError::Fragmentation(format!("failed to pass through non-TLS data: {e}")))?;
        return Ok(false);
    }

    let rec_len = u16::from_be_bytes([head[3], head[4]]) as usize;
    if rec_len == 0 {
        writer
            .write_all(&head)
            .await
            .map_err(|e| ProxyError::Fragmentation(format!("failed to forward empty record: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| ProxyError::Fragmentation(format!("failed to forward empty record: {e}")))?;
        return Ok(false);
    }

    let mut body = vec![0u8; rec_len];
    match timeout(FRAGMENT_IO_TIMEOUT, reader.read_exact(&mut body)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            return Err(ProxyError::Fragmentation(format!(
                "incomplete TLS body: expected {rec_len} bytes: {e}"
            )))
        }
        Err(_) => return Err(ProxyError::Fragmentation("timeout reading TLS body".to_string())),
    }

    for chunk in split_client_hello(&body) {
        if chunk.is_empty() {
            continue;
        }
        write_framed(writer, chunk).await?;
    }
    writer
        .flush()
        .await
        .map_err(|e| ProxyError::Fragmentation(format!("failed to flush fragmented writes: {e}")))?;

    Ok(true)
}

async fn write_framed<W>(writer: &mut W, chunk: &[u8]) -> Result<(), ProxyError>
where
    W: AsyncWriteExt + Unpin,
{
    let mut framed = Vec::with_capacity(5 + chunk.len());
    framed.push(TLS_HANDSHAKE_CONTENT_TYPE);
    framed.extend_from_slice(&SYNTHETIC_RECORD_VERSION);
    framed.extend_from_slice(&(chunk.len() as u16).to_be_bytes());
    framed.extend_from_slice(chunk);
    writer
        .write_all(&framed)
        .await
        .map_err(|e| ProxyError::Fragmentation(format!("failed to send fragmented data: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| ProxyError::Fragmentation(format!("failed to send fragmented data: {e}")))
}

/// Splits a ClientHello body into 2 or 3 chunks per the chunking policy.
///
/// Exposed separately from `fragment_first_record` so the split logic can be
/// tested deterministically without a reader/writer pair.
pub fn split_client_hello(body: &[u8]) -> Vec<&[u8]> {
    if let Some(z) = body.iter().position(|&b| b == 0x00) {
        return vec![&body[..=z], &body[z + 1..]];
    }
    if body.len() <= 512 {
        let cut = std::cmp::max(1, body.len() / 2);
        return vec![&body[..cut], &body[cut..]];
    }
    let mut rng = rand::thread_rng();
    let c1 = rng.gen_range(32..=128).min(body.len());
    let c2 = (c1 + rng.gen_range(128..=512)).min(body.len());
    vec![&body[..c1], &body[c1..c2], &body[c2..]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn splits_on_first_nul_byte() {
        let mut body = vec![b'h', b'o', b's', b't'];
        body.push(0x00);
        body.extend_from_slice(b"trailing-extension-bytes");
        let chunks = split_client_hello(&body);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], &body[..5]);
        assert_eq!(chunks[1], &body[5..]);
    }

    #[test]
    fn splits_small_body_without_nul_in_half() {
        let body = vec![1u8; 100];
        let chunks = split_client_hello(&body);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 50);
        assert_eq!(chunks[1].len(), 50);
    }

    #[test]
    fn splits_large_body_without_nul_into_three() {
        let body = vec![7u8; 2000];
        let chunks = split_client_hello(&body);
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].len() >= 32 && chunks[0].len() <= 128);
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(total, body.len());
    }

    #[tokio::test]
    async fn non_handshake_record_passes_through_untouched() {
        let input = vec![0x17, 0x03, 0x03, 0x00, 0x05, b'h', b'e', b'l', b'l', b'o'];
        let mut reader = Cursor::new(input.clone());
        let mut out = Vec::new();
        let fragmented = fragment_first_record(&mut reader, &mut out).await.unwrap();
        assert!(!fragmented);
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn handshake_record_is_reframed_as_multiple_records() {
        let mut body = vec![1u8; 20];
        body.push(0x00);
        body.extend_from_slice(&[2u8; 30]);
        let len = body.len() as u16;
        let mut input = vec![0x16, 0x03, 0x01];
        input.extend_from_slice(&len.to_be_bytes());
        input.extend_from_slice(&body);

        let mut reader = Cursor::new(input);
        let mut out = Vec::new();
        let fragmented = fragment_first_record(&mut reader, &mut out).await.unwrap();
        assert!(fragmented);
        assert_eq!(out[0], 0x16);
        assert_eq!(&out[1..3], &[0x03, 0x04]);
    }

    #[tokio::test]
    async fn zero_length_record_is_forwarded_unchanged() {
        let input = vec![0x16, 0x03, 0x01, 0x00, 0x00];
        let mut reader = Cursor::new(input.clone());
        let mut out = Vec::new();
        let fragmented = fragment_first_record(&mut reader, &mut out).await.unwrap();
        assert!(!fragmented);
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn client_closing_before_header_is_a_silent_no_op() {
        let mut reader = Cursor::new(Vec::<u8>::new());
        let mut out = Vec::new();
        let fragmented = fragment_first_record(&mut reader, &mut out).await.unwrap();
        assert!(!fragmented);
        assert!(out.is_empty());
    }
}
