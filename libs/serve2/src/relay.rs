//! Bidirectional byte relay between a client and a backend.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const RELAY_BUFFER_SIZE: usize = 8192;

/// Proxy data bidirectionally between two streams.
///
/// Each direction runs until its reader hits EOF, then shuts down the
/// opposite writer. Returns (bytes_a_to_b, bytes_b_to_a); a direction that
/// errored reports zero bytes.
pub async fn proxy_bidirectional<A, B>(a: A, b: B) -> io::Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let a_to_b = copy_half(&mut a_read, &mut b_write);
    let b_to_a = copy_half(&mut b_read, &mut a_write);

    let (a_result, b_result) = tokio::join!(a_to_b, b_to_a);

    if let (Err(a_err), Err(_)) = (&a_result, &b_result) {
        return Err(io::Error::new(a_err.kind(), a_err.to_string()));
    }

    Ok((a_result.unwrap_or(0), b_result.unwrap_or(0)))
}

async fn copy_half<R, W>(reader: &mut R, writer: &mut W) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    writer.shutdown().await?;
    Ok(total)
}
