// Frame-set transport: length-delimited multi-frame messages over TCP.
// A set is a u32 frame count followed by (u32 length, bytes) per frame.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::Frames;

/// Upper bound on a whole frame set. Values top out around 1 MiB; anything
/// near this limit is a corrupt or hostile stream.
pub const MAX_FRAME_SET_LEN: usize = 16 << 20;

/// Upper bound on frames per set. Wire messages carry at most six.
const MAX_FRAME_COUNT: u32 = 64;

pub async fn write_frames<W>(stream: &mut W, frames: &Frames) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    stream.write_u32(frames.len() as u32).await?;
    for frame in frames {
        stream.write_u32(frame.len() as u32).await?;
        stream.write_all(frame).await?;
    }
    stream.flush().await
}

pub async fn read_frames<R>(stream: &mut R) -> std::io::Result<Frames>
where
    R: AsyncRead + Unpin,
{
    let count = stream.read_u32().await?;
    if count > MAX_FRAME_COUNT {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid frame count {}", count),
        ));
    }
    let mut frames = Vec::with_capacity(count as usize);
    let mut total = 0usize;
    for _ in 0..count {
        let len = stream.read_u32().await? as usize;
        total += len;
        if total > MAX_FRAME_SET_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("frame set exceeds {} bytes", MAX_FRAME_SET_LEN),
            ));
        }
        let mut frame = vec![0; len];
        stream.read_exact(&mut frame).await?;
        frames.push(frame);
    }
    Ok(frames)
}
