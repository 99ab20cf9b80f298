//! Bridge an async byte stream pair to an [`Endpoint`].

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use super::Endpoint;

/// Spawn reader and writer pumps over a line-oriented stream pair.
///
/// Lines read from `reader` arrive on the returned endpoint; messages sent on
/// it are written to `writer`. The endpoint reports closure when `reader`
/// hits EOF.
pub fn attach<R, W>(reader: R, writer: W) -> Endpoint
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if inbound_tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    tracing::debug!("EOF on bridge stream");
                    break;
                }
                Err(e) => {
                    tracing::warn!("Bridge stream read failed: {e}");
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        let mut writer = writer;
        while let Some(line) = outbound_rx.recv().await {
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                tracing::warn!("Bridge stream write failed: {e}");
                break;
            }
            if let Err(e) = writer.flush().await {
                tracing::warn!("Bridge stream flush failed: {e}");
                break;
            }
        }
    });

    Endpoint::from_channels(outbound_tx, inbound_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BridgeMessage, LookupRequest};
    use geo_filter::AuthorId;

    #[tokio::test]
    async fn test_attach_round_trips_lines() {
        let (near, far) = tokio::io::duplex(1024);
        let (near_read, near_write) = tokio::io::split(near);
        let (far_read, far_write) = tokio::io::split(far);

        let (near_tx, _near_rx) = attach(near_read, near_write).split();
        let (_far_tx, mut far_rx) = attach(far_read, far_write).split();

        let msg = BridgeMessage::LookupRequest(LookupRequest {
            request_id: 9,
            author_id: AuthorId::new("ada"),
        });
        near_tx.send(&msg).unwrap();
        assert_eq!(far_rx.recv().await.unwrap().unwrap(), msg);
    }
}
