use crate::types::Result;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

/// The transport stream type behind every connection.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens websocket transports; `ws://` plain, `wss://` through native TLS.
pub struct WebSocketFactory;

impl WebSocketFactory {
    pub async fn create(url: &Url) -> Result<WsStream> {
        let (stream, response) = connect_async(url.as_str()).await?;
        tracing::debug!(status = %response.status(), "websocket handshake complete");
        Ok(stream)
    }
}
