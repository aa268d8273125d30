use futures_util::{SinkExt, StreamExt};
use timing_protocol::{ClientMessage, ErrorMessage, RelayMessage, ServerMessage};
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::protocol::Message;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Any relay or server message a test client might receive, folded into
/// one type so callers don't have to guess which enum a frame decodes as.
#[derive(Debug)]
pub enum InboundFrame {
    Server(ServerMessage),
    Error(ErrorMessage),
}

async fn connect_authenticated(
    url: &str,
    token: &str,
) -> Result<WsStream, Box<dyn std::error::Error>> {
    use tokio_tungstenite::tungstenite::handshake::client::generate_key;
    let uri: tokio_tungstenite::tungstenite::http::Uri = url.parse()?;
    let host = uri.host().unwrap_or("localhost").to_owned();
    let host_header = match uri.port_u16() {
        Some(p) => format!("{host}:{p}"),
        None => host,
    };
    let request = Request::builder()
        .uri(url)
        .header("Host", host_header)
        .header("Authorization", format!("Bearer {token}"))
        .header("Upgrade", "websocket")
        .header("Connection", "Upgrade")
        .header("Sec-WebSocket-Version", "13")
        .header("Sec-WebSocket-Key", generate_key())
        .body(())?;
    let (ws_stream, _response) = tokio_tungstenite::connect_async(request).await?;
    Ok(ws_stream)
}

async fn recv_frame(
    read: &mut futures_util::stream::SplitStream<WsStream>,
) -> Result<InboundFrame, Box<dyn std::error::Error>> {
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Ok(msg) = serde_json::from_str::<ServerMessage>(&text) {
                    return Ok(InboundFrame::Server(msg));
                }
                let err: ErrorMessage = serde_json::from_str(&text)?;
                return Ok(InboundFrame::Error(err));
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) => return Err("connection closed by server".into()),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => return Err("connection stream ended".into()),
        }
    }
}

/// A mock relay: authenticates with a bearer token, then forwards whatever
/// timing feed messages a test case drives it with.
pub struct RelayTestClient {
    write: futures_util::stream::SplitSink<WsStream, Message>,
    read: futures_util::stream::SplitStream<WsStream>,
}

impl RelayTestClient {
    pub async fn connect(url: &str, token: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let ws_stream = connect_authenticated(url, token).await?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    pub async fn send(&mut self, msg: &RelayMessage) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string(msg)?;
        self.write.send(Message::Text(json.into())).await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<InboundFrame, Box<dyn std::error::Error>> {
        recv_frame(&mut self.read).await
    }

    pub async fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.write.send(Message::Close(None)).await?;
        Ok(())
    }
}

/// A mock subscriber client: sends subscribe/unsubscribe requests and reads
/// the resulting push stream.
pub struct SubscriberTestClient {
    write: futures_util::stream::SplitSink<WsStream, Message>,
    read: futures_util::stream::SplitStream<WsStream>,
}

impl SubscriberTestClient {
    pub async fn connect(url: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    pub async fn send(&mut self, msg: &ClientMessage) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string(msg)?;
        self.write.send(Message::Text(json.into())).await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<InboundFrame, Box<dyn std::error::Error>> {
        recv_frame(&mut self.read).await
    }

    pub async fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.write.send(Message::Close(None)).await?;
        Ok(())
    }
}
