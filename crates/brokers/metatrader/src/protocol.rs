use chrono::{DateTime, Utc};
use scalpbot_core::{OrderRequest, TerminalError, Timeframe};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame body accepted in either direction.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Calls sent from the bot TO the bridge. Each mirrors one MT5 API function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Initialize {
        path: Option<String>,
        login: Option<u64>,
        password: Option<String>,
        server: Option<String>,
    },
    Shutdown,
    TerminalInfo,
    AccountInfo,
    SymbolSelect {
        symbol: String,
        enable: bool,
    },
    SymbolInfo {
        symbol: String,
    },
    SymbolInfoTick {
        symbol: String,
    },
    CopyRatesFromPos {
        symbol: String,
        timeframe: Timeframe,
        start: usize,
        count: usize,
    },
    PositionsGet {
        symbol: String,
    },
    OrderSend {
        request: OrderRequest,
    },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Initialize { .. } => "initialize",
            Request::Shutdown => "shutdown",
            Request::TerminalInfo => "terminal_info",
            Request::AccountInfo => "account_info",
            Request::SymbolSelect { .. } => "symbol_select",
            Request::SymbolInfo { .. } => "symbol_info",
            Request::SymbolInfoTick { .. } => "symbol_info_tick",
            Request::CopyRatesFromPos { .. } => "copy_rates_from_pos",
            Request::PositionsGet { .. } => "positions_get",
            Request::OrderSend { .. } => "order_send",
        }
    }
}

/// A request with its correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    #[serde(flatten)]
    pub request: Request,
}

/// `last_error()` as reported by the terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeError {
    pub code: i32,
    pub message: String,
}

/// Frames received FROM the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeMessage {
    /// Greeting sent once after the TCP connection is accepted.
    Connected { version: String },
    /// Answer to the request with the same `id`.
    Response {
        id: u64,
        #[serde(default)]
        result: serde_json::Value,
        #[serde(default)]
        error: Option<BridgeError>,
    },
    /// Keep-alive; carries no payload for the bot.
    Heartbeat {
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
}

/// Write `msg` as a 4-byte big-endian length followed by its JSON body.
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<(), TerminalError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(msg).map_err(|e| TerminalError::Protocol(format!("Serialization error: {e}")))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(TerminalError::Protocol(format!("Frame of {} bytes exceeds limit", body.len())));
    }
    let len = u32::try_from(body.len()).map_err(|_| TerminalError::Protocol("Frame too large".to_string()))?;

    let mut framed = Vec::with_capacity(4 + body.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&body);
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed JSON frame.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, TerminalError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(TerminalError::Protocol(format!("Frame of {len} bytes exceeds limit")));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    serde_json::from_slice(&body).map_err(|e| TerminalError::Protocol(format!("Deserialization error: {e}")))
}
