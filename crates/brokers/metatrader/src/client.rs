use async_trait::async_trait;
use scalpbot_core::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::protocol::*;

/// Configuration for reaching the MT5 bridge and logging the terminal in.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaTraderConfig {
    /// Host address of the bridge (e.g. "127.0.0.1").
    pub host: String,
    /// Port the bridge is listening on.
    pub port: u16,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Path to terminal64.exe, passed through to `initialize`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

impl Default for MetaTraderConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5556,
            connect_timeout_secs: 10,
            request_timeout_secs: 10,
            terminal_path: None,
            login: None,
            password: None,
            server: None,
        }
    }
}

impl std::fmt::Debug for MetaTraderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaTraderConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("terminal_path", &self.terminal_path)
            .field("login", &self.login)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("server", &self.server)
            .finish()
    }
}

/// `Terminal` implementation backed by a MetaTrader 5 bridge.
pub struct MetaTraderTerminal {
    config: MetaTraderConfig,
    stream: Option<TcpStream>,
    next_id: u64,
    bridge_version: Option<String>,
}

impl MetaTraderTerminal {
    pub fn new(config: MetaTraderConfig) -> Self {
        Self {
            config,
            stream: None,
            next_id: 0,
            bridge_version: None,
        }
    }

    pub fn bridge_version(&self) -> Option<&str> {
        self.bridge_version.as_deref()
    }

    async fn open_stream(&mut self) -> Result<(), TerminalError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!(addr = %addr, "Connecting to MetaTrader bridge");

        let secs = self.config.connect_timeout_secs;
        let mut stream = timeout(Duration::from_secs(secs), TcpStream::connect(&addr))
            .await
            .map_err(|_| TerminalError::Timeout(secs))??;
        stream.set_nodelay(true)?;

        let greeting: BridgeMessage = timeout(Duration::from_secs(secs), read_frame(&mut stream))
            .await
            .map_err(|_| TerminalError::Timeout(secs))??;
        match greeting {
            BridgeMessage::Connected { version } => {
                info!(version = %version, "MetaTrader bridge connected");
                self.bridge_version = Some(version);
            }
            other => {
                return Err(TerminalError::Protocol(format!("Unexpected greeting: {other:?}")));
            }
        }

        self.stream = Some(stream);
        Ok(())
    }

    /// Send one request and wait for the response carrying its id.
    async fn call<T: DeserializeOwned>(&mut self, request: Request) -> Result<T, TerminalError> {
        let name = request.name();
        self.next_id += 1;
        let id = self.next_id;
        let secs = self.config.request_timeout_secs;

        let outcome = match self.stream.as_mut() {
            Some(stream) => timeout(Duration::from_secs(secs), exchange(stream, RequestFrame { id, request }))
                .await
                .unwrap_or(Err(TerminalError::Timeout(secs))),
            None => return Err(TerminalError::NotConnected),
        };

        let (result, error) = match outcome {
            Ok(reply) => reply,
            Err(e) => {
                // The stream position is unknown after a failed exchange.
                if matches!(e, TerminalError::Io(_) | TerminalError::Timeout(_) | TerminalError::Protocol(_)) {
                    warn!(request = name, error = %e, "Bridge link lost");
                    self.stream = None;
                }
                return Err(e);
            }
        };

        if let Some(err) = error {
            debug!(request = name, code = err.code, "Bridge returned an error");
            return Err(TerminalError::Bridge {
                code: err.code,
                message: err.message,
            });
        }
        serde_json::from_value(result)
            .map_err(|e| TerminalError::Protocol(format!("Bad {name} result: {e}")))
    }
}

async fn exchange(
    stream: &mut TcpStream,
    frame: RequestFrame,
) -> Result<(serde_json::Value, Option<BridgeError>), TerminalError> {
    write_frame(stream, &frame).await?;
    loop {
        match read_frame::<_, BridgeMessage>(stream).await? {
            BridgeMessage::Response { id, result, error } if id == frame.id => return Ok((result, error)),
            BridgeMessage::Response { id, .. } => {
                warn!(expected = frame.id, got = id, "Discarding stale bridge response");
            }
            BridgeMessage::Heartbeat { .. } => {}
            BridgeMessage::Connected { .. } => {
                return Err(TerminalError::Protocol("Unexpected greeting mid-session".to_string()));
            }
        }
    }
}

#[async_trait]
impl Terminal for MetaTraderTerminal {
    async fn initialize(&mut self) -> Result<(), TerminalError> {
        if self.stream.is_none() {
            self.open_stream().await?;
        }
        let request = Request::Initialize {
            path: self.config.terminal_path.clone(),
            login: self.config.login,
            password: self.config.password.clone(),
            server: self.config.server.clone(),
        };
        match self.call::<serde_json::Value>(request).await {
            Ok(_) => Ok(()),
            Err(TerminalError::Bridge { code, message }) => {
                self.stream = None;
                Err(TerminalError::InitFailed { code, message })
            }
            Err(e) => Err(e),
        }
    }

    async fn shutdown(&mut self) -> Result<(), TerminalError> {
        if self.stream.is_some() {
            if let Err(e) = self.call::<serde_json::Value>(Request::Shutdown).await {
                debug!(error = %e, "Bridge shutdown request failed");
            }
        }
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        info!("Disconnected from MetaTrader bridge");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn terminal_info(&mut self) -> Result<TerminalInfo, TerminalError> {
        self.call(Request::TerminalInfo).await
    }

    async fn account_info(&mut self) -> Result<AccountInfo, TerminalError> {
        self.call(Request::AccountInfo).await
    }

    async fn symbol_select(&mut self, symbol: &str, enable: bool) -> Result<bool, TerminalError> {
        self.call(Request::SymbolSelect {
            symbol: symbol.to_string(),
            enable,
        })
        .await
    }

    async fn symbol_info(&mut self, symbol: &str) -> Result<SymbolInfo, TerminalError> {
        let info: Option<SymbolInfo> = self
            .call(Request::SymbolInfo {
                symbol: symbol.to_string(),
            })
            .await?;
        info.ok_or_else(|| TerminalError::SymbolNotFound(symbol.to_string()))
    }

    async fn symbol_info_tick(&mut self, symbol: &str) -> Result<Tick, TerminalError> {
        let tick: Option<Tick> = self
            .call(Request::SymbolInfoTick {
                symbol: symbol.to_string(),
            })
            .await?;
        tick.ok_or_else(|| TerminalError::NoData(format!("no tick for {symbol}")))
    }

    async fn copy_rates_from_pos(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        start: usize,
        count: usize,
    ) -> Result<Vec<Bar>, TerminalError> {
        let bars: Option<Vec<Bar>> = self
            .call(Request::CopyRatesFromPos {
                symbol: symbol.to_string(),
                timeframe,
                start,
                count,
            })
            .await?;
        match bars {
            Some(bars) if !bars.is_empty() => Ok(bars),
            _ => Err(TerminalError::NoData(format!("no {} rates for {symbol}", timeframe.as_str()))),
        }
    }

    async fn positions_get(&mut self, symbol: &str) -> Result<Vec<Position>, TerminalError> {
        let positions: Option<Vec<Position>> = self
            .call(Request::PositionsGet {
                symbol: symbol.to_string(),
            })
            .await?;
        Ok(positions.unwrap_or_default())
    }

    async fn order_send(&mut self, request: &OrderRequest) -> Result<OrderResult, TerminalError> {
        let result: Option<OrderResult> = self
            .call(Request::OrderSend {
                request: request.clone(),
            })
            .await?;
        // order_send returning None means the request never reached the server.
        result.ok_or_else(|| TerminalError::Protocol("order_send returned no result".to_string()))
    }
}
