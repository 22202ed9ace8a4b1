use rust_decimal::Decimal;
use scalpbot_core::*;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Terminal(#[from] TerminalError),
    #[error("Invalid volume {volume} for {symbol}")]
    InvalidVolume { symbol: String, volume: Decimal },
    #[error("No filling modes configured")]
    NoFillingModes,
}

/// Sends market deals with filling-mode fallback and requote retries.
///
/// An `InvalidFill` answer moves on to the next filling mode without
/// counting as an attempt. Transient answers (requote, price changed,
/// timeout, ...) are retried on a fresh quote until `max_attempts`.
#[derive(Debug, Clone)]
pub struct OrderExecutor {
    filling_sequence: Vec<FillingMode>,
    max_attempts: u32,
    retry_delay: Duration,
    deviation: u32,
    magic: u64,
}

impl OrderExecutor {
    pub fn new(magic: u64, deviation: u32) -> Self {
        Self {
            filling_sequence: vec![FillingMode::Ioc, FillingMode::Fok],
            max_attempts: 3,
            retry_delay: Duration::from_millis(500),
            deviation,
            magic,
        }
    }

    pub fn with_filling_sequence(mut self, sequence: Vec<FillingMode>) -> Self {
        self.filling_sequence = sequence;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn magic(&self) -> u64 {
        self.magic
    }

    /// Open a market position on `symbol`.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute<T: Terminal + ?Sized>(
        &self,
        terminal: &mut T,
        symbol: &SymbolInfo,
        side: Side,
        volume: Decimal,
        sl: Option<Decimal>,
        tp: Option<Decimal>,
        comment: &str,
    ) -> Result<ExecutionReport, ExecutionError> {
        let volume = symbol.normalize_volume(volume);
        if !symbol.is_valid_volume(volume) {
            return Err(ExecutionError::InvalidVolume {
                symbol: symbol.name.clone(),
                volume,
            });
        }

        let mut request = OrderRequest::market(&symbol.name, side, volume, Decimal::ZERO);
        request.sl = sl.map(|p| symbol.normalize_price(p));
        request.tp = tp.map(|p| symbol.normalize_price(p));
        request.deviation = self.deviation;
        request.magic = self.magic;
        request.comment = comment.to_string();

        let report = self.send_with_fallback(terminal, symbol, request).await?;
        if report.success {
            info!(
                symbol = %symbol.name,
                ticket = ?report.ticket,
                side = %side,
                volume = %report.volume,
                price = %report.price,
                filling = report.filling.as_str(),
                "Order executed"
            );
        } else {
            warn!(symbol = %symbol.name, retcode = ?report.retcode, message = %report.message, "Order failed");
        }
        Ok(report)
    }

    /// Close `position` with an opposite deal referencing its ticket.
    pub async fn close_position<T: Terminal + ?Sized>(
        &self,
        terminal: &mut T,
        symbol: &SymbolInfo,
        position: &Position,
    ) -> Result<ExecutionReport, ExecutionError> {
        let mut request = OrderRequest::close(position, Decimal::ZERO);
        request.deviation = self.deviation;
        request.comment = "close".to_string();

        let mut report = self.send_with_fallback(terminal, symbol, request).await?;
        if report.success {
            report.ticket = Some(position.ticket);
            info!(ticket = position.ticket, price = %report.price, "Position closed");
        } else {
            warn!(ticket = position.ticket, retcode = ?report.retcode, message = %report.message, "Close failed");
        }
        Ok(report)
    }

    async fn send_with_fallback<T: Terminal + ?Sized>(
        &self,
        terminal: &mut T,
        symbol: &SymbolInfo,
        mut request: OrderRequest,
    ) -> Result<ExecutionReport, ExecutionError> {
        let mut modes = self.filling_sequence.iter().copied();
        let mut filling = modes.next().ok_or(ExecutionError::NoFillingModes)?;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let tick = terminal.symbol_info_tick(&symbol.name).await?;
            request.price = tick.price_for(request.side);
            request.type_filling = filling;

            let result = terminal.order_send(&request).await?;
            if result.retcode.is_success() {
                return Ok(ExecutionReport {
                    success: true,
                    ticket: (result.order != 0).then_some(result.order),
                    side: request.side,
                    volume: if result.volume.is_zero() { request.volume } else { result.volume },
                    price: if result.price.is_zero() { request.price } else { result.price },
                    sl: request.sl,
                    tp: request.tp,
                    filling,
                    attempts,
                    retcode: Some(result.retcode),
                    message: result.comment,
                });
            }

            if result.retcode == RetCode::InvalidFill {
                if let Some(next) = modes.next() {
                    warn!(
                        symbol = %symbol.name,
                        from = filling.as_str(),
                        to = next.as_str(),
                        "Filling mode rejected, falling back"
                    );
                    filling = next;
                    attempts -= 1;
                    continue;
                }
            } else if result.retcode.is_transient() && attempts < self.max_attempts {
                warn!(
                    symbol = %symbol.name,
                    retcode = %result.retcode,
                    attempt = attempts,
                    "Transient rejection, retrying"
                );
                if !self.retry_delay.is_zero() {
                    tokio::time::sleep(self.retry_delay).await;
                }
                continue;
            }

            return Ok(ExecutionReport {
                success: false,
                ticket: None,
                side: request.side,
                volume: request.volume,
                price: request.price,
                sl: request.sl,
                tp: request.tp,
                filling,
                attempts,
                retcode: Some(result.retcode),
                message: format!("retcode {}: {}", result.retcode, result.comment),
            });
        }
    }
}
