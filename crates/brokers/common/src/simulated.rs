use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use scalpbot_core::*;
use std::collections::VecDeque;
use tracing::debug;

/// Configuration for the simulated terminal (replay and tests).
#[derive(Debug, Clone)]
pub struct SimulatedTerminalConfig {
    pub symbol: SymbolInfo,
    pub initial_balance: Decimal,
    /// Fixed spread added to the bar close to form the ask.
    pub spread_points: u32,
    /// Filling policies the simulated server accepts.
    pub filling_modes: Vec<FillingMode>,
    pub leverage: Decimal,
    pub login: u64,
    pub server: String,
    pub currency: String,
    pub trade_allowed: bool,
}

impl SimulatedTerminalConfig {
    pub fn new(symbol: SymbolInfo, initial_balance: Decimal) -> Self {
        Self {
            symbol,
            initial_balance,
            spread_points: 20,
            filling_modes: vec![FillingMode::Ioc, FillingMode::Fok],
            leverage: Decimal::new(100, 0),
            login: 1,
            server: "Simulated-Server".to_string(),
            currency: "USD".to_string(),
            trade_allowed: true,
        }
    }
}

/// Why a simulated position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Request,
}

/// A realized round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedDeal {
    pub ticket: u64,
    pub side: Side,
    pub volume: Decimal,
    pub price_open: Decimal,
    pub price_close: Decimal,
    pub profit: Decimal,
    pub reason: CloseReason,
    pub closed_at: DateTime<Utc>,
}

/// An in-process terminal that replays M1 history.
///
/// Bars up to and including the cursor are visible; the current quote is
/// the cursor bar's close (bid) plus the configured spread (ask).
pub struct SimulatedTerminal {
    config: SimulatedTerminalConfig,
    history: Vec<Bar>,
    cursor: usize,
    connected: bool,
    balance: Decimal,
    positions: Vec<Position>,
    closed: Vec<ClosedDeal>,
    next_ticket: u64,
    scripted: VecDeque<RetCode>,
    requests: Vec<OrderRequest>,
}

impl SimulatedTerminal {
    pub fn new(config: SimulatedTerminalConfig, history: Vec<Bar>) -> Self {
        let balance = config.initial_balance;
        Self {
            config,
            history,
            cursor: 0,
            connected: false,
            balance,
            positions: Vec::new(),
            closed: Vec::new(),
            next_ticket: 1000,
            scripted: VecDeque::new(),
            requests: Vec::new(),
        }
    }

    /// Move the cursor without processing stops (for warm-up).
    pub fn seek(&mut self, index: usize) {
        self.cursor = index.min(self.history.len().saturating_sub(1));
        self.mark_to_market();
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current_bar(&self) -> Option<&Bar> {
        self.history.get(self.cursor)
    }

    /// Step one M1 bar forward. Positions whose stop or target lies inside
    /// the new bar are closed (stop first when both are touched). Returns
    /// `None` at the end of history.
    pub fn advance(&mut self) -> Option<Bar> {
        if self.cursor + 1 >= self.history.len() {
            return None;
        }
        self.cursor += 1;
        let bar = self.history[self.cursor].clone();
        let spread = self.spread();

        let mut hits = Vec::new();
        for pos in &self.positions {
            // Buys close on the bid, sells on the ask.
            let (low, high) = match pos.side {
                Side::Buy => (bar.low, bar.high),
                Side::Sell => (bar.low + spread, bar.high + spread),
            };
            let sl_hit = pos.sl.filter(|&sl| match pos.side {
                Side::Buy => low <= sl,
                Side::Sell => high >= sl,
            });
            let tp_hit = pos.tp.filter(|&tp| match pos.side {
                Side::Buy => high >= tp,
                Side::Sell => low <= tp,
            });
            if let Some(price) = sl_hit {
                hits.push((pos.ticket, price, CloseReason::StopLoss));
            } else if let Some(price) = tp_hit {
                hits.push((pos.ticket, price, CloseReason::TakeProfit));
            }
        }
        for (ticket, price, reason) in hits {
            self.close_ticket(ticket, price, reason, bar.time);
        }

        self.mark_to_market();
        Some(bar)
    }

    /// Queue a return code for the next `order_send` (test hook).
    pub fn script_retcode(&mut self, code: RetCode) {
        self.scripted.push_back(code);
    }

    pub fn set_trade_allowed(&mut self, allowed: bool) {
        self.config.trade_allowed = allowed;
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn equity(&self) -> Decimal {
        self.balance + self.positions.iter().map(|p| p.profit).sum::<Decimal>()
    }

    pub fn open_positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn closed_deals(&self) -> &[ClosedDeal] {
        &self.closed
    }

    /// Every request received, in order.
    pub fn requests(&self) -> &[OrderRequest] {
        &self.requests
    }

    fn spread(&self) -> Decimal {
        Decimal::from(self.config.spread_points) * self.config.symbol.point
    }

    fn quote(&self) -> Option<Tick> {
        let bar = self.current_bar()?;
        Some(Tick {
            symbol: self.config.symbol.name.clone(),
            time: bar.time,
            bid: bar.close,
            ask: bar.close + self.spread(),
            volume: bar.tick_volume,
        })
    }

    fn profit(&self, side: Side, open: Decimal, close: Decimal, volume: Decimal) -> Decimal {
        let symbol = &self.config.symbol;
        if symbol.trade_tick_size.is_zero() {
            return Decimal::ZERO;
        }
        let diff = match side {
            Side::Buy => close - open,
            Side::Sell => open - close,
        };
        (diff / symbol.trade_tick_size * symbol.trade_tick_value * volume).round_dp(2)
    }

    fn mark_to_market(&mut self) {
        let Some(tick) = self.quote() else {
            return;
        };
        let updated: Vec<(Decimal, Decimal)> = self
            .positions
            .iter()
            .map(|p| {
                let price = tick.price_for(p.side.opposite());
                (price, self.profit(p.side, p.price_open, price, p.volume))
            })
            .collect();
        for (pos, (price, profit)) in self.positions.iter_mut().zip(updated) {
            pos.price_current = price;
            pos.profit = profit;
        }
    }

    fn close_ticket(&mut self, ticket: u64, price: Decimal, reason: CloseReason, at: DateTime<Utc>) -> Option<ClosedDeal> {
        let idx = self.positions.iter().position(|p| p.ticket == ticket)?;
        let pos = self.positions.remove(idx);
        let profit = self.profit(pos.side, pos.price_open, price, pos.volume);
        self.balance += profit;

        debug!(ticket, reason = ?reason, price = %price, profit = %profit, "Simulated position closed");
        let deal = ClosedDeal {
            ticket,
            side: pos.side,
            volume: pos.volume,
            price_open: pos.price_open,
            price_close: price,
            profit,
            reason,
            closed_at: at,
        };
        self.closed.push(deal.clone());
        Some(deal)
    }

    fn stops_valid(side: Side, price: Decimal, sl: Option<Decimal>, tp: Option<Decimal>) -> bool {
        match side {
            Side::Buy => sl.map_or(true, |sl| sl < price) && tp.map_or(true, |tp| tp > price),
            Side::Sell => sl.map_or(true, |sl| sl > price) && tp.map_or(true, |tp| tp < price),
        }
    }

    fn take_ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }
}

#[async_trait]
impl Terminal for SimulatedTerminal {
    async fn initialize(&mut self) -> Result<(), TerminalError> {
        if self.history.is_empty() {
            return Err(TerminalError::InitFailed {
                code: -1,
                message: "no price history loaded".to_string(),
            });
        }
        self.connected = true;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), TerminalError> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn terminal_info(&mut self) -> Result<TerminalInfo, TerminalError> {
        if !self.connected {
            return Err(TerminalError::NotConnected);
        }
        Ok(TerminalInfo {
            connected: true,
            trade_allowed: self.config.trade_allowed,
            build: 0,
            company: "Simulated".to_string(),
        })
    }

    async fn account_info(&mut self) -> Result<AccountInfo, TerminalError> {
        if !self.connected {
            return Err(TerminalError::NotConnected);
        }
        let contract = self.config.symbol.trade_contract_size;
        let margin = if self.config.leverage.is_zero() {
            Decimal::ZERO
        } else {
            self.positions
                .iter()
                .map(|p| p.volume * contract * p.price_open / self.config.leverage)
                .sum::<Decimal>()
                .round_dp(2)
        };
        let equity = self.equity();
        Ok(AccountInfo {
            login: self.config.login,
            server: self.config.server.clone(),
            currency: self.config.currency.clone(),
            balance: self.balance,
            equity,
            margin,
            margin_free: equity - margin,
            profit: equity - self.balance,
        })
    }

    async fn symbol_select(&mut self, symbol: &str, _enable: bool) -> Result<bool, TerminalError> {
        Ok(symbol == self.config.symbol.name)
    }

    async fn symbol_info(&mut self, symbol: &str) -> Result<SymbolInfo, TerminalError> {
        if symbol != self.config.symbol.name {
            return Err(TerminalError::SymbolNotFound(symbol.to_string()));
        }
        Ok(self.config.symbol.clone())
    }

    async fn symbol_info_tick(&mut self, symbol: &str) -> Result<Tick, TerminalError> {
        if !self.connected {
            return Err(TerminalError::NotConnected);
        }
        if symbol != self.config.symbol.name {
            return Err(TerminalError::SymbolNotFound(symbol.to_string()));
        }
        self.quote()
            .ok_or_else(|| TerminalError::NoData(format!("no quote for {symbol}")))
    }

    async fn copy_rates_from_pos(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        start: usize,
        count: usize,
    ) -> Result<Vec<Bar>, TerminalError> {
        if symbol != self.config.symbol.name {
            return Err(TerminalError::SymbolNotFound(symbol.to_string()));
        }
        let visible = self
            .history
            .get(..=self.cursor)
            .ok_or_else(|| TerminalError::NoData(format!("no history for {symbol}")))?;
        let bars = match timeframe {
            Timeframe::M1 => visible[window(visible.len(), start, count)].to_vec(),
            tf => {
                // One spare bucket so a partial leading bucket falls outside the slice.
                let needed = (start + count + 1).saturating_mul(tf.minutes() as usize);
                let mut series = aggregate(&visible[visible.len().saturating_sub(needed)..], tf);
                let range = window(series.len(), start, count);
                series.truncate(range.end);
                series.drain(..range.start);
                series
            }
        };
        if bars.is_empty() {
            return Err(TerminalError::NoData(format!("no {} rates for {symbol}", timeframe.as_str())));
        }
        Ok(bars)
    }

    async fn positions_get(&mut self, symbol: &str) -> Result<Vec<Position>, TerminalError> {
        if !self.connected {
            return Err(TerminalError::NotConnected);
        }
        Ok(self.positions.iter().filter(|p| p.symbol == symbol).cloned().collect())
    }

    async fn order_send(&mut self, request: &OrderRequest) -> Result<OrderResult, TerminalError> {
        if !self.connected {
            return Err(TerminalError::NotConnected);
        }
        self.requests.push(request.clone());

        if let Some(code) = self.scripted.pop_front() {
            if !code.is_success() {
                return Ok(OrderResult::rejected(code, "scripted rejection"));
            }
        }
        if !self.config.trade_allowed {
            return Ok(OrderResult::rejected(RetCode::TradeDisabled, "Trade disabled"));
        }
        if request.symbol != self.config.symbol.name {
            return Ok(OrderResult::rejected(RetCode::Invalid, "Unknown symbol"));
        }
        if !self.config.filling_modes.contains(&request.type_filling) {
            return Ok(OrderResult::rejected(RetCode::InvalidFill, "Unsupported filling mode"));
        }
        if !self.config.symbol.is_valid_volume(request.volume) {
            return Ok(OrderResult::rejected(RetCode::InvalidVolume, "Invalid volume"));
        }
        let tick = self
            .quote()
            .ok_or_else(|| TerminalError::NoData("no quote".to_string()))?;
        let price = tick.price_for(request.side);
        let now = tick.time;

        if let Some(ticket) = request.position {
            let Some(pos) = self.positions.iter().find(|p| p.ticket == ticket) else {
                return Ok(OrderResult::rejected(RetCode::Invalid, "Position not found"));
            };
            if pos.side == request.side || pos.volume != request.volume {
                return Ok(OrderResult::rejected(RetCode::Invalid, "Close request does not match position"));
            }
            let deal = self.take_ticket();
            self.close_ticket(ticket, price, CloseReason::Request, now);
            self.mark_to_market();
            return Ok(OrderResult {
                retcode: RetCode::Done,
                order: ticket,
                deal,
                volume: request.volume,
                price,
                comment: "Request executed".to_string(),
            });
        }

        if !Self::stops_valid(request.side, price, request.sl, request.tp) {
            return Ok(OrderResult::rejected(RetCode::InvalidStops, "Invalid stops"));
        }

        let ticket = self.take_ticket();
        self.positions.push(Position {
            ticket,
            symbol: request.symbol.clone(),
            side: request.side,
            volume: request.volume,
            price_open: price,
            price_current: price,
            sl: request.sl,
            tp: request.tp,
            profit: Decimal::ZERO,
            magic: request.magic,
            comment: request.comment.clone(),
            opened_at: now,
        });
        self.mark_to_market();
        debug!(ticket, side = %request.side, volume = %request.volume, price = %price, "Simulated position opened");

        Ok(OrderResult {
            retcode: RetCode::Done,
            order: ticket,
            deal: ticket,
            volume: request.volume,
            price,
            comment: "Request executed".to_string(),
        })
    }
}

/// Index range of `count` bars ending `start` bars before the newest.
fn window(len: usize, start: usize, count: usize) -> std::ops::Range<usize> {
    let end = len.saturating_sub(start);
    end.saturating_sub(count)..end
}

/// Fold M1 bars into `timeframe` buckets aligned to the epoch.
fn aggregate(bars: &[Bar], timeframe: Timeframe) -> Vec<Bar> {
    let span = Duration::minutes(i64::from(timeframe.minutes()));
    let span_secs = span.num_seconds();
    let mut out: Vec<Bar> = Vec::new();

    for bar in bars {
        let ts = bar.time.timestamp();
        let bucket_start = ts - ts.rem_euclid(span_secs);
        let bucket_time = DateTime::from_timestamp(bucket_start, 0).unwrap_or(bar.time);

        match out.last_mut() {
            Some(agg) if agg.time == bucket_time => {
                agg.high = agg.high.max(bar.high);
                agg.low = agg.low.min(bar.low);
                agg.close = bar.close;
                agg.tick_volume += bar.tick_volume;
            }
            _ => out.push(Bar {
                time: bucket_time,
                ..bar.clone()
            }),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn xauusd() -> SymbolInfo {
        SymbolInfo {
            name: "XAUUSD".to_string(),
            point: dec!(0.01),
            digits: 2,
            volume_min: dec!(0.01),
            volume_max: dec!(50),
            volume_step: dec!(0.01),
            trade_tick_value: dec!(1),
            trade_tick_size: dec!(0.01),
            trade_contract_size: dec!(100),
            trade_mode: TradeMode::Full,
        }
    }

    fn bar(minute: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Bar {
        Bar {
            time: Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap() + Duration::minutes(minute),
            open,
            high,
            low,
            close,
            tick_volume: dec!(10),
        }
    }

    fn history() -> Vec<Bar> {
        vec![
            bar(0, dec!(2000), dec!(2001), dec!(1999), dec!(2000)),
            bar(1, dec!(2000), dec!(2002), dec!(1999.5), dec!(2001)),
            bar(2, dec!(2001), dec!(2003), dec!(2000.5), dec!(2002)),
            bar(3, dec!(2002), dec!(2002.5), dec!(1996), dec!(1997)),
            bar(4, dec!(1997), dec!(2006), dec!(1996.5), dec!(2005)),
            bar(5, dec!(2005), dec!(2006), dec!(2004), dec!(2005.5)),
        ]
    }

    async fn connected() -> SimulatedTerminal {
        let mut term = SimulatedTerminal::new(SimulatedTerminalConfig::new(xauusd(), dec!(10000)), history());
        term.initialize().await.unwrap();
        term
    }

    #[tokio::test]
    async fn test_quote_from_bar_close() {
        let mut term = connected().await;
        let tick = term.symbol_info_tick("XAUUSD").await.unwrap();
        assert_eq!(tick.bid, dec!(2000));
        assert_eq!(tick.ask, dec!(2000.20));
        term.advance();
        let tick = term.symbol_info_tick("XAUUSD").await.unwrap();
        assert_eq!(tick.bid, dec!(2001));
    }

    #[tokio::test]
    async fn test_buy_hits_take_profit() {
        let mut term = connected().await;
        let mut req = OrderRequest::market("XAUUSD", Side::Buy, dec!(0.10), dec!(2000.20));
        req.sl = Some(dec!(1995));
        req.tp = Some(dec!(2002.50));
        let result = term.order_send(&req).await.unwrap();
        assert_eq!(result.retcode, RetCode::Done);
        assert_eq!(result.price, dec!(2000.20));

        term.advance(); // high 2002
        assert_eq!(term.open_positions().len(), 1);
        term.advance(); // high 2003 -> TP
        assert!(term.open_positions().is_empty());

        let deal = &term.closed_deals()[0];
        assert_eq!(deal.reason, CloseReason::TakeProfit);
        // (2002.50 - 2000.20) / 0.01 * 1 * 0.10 = 23
        assert_eq!(deal.profit, dec!(23));
        assert_eq!(term.balance(), dec!(10023));
    }

    #[tokio::test]
    async fn test_stop_loss_checked_before_take_profit() {
        let mut term = connected().await;
        term.seek(3);
        // Bar 4 spans 1996.5..2006: both levels inside
        let mut req = OrderRequest::market("XAUUSD", Side::Buy, dec!(0.10), dec!(1997.20));
        req.sl = Some(dec!(1996.80));
        req.tp = Some(dec!(2004));
        term.order_send(&req).await.unwrap();
        term.advance();
        let deal = &term.closed_deals()[0];
        assert_eq!(deal.reason, CloseReason::StopLoss);
        assert_eq!(deal.price_close, dec!(1996.80));
    }

    #[tokio::test]
    async fn test_sell_stop_uses_ask() {
        let mut term = connected().await;
        // SL 2002.10: bar 1 high 2002 + spread 0.20 = 2002.20 on the ask
        let mut req = OrderRequest::market("XAUUSD", Side::Sell, dec!(0.10), dec!(2000));
        req.sl = Some(dec!(2002.10));
        term.order_send(&req).await.unwrap();
        term.advance();
        assert_eq!(term.closed_deals()[0].reason, CloseReason::StopLoss);
        // (2000 - 2002.10) / 0.01 * 0.10
        assert_eq!(term.closed_deals()[0].profit, dec!(-21));
    }

    #[tokio::test]
    async fn test_order_validation() {
        let mut term = SimulatedTerminal::new(
            SimulatedTerminalConfig {
                filling_modes: vec![FillingMode::Fok],
                ..SimulatedTerminalConfig::new(xauusd(), dec!(10000))
            },
            history(),
        );
        term.initialize().await.unwrap();

        let req = OrderRequest::market("XAUUSD", Side::Buy, dec!(0.10), dec!(2000.20));
        assert_eq!(term.order_send(&req).await.unwrap().retcode, RetCode::InvalidFill);

        let mut req = req.clone();
        req.type_filling = FillingMode::Fok;
        req.volume = dec!(0.015);
        assert_eq!(term.order_send(&req).await.unwrap().retcode, RetCode::InvalidVolume);

        req.volume = dec!(0.10);
        req.sl = Some(dec!(2001));
        assert_eq!(term.order_send(&req).await.unwrap().retcode, RetCode::InvalidStops);

        term.script_retcode(RetCode::Requote);
        req.sl = None;
        assert_eq!(term.order_send(&req).await.unwrap().retcode, RetCode::Requote);
        assert_eq!(term.order_send(&req).await.unwrap().retcode, RetCode::Done);
        assert_eq!(term.requests().len(), 5);
    }

    #[tokio::test]
    async fn test_close_by_position_ticket() {
        let mut term = connected().await;
        let req = OrderRequest::market("XAUUSD", Side::Buy, dec!(0.10), dec!(2000.20));
        let opened = term.order_send(&req).await.unwrap();
        term.advance();
        term.advance();

        let position = term.positions_get("XAUUSD").await.unwrap().remove(0);
        assert_eq!(position.ticket, opened.order);
        assert_eq!(position.price_current, dec!(2002));
        let close = OrderRequest::close(&position, dec!(2002));
        let result = term.order_send(&close).await.unwrap();
        assert_eq!(result.retcode, RetCode::Done);
        assert!(term.positions_get("XAUUSD").await.unwrap().is_empty());
        // (2002 - 2000.20) / 0.01 * 0.10 = 18
        assert_eq!(term.balance(), dec!(10018));
    }

    #[tokio::test]
    async fn test_rates_aggregate_higher_timeframe() {
        let mut term = connected().await;
        term.seek(5);
        let m5 = term.copy_rates_from_pos("XAUUSD", Timeframe::M5, 0, 10).await.unwrap();
        assert_eq!(m5.len(), 2);
        assert_eq!(m5[0].open, dec!(2000));
        assert_eq!(m5[0].high, dec!(2006));
        assert_eq!(m5[0].low, dec!(1996));
        assert_eq!(m5[0].close, dec!(2005));
        assert_eq!(m5[0].tick_volume, dec!(50));

        let m1 = term.copy_rates_from_pos("XAUUSD", Timeframe::M1, 1, 2).await.unwrap();
        assert_eq!(m1.len(), 2);
        assert_eq!(m1[1].close, dec!(2005));
    }

    #[test]
    fn test_rate_window_bounds() {
        assert_eq!(window(10, 0, 3), 7..10);
        assert_eq!(window(10, 2, 3), 5..8);
        assert_eq!(window(10, 0, 50), 0..10);
        assert_eq!(window(10, 12, 3), 0..0);
    }

    #[tokio::test]
    async fn test_rates_only_cover_visible_window() {
        let mut term = connected().await;
        term.seek(5);
        let m1 = term.copy_rates_from_pos("XAUUSD", Timeframe::M1, 0, 3).await.unwrap();
        assert_eq!(m1.len(), 3);
        assert_eq!(m1[2].time, term.current_bar().unwrap().time);

        assert!(matches!(
            term.copy_rates_from_pos("XAUUSD", Timeframe::M1, 100, 3).await,
            Err(TerminalError::NoData(_))
        ));
    }
}
