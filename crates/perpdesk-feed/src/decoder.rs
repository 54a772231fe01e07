//! Frame decoders.
//!
//! Two wire formats reach the router:
//! 1. Exchange frames: raw or combined-stream (`{"stream":..,"data":..}`)
//!    market events, mini-ticker arrays, user-data events and control replies
//! 2. Gateway frames: the browser protocol, tagged by `type`
//!
//! Exchange payloads use single-letter keys and send numbers as strings.

use crate::error::{FeedError, FeedResult};
use crate::event::{
    AccountUpdate, InboundEvent, OrderUpdate, PriceTick, StreamError, StreamErrorKind,
};
use perpdesk_core::{
    now_ms, DepthLevel, DepthUpdate, Kline, MiniTicker, Order, OrderId, OrderSide, OrderStatus,
    OrderType, Position, Price, Size, Ticker,
};
use perpdesk_ws::GatewayMessage;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// Result of decoding one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Events(Vec<InboundEvent>),
    /// Well-formed, but of a kind nothing handles.
    Unknown(String),
    /// Well-formed control traffic with nothing to dispatch (subscription acks).
    Ignored,
}

/// Turns raw text frames into inbound events.
pub trait FrameDecoder: Send + Sync {
    fn decode(&self, frame: &str) -> FeedResult<Decoded>;
}

#[derive(Debug, Deserialize)]
struct RawMiniTicker {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    close: Price,
    #[serde(rename = "o")]
    open: Price,
    #[serde(rename = "h")]
    high: Price,
    #[serde(rename = "l")]
    low: Price,
    #[serde(rename = "v")]
    volume: Size,
    #[serde(rename = "q")]
    quote_volume: Decimal,
}

#[derive(Debug, Deserialize)]
struct RawTicker {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price_change: Decimal,
    #[serde(rename = "P")]
    price_change_percent: Decimal,
    #[serde(rename = "c")]
    close: Price,
    #[serde(rename = "h")]
    high: Price,
    #[serde(rename = "l")]
    low: Price,
    #[serde(rename = "v")]
    volume: Size,
    #[serde(rename = "q")]
    quote_volume: Decimal,
}

#[derive(Debug, Deserialize)]
struct RawKlineEvent {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: RawKline,
}

#[derive(Debug, Deserialize)]
struct RawKline {
    #[serde(rename = "t")]
    start_time: i64,
    #[serde(rename = "T")]
    end_time: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: Price,
    #[serde(rename = "h")]
    high: Price,
    #[serde(rename = "l")]
    low: Price,
    #[serde(rename = "c")]
    close: Price,
    #[serde(rename = "v")]
    volume: Size,
    #[serde(rename = "x")]
    is_closed: bool,
}

#[derive(Debug, Deserialize)]
struct RawDepth {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b", default)]
    bids: Vec<DepthLevel>,
    #[serde(rename = "a", default)]
    asks: Vec<DepthLevel>,
}

#[derive(Debug, Deserialize)]
struct RawAccountUpdate {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "a")]
    account: RawAccountData,
}

#[derive(Debug, Deserialize)]
struct RawAccountData {
    #[serde(rename = "m", default)]
    reason: Option<String>,
    #[serde(rename = "P", default)]
    positions: Vec<RawAccountPosition>,
}

#[derive(Debug, Deserialize)]
struct RawAccountPosition {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "pa")]
    amount: Size,
    #[serde(rename = "ep")]
    entry_price: Price,
    #[serde(rename = "up", default)]
    unrealized_pnl: Decimal,
}

#[derive(Debug, Deserialize)]
struct RawOrderTradeUpdate {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "o")]
    order: RawOrderData,
}

#[derive(Debug, Deserialize)]
struct RawOrderData {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c", default)]
    client_order_id: Option<String>,
    #[serde(rename = "S")]
    side: OrderSide,
    #[serde(rename = "o")]
    order_type: OrderType,
    #[serde(rename = "q")]
    quantity: Size,
    #[serde(rename = "p")]
    price: Price,
    #[serde(rename = "sp", default)]
    stop_price: Option<Price>,
    #[serde(rename = "x")]
    execution_type: String,
    #[serde(rename = "X")]
    status: OrderStatus,
    #[serde(rename = "i")]
    order_id: u64,
    #[serde(rename = "z", default)]
    filled: Option<Size>,
    #[serde(rename = "T", default)]
    trade_time: i64,
}

#[derive(Debug, Deserialize)]
struct RawStreamError {
    code: i64,
    msg: String,
}

fn parse<T: DeserializeOwned>(value: &Value, what: &str) -> FeedResult<T> {
    T::deserialize(value).map_err(|e| FeedError::ParseError(format!("{what}: {e}")))
}

fn single(event: InboundEvent) -> Decoded {
    Decoded::Events(vec![event])
}

/// Decoder for exchange market and user-data streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExchangeDecoder;

impl ExchangeDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode a parsed exchange payload (envelope already removed).
    pub fn decode_value(&self, value: &Value) -> FeedResult<Decoded> {
        if let Value::Array(items) = value {
            return self.decode_batch(items);
        }

        let Some(object) = value.as_object() else {
            return Err(FeedError::InvalidData(
                "frame is neither an object nor an array".to_string(),
            ));
        };

        if let Some(data) = object.get("data").filter(|_| object.contains_key("stream")) {
            return self.decode_value(data);
        }

        if let Some(event_type) = object.get("e").and_then(Value::as_str) {
            return self.decode_event(event_type, value);
        }

        if let Some(error) = object.get("error") {
            let raw: RawStreamError = parse(error, "stream error")?;
            return Ok(single(InboundEvent::Error(StreamError {
                kind: StreamErrorKind::Exchange,
                code: Some(raw.code),
                message: raw.msg,
                panel: None,
            })));
        }

        if object.contains_key("result") && object.contains_key("id") {
            return Ok(Decoded::Ignored);
        }

        Err(FeedError::InvalidData("frame has no event type".to_string()))
    }

    /// Arrays (`!miniTicker@arr`) fan out into one event per element.
    /// A malformed element is skipped; its siblings still go through.
    fn decode_batch(&self, items: &[Value]) -> FeedResult<Decoded> {
        let mut events = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            match self.decode_value(item) {
                Ok(Decoded::Events(mut batch)) => events.append(&mut batch),
                Ok(Decoded::Unknown(_) | Decoded::Ignored) => {}
                Err(e) => warn!(index, error = %e, "Skipping malformed batch element"),
            }
        }
        Ok(Decoded::Events(events))
    }

    fn decode_event(&self, event_type: &str, value: &Value) -> FeedResult<Decoded> {
        let event = match event_type {
            "24hrMiniTicker" => {
                let raw: RawMiniTicker = parse(value, event_type)?;
                InboundEvent::PriceTick(PriceTick::Mini(MiniTicker {
                    symbol: raw.symbol,
                    price: raw.close,
                    open: raw.open,
                    high: raw.high,
                    low: raw.low,
                    volume: raw.volume,
                    quote_volume: raw.quote_volume,
                    timestamp: now_ms(),
                    event_time: raw.event_time,
                }))
            }
            "24hrTicker" => {
                let raw: RawTicker = parse(value, event_type)?;
                InboundEvent::PriceTick(PriceTick::Full(Ticker {
                    symbol: raw.symbol,
                    price: raw.close,
                    price_change: raw.price_change,
                    price_change_percent: raw.price_change_percent,
                    high: raw.high,
                    low: raw.low,
                    volume: raw.volume,
                    quote_volume: raw.quote_volume,
                    timestamp: now_ms(),
                    event_time: raw.event_time,
                }))
            }
            "kline" => {
                let raw: RawKlineEvent = parse(value, event_type)?;
                InboundEvent::Kline(Kline {
                    symbol: raw.symbol,
                    interval: raw.kline.interval,
                    open: raw.kline.open,
                    high: raw.kline.high,
                    low: raw.kline.low,
                    close: raw.kline.close,
                    volume: raw.kline.volume,
                    is_closed: raw.kline.is_closed,
                    event_time: raw.event_time,
                    start_time: raw.kline.start_time,
                    end_time: raw.kline.end_time,
                })
            }
            "depthUpdate" => {
                let raw: RawDepth = parse(value, event_type)?;
                InboundEvent::Depth(DepthUpdate {
                    symbol: raw.symbol,
                    event_time: raw.event_time,
                    bids: raw.bids,
                    asks: raw.asks,
                })
            }
            _ => return self.decode_user_event(event_type, value),
        };
        Ok(single(event))
    }

    /// User-data stream events. Also used for the raw events the
    /// gateway forwards inside `user_data` messages.
    pub fn decode_user_event(&self, event_type: &str, value: &Value) -> FeedResult<Decoded> {
        let event = match event_type {
            "ACCOUNT_UPDATE" => {
                let raw: RawAccountUpdate = parse(value, event_type)?;
                let event_time = raw.event_time;
                InboundEvent::AccountUpdate(AccountUpdate {
                    event_time,
                    reason: raw.account.reason,
                    positions: raw
                        .account
                        .positions
                        .into_iter()
                        .map(|p| Position {
                            symbol: p.symbol,
                            quantity: p.amount,
                            entry_price: p.entry_price,
                            unrealized_pnl: p.unrealized_pnl,
                            mark_price: None,
                            update_time_ms: event_time,
                        })
                        .collect(),
                    raw: value.clone(),
                })
            }
            "ORDER_TRADE_UPDATE" => {
                let raw: RawOrderTradeUpdate = parse(value, event_type)?;
                let o = raw.order;
                InboundEvent::OrderUpdate(OrderUpdate {
                    event_time: raw.event_time,
                    execution_type: o.execution_type,
                    order: Order {
                        order_id: OrderId(o.order_id),
                        client_order_id: o.client_order_id,
                        symbol: o.symbol,
                        side: o.side,
                        order_type: o.order_type,
                        quantity: o.quantity,
                        executed_qty: o.filled.unwrap_or(Size::ZERO),
                        price: o.price.non_zero(),
                        stop_price: o.stop_price.and_then(Price::non_zero),
                        status: o.status,
                        update_time_ms: o.trade_time,
                    },
                    raw: value.clone(),
                })
            }
            "listenKeyExpired" => InboundEvent::Error(StreamError {
                kind: StreamErrorKind::ListenKeyExpired,
                code: None,
                message: "user data stream listen key expired".to_string(),
                panel: None,
            }),
            other => return Ok(Decoded::Unknown(other.to_string())),
        };
        Ok(single(event))
    }
}

impl FrameDecoder for ExchangeDecoder {
    fn decode(&self, frame: &str) -> FeedResult<Decoded> {
        let value: Value = serde_json::from_str(frame)?;
        self.decode_value(&value)
    }
}

/// Decoder for the gateway's browser protocol.
#[derive(Debug, Default, Clone, Copy)]
pub struct GatewayDecoder {
    exchange: ExchangeDecoder,
}

impl GatewayDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameDecoder for GatewayDecoder {
    fn decode(&self, frame: &str) -> FeedResult<Decoded> {
        let value: Value = serde_json::from_str(frame)?;
        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            return Err(FeedError::InvalidData("message has no type".to_string()));
        };
        if !GatewayMessage::KINDS.contains(&kind) {
            return Ok(Decoded::Unknown(kind.to_string()));
        }

        let message: GatewayMessage = serde_json::from_value(value)?;
        let event = match message {
            GatewayMessage::MiniTicker(t) => InboundEvent::PriceTick(PriceTick::Mini(t)),
            GatewayMessage::Ticker(t) => InboundEvent::PriceTick(PriceTick::Full(t)),
            GatewayMessage::Kline(k) => InboundEvent::Kline(k),
            GatewayMessage::Depth(d) => InboundEvent::Depth(d),
            GatewayMessage::UserData(payload) => {
                return self
                    .exchange
                    .decode_user_event(&payload.event_type, &payload.data);
            }
            GatewayMessage::Error(notice) => InboundEvent::Error(StreamError {
                kind: StreamErrorKind::Gateway,
                code: None,
                message: notice.message,
                panel: notice.panel,
            }),
            GatewayMessage::Pong { timestamp } => InboundEvent::HeartbeatReply { timestamp },
            GatewayMessage::Connection(notice) => InboundEvent::ConnectionStatus(notice),
        };
        Ok(single(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perpdesk_ws::LinkStatus;
    use rust_decimal_macros::dec;

    const MINI_TICKER: &str = r#"{"e":"24hrMiniTicker","E":1700000000000,"s":"BTCUSDT",
        "c":"64000.10","o":"63000.00","h":"65000.00","l":"62000.00","v":"1200.5","q":"76800000"}"#;

    fn events(decoded: Decoded) -> Vec<InboundEvent> {
        match decoded {
            Decoded::Events(events) => events,
            other => panic!("expected events, got {other:?}"),
        }
    }

    #[test]
    fn test_mini_ticker() {
        let events = events(ExchangeDecoder.decode(MINI_TICKER).unwrap());
        assert_eq!(events.len(), 1);
        let InboundEvent::PriceTick(tick) = &events[0] else {
            panic!("expected a price tick");
        };
        assert_eq!(tick.symbol(), "BTCUSDT");
        assert_eq!(tick.price(), Price::new(dec!(64000.10)));
        assert_eq!(tick.event_time(), 1_700_000_000_000);
    }

    #[test]
    fn test_combined_envelope_is_unwrapped() {
        let frame = format!(r#"{{"stream":"btcusdt@miniTicker","data":{MINI_TICKER}}}"#);
        assert_eq!(events(ExchangeDecoder.decode(&frame).unwrap()).len(), 1);
    }

    #[test]
    fn test_mini_ticker_array_fans_out() {
        let second = MINI_TICKER.replace("BTCUSDT", "ETHUSDT");
        let frame = format!(r#"{{"stream":"!miniTicker@arr","data":[{MINI_TICKER},{second}]}}"#);
        let events = events(ExchangeDecoder.decode(&frame).unwrap());
        let symbols: Vec<&str> = events
            .iter()
            .map(|e| match e {
                InboundEvent::PriceTick(t) => t.symbol(),
                _ => "",
            })
            .collect();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn test_bad_array_element_does_not_drop_siblings() {
        let broken = MINI_TICKER
            .replace("BTCUSDT", "ETHUSDT")
            .replace(r#""c":"64000.10""#, r#""c":"oops""#);
        let frame = format!(r#"{{"stream":"!miniTicker@arr","data":[{broken},{MINI_TICKER}]}}"#);
        let events = events(ExchangeDecoder.decode(&frame).unwrap());
        assert_eq!(events.len(), 1);
        let InboundEvent::PriceTick(tick) = &events[0] else {
            panic!("expected a price tick");
        };
        assert_eq!(tick.symbol(), "BTCUSDT");
    }

    #[test]
    fn test_full_ticker() {
        let frame = r#"{"e":"24hrTicker","E":5,"s":"ETHUSDT","p":"-12.5","P":"-0.40",
            "w":"3100","c":"3090.5","Q":"1","o":"3103","h":"3150","l":"3050","v":"5000","q":"15500000"}"#;
        let events = events(ExchangeDecoder.decode(frame).unwrap());
        let InboundEvent::PriceTick(PriceTick::Full(ticker)) = &events[0] else {
            panic!("expected a full ticker");
        };
        assert_eq!(ticker.price_change, dec!(-12.5));
        assert_eq!(ticker.price, Price::new(dec!(3090.5)));
    }

    #[test]
    fn test_kline() {
        let frame = r#"{"e":"kline","E":10,"s":"BTCUSDT","k":{"t":0,"T":59999,"s":"BTCUSDT",
            "i":"1m","o":"1","c":"2","h":"3","l":"0.5","v":"10","x":false}}"#;
        let events = events(ExchangeDecoder.decode(frame).unwrap());
        let InboundEvent::Kline(kline) = &events[0] else {
            panic!("expected a kline");
        };
        assert_eq!(kline.interval, "1m");
        assert_eq!(kline.end_time, 59_999);
        assert!(!kline.is_closed);
    }

    #[test]
    fn test_depth_levels() {
        let frame = r#"{"e":"depthUpdate","E":3,"T":2,"s":"BTCUSDT","U":1,"u":2,"pu":0,
            "b":[["64000.0","1.5"]],"a":[["64001.0","0.2"],["64002.0","0"]]}"#;
        let events = events(ExchangeDecoder.decode(frame).unwrap());
        let InboundEvent::Depth(depth) = &events[0] else {
            panic!("expected depth");
        };
        assert_eq!(depth.bids[0], DepthLevel(Price::new(dec!(64000.0)), Size::new(dec!(1.5))));
        assert_eq!(depth.asks.len(), 2);
    }

    #[test]
    fn test_account_update_keeps_flat_positions() {
        let frame = r#"{"e":"ACCOUNT_UPDATE","E":100,"T":99,"a":{"m":"ORDER",
            "B":[{"a":"USDT","wb":"1000","cw":"1000","bc":"0"}],
            "P":[{"s":"BTCUSDT","pa":"0","ep":"0.0","cr":"0","up":"0","mt":"cross","iw":"0","ps":"BOTH"},
                 {"s":"ETHUSDT","pa":"-1.5","ep":"3100","cr":"0","up":"12.3","mt":"cross","iw":"0","ps":"BOTH"}]}}"#;
        let events = events(ExchangeDecoder.decode(frame).unwrap());
        let InboundEvent::AccountUpdate(update) = &events[0] else {
            panic!("expected an account update");
        };
        assert_eq!(update.reason.as_deref(), Some("ORDER"));
        assert_eq!(update.positions.len(), 2);
        assert!(!update.positions[0].is_open());
        assert_eq!(update.positions[1].quantity, Size::new(dec!(-1.5)));
        assert_eq!(update.payload().event_type, "ACCOUNT_UPDATE");
    }

    #[test]
    fn test_order_trade_update() {
        let frame = r#"{"e":"ORDER_TRADE_UPDATE","E":200,"T":199,"o":{"s":"BTCUSDT","c":"pd_1_ab",
            "S":"SELL","o":"LIMIT","f":"GTC","q":"0.010","p":"65000","ap":"0","sp":"0","x":"NEW",
            "X":"NEW","i":8886774,"l":"0","z":"0","L":"0","T":199,"t":0}}"#;
        let events = events(ExchangeDecoder.decode(frame).unwrap());
        let InboundEvent::OrderUpdate(update) = &events[0] else {
            panic!("expected an order update");
        };
        assert_eq!(update.order.order_id, OrderId(8_886_774));
        assert_eq!(update.order.side, OrderSide::Sell);
        assert_eq!(update.order.stop_price, None);
        assert_eq!(update.execution_type, "NEW");
    }

    #[test]
    fn test_listen_key_expired() {
        let frame = r#"{"e":"listenKeyExpired","E":1,"listenKey":"abc"}"#;
        let events = events(ExchangeDecoder.decode(frame).unwrap());
        assert!(matches!(
            &events[0],
            InboundEvent::Error(StreamError {
                kind: StreamErrorKind::ListenKeyExpired,
                ..
            })
        ));
    }

    #[test]
    fn test_control_replies() {
        assert_eq!(
            ExchangeDecoder.decode(r#"{"result":null,"id":1}"#).unwrap(),
            Decoded::Ignored
        );
        let events = events(
            ExchangeDecoder
                .decode(r#"{"error":{"code":2,"msg":"Invalid request"},"id":3}"#)
                .unwrap(),
        );
        assert!(matches!(&events[0], InboundEvent::Error(e) if e.code == Some(2)));
    }

    #[test]
    fn test_unknown_and_malformed() {
        assert_eq!(
            ExchangeDecoder
                .decode(r#"{"e":"MARGIN_CALL","E":1}"#)
                .unwrap(),
            Decoded::Unknown("MARGIN_CALL".to_string())
        );
        assert!(ExchangeDecoder.decode("{not json").is_err());
        assert!(ExchangeDecoder.decode(r#"{"foo":1}"#).is_err());
        assert!(ExchangeDecoder
            .decode(r#"{"e":"24hrMiniTicker","s":"BTCUSDT"}"#)
            .is_err());
    }

    #[test]
    fn test_gateway_messages() {
        let decoder = GatewayDecoder::new();

        let pong = events(decoder.decode(r#"{"type":"pong","timestamp":42}"#).unwrap());
        assert_eq!(pong, vec![InboundEvent::HeartbeatReply { timestamp: 42 }]);

        let status = events(
            decoder
                .decode(r#"{"type":"connection","status":"gave_up","timestamp":1,"role":"market_feed"}"#)
                .unwrap(),
        );
        assert!(matches!(
            &status[0],
            InboundEvent::ConnectionStatus(n) if n.status == LinkStatus::GaveUp
        ));

        let error = events(
            decoder
                .decode(r#"{"type":"error","message":"boom","panel":"orders"}"#)
                .unwrap(),
        );
        assert!(matches!(
            &error[0],
            InboundEvent::Error(e) if e.kind == StreamErrorKind::Gateway && e.panel.as_deref() == Some("orders")
        ));

        assert_eq!(
            decoder.decode(r#"{"type":"heartbeat"}"#).unwrap(),
            Decoded::Unknown("heartbeat".to_string())
        );
        assert!(decoder.decode(r#"{"status":"connected"}"#).is_err());
    }

    #[test]
    fn test_gateway_user_data_is_redecoded() {
        let frame = r#"{"type":"user_data","event_type":"ORDER_TRADE_UPDATE","event_time":200,
            "data":{"e":"ORDER_TRADE_UPDATE","E":200,"o":{"s":"BTCUSDT","S":"BUY","o":"MARKET",
            "q":"1","p":"0","x":"TRADE","X":"FILLED","i":5,"z":"1","T":200}}}"#;
        let events = events(GatewayDecoder::new().decode(frame).unwrap());
        let InboundEvent::OrderUpdate(update) = &events[0] else {
            panic!("expected an order update");
        };
        assert_eq!(update.order.status, OrderStatus::Filled);
        assert_eq!(update.order.price, None);
    }
}
