// bot/src/events.rs
//! The keeper's event stream. Every stage publishes one [`Event`] per outcome;
//! sinks fold, log or persist them.

use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, H256, U256, U64};
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::state::BalanceResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    AccrueInterest,
    ReduceReserves,
    ReleaseFunds,
    PotentialConversions,
    GetBestTrade,
    Arbitrage,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A single message, or one entry per independent failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventError {
    Message(String),
    List(Vec<String>),
}

impl EventError {
    pub fn messages(&self) -> Vec<&str> {
        match self {
            EventError::Message(msg) => vec![msg.as_str()],
            EventError::List(list) => list.iter().map(String::as_str).collect(),
        }
    }
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.messages().join("; "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccrueInterestContext {
    pub markets: Vec<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceReservesContext {
    pub market: Address,
    pub total_reserves: U256,
    pub cash: U256,
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PotentialConversionsContext {
    pub results: Vec<BalanceResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeContext {
    pub converter: Address,
    pub token_to_receive_from_converter: Address,
    pub token_to_send_to_converter: Address,
    /// Converter amount this attempt was priced for.
    pub amount: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_out: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_in: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_input: Option<U256>,
    /// Signed, base units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_income: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_impact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Bytes>,
}

impl TradeContext {
    pub fn new(converter: Address, receive: Address, send: Address, amount: U256) -> Self {
        Self {
            converter,
            token_to_receive_from_converter: receive,
            token_to_send_to_converter: send,
            amount,
            amount_out: None,
            amount_in: None,
            trade_input: None,
            min_income: None,
            price_impact: None,
            path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbitrageContext {
    pub converter: Address,
    pub token_to_receive_from_converter: Address,
    pub token_to_send_to_converter: Address,
    pub amount: U256,
    /// Signed, base units.
    pub min_income: String,
    pub path: Bytes,
    pub beneficiary: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_estimate: Option<U256>,
    #[serde(default)]
    pub dry_run: bool,
}

/// Kind-specific payload; the tag doubles as the event kind on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "context")]
pub enum EventContext {
    AccrueInterest(AccrueInterestContext),
    ReduceReserves(ReduceReservesContext),
    /// `[comptroller, assets]`
    ReleaseFunds((Address, Vec<Address>)),
    PotentialConversions(PotentialConversionsContext),
    GetBestTrade(TradeContext),
    Arbitrage(ArbitrageContext),
}

impl EventContext {
    pub fn kind(&self) -> EventKind {
        match self {
            EventContext::AccrueInterest(_) => EventKind::AccrueInterest,
            EventContext::ReduceReserves(_) => EventKind::ReduceReserves,
            EventContext::ReleaseFunds(_) => EventKind::ReleaseFunds,
            EventContext::PotentialConversions(_) => EventKind::PotentialConversions,
            EventContext::GetBestTrade(_) => EventKind::GetBestTrade,
            EventContext::Arbitrage(_) => EventKind::Arbitrage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub context: EventContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trx: Option<H256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EventError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<U64>,
    pub emitted_at: DateTime<Utc>,
}

impl Event {
    pub fn new(context: EventContext) -> Self {
        Self { context, trx: None, error: None, block_number: None, emitted_at: Utc::now() }
    }

    pub fn with_trx(mut self, trx: H256) -> Self {
        self.trx = Some(trx);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(EventError::Message(error.into()));
        self
    }

    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.error = Some(EventError::List(errors));
        self
    }

    pub fn at_block(mut self, block_number: Option<U64>) -> Self {
        self.block_number = block_number;
        self
    }

    pub fn kind(&self) -> EventKind {
        self.context.kind()
    }

    /// An empty error list counts as success.
    pub fn is_error(&self) -> bool {
        match &self.error {
            None => false,
            Some(EventError::Message(_)) => true,
            Some(EventError::List(list)) => !list.is_empty(),
        }
    }
}

/// Receives every event synchronously, in emission order.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &Event);
}

impl<F> EventSink for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_event(&self, event: &Event) {
        self(event)
    }
}

/// Logs each event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_event(&self, event: &Event) {
        let kind = event.kind();
        if event.is_error() {
            let error = event.error.as_ref().map(ToString::to_string).unwrap_or_default();
            warn!(%kind, trx = ?event.trx, block = ?event.block_number, %error, "keeper event");
        } else {
            info!(%kind, trx = ?event.trx, block = ?event.block_number, "keeper event");
        }
    }
}

/// Appends one JSON document per line; [`replay`] reads the file back.
#[derive(Debug)]
pub struct JsonLinesSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .wrap_err_with(|| format!("Failed to open event log {}", path.display()))?;
        Ok(Self { writer: Mutex::new(BufWriter::new(file)) })
    }
}

impl EventSink for JsonLinesSink {
    fn on_event(&self, event: &Event) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, kind = %event.kind(), "Failed to serialize event");
                return;
            }
        };
        let Ok(mut writer) = self.writer.lock() else {
            warn!("Event log writer poisoned");
            return;
        };
        if let Err(e) = writeln!(writer, "{line}").and_then(|_| writer.flush()) {
            warn!(error = %e, "Failed to append to event log");
        }
    }
}

/// Parses a JSON-lines event log. Blank lines are skipped.
pub fn replay<R: BufRead>(reader: R) -> Result<Vec<Event>> {
    let mut events = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line.wrap_err("Failed to read event log")?;
        if line.trim().is_empty() {
            continue;
        }
        let event: Event =
            serde_json::from_str(&line).wrap_err_with(|| format!("Malformed event on line {}", n + 1))?;
        events.push(event);
    }
    Ok(events)
}

/// Forwards events to an async consumer such as a status dashboard.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<Event>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<Event>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn on_event(&self, event: &Event) {
        // A closed receiver just means nobody is watching any more.
        let _ = self.tx.send(event.clone());
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    pub fn of_kind(&self, kind: EventKind) -> Vec<Event> {
        self.events().into_iter().filter(|e| e.kind() == kind).collect()
    }
}

impl EventSink for MemorySink {
    fn on_event(&self, event: &Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn on_event(&self, event: &Event) {
        for sink in &self.sinks {
            sink.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn release_event() -> Event {
        Event::new(EventContext::ReleaseFunds((Address::repeat_byte(1), vec![Address::repeat_byte(2)])))
            .with_trx(H256::repeat_byte(9))
            .at_block(Some(U64::from(42u64)))
    }

    #[test]
    fn serializes_with_type_tag() {
        let value = serde_json::to_value(release_event()).unwrap();
        assert_eq!(value["type"], "ReleaseFunds");
        assert_eq!(value["context"][0], "0x0101010101010101010101010101010101010101");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn error_shapes_round_trip_through_json() {
        let single = serde_json::to_value(EventError::Message("boom".into())).unwrap();
        assert_eq!(single, serde_json::json!("boom"));
        let list: EventError = serde_json::from_value(serde_json::json!(["a", "b"])).unwrap();
        assert_eq!(list, EventError::List(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn empty_error_list_is_success() {
        let event = Event::new(EventContext::AccrueInterest(AccrueInterestContext { markets: vec![] }))
            .with_errors(vec![]);
        assert!(!event.is_error());
        assert!(event.clone().with_error("x").is_error());
    }

    #[test]
    fn replays_json_lines() {
        let first = release_event();
        let second = Event::new(EventContext::GetBestTrade(TradeContext::new(
            Address::repeat_byte(3),
            Address::repeat_byte(4),
            Address::repeat_byte(5),
            U256::from(10u64),
        )))
        .with_error("No trade found");
        let log = format!(
            "{}\n\n{}\n",
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        let events = replay(Cursor::new(log)).unwrap();
        assert_eq!(events, vec![first, second]);
    }

    #[test]
    fn fanout_and_closures_receive_events() {
        let memory = Arc::new(MemorySink::new());
        let counter = Arc::new(Mutex::new(0usize));
        let counted = counter.clone();
        let fanout = FanoutSink::new()
            .with(memory.clone())
            .with(Arc::new(move |_: &Event| *counted.lock().unwrap() += 1));
        fanout.on_event(&release_event());
        assert_eq!(memory.of_kind(EventKind::ReleaseFunds).len(), 1);
        assert_eq!(*counter.lock().unwrap(), 1);
    }
}
