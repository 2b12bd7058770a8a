// tests/maintenance_test.rs

mod common;

use common::*;
use converter_keeper::{
    events::{EventContext, EventError, EventKind, MemorySink},
    maintenance::Maintenance,
};
use ethers::types::{U256, U64};
use std::collections::BTreeMap;
use std::sync::Arc;

fn maintenance(gateway: FakeGateway) -> (Arc<FakeGateway>, Arc<MemorySink>, Maintenance) {
    init_tracing();
    let gateway = Arc::new(gateway);
    let sink = Arc::new(MemorySink::new());
    let maintenance = Maintenance::new(gateway.clone(), sink.clone());
    (gateway, sink, maintenance)
}

#[tokio::test]
async fn one_failing_market_does_not_stop_the_other() {
    let mut gateway = FakeGateway::default();
    gateway.failing_markets.insert(addr(0xE2));
    let (gateway, sink, maintenance) = maintenance(gateway);

    let errors = maintenance.accrue_interest(&[addr(0xE1), addr(0xE2)]).await;

    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("accrue failed"));
    assert_eq!(gateway.calls(), vec![Call::AccrueInterest(addr(0xE1)), Call::AccrueInterest(addr(0xE2))]);

    let events = sink.of_kind(EventKind::AccrueInterest);
    assert_eq!(events.len(), 1);
    match &events[0].error {
        Some(EventError::List(list)) => assert_eq!(list.len(), 1),
        other => panic!("unexpected error field {other:?}"),
    }
    // The successful write still reports its block.
    assert_eq!(events[0].block_number, Some(U64::from(BLOCK + 1)));
    match &events[0].context {
        EventContext::AccrueInterest(ctx) => assert_eq!(ctx.markets, vec![addr(0xE1), addr(0xE2)]),
        other => panic!("unexpected context {other:?}"),
    }
}

#[tokio::test]
async fn full_success_reports_an_empty_error_list() {
    let (_, sink, maintenance) = maintenance(FakeGateway::default());

    let errors = maintenance.accrue_interest(&[addr(0xE1), addr(0xE2)]).await;

    assert!(errors.is_empty());
    let event = &sink.events()[0];
    assert!(!event.is_error());
}

#[tokio::test]
async fn zero_cash_sends_nothing() {
    let mut gateway = FakeGateway::default();
    gateway.reserves.insert(addr(0xE1), (u(500), U256::zero()));
    let (gateway, sink, maintenance) = maintenance(gateway);

    maintenance.reduce_reserves(Some(addr(0xE1))).await;

    assert!(gateway.calls().is_empty());
    let events = sink.of_kind(EventKind::ReduceReserves);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].error, None);
    assert_eq!(events[0].trx, None);
}

#[tokio::test]
async fn reserves_are_capped_by_cash() {
    let mut gateway = FakeGateway::default();
    gateway.reserves.insert(addr(0xE1), (u(500), u(200)));
    let (gateway, sink, maintenance) = maintenance(gateway);

    maintenance.reduce_reserves(Some(addr(0xE1))).await;

    assert_eq!(gateway.calls(), vec![Call::ReduceReserves { market: addr(0xE1), amount: u(200) }]);
    let event = &sink.events()[0];
    assert!(event.trx.is_some());
    match &event.context {
        EventContext::ReduceReserves(ctx) => {
            assert_eq!(ctx.total_reserves, u(500));
            assert_eq!(ctx.cash, u(200));
            assert_eq!(ctx.amount, u(200));
        }
        other => panic!("unexpected context {other:?}"),
    }
}

#[tokio::test]
async fn unconfigured_market_is_a_no_op() {
    let (gateway, sink, maintenance) = maintenance(FakeGateway::default());

    maintenance.reduce_reserves(None).await;

    assert!(gateway.calls().is_empty());
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn failed_read_is_reported() {
    let (_, sink, maintenance) = maintenance(FakeGateway::default());

    maintenance.reduce_reserves(Some(addr(0xE9))).await;

    let events = sink.of_kind(EventKind::ReduceReserves);
    assert_eq!(events.len(), 1);
    assert!(events[0].is_error());
}

#[tokio::test]
async fn release_funds_emits_one_event_per_comptroller() {
    let (gateway, sink, maintenance) = maintenance(FakeGateway::default());
    let plan = BTreeMap::from([(addr(0xD1), vec![addr(0x02), addr(0x03)]), (addr(0xD2), vec![addr(0x02)])]);

    maintenance.release_funds(&plan).await;

    assert_eq!(release_calls(&gateway.calls()), plan);
    let events = sink.of_kind(EventKind::ReleaseFunds);
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.trx.is_some() && !e.is_error()));
    match &events[0].context {
        EventContext::ReleaseFunds((comptroller, assets)) => {
            assert_eq!(*comptroller, addr(0xD1));
            assert_eq!(assets.len(), 2);
        }
        other => panic!("unexpected context {other:?}"),
    }
}

#[tokio::test]
async fn failed_release_is_reported_with_its_context() {
    let mut gateway = FakeGateway::default();
    gateway.failing_comptrollers.insert(addr(0xD2));
    let (gateway, sink, maintenance) = maintenance(gateway);
    let plan = BTreeMap::from([(addr(0xD1), vec![addr(0x02)]), (addr(0xD2), vec![addr(0x03), addr(0x04)])]);

    maintenance.release_funds(&plan).await;

    assert_eq!(release_calls(&gateway.calls()), plan);
    let events = sink.of_kind(EventKind::ReleaseFunds);
    assert_eq!(events.len(), 2);

    assert!(events[0].trx.is_some());
    assert!(!events[0].is_error());
    assert_eq!(events[0].context, EventContext::ReleaseFunds((addr(0xD1), vec![addr(0x02)])));

    assert_eq!(events[1].trx, None);
    let error = events[1].error.as_ref().map(|e| e.to_string()).unwrap_or_default();
    assert!(error.contains("release failed"), "{error}");
    assert_eq!(events[1].context, EventContext::ReleaseFunds((addr(0xD2), vec![addr(0x03), addr(0x04)])));
}
