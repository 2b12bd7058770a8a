// tests/executor_test.rs

mod common;

use common::*;
use converter_keeper::{
    allowance::AllowanceGuard,
    errors::ChainError,
    events::{EventContext, EventKind, MemorySink},
    executor::{ConversionExecutor, ExecutionOutcome, ExecutorSettings, Phase},
    TradeRoute,
};
use ethers::types::{H256, I256};
use std::sync::Arc;

const CONVERTER: u8 = 0xC1;
const RECEIVE: u8 = 0x02;
const SEND: u8 = 0x01;
const BENEFICIARY: u8 = 0xBE;

fn executor(gateway: FakeGateway, dry_run: bool) -> (Arc<FakeGateway>, Arc<MemorySink>, ConversionExecutor) {
    init_tracing();
    let gateway = Arc::new(gateway);
    let sink = Arc::new(MemorySink::new());
    let settings = ExecutorSettings { operator: addr(OPERATOR), dry_run, deadline_grace_secs: 60 };
    let executor = ConversionExecutor::new(gateway.clone(), Arc::new(AllowanceGuard::new()), sink.clone(), settings);
    (gateway, sink, executor)
}

fn good_route() -> TradeRoute {
    route(addr(RECEIVE), addr(SEND), u(1_030), u(900))
}

async fn run(executor: &ConversionExecutor, route: TradeRoute, min_income: i64) -> ExecutionOutcome {
    executor
        .arbitrage(addr(CONVERTER), route, u(1_000), I256::from(min_income), addr(BENEFICIARY))
        .await
        .unwrap()
}

#[tokio::test]
async fn loss_is_approved_before_the_conversion() {
    let (gateway, sink, executor) = executor(FakeGateway::default(), false);

    let outcome = run(&executor, good_route(), -30).await;

    assert!(matches!(outcome, ExecutionOutcome::Confirmed(_)));
    assert_eq!(
        gateway.calls(),
        vec![
            Call::Approve { token: addr(RECEIVE), spender: addr(OPERATOR), amount: u(30) },
            Call::Estimate { converter: addr(CONVERTER) },
            Call::Submit { converter: addr(CONVERTER), amount: u(1_000) },
        ]
    );

    let events = sink.of_kind(EventKind::Arbitrage);
    assert_eq!(events.len(), 1);
    assert!(events[0].trx.is_some());
    assert!(!events[0].is_error());
    match &events[0].context {
        EventContext::Arbitrage(ctx) => {
            assert_eq!(ctx.min_income, "-30");
            assert_eq!(ctx.beneficiary, addr(BENEFICIARY));
            assert_eq!(ctx.deadline, Some(u(TIMESTAMP + 60)));
            assert_eq!(ctx.token_to_receive_from_converter, addr(RECEIVE));
            assert_eq!(ctx.token_to_send_to_converter, addr(SEND));
        }
        other => panic!("unexpected context {other:?}"),
    }
}

#[tokio::test]
async fn sufficient_allowance_skips_the_approval() {
    let mut gateway = FakeGateway::default();
    gateway.allowance = u(1_000);
    let (gateway, _, executor) = executor(gateway, false);

    run(&executor, good_route(), -30).await;

    assert!(!gateway.calls().iter().any(|c| matches!(c, Call::Approve { .. })));
}

#[tokio::test]
async fn profitable_trade_needs_no_approval() {
    let (gateway, _, executor) = executor(FakeGateway::default(), false);

    run(&executor, good_route(), 25).await;

    assert_eq!(gateway.calls().len(), 2);
    assert!(matches!(gateway.calls()[0], Call::Estimate { .. }));
}

#[tokio::test]
async fn dry_run_estimates_but_never_sends() {
    let (gateway, sink, executor) = executor(FakeGateway::default(), true);

    let outcome = run(&executor, good_route(), -30).await;

    assert_eq!(outcome, ExecutionOutcome::DryRun { gas_estimate: u(250_000) });
    assert_eq!(gateway.calls(), vec![Call::Estimate { converter: addr(CONVERTER) }]);
    let events = sink.of_kind(EventKind::Arbitrage);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].trx, None);
    assert_eq!(events[0].error, None);
    match &events[0].context {
        EventContext::Arbitrage(ctx) => {
            assert!(ctx.dry_run);
            assert_eq!(ctx.gas_estimate, Some(u(250_000)));
        }
        other => panic!("unexpected context {other:?}"),
    }
}

#[tokio::test]
async fn path_that_does_not_start_with_the_receive_token_fails_simulation() {
    let (gateway, sink, executor) = executor(FakeGateway::default(), false);
    let backwards = route(addr(SEND), addr(RECEIVE), u(1_030), u(900));
    // The order's tokens come from the route, so build one whose path disagrees.
    let mut broken = good_route();
    broken.path = backwards.path;

    let outcome = run(&executor, broken, 10).await;

    assert!(matches!(outcome, ExecutionOutcome::Failed { phase: Phase::Simulation, .. }));
    assert!(gateway.calls().is_empty());
    let error = sink.events()[0].error.as_ref().map(|e| e.to_string()).unwrap_or_default();
    assert!(error.starts_with("simulation: "), "{error}");
}

#[tokio::test]
async fn estimation_revert_fails_simulation() {
    let mut gateway = FakeGateway::default();
    gateway.estimate_error = Some("MinIncomeNotMet".to_string());
    let (gateway, sink, executor) = executor(gateway, false);

    let outcome = run(&executor, good_route(), 10).await;

    assert_eq!(
        outcome,
        ExecutionOutcome::Failed { phase: Phase::Simulation, reason: "MinIncomeNotMet".to_string() }
    );
    assert!(!gateway.calls().iter().any(|c| matches!(c, Call::Submit { .. })));
    let event = &sink.events()[0];
    assert_eq!(event.error.as_ref().map(|e| e.to_string()), Some("simulation: MinIncomeNotMet".to_string()));
    assert_eq!(event.trx, None);
}

#[tokio::test]
async fn reverted_submission_keeps_the_hash() {
    let hash = H256::repeat_byte(0x42);
    let mut gateway = FakeGateway::default();
    gateway.submit_error = Some(ChainError::Reverted(hash));
    let (_, sink, executor) = executor(gateway, false);

    let outcome = run(&executor, good_route(), 10).await;

    assert!(matches!(outcome, ExecutionOutcome::Failed { phase: Phase::Execution, .. }));
    let event = &sink.events()[0];
    assert_eq!(event.trx, Some(hash));
    let error = event.error.as_ref().map(|e| e.to_string()).unwrap_or_default();
    assert!(error.starts_with("Execution: "), "{error}");
}

#[tokio::test]
async fn concurrent_conversions_of_one_token_both_complete() {
    let (gateway, sink, executor) = executor(FakeGateway::default(), false);

    let (a, b) = tokio::join!(run(&executor, good_route(), -5), run(&executor, good_route(), -7));

    assert!(matches!(a, ExecutionOutcome::Confirmed(_)));
    assert!(matches!(b, ExecutionOutcome::Confirmed(_)));
    // Each run holds the allowance slot from approval through submission.
    let kinds: Vec<_> = gateway
        .calls()
        .into_iter()
        .map(|c| match c {
            Call::Approve { .. } => "approve",
            Call::Estimate { .. } => "estimate",
            Call::Submit { .. } => "submit",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["approve", "estimate", "submit", "approve", "estimate", "submit"]);
    assert_eq!(sink.of_kind(EventKind::Arbitrage).len(), 2);
}
