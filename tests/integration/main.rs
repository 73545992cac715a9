//! End-to-end keeper scenarios against in-memory venues and settlement.

mod mock_venue;

use chrono::Utc;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use flashloop::engine::events::KeeperEvent;
use flashloop::engine::CycleOutcome;
use flashloop::storage;
use flashloop::strategy::breaker::{BreakerStatus, CircuitBreakerState};
use flashloop::strategy::edge::EdgeConfig;
use flashloop::types::{BreakerRejection, CandidateSize, FeeTier, SubmissionChannel, VenueKind};

use mock_venue::{drain, Harness, MockVenue, RecordingSettlement};

fn temp_state_path() -> String {
    std::env::temp_dir()
        .join(format!("flashloop_it_{}.json", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .into_owned()
}

#[tokio::test]
async fn test_profitable_round_trip_is_executed() {
    let harness = Harness::single_venue(10_100);
    let settlement = harness.settlement.clone();
    let (mut keeper, mut rx) = harness.build();

    let report = keeper.run_cycle().await;

    assert_eq!(report.threshold_bps, 75);
    assert_eq!(report.best_edge_bps, Some(100));
    match &report.outcome {
        CycleOutcome::Executed(outcome) => {
            assert!(outcome.success);
            assert_eq!(outcome.opportunity.size, CandidateSize(10_000));
            assert_eq!(outcome.opportunity.amount_out(), 10_100);
            assert_eq!(outcome.opportunity.raw_edge_bps, 100);
        }
        other => panic!("expected execution, got {other:?}"),
    }

    let subs = settlement.submissions();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].channel, SubmissionChannel::Public);

    let events = drain(&mut rx);
    assert!(matches!(
        events[0],
        KeeperEvent::OpportunityFound {
            edge_bps: 100,
            threshold_bps: 75,
            ..
        }
    ));
    assert!(matches!(
        events[1],
        KeeperEvent::OpportunityExecuted { success: true, .. }
    ));
    assert!(!keeper.record_backoff(&report));
    assert_eq!(keeper.backoff_count(), 0);
}

#[tokio::test]
async fn test_losing_round_trip_is_skipped() {
    let harness = Harness::single_venue(9_990);
    let settlement = harness.settlement.clone();
    let (mut keeper, mut rx) = harness.build();

    let report = keeper.run_cycle().await;

    assert!(matches!(report.outcome, CycleOutcome::NoOpportunity));
    assert_eq!(report.best_edge_bps, Some(-10));
    assert_eq!(report.opportunities_found, 0);
    assert!(settlement.submissions().is_empty());

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    match &events[0] {
        KeeperEvent::OpportunitySkipped {
            edge_bps, reason, ..
        } => {
            assert_eq!(*edge_bps, Some(-10));
            assert!(reason.contains("Not profitable"));
        }
        other => panic!("expected skip, got {other:?}"),
    }

    assert!(!keeper.record_backoff(&report));
    assert_eq!(keeper.backoff_count(), 1);
}

#[tokio::test]
async fn test_edge_equal_to_threshold_is_not_enough() {
    let (mut keeper, _rx) = Harness::single_venue(10_075).build();
    let report = keeper.run_cycle().await;
    assert_eq!(report.best_edge_bps, Some(75));
    assert!(matches!(report.outcome, CycleOutcome::NoOpportunity));
}

#[tokio::test(start_paused = true)]
async fn test_backoff_pauses_after_consecutive_dry_cycles() {
    let (mut keeper, mut rx) = Harness::single_venue(9_990).build();

    let start = tokio::time::Instant::now();
    keeper.step().await;
    keeper.step().await;
    assert_eq!(keeper.backoff_count(), 2);
    assert!(start.elapsed() < Duration::from_secs(1));

    // Third dry cycle hits the limit and sleeps out the pause
    keeper.step().await;
    assert!(start.elapsed() >= Duration::from_secs(300));
    assert_eq!(keeper.backoff_count(), 0);

    let engaged: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, KeeperEvent::BackoffEngaged { .. }))
        .collect();
    assert_eq!(engaged.len(), 1);
    assert!(matches!(
        engaged[0],
        KeeperEvent::BackoffEngaged {
            cycles: 3,
            pause_secs: 300
        }
    ));
}

#[tokio::test]
async fn test_daily_loss_limit_blocks_profitable_trade() {
    let mut state = CircuitBreakerState::new(Utc::now());
    state.daily_loss = dec!(150);

    let mut harness = Harness::single_venue(10_100);
    harness.breaker_state = Some(state);
    let settlement = harness.settlement.clone();
    let (mut keeper, mut rx) = harness.build();

    let report = keeper.run_cycle().await;

    assert!(matches!(
        report.outcome,
        CycleOutcome::BreakerRejected(BreakerRejection::DailyLossExceeded)
    ));
    assert_eq!(report.best_edge_bps, Some(100));
    assert!(settlement.submissions().is_empty());

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        KeeperEvent::OpportunitySkipped { reason, .. } if reason.contains("daily loss")
    )));

    // Vetoes still count toward backoff
    assert!(!keeper.record_backoff(&report));
    assert_eq!(keeper.backoff_count(), 1);
}

#[tokio::test]
async fn test_dead_fee_tier_falls_through_to_next() {
    let venue = MockVenue::new(VenueKind::UniswapV3, 10_100).with_dead_tiers(vec![FeeTier(500)]);
    let mut harness = Harness::single_venue(10_100);
    harness.venues = vec![Arc::new(venue)];
    let probe = harness.venues[0].clone();
    let (mut keeper, _rx) = harness.build();

    let report = keeper.run_cycle().await;

    match &report.outcome {
        CycleOutcome::Executed(outcome) => {
            assert_eq!(outcome.opportunity.first_leg.fee_tier, FeeTier(3000));
            assert_eq!(outcome.opportunity.second_leg.fee_tier, FeeTier(3000));
            assert_eq!(outcome.opportunity.adjusted_edge_bps, 100);
        }
        other => panic!("expected execution, got {other:?}"),
    }
    // Both legs tried the dead tier once before succeeding
    assert_eq!(probe.calls(), 4);
}

#[tokio::test]
async fn test_unreachable_venue_skips_size_without_aborting() {
    let dead = MockVenue::new(VenueKind::UniswapV3, 10_100)
        .with_dead_tiers(vec![FeeTier(500), FeeTier(3000)]);
    let mut harness = Harness::single_venue(10_100);
    harness.venues = vec![Arc::new(dead)];
    harness.sizes = vec![10_000, 20_000];
    let (mut keeper, mut rx) = harness.build();

    let report = keeper.run_cycle().await;

    assert!(matches!(report.outcome, CycleOutcome::NoOpportunity));
    assert_eq!(report.sizes_evaluated, 2);
    assert_eq!(report.best_edge_bps, None);
    let skipped = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, KeeperEvent::OpportunitySkipped { edge_bps: None, .. }))
        .count();
    assert_eq!(skipped, 2);
}

#[tokio::test]
async fn test_cross_venue_route_recovers_when_market_moves() {
    let first = Arc::new(MockVenue::new(VenueKind::UniswapV3, 10_000));
    let second = Arc::new(MockVenue::new(VenueKind::SushiSwap, 9_990));
    let mut harness = Harness::single_venue(10_000);
    harness.venues = vec![first, second.clone()];
    harness.routes = vec![flashloop::types::Route {
        first: VenueKind::UniswapV3,
        second: VenueKind::SushiSwap,
    }];
    let (mut keeper, _rx) = harness.build();

    let report = keeper.run_cycle().await;
    assert!(matches!(report.outcome, CycleOutcome::NoOpportunity));

    second.set_ratio(10_200);
    let report = keeper.run_cycle().await;
    match &report.outcome {
        CycleOutcome::Executed(outcome) => {
            assert_eq!(outcome.opportunity.route.second, VenueKind::SushiSwap);
            assert_eq!(outcome.opportunity.raw_edge_bps, 200);
        }
        other => panic!("expected execution, got {other:?}"),
    }
}

#[tokio::test]
async fn test_identities_rotate_across_executions() {
    let harness = Harness::single_venue(10_100);
    let settlement = harness.settlement.clone();
    let (mut keeper, _rx) = harness.build();

    for _ in 0..4 {
        let report = keeper.run_cycle().await;
        assert!(report.outcome.is_success());
    }

    let subs = settlement.submissions();
    let identities: Vec<_> = subs.iter().map(|s| s.identity.as_str()).collect();
    assert_eq!(identities[0], identities[2]);
    assert_eq!(identities[1], identities[3]);
    assert_ne!(identities[0], identities[1]);
    let sequences: Vec<_> = subs.iter().map(|s| s.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_repeated_reverts_trip_breaker() {
    let mut harness = Harness::single_venue(10_100);
    harness.settlement = Arc::new(RecordingSettlement::reverting(Some(dec!(5))));
    let (mut keeper, mut rx) = harness.build();

    for _ in 0..3 {
        let report = keeper.run_cycle().await;
        assert!(!report.outcome.is_success());
    }
    assert_eq!(keeper.breaker_status(), BreakerStatus::Tripped);
    assert_eq!(keeper.breaker_state().daily_loss, dec!(15));
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, KeeperEvent::BreakerTripped { .. })));

    let report = keeper.run_cycle().await;
    assert!(matches!(
        report.outcome,
        CycleOutcome::BreakerRejected(BreakerRejection::Cooldown)
    ));
}

#[tokio::test]
async fn test_emergency_halt_survives_restart_until_cleared() {
    let path = temp_state_path();

    let mut harness = Harness::single_venue(10_100);
    harness.settlement = Arc::new(RecordingSettlement::reverting(Some(dec!(60))));
    harness.state_path = Some(path.clone());
    let (mut keeper, _rx) = harness.build();

    keeper.step().await;
    assert_eq!(keeper.breaker_status(), BreakerStatus::EmergencyHalt);
    drop(keeper);

    let restored = tokio_test::assert_ok!(storage::load_breaker_state(Some(&path)))
        .expect("state file written");
    assert!(restored.emergency_halt);
    assert!(restored.halt_reason.is_some());

    let mut harness = Harness::single_venue(10_100);
    harness.breaker_state = Some(restored);
    harness.state_path = Some(path.clone());
    let (mut keeper, _rx) = harness.build();

    let report = keeper.run_cycle().await;
    assert!(matches!(
        report.outcome,
        CycleOutcome::BreakerRejected(BreakerRejection::EmergencyStop)
    ));

    keeper.clear_emergency_halt("it-operator");
    let cleared = tokio_test::assert_ok!(storage::load_breaker_state(Some(&path)))
        .expect("state file written");
    assert!(!cleared.emergency_halt);

    // One failure on record plus a 60 loss still under the 100 daily cap
    let report = keeper.run_cycle().await;
    assert!(report.outcome.is_success());

    tokio_test::assert_ok!(std::fs::remove_file(&path));
}

// 6 decimals: 1,000 and 10,000 USDC
const USDC_1K: u128 = 1_000_000_000;
const USDC_10K: u128 = 10_000_000_000;

#[tokio::test]
async fn test_gas_cost_blocks_small_size_but_not_large() {
    let mut harness = Harness::single_venue(10_100);
    harness.edge = EdgeConfig::default();
    harness.sizes = vec![USDC_1K, USDC_10K];
    let settlement = harness.settlement.clone();
    let (mut keeper, mut rx) = harness.build();

    let report = keeper.run_cycle().await;

    // 100 raw - 9 flash fee = 91 > 75 at both sizes; $20 gas sinks the small one
    match &report.outcome {
        CycleOutcome::Executed(outcome) => {
            assert!(outcome.success);
            assert_eq!(outcome.opportunity.size, CandidateSize(USDC_10K));
            assert_eq!(outcome.opportunity.adjusted_edge_bps, 91);
            assert_eq!(outcome.opportunity.estimated_profit, dec!(71));
        }
        other => panic!("expected execution, got {other:?}"),
    }
    let subs = settlement.submissions();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].size, CandidateSize(USDC_10K));

    let events = drain(&mut rx);
    match &events[0] {
        KeeperEvent::OpportunitySkipped {
            size,
            edge_bps,
            reason,
            ..
        } => {
            assert_eq!(*size, CandidateSize(USDC_1K));
            assert_eq!(*edge_bps, Some(91));
            assert!(reason.contains("after flash fee and gas"));
        }
        other => panic!("expected skip, got {other:?}"),
    }
}

#[tokio::test]
async fn test_net_loss_alone_is_never_submitted() {
    let mut harness = Harness::single_venue(10_100);
    harness.edge = EdgeConfig::default();
    harness.sizes = vec![USDC_1K];
    let settlement = harness.settlement.clone();
    let (mut keeper, _rx) = harness.build();

    let report = keeper.run_cycle().await;

    assert!(matches!(report.outcome, CycleOutcome::NoOpportunity));
    assert_eq!(report.best_edge_bps, Some(91));
    assert!(settlement.submissions().is_empty());
    assert!(!keeper.record_backoff(&report));
    assert_eq!(keeper.backoff_count(), 1);
}

#[tokio::test]
async fn test_flash_fee_pushes_edge_below_threshold() {
    // 80 raw bps clears 75 for free, but not after a 9 bps premium
    let mut free = Harness::single_venue(10_080);
    free.sizes = vec![USDC_10K];
    let (mut keeper, _rx) = free.build();
    assert!(keeper.run_cycle().await.outcome.is_success());

    let mut priced = Harness::single_venue(10_080);
    priced.sizes = vec![USDC_10K];
    priced.edge = EdgeConfig::default();
    let settlement = priced.settlement.clone();
    let (mut keeper, _rx) = priced.build();

    let report = keeper.run_cycle().await;
    assert!(matches!(report.outcome, CycleOutcome::NoOpportunity));
    assert_eq!(report.best_edge_bps, Some(71));
    assert!(settlement.submissions().is_empty());
}

#[tokio::test]
async fn test_crossing_daily_loss_cap_announces_trip() {
    let mut state = CircuitBreakerState::new(Utc::now());
    state.daily_loss = dec!(90);

    let mut harness = Harness::single_venue(10_100);
    harness.breaker_state = Some(state);
    harness.settlement = Arc::new(RecordingSettlement::reverting(Some(dec!(20))));
    let (mut keeper, mut rx) = harness.build();

    let report = keeper.run_cycle().await;
    assert!(!report.outcome.is_success());
    assert_eq!(keeper.breaker_state().daily_loss, dec!(110));
    // One failure is below the consecutive limit, so only the loss cap bites
    assert_eq!(keeper.breaker_status(), BreakerStatus::Normal);

    let trips: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            KeeperEvent::BreakerTripped { reason } => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(trips.len(), 1);
    assert!(trips[0].contains("daily loss 110"));

    let report = keeper.run_cycle().await;
    assert!(matches!(
        report.outcome,
        CycleOutcome::BreakerRejected(BreakerRejection::DailyLossExceeded)
    ));
    // Already over the cap; no second announcement
    let more = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, KeeperEvent::BreakerTripped { .. }))
        .count();
    assert_eq!(more, 0);
}
