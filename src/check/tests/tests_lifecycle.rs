//! Meter preparation, cancellation, faults and the final clear.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use std::sync::Arc;

    use crate::{PinCheckConfig, PinCheckError};
    use crate::check::CheckOutcome;
    use crate::check::tests::helpers::*;
    use crate::driver::{MeterFault, StatusCode};
    use crate::gateway::{DeviceError, DeviceOp};
    use crate::meter::MeterOp;
    use crate::plan::{ExecutionPlan, PinCheckCombination};
    use crate::run::RunContext;
    use crate::sim::{MeterCall, SimulatedFixture};

    fn three_combinations(batch: bool) -> ExecutionPlan {
        ExecutionPlan::new(vec![
            PinCheckCombination::new([2, 3, 4, 5], [1]),
            PinCheckCombination::new([6, 7, 8, 9], [1]),
            PinCheckCombination::new([10, 11, 12, 13], [1]),
        ])
        .batch(batch)
        .discharge(false)
    }

    #[test]
    fn lifecycle__meter_prepared_with_plan_auto_range() {
        let fixture = SimulatedFixture::new();
        let plan = three_combinations(true).auto_range(true);

        run_on(&fixture, &RunContext::new(), &plan, &small_config());

        let calls = fixture.meter_calls();
        assert_eq!(&calls[..2], &[MeterCall::Reset, MeterCall::Configure]);
        assert_eq!(calls.last(), Some(&MeterCall::Close));
        assert!(fixture.meter_settings().unwrap().auto_range);
    }

    #[test]
    fn lifecycle__completed_run_releases_relays() {
        let fixture = SimulatedFixture::new();

        let report = run_on(&fixture, &RunContext::new(), &three_combinations(true), &small_config());

        assert!(report.is_completed());
        assert!(fixture.relay_state().is_released());
    }

    #[test]
    fn lifecycle__cancel_truncates_single_mode() {
        let full = run_on(
            &SimulatedFixture::new(),
            &RunContext::new(),
            &three_combinations(false),
            &small_config(),
        );
        assert_eq!(full.results.len(), 12);

        let fixture = SimulatedFixture::new();
        let ctx = Arc::new(RunContext::new());
        let remote = Arc::clone(&ctx);
        fixture.on_read(move |n| {
            if n == 2 {
                remote.request_cancel();
            }
        });

        let report = run_on(&fixture, &ctx, &three_combinations(false), &small_config());

        assert_eq!(report.outcome, CheckOutcome::Cancelled);
        assert_eq!(report.results.len(), 2);
        assert!(report.results.len() < full.results.len());
        assert!(fixture.relay_state().is_released(), "cancelled runs still clear");
    }

    #[test]
    fn lifecycle__cancel_truncates_batch_mode_at_combination() {
        let fixture = SimulatedFixture::new();
        let ctx = Arc::new(RunContext::new());
        let remote = Arc::clone(&ctx);
        fixture.on_read(move |_| remote.request_cancel());

        let report = run_on(&fixture, &ctx, &three_combinations(true), &small_config());

        assert_eq!(report.outcome, CheckOutcome::Cancelled);
        assert_eq!(report.results.len(), 4, "first chunk finishes, the rest is skipped");
        assert_eq!(fixture.read_count(), 1);
    }

    #[test]
    fn lifecycle__cancel_stops_batch_mode_between_chunks() {
        let fixture = SimulatedFixture::new();
        let ctx = Arc::new(RunContext::new());
        let remote = Arc::clone(&ctx);
        fixture.on_read(move |_| remote.request_cancel());

        let config = PinCheckConfig {
            batch_size: 2,
            ..small_config()
        };
        let plan = ExecutionPlan::new(vec![PinCheckCombination::new([2, 3, 4, 5, 6, 7], [1])]);
        let report = run_on(&fixture, &ctx, &plan, &config);

        assert_eq!(report.outcome, CheckOutcome::Cancelled);
        let pins: Vec<u16> = report.results.iter().map(|r| r.test_pin).collect();
        assert_eq!(pins, [2, 3]);
        assert_eq!(fixture.read_count(), 1);
    }

    #[test]
    fn lifecycle__meter_fault_aborts_with_partial_results() {
        let fixture = SimulatedFixture::new();
        let fault = MeterFault {
            code: -1073807339,
            message: "timeout".into(),
        };
        fixture.fail_meter_read(3, fault.clone());

        let report = run_on(&fixture, &RunContext::new(), &three_combinations(false), &small_config());

        assert_eq!(report.results.len(), 2);
        match report.fault() {
            Some(PinCheckError::Meter(e)) => {
                assert_eq!(e.op, MeterOp::Read);
                assert_eq!(e.fault, fault);
            }
            other => panic!("expected meter fault, got {other:?}"),
        }
    }

    #[test]
    fn lifecycle__device_fault_aborts_without_final_clear() {
        let fixture = SimulatedFixture::new();
        // Two configurations per pin without discharge; the 5th is the third pin's clear.
        fixture.fail_device_call(DeviceOp::ConfigurationOpen, 5, StatusCode::ConnectionLost);

        let report = run_on(&fixture, &RunContext::new(), &three_combinations(false), &small_config());

        assert_eq!(report.results.len(), 2);
        assert_eq!(
            report.outcome,
            CheckOutcome::Aborted(PinCheckError::Device(DeviceError::Status {
                op: DeviceOp::ConfigurationOpen,
                status: StatusCode::ConnectionLost,
            }))
        );
        assert_eq!(count(&fixture, DeviceOp::ConfigurationOpen), 5);
        assert!(!fixture.is_device_open(), "session released on abort");
    }

    #[test]
    fn lifecycle__empty_plan_still_prepares_and_clears() {
        let fixture = SimulatedFixture::new();

        let report = run_on(&fixture, &RunContext::new(), &ExecutionPlan::default(), &small_config());

        assert!(report.results.is_empty());
        assert!(report.is_completed());
        assert_eq!(fixture.read_count(), 0);
        assert_eq!(count(&fixture, DeviceOp::ConfigurationOpen), 1);
    }
}
