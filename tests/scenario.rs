use caenvme::ErrorCode;
use std::{sync::Arc, time::Duration};
use vsdc::{
    coordination::{LoadConfig, Violation},
    prelude::*,
    registers::{ADC_CSR, ADC_IRQ_VEC, INT_LINE},
    transport::mock::Op,
};

fn board() -> (Vsdc4<MockVme>, MockVme) {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let mock = MockVme::new(clock.clone());
    let board = Vsdc4::open(
        mock.clone(),
        DeviceConfig::default(),
        BoardConfig::default(),
        clock,
    )
    .unwrap();
    (board, mock)
}

/// The default stagger at roughly a tenth of the speed
fn quick() -> ScenarioConfig {
    ScenarioConfig {
        integration_time: Duration::from_millis(30),
        poll_interval: Duration::from_millis(20),
        deadline: Some(Duration::from_secs(5)),
        load: LoadConfig {
            pause: Some(Duration::from_micros(100)),
            ..Default::default()
        },
        ..Default::default()
    }
    .scaled(0.12)
}

#[test]
fn test_staggered_completions() {
    let (board, mock) = board();
    let config = quick();
    let report = run_scenario(&board, &config).unwrap();

    assert_eq!(report.vectors(), vec![4, 3, 2, 1]);
    assert!(report.mask.is_full());
    assert_eq!(report.completions.len(), 4);
    assert!(report.violations.is_empty());
    assert_eq!(report.waiter_errors, 0);
    assert_eq!(report.load_errors, 0);
    assert!(report.load_reads > 0);

    let levels = [0.5, 1.0, 1.5, 2.0];
    for c in &report.completions {
        assert!(c.status.integral_ready);
        let expected = levels[c.channel.index()] * 0.03;
        assert!((c.integral.unwrap() - expected).abs() < 1e-5);
    }
    assert!(report.completions.windows(2).all(|w| w[0].at <= w[1].at));

    let stop = report.stop_set_at.unwrap();
    assert!(report.load_exited_at.saturating_sub(stop) <= config.poll_interval);
    for ch in Channel::ALL {
        assert_eq!(board.state(ch).unwrap(), ChannelState::Cleared);
    }
    assert!(mock.pending_vectors().is_empty());
    board.close().unwrap();
    assert!(!mock.is_open());
}

#[test]
fn test_waveforms_are_collected() {
    let (board, _) = board();
    let config = ScenarioConfig {
        read_waveforms: true,
        ..quick()
    };
    let report = run_scenario(&board, &config).unwrap();
    for c in &report.completions {
        let wf = c.waveform.as_ref().unwrap();
        // 30 ms at one sample per millisecond, plus the stop pad
        assert_eq!(wf.len(), 30 + 128);
        assert_eq!(wf.payload().len(), 30);
    }
}

#[test]
fn test_failed_status_read_leaves_bit_unset() {
    let (board, mock) = board();
    mock.fail_next(
        Op::Read,
        Some(board.channel_register(Channel::Ch1, ADC_CSR)),
        ErrorCode::CommError,
    );
    let config = ScenarioConfig {
        deadline: Some(Duration::from_millis(700)),
        ..quick()
    };
    let report = run_scenario(&board, &config).unwrap();

    assert!(!report.mask.contains(Channel::Ch1));
    assert_eq!(report.mask.bits(), 0b1101);
    assert_eq!(report.vectors(), vec![4, 3, 1]);
    // The failed read, then the deadline
    assert_eq!(report.waiter_errors, 2);
    assert!(report.stop_set_at.is_some());
}

#[test]
fn test_arm_failure_stops_everyone() {
    let (board, mock) = board();
    mock.fail_next(
        Op::Write,
        Some(board.channel_register(Channel::Ch2, ADC_CSR)),
        ErrorCode::BusError,
    );
    let err = run_scenario(&board, &quick()).unwrap_err();
    assert_eq!(err.driver_code(), Some(ErrorCode::BusError));
}

#[test]
fn test_violations_are_reported() {
    let (board, mock) = board();
    // Leave a vector that maps to no channel in the queue
    board
        .configure(Channel::Ch0, Duration::from_millis(1), true)
        .unwrap();
    mock.set_register(board.channel_register(Channel::Ch0, ADC_IRQ_VEC), 9);
    board.arm(Channel::Ch0).unwrap();
    std::thread::sleep(Duration::from_millis(5));
    assert!(board.read_status(Channel::Ch0).unwrap().integral_ready);
    board.clear(Channel::Ch0).unwrap();
    assert_eq!(mock.pending_vectors(), vec![9]);

    let mut config = quick();
    config.load = LoadConfig {
        address: INT_LINE,
        expected: 7,
        pause: Some(Duration::from_micros(100)),
    };
    let report = run_scenario(&board, &config).unwrap();

    assert!(report.mask.is_full());
    assert_eq!(report.vectors(), vec![4, 3, 2, 1]);
    assert_eq!(
        report.violations,
        vec![
            Violation::UnexpectedVector(9),
            Violation::UnexpectedLoadValue {
                expected: 7,
                got: 5
            },
        ]
    );
}
