//! Watering worker: pump sequencing, alerts and the completion log.

use smartgarden::alerts::RateLimiter;
use smartgarden::app::ports::Clock;
use smartgarden::watering::{
    WATER_QUEUE_LEN, WaterQueue, WateringCommand, WateringLog, WateringSource, WateringWorker, auto_command, enqueue,
    manual_command,
};

use crate::mock_hw::{ManualClock, MockPump, NoDelay, RecordingSink};

#[test]
fn manual_run_switches_pump_and_logs_completion() {
    let log = WateringLog::new();
    let clock = ManualClock::new();
    clock.set(5_000);
    let delay = NoDelay::default();
    let mut worker = WateringWorker::new(MockPump::default(), delay.clone(), clock.clone(), &log);
    let mut sink = RecordingSink::new();

    worker.run(
        WateringCommand {
            duration_secs: 7,
            source: WateringSource::Manual,
        },
        &mut sink,
    );

    assert_eq!(worker.pump().history, vec![true, false]);
    assert_eq!(delay.total_ms.get(), 7_000);
    assert_eq!(sink.codes(), vec!["command.watering_started", "command.watering_finished"]);
    assert_eq!(log.last_completed_ms(), Some(5_000));
}

#[test]
fn auto_run_reports_duration_and_source() {
    let log = WateringLog::new();
    let mut worker = WateringWorker::new(MockPump::default(), NoDelay::default(), ManualClock::new(), &log);
    let mut sink = RecordingSink::new();

    worker.run(
        WateringCommand {
            duration_secs: 4,
            source: WateringSource::Auto,
        },
        &mut sink,
    );

    assert_eq!(sink.codes(), vec!["auto_watering_started", "auto_watering_finished"]);
    let details = sink.alerts[0].details.as_ref().unwrap();
    assert_eq!(details["duration"], 4);
    assert_eq!(details["source"], "auto");
    assert!(!worker.pump().history.last().copied().unwrap());
}

#[test]
fn queued_commands_run_in_order() {
    let queue = WaterQueue::new();
    let tx = queue.sender();
    let limiter = RateLimiter::new();
    let clock = ManualClock::new();
    let mut sink = RecordingSink::new();

    assert!(enqueue(&tx, manual_command(3, clock.now(), &limiter, &mut sink)));
    assert!(enqueue(&tx, auto_command(5, 0, &WateringLog::new()).unwrap()));

    let log = WateringLog::new();
    let delay = NoDelay::default();
    let mut worker = WateringWorker::new(MockPump::default(), delay.clone(), clock, &log);
    while let Ok(cmd) = queue.try_receive() {
        worker.run(cmd, &mut sink);
    }

    assert_eq!(delay.total_ms.get(), 8_000);
    assert_eq!(worker.pump().history, vec![true, false, true, false]);
    assert_eq!(sink.count("command.watering_started"), 1);
    assert_eq!(sink.count("auto_watering_started"), 1);
}

#[test]
fn burst_of_requests_is_bounded_by_queue() {
    let queue = WaterQueue::new();
    let tx = queue.sender();
    let limiter = RateLimiter::new();
    let clock = ManualClock::new();
    let mut sink = RecordingSink::new();

    let accepted = (0..WATER_QUEUE_LEN + 3)
        .filter(|_| enqueue(&tx, manual_command(2, clock.now(), &limiter, &mut sink)))
        .count();
    assert_eq!(accepted, WATER_QUEUE_LEN);
}
