//! Tests for descriptor-list multiplexing

#![cfg(test)]


use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use kerrno::KError;
use kmpx::{
    CancelToken, FdLookup, FdTable, IoEvents, MpxConfig, MpxContext, PollFd, Timeout,
    multiplex_list,
};
use test_helpers::*;

/// Scheduling noise tolerated on top of deadline and slack.
const MARGIN: Duration = Duration::from_millis(500);

fn watch_in(n: usize) -> Vec<PollFd> {
    (0..n as i32).map(|fd| PollFd::new(fd, IoEvents::IN)).collect()
}

// ========== Readiness ==========

#[test]
fn test_one_ready_among_three() {
    let sources = [MockSource::new(), MockSource::ready(IoEvents::IN), MockSource::new()];
    let table = table_with(&sources, 16);
    let ctx = MpxContext::new(&table);
    let mut entries = watch_in(3);

    assert_eq!(multiplex_list(&ctx, &mut entries, Timeout::Infinite), Ok(1));
    assert_eq!(entries[0].ready(), IoEvents::empty());
    assert_eq!(entries[1].ready(), IoEvents::IN);
    assert_eq!(entries[2].ready(), IoEvents::empty());
    assert!(sources.iter().all(|s| s.balanced()));
}

#[test]
fn test_hangup_is_always_reported() {
    let sources = [MockSource::ready(IoEvents::HUP | IoEvents::PRI)];
    let table = table_with(&sources, 4);
    let ctx = MpxContext::new(&table);
    let mut entries = [PollFd::new(0, IoEvents::OUT)];

    assert_eq!(multiplex_list(&ctx, &mut entries, Timeout::IMMEDIATE), Ok(1));
    assert_eq!(entries[0].ready(), IoEvents::HUP);
}

#[test]
fn test_result_is_subset_of_request() {
    let sources = [MockSource::ready(IoEvents::IN | IoEvents::OUT | IoEvents::PRI)];
    let table = table_with(&sources, 4);
    let ctx = MpxContext::new(&table);
    let mut entries = [PollFd::new(0, IoEvents::OUT)];

    assert_eq!(multiplex_list(&ctx, &mut entries, Timeout::Infinite), Ok(1));
    assert_eq!(entries[0].ready(), IoEvents::OUT);
}

#[test]
fn test_negative_fd_is_skipped() {
    let sources = [MockSource::ready(IoEvents::IN)];
    let table = table_with(&sources, 4);
    let ctx = MpxContext::new(&table);
    let mut entries = [
        PollFd::new(-1, IoEvents::IN),
        PollFd::new(0, IoEvents::IN),
    ];
    entries[0].revents = 0x7f;

    assert_eq!(multiplex_list(&ctx, &mut entries, Timeout::IMMEDIATE), Ok(1));
    assert_eq!(entries[0].revents, 0);
    assert_eq!(entries[1].ready(), IoEvents::IN);
}

#[test]
fn test_closed_fd_reports_nval() {
    let sources = [MockSource::new()];
    let table = table_with(&sources, 8);
    let ctx = MpxContext::new(&table);
    let mut entries = [PollFd::new(0, IoEvents::IN), PollFd::new(5, IoEvents::IN)];

    assert_eq!(multiplex_list(&ctx, &mut entries, Timeout::Infinite), Ok(1));
    assert_eq!(entries[0].revents, 0);
    assert_eq!(entries[1].ready(), IoEvents::NVAL);
    assert!(sources[0].balanced());
}

// ========== Timeouts ==========

#[test]
fn test_idle_wait_times_out() {
    let sources = [MockSource::new(), MockSource::new()];
    let table = table_with(&sources, 4);
    let ctx = MpxContext::new(&table);
    let mut entries = watch_in(2);

    let start = Instant::now();
    let result = multiplex_list(&ctx, &mut entries, Timeout::from_millis(50));
    let elapsed = start.elapsed();
    assert_eq!(result, Ok(0));
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_millis(50) + ctx.config().max_slack + MARGIN);
    assert!(entries.iter().all(|e| e.revents == 0));
    for source in &sources {
        assert_eq!(source.registers(), 1);
        assert!(source.balanced());
    }
}

#[test]
fn test_notify_ends_wait_early() {
    let sources = [MockSource::new(), MockSource::new()];
    let table = table_with(&sources, 4);
    let ctx = MpxContext::new(&table);
    let mut entries = watch_in(2);

    let remote = sources[1].clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        remote.set_ready(IoEvents::IN);
    });
    let start = Instant::now();
    let result = multiplex_list(&ctx, &mut entries, Timeout::from_millis(1000));
    handle.join().unwrap();

    assert_eq!(result, Ok(1));
    assert!(start.elapsed() < Duration::from_millis(900));
    assert_eq!(entries[1].ready(), IoEvents::IN);
    assert!(sources.iter().all(|s| s.balanced()));
}

#[test]
fn test_immediate_polls_once_without_registering() {
    let sources = [MockSource::new(), MockSource::new(), MockSource::new()];
    let table = table_with(&sources, 4);
    let ctx = MpxContext::new(&table);
    let mut entries = watch_in(3);

    assert_eq!(multiplex_list(&ctx, &mut entries, Timeout::IMMEDIATE), Ok(0));
    for source in &sources {
        assert_eq!(source.polls(), 1);
        assert_eq!(source.registers(), 0);
    }
}

#[test]
fn test_past_deadline_polls_once() {
    let sources = [MockSource::new()];
    let table = table_with(&sources, 4);
    let ctx = MpxContext::new(&table);
    let mut entries = watch_in(1);

    let past = Instant::now() - Duration::from_millis(5);
    assert_eq!(multiplex_list(&ctx, &mut entries, Timeout::At(past)), Ok(0));
    assert_eq!(sources[0].polls(), 1);
    assert_eq!(sources[0].registers(), 0);
}

#[test]
fn test_uninteresting_notify_does_not_wake() {
    let sources = [MockSource::new()];
    let table = table_with(&sources, 4);
    let ctx = MpxContext::new(&table);
    let mut entries = watch_in(1);

    let remote = sources[0].clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        remote.notify(IoEvents::OUT);
    });
    let start = Instant::now();
    let result = multiplex_list(&ctx, &mut entries, Timeout::from_millis(60));
    handle.join().unwrap();

    assert_eq!(result, Ok(0));
    assert!(start.elapsed() < Duration::from_millis(60) + ctx.config().max_slack + MARGIN);
    // First pass plus the pass after the timeout.
    assert_eq!(sources[0].polls(), 2);
}

#[test]
fn test_spurious_wake_probes_again() {
    let sources = [MockSource::new()];
    let table = table_with(&sources, 4);
    let ctx = MpxContext::new(&table);
    let mut entries = watch_in(1);

    let remote = sources[0].clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        remote.notify(IoEvents::IN);
    });
    let result = multiplex_list(&ctx, &mut entries, Timeout::from_millis(60));
    handle.join().unwrap();

    assert_eq!(result, Ok(0));
    assert_eq!(sources[0].polls(), 3);
    assert!(sources[0].balanced());
}

// ========== Errors ==========

#[test]
fn test_registration_failure_unwinds() {
    let sources = [
        MockSource::new(),
        MockSource::new(),
        MockSource::failing(),
        MockSource::new(),
        MockSource::new(),
    ];
    let table = table_with(&sources, 8);
    let ctx = MpxContext::new(&table);
    let mut entries = watch_in(5);

    let result = multiplex_list(&ctx, &mut entries, Timeout::Infinite);
    assert_eq!(result, Err(KError::NoMemory));
    assert_eq!(sources[0].unregisters(), 1);
    assert_eq!(sources[1].unregisters(), 1);
    assert_eq!(sources[3].registers(), 0);
    assert_eq!(sources[4].registers(), 0);
    assert!(sources.iter().all(|s| s.balanced()));
}

#[test]
fn test_malformed_mask_is_rejected() {
    let sources = [MockSource::ready(IoEvents::IN)];
    let table = table_with(&sources, 4);
    let ctx = MpxContext::new(&table);
    let mut entries = [PollFd {
        fd: 0,
        events: 0x4000,
        revents: 0,
    }];

    let result = multiplex_list(&ctx, &mut entries, Timeout::Infinite);
    assert_eq!(result, Err(KError::InvalidInput));
    assert_eq!(sources[0].polls(), 0);
}

#[test]
fn test_too_many_entries() {
    let table = table_with(&[], 4);
    let ctx = MpxContext::new(&table);
    let mut entries = watch_in(5);

    let result = multiplex_list(&ctx, &mut entries, Timeout::IMMEDIATE);
    assert_eq!(result, Err(KError::InvalidInput));
    assert_eq!(table.max_fds(), 4);
}

// ========== Cancellation ==========

#[test]
fn test_cancel_interrupts_wait() {
    let sources = [MockSource::new(), MockSource::new()];
    let table = table_with(&sources, 4);
    let token = Arc::new(CancelToken::new());
    let ctx = MpxContext::new(&table).with_cancel(&token);
    let mut entries = watch_in(2);

    let remote = token.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        remote.cancel();
    });
    let result = multiplex_list(&ctx, &mut entries, Timeout::Infinite);
    handle.join().unwrap();

    assert_eq!(result, Err(KError::Interrupted));
    assert!(KError::Interrupted.is_recoverable());
    assert!(sources.iter().all(|s| s.balanced()));
}

#[test]
fn test_ready_source_wins_over_cancel() {
    let sources = [MockSource::ready(IoEvents::IN)];
    let table = table_with(&sources, 4);
    let token = CancelToken::new();
    token.cancel();
    let ctx = MpxContext::new(&table).with_cancel(&token);
    let mut entries = watch_in(1);

    assert_eq!(multiplex_list(&ctx, &mut entries, Timeout::Infinite), Ok(1));
    assert!(token.is_pending());
}

// ========== Busy Polling and Large Lists ==========

#[test]
fn test_busy_poll_reprobes_before_sleeping() {
    let sources = [MockSource::new()];
    sources[0].busy.store(true, std::sync::atomic::Ordering::SeqCst);
    let table = table_with(&sources, 4);
    let config = MpxConfig {
        busy_poll: Some(Duration::from_millis(5)),
        ..MpxConfig::default()
    };
    let ctx = MpxContext::new(&table).with_config(config);
    let mut entries = watch_in(1);

    assert_eq!(multiplex_list(&ctx, &mut entries, Timeout::from_millis(20)), Ok(0));
    assert!(sources[0].polls() > 2);
    assert_eq!(sources[0].registers(), 1);
    assert!(sources[0].balanced());
}

#[test]
fn test_list_spanning_many_chunks() {
    let sources: Vec<_> = (0..2000).map(|_| MockSource::new()).collect();
    let table = table_with(&sources, 4096);
    let ctx = MpxContext::new(&table);
    let mut entries = watch_in(2000);

    sources[1999].set_ready(IoEvents::IN);
    sources[700].set_ready(IoEvents::IN);
    assert_eq!(multiplex_list(&ctx, &mut entries, Timeout::Infinite), Ok(2));
    for (fd, entry) in entries.iter().enumerate() {
        let expect = if fd == 700 || fd == 1999 {
            IoEvents::IN
        } else {
            IoEvents::empty()
        };
        assert_eq!(entry.ready(), expect, "fd {fd}");
    }
    assert!(sources.iter().all(|s| s.balanced()));
}

#[test]
fn test_table_from_config() {
    let config = MpxConfig::from_toml("[mpx]\nmax-fds = 2\n").unwrap();
    let table = FdTable::from_config(&config);
    assert_eq!(table.max_fds(), 2);
}
