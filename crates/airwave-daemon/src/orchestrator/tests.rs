use super::*;
use crate::testing::{orchestrator, pump, station, FakeEngine};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

fn abc() -> Vec<Station> {
    vec![station("/a"), station("/b"), station("/c")]
}

fn active(orch: &Orchestrator<FakeEngine>) -> Option<String> {
    orch.state().active_station.map(|k| k.to_string())
}

/// Orchestrator playing `/a` from `[/a, /b, /c]`.
fn playing_abc() -> (
    Orchestrator<FakeEngine>,
    UnboundedReceiver<EngineEvent>,
    UnboundedReceiver<RecoveryDue>,
) {
    let (mut orch, mut rx, recovery) = orchestrator();
    orch.play_specific(&station("/a"), Some(abc()));
    pump(&mut orch, &mut rx);
    (orch, rx, recovery)
}

#[tokio::test]
async fn adjacent_wraps_in_both_directions() {
    let (mut orch, mut rx, _recovery) = playing_abc();

    orch.play_adjacent(Direction::Prev);
    pump(&mut orch, &mut rx);
    assert_eq!(active(&orch).as_deref(), Some("/c"));

    orch.play_adjacent(Direction::Next);
    pump(&mut orch, &mut rx);
    assert_eq!(active(&orch).as_deref(), Some("/a"));
    assert!(orch.state().is_playing);
}

#[tokio::test]
async fn next_len_times_returns_to_start() {
    let (mut orch, mut rx, _recovery) = playing_abc();
    orch.play_adjacent(Direction::Next);
    let start = active(&orch);
    for _ in 0..orch.queue().len() {
        orch.play_adjacent(Direction::Next);
    }
    pump(&mut orch, &mut rx);
    assert_eq!(active(&orch), start);
}

#[tokio::test]
async fn adjacent_on_empty_queue_is_noop() {
    let (mut orch, _rx, _recovery) = orchestrator();
    orch.play_adjacent(Direction::Next);
    assert_eq!(orch.engine().play_commands(), 0);
    assert_eq!(orch.state(), PlaybackState::default());
}

#[tokio::test]
async fn candidate_queue_replaces_current_queue() {
    let (mut orch, mut rx, _recovery) = playing_abc();
    orch.play_specific(&station("/d"), Some(vec![station("/d"), station("/e")]));
    pump(&mut orch, &mut rx);

    let keys: Vec<String> = orch.queue().keys().iter().map(|k| k.to_string()).collect();
    assert_eq!(keys, vec!["/d", "/e"]);
    assert_eq!(orch.queue().cursor(), Some(0));
    assert_eq!(active(&orch).as_deref(), Some("/d"));
    assert_eq!(orch.engine().set_items_calls(), 2);
}

#[tokio::test]
async fn candidate_without_station_gets_it_appended() {
    let (mut orch, mut rx, _recovery) = orchestrator();
    orch.play_specific(&station("/z"), Some(vec![station("/x"), station("/y")]));
    pump(&mut orch, &mut rx);
    let keys: Vec<String> = orch.queue().keys().iter().map(|k| k.to_string()).collect();
    assert_eq!(keys, vec!["/x", "/y", "/z"]);
    assert_eq!(orch.queue().cursor(), Some(2));
}

#[tokio::test]
async fn station_in_queue_is_a_seek() {
    let (mut orch, mut rx, _recovery) = playing_abc();
    orch.play_specific(&station("/c"), None);
    pump(&mut orch, &mut rx);

    assert_eq!(active(&orch).as_deref(), Some("/c"));
    assert_eq!(orch.engine().set_items_calls(), 1);
    assert_eq!(orch.engine().current_index(), Some(2));

    // same keys as a candidate is still a seek
    orch.play_specific(&station("/b"), Some(abc()));
    assert_eq!(orch.engine().set_items_calls(), 1);
    assert_eq!(active(&orch).as_deref(), Some("/b"));
}

#[tokio::test]
async fn drift_between_queue_and_engine_forces_rebuild() {
    let (mut orch, mut rx, _recovery) = playing_abc();
    orch.engine_mut().remove_item(2);

    orch.play_specific(&station("/c"), None);
    pump(&mut orch, &mut rx);
    assert_eq!(orch.engine().set_items_calls(), 2);
    assert_eq!(orch.engine().items().len(), 3);
    assert_eq!(active(&orch).as_deref(), Some("/c"));
    assert!(orch.engine().play_when_ready());
}

#[tokio::test]
async fn single_station_queue_still_browses() {
    let (mut orch, mut rx, _recovery) = orchestrator();
    orch.play_specific(&station("/solo"), None);
    pump(&mut orch, &mut rx);

    let state = orch.state();
    assert!(state.has_prev && state.has_next);

    orch.play_adjacent(Direction::Next);
    pump(&mut orch, &mut rx);
    assert_eq!(active(&orch).as_deref(), Some("/solo"));
    assert!(orch.state().is_playing);
}

#[tokio::test]
async fn toggle_twice_plays_then_pauses() {
    let (mut orch, mut rx, _recovery) = orchestrator();
    orch.load_queue(abc(), None);
    pump(&mut orch, &mut rx);
    assert!(!orch.state().is_playing);

    orch.toggle_play_pause();
    pump(&mut orch, &mut rx);
    assert!(orch.state().is_playing);

    orch.toggle_play_pause();
    pump(&mut orch, &mut rx);
    let state = orch.state();
    assert!(!state.is_playing);
    assert!(!state.is_buffering);
}

#[tokio::test]
async fn toggle_pauses_while_buffering() {
    let (mut orch, mut rx, _recovery) = orchestrator();
    orch.engine_mut().stall();
    orch.play_specific(&station("/a"), None);
    pump(&mut orch, &mut rx);
    assert!(orch.state().is_buffering);

    orch.toggle_play_pause();
    pump(&mut orch, &mut rx);
    assert!(!orch.engine().play_when_ready());
}

#[tokio::test]
async fn toggle_without_active_station_is_noop() {
    let (mut orch, _rx, _recovery) = orchestrator();
    orch.toggle_play_pause();
    assert_eq!(orch.engine().play_commands(), 0);
}

#[tokio::test]
async fn load_queue_selects_key_and_never_plays() {
    let (mut orch, mut rx, _recovery) = orchestrator();
    orch.load_queue(Vec::new(), None);
    assert_eq!(orch.engine().set_items_calls(), 0);

    orch.load_queue(abc(), Some(&"/b".into()));
    pump(&mut orch, &mut rx);
    assert_eq!(orch.queue().cursor(), Some(1));
    assert_eq!(active(&orch).as_deref(), Some("/b"));
    assert_eq!(orch.engine().play_commands(), 0);

    // unknown key falls back to the active one
    orch.load_queue(vec![station("/x"), station("/b")], Some(&"/nope".into()));
    assert_eq!(orch.queue().cursor(), Some(1));
}

#[tokio::test]
async fn own_play_intent_echoes_are_ignored() {
    let (mut orch, mut rx, _recovery) = orchestrator();
    orch.play_specific(&station("/a"), Some(abc()));
    let commands = orch.engine().play_commands();
    pump(&mut orch, &mut rx);
    assert_eq!(orch.engine().play_commands(), commands);
}

#[tokio::test(start_paused = true)]
async fn failed_attempts_back_off_and_give_up() {
    let (mut orch, mut rx, mut recovery) = playing_abc();
    // restarts never get past buffering
    orch.engine_mut().stall();
    let mut delays = Vec::new();

    for _ in 0..4 {
        orch.engine_mut().external_pause(ChangeReason::AudioFocusLoss);
        pump(&mut orch, &mut rx);
        assert!(!orch.engine().play_when_ready());

        let started = tokio::time::Instant::now();
        let due = tokio::time::timeout(Duration::from_secs(10), recovery.recv()).await;
        match due {
            Ok(Some(due)) => {
                delays.push(started.elapsed());
                orch.on_recovery_due(due);
                pump(&mut orch, &mut rx);
                assert!(orch.engine().play_when_ready());
                assert!(orch.state().is_buffering);
            }
            _ => break,
        }
    }

    assert_eq!(
        delays,
        vec![
            Duration::from_millis(500),
            Duration::from_millis(1000),
            Duration::from_millis(1500)
        ]
    );
    // fourth loss in the same episode: no recovery, stays paused
    assert!(!orch.engine().play_when_ready());
}

#[tokio::test(start_paused = true)]
async fn every_recovered_interruption_gets_a_fresh_budget() {
    let (mut orch, mut rx, mut recovery) = playing_abc();

    for _ in 0..4 {
        orch.engine_mut().external_pause(ChangeReason::AudioFocusLoss);
        pump(&mut orch, &mut rx);

        let started = tokio::time::Instant::now();
        let due = recovery.recv().await.unwrap();
        assert_eq!(due.attempt(), 1);
        assert_eq!(started.elapsed(), Duration::from_millis(500));

        orch.on_recovery_due(due);
        pump(&mut orch, &mut rx);
        assert!(orch.state().is_playing);
    }
}

#[tokio::test(start_paused = true)]
async fn user_resume_resets_retry_budget() {
    let (mut orch, mut rx, mut recovery) = playing_abc();
    orch.engine_mut().stall();

    for _ in 0..3 {
        orch.engine_mut().external_pause(ChangeReason::OutputLost);
        pump(&mut orch, &mut rx);
        let due = recovery.recv().await.unwrap();
        orch.on_recovery_due(due);
        pump(&mut orch, &mut rx);
    }

    // budget spent: this loss is not retried
    orch.engine_mut().external_pause(ChangeReason::OutputLost);
    pump(&mut orch, &mut rx);
    assert!(!orch.engine().play_when_ready());

    orch.toggle_play_pause();
    pump(&mut orch, &mut rx);
    assert!(orch.engine().play_when_ready());

    // budget is fresh again: first attempt after 500 ms
    orch.engine_mut().external_pause(ChangeReason::AudioBecomingNoisy);
    pump(&mut orch, &mut rx);
    let started = tokio::time::Instant::now();
    let due = recovery.recv().await.unwrap();
    assert_eq!(due.attempt(), 1);
    assert_eq!(started.elapsed(), Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn stale_recovery_is_ignored() {
    let (mut orch, mut rx, _recovery) = playing_abc();
    orch.engine_mut().external_pause(ChangeReason::AudioFocusLoss);
    pump(&mut orch, &mut rx);
    let stale = RecoveryDue {
        cycle: orch.recovery.cycle(),
        attempt: 1,
    };

    // user pauses: a new cycle starts on the next play intent
    orch.play_specific(&station("/b"), None);
    orch.toggle_play_pause();
    pump(&mut orch, &mut rx);
    assert!(!orch.engine().play_when_ready());

    let commands = orch.engine().play_commands();
    orch.on_recovery_due(stale);
    assert_eq!(orch.engine().play_commands(), commands);
    assert!(!orch.engine().play_when_ready());
}

#[tokio::test(start_paused = true)]
async fn remote_pause_is_not_a_loss() {
    let (mut orch, mut rx, mut recovery) = playing_abc();
    orch.engine_mut().external_pause(ChangeReason::Remote);
    pump(&mut orch, &mut rx);
    assert!(!orch.state().is_playing);

    let due = tokio::time::timeout(Duration::from_secs(5), recovery.recv()).await;
    assert!(due.is_err());
}

#[tokio::test]
async fn remote_play_restarts_from_cursor() {
    let (mut orch, mut rx, _recovery) = playing_abc();
    orch.engine_mut().external_pause(ChangeReason::Remote);
    pump(&mut orch, &mut rx);

    orch.engine_mut().external_play(ChangeReason::Remote);
    pump(&mut orch, &mut rx);
    assert!(orch.state().is_playing);
    assert_eq!(active(&orch).as_deref(), Some("/a"));
}

#[tokio::test]
async fn display_artist_defaults_when_blank() {
    let (mut orch, mut rx, _recovery) = playing_abc();
    assert_eq!(orch.display_artist(), Some("Live radio"));

    orch.update_active_station_display_artist(Some("Evening News"));
    assert_eq!(orch.display_artist(), Some("Evening News"));
    let item = &orch.engine().items()[0];
    assert_eq!(item.uri, "https://radio.example/a");

    orch.update_active_station_display_artist(Some("   "));
    assert_eq!(orch.display_artist(), Some("Live radio"));
    pump(&mut orch, &mut rx);
    assert!(orch.state().is_playing);
}

#[tokio::test]
async fn idle_until_something_is_loaded() {
    let (mut orch, _rx, _recovery) = orchestrator();
    assert!(orch.is_idle());
    orch.load_queue(abc(), None);
    assert!(!orch.is_idle());
}

#[tokio::test]
async fn state_changes_reach_subscribers() {
    let (mut orch, mut rx, _recovery) = orchestrator();
    let mut sub = orch.subscribe();
    orch.play_specific(&station("/a"), None);
    pump(&mut orch, &mut rx);
    assert!(sub.has_changed().unwrap());
    assert_eq!(sub.borrow_and_update().active_station, Some("/a".into()));
}
