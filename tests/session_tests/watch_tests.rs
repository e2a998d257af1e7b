//! Watch Tests
//!
//! Side channel handshake, subscription reuse and notification routing,
//! driven through the sans-I/O session core.

use std::sync::{Arc, Mutex};

use basex_client::protocol::{Record, Request};
use basex_client::session::{Action, Callback, Channel, Notify, SessionCore, State, WatchState};
use basex_client::{ClientError, Config, Result};
use crossbeam::channel::{unbounded, Receiver, Sender};

type Done = (String, Result<Record>);

fn connected() -> SessionCore {
    let mut core = SessionCore::new(&Config::default());
    core.on_connected();
    core.on_data(b"T\0");
    core.on_data(&[0]);
    assert_eq!(core.state(), State::Connected);
    core.drain_actions();
    core
}

fn done(tx: &Sender<Done>, name: &str) -> Callback {
    let tx = tx.clone();
    let name = name.to_string();
    Box::new(move |result| {
        let _ = tx.send((name, result));
    })
}

fn recorder(seen: &Arc<Mutex<Vec<String>>>) -> Notify {
    let seen = Arc::clone(seen);
    Box::new(move |data: &str| seen.lock().unwrap().push(data.to_string()))
}

fn open_sides(actions: &[Action]) -> usize {
    actions
        .iter()
        .filter(|action| matches!(action, Action::OpenSide { .. }))
        .count()
}

fn writes(actions: &[Action], channel: Channel) -> Vec<Vec<u8>> {
    actions
        .iter()
        .filter_map(|action| match action {
            Action::Write(c, bytes) if *c == channel => Some(bytes.clone()),
            _ => None,
        })
        .collect()
}

fn drained(rx: &Receiver<Done>) -> Vec<Done> {
    rx.try_iter().collect()
}

/// Run the first subscription up to a live side channel
fn subscribe_first(core: &mut SessionCore, tx: &Sender<Done>, seen: &Arc<Mutex<Vec<String>>>) {
    core.watch("news", recorder(seen), done(tx, "news")).unwrap();
    core.on_data(b"1985\0ev1\0");
    core.on_side_connected();
    core.on_side_data(b"ok\0");
    core.on_data(b"\0\0");
    core.drain_actions();
    assert_eq!(core.watch_state(), WatchState::SideChannelReady);
}

// =============================================================================
// Handshake
// =============================================================================

#[test]
fn test_first_watch_runs_full_handshake() {
    let (tx, rx) = unbounded();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut core = connected();

    core.watch("news", recorder(&seen), done(&tx, "news")).unwrap();
    assert_eq!(core.watch_state(), WatchState::Initializing);
    assert_eq!(writes(&core.drain_actions(), Channel::Primary), vec![vec![0x0A]]);
    assert!(core.is_blocked());

    // Held behind the gate until the side channel is live
    core.send(&Request::command("list"), Box::new(|_| {})).unwrap();
    assert!(core.drain_actions().is_empty());

    core.on_data(b"1985\0ev1\0");
    let actions = core.drain_actions();
    assert_eq!(
        actions,
        vec![Action::OpenSide {
            host: "127.0.0.1".to_string(),
            port: 1985
        }]
    );
    assert_eq!(core.watch_state(), WatchState::SideChannelConnecting);

    core.on_side_connected();
    assert_eq!(
        writes(&core.drain_actions(), Channel::Side),
        vec![b"ev1\0".to_vec()]
    );

    core.on_side_data(b"o");
    assert!(core.drain_actions().is_empty());
    core.on_side_data(b"k\0");
    assert_eq!(core.watch_state(), WatchState::SideChannelReady);
    assert_eq!(
        writes(&core.drain_actions(), Channel::Primary),
        vec![b"news\0".to_vec(), b"list\0".to_vec()]
    );
    assert!(!core.is_blocked());

    core.on_data(b"\0\0");
    let results = drained(&rx);
    assert_eq!(results.len(), 1);
    assert!(results[0].1.is_ok());
    assert!(core.is_subscribed("news"));

    core.on_side_data(b"news\0hello\0");
    assert_eq!(*seen.lock().unwrap(), vec!["hello"]);
}

#[test]
fn test_second_watch_reuses_side_channel() {
    let (tx, rx) = unbounded();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut core = connected();
    subscribe_first(&mut core, &tx, &seen);
    drained(&rx);

    let other = Arc::new(Mutex::new(Vec::new()));
    core.watch("alerts", recorder(&other), done(&tx, "alerts")).unwrap();
    let actions = core.drain_actions();
    assert_eq!(open_sides(&actions), 0);
    assert_eq!(writes(&actions, Channel::Primary), vec![b"\x0Aalerts\0".to_vec()]);

    core.on_data(b"\0\0");
    assert_eq!(drained(&rx)[0].0, "alerts");

    core.on_side_data(b"alerts\0fire\0news\0weather\0");
    assert_eq!(*other.lock().unwrap(), vec!["fire"]);
    assert_eq!(*seen.lock().unwrap(), vec!["weather"]);
}

#[test]
fn test_watch_during_handshake_waits_for_gate() {
    let (tx, rx) = unbounded();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut core = connected();

    core.watch("a", recorder(&seen), done(&tx, "a")).unwrap();
    core.watch("b", recorder(&seen), done(&tx, "b")).unwrap();
    assert_eq!(writes(&core.drain_actions(), Channel::Primary), vec![vec![0x0A]]);

    core.on_data(b"1985\0ev1\0");
    assert_eq!(open_sides(&core.drain_actions()), 1);
    core.on_side_connected();
    core.on_side_data(b"ok\0");

    let actions = core.drain_actions();
    assert_eq!(open_sides(&actions), 0);
    assert_eq!(
        writes(&actions, Channel::Primary),
        vec![b"a\0".to_vec(), b"\x0Ab\0".to_vec()]
    );

    core.on_data(b"\0\0\0\0");
    let names: Vec<_> = drained(&rx).into_iter().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["a", "b"]);
}

#[test]
fn test_side_channel_failure_during_handshake_ends_session() {
    let (tx, rx) = unbounded();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut core = connected();

    let (list_tx, list_rx) = unbounded();
    core.watch("news", recorder(&seen), done(&tx, "news")).unwrap();
    core.send(
        &Request::command("list"),
        Box::new(move |result| {
            let _ = list_tx.send(result);
        }),
    )
    .unwrap();
    core.on_data(b"1985\0ev1\0");
    core.drain_actions();

    core.on_side_closed();
    assert_eq!(core.watch_state(), WatchState::Closed);
    let actions = core.drain_actions();
    assert!(actions.contains(&Action::CloseSide));
    assert!(actions.contains(&Action::ClosePrimary));
    // "list" must not follow the lone 0x0A, or it would be read as the event name
    assert!(writes(&actions, Channel::Primary).is_empty());

    let results = drained(&rx);
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0].1, Err(ClientError::Transport(_))));
    assert!(matches!(
        list_rx.try_recv().unwrap(),
        Err(ClientError::ConnectionClosed)
    ));
    assert!(core.is_terminated());
    assert!(matches!(core.failure(), Some(ClientError::Transport(_))));

    assert!(matches!(
        core.watch("news", recorder(&seen), done(&tx, "news")),
        Err(ClientError::SessionClosed)
    ));
}

#[test]
fn test_watch_queued_during_handshake_fails_with_side_channel() {
    let (tx, rx) = unbounded();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut core = connected();

    core.watch("a", recorder(&seen), done(&tx, "a")).unwrap();
    core.watch("b", recorder(&seen), done(&tx, "b")).unwrap();
    core.on_data(b"1985\0ev1\0");
    core.drain_actions();

    core.on_side_closed();
    let actions = core.drain_actions();
    assert!(writes(&actions, Channel::Primary).is_empty());
    assert!(!core.is_subscribed("b"));

    let results = drained(&rx);
    assert_eq!(results.len(), 2);
    let (first, first_result) = &results[0];
    assert_eq!(first, "a");
    assert!(matches!(first_result, Err(ClientError::Transport(_))));
    let (second, second_result) = &results[1];
    assert_eq!(second, "b");
    assert!(matches!(second_result, Err(ClientError::ConnectionClosed)));
}

#[test]
fn test_invalid_event_endpoint_ends_session() {
    let (tx, rx) = unbounded();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut core = connected();

    core.watch("news", recorder(&seen), done(&tx, "news")).unwrap();
    core.send(&Request::command("list"), Box::new(|_| {})).unwrap();
    core.drain_actions();
    core.on_data(b"port\0ev1\0");

    let actions = core.drain_actions();
    assert_eq!(open_sides(&actions), 0);
    assert!(actions.contains(&Action::ClosePrimary));
    assert!(writes(&actions, Channel::Primary).is_empty());
    assert!(matches!(drained(&rx)[0].1, Err(ClientError::Server(_))));
    assert!(core.is_terminated());
}

#[test]
fn test_side_channel_loss_after_ready_starts_over() {
    let (tx, rx) = unbounded();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut core = connected();
    subscribe_first(&mut core, &tx, &seen);
    drained(&rx);

    core.watch("b", recorder(&seen), done(&tx, "b")).unwrap();
    assert_eq!(
        writes(&core.drain_actions(), Channel::Primary),
        vec![b"\x0Ab\0".to_vec()]
    );

    core.on_side_closed();
    assert_eq!(core.watch_state(), WatchState::Closed);
    let actions = core.drain_actions();
    assert!(actions.contains(&Action::CloseSide));
    assert!(!actions.contains(&Action::ClosePrimary));
    assert!(!core.is_terminated());

    // The attach reply arrives after its handler was forgotten
    core.on_data(b"\0\0");
    let results = drained(&rx);
    assert_eq!(results[0].0, "b");
    assert!(matches!(results[0].1, Err(ClientError::Transport(_))));

    core.watch("news", recorder(&seen), done(&tx, "news")).unwrap();
    assert_eq!(writes(&core.drain_actions(), Channel::Primary), vec![vec![0x0A]]);
    assert_eq!(core.watch_state(), WatchState::Initializing);
}

// =============================================================================
// Subscriptions
// =============================================================================

#[test]
fn test_unwatch_drops_handler_but_keeps_channel() {
    let (tx, rx) = unbounded();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut core = connected();
    subscribe_first(&mut core, &tx, &seen);
    drained(&rx);

    core.unwatch("news", done(&tx, "news")).unwrap();
    assert_eq!(
        writes(&core.drain_actions(), Channel::Primary),
        vec![b"\x0Bnews\0".to_vec()]
    );
    assert!(core.is_subscribed("news"));

    core.on_data(b"\0\0");
    assert!(drained(&rx)[0].1.is_ok());
    assert!(!core.is_subscribed("news"));
    assert_eq!(core.watch_state(), WatchState::SideChannelReady);

    core.on_side_data(b"news\0ignored\0");
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn test_rejected_attach_drops_subscription() {
    let (tx, rx) = unbounded();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut core = connected();
    subscribe_first(&mut core, &tx, &seen);
    drained(&rx);

    core.watch("missing", recorder(&seen), done(&tx, "missing")).unwrap();
    core.on_data(b"Unknown event: missing\0\x01");

    match &drained(&rx)[0].1 {
        Err(ClientError::Server(message)) => assert_eq!(message, "Unknown event: missing"),
        other => panic!("expected server error, got {:?}", other),
    }
    assert!(!core.is_subscribed("missing"));
    assert!(core.is_subscribed("news"));
}

#[test]
fn test_session_close_tears_down_side_channel() {
    let (tx, _rx) = unbounded();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut core = connected();
    subscribe_first(&mut core, &tx, &seen);

    core.on_closed();
    assert!(core.drain_actions().contains(&Action::CloseSide));
    assert_eq!(core.watch_state(), WatchState::Closed);
    assert!(!core.is_subscribed("news"));
}

#[test]
fn test_pending_watch_fails_when_session_dies() {
    let (tx, rx) = unbounded();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut core = connected();

    core.watch("news", recorder(&seen), done(&tx, "news")).unwrap();
    core.on_closed();

    let results = drained(&rx);
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0].1, Err(ClientError::ConnectionClosed)));
}
