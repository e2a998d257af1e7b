//! Client Tests
//!
//! Runs the blocking session driver against a scripted stub server on a
//! local TCP port.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use basex_client::{ClientError, Config, Session, State, WatchState};
use crossbeam::channel::unbounded;

// =============================================================================
// Stub Server
// =============================================================================

struct Peer {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Peer {
    fn new(stream: TcpStream) -> Self {
        let reader = BufReader::new(stream.try_clone().unwrap());
        Self { stream, reader }
    }

    fn read_byte(&mut self) -> u8 {
        let mut byte = [0u8; 1];
        self.reader.read_exact(&mut byte).unwrap();
        byte[0]
    }

    fn read_field(&mut self) -> String {
        let mut buf = Vec::new();
        self.reader.read_until(0, &mut buf).unwrap();
        assert_eq!(buf.pop(), Some(0), "field not terminated");
        String::from_utf8(buf).unwrap()
    }

    fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    /// Timestamp challenge; returns the user name and digest received
    fn login(&mut self, accept: bool) -> (String, String) {
        self.send(b"T\0");
        let user = self.read_field();
        let digest = self.read_field();
        self.send(&[if accept { 0 } else { 1 }]);
        (user, digest)
    }

    fn expect_exit(&mut self) {
        assert_eq!(self.read_field(), "exit");
        self.send(&[0]);
    }
}

fn serve<F>(script: F) -> (u16, JoinHandle<()>)
where
    F: FnOnce(Peer) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        script(Peer::new(stream));
    });
    (port, handle)
}

fn config(port: u16) -> Config {
    Config::builder()
        .port(port)
        .connect_timeout_ms(5_000)
        .build()
        .unwrap()
}

// =============================================================================
// Session Lifecycle
// =============================================================================

#[test]
fn test_connect_execute_close() {
    let (port, server) = serve(|mut peer| {
        let (user, digest) = peer.login(true);
        assert_eq!(user, "admin");
        assert_eq!(digest, "000bebd8c17d88ba8247ba621efabb74");

        assert_eq!(peer.read_field(), "xquery 1+1");
        peer.send(b"2\0Query executed in 0.5 ms.\0\0");
        peer.expect_exit();
    });

    let mut session = Session::connect(config(port)).unwrap();
    assert_eq!(session.state(), State::Connected);

    let execution = session.execute("xquery 1+1").unwrap();
    assert_eq!(execution.result, "2");
    assert_eq!(execution.info, "Query executed in 0.5 ms.");

    session.close().unwrap();
    assert!(session.is_closed());
    assert_eq!(session.commands_sent(), 2);
    assert!(matches!(session.execute("list"), Err(ClientError::SessionClosed)));

    server.join().unwrap();
}

#[test]
fn test_requests_before_open_are_not_sent() {
    let (port, server) = serve(|mut peer| {
        peer.login(true);
        // Only the exit arrives; the rejected command never reaches the wire
        peer.expect_exit();
    });

    let mut session = Session::new(config(port));
    assert!(matches!(
        session.execute("drop db important"),
        Err(ClientError::NotConnected)
    ));
    assert!(matches!(
        session.watch("news", |_| {}),
        Err(ClientError::NotConnected)
    ));

    session.open().unwrap();
    assert_eq!(session.commands_sent(), 0);
    session.close().unwrap();
    assert_eq!(session.commands_sent(), 1);
    server.join().unwrap();
}

#[test]
fn test_rejected_login() {
    let (port, server) = serve(|mut peer| {
        peer.login(false);
    });

    match Session::connect(config(port)) {
        Err(ClientError::Auth(_)) => {}
        Err(other) => panic!("expected auth error, got {}", other),
        Ok(_) => panic!("login should have been rejected"),
    }
    server.join().unwrap();
}

#[test]
fn test_pipelined_replies_resolve_out_of_wait_order() {
    let (port, server) = serve(|mut peer| {
        peer.login(true);
        assert_eq!(peer.read_field(), "create db t");
        assert_eq!(peer.read_field(), "drop db t");
        peer.send(b"\0Database 't' created.\0\0");
        peer.send(b"\0Database 't' was dropped.\0\0");
        peer.expect_exit();
    });

    let mut session = Session::connect(config(port)).unwrap();
    let create = session.queue_execute("create db t");
    let dropped = session.queue_execute("drop db t");

    assert_eq!(session.wait(dropped).unwrap().info, "Database 't' was dropped.");
    assert_eq!(session.wait(create).unwrap().info, "Database 't' created.");

    session.close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_server_error_reaches_caller() {
    let (port, server) = serve(|mut peer| {
        peer.login(true);
        assert_eq!(peer.read_field(), "open nope");
        peer.send(b"\0Database 'nope' was not found.\0\x01");
        assert_eq!(peer.read_field(), "list");
        peer.send(b"\0\0\0");
        peer.expect_exit();
    });

    let mut session = Session::connect(config(port)).unwrap();
    match session.execute("open nope") {
        Err(ClientError::Server(message)) => assert_eq!(message, "Database 'nope' was not found."),
        other => panic!("expected server error, got {:?}", other),
    }
    assert!(session.execute("list").is_ok());

    session.close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_dropped_connection_fails_waiting_command() {
    let (port, server) = serve(|mut peer| {
        peer.login(true);
        assert_eq!(peer.read_field(), "list");
    });

    let mut session = Session::connect(config(port)).unwrap();
    assert!(matches!(session.execute("list"), Err(ClientError::ConnectionClosed)));
    assert!(session.is_closed());
    server.join().unwrap();
}

// =============================================================================
// Documents
// =============================================================================

#[test]
fn test_add_document() {
    let (port, server) = serve(|mut peer| {
        peer.login(true);
        assert_eq!(peer.read_byte(), 0x09);
        assert_eq!(peer.read_field(), "books/a.xml");
        assert_eq!(peer.read_field(), "<book/>");
        peer.send(b"Resource(s) added in 1.2 ms.\0\0");
        peer.expect_exit();
    });

    let mut session = Session::connect(config(port)).unwrap();
    let info = session.add("books/a.xml", "<book/>").unwrap();
    assert_eq!(info, "Resource(s) added in 1.2 ms.");
    session.close().unwrap();
    server.join().unwrap();
}

// =============================================================================
// Queries
// =============================================================================

#[test]
fn test_query_bind_and_results() {
    let (port, server) = serve(|mut peer| {
        peer.login(true);

        assert_eq!(peer.read_byte(), 0x00);
        assert_eq!(peer.read_field(), "declare variable $n external; 1 to $n");
        peer.send(b"q1\0\0");

        assert_eq!(peer.read_byte(), 0x03);
        assert_eq!(peer.read_field(), "q1");
        assert_eq!(peer.read_field(), "$n");
        assert_eq!(peer.read_field(), "3");
        assert_eq!(peer.read_field(), "");
        peer.send(b"\0\0");

        assert_eq!(peer.read_byte(), 0x04);
        assert_eq!(peer.read_field(), "q1");
        peer.send(b"\x0b1\0\x0b2\0\x0b3\0\0\0");

        assert_eq!(peer.read_byte(), 0x02);
        assert_eq!(peer.read_field(), "q1");
        peer.send(b"\0\0");

        peer.expect_exit();
    });

    let mut session = Session::connect(config(port)).unwrap();
    let mut query = session
        .query("declare variable $n external; 1 to $n")
        .unwrap();
    assert_eq!(query.id(), "q1");
    query.bind(&mut session, "$n", "3", None).unwrap();

    let values = query.results(&mut session).unwrap().values().unwrap();
    assert_eq!(values, vec!["1", "2", "3"]);

    query.close(&mut session).unwrap();
    assert!(matches!(query.close(&mut session), Err(ClientError::QueryClosed)));
    assert!(matches!(query.execute(&mut session), Err(ClientError::QueryClosed)));
    session.close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_query_error_after_status() {
    let (port, server) = serve(|mut peer| {
        peer.login(true);
        assert_eq!(peer.read_byte(), 0x00);
        assert_eq!(peer.read_field(), "1 div 0");
        peer.send(b"q1\0\0");

        assert_eq!(peer.read_byte(), 0x05);
        assert_eq!(peer.read_field(), "q1");
        peer.send(b"\0\x01Division by zero.\0");

        // Closed on drop
        assert_eq!(peer.read_byte(), 0x02);
        assert_eq!(peer.read_field(), "q1");
        peer.send(b"\0\0");
        peer.expect_exit();
    });

    let mut session = Session::connect(config(port)).unwrap();
    {
        let query = session.query("1 div 0").unwrap();
        match query.execute(&mut session) {
            Err(ClientError::Server(message)) => assert_eq!(message, "Division by zero."),
            other => panic!("expected server error, got {:?}", other),
        }
    }
    session.close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_open_queries_interleave_with_commands() {
    let (port, server) = serve(|mut peer| {
        peer.login(true);

        assert_eq!(peer.read_byte(), 0x00);
        assert_eq!(peer.read_field(), "1 to 2");
        peer.send(b"q1\0\0");
        assert_eq!(peer.read_byte(), 0x00);
        assert_eq!(peer.read_field(), "'x'");
        peer.send(b"q2\0\0");

        assert_eq!(peer.read_field(), "list");
        peer.send(b"\0\0\0");

        // Both executions pipelined, answered in send order
        assert_eq!(peer.read_byte(), 0x05);
        assert_eq!(peer.read_field(), "q2");
        assert_eq!(peer.read_byte(), 0x05);
        assert_eq!(peer.read_field(), "q1");
        peer.send(b"x\0\0");
        peer.send(b"1 2\0\0");

        assert_eq!(peer.read_byte(), 0x02);
        assert_eq!(peer.read_field(), "q1");
        peer.send(b"\0\0");
        assert_eq!(peer.read_byte(), 0x02);
        assert_eq!(peer.read_field(), "q2");
        peer.send(b"\0\0");
        peer.expect_exit();
    });

    let mut session = Session::connect(config(port)).unwrap();
    let mut first = session.query("1 to 2").unwrap();
    let mut second = session.query("'x'").unwrap();
    assert!(session.execute("list").is_ok());

    let x = second.queue_execute(&mut session).unwrap();
    let numbers = first.queue_execute(&mut session).unwrap();
    assert_eq!(session.wait(numbers).unwrap(), "1 2");
    assert_eq!(session.wait(x).unwrap(), "x");

    first.close(&mut session).unwrap();
    second.close(&mut session).unwrap();
    session.close().unwrap();
    server.join().unwrap();
}

// =============================================================================
// Watch
// =============================================================================

#[test]
fn test_watch_receives_notifications() {
    let (port, server) = serve(|mut peer| {
        peer.login(true);

        assert_eq!(peer.read_byte(), 0x0A);
        let events = TcpListener::bind("127.0.0.1:0").unwrap();
        let eport = events.local_addr().unwrap().port();
        peer.send(format!("{}\0ev1\0", eport).as_bytes());

        let (side, _) = events.accept().unwrap();
        let mut side = Peer::new(side);
        assert_eq!(side.read_field(), "ev1");
        side.send(b"ok\0");

        assert_eq!(peer.read_field(), "news");
        peer.send(b"\0\0");

        side.send(b"other\0dropped\0news\0hello\0");
        peer.expect_exit();
    });

    let mut session = Session::connect(config(port)).unwrap();
    let (tx, rx) = unbounded();
    session
        .watch("news", move |data| {
            let _ = tx.send(data.to_string());
        })
        .unwrap();
    assert_eq!(session.watch_state(), WatchState::SideChannelReady);
    assert!(session.is_subscribed("news"));

    let mut received = rx.try_recv().ok();
    while received.is_none() {
        assert!(session.pump(Some(Duration::from_secs(5))), "no notification");
        received = rx.try_recv().ok();
    }
    assert_eq!(received.as_deref(), Some("hello"));

    session.close().unwrap();
    assert_eq!(session.watch_state(), WatchState::Closed);
    server.join().unwrap();
}
