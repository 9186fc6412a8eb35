//! End-to-end protocol scenarios driven over real loopback TCP sockets
//! against the full event loop (accept, readiness multiplexing, protocol
//! handling) — not just the protocol module in isolation.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

use keymutexd::config::Config;
use keymutexd::listener::EventLoop;

fn spawn_server(max_connections: usize) -> SocketAddr {
    let config = Config {
        endpoint: "0".to_string(),
        max_connections,
        force_unlink: false,
        poll_interval_secs: 1,
    };

    let mut event_loop = EventLoop::new(&config).expect("bind should succeed on an ephemeral port");
    let addr = event_loop.tcp_local_addr().unwrap();

    thread::spawn(move || event_loop.run());

    addr
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
    stream
}

fn settle() {
    thread::sleep(Duration::from_millis(50));
}

#[test]
fn single_acquire_then_release() {
    let addr = spawn_server(4);
    let mut c1 = connect(addr);

    c1.write_all(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff])
        .unwrap();

    let mut reply = [0u8; 1];
    c1.read_exact(&mut reply).unwrap();
    assert_eq!(reply[0], b'O');

    c1.write_all(b"R").unwrap();
    settle();
}

#[test]
fn one_owner_two_waiters_both_notified_on_release() {
    let addr = spawn_server(4);
    let key = [0xaa; 16];

    let mut c1 = connect(addr);
    c1.write_all(&key).unwrap();
    let mut reply = [0u8; 1];
    c1.read_exact(&mut reply).unwrap();
    assert_eq!(reply[0], b'O');

    let mut c2 = connect(addr);
    c2.write_all(&key).unwrap();
    let mut c3 = connect(addr);
    c3.write_all(&key).unwrap();
    settle();

    c1.write_all(b"R").unwrap();

    let mut r2 = [0u8; 1];
    c2.read_exact(&mut r2).unwrap();
    assert_eq!(r2[0], b'R');
    let mut r3 = [0u8; 1];
    c3.read_exact(&mut r3).unwrap();
    assert_eq!(r3[0], b'R');

    c2.write_all(&key).unwrap();
    let mut second_owner = [0u8; 1];
    c2.read_exact(&mut second_owner).unwrap();
    assert_eq!(second_owner[0], b'O');
}

#[test]
fn owner_disconnect_releases_waiters() {
    let addr = spawn_server(4);
    let key = [0xbb; 16];

    let mut c1 = connect(addr);
    c1.write_all(&key).unwrap();
    let mut reply = [0u8; 1];
    c1.read_exact(&mut reply).unwrap();

    let mut c2 = connect(addr);
    c2.write_all(&key).unwrap();
    settle();

    drop(c1);

    let mut r2 = [0u8; 1];
    c2.read_exact(&mut r2).unwrap();
    assert_eq!(r2[0], b'R');
}

#[test]
fn distinct_keys_are_independent() {
    let addr = spawn_server(4);

    let mut c1 = connect(addr);
    c1.write_all(&[0x01; 16]).unwrap();
    let mut r1 = [0u8; 1];
    c1.read_exact(&mut r1).unwrap();
    assert_eq!(r1[0], b'O');

    let mut c2 = connect(addr);
    c2.write_all(&[0x02; 16]).unwrap();
    let mut r2 = [0u8; 1];
    c2.read_exact(&mut r2).unwrap();
    assert_eq!(r2[0], b'O');
}

#[test]
fn waiter_disconnect_is_silent_to_the_owner() {
    let addr = spawn_server(4);
    let key = [0xcc; 16];

    let mut c1 = connect(addr);
    c1.write_all(&key).unwrap();
    let mut r1 = [0u8; 1];
    c1.read_exact(&mut r1).unwrap();

    let c2 = connect(addr);
    {
        let mut c2 = &c2;
        c2.write_all(&key).unwrap();
    }
    settle();
    drop(c2);
    settle();

    c1.write_all(b"R").unwrap();
    settle();

    let mut c3 = connect(addr);
    c3.write_all(&key).unwrap();
    let mut r3 = [0u8; 1];
    c3.read_exact(&mut r3).unwrap();
    assert_eq!(r3[0], b'O');
}

#[test]
fn capacity_ceiling_blocks_third_connection_until_a_slot_frees() {
    let addr = spawn_server(2);

    let mut c1 = connect(addr);
    c1.write_all(&[1; 16]).unwrap();
    let mut r1 = [0u8; 1];
    c1.read_exact(&mut r1).unwrap();
    assert_eq!(r1[0], b'O');

    let mut c2 = connect(addr);
    c2.write_all(&[2; 16]).unwrap();
    let mut r2 = [0u8; 1];
    c2.read_exact(&mut r2).unwrap();
    assert_eq!(r2[0], b'O');

    // The table is now full; a third connection's bytes should go
    // unanswered until a slot frees up.
    let mut c3 = connect(addr);
    let _ = c3.write_all(&[3; 16]);
    settle();
    let mut probe = [0u8; 1];
    let result = c3.read_exact(&mut probe);
    assert!(result.is_err(), "third client should not be served while the table is full");

    drop(c1);
    settle();

    let mut r3 = [0u8; 1];
    c3.read_exact(&mut r3).unwrap();
    assert_eq!(r3[0], b'O', "third client should be accepted once a slot frees");
}

#[test]
fn pipelined_release_and_reacquire_over_one_write() {
    // Release and the next key acquisition land in one write, so both
    // may be delivered to the kernel before a single readiness event
    // fires. The server must still process both instead of stalling on
    // the second half.
    let addr = spawn_server(4);
    let key_a = [0x44; 16];
    let key_b = [0x55; 16];

    let mut c1 = connect(addr);
    c1.write_all(&key_a).unwrap();
    let mut r1 = [0u8; 1];
    c1.read_exact(&mut r1).unwrap();
    assert_eq!(r1[0], b'O');

    let mut pipelined = Vec::new();
    pipelined.push(b'R');
    pipelined.extend_from_slice(&key_b);
    c1.write_all(&pipelined).unwrap();

    let mut r2 = [0u8; 1];
    c1.read_exact(&mut r2).unwrap();
    assert_eq!(r2[0], b'O');
}
