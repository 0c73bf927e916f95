use mill_sockets::prelude::*;
use std::{net::SocketAddr, path::PathBuf};

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn socket_path(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("mill-sockets-{}-{name}.sock", std::process::id()));
    let _ = std::fs::remove_file(&path);
    path
}

fn wait_for(selector: &mut AsyncSelector, socket: &Socket, operation: Operation) -> SelectContext {
    selector.add_socket_operation(socket, operation);
    selector.select(Some(5), 0).expect("socket never became ready")
}

fn accept(selector: &mut AsyncSelector, server: &mut StreamedServerIo) -> Socket {
    loop {
        wait_for(selector, server.socket(), Operation::Read);
        if let Incoming::Accepted(accepted) = server.read(&mut RawFramePicker::new(), false).unwrap() {
            return accepted.into_socket();
        }
    }
}

fn read_frame(
    selector: &mut AsyncSelector,
    io: &mut StreamedClientIo,
    picker: &mut dyn FramePicker,
) -> Frame {
    loop {
        if let Incoming::Complete(frame) = io.read(picker, false).unwrap() {
            return frame;
        }
        wait_for(selector, io.socket(), Operation::Read);
    }
}

#[test]
fn tcp_transfer_survives_chunking() {
    let payload: Vec<u8> = (0..256 * 1024u32).map(|i| (i % 251) as u8).collect();
    let config = IoConfig::builder()
        .read_attempts(1000)
        .write_attempts(1000)
        .build();
    let mut selector = AsyncSelector::new().unwrap();

    let listener = Socket::tcp_listen(loopback()).unwrap();
    let addr = listener.local_addr().unwrap();
    let mut server = StreamedServerIo::new(listener);
    let mut client = StreamedClientIo::new(Socket::tcp_connect(addr).unwrap(), config.clone());
    let mut peer = StreamedClientIo::new(accept(&mut selector, &mut server), config);

    let mut picker = NullFramePicker::new();
    let mut remaining: &[u8] = &payload;
    let frame = loop {
        if !remaining.is_empty() {
            selector.add_socket_operation(client.socket(), Operation::Write);
        }
        selector.add_socket_operation(peer.socket(), Operation::Read);
        let ready = selector.select(Some(5), 0).unwrap();

        if ready.is_writable(client.socket().id()) {
            let sent = client.write(remaining, false).unwrap();
            remaining = &remaining[sent..];
            if remaining.is_empty() {
                client.socket().close().unwrap();
            }
        }
        if ready.is_readable(peer.socket().id()) {
            if let Incoming::Complete(frame) = peer.read(&mut picker, false).unwrap() {
                break frame;
            }
        }
    };

    assert_eq!(frame.len(), payload.len());
    assert_eq!(md5::compute(frame.data()), md5::compute(&payload));
    assert!(!peer.is_connected());
}

#[test]
fn raw_read_returns_digest_sent_by_client() {
    let digest = format!("{:x}", md5::compute(b"the quick brown fox"));
    let mut selector = AsyncSelector::new().unwrap();

    let listener = Socket::tcp_listen(loopback()).unwrap();
    let addr = listener.local_addr().unwrap();
    let mut server = StreamedServerIo::new(listener);
    let mut client = StreamedClientIo::new(Socket::tcp_connect(addr).unwrap(), IoConfig::default());
    let mut peer = StreamedClientIo::new(accept(&mut selector, &mut server), IoConfig::default());

    wait_for(&mut selector, client.socket(), Operation::Write);
    assert_eq!(client.write(digest.as_bytes(), false).unwrap(), digest.len());

    let frame = read_frame(&mut selector, &mut peer, &mut RawFramePicker::new());
    assert_eq!(frame.to_string(), digest);
    assert_eq!(frame.remote_address(), peer.remote_address());
}

#[test]
fn unix_stream_frames_share_one_read() {
    let path = socket_path("markers");
    let mut selector = AsyncSelector::new().unwrap();
    let mut server = StreamedServerIo::new(Socket::unix_listen(&path).unwrap());
    let mut client = StreamedClientIo::new(Socket::unix_connect(&path).unwrap(), IoConfig::default());
    let mut peer = StreamedClientIo::new(accept(&mut selector, &mut server), IoConfig::default());

    wait_for(&mut selector, client.socket(), Operation::Write);
    let message = b"noise<m>one</m><m>two</m>";
    assert_eq!(client.write(message, false).unwrap(), message.len());

    let first = read_frame(
        &mut selector,
        &mut peer,
        &mut MarkerFramePicker::new(Some("<m>"), "</m>", true),
    );
    assert_eq!(first.data().as_ref(), b"<m>one</m>");

    // served from the leftover, no new data arrives
    let second = peer
        .read(&mut MarkerFramePicker::new(Some("<m>"), "</m>", true), false)
        .unwrap()
        .complete()
        .unwrap();
    assert_eq!(second.data().as_ref(), b"<m>two</m>");

    let _ = std::fs::remove_file(&path);
}

#[test]
fn udp_request_and_reply() {
    let config = IoConfig::default();
    let mut selector = AsyncSelector::new().unwrap();

    let server_socket = Socket::udp_bind(loopback()).unwrap();
    let server_addr = server_socket.local_addr().unwrap();
    let mut server = DatagramServerIo::new(server_socket, &config);
    let mut client = DatagramClientIo::new(Socket::udp_connect(server_addr).unwrap(), config.clone());

    assert_eq!(client.write(b"ping", false).unwrap(), 4);

    let accepted = loop {
        wait_for(&mut selector, server.socket(), Operation::Read);
        if let Incoming::Accepted(accepted) = server.read(&mut RawFramePicker::new(), false).unwrap() {
            break accepted;
        }
    };
    assert_eq!(accepted.remote_address(), client.socket().local_address());

    let mut peer = DatagramClientIo::new(accepted.into_socket(), config);
    let ready = wait_for(&mut selector, peer.socket(), Operation::Read);
    assert!(ready.is_readable(peer.socket().id()));
    let request = peer
        .read(&mut RawFramePicker::new(), false)
        .unwrap()
        .complete()
        .unwrap();
    assert_eq!(request.data().as_ref(), b"ping");
    assert_eq!(peer.write(b"pong", false).unwrap(), 4);

    let reply = loop {
        wait_for(&mut selector, client.socket(), Operation::Read);
        if let Incoming::Complete(frame) = client.read(&mut RawFramePicker::new(), false).unwrap() {
            break frame;
        }
    };
    assert_eq!(reply.data().as_ref(), b"pong");
    assert_eq!(reply.remote_address(), Some(server_addr.to_string().as_str()));
}

#[test]
fn tcp_urgent_byte_has_its_own_channel() {
    let mut selector = AsyncSelector::new().unwrap();
    let listener = Socket::tcp_listen(loopback()).unwrap();
    let addr = listener.local_addr().unwrap();
    let mut server = StreamedServerIo::new(listener);
    let mut client = StreamedClientIo::new(Socket::tcp_connect(addr).unwrap(), IoConfig::default());
    let mut peer = StreamedClientIo::new(accept(&mut selector, &mut server), IoConfig::default());

    wait_for(&mut selector, client.socket(), Operation::Write);
    assert_eq!(client.write(b"!", true).unwrap(), 1);

    let ready = wait_for(&mut selector, peer.socket(), Operation::Read);
    assert_eq!(ready.oob(), &[peer.socket().id()]);

    let urgent = peer
        .read(&mut FixedLengthFramePicker::new(1), true)
        .unwrap()
        .complete()
        .unwrap();
    assert_eq!(urgent.data().as_ref(), b"!");
}

#[test]
fn connect_to_closed_port_is_refused() {
    let addr = {
        let probe = Socket::tcp_listen(loopback()).unwrap();
        probe.local_addr().unwrap()
    };
    let socket = match Socket::tcp_connect(addr) {
        Ok(socket) => socket,
        // the refusal may already be known when connect returns
        Err(err) => {
            assert_eq!(err.kind(), std::io::ErrorKind::ConnectionRefused);
            return;
        }
    };
    let mut selector = AsyncSelector::new().unwrap();
    let mut client = StreamedClientIo::new(socket, IoConfig::default());

    wait_for(&mut selector, client.socket(), Operation::Write);
    let err = client.write(b"hello", false).unwrap_err();
    assert!(matches!(err, NetworkError::ConnectionRefused { .. }));
}
