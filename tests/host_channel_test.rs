//! Host channel over real sockets

use guestcam::buffer::{AcquireFence, BufferProvider, CachedStreamBuffer, MemoryBufferProvider};
use guestcam::camera::{default_request, ProtocolStrategy, StreamConfig, VirtualCamera};
use guestcam::config::GuestCamConfig;
use guestcam::host::socket::serve_connection;
use guestcam::host::{
    ChannelError, HostAddress, HostChannel, HostCommand, HostConnector, SocketConnector,
};
use guestcam::types::{BufferUsage, PixelFormat, RequestTemplate, Size};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

type Log = Arc<Mutex<Vec<String>>>;

fn serve_once_tcp(handler: fn(&str) -> i32) -> (HostAddress, Log, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = HostAddress::Tcp(listener.local_addr().unwrap().to_string());
    let log: Log = Arc::default();
    let seen = log.clone();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let _ = serve_connection(stream, |m| {
            seen.lock().unwrap().push(m.to_string());
            handler(m)
        });
    });
    (address, log, server)
}

fn accept_all(_: &str) -> i32 {
    0
}

#[test]
fn test_tcp_session_lifecycle() {
    let (address, log, server) = serve_once_tcp(accept_all);
    let provider = Arc::new(MemoryBufferProvider::new());
    let connector = Arc::new(SocketConnector::new(address, Duration::from_secs(2)));
    let mut camera = VirtualCamera::new(
        GuestCamConfig::default().camera_parameters(),
        ProtocolStrategy::PerBuffer,
        connector,
        provider.clone(),
    );

    let size = Size::new(16, 16);
    camera
        .configure(
            &default_request(RequestTemplate::Preview),
            &[StreamConfig::new(0, size, PixelFormat::Rgba8888)],
        )
        .unwrap();

    let surface = provider
        .allocate(size, PixelFormat::Rgba8888, BufferUsage::CPU_WRITE_OFTEN)
        .unwrap();
    let result = camera.process_capture_request(
        None,
        vec![CachedStreamBuffer::new(1, 0, surface, AcquireFence::signaled())],
    );
    assert!(result.outcomes[0].success());

    camera.close();
    drop(camera);
    server.join().unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log[..3], ["name=virtualscene", "connect", "start"]);
    assert!(log[3].starts_with("frame dim=16x16 "));
    assert_eq!(log[4..], ["stop", "disconnect"]);
}

#[test]
fn test_refused_selector_is_a_connect_error() {
    let (address, _, server) = serve_once_tcp(|m| if m.starts_with("name=") { -1 } else { 0 });
    let connector = SocketConnector::new(address, Duration::from_secs(2));

    let err = connector.connect("name=missing").err().unwrap();
    assert!(matches!(err, ChannelError::Connect { .. }));
    server.join().unwrap();
}

#[test]
fn test_silent_host_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = HostAddress::Tcp(listener.local_addr().unwrap().to_string());
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        thread::sleep(Duration::from_millis(500));
        drop(stream);
    });

    let connector = Arc::new(SocketConnector::new(address, Duration::from_millis(100)));
    let mut channel = HostChannel::new(connector, "cam0");
    assert!(channel.open().is_err());
    assert!(!channel.is_open());
    server.join().unwrap();
}

#[cfg(unix)]
#[test]
fn test_unix_socket_channel() {
    use std::os::unix::net::UnixListener;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("host.sock");
    let listener = UnixListener::bind(&path).unwrap();
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        serve_connection(stream, |m| if m == "start" { -5 } else { 0 }).unwrap();
    });

    let address: HostAddress = format!("unix:{}", path.display()).parse().unwrap();
    let connector = Arc::new(SocketConnector::new(address, Duration::from_secs(2)));
    let mut channel = HostChannel::new(connector, "cam0");

    assert!(channel.open().unwrap());
    assert_eq!(channel.query(&HostCommand::Connect).unwrap(), 0);
    let err = channel.query(&HostCommand::Start).unwrap_err();
    assert!(matches!(err, ChannelError::Rejected { status: -5, .. }));
    // start sets up the session, so the channel is gone
    assert!(!channel.is_open());
    server.join().unwrap();
}
