//! End-to-end tests driving the library's public API over real loopback
//! sockets: a `DuktoEngine`/`NitroShareEngine` listens, `sender::send_text`/
//! `send_files` connects to it, and an observer plus `FsReceiverSink` are
//! used to assert on what actually landed (§8 "End-to-end scenarios").

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use dropwire::dukto::DuktoEngine;
use dropwire::nitroshare::NitroShareEngine;
use dropwire::observer::{EngineObserver, NullObserver, TransferObserver};
use dropwire::peer::{Node, Protocol};
use dropwire::sender::{self, SendOptions, SendTarget};
use dropwire::sink::{DropTarget, FsReceiverSink};

/// Captures exactly what a real UI would care about: the text/errors a
/// transfer produced, and which peers came and went.
#[derive(Default)]
struct Capture {
    finished_text: Mutex<Option<String>>,
    finish_reasons: Mutex<Vec<String>>,
    added_nodes: Mutex<Vec<Node>>,
    removed_nodes: Mutex<Vec<Node>>,
}

impl EngineObserver for Capture {
    fn add_node(&self, node: &Node) {
        self.added_nodes.lock().unwrap().push(node.clone());
    }

    fn remove_node(&self, node: &Node) {
        self.removed_nodes.lock().unwrap().push(node.clone());
    }
}

impl TransferObserver for Capture {
    fn recv_finish_text(&self, _from: SocketAddr, text: &str) {
        *self.finished_text.lock().unwrap() = Some(text.to_string());
    }

    fn recv_finish(&self, _from: SocketAddr, reason: &str) {
        self.finish_reasons.lock().unwrap().push(reason.to_string());
    }
}

async fn bind_dukto(capture: Arc<Capture>, sink: Arc<FsReceiverSink>) -> Arc<DuktoEngine> {
    DuktoEngine::bind(
        Ipv4Addr::LOCALHOST,
        Some(0),
        Some(0),
        "tester at loopback (test)".to_string(),
        None,
        capture,
        sink,
    )
    .await
    .expect("dukto engine binds on loopback")
}

async fn bind_nitroshare(capture: Arc<Capture>, sink: Arc<FsReceiverSink>) -> Arc<NitroShareEngine> {
    NitroShareEngine::bind(
        Ipv4Addr::LOCALHOST,
        Some(0),
        Some(0),
        "11111111-1111-1111-1111-111111111111".to_string(),
        "tester".to_string(),
        "test".to_string(),
        None,
        capture,
        sink,
    )
    .await
    .expect("nitroshare engine binds on loopback")
}

/// Scenario 1 (§8): a Dukto client sends a plain text message and the
/// server surfaces it through `recv_finish_text`.
#[tokio::test]
async fn dukto_text_message_round_trips() {
    let capture = Arc::new(Capture::default());
    let tmp = tempfile::tempdir().unwrap();
    let sink = Arc::new(FsReceiverSink::new(DropTarget::Directory(tmp.path().to_path_buf()), capture.clone()).unwrap());
    let engine = bind_dukto(capture.clone(), sink).await;

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), engine.tcp_port());
    let accept = tokio::spawn(async move { engine.accept_once().await });

    let target = SendTarget { protocol: Protocol::Dukto, addr, node_name: "tester".into() };
    sender::send_text(&target, &SendOptions::default(), "hello").await.unwrap();

    accept.await.unwrap().unwrap();

    assert_eq!(capture.finished_text.lock().unwrap().as_deref(), Some("hello"));
    assert_eq!(capture.finish_reasons.lock().unwrap().as_slice(), ["done"]);
}

/// Scenario 2 (§8): a single small file lands on disk with its exact bytes.
#[tokio::test]
async fn dukto_single_file_lands_on_disk() {
    let capture = Arc::new(Capture::default());
    let tmp = tempfile::tempdir().unwrap();
    let drop_dir = tmp.path().join("drop");
    let sink = Arc::new(FsReceiverSink::new(DropTarget::Directory(drop_dir.clone()), capture.clone()).unwrap());
    let engine = bind_dukto(capture.clone(), sink).await;

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), engine.tcp_port());
    let accept = tokio::spawn(async move { engine.accept_once().await });

    let send_dir = tmp.path().join("send");
    std::fs::create_dir(&send_dir).unwrap();
    std::fs::write(send_dir.join("a.txt"), b"abc").unwrap();

    let target = SendTarget { protocol: Protocol::Dukto, addr, node_name: "tester".into() };
    sender::send_files(&target, &SendOptions::default(), &[send_dir.join("a.txt")], Arc::new(NullObserver))
        .await
        .unwrap();

    accept.await.unwrap().unwrap();

    assert_eq!(std::fs::read(drop_dir.join("a.txt")).unwrap(), b"abc");
    assert_eq!(capture.finish_reasons.lock().unwrap().as_slice(), ["done"]);
}

/// Scenario 3 (§8): a directory containing one empty file materializes both
/// the directory and the file, with the directory never racing behind it.
#[tokio::test]
async fn dukto_directory_with_empty_file_round_trips() {
    let capture = Arc::new(Capture::default());
    let tmp = tempfile::tempdir().unwrap();
    let drop_dir = tmp.path().join("drop");
    let sink = Arc::new(FsReceiverSink::new(DropTarget::Directory(drop_dir.clone()), capture.clone()).unwrap());
    let engine = bind_dukto(capture.clone(), sink).await;

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), engine.tcp_port());
    let accept = tokio::spawn(async move { engine.accept_once().await });

    let send_dir = tmp.path().join("send");
    std::fs::create_dir(&send_dir).unwrap();
    let d = send_dir.join("d");
    std::fs::create_dir(&d).unwrap();
    std::fs::write(d.join("f"), b"").unwrap();

    let target = SendTarget { protocol: Protocol::Dukto, addr, node_name: "tester".into() };
    sender::send_files(&target, &SendOptions::default(), &[d], Arc::new(NullObserver)).await.unwrap();

    accept.await.unwrap().unwrap();

    assert!(drop_dir.join("d").is_dir());
    assert_eq!(std::fs::read(drop_dir.join("d").join("f")).unwrap(), b"");
}

/// Scenario 4 (§8): NitroShare file transfer, including the trailing
/// success acknowledgement the client reads back.
#[tokio::test]
async fn nitroshare_single_file_lands_on_disk() {
    let capture = Arc::new(Capture::default());
    let tmp = tempfile::tempdir().unwrap();
    let drop_dir = tmp.path().join("drop");
    let sink = Arc::new(FsReceiverSink::new(DropTarget::Directory(drop_dir.clone()), capture.clone()).unwrap());
    let engine = bind_nitroshare(capture.clone(), sink).await;

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), engine.tcp_port());
    let accept = tokio::spawn(async move { engine.accept_once().await });

    let send_dir = tmp.path().join("send");
    std::fs::create_dir(&send_dir).unwrap();
    std::fs::write(send_dir.join("x"), b"world").unwrap();

    let target = SendTarget { protocol: Protocol::NitroShare, addr, node_name: "tester".into() };
    sender::send_files(&target, &SendOptions::default(), &[send_dir.join("x")], Arc::new(NullObserver))
        .await
        .unwrap();

    accept.await.unwrap().unwrap();

    assert_eq!(std::fs::read(drop_dir.join("x")).unwrap(), b"world");
    assert_eq!(capture.finish_reasons.lock().unwrap().as_slice(), ["done"]);
}

/// §8 "Directory precedence": a multi-level tree still writes parents
/// before children reach disk, and every byte is accounted for.
#[tokio::test]
async fn dukto_nested_directory_tree_round_trips() {
    let capture = Arc::new(Capture::default());
    let tmp = tempfile::tempdir().unwrap();
    let drop_dir = tmp.path().join("drop");
    let sink = Arc::new(FsReceiverSink::new(DropTarget::Directory(drop_dir.clone()), capture.clone()).unwrap());
    let engine = bind_dukto(capture.clone(), sink).await;

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), engine.tcp_port());
    let accept = tokio::spawn(async move { engine.accept_once().await });

    let send_dir = tmp.path().join("send");
    std::fs::create_dir(&send_dir).unwrap();
    let photos = send_dir.join("photos");
    std::fs::create_dir(&photos).unwrap();
    std::fs::create_dir(photos.join("2020")).unwrap();
    std::fs::write(photos.join("2020").join("a.jpg"), b"jpegbytes").unwrap();
    std::fs::write(photos.join("readme.txt"), b"hi").unwrap();

    let target = SendTarget { protocol: Protocol::Dukto, addr, node_name: "tester".into() };
    sender::send_files(&target, &SendOptions::default(), &[photos], Arc::new(NullObserver)).await.unwrap();

    accept.await.unwrap().unwrap();

    assert_eq!(std::fs::read(drop_dir.join("photos").join("2020").join("a.jpg")).unwrap(), b"jpegbytes");
    assert_eq!(std::fs::read(drop_dir.join("photos").join("readme.txt")).unwrap(), b"hi");
}

/// §3 invariant / §8 "Self-ignore": a hello carrying our own identity must
/// never populate the peer table, even if it arrives over the wire.
#[tokio::test]
async fn dukto_ignores_hello_carrying_its_own_identity() {
    let capture = Arc::new(Capture::default());
    let tmp = tempfile::tempdir().unwrap();
    let sink = Arc::new(FsReceiverSink::new(DropTarget::Directory(tmp.path().to_path_buf()), capture.clone()).unwrap());
    let engine = bind_dukto(capture.clone(), sink).await;

    let dest = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), engine.udp_port());
    let client = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut hello = vec![0x01u8];
    hello.extend_from_slice(b"tester at loopback (test)");
    client.send_to(&hello, dest).await.unwrap();

    engine.handle_udp_once().await.unwrap();

    assert!(capture.added_nodes.lock().unwrap().is_empty());
}

/// §8 "Discovery": a genuinely foreign hello (different identity) is
/// registered, and the engine answers with a unicast reply on its own port.
#[tokio::test]
async fn dukto_registers_a_foreign_hello() {
    let capture = Arc::new(Capture::default());
    let tmp = tempfile::tempdir().unwrap();
    let sink = Arc::new(FsReceiverSink::new(DropTarget::Directory(tmp.path().to_path_buf()), capture.clone()).unwrap());
    let engine = bind_dukto(capture.clone(), sink).await;

    let dest = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), engine.udp_port());
    let client = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut hello = vec![0x02u8];
    hello.extend_from_slice(b"alice at otherbox (linux)");
    client.send_to(&hello, dest).await.unwrap();

    engine.handle_udp_once().await.unwrap();

    let added = capture.added_nodes.lock().unwrap();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].protocol, Protocol::Dukto);
}
