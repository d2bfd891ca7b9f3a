use crate::*;

use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use shrd_core::wire::{self, Frame, Identity, Message, PROTOCOL_VERSION};
use shrd_core::FileInfo;

/// Open a raw session to a node and complete the handshake. Used by the
/// scenarios that need to speak the protocol by hand.
async fn raw_session(
    node: &TestNode,
) -> (
    tokio::net::tcp::OwnedReadHalf,
    tokio::net::tcp::OwnedWriteHalf,
) {
    let stream = TcpStream::connect(("127.0.0.1", node.addr.port()))
        .await
        .unwrap();
    let (mut reader, mut writer) = stream.into_split();
    wire::write_message(
        &mut writer,
        &Message::Hello(Identity {
            device_id: "raw-client-id".into(),
            device_name: "raw-client".into(),
        }),
    )
    .await
    .unwrap();
    match wire::read_message(&mut reader).await.unwrap() {
        Some(Message::HelloAck(_)) => {}
        other => panic!("expected HELLO_ACK, got {other:?}"),
    }
    (reader, writer)
}

/// A 200 KiB file of random bytes lands byte-for-byte under the
/// receiver's downloads directory.
#[tokio::test]
async fn send_file_lands_byte_for_byte() {
    let sender = rejecting_node().await;
    let mut receiver = accepting_node().await;

    let payload = random_bytes(200 * 1024);
    let src = sender.dir.path().join("photo.jpg");
    tokio::fs::write(&src, &payload).await.unwrap();

    sender
        .client()
        .send_file(&receiver.as_device("receiver"), &src)
        .await
        .expect("send should succeed with auto-accept on");

    let dest = receiver.downloads().join("photo.jpg");
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), payload);

    let completions: Vec<_> = receiver
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, Event::TransferComplete { success: true, .. }))
        .collect();
    assert_eq!(completions.len(), 1);
}

/// Sending the same name twice yields `x.txt` and `x_1.txt`; the first
/// file is untouched.
#[tokio::test]
async fn duplicate_names_never_overwrite() {
    let sender = rejecting_node().await;
    let receiver = accepting_node().await;
    let device = receiver.as_device("receiver");

    let first = random_bytes(32 * 1024);
    let second = random_bytes(32 * 1024);
    let src = sender.dir.path().join("x.txt");

    tokio::fs::write(&src, &first).await.unwrap();
    sender.client().send_file(&device, &src).await.unwrap();

    tokio::fs::write(&src, &second).await.unwrap();
    sender.client().send_file(&device, &src).await.unwrap();

    assert_eq!(
        tokio::fs::read(receiver.downloads().join("x.txt")).await.unwrap(),
        first,
        "original must be untouched"
    );
    assert_eq!(
        tokio::fs::read(receiver.downloads().join("x_1.txt")).await.unwrap(),
        second
    );
}

/// A deliberately wrong checksum in the offer: the receiver streams the
/// file, detects the mismatch, deletes the destination, and reports
/// FILE_ERROR.
#[tokio::test]
async fn poisoned_checksum_is_detected_and_discarded() {
    let receiver = accepting_node().await;
    let (mut reader, mut writer) = raw_session(&receiver).await;

    let payload = random_bytes(8 * 1024);
    wire::write_message(
        &mut writer,
        &Message::FileOffer {
            file: FileInfo {
                name: "poisoned.bin".into(),
                size: payload.len() as u64,
                path: "/nowhere/poisoned.bin".into(),
                checksum: Some("0".repeat(64)),
                is_dir: false,
            },
        },
    )
    .await
    .unwrap();
    assert!(matches!(
        wire::read_message(&mut reader).await.unwrap(),
        Some(Message::FileAccept)
    ));

    wire::write_message(
        &mut writer,
        &Message::FileChunk {
            size: payload.len() as u64,
        },
    )
    .await
    .unwrap();
    writer.write_all(&payload).await.unwrap();
    writer.flush().await.unwrap();

    match wire::read_message(&mut reader).await.unwrap() {
        Some(Message::FileError { error }) => assert!(error.contains("checksum")),
        other => panic!("expected FILE_ERROR, got {other:?}"),
    }

    // The destination was written and then deleted.
    let leftover = std::fs::read_dir(receiver.downloads())
        .map(|dir| dir.count())
        .unwrap_or(0);
    assert_eq!(leftover, 0, "no file may survive a checksum mismatch");
}

/// With auto-accept off and a rejecting hook, the sender observes
/// FILE_REJECT and fails.
#[tokio::test]
async fn rejected_offer_fails_the_send() {
    let sender = rejecting_node().await;
    let receiver = rejecting_node().await;

    let src = sender.dir.path().join("unwanted.txt");
    tokio::fs::write(&src, b"nope").await.unwrap();

    let err = sender
        .client()
        .send_file(&receiver.as_device("receiver"), &src)
        .await
        .expect_err("a declined offer must fail the send");
    assert!(err.to_string().contains("rejected"), "got: {err}");

    assert!(
        !receiver.downloads().join("unwanted.txt").exists(),
        "nothing may be written for a rejected offer"
    );
}

/// A frame with an unknown type tag is skipped and the session keeps
/// working.
#[tokio::test]
async fn unknown_message_type_is_ignored() {
    let node = rejecting_node().await;
    let (mut reader, mut writer) = raw_session(&node).await;

    let mystery = Frame {
        version: PROTOCOL_VERSION,
        type_tag: 77,
        payload: json!({ "mystery": true }),
    };
    writer.write_all(&mystery.encode().unwrap()).await.unwrap();
    writer.flush().await.unwrap();

    wire::write_message(&mut writer, &Message::Ping).await.unwrap();
    assert!(matches!(
        wire::read_message(&mut reader).await.unwrap(),
        Some(Message::Pong)
    ));
}

/// Listing and downloading against a live server: entries verbatim,
/// download byte-for-byte with both sides agreeing on the checksum.
#[tokio::test]
async fn remote_listing_and_download() {
    let server = rejecting_node().await;
    let caller = rejecting_node().await;
    let device = server.as_device("server");

    let shared = server.dir.path().join("shared");
    std::fs::create_dir_all(shared.join("sub")).unwrap();
    let payload = random_bytes(96 * 1024);
    std::fs::write(shared.join("data.bin"), &payload).unwrap();

    let listing = caller
        .client()
        .list(&device, &shared.to_string_lossy())
        .await
        .unwrap();
    assert_eq!(listing.entries.len(), 2);
    assert_eq!(listing.entries[0].name, "data.bin");
    assert_eq!(listing.entries[0].size, payload.len() as u64);
    assert!(listing.entries[1].is_dir);

    let dest = caller
        .client()
        .download(&device, &shared.join("data.bin").to_string_lossy())
        .await
        .unwrap();
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), payload);
    assert!(dest.starts_with(caller.downloads()));
}

/// Error frames for paths that do not exist, on both request kinds.
#[tokio::test]
async fn missing_paths_produce_error_frames() {
    let server = rejecting_node().await;
    let caller = rejecting_node().await;
    let device = server.as_device("server");

    let err = caller
        .client()
        .list(&device, "/definitely/not/here")
        .await
        .expect_err("listing a missing directory must fail");
    assert!(err.to_string().contains("directory not found"), "got: {err}");

    let err = caller
        .client()
        .download(&device, "/definitely/not/here.bin")
        .await
        .expect_err("downloading a missing file must fail");
    assert!(err.to_string().contains("file not found"), "got: {err}");
}

/// Ping succeeds only while the server is up.
#[tokio::test]
async fn ping_tracks_server_lifecycle() {
    let node = rejecting_node().await;
    let caller = rejecting_node().await;
    let device = node.as_device("server");

    assert!(caller.client().ping(&device).await);

    node.shutdown.send(()).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(!caller.client().ping(&device).await);
}
