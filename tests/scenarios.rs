//! End-to-end scenarios driving a full `Http2Layer` over in-memory
//! transports, playing both the downstream client and the upstream server
//! by hand so the wire bytes crossing the bridge can be asserted on.

use bytes::Bytes;
use rama_h2_bridge::config::Http2Config;
use rama_h2_bridge::frame::{self, flags, frame_type, Frame, FrameHead};
use rama_h2_bridge::headers::{Header, HeaderList};
use rama_h2_bridge::hpack::{HpackDecoder, HpackEncoder};
use rama_h2_bridge::{Http2Layer, PassthroughInspector};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a `RUST_LOG`-driven subscriber so a failing scenario can be
/// re-run with tracing visible. `try_init` rather than `init` since every
/// test in this binary calls it and only the first call may succeed.
fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer())
        .with(EnvFilter::from_default_env())
        .try_init();
}

async fn read_preface(server_side: &mut DuplexStream) {
    let mut buf = vec![0u8; frame::CONNECTION_PREFACE.len()];
    server_side.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, frame::CONNECTION_PREFACE);
}

/// Reads and discards the fixed SETTINGS + WINDOW_UPDATE pair every
/// bridged endpoint sends right after its half of the preface.
async fn drain_initial_settings(side: &mut DuplexStream) {
    match frame::read_frame(side).await.unwrap() {
        Frame::Settings { ack, .. } => assert!(!ack),
        other => panic!("expected initial SETTINGS, got {other:?}"),
    }
    match frame::read_frame(side).await.unwrap() {
        Frame::WindowUpdate { stream_id, .. } => assert_eq!(stream_id, 0),
        other => panic!("expected connection WINDOW_UPDATE, got {other:?}"),
    }
}

async fn write_headers_frame(
    side: &mut DuplexStream,
    encoder: &mut HpackEncoder,
    stream_id: u32,
    headers: &HeaderList,
    end_stream: bool,
) {
    let block = encoder.encode(headers);
    let mut flag_bits = flags::END_HEADERS;
    if end_stream {
        flag_bits |= flags::END_STREAM;
    }
    let head = FrameHead {
        length: block.len() as u32,
        kind: frame_type::HEADERS,
        flags: flag_bits,
        stream_id,
    };
    frame::write_raw_frame(side, head, &block).await.unwrap();
}

async fn write_data_frame(side: &mut DuplexStream, stream_id: u32, payload: &[u8], end_stream: bool) {
    let head = FrameHead {
        length: payload.len() as u32,
        kind: frame_type::DATA,
        flags: if end_stream { flags::END_STREAM } else { 0 },
        stream_id,
    };
    frame::write_raw_frame(side, head, payload).await.unwrap();
}

fn request_headers(method: &str, scheme: &str, path: &str) -> HeaderList {
    vec![
        Header::new(Bytes::from(":method"), Bytes::from(method.to_string())),
        Header::new(Bytes::from(":scheme"), Bytes::from(scheme.to_string())),
        Header::new(Bytes::from(":path"), Bytes::from(path.to_string())),
    ]
    .into_iter()
    .collect()
}

fn response_headers(status: u16) -> HeaderList {
    vec![Header::new(Bytes::from(":status"), Bytes::from(status.to_string()))]
        .into_iter()
        .collect()
}

#[tokio::test]
async fn get_request_with_no_body_round_trips() {
    init_tracing();
    let (mut client_side, client_transport) = duplex(16 * 1024);
    let (mut server_side, server_transport) = duplex(16 * 1024);

    let layer = Http2Layer::new(
        client_transport,
        server_transport,
        Http2Config::default(),
        PassthroughInspector,
    );
    let handle = tokio::spawn(layer.run());

    client_side.write_all(frame::CONNECTION_PREFACE).await.unwrap();
    read_preface(&mut server_side).await;

    drain_initial_settings(&mut client_side).await;
    drain_initial_settings(&mut server_side).await;

    let mut client_encoder = HpackEncoder::new();
    write_headers_frame(
        &mut client_side,
        &mut client_encoder,
        1,
        &request_headers("GET", "https", "/"),
        true,
    )
    .await;

    let mut server_decoder = HpackDecoder::new();
    match frame::read_frame(&mut server_side).await.unwrap() {
        Frame::Headers {
            stream_id,
            block_fragment,
            end_headers,
            end_stream,
        } => {
            assert_eq!(stream_id, 1);
            assert!(end_headers);
            assert!(end_stream);
            let headers = server_decoder.decode(&block_fragment).unwrap();
            assert_eq!(headers.pseudo(b":method").unwrap().as_ref(), b"GET");
            assert_eq!(headers.pseudo(b":path").unwrap().as_ref(), b"/");
        }
        other => panic!("expected request HEADERS, got {other:?}"),
    }

    let mut server_encoder = HpackEncoder::new();
    write_headers_frame(&mut server_side, &mut server_encoder, 1, &response_headers(200), true).await;

    let mut client_decoder = HpackDecoder::new();
    match frame::read_frame(&mut client_side).await.unwrap() {
        Frame::Headers {
            stream_id,
            block_fragment,
            end_stream,
            ..
        } => {
            assert_eq!(stream_id, 1);
            assert!(end_stream);
            let headers = client_decoder.decode(&block_fragment).unwrap();
            assert_eq!(headers.pseudo(b":status").unwrap().as_ref(), b"200");
        }
        other => panic!("expected response HEADERS, got {other:?}"),
    }

    drop(client_side);
    drop(server_side);
    handle.abort();
}

#[tokio::test]
async fn post_body_split_across_two_data_frames_is_reassembled() {
    init_tracing();
    let (mut client_side, client_transport) = duplex(16 * 1024);
    let (mut server_side, server_transport) = duplex(16 * 1024);

    let layer = Http2Layer::new(
        client_transport,
        server_transport,
        Http2Config::default(),
        PassthroughInspector,
    );
    let handle = tokio::spawn(layer.run());

    client_side.write_all(frame::CONNECTION_PREFACE).await.unwrap();
    read_preface(&mut server_side).await;
    drain_initial_settings(&mut client_side).await;
    drain_initial_settings(&mut server_side).await;

    let mut req_headers = request_headers("POST", "https", "/x");
    req_headers.push(Header::new(Bytes::from("content-length"), Bytes::from("10")));

    let mut client_encoder = HpackEncoder::new();
    write_headers_frame(&mut client_side, &mut client_encoder, 1, &req_headers, false).await;
    write_data_frame(&mut client_side, 1, b"HELLO", false).await;
    write_data_frame(&mut client_side, 1, b"WORLD", true).await;

    let mut server_decoder = HpackDecoder::new();
    match frame::read_frame(&mut server_side).await.unwrap() {
        Frame::Headers { block_fragment, end_stream, .. } => {
            assert!(!end_stream);
            let headers = server_decoder.decode(&block_fragment).unwrap();
            assert_eq!(headers.pseudo(b":method").unwrap().as_ref(), b"POST");
        }
        other => panic!("expected request HEADERS, got {other:?}"),
    }

    match frame::read_frame(&mut server_side).await.unwrap() {
        Frame::Data { payload, end_stream, stream_id } => {
            assert_eq!(stream_id, 1);
            assert!(end_stream);
            assert_eq!(&payload[..], b"HELLOWORLD");
        }
        other => panic!("expected a single reassembled DATA frame, got {other:?}"),
    }

    drop(client_side);
    drop(server_side);
    handle.abort();
}

#[tokio::test]
async fn two_interleaved_streams_do_not_cross_contaminate() {
    init_tracing();
    let (mut client_side, client_transport) = duplex(16 * 1024);
    let (mut server_side, server_transport) = duplex(16 * 1024);

    let layer = Http2Layer::new(
        client_transport,
        server_transport,
        Http2Config::default(),
        PassthroughInspector,
    );
    let handle = tokio::spawn(layer.run());

    client_side.write_all(frame::CONNECTION_PREFACE).await.unwrap();
    read_preface(&mut server_side).await;
    drain_initial_settings(&mut client_side).await;
    drain_initial_settings(&mut server_side).await;

    let mut client_encoder = HpackEncoder::new();
    write_headers_frame(&mut client_side, &mut client_encoder, 1, &request_headers("GET", "https", "/a"), false).await;
    write_headers_frame(&mut client_side, &mut client_encoder, 3, &request_headers("GET", "https", "/b"), false).await;
    write_data_frame(&mut client_side, 1, b"A", false).await;
    write_data_frame(&mut client_side, 3, b"B", false).await;
    write_data_frame(&mut client_side, 1, b"A2", true).await;
    write_data_frame(&mut client_side, 3, b"B2", true).await;

    let mut server_decoder = HpackDecoder::new();
    let mut bodies: std::collections::HashMap<u32, Vec<u8>> = std::collections::HashMap::new();
    let mut headers_seen = 0;
    loop {
        match frame::read_frame(&mut server_side).await.unwrap() {
            Frame::Headers { block_fragment, stream_id, .. } => {
                let _ = server_decoder.decode(&block_fragment).unwrap();
                bodies.entry(stream_id).or_default();
                headers_seen += 1;
            }
            Frame::Data { stream_id, payload, .. } => {
                bodies.entry(stream_id).or_default().extend_from_slice(&payload);
                let stream_1_done = bodies.get(&1).map(|b| b.as_slice()) == Some(b"AA2".as_slice());
                let stream_3_done = bodies.get(&3).map(|b| b.as_slice()) == Some(b"BB2".as_slice());
                if headers_seen == 2 && stream_1_done && stream_3_done {
                    break;
                }
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    assert_eq!(bodies.get(&1).unwrap(), b"AA2");
    assert_eq!(bodies.get(&3).unwrap(), b"BB2");

    drop(client_side);
    drop(server_side);
    handle.abort();
}

#[tokio::test]
async fn headers_split_across_continuation_is_reassembled() {
    init_tracing();
    let (mut client_side, client_transport) = duplex(16 * 1024);
    let (mut server_side, server_transport) = duplex(16 * 1024);

    let layer = Http2Layer::new(
        client_transport,
        server_transport,
        Http2Config::default(),
        PassthroughInspector,
    );
    let handle = tokio::spawn(layer.run());

    client_side.write_all(frame::CONNECTION_PREFACE).await.unwrap();
    read_preface(&mut server_side).await;
    drain_initial_settings(&mut client_side).await;
    drain_initial_settings(&mut server_side).await;

    let mut client_encoder = HpackEncoder::new();
    let block = client_encoder.encode(&request_headers("GET", "https", "/long/path/to/force/a/split"));
    assert!(block.len() > 4, "test fixture needs a block worth splitting");
    let (first, rest) = block.split_at(4);

    let head = FrameHead {
        length: first.len() as u32,
        kind: frame_type::HEADERS,
        flags: flags::END_STREAM,
        stream_id: 1,
    };
    frame::write_raw_frame(&mut client_side, head, first).await.unwrap();

    let head = FrameHead {
        length: rest.len() as u32,
        kind: frame_type::CONTINUATION,
        flags: flags::END_HEADERS,
        stream_id: 1,
    };
    frame::write_raw_frame(&mut client_side, head, rest).await.unwrap();

    let mut server_decoder = HpackDecoder::new();
    match frame::read_frame(&mut server_side).await.unwrap() {
        Frame::Headers { stream_id, block_fragment, end_headers, .. } => {
            assert_eq!(stream_id, 1);
            assert!(end_headers);
            let headers = server_decoder.decode(&block_fragment).unwrap();
            assert_eq!(
                headers.pseudo(b":path").unwrap().as_ref(),
                b"/long/path/to/force/a/split"
            );
        }
        other => panic!("expected reassembled request HEADERS, got {other:?}"),
    }

    drop(client_side);
    drop(server_side);
    handle.abort();
}

#[tokio::test]
async fn continuation_with_wrong_stream_id_is_connection_fatal() {
    init_tracing();
    let (mut client_side, client_transport) = duplex(16 * 1024);
    let (server_side, server_transport) = duplex(16 * 1024);

    let layer = Http2Layer::new(
        client_transport,
        server_transport,
        Http2Config::default(),
        PassthroughInspector,
    );
    let handle = tokio::spawn(layer.run());

    client_side.write_all(frame::CONNECTION_PREFACE).await.unwrap();
    drain_initial_settings(&mut client_side).await;

    let mut client_encoder = HpackEncoder::new();
    let block = client_encoder.encode(&request_headers("GET", "https", "/x"));
    let split_point = (block.len().saturating_sub(1)).max(1);
    let (first, rest) = block.split_at(split_point);

    let head = FrameHead {
        length: first.len() as u32,
        kind: frame_type::HEADERS,
        flags: 0,
        stream_id: 1,
    };
    frame::write_raw_frame(&mut client_side, head, first).await.unwrap();

    // CONTINUATION for a different stream id than the open run.
    let head = FrameHead {
        length: rest.len() as u32,
        kind: frame_type::CONTINUATION,
        flags: flags::END_HEADERS,
        stream_id: 3,
    };
    frame::write_raw_frame(&mut client_side, head, rest).await.unwrap();

    let err = handle.await.unwrap().unwrap_err();
    assert!(err.is_protocol_violation());
    drop(server_side);
}

#[tokio::test]
async fn peer_settings_frame_is_acknowledged() {
    init_tracing();
    let (mut client_side, client_transport) = duplex(16 * 1024);
    let (mut server_side, server_transport) = duplex(16 * 1024);

    let layer = Http2Layer::new(
        client_transport,
        server_transport,
        Http2Config::default(),
        PassthroughInspector,
    );
    let handle = tokio::spawn(layer.run());

    client_side.write_all(frame::CONNECTION_PREFACE).await.unwrap();
    read_preface(&mut server_side).await;
    drain_initial_settings(&mut client_side).await;
    drain_initial_settings(&mut server_side).await;

    let head = FrameHead {
        length: 6,
        kind: frame_type::SETTINGS,
        flags: 0,
        stream_id: 0,
    };
    let mut payload = Vec::new();
    payload.extend_from_slice(&frame::settings_id::MAX_FRAME_SIZE.to_be_bytes());
    payload.extend_from_slice(&65536u32.to_be_bytes());
    frame::write_raw_frame(&mut client_side, head, &payload).await.unwrap();

    match frame::read_frame(&mut client_side).await.unwrap() {
        Frame::Settings { ack, params } => {
            assert!(ack);
            assert!(params.is_empty());
        }
        other => panic!("expected a SETTINGS ACK, got {other:?}"),
    }

    drop(client_side);
    drop(server_side);
    handle.abort();
}

#[tokio::test]
async fn connect_method_fails_its_stream_but_the_connection_keeps_running() {
    init_tracing();
    let (mut client_side, client_transport) = duplex(16 * 1024);
    let (mut server_side, server_transport) = duplex(16 * 1024);

    let layer = Http2Layer::new(
        client_transport,
        server_transport,
        Http2Config::default(),
        PassthroughInspector,
    );
    let handle = tokio::spawn(layer.run());

    client_side.write_all(frame::CONNECTION_PREFACE).await.unwrap();
    read_preface(&mut server_side).await;
    drain_initial_settings(&mut client_side).await;
    drain_initial_settings(&mut server_side).await;

    let mut client_encoder = HpackEncoder::new();
    write_headers_frame(
        &mut client_side,
        &mut client_encoder,
        1,
        &request_headers("CONNECT", "https", "example.com:443"),
        true,
    )
    .await;

    // The CONNECT stream's worker rejects it as unsupported and exits
    // without ever forwarding anything to the server endpoint; a later,
    // unrelated stream on the same connection must still work.
    write_headers_frame(
        &mut client_side,
        &mut client_encoder,
        3,
        &request_headers("GET", "https", "/ok"),
        true,
    )
    .await;

    let mut server_decoder = HpackDecoder::new();
    match frame::read_frame(&mut server_side).await.unwrap() {
        Frame::Headers { stream_id, block_fragment, end_stream, .. } => {
            assert_eq!(stream_id, 3, "the rejected CONNECT stream must never reach the server");
            assert!(end_stream);
            let headers = server_decoder.decode(&block_fragment).unwrap();
            assert_eq!(headers.pseudo(b":path").unwrap().as_ref(), b"/ok");
        }
        other => panic!("expected the surviving stream's request HEADERS, got {other:?}"),
    }

    let mut server_encoder = HpackEncoder::new();
    write_headers_frame(&mut server_side, &mut server_encoder, 3, &response_headers(200), true).await;

    let mut client_decoder = HpackDecoder::new();
    match frame::read_frame(&mut client_side).await.unwrap() {
        Frame::Headers { stream_id, block_fragment, end_stream, .. } => {
            assert_eq!(stream_id, 3);
            assert!(end_stream);
            let headers = client_decoder.decode(&block_fragment).unwrap();
            assert_eq!(headers.pseudo(b":status").unwrap().as_ref(), b"200");
        }
        other => panic!("expected the surviving stream's response HEADERS, got {other:?}"),
    }

    drop(client_side);
    drop(server_side);
    handle.abort();
}

#[tokio::test]
async fn request_missing_path_fails_its_stream_but_the_connection_keeps_running() {
    init_tracing();
    let (mut client_side, client_transport) = duplex(16 * 1024);
    let (mut server_side, server_transport) = duplex(16 * 1024);

    let layer = Http2Layer::new(
        client_transport,
        server_transport,
        Http2Config::default(),
        PassthroughInspector,
    );
    let handle = tokio::spawn(layer.run());

    client_side.write_all(frame::CONNECTION_PREFACE).await.unwrap();
    read_preface(&mut server_side).await;
    drain_initial_settings(&mut client_side).await;
    drain_initial_settings(&mut server_side).await;

    let malformed: HeaderList = vec![
        Header::new(Bytes::from(":method"), Bytes::from("GET")),
        Header::new(Bytes::from(":scheme"), Bytes::from("https")),
    ]
    .into_iter()
    .collect();

    let mut client_encoder = HpackEncoder::new();
    write_headers_frame(&mut client_side, &mut client_encoder, 1, &malformed, true).await;

    // As above: the malformed stream's worker rejects it before it ever
    // reaches the server endpoint, and a later well-formed stream proves
    // the connection is still being driven normally.
    write_headers_frame(
        &mut client_side,
        &mut client_encoder,
        3,
        &request_headers("GET", "https", "/ok"),
        true,
    )
    .await;

    let mut server_decoder = HpackDecoder::new();
    match frame::read_frame(&mut server_side).await.unwrap() {
        Frame::Headers { stream_id, block_fragment, end_stream, .. } => {
            assert_eq!(stream_id, 3, "the rejected malformed stream must never reach the server");
            assert!(end_stream);
            let headers = server_decoder.decode(&block_fragment).unwrap();
            assert_eq!(headers.pseudo(b":path").unwrap().as_ref(), b"/ok");
        }
        other => panic!("expected the surviving stream's request HEADERS, got {other:?}"),
    }

    drop(client_side);
    drop(server_side);
    handle.abort();
}

#[tokio::test]
async fn cancellation_tears_down_both_endpoints_and_unblocks_the_stream_worker() {
    init_tracing();
    let (mut client_side, client_transport) = duplex(16 * 1024);
    let (mut server_side, server_transport) = duplex(16 * 1024);

    let cancellation = CancellationToken::new();
    let layer = Http2Layer::with_cancellation(
        client_transport,
        server_transport,
        Http2Config::default(),
        PassthroughInspector,
        cancellation.clone(),
    );
    let handle = tokio::spawn(layer.run());

    client_side.write_all(frame::CONNECTION_PREFACE).await.unwrap();
    read_preface(&mut server_side).await;
    drain_initial_settings(&mut client_side).await;
    drain_initial_settings(&mut server_side).await;

    let mut client_encoder = HpackEncoder::new();
    write_headers_frame(
        &mut client_side,
        &mut client_encoder,
        1,
        &request_headers("GET", "https", "/"),
        true,
    )
    .await;

    // Let the stream worker forward the request and start blocking on the
    // server's response, so cancellation has to interrupt real in-flight
    // work, not an idle connection.
    match frame::read_frame(&mut server_side).await.unwrap() {
        Frame::Headers { stream_id, .. } => assert_eq!(stream_id, 1),
        other => panic!("expected the forwarded request HEADERS, got {other:?}"),
    }

    cancellation.cancel();

    let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("run() must return promptly once cancelled, not hang on the orphaned worker")
        .unwrap();
    assert!(result.is_ok());

    // The client-facing writer was shut down as part of teardown, so the
    // client side now observes EOF instead of ever getting a response.
    let mut probe = [0u8; 1];
    let n = tokio::time::timeout(std::time::Duration::from_secs(1), client_side.read(&mut probe))
        .await
        .expect("reading after teardown must not hang")
        .unwrap();
    assert_eq!(n, 0, "client-facing writer should have been shut down on cancellation");

    drop(server_side);
}

#[tokio::test]
async fn bad_preface_fails_without_sending_settings() {
    init_tracing();
    let (mut client_side, client_transport) = duplex(4096);
    let (_server_side, server_transport) = duplex(4096);

    let mut layer = Http2Layer::new(
        client_transport,
        server_transport,
        Http2Config::default(),
        PassthroughInspector,
    );

    client_side
        .write_all(b"PRX * HTTP/2.0\r\n\r\nSM\r\n\r\n")
        .await
        .unwrap();

    let err = layer.perform_prefaces().await.unwrap_err();
    assert!(err.is_bad_preface());

    // Nothing should have been written back to the client.
    let mut probe = [0u8; 1];
    let res = tokio::time::timeout(std::time::Duration::from_millis(50), client_side.read(&mut probe)).await;
    assert!(res.is_err(), "expected no bytes to be sent back after a bad preface");
}
