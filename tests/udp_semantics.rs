use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;

use slotd::client::{Client, Outcome};
use slotd::engine::Engine;
use slotd::model::WallClock;
use slotd::monitor::MonitorRegistry;
use slotd::processor::Processor;
use slotd::proto::{
    self, CallbackPayload, OpCode, QueryReply, Request, ResponseCode, Semantic,
};
use slotd::server::{Policy, Server, ServerConfig};

// ── Test infrastructure ──────────────────────────────────────

async fn start_server_with(
    policy: Policy,
    reply_loss_rate: f64,
    cache_ttl: Duration,
) -> (SocketAddr, Arc<Engine>) {
    let engine = Arc::new(Engine::new());
    engine.ensure_facility("RoomA").await;
    engine.ensure_facility("RoomB").await;
    let monitors = Arc::new(MonitorRegistry::new());

    let config = ServerConfig {
        port: 0,
        policy,
        loss_rate: 0.0,
        reply_loss_rate,
        delay: Duration::ZERO,
        cache_ttl,
    };
    let server = Server::bind(&config, Processor::new(engine.clone(), monitors))
        .await
        .unwrap();
    let port = server.local_addr().unwrap().port();
    tokio::spawn(async move {
        let _ = server.run().await;
    });

    (SocketAddr::from(([127, 0, 0, 1], port)), engine)
}

async fn start_server(policy: Policy) -> (SocketAddr, Arc<Engine>) {
    start_server_with(policy, 0.0, Duration::from_secs(300)).await
}

async fn connect(server: SocketAddr) -> Client {
    let mut client = Client::connect(server, 0).await.unwrap();
    client.set_timeout(Duration::from_millis(500));
    client
}

fn reply_of(outcome: Outcome) -> slotd::proto::Response {
    match outcome {
        Outcome::Reply(rsp) => rsp,
        Outcome::TimedOut { attempts } => panic!("timed out after {attempts} attempts"),
    }
}

async fn raw_socket() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

/// Send one frame and return the raw reply bytes.
async fn send_recv_raw(socket: &UdpSocket, server: SocketAddr, frame: &Bytes) -> Vec<u8> {
    socket.send_to(frame, server).await.unwrap();
    let mut buf = vec![0u8; 65_535];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("no reply within 2s")
        .unwrap();
    buf[..len].to_vec()
}

fn op_b_frame(request_id: u32, facility: &str) -> Bytes {
    proto::encode_request(&Request {
        request_id,
        op: OpCode::OpB,
        semantic: Semantic::Default,
        payload: proto::encode_optional_name(Some(facility)).unwrap(),
    })
}

// ── Scenario 1: basic BOOK + QUERY ───────────────────────────

#[tokio::test]
async fn book_then_query_sees_the_interval() {
    let (server, _engine) = start_server(Policy::AtMostOnce).await;
    let client = connect(server).await;

    let rsp = reply_of(
        client
            .book("RoomA", WallClock::new(0, 9, 0), WallClock::new(0, 11, 0))
            .await
            .unwrap(),
    );
    assert_eq!(rsp.code, ResponseCode::Ok);
    let cid = proto::decode_confirmation_id(&rsp.payload).unwrap();
    assert!(cid >= 1);

    let rsp = reply_of(client.query("RoomA", vec![0]).await.unwrap());
    assert_eq!(rsp.code, ResponseCode::Ok);
    let reply = QueryReply::decode(&rsp.payload).unwrap();
    assert_eq!(reply.days.len(), 1);
    assert_eq!(reply.days[0].day, 0);
    assert_eq!(reply.days[0].intervals, vec![(540, 660)]); // 09:00..11:00
}

// ── Scenario 2: CHANGE with conflict ─────────────────────────

#[tokio::test]
async fn change_conflict_leaves_state_unchanged() {
    let (server, _engine) = start_server(Policy::AtMostOnce).await;
    let client = connect(server).await;

    let b1 = proto::decode_confirmation_id(
        &reply_of(
            client
                .book("RoomA", WallClock::new(0, 9, 0), WallClock::new(0, 10, 0))
                .await
                .unwrap(),
        )
        .payload,
    )
    .unwrap();
    reply_of(
        client
            .book("RoomA", WallClock::new(0, 10, 0), WallClock::new(0, 11, 0))
            .await
            .unwrap(),
    );

    let rsp = reply_of(client.change(b1, 15).await.unwrap());
    assert_eq!(rsp.code, ResponseCode::ErrConflict);

    let rsp = reply_of(client.query("RoomA", vec![0]).await.unwrap());
    let reply = QueryReply::decode(&rsp.payload).unwrap();
    assert_eq!(reply.days[0].intervals, vec![(540, 600), (600, 660)]);
}

// ── Scenarios 3 & 4: invocation semantics ────────────────────

#[tokio::test]
async fn at_least_once_executes_every_retransmission() {
    let (server, engine) = start_server(Policy::AtLeastOnce).await;
    let socket = raw_socket().await;

    let frame = op_b_frame(0x5151_5151, "RoomA");
    let mut replies = Vec::new();
    for _ in 0..3 {
        replies.push(send_recv_raw(&socket, server, &frame).await);
    }

    // every duplicate executed: three distinct 1-minute bookings
    assert_eq!(engine.booking_count("RoomA").await, Some(3));
    // and three distinct confirmation ids went back
    let ids: Vec<u32> = replies
        .iter()
        .map(|raw| {
            let rsp = proto::decode_response(raw).unwrap();
            assert_eq!(rsp.code, ResponseCode::Ok);
            proto::decode_confirmation_id(&rsp.payload).unwrap()
        })
        .collect();
    assert_ne!(ids[0], ids[1]);
    assert_ne!(ids[1], ids[2]);
}

#[tokio::test]
async fn at_most_once_suppresses_retransmissions() {
    let (server, engine) = start_server(Policy::AtMostOnce).await;
    let socket = raw_socket().await;

    let frame = op_b_frame(0x6262_6262, "RoomA");
    let mut replies = Vec::new();
    for _ in 0..3 {
        replies.push(send_recv_raw(&socket, server, &frame).await);
    }

    assert_eq!(engine.booking_count("RoomA").await, Some(1));
    assert_eq!(replies[0], replies[1], "cached replies must be byte-identical");
    assert_eq!(replies[1], replies[2]);
}

#[tokio::test]
async fn at_most_once_rebound_port_is_a_new_principal() {
    let (server, engine) = start_server(Policy::AtMostOnce).await;
    let frame = op_b_frame(0x7373_7373, "RoomA");

    // same request id, two source ports: both execute
    let first = raw_socket().await;
    let second = raw_socket().await;
    send_recv_raw(&first, server, &frame).await;
    send_recv_raw(&second, server, &frame).await;

    assert_eq!(engine.booking_count("RoomA").await, Some(2));
}

#[tokio::test]
async fn at_most_once_distinct_request_ids_both_execute() {
    let (server, engine) = start_server(Policy::AtMostOnce).await;
    let socket = raw_socket().await;

    send_recv_raw(&socket, server, &op_b_frame(1001, "RoomA")).await;
    send_recv_raw(&socket, server, &op_b_frame(1002, "RoomA")).await;

    assert_eq!(engine.booking_count("RoomA").await, Some(2));
}

#[tokio::test]
async fn at_most_once_cache_expiry_allows_reexecution() {
    let (server, engine) = start_server_with(
        Policy::AtMostOnce,
        0.0,
        Duration::from_millis(50),
    )
    .await;
    let socket = raw_socket().await;

    let frame = op_b_frame(0x0808_0808, "RoomA");
    send_recv_raw(&socket, server, &frame).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    send_recv_raw(&socket, server, &frame).await;

    // TTL elapsed between the retransmissions, so both executed
    assert_eq!(engine.booking_count("RoomA").await, Some(2));
}

// ── Retransmission under total reply loss ────────────────────

#[tokio::test]
async fn lost_replies_amplify_effects_under_at_least_once() {
    let (server, engine) =
        start_server_with(Policy::AtLeastOnce, 1.0, Duration::from_secs(300)).await;
    let mut client = Client::connect(server, 0).await.unwrap();
    client.set_timeout(Duration::from_millis(100));
    client.set_retries(2);

    let outcome = client.op_b(Some("RoomA")).await.unwrap();
    assert_eq!(outcome, Outcome::TimedOut { attempts: 3 });

    // every retransmission executed even though no reply ever arrived
    assert_eq!(engine.booking_count("RoomA").await, Some(3));
}

#[tokio::test]
async fn lost_replies_do_not_amplify_under_at_most_once() {
    let (server, engine) =
        start_server_with(Policy::AtMostOnce, 1.0, Duration::from_secs(300)).await;
    let mut client = Client::connect(server, 0).await.unwrap();
    client.set_timeout(Duration::from_millis(100));
    client.set_retries(2);

    let outcome = client.op_b(Some("RoomA")).await.unwrap();
    assert_eq!(outcome, Outcome::TimedOut { attempts: 3 });

    assert_eq!(engine.booking_count("RoomA").await, Some(1));
}

// ── Scenario 5: monitor callbacks ────────────────────────────

#[tokio::test]
async fn monitor_receives_callbacks_for_book_and_change() {
    let (server, _engine) = start_server(Policy::AtMostOnce).await;
    let watcher = connect(server).await;
    let booker = connect(server).await;

    let rsp = reply_of(watcher.register_monitor("RoomB", 120).await.unwrap());
    assert_eq!(rsp.code, ResponseCode::Ok);

    let cid = proto::decode_confirmation_id(
        &reply_of(
            booker
                .book("RoomB", WallClock::new(1, 14, 0), WallClock::new(1, 16, 0))
                .await
                .unwrap(),
        )
        .payload,
    )
    .unwrap();
    reply_of(booker.change(cid, 30).await.unwrap());

    let mut updates: Vec<CallbackPayload> = Vec::new();
    watcher
        .monitor_wait(Duration::from_millis(500), |cb| updates.push(cb))
        .await
        .unwrap();

    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].facility, "RoomB");
    // Tue 14:00..16:00
    assert_eq!(updates[0].segments[0].start, 1440 + 840);
    assert_eq!(updates[0].segments[0].end, 1440 + 960);
    // after CHANGE(+30): Tue 14:30..16:30
    assert_eq!(updates[1].segments[0].start, 1440 + 870);
    assert_eq!(updates[1].segments[0].end, 1440 + 990);
}

#[tokio::test]
async fn non_watchers_get_no_callbacks() {
    let (server, _engine) = start_server(Policy::AtMostOnce).await;
    let watcher = connect(server).await;
    let booker = connect(server).await;

    reply_of(watcher.register_monitor("RoomB", 120).await.unwrap());
    // mutation on a facility nobody watches
    reply_of(
        booker
            .book("RoomA", WallClock::new(0, 9, 0), WallClock::new(0, 10, 0))
            .await
            .unwrap(),
    );

    let mut updates = 0usize;
    watcher
        .monitor_wait(Duration::from_millis(300), |_| updates += 1)
        .await
        .unwrap();
    assert_eq!(updates, 0);
}

#[tokio::test]
async fn expired_monitor_registration_stops_callbacks() {
    let (server, _engine) = start_server(Policy::AtMostOnce).await;
    let watcher = connect(server).await;
    let booker = connect(server).await;

    reply_of(watcher.register_monitor("RoomB", 0).await.unwrap());
    tokio::time::sleep(Duration::from_millis(50)).await;
    reply_of(
        booker
            .book("RoomB", WallClock::new(0, 9, 0), WallClock::new(0, 10, 0))
            .await
            .unwrap(),
    );

    let mut updates = 0usize;
    watcher
        .monitor_wait(Duration::from_millis(300), |_| updates += 1)
        .await
        .unwrap();
    assert_eq!(updates, 0);
}

// ── Scenario 6: invalid frames ───────────────────────────────

#[tokio::test]
async fn oversized_payload_length_answered_with_request_id_zero() {
    let (server, _engine) = start_server(Policy::AtMostOnce).await;
    let socket = raw_socket().await;

    // header claiming a 1,000,000-byte payload on a 10-byte datagram
    let mut frame = Vec::new();
    frame.extend_from_slice(&0xAABB_CCDDu32.to_be_bytes());
    frame.push(OpCode::OpA as u8);
    frame.push(0);
    frame.extend_from_slice(&1_000_000u32.to_be_bytes());

    let raw = send_recv_raw(&socket, server, &Bytes::from(frame)).await;
    let rsp = proto::decode_response(&raw).unwrap();
    assert_eq!(rsp.request_id, 0);
    assert_eq!(rsp.code, ResponseCode::ErrInvalid);
    assert!(String::from_utf8_lossy(&rsp.payload).starts_with("bad request"));

    // the server keeps serving afterwards
    let client = connect(server).await;
    let rsp = reply_of(client.op_a(None).await.unwrap());
    assert_eq!(rsp.code, ResponseCode::Ok);
}

#[tokio::test]
async fn unknown_op_code_is_invalid() {
    let (server, _engine) = start_server(Policy::AtMostOnce).await;
    let socket = raw_socket().await;

    let mut frame = proto::encode_request(&Request {
        request_id: 9,
        op: OpCode::OpA,
        semantic: Semantic::Default,
        payload: Bytes::new(),
    })
    .to_vec();
    frame[4] = 42; // not a defined op code

    let raw = send_recv_raw(&socket, server, &Bytes::from(frame)).await;
    let rsp = proto::decode_response(&raw).unwrap();
    assert_eq!(rsp.request_id, 0);
    assert_eq!(rsp.code, ResponseCode::ErrInvalid);
}

#[tokio::test]
async fn runt_datagram_is_invalid() {
    let (server, _engine) = start_server(Policy::AtMostOnce).await;
    let socket = raw_socket().await;

    let raw = send_recv_raw(&socket, server, &Bytes::from_static(&[1, 2, 3])).await;
    let rsp = proto::decode_response(&raw).unwrap();
    assert_eq!(rsp.request_id, 0);
    assert_eq!(rsp.code, ResponseCode::ErrInvalid);
}

// ── Error taxonomy over the wire ─────────────────────────────

#[tokio::test]
async fn unknown_facility_is_not_found() {
    let (server, _engine) = start_server(Policy::AtMostOnce).await;
    let client = connect(server).await;

    let rsp = reply_of(client.query("Basement", vec![]).await.unwrap());
    assert_eq!(rsp.code, ResponseCode::ErrNotFound);
    assert!(String::from_utf8_lossy(&rsp.payload).contains("Basement"));
}

#[tokio::test]
async fn out_of_range_day_is_invalid() {
    let (server, _engine) = start_server(Policy::AtMostOnce).await;
    let client = connect(server).await;

    let rsp = reply_of(client.query("RoomA", vec![9]).await.unwrap());
    assert_eq!(rsp.code, ResponseCode::ErrInvalid);
}

#[tokio::test]
async fn booking_across_midnight_splits_in_query() {
    let (server, _engine) = start_server(Policy::AtMostOnce).await;
    let client = connect(server).await;

    reply_of(
        client
            .book("RoomA", WallClock::new(2, 23, 30), WallClock::new(3, 0, 30))
            .await
            .unwrap(),
    );
    let rsp = reply_of(client.query("RoomA", vec![2, 3]).await.unwrap());
    let reply = QueryReply::decode(&rsp.payload).unwrap();
    assert_eq!(reply.days[0].day, 2);
    assert_eq!(reply.days[0].intervals, vec![(1410, 1440)]);
    assert_eq!(reply.days[1].day, 3);
    assert_eq!(reply.days[1].intervals, vec![(0, 30)]);
}
