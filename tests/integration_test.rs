// tests/integration_test.rs

//! End-to-end scenarios over real loopback UDP sockets: upstream fan-out
//! with acknowledgement tracking, downstream scheduling, autoquit, the
//! status stream and the concentrator reset watchdog.

mod common;

use std::time::Duration;

use serde_json::json;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

use lorafwd::core::downstream::DownstreamWorker;
use lorafwd::core::protocol::header::{Command, Header, PROTOCOL_VERSION};
use lorafwd::core::state::ExitReason;
use lorafwd::core::tasks::stats::StatsReporter;
use lorafwd::core::upstream::UpstreamWorker;
use lorafwd::hal::ghost::{GhostListener, GhostStream};
use lorafwd::hal::{CrcStatus, DataRate, TxMode};

/// A server-side socket plus a gateway-side socket connected to it.
async fn connected_pair() -> (UdpSocket, UdpSocket) {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let gateway = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    gateway.connect(server.local_addr().unwrap()).await.unwrap();
    (server, gateway)
}

#[tokio::test]
async fn test_upstream_push_data_and_ack() {
    let (state, _exit_rx, log) = common::test_state(
        common::gateway_conf(json!({ "gateway_ID": "AA555A0000000101", "push_timeout_ms": 400 })),
        vec![common::loopback_server()],
    );
    let (srv_up, gw_up) = connected_pair().await;
    let (_srv_down, gw_down) = connected_pair().await;
    state.links[0].publish(gw_up, gw_down);
    state.registry.set_started(0);

    log.lock()
        .rx_queue
        .push_back(common::lora_packet(1000, vec![0x00, 0xFF, 0x10]));

    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = tokio::spawn(UpstreamWorker::new(state.clone()).run(shutdown_tx.subscribe()));

    let mut buf = [0u8; 4096];
    let (len, peer) = timeout(Duration::from_secs(2), srv_up.recv_from(&mut buf))
        .await
        .expect("PUSH_DATA expected")
        .unwrap();
    let header = Header::parse(&buf[..len]).unwrap();
    assert_eq!(header.command, Command::PushData);
    assert_eq!(&buf[4..12], &0xAA55_5A00_0000_0101u64.to_be_bytes());

    let body: serde_json::Value = serde_json::from_slice(&buf[12..len]).unwrap();
    assert_eq!(body["rxpk"][0]["tmst"], 1000);
    assert_eq!(body["rxpk"][0]["data"], "AP8Q");
    assert_eq!(body["rxpk"][0]["stat"], 1);
    assert!(body.get("stat").is_none());

    // acknowledge twice with the same token; only one ACK may count
    let ack = [PROTOCOL_VERSION, buf[1], buf[2], 0x01];
    srv_up.send_to(&ack, peer).await.unwrap();
    srv_up.send_to(&ack, peer).await.unwrap();

    sleep(Duration::from_millis(300)).await;
    {
        let meas = state.meas_up.lock();
        assert_eq!(meas.nb_rx_rcv, 1);
        assert_eq!(meas.nb_rx_ok, 1);
        assert_eq!(meas.pkt_fwd, 1);
        assert_eq!(meas.dgram_sent, 1);
        assert_eq!(meas.ack_rcv, 1);
    }

    shutdown_tx.send(()).unwrap();
    timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker must stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_upstream_filters_crc_bad_by_default() {
    let (state, _exit_rx, log) = common::test_state(
        common::gateway_conf(json!({})),
        vec![common::loopback_server()],
    );
    let (srv_up, gw_up) = connected_pair().await;
    let (_srv_down, gw_down) = connected_pair().await;
    state.links[0].publish(gw_up, gw_down);
    state.registry.set_started(0);

    let mut packet = common::lora_packet(2000, vec![0xAB]);
    packet.crc = CrcStatus::Bad;
    log.lock().rx_queue.push_back(packet);

    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = tokio::spawn(UpstreamWorker::new(state.clone()).run(shutdown_tx.subscribe()));

    // the filtered packet must not produce any datagram
    let mut buf = [0u8; 256];
    let res = timeout(Duration::from_millis(400), srv_up.recv_from(&mut buf)).await;
    assert!(res.is_err(), "no datagram expected for a filtered packet");
    {
        let meas = state.meas_up.lock();
        assert_eq!(meas.nb_rx_rcv, 1);
        assert_eq!(meas.nb_rx_bad, 1);
        assert_eq!(meas.pkt_fwd, 0);
        assert_eq!(meas.dgram_sent, 0);
    }

    shutdown_tx.send(()).unwrap();
    timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker must stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_upstream_fetch_error_is_fatal() {
    let (state, _exit_rx, log) = common::test_state(
        common::gateway_conf(json!({})),
        vec![common::loopback_server()],
    );
    let (_srv_up, gw_up) = connected_pair().await;
    let (_srv_down, gw_down) = connected_pair().await;
    state.links[0].publish(gw_up, gw_down);
    state.registry.set_started(0);
    log.lock().fail_receive = true;

    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = tokio::spawn(UpstreamWorker::new(state.clone()).run(shutdown_tx.subscribe()));

    let res = timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker must fail fast")
        .unwrap();
    let err = res.expect_err("a fetch error is fatal");
    assert!(err.to_string().contains("failed packet fetch"), "{err}");
    drop(shutdown_tx);
}

#[tokio::test]
async fn test_downstream_pull_resp_schedules_tx() {
    let (state, _exit_rx, log) = common::test_state(
        common::gateway_conf(json!({ "keepalive_interval": 5 })),
        vec![common::loopback_server()],
    );
    let (_srv_up, gw_up) = connected_pair().await;
    let (srv_down, gw_down) = connected_pair().await;
    state.links[0].publish(gw_up, gw_down);
    state.registry.set_started(0);

    let (shutdown_tx, _) = broadcast::channel(1);
    let handle =
        tokio::spawn(DownstreamWorker::new(state.clone(), 0).run(shutdown_tx.subscribe()));

    let mut buf = [0u8; 1024];
    let (len, peer) = timeout(Duration::from_secs(2), srv_down.recv_from(&mut buf))
        .await
        .expect("PULL_DATA expected")
        .unwrap();
    assert_eq!(len, 12);
    let header = Header::parse(&buf[..len]).unwrap();
    assert_eq!(header.command, Command::PullData);

    // a duplicate PULL_ACK with the same token must not count twice
    let ack = [PROTOCOL_VERSION, buf[1], buf[2], 0x04];
    srv_down.send_to(&ack, peer).await.unwrap();
    srv_down.send_to(&ack, peer).await.unwrap();

    // immediate FSK downlink request
    let mut resp = vec![PROTOCOL_VERSION, 0x00, 0x00, 0x03];
    resp.extend_from_slice(
        br#"{"txpk":{"imme":true,"freq":868.3,"rfch":0,"modu":"FSK","datr":50000,"fdev":25000,"size":4,"data":"AQIDBA=="}}"#,
    );
    srv_down.send_to(&resp, peer).await.unwrap();

    sleep(Duration::from_millis(400)).await;
    {
        let log = log.lock();
        assert_eq!(log.sent.len(), 1);
        let pkt = &log.sent[0];
        assert_eq!(pkt.mode, TxMode::Immediate);
        assert_eq!(pkt.datarate, DataRate::Fsk(50_000));
        assert_eq!(pkt.f_dev_khz, 25);
        assert_eq!(pkt.payload, vec![0x01, 0x02, 0x03, 0x04]);
    }
    {
        let meas = state.meas_dw.lock();
        assert_eq!(meas.pull_sent, 1);
        assert_eq!(meas.ack_rcv, 1);
        assert_eq!(meas.dgram_rcv, 1);
        assert_eq!(meas.nb_tx_ok, 1);
        assert_eq!(meas.nb_tx_fail, 0);
    }

    // a malformed PULL_RESP is dropped without touching the TX counters
    let mut bad = vec![PROTOCOL_VERSION, 0x00, 0x01, 0x03];
    bad.extend_from_slice(br#"{"txpk":{"imme":true}"#);
    srv_down.send_to(&bad, peer).await.unwrap();
    sleep(Duration::from_millis(300)).await;
    {
        let meas = state.meas_dw.lock();
        assert_eq!(meas.dgram_rcv, 1);
        assert_eq!(meas.nb_tx_ok + meas.nb_tx_fail, 1);
    }

    shutdown_tx.send(()).unwrap();
    timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker must stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_downstream_autoquit_requests_exit() {
    let (state, mut exit_rx, _log) = common::test_state(
        common::gateway_conf(json!({ "keepalive_interval": 0, "autoquit_threshold": 3 })),
        vec![common::loopback_server()],
    );
    let (_srv_up, gw_up) = connected_pair().await;
    let (_srv_down, gw_down) = connected_pair().await;
    state.links[0].publish(gw_up, gw_down);
    state.registry.set_started(0);

    let (shutdown_tx, _) = broadcast::channel(1);
    let handle =
        tokio::spawn(DownstreamWorker::new(state.clone(), 0).run(shutdown_tx.subscribe()));

    let reason = timeout(Duration::from_secs(2), exit_rx.recv())
        .await
        .expect("exit must be requested")
        .unwrap();
    assert_eq!(reason, ExitReason::Autoquit);
    assert_eq!(state.meas_dw.lock().pull_sent, 3);

    timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker must stop")
        .unwrap()
        .unwrap();
    drop(shutdown_tx);
}

#[tokio::test]
async fn test_status_report_travels_without_radio() {
    let (state, _exit_rx, log) = common::test_state(
        common::gateway_conf(json!({
            "gateway_ID": "0000000000000042",
            "radiostream": false,
            "stat_interval": 1,
            "platform": "test rig"
        })),
        vec![common::loopback_server()],
    );
    let (srv_up, gw_up) = connected_pair().await;
    let (_srv_down, gw_down) = connected_pair().await;
    state.links[0].publish(gw_up, gw_down);
    state.registry.set_started(0);

    let (shutdown_tx, _) = broadcast::channel(1);
    let up_handle = tokio::spawn(UpstreamWorker::new(state.clone()).run(shutdown_tx.subscribe()));
    let stats_handle =
        tokio::spawn(StatsReporter::new(state.clone()).run(shutdown_tx.subscribe()));

    let mut buf = [0u8; 4096];
    let (len, _peer) = timeout(Duration::from_secs(3), srv_up.recv_from(&mut buf))
        .await
        .expect("status datagram expected")
        .unwrap();
    let header = Header::parse(&buf[..len]).unwrap();
    assert_eq!(header.command, Command::PushData);

    let body: serde_json::Value = serde_json::from_slice(&buf[12..len]).unwrap();
    assert!(body.get("rxpk").is_none(), "{body}");
    let stat = body.get("stat").expect("stat object expected");
    assert_eq!(stat["rxnb"], 0);
    assert_eq!(stat["rxfw"], 0);
    assert_eq!(stat["dwnb"], 0);
    assert_eq!(stat["pfrm"], "test rig");
    assert!(stat.get("lati").is_none());

    // with the radio stream disabled, no concentrator call may happen
    {
        let log = log.lock();
        assert_eq!(log.receive_calls, 0);
        assert!(!log.started);
    }

    shutdown_tx.send(()).unwrap();
    timeout(Duration::from_secs(2), up_handle)
        .await
        .expect("worker must stop")
        .unwrap()
        .unwrap();
    timeout(Duration::from_secs(2), stats_handle)
        .await
        .expect("reporter must stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_concentrator_reset_sentinel_is_fatal() {
    let (state, _exit_rx, log) = common::test_state(
        common::gateway_conf(json!({ "stat_interval": 1 })),
        vec![common::loopback_server()],
    );
    log.lock().trig_cnt = 0x7E00_0000;

    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = tokio::spawn(StatsReporter::new(state.clone()).run(shutdown_tx.subscribe()));

    let res = timeout(Duration::from_secs(3), handle)
        .await
        .expect("reporter must fail on the sentinel")
        .unwrap();
    let err = res.expect_err("a concentrator reset is fatal");
    assert!(err.to_string().contains("concentrator reset"), "{err}");
    drop(shutdown_tx);
}

#[tokio::test]
async fn test_ghost_listener_feeds_the_stream() {
    let stream = GhostStream::new();
    let listener = GhostListener::bind("127.0.0.1", 0, stream.clone())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = tokio::spawn(listener.run(shutdown_tx.subscribe()));

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let frame = json!({
        "tmst": 7777,
        "chan": 0,
        "rfch": 0,
        "freq": 868.5,
        "stat": 1,
        "modu": "LORA",
        "datr": "SF8BW125",
        "codr": "4/5",
        "lsnr": 5.0,
        "rssi": -90,
        "size": 2,
        "data": "qlU="
    });
    sender
        .send_to(frame.to_string().as_bytes(), addr)
        .await
        .unwrap();
    // garbage datagrams are dropped without killing the listener
    sender.send_to(b"not json", addr).await.unwrap();

    sleep(Duration::from_millis(300)).await;
    let packets = stream.fetch(8);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].count_us, 7777);
    assert_eq!(packets[0].payload, vec![0xAA, 0x55]);

    shutdown_tx.send(()).unwrap();
    timeout(Duration::from_secs(2), handle)
        .await
        .expect("listener must stop")
        .unwrap();
}
