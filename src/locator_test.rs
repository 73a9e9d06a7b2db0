use std::collections::HashMap;

use tokio::net::TcpListener;
use tokio::time::timeout;

use super::*;
use crate::test_helpers::{Peer, WAIT, connected_pair};

fn reply(port: u16) -> ((&'static str, u16), i64, HashMap<u64, &'static str>) {
    (("127.0.0.1", port), 0, HashMap::from([(0, "enqueue_old"), (5, "enqueue")]))
}

/// Locator on a real TCP port answering a single resolve.
async fn spawn_tcp_locator(port: u16) -> (String, tokio::task::JoinHandle<Call>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut peer = Peer::new(stream);
        let call = peer.next_call().await.expect("resolve call");
        peer.chunk(call.session, &reply(port)).await;
        peer.choke(call.session).await;
        call
    });
    (addr, handle)
}

async fn dead_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    drop(listener);
    addr
}

#[tokio::test]
async fn resolve_over_sends_request_and_inverts_method_table() {
    let (transport, mut peer) = connected_pair();
    let server = tokio::spawn(async move {
        let call = peer.next_call().await.expect("call");
        peer.chunk(call.session, &reply(10054)).await;
        peer.choke(call.session).await;
        call
    });

    let resolved = timeout(WAIT, resolve_over(transport, "log")).await.expect("no stall").expect("resolve");
    let call = server.await.expect("server");

    assert_eq!(call.method, 0);
    assert_eq!(call.args, vec![Value::from("log")]);
    assert_eq!(resolved.host, "127.0.0.1");
    assert_eq!(resolved.port, 10054);
    assert_eq!(resolved.version, 0);
    assert_eq!(resolved.method_number("enqueue"), Some(5));
    assert_eq!(resolved.method_number("enqueue_old"), Some(0));
    assert_eq!(resolved.method_number("missing"), None);
    assert_eq!(resolved.address(), "127.0.0.1:10054");
}

#[tokio::test]
async fn resolve_over_reports_remote_error() {
    let (transport, mut peer) = connected_pair();
    tokio::spawn(async move {
        let call = peer.next_call().await.expect("call");
        peer.error(call.session, 404, "service is not available").await;
        peer.choke(call.session).await;
        peer
    });

    let err = resolve_over(transport, "ghost").await.expect_err("unknown service");
    assert!(matches!(err, ResolveError::Remote { code: 404, .. }));
}

#[tokio::test]
async fn resolve_over_rejects_choke_without_reply() {
    let (transport, mut peer) = connected_pair();
    tokio::spawn(async move {
        let call = peer.next_call().await.expect("call");
        peer.choke(call.session).await;
        peer
    });

    let err = resolve_over(transport, "log").await.expect_err("empty");
    assert!(matches!(err, ResolveError::EmptyReply));
}

#[tokio::test]
async fn resolve_over_reports_closed_connection() {
    let (transport, mut peer) = connected_pair();
    tokio::spawn(async move {
        peer.next_call().await.expect("call");
        drop(peer);
    });

    let err = resolve_over(transport, "log").await.expect_err("closed");
    assert!(matches!(err, ResolveError::Closed));
}

#[tokio::test]
async fn resolve_over_rejects_malformed_reply() {
    let (transport, mut peer) = connected_pair();
    tokio::spawn(async move {
        let call = peer.next_call().await.expect("call");
        peer.chunk(call.session, &"not an endpoint").await;
        peer
    });

    let err = resolve_over(transport, "log").await.expect_err("malformed");
    assert!(matches!(err, ResolveError::MalformedReply(_)));
}

#[tokio::test]
async fn resolve_falls_through_to_next_locator() {
    let dead = dead_addr().await;
    let (live, server) = spawn_tcp_locator(4242).await;

    let locator = Locator::new(vec![dead, live]);
    let resolved = timeout(WAIT, locator.resolve("log")).await.expect("no stall").expect("resolve");
    assert_eq!(resolved.port, 4242);
    assert_eq!(server.await.expect("server").args, vec![Value::from("log")]);
}

#[tokio::test]
async fn resolve_aggregates_every_failure() {
    let first = dead_addr().await;
    let second = dead_addr().await;

    let locator = Locator::new(vec![first.clone(), second.clone()]);
    let err = locator.resolve("log").await.expect_err("all dead");
    let ResolveError::AllFailed(ref failures) = err else {
        panic!("expected AllFailed, got {err:?}");
    };
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].0, first);
    assert_eq!(failures[1].0, second);
    let rendered = err.to_string();
    assert!(rendered.contains(&first) && rendered.contains(&second), "{rendered}");
}

#[tokio::test]
async fn resolve_times_out_silent_locator() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    let _server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(stream);
    });

    let locator = Locator::new(vec![addr]).with_timeout(Duration::from_millis(100));
    let err = timeout(WAIT, locator.resolve("log")).await.expect("bounded").expect_err("timeout");
    let ResolveError::AllFailed(failures) = err else {
        panic!("expected AllFailed");
    };
    assert!(matches!(failures[0].1, ResolveError::Timeout));
}

#[tokio::test]
async fn resolve_without_locators_fails_fast() {
    let err = Locator::new(Vec::new()).resolve("log").await.expect_err("empty");
    assert!(matches!(err, ResolveError::NoLocators));
}

#[test]
fn from_config_uses_configured_locators() {
    let config = Config::default().with_locators(vec!["a:1".to_owned(), "b:2".to_owned()]);
    assert_eq!(Locator::from_config(&config).endpoints, vec!["a:1".to_owned(), "b:2".to_owned()]);
}

#[test]
fn address_brackets_ipv6_hosts() {
    let endpoint = ResolvedEndpoint {
        host: "::1".to_owned(),
        port: 10053,
        version: 1,
        api: HashMap::new(),
    };
    assert_eq!(endpoint.address(), "[::1]:10053");
}
