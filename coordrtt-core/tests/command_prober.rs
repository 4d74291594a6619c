#![cfg(unix)]
#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use coordrtt_core::config::ProbeConfig;
use coordrtt_core::{CommandProber, MemberStatus, NodeInfo, ProbeError, RttMode, RttProber};

fn node(name: &str) -> NodeInfo {
    node_at(name, "10.0.1.10")
}

fn node_at(name: &str, addr: &str) -> NodeInfo {
    NodeInfo {
        name: name.to_string(),
        addr: addr.to_string(),
        port: 7946,
        status: MemberStatus::Alive,
        tags: BTreeMap::new(),
        coordinate: None,
        rtts: BTreeMap::new(),
    }
}

fn shell(script: &str, timeout: Duration) -> CommandProber {
    CommandProber::new(ProbeConfig {
        program: "sh".to_string(),
        args: vec![
            "-c".to_string(),
            script.to_string(),
            "probe".to_string(),
            "{from}".to_string(),
            "{to}".to_string(),
        ],
        timeout,
        ..ProbeConfig::default()
    })
}

#[tokio::test]
async fn substitutes_node_names_and_parses_output() {
    let prober = shell(
        r#"echo "Estimated $1 <-> $2 rtt: 25.180 ms (using LAN coordinates)""#,
        Duration::from_secs(5),
    );
    assert_eq!(prober.mode(), RttMode::Measured);

    let rtt = prober.rtt(&node("serf1"), &node("serf2")).await.unwrap();
    assert!((rtt - 25.18).abs() < 1e-9);
}

#[tokio::test]
async fn ping_style_probe_reads_minimum_by_address() {
    // Shaped like iputils summary output; the minimum is the first figure.
    let prober = CommandProber::new(ProbeConfig {
        program: "sh".to_string(),
        args: vec![
            "-c".to_string(),
            r#"[ "$1" = clab-nebula-serf1 ] && [ "$2" = 10.0.2.11 ] || exit 3
echo "rtt min/avg/max/mdev = 12.403/13.100/14.050/0.700 ms" | awk -F'[=/ ]+' '{print $6}'"#
                .to_string(),
            "ping".to_string(),
            "clab-nebula-{from}".to_string(),
            "{to_addr}".to_string(),
        ],
        field_index: 0,
        timeout: Duration::from_secs(5),
        ..ProbeConfig::default()
    });

    let rtt = prober
        .rtt(&node("serf1"), &node_at("serf12", "10.0.2.11"))
        .await
        .unwrap();
    assert!((rtt - 12.403).abs() < 1e-9);
}

#[tokio::test]
async fn non_zero_exit_is_a_probe_failure() {
    let prober = shell("echo 'Error: unknown node' >&2; exit 1", Duration::from_secs(5));
    let err = prober.rtt(&node("serf1"), &node("serf2")).await.unwrap_err();
    assert!(matches!(
        err,
        ProbeError::ExitStatus { code: Some(1), ref output } if output.contains("unknown node")
    ));
}

#[tokio::test]
async fn unexpected_output_shape_is_a_probe_failure() {
    let prober = shell("echo 'rtt unavailable'", Duration::from_secs(5));
    let err = prober.rtt(&node("serf1"), &node("serf2")).await.unwrap_err();
    assert!(matches!(err, ProbeError::ShortOutput { expected: 6, found: 2 }));
}

#[tokio::test]
async fn slow_probe_is_killed_at_the_deadline() {
    let timeout = Duration::from_millis(200);
    let prober = shell("sleep 10", timeout);

    let started = Instant::now();
    let err = prober.rtt(&node("serf1"), &node("serf2")).await.unwrap_err();
    assert!(matches!(err, ProbeError::Timeout(t) if t == timeout));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn missing_program_is_a_spawn_failure() {
    let prober = CommandProber::new(ProbeConfig {
        program: "/nonexistent/serf".to_string(),
        ..ProbeConfig::default()
    });
    let err = prober.rtt(&node("serf1"), &node("serf2")).await.unwrap_err();
    assert!(matches!(err, ProbeError::Spawn(_)));
}
