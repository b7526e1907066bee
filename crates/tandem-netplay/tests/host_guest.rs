mod common;

use bytes::Bytes;
use common::{scripted_bits, session};
use tandem_netplay::{MemoryLink, PlayerState, SessionConfig, SessionState};
use tandem_netproto::{Packet, decode};

fn config(local_slot: usize) -> SessionConfig {
    SessionConfig {
        local_slot,
        input_delay_frames: 0,
        desync_check_rate: 10,
        ..SessionConfig::default()
    }
}

/// Forward everything `from` sent to `to`, returning the decoded packets.
fn forward(from: &MemoryLink, to: &MemoryLink) -> Vec<Packet> {
    from.take_sent()
        .into_iter()
        .map(|datagram: Bytes| {
            let packet = decode(&datagram).unwrap();
            assert!(to.deliver(datagram));
            packet
        })
        .collect()
}

fn sync_checksum(packets: &[Packet], tick: i64) -> Option<u32> {
    packets.iter().find_map(|p| match *p {
        Packet::Sync { tick: t, checksum } if t == tick => Some(checksum),
        _ => None,
    })
}

#[test]
fn host_rolls_back_when_guest_input_arrives() {
    let (mut host, host_link) = session(config(0), 1);
    let (mut guest, guest_link) = session(config(1), 2);

    host.start();
    guest.start();
    forward(&guest_link, &host_link);

    // Host runs ahead on prediction; nothing reaches the guest yet.
    for tick in 0..5 {
        let report = host.run_frame().unwrap();
        assert_eq!(report.stepped, Some(tick));
        assert_eq!(host.remote_input_state(0), PlayerState::NEUTRAL);
    }
    assert_eq!(host.state(), SessionState::Running);
    assert_eq!(host.confirmed_tick(), -1);
    assert_eq!(host.synced_tick(), -1);
    assert_eq!(host.local_tick(), 5);

    // Guest connects, learns host input for ticks 0..=4 and steps tick 0.
    forward(&host_link, &guest_link);
    let report = guest.run_frame().unwrap();
    assert_eq!(report.stepped, Some(0));
    assert_eq!(guest.confirmed_tick(), 4);
    assert_eq!(guest.synced_tick(), 0);
    assert_eq!(
        guest.remote_input_state(3).bits(),
        scripted_bits(1, 3),
        "guest sees host's real input"
    );

    // Guest's tick-0 input reaches the host: replay ticks 0..=4.
    let from_guest = forward(&guest_link, &host_link);
    let guest_sum = sync_checksum(&from_guest, 0).unwrap();
    let report = host.run_frame().unwrap();
    assert_eq!(report.replayed, 5);
    assert_eq!(host.confirmed_tick(), 0);
    assert_eq!(host.synced_tick(), 0);
    assert_eq!(host.remote_input_state(0).bits(), scripted_bits(2, 0));
    assert_eq!(host.stats().rollbacks, 1);
    assert_eq!(host.stats().sync_checks, 1);

    // And the guest verifies the host's tick-0 checksum in turn.
    let from_host = forward(&host_link, &guest_link);
    assert_eq!(sync_checksum(&from_host, 0), Some(guest_sum));
    guest.run_frame().unwrap();
    assert_eq!(guest.stats().sync_checks, 1);
    assert!(host.desync_report().is_none());
    assert!(guest.desync_report().is_none());
}

#[test]
fn sessions_agree_after_a_long_run() {
    let (mut host, host_link) = session(config(0), 3);
    let (mut guest, guest_link) = session(config(1), 4);
    host.start();
    guest.start();

    for _ in 0..240 {
        forward(&guest_link, &host_link);
        host.run_frame().unwrap();
        forward(&host_link, &guest_link);
        guest.run_frame().unwrap();
    }

    assert!(host.synced_tick() >= 200);
    assert!(guest.synced_tick() >= 200);
    let tick = host.synced_tick().min(guest.synced_tick()) - 10;
    assert_eq!(host.local_input_state(tick), guest.remote_input_state(tick));
    assert_eq!(guest.local_input_state(tick), host.remote_input_state(tick));
    assert!(host.stats().sync_checks >= 20);
    assert_eq!(host.stats().malformed_dropped, 0);
}
