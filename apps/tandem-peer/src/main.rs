use std::{
    net::SocketAddr,
    thread,
    time::{Duration, Instant},
};

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use tandem_netplay::{
    NetplayError, PresentationFlags, Session, SessionConfig, Stall, UdpTransport,
};

mod demo;

use demo::{PaddleCore, WanderingInput};

/// Rollback netplay demo peer
#[derive(Parser, Debug)]
#[command(name = "tandem-peer")]
#[command(about = "Run one side of a two-player rollback session", long_about = None)]
struct Args {
    /// Local UDP bind address
    #[arg(short, long, default_value = "0.0.0.0:7000")]
    bind: SocketAddr,

    /// Address of the other peer
    #[arg(short, long)]
    peer: SocketAddr,

    /// Controller slot: 0 for the host, 1 for the guest
    #[arg(short, long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    slot: u8,

    /// Frames to run before exiting (0 runs until the session ends)
    #[arg(long, default_value_t = 3600)]
    frames: u64,

    /// Frames per second
    #[arg(long, default_value_t = 60)]
    fps: u32,

    /// Ticks between capturing local input and using it
    #[arg(long, default_value_t = 3)]
    input_delay: u32,

    /// How far the simulation may run ahead of confirmed remote input
    #[arg(long, default_value_t = 8)]
    rollback_max: u32,

    /// Exchange a state checksum every N synced ticks
    #[arg(long, default_value_t = 10)]
    check_rate: u32,

    /// Seconds to wait for the peer to answer the handshake
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,

    /// Seed for the scripted local input
    #[arg(long)]
    seed: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: Level,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig {
            local_slot: usize::from(self.slot),
            input_delay_frames: self.input_delay,
            rollback_max_frames: self.rollback_max,
            desync_check_rate: self.check_rate,
            connect_timeout: Duration::from_secs(self.connect_timeout),
            ..SessionConfig::default()
        };
        config.history_size = config.history_size.max(config.min_history_size());
        config
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if args.fps == 0 {
        anyhow::bail!("--fps must be greater than zero");
    }

    let config = args.session_config();
    let transport = UdpTransport::bind(args.bind, args.peer, config.queue_capacity)?;
    let input = WanderingInput::new(args.seed.unwrap_or(u64::from(args.slot) + 1));
    let mut session = Session::new(
        config,
        PaddleCore::default(),
        input,
        transport,
        PresentationFlags::new(),
    )?;

    info!(
        local = %session.transport().local_addr(),
        peer = %session.transport().peer(),
        slot = args.slot,
        "starting session"
    );
    session.start();

    let frame_time = Duration::from_secs(1) / args.fps;
    let mut next_frame = Instant::now();
    let mut frame = 0u64;
    let result = loop {
        if args.frames != 0 && frame >= args.frames {
            break Ok(());
        }
        frame += 1;

        match session.run_frame() {
            Ok(report) => {
                if report.stall == Some(Stall::RollbackWindow) {
                    warn!(
                        tick = session.local_tick(),
                        confirmed = session.confirmed_tick(),
                        "waiting for peer input"
                    );
                }
            }
            Err(e) => break Err(e),
        }

        if frame % u64::from(args.fps) == 0 {
            let stats = session.stats();
            info!(
                tick = session.local_tick(),
                synced = session.synced_tick(),
                score = ?session.core().score(),
                rollbacks = stats.rollbacks,
                replayed = stats.replayed_ticks,
                skips = stats.clock_sync_skips,
                rtt = ?stats.rtt,
                queue_dropped = session.transport().dropped(),
                "status"
            );
        }

        next_frame += frame_time;
        let now = Instant::now();
        if next_frame > now {
            thread::sleep(next_frame - now);
        } else {
            next_frame = now;
        }
    };

    session.stop();
    let stats = session.stats();
    info!(
        frames = stats.frames,
        ticks = stats.ticks_stepped,
        core_frame = session.core().frame(),
        rollbacks = stats.rollbacks,
        deepest = stats.deepest_rollback,
        sync_checks = stats.sync_checks,
        "session finished"
    );

    match result {
        Ok(()) => Ok(()),
        Err(NetplayError::Desync {
            tick,
            local,
            remote,
        }) => {
            error!(tick, local, remote, "peers diverged");
            anyhow::bail!("desync at tick {tick}")
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_rollback_window_grows_history() {
        let args = Args::try_parse_from([
            "tandem-peer",
            "--peer",
            "127.0.0.1:7001",
            "--rollback-max",
            "60",
        ])
        .unwrap();
        let config = args.session_config();
        assert_eq!(config.history_size, config.min_history_size());
        config.validate().unwrap();

        let args = Args::try_parse_from(["tandem-peer", "--peer", "127.0.0.1:7001"]).unwrap();
        assert_eq!(args.session_config().history_size, SessionConfig::default().history_size);
    }
}
