//! Per-frame control loop for a two-peer rollback session.
//!
//! [`Session::run_frame`] is called once per displayed frame. It drains the
//! inbound queue, resolves rollbacks, applies clock sync and the rollback
//! window, steps the simulation at most once, and transmits local input.
//! All session state is owned here and only ever touched from the caller's
//! thread; the transport's receive worker only fills the inbound queue.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tandem_netproto::{Packet, PlayerState, codec, constants::PLAYER_COUNT};
use tracing::{debug, error, info, trace, warn};

use crate::{
    config::SessionConfig,
    core::{InputSource, PresentationFlags, SimulationCore},
    error::NetplayError,
    sync::{
        SyncPoint,
        clock::ClockSync,
        desync::{DesyncDetector, DesyncReport},
        rollback::RollbackController,
    },
    transport::{Inbound, Transport},
};

/// Session state machine.
///
/// `Disconnected -> Handshaking -> Running <-> Syncing`, and from any
/// connected state to `Desynced`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Handshaking,
    Running,
    /// Running, but skipping steps to let the peer catch up.
    Syncing,
    Desynced {
        tick: i64,
    },
}

impl SessionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Running | Self::Syncing)
    }
}

/// Why a frame did not step the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stall {
    /// Still handshaking.
    NotConnected,
    /// `force_pause` is set.
    Paused,
    /// Skipped to let the slower peer catch up.
    ClockSync,
    /// `LocalTick` reached `ConfirmedTick + rollback_max_frames`.
    RollbackWindow,
}

/// What one [`Session::run_frame`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameReport {
    /// Tick stepped this frame, if any.
    pub stepped: Option<i64>,
    pub stall: Option<Stall>,
    /// Ticks re-simulated by rollback this frame.
    pub replayed: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionStats {
    pub frames: u64,
    pub ticks_stepped: u64,
    pub clock_sync_skips: u64,
    pub window_stalls: u64,
    pub rollbacks: u64,
    pub replayed_ticks: u64,
    pub deepest_rollback: u32,
    pub datagrams_received: u64,
    /// Undecodable datagrams plus input packets past the peer's reach.
    pub malformed_dropped: u64,
    pub input_gaps: u64,
    pub sync_checks: u64,
    /// Smoothed round-trip time.
    pub rtt: Option<Duration>,
}

/// Weight of a new RTT sample in the running average (1/8, as TCP's SRTT).
const RTT_ALPHA: f64 = 0.125;

pub struct Session<C, I, T> {
    config: SessionConfig,
    rollback: RollbackController<C>,
    input: I,
    transport: T,
    clock: ClockSync,
    desync: DesyncDetector,
    flags: PresentationFlags,
    state: SessionState,
    remote_tick_delta: i64,
    confirmed_advanced: bool,
    /// Set once the peer proved it is past its handshake.
    peer_running: bool,
    handshake_started: Option<Instant>,
    handshake_frames: u32,
    last_inbound: Instant,
    stats: SessionStats,
}

impl<C, I, T> Session<C, I, T>
where
    C: SimulationCore,
    I: InputSource,
    T: Transport,
{
    pub fn new(
        config: SessionConfig,
        core: C,
        input: I,
        transport: T,
        flags: PresentationFlags,
    ) -> Result<Self, NetplayError> {
        config.validate()?;
        let rollback = RollbackController::new(core, &config)?;
        let desync_window = i64::from(config.rollback_max_frames)
            + i64::from(config.input_delay_frames)
            + i64::from(config.desync_check_rate);
        Ok(Self {
            config,
            rollback,
            input,
            transport,
            clock: ClockSync::new(),
            desync: DesyncDetector::new(desync_window),
            flags,
            state: SessionState::Disconnected,
            remote_tick_delta: 0,
            confirmed_advanced: false,
            peer_running: false,
            handshake_started: None,
            handshake_frames: 0,
            last_inbound: Instant::now(),
            stats: SessionStats::default(),
        })
    }

    /// Begin handshaking with the peer. No-op unless disconnected.
    pub fn start(&mut self) {
        if self.state != SessionState::Disconnected {
            return;
        }
        info!(slot = self.config.local_slot, "handshaking");
        self.state = SessionState::Handshaking;
        self.handshake_started = Some(Instant::now());
        self.handshake_frames = 0;
        self.send_redundant(&Packet::Handshake);
    }

    /// Close the transport and drop to `Disconnected`. A desynced session stays desynced.
    pub fn stop(&mut self) {
        self.transport.close();
        if !matches!(self.state, SessionState::Desynced { .. }) {
            self.state = SessionState::Disconnected;
        }
        info!("session stopped");
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        let rollback = self.rollback.stats();
        SessionStats {
            rollbacks: rollback.rollbacks,
            replayed_ticks: rollback.replayed_ticks,
            deepest_rollback: rollback.deepest,
            clock_sync_skips: self.clock.skipped(),
            sync_checks: self.desync.compared(),
            ..self.stats
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn flags(&self) -> &PresentationFlags {
        &self.flags
    }

    pub fn core(&self) -> &C {
        self.rollback.core()
    }

    pub fn core_mut(&mut self) -> &mut C {
        self.rollback.core_mut()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn local_tick(&self) -> i64 {
        self.rollback.local_tick()
    }

    pub fn confirmed_tick(&self) -> i64 {
        self.rollback.confirmed_tick()
    }

    pub fn synced_tick(&self) -> i64 {
        self.rollback.synced_tick()
    }

    pub fn local_input_state(&self, tick: i64) -> PlayerState {
        self.rollback.inputs().local_input_state(tick)
    }

    pub fn remote_input_state(&self, tick: i64) -> PlayerState {
        self.rollback.inputs().remote_input_state(tick)
    }

    /// Inputs the core was last stepped with, by slot.
    pub fn current_inputs(&self) -> [PlayerState; PLAYER_COUNT] {
        self.rollback.current_inputs()
    }

    pub fn desync_report(&self) -> Option<DesyncReport> {
        self.desync.report()
    }

    /// Run one frame of the session.
    pub fn run_frame(&mut self) -> Result<FrameReport, NetplayError> {
        match self.state {
            SessionState::Disconnected => return Err(NetplayError::NotConnected),
            SessionState::Desynced { .. } => return Err(self.desync_error()),
            _ => {}
        }
        self.stats.frames += 1;

        self.drain()?;

        if self.state == SessionState::Handshaking {
            return self.handshake_frame();
        }

        let since_inbound = self.last_inbound.elapsed();
        if since_inbound > self.config.liveness_timeout {
            warn!(?since_inbound, "peer timed out");
            self.state = SessionState::Disconnected;
            return Err(NetplayError::PeerTimedOut(self.config.liveness_timeout));
        }

        let mut report = FrameReport::default();

        let outcome = self
            .rollback
            .handle_rollbacks(&self.flags)
            .map_err(|e| self.abort(e.into()))?;
        report.replayed = outcome.replayed;
        for point in outcome.sync_points {
            self.publish_sync_point(point)?;
        }

        let skip = self.clock.update(
            std::mem::take(&mut self.confirmed_advanced),
            self.rollback.local_tick_delta(),
            self.remote_tick_delta,
        );
        self.state = if self.clock.is_syncing() {
            SessionState::Syncing
        } else {
            SessionState::Running
        };

        report.stall = if self.flags.is_paused() {
            Some(Stall::Paused)
        } else if skip {
            Some(Stall::ClockSync)
        } else if !self.rollback.window_open() {
            self.stats.window_stalls += 1;
            Some(Stall::RollbackWindow)
        } else {
            None
        };

        if report.stall.is_none() {
            report.stepped = Some(self.step_local()?);
        }

        self.transmit();
        Ok(report)
    }

    fn handshake_frame(&mut self) -> Result<FrameReport, NetplayError> {
        if let Some(started) = self.handshake_started
            && started.elapsed() > self.config.connect_timeout
        {
            warn!("handshake timed out");
            self.state = SessionState::Disconnected;
            return Err(NetplayError::ConnectTimeout(self.config.connect_timeout));
        }
        self.handshake_frames += 1;
        if self.handshake_frames % self.config.handshake_resend_interval.max(1) == 0 {
            self.send(&Packet::Handshake);
        }
        Ok(FrameReport {
            stall: Some(Stall::NotConnected),
            ..FrameReport::default()
        })
    }

    fn step_local(&mut self) -> Result<i64, NetplayError> {
        let tick = self.rollback.local_tick();
        self.input.poll();
        let local = self.input.latest(self.config.local_slot);
        self.rollback.set_local_input(tick, local);

        let point = self.rollback.step().map_err(|e| self.abort(e.into()))?;
        self.stats.ticks_stepped += 1;
        if let Some(point) = point {
            self.publish_sync_point(point)?;
        }
        Ok(tick)
    }

    /// Send this frame's input window and a latency probe.
    fn transmit(&mut self) {
        let input = Packet::PlayerInput {
            tick_delta: self.rollback.local_tick_delta(),
            tick: self.rollback.inputs().newest_local_tick(),
            inputs: self.rollback.inputs().outgoing_window(),
        };
        self.send(&input);
        self.send(&Packet::Ping { time: unix_millis() });
    }

    fn drain(&mut self) -> Result<(), NetplayError> {
        while let Some(item) = self.transport.try_recv() {
            match item {
                Inbound::Datagram(bytes) => {
                    self.stats.datagrams_received += 1;
                    self.last_inbound = Instant::now();
                    match codec::decode(&bytes) {
                        Ok(packet) => self.handle_packet(packet)?,
                        Err(e) => {
                            self.stats.malformed_dropped += 1;
                            warn!("dropping malformed datagram: {e}");
                        }
                    }
                }
                Inbound::Closed { reason } => {
                    error!(%reason, "transport closed");
                    self.state = SessionState::Disconnected;
                    return Err(NetplayError::TransportClosed(reason));
                }
            }
        }
        Ok(())
    }

    fn handle_packet(&mut self, packet: Packet) -> Result<(), NetplayError> {
        trace!(?packet, "received");

        if self.state == SessionState::Handshaking {
            self.on_connected();
        }
        if !matches!(packet, Packet::Handshake) {
            self.peer_running = true;
        }

        match packet {
            Packet::Handshake => {
                if !self.peer_running {
                    self.send(&Packet::Handshake);
                }
            }
            Packet::PlayerInput { tick_delta, .. } => {
                let update = self.rollback.apply_remote(&packet);
                if update.rejected {
                    self.stats.malformed_dropped += 1;
                }
                if update.advanced {
                    self.confirmed_advanced = true;
                    self.remote_tick_delta = tick_delta;
                }
                self.stats.input_gaps += update.gap;
            }
            Packet::Ping { time } => self.send(&Packet::Pong { time }),
            Packet::Pong { time } => self.record_rtt(time),
            Packet::Sync { tick, checksum } => {
                if let Some(report) = self.desync.record_remote(SyncPoint { tick, checksum }) {
                    return Err(self.enter_desync(report));
                }
            }
        }
        Ok(())
    }

    fn on_connected(&mut self) {
        let waited = self.handshake_started.map(|t| t.elapsed()).unwrap_or_default();
        info!(?waited, "peer connected");
        self.state = SessionState::Running;
        self.last_inbound = Instant::now();
        self.send(&Packet::Handshake);
    }

    fn record_rtt(&mut self, sent_at: i64) {
        let Ok(sample) = u64::try_from(unix_millis().saturating_sub(sent_at)) else {
            return;
        };
        let sample = Duration::from_millis(sample);
        let smoothed = match self.stats.rtt {
            Some(rtt) => rtt.mul_f64(1.0 - RTT_ALPHA) + sample.mul_f64(RTT_ALPHA),
            None => sample,
        };
        self.stats.rtt = Some(smoothed);
    }

    fn publish_sync_point(&mut self, point: SyncPoint) -> Result<(), NetplayError> {
        debug!(tick = point.tick, checksum = point.checksum, "sync point");
        self.send_redundant(&Packet::Sync {
            tick: point.tick,
            checksum: point.checksum,
        });
        match self.desync.record_local(point) {
            Some(report) => Err(self.enter_desync(report)),
            None => Ok(()),
        }
    }

    fn enter_desync(&mut self, report: DesyncReport) -> NetplayError {
        self.state = SessionState::Desynced { tick: report.tick };
        self.desync_error()
    }

    fn desync_error(&self) -> NetplayError {
        match self.desync.report() {
            Some(DesyncReport {
                tick,
                local,
                remote,
            }) => NetplayError::Desync {
                tick,
                local,
                remote,
            },
            None => NetplayError::NotConnected,
        }
    }

    /// A core failure mid-frame leaves state that can no longer be trusted.
    fn abort(&mut self, e: NetplayError) -> NetplayError {
        error!("aborting session: {e}");
        self.state = SessionState::Disconnected;
        e
    }

    fn send(&self, packet: &Packet) {
        self.transport.send(codec::encode(packet));
    }

    fn send_redundant(&self, packet: &Packet) {
        let datagram = codec::encode(packet);
        for _ in 0..self.config.redundancy {
            self.transport.send(datagram.clone());
        }
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
