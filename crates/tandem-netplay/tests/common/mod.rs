#![allow(dead_code)]

use std::collections::VecDeque;

use bytes::Bytes;
use rand::{Rng, SeedableRng, rngs::StdRng};
use tandem_netplay::{
    CoreError, InputSource, MemoryLink, MemoryTransport, PLAYER_COUNT, PlayerState,
    PresentationFlags, Session, SessionConfig, SimulationCore,
};

/// Deterministic core: each step reseeds a PRNG from the current state and
/// the inputs, so any difference in either changes every later state.
#[derive(Debug, Clone)]
pub struct PrngCore {
    pub state: u64,
    pub frame: u64,
    /// Flip bits after stepping this frame. Not part of the serialized state.
    pub perturb_at: Option<u64>,
}

impl PrngCore {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed,
            frame: 0,
            perturb_at: None,
        }
    }
}

impl SimulationCore for PrngCore {
    fn serialize_size(&self) -> usize {
        16
    }

    fn serialize(&self, out: &mut [u8]) -> Result<(), CoreError> {
        out[..8].copy_from_slice(&self.state.to_le_bytes());
        out[8..16].copy_from_slice(&self.frame.to_le_bytes());
        Ok(())
    }

    fn unserialize(&mut self, data: &[u8]) -> Result<(), CoreError> {
        if data.len() != 16 {
            return Err(CoreError::new(format!("expected 16 bytes, got {}", data.len())));
        }
        self.state = u64::from_le_bytes(data[..8].try_into().unwrap());
        self.frame = u64::from_le_bytes(data[8..].try_into().unwrap());
        Ok(())
    }

    fn step(&mut self, inputs: &[PlayerState; PLAYER_COUNT]) {
        let mixed = inputs
            .iter()
            .fold(self.state, |acc, input| acc.rotate_left(17) ^ u64::from(input.bits()));
        let mut rng = StdRng::seed_from_u64(mixed);
        self.state = rng.random();
        if self.perturb_at == Some(self.frame) {
            self.state ^= 0x5a5a_5a5a;
        }
        self.frame += 1;
    }
}

/// Input for `tick` of a scripted player.
pub fn scripted_bits(seed: u64, tick: u64) -> u32 {
    let mut rng = StdRng::seed_from_u64(seed.wrapping_mul(0x9e37_79b9).wrapping_add(tick));
    rng.random_range(0..1u32 << 16)
}

/// Replays [`scripted_bits`]; the n-th poll yields the input for tick n.
pub struct ScriptedInput {
    seed: u64,
    polls: u64,
    current: PlayerState,
}

impl ScriptedInput {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            polls: 0,
            current: PlayerState::NEUTRAL,
        }
    }
}

impl InputSource for ScriptedInput {
    fn poll(&mut self) {
        self.current = PlayerState::from_bits_truncate(scripted_bits(self.seed, self.polls));
        self.polls += 1;
    }

    fn latest(&self, _slot: usize) -> PlayerState {
        self.current
    }
}

pub type TestSession = Session<PrngCore, ScriptedInput, MemoryTransport>;

pub fn session(config: SessionConfig, input_seed: u64) -> (TestSession, MemoryLink) {
    let (transport, link) = MemoryTransport::detached(4096);
    let session = Session::new(
        config,
        PrngCore::new(0xC0FFEE),
        ScriptedInput::new(input_seed),
        transport,
        PresentationFlags::new(),
    )
    .unwrap();
    (session, link)
}

/// Network conditions for one direction, in frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct Conditions {
    pub delay: u64,
    pub jitter: u64,
    pub loss: f64,
}

/// One direction of a simulated network between two detached endpoints.
pub struct Wire {
    conditions: Conditions,
    in_flight: VecDeque<(u64, Bytes)>,
    rng: StdRng,
}

impl Wire {
    pub fn new(conditions: Conditions, seed: u64) -> Self {
        Self {
            conditions,
            in_flight: VecDeque::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Pick up everything `from` sent this frame.
    pub fn collect(&mut self, from: &MemoryLink, now: u64) {
        for datagram in from.take_sent() {
            if self.conditions.loss > 0.0 && self.rng.random_bool(self.conditions.loss) {
                continue;
            }
            let jitter = if self.conditions.jitter > 0 {
                self.rng.random_range(0..=self.conditions.jitter)
            } else {
                0
            };
            self.in_flight
                .push_back((now + self.conditions.delay + jitter, datagram));
        }
    }

    /// Hand `to` everything due by `now`.
    pub fn deliver(&mut self, to: &MemoryLink, now: u64) {
        let mut pending = VecDeque::with_capacity(self.in_flight.len());
        while let Some((due, datagram)) = self.in_flight.pop_front() {
            if due <= now {
                assert!(to.deliver(datagram), "endpoint queue overflow");
            } else {
                pending.push_back((due, datagram));
            }
        }
        self.in_flight = pending;
    }
}

/// Two sessions joined by simulated wires, driven one frame at a time.
pub struct Pair {
    pub host: TestSession,
    pub guest: TestSession,
    host_link: MemoryLink,
    guest_link: MemoryLink,
    to_guest: Wire,
    to_host: Wire,
    pub frame: u64,
}

impl Pair {
    pub fn new(
        config: SessionConfig,
        to_guest: Conditions,
        to_host: Conditions,
        net_seed: u64,
    ) -> Self {
        let (host, host_link) = session(
            SessionConfig {
                local_slot: 0,
                ..config.clone()
            },
            1,
        );
        let (guest, guest_link) = session(
            SessionConfig {
                local_slot: 1,
                ..config
            },
            2,
        );
        Self {
            host,
            guest,
            host_link,
            guest_link,
            to_guest: Wire::new(to_guest, net_seed),
            to_host: Wire::new(to_host, net_seed ^ 0xFFFF),
            frame: 0,
        }
    }

    pub fn start(&mut self) {
        self.host.start();
        self.guest.start();
        self.pump();
    }

    /// Move datagrams across the wires without running either session.
    fn pump(&mut self) {
        self.to_guest.collect(&self.host_link, self.frame);
        self.to_host.collect(&self.guest_link, self.frame);
        self.to_guest.deliver(&self.guest_link, self.frame);
        self.to_host.deliver(&self.host_link, self.frame);
    }

    /// One frame on both sides. Returns the first error either side raised.
    pub fn frame(&mut self) -> Result<(), tandem_netplay::NetplayError> {
        self.frame += 1;
        let host = self.host.run_frame();
        let guest = self.guest.run_frame();
        self.pump();
        host?;
        guest?;
        Ok(())
    }
}
