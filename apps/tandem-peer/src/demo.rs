//! Built-in deterministic simulation and scripted input for the demo peer.

use bytes::{Buf, BufMut};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tandem_netplay::{
    Button, CoreError, InputSource, PLAYER_COUNT, PlayerState, SimulationCore,
};

const FIELD_W: i32 = 320 << 4;
const FIELD_H: i32 = 240 << 4;
const PADDLE_H: i32 = 32 << 4;
const PADDLE_SPEED: i32 = 3 << 4;
const SERVE_SPEED: i32 = 2 << 4;

/// Two paddles and a ball in 12.4 fixed point. Integer-only so both peers
/// compute bit-identical states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaddleCore {
    paddles: [i32; PLAYER_COUNT],
    ball: [i32; 2],
    velocity: [i32; 2],
    score: [u32; PLAYER_COUNT],
    frame: u64,
}

const STATE_LEN: usize = 4 * PLAYER_COUNT + 4 * 2 + 4 * 2 + 4 * PLAYER_COUNT + 8;

impl Default for PaddleCore {
    fn default() -> Self {
        let mut core = Self {
            paddles: [(FIELD_H - PADDLE_H) / 2; PLAYER_COUNT],
            ball: [0; 2],
            velocity: [0; 2],
            score: [0; PLAYER_COUNT],
            frame: 0,
        };
        core.serve(0);
        core
    }
}

impl PaddleCore {
    pub fn score(&self) -> [u32; PLAYER_COUNT] {
        self.score
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    fn serve(&mut self, toward: usize) {
        self.ball = [FIELD_W / 2, FIELD_H / 2];
        let dx = if toward == 0 { -SERVE_SPEED } else { SERVE_SPEED };
        // Vary the angle with the frame count so rallies differ.
        let dy = (self.frame % 5) as i32 - 2;
        self.velocity = [dx, dy << 3];
    }

    fn move_paddle(&mut self, slot: usize, input: PlayerState) {
        let mut y = self.paddles[slot];
        if input.is_pressed(Button::Up) {
            y -= PADDLE_SPEED;
        }
        if input.is_pressed(Button::Down) {
            y += PADDLE_SPEED;
        }
        self.paddles[slot] = y.clamp(0, FIELD_H - PADDLE_H);
    }

    fn hits_paddle(&self, slot: usize) -> bool {
        let top = self.paddles[slot];
        (top..top + PADDLE_H).contains(&self.ball[1])
    }
}

impl SimulationCore for PaddleCore {
    fn serialize_size(&self) -> usize {
        STATE_LEN
    }

    fn serialize(&self, mut out: &mut [u8]) -> Result<(), CoreError> {
        if out.len() < STATE_LEN {
            return Err(CoreError::new(format!(
                "state buffer too small: {} < {STATE_LEN}",
                out.len()
            )));
        }
        for v in self.paddles.iter().chain(&self.ball).chain(&self.velocity) {
            out.put_i32_le(*v);
        }
        for v in &self.score {
            out.put_u32_le(*v);
        }
        out.put_u64_le(self.frame);
        Ok(())
    }

    fn unserialize(&mut self, mut data: &[u8]) -> Result<(), CoreError> {
        if data.len() != STATE_LEN {
            return Err(CoreError::new(format!(
                "expected {STATE_LEN} state bytes, got {}",
                data.len()
            )));
        }
        for v in self
            .paddles
            .iter_mut()
            .chain(&mut self.ball)
            .chain(&mut self.velocity)
        {
            *v = data.get_i32_le();
        }
        for v in &mut self.score {
            *v = data.get_u32_le();
        }
        self.frame = data.get_u64_le();
        Ok(())
    }

    fn step(&mut self, inputs: &[PlayerState; PLAYER_COUNT]) {
        for (slot, input) in inputs.iter().enumerate() {
            self.move_paddle(slot, *input);
        }

        self.ball[0] += self.velocity[0];
        self.ball[1] += self.velocity[1];
        if self.ball[1] <= 0 || self.ball[1] >= FIELD_H {
            self.velocity[1] = -self.velocity[1];
            self.ball[1] = self.ball[1].clamp(0, FIELD_H);
        }

        if self.ball[0] <= 0 {
            if self.hits_paddle(0) {
                self.velocity[0] = -self.velocity[0];
                self.ball[0] = 0;
            } else {
                self.score[1] += 1;
                self.serve(1);
            }
        } else if self.ball[0] >= FIELD_W {
            if self.hits_paddle(1) {
                self.velocity[0] = -self.velocity[0];
                self.ball[0] = FIELD_W;
            } else {
                self.score[0] += 1;
                self.serve(0);
            }
        }
        self.frame += 1;
    }
}

/// Holds Up or Down (sometimes both, sometimes neither) for random stretches.
pub struct WanderingInput {
    rng: StdRng,
    held: PlayerState,
    remaining: u32,
}

impl WanderingInput {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            held: PlayerState::NEUTRAL,
            remaining: 0,
        }
    }
}

impl InputSource for WanderingInput {
    fn poll(&mut self) {
        if self.remaining > 0 {
            self.remaining -= 1;
            return;
        }
        let mut held = PlayerState::NEUTRAL;
        held.set_button(Button::Up, self.rng.random_bool(0.4));
        held.set_button(Button::Down, self.rng.random_bool(0.4));
        held.set_button(Button::A, self.rng.random_bool(0.1));
        self.held = held;
        self.remaining = self.rng.random_range(5..40);
    }

    fn latest(&self, _slot: usize) -> PlayerState {
        self.held
    }
}
