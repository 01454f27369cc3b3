//! Simulated 881A head for bench runs and tests
//!
//! Interprets switch commands like the real head: reads range, bin count,
//! sector and step size from each block, moves the head within the sector
//! and answers with an echo profile containing one target plus noise.

use super::constants::{HEAD_POSITION_CENTER, SWITCH_COMMAND_LEN};
use super::packet::{parse_switch, SwitchFields};
use super::protocol::{encode_ping, head_angle};
use crate::config::SimulationConfig;
use crate::transport::MockTransport;
use crate::types::{PingRecord, StepDirection};
use rand::prelude::*;
use rand::rngs::SmallRng;
use rand_distr::{Distribution, StandardNormal, Uniform};

// ============================================================================
// Noise
// ============================================================================

/// Noise generator with configurable seed for reproducibility
#[derive(Clone)]
pub struct NoiseGenerator {
    rng: SmallRng,
}

impl NoiseGenerator {
    /// Create a new noise generator
    ///
    /// If seed is 0, uses random entropy for non-deterministic behavior.
    pub fn new(seed: u64) -> Self {
        let rng = if seed == 0 {
            SmallRng::from_entropy()
        } else {
            SmallRng::seed_from_u64(seed)
        };
        Self { rng }
    }

    /// Gaussian noise with given standard deviation
    #[inline]
    pub fn gaussian(&mut self, stddev: f32) -> f32 {
        if stddev == 0.0 {
            return 0.0;
        }
        let n: f32 = self.rng.sample(StandardNormal);
        n * stddev
    }

    /// Returns true with given probability
    #[inline]
    pub fn chance(&mut self, probability: f32) -> bool {
        Uniform::new(0.0f32, 1.0).sample(&mut self.rng) < probability
    }
}

// ============================================================================
// Simulated head
// ============================================================================

const ECHO_PEAK: f32 = 200.0;
const RINGDOWN_PEAK: f32 = 40.0;
const NOISE_FLOOR: f32 = 8.0;

/// Software stand-in for the sonar head
pub struct SimulatedSonar {
    sim: SimulationConfig,
    noise: NoiseGenerator,
    /// Raw head position, 0.3° units offset by 600
    position: i32,
    homed: bool,
    commands: u64,
}

impl SimulatedSonar {
    pub fn new(sim: SimulationConfig) -> Self {
        let noise = NoiseGenerator::new(sim.seed);
        Self {
            sim,
            noise,
            position: HEAD_POSITION_CENTER,
            homed: false,
            commands: 0,
        }
    }

    /// Switch commands answered so far
    pub fn commands(&self) -> u64 {
        self.commands
    }

    /// Current head angle in degrees
    pub fn angle(&self) -> f32 {
        head_angle(self.position as u16)
    }

    /// Answer one switch command; `None` means the head stays silent
    pub fn respond(&mut self, command: &[u8]) -> Option<Vec<u8>> {
        if command.len() != SWITCH_COMMAND_LEN {
            return None;
        }
        let fields = parse_switch(command)?;
        self.commands += 1;

        if self.sim.dropout_probability > 0.0 && self.noise.chance(self.sim.dropout_probability) {
            log::trace!("SimulatedSonar: dropping response #{}", self.commands);
            return None;
        }

        let direction = self.advance(&fields);
        let num_bins = fields.data_points as usize * 10;
        let amplitudes = self.echo_profile(fields.range as f32, num_bins);

        let mut ping = PingRecord::new(self.angle(), direction, amplitudes, fields.range as f32);
        ping.head_id = fields.head_id;
        Some(encode_ping(&ping))
    }

    /// Wrap this head in a transport the driver can talk to
    pub fn into_transport(mut self) -> MockTransport {
        MockTransport::with_responder(move |bytes| self.respond(bytes))
    }

    /// Move the head per the command, staying inside the sector
    fn advance(&mut self, fields: &SwitchFields) -> StepDirection {
        let centre = fields.train_angle as f32 * 3.0 - 180.0;
        let half = fields.sector_width as f32 * 3.0 / 2.0;
        let start = raw_position(centre - half);
        let stop = raw_position(centre + half);

        if !self.homed {
            self.position = start;
            self.homed = true;
        }

        let direction = if fields.reverse {
            StepDirection::CounterClockwise
        } else {
            StepDirection::Clockwise
        };
        let step = fields.step_size as i32;
        self.position = match direction {
            StepDirection::Clockwise => self.position + step,
            StepDirection::CounterClockwise => self.position - step,
        }
        .clamp(start, stop);
        direction
    }

    fn echo_profile(&mut self, max_range: f32, num_bins: usize) -> Vec<u8> {
        let target = self.sim.target_range / self.angle().to_radians().cos().max(0.2);
        let width = (max_range / 50.0).max(0.05);
        let stddev = self.sim.noise_stddev;

        (0..num_bins)
            .map(|i| {
                let r = crate::config::bin_range(max_range, num_bins, i);
                let echo = ECHO_PEAK * (-((r - target) / width).powi(2)).exp();
                let ringdown = RINGDOWN_PEAK * (-r * 4.0).exp();
                let value = NOISE_FLOOR + echo + ringdown + self.noise.gaussian(stddev);
                value.round().clamp(0.0, 255.0) as u8
            })
            .collect()
    }
}

fn raw_position(angle: f32) -> i32 {
    (angle * 10.0 / 3.0).round() as i32 + HEAD_POSITION_CENTER
}
