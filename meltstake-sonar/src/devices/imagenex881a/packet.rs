//! Switch command packets for the 881A
//!
//! Every command to the head is a full 27-byte switch data block; there is no
//! separate "configure" or "identify" opcode. What differs between a hold
//! (report position, do not move) and a step is the step size and the reverse
//! flag:
//!
//! ```text
//! FE 44 | head | range | 00 | rev/hold | 43 | 00 | gain | logf | absorption
//!       | train | sector | step | pulse | 00 00 00 00 | points | 08 | 06
//!       | 00 | calibrate | delay | frequency | FD
//! ```

use super::constants::*;
use crate::config::SonarConfig;
use crate::types::StepDirection;

/// Switch command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchCommand {
    data: [u8; SWITCH_COMMAND_LEN],
}

impl SwitchCommand {
    /// Build the switch block for `config` with stepping disabled
    pub fn hold(config: &SonarConfig) -> Self {
        let mut data = [0u8; SWITCH_COMMAND_LEN];
        data[0] = SWITCH_HEADER_1;
        data[1] = SWITCH_HEADER_2;
        data[SW_HEAD_ID] = DEFAULT_HEAD_ID;
        data[SW_RANGE] = config.range;
        data[SW_MASTER_SLAVE] = MASTER_SLAVE_SLAVE;
        data[SW_START_GAIN] = config.start_gain;
        data[SW_LOGF] = config.log_gain;
        data[SW_ABSORPTION] = config.absorption;
        data[SW_TRAIN_ANGLE] = config.train_angle_code();
        data[SW_SECTOR_WIDTH] = config.sector_width_code();
        data[SW_PULSE_LENGTH] = config.pulse_length;
        data[SW_DATA_POINTS] = config.data_points_code();
        data[SW_RESOLUTION] = RESOLUTION_8_BIT;
        data[SW_BAUD] = BAUD_CODE_115200;
        data[SW_SWITCH_DELAY] = config.switch_delay;
        data[SW_FREQUENCY] = config.frequency;
        data[SWITCH_COMMAND_LEN - 1] = SWITCH_TERMINATOR;
        Self { data }
    }

    /// Build a "step one position and report" command
    pub fn step(config: &SonarConfig, direction: StepDirection) -> Self {
        let mut cmd = Self::hold(config);
        cmd.data[SW_STEP_SIZE] = config.step_size;
        cmd.data[SW_REV_HOLD] = match direction {
            StepDirection::Clockwise => 0x00,
            StepDirection::CounterClockwise => FLAG_REVERSE,
        };
        cmd
    }

    /// Request transducer calibration with this command
    pub fn with_calibration(mut self) -> Self {
        self.data[SW_CALIBRATE] = 1;
        self
    }

    /// Get packet bytes for sending
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Whether this command moves the head
    pub fn is_step(&self) -> bool {
        self.data[SW_STEP_SIZE] != 0
    }

    /// Direction the head will step, if this is a step command
    pub fn direction(&self) -> Option<StepDirection> {
        if !self.is_step() {
            None
        } else if self.data[SW_REV_HOLD] & FLAG_REVERSE != 0 {
            Some(StepDirection::CounterClockwise)
        } else {
            Some(StepDirection::Clockwise)
        }
    }
}

/// Fields of a received switch block, as the head interprets them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchFields {
    pub head_id: u8,
    pub range: u8,
    pub reverse: bool,
    pub train_angle: u8,
    pub sector_width: u8,
    pub step_size: u8,
    pub data_points: u8,
}

/// Parse a switch block; `None` if framing is wrong
pub fn parse_switch(bytes: &[u8]) -> Option<SwitchFields> {
    if bytes.len() != SWITCH_COMMAND_LEN
        || bytes[0] != SWITCH_HEADER_1
        || bytes[1] != SWITCH_HEADER_2
        || bytes[SWITCH_COMMAND_LEN - 1] != SWITCH_TERMINATOR
    {
        return None;
    }
    Some(SwitchFields {
        head_id: bytes[SW_HEAD_ID],
        range: bytes[SW_RANGE],
        reverse: bytes[SW_REV_HOLD] & FLAG_REVERSE != 0,
        train_angle: bytes[SW_TRAIN_ANGLE],
        sector_width: bytes[SW_SECTOR_WIDTH],
        step_size: bytes[SW_STEP_SIZE],
        data_points: bytes[SW_DATA_POINTS],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hold_layout() {
        let config = SonarConfig::default();
        let cmd = SwitchCommand::hold(&config);
        let bytes = cmd.as_bytes();

        assert_eq!(bytes.len(), 27);
        assert_eq!(bytes[0], 0xFE);
        assert_eq!(bytes[1], 0x44);
        assert_eq!(bytes[2], 0x10);
        assert_eq!(bytes[3], config.range);
        assert_eq!(bytes[6], 0x43);
        assert_eq!(bytes[13], 0); // no step
        assert_eq!(bytes[19], 25); // 250 bins
        assert_eq!(bytes[20], 8);
        assert_eq!(bytes[21], 0x06);
        assert_eq!(bytes[25], config.frequency);
        assert_eq!(bytes[26], 0xFD);
        assert!(!cmd.is_step());
        assert_eq!(cmd.direction(), None);
    }

    #[test]
    fn test_step_direction_flag() {
        let config = SonarConfig {
            step_size: 4,
            ..SonarConfig::default()
        };
        let cw = SwitchCommand::step(&config, StepDirection::Clockwise);
        let ccw = SwitchCommand::step(&config, StepDirection::CounterClockwise);

        assert_eq!(cw.as_bytes()[5], 0x00);
        assert_eq!(ccw.as_bytes()[5], 0x40);
        assert_eq!(cw.as_bytes()[13], 4);
        assert_eq!(cw.direction(), Some(StepDirection::Clockwise));
        assert_eq!(ccw.direction(), Some(StepDirection::CounterClockwise));
    }

    #[test]
    fn test_calibration_flag() {
        let cmd = SwitchCommand::hold(&SonarConfig::default()).with_calibration();
        assert_eq!(cmd.as_bytes()[23], 1);
    }

    #[test]
    fn test_parse_switch_round_trip_fields() {
        let config = SonarConfig::default();
        let cmd = SwitchCommand::step(&config, StepDirection::CounterClockwise);
        let fields = parse_switch(cmd.as_bytes()).unwrap();

        assert_eq!(fields.head_id, 0x10);
        assert!(fields.reverse);
        assert_eq!(fields.step_size, 1);
        assert_eq!(fields.data_points, 25);
        assert!(parse_switch(&cmd.as_bytes()[..26]).is_none());
    }
}
