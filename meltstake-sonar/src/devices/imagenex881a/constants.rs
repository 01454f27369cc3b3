//! Constants for the Imagenex 881A sonar head

// Switch command framing
pub const SWITCH_HEADER_1: u8 = 0xFE;
pub const SWITCH_HEADER_2: u8 = 0x44; // Switch data command
pub const SWITCH_TERMINATOR: u8 = 0xFD;
pub const SWITCH_COMMAND_LEN: usize = 27;

// Switch command fixed values
pub const DEFAULT_HEAD_ID: u8 = 0x10;
pub const MASTER_SLAVE_SLAVE: u8 = 0x43; // Head only answers commands
pub const RESOLUTION_8_BIT: u8 = 8; // One sample per byte
pub const BAUD_CODE_115200: u8 = 0x06;
pub const FLAG_REVERSE: u8 = 0x40; // Byte 5 bit 6: step counter-clockwise

// Switch command byte offsets
pub const SW_HEAD_ID: usize = 2;
pub const SW_RANGE: usize = 3;
pub const SW_REV_HOLD: usize = 5;
pub const SW_MASTER_SLAVE: usize = 6;
pub const SW_START_GAIN: usize = 8;
pub const SW_LOGF: usize = 9;
pub const SW_ABSORPTION: usize = 10;
pub const SW_TRAIN_ANGLE: usize = 11;
pub const SW_SECTOR_WIDTH: usize = 12;
pub const SW_STEP_SIZE: usize = 13;
pub const SW_PULSE_LENGTH: usize = 14;
pub const SW_DATA_POINTS: usize = 19;
pub const SW_RESOLUTION: usize = 20;
pub const SW_BAUD: usize = 21;
pub const SW_CALIBRATE: usize = 23;
pub const SW_SWITCH_DELAY: usize = 24;
pub const SW_FREQUENCY: usize = 25;

// Response framing: 'I' <format> 'X' ... data ... 0xFC
pub const HEADER_PREFIX: u8 = b'I';
pub const HEADER_SUFFIX: u8 = b'X';
pub const FORMAT_ORIENTATION: u8 = b'O';
pub const RESPONSE_TERMINATOR: u8 = 0xFC;
pub const RESPONSE_HEADER_LEN: usize = 12;
pub const MIN_FRAME_LEN: usize = RESPONSE_HEADER_LEN + 1;

// Response byte offsets
pub const OFFSET_FORMAT: usize = 1;
pub const OFFSET_HEAD_ID: usize = 3;
pub const OFFSET_STATUS: usize = 4;
pub const OFFSET_HEAD_POS_LO: usize = 5;
pub const OFFSET_HEAD_POS_HI: usize = 6;
pub const OFFSET_RANGE: usize = 7;
pub const OFFSET_PROFILE_LO: usize = 8;
pub const OFFSET_PROFILE_HI: usize = 9;
pub const OFFSET_DATA_LEN_LO: usize = 10;
pub const OFFSET_DATA_LEN_HI: usize = 11;

// Flag masks
pub const FLAG_STEP_CLOCKWISE: u8 = 0x40; // Head position high byte
pub const STATUS_SWITCHES_ACCEPTED: u8 = 0x40;
pub const STATUS_CHARACTER_OVERRUN: u8 = 0x80;

// Head position encoding: degrees = (raw - 600) * 0.3
pub const HEAD_POSITION_CENTER: i32 = 600;
pub const HEAD_POSITION_MAX: i32 = 0x1FFF; // 13 bits across two 7/6-bit bytes

// Orientation frame (IOX) field offsets, each a 7-bit split pair
pub const ORIENT_TEMP_EXTERNAL: usize = 12;
pub const ORIENT_TEMP_INTERNAL: usize = 14;
pub const ORIENT_DEPTH: usize = 16;
pub const ORIENT_PITCH: usize = 18;
pub const ORIENT_ROLL: usize = 20;
pub const ORIENT_HEADING: usize = 22;
pub const ORIENT_GYRO_HEADING: usize = 24;
pub const ORIENT_MIN_DATA_LEN: usize = 14;

// Timing
pub const READ_POLL_INTERVAL_MS: u64 = 1;
