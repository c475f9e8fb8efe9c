// Feetech STS-series serial servo protocol
//
// Protocol is similar to Dynamixel Protocol 1.0:
// Packet format: [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]
// Swerve modules use one servo in velocity mode (drive) and one in
// position mode (steer).

use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 20;

/// Servo position resolution: 4096 steps per revolution
pub const STEPS_PER_REVOLUTION: u16 = 4096;

/// Largest goal magnitude accepted in multi-turn position mode
pub const MAX_MULTI_TURN_STEPS: i16 = 30719;

const HEADER: [u8; 2] = [0xFF, 0xFF];

#[repr(u8)]
#[derive(Debug, Clone, Copy)]
enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
}

/// Control table addresses used by the swerve servos
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Register {
    ModelNumber = 3,      // 2 bytes, read-only
    MinAngleLimit = 9,    // 2 bytes, EEPROM
    MaxAngleLimit = 11,   // 2 bytes, EEPROM
    OperatingMode = 33,   // 1 byte
    TorqueEnable = 40,    // 1 byte
    GoalPosition = 42,    // 2 bytes, sign-magnitude in multi-turn mode
    GoalVelocity = 46,    // 2 bytes, sign-magnitude
    Lock = 55,            // 1 byte
    PresentPosition = 56, // 2 bytes, read-only, sign-magnitude in multi-turn mode
    PresentVelocity = 58, // 2 bytes, read-only, sign-magnitude
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatingMode {
    Position = 0,
    Velocity = 1,
}

#[derive(Debug, thiserror::Error)]
pub enum FeetechError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from servo {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("Checksum mismatch for servo {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Servo {id} returned error status: 0x{status:02X}")]
    ServoError { id: u8, status: u8 },

    #[error("Timeout waiting for response from servo {id}")]
    Timeout { id: u8 },
}

pub type Result<T> = std::result::Result<T, FeetechError>;

/// Checksum over everything after the header
fn checksum(data: &[u8]) -> u8 {
    let sum: u32 = data.iter().map(|&b| b as u32).sum();
    !(sum as u8)
}

fn build_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(6 + params.len());
    packet.extend_from_slice(&HEADER);
    packet.push(id);
    packet.push((params.len() + 2) as u8); // instruction + params + checksum
    packet.push(instruction as u8);
    packet.extend_from_slice(params);
    packet.push(checksum(&packet[2..]));
    packet
}

/// Sign-magnitude encoding: bit 15 = direction, bits 0-14 = magnitude
pub fn encode_sign_magnitude(value: i16) -> u16 {
    let magnitude = value.unsigned_abs().min(0x7FFF);
    if value < 0 { 0x8000 | magnitude } else { magnitude }
}

pub fn decode_sign_magnitude(raw: u16) -> i16 {
    let magnitude = (raw & 0x7FFF) as i16;
    if raw & 0x8000 != 0 { -magnitude } else { magnitude }
}

/// Serial bus shared by every servo on the base
pub struct FeetechBus {
    port: Box<dyn SerialPort>,
}

impl FeetechBus {
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;
        Ok(Self { port })
    }

    fn send(&mut self, packet: &[u8]) -> Result<()> {
        self.port.write_all(packet)?;
        self.port.flush()?;
        Ok(())
    }

    /// Read one status packet and return its parameters
    fn receive(&mut self, expected_id: u8) -> Result<Vec<u8>> {
        let mut head = [0u8; 4];
        self.port.read_exact(&mut head).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                FeetechError::Timeout { id: expected_id }
            } else {
                FeetechError::Io(e)
            }
        })?;

        if head[..2] != HEADER {
            return Err(FeetechError::InvalidResponse {
                id: expected_id,
                reason: format!("Invalid header: {:02X?}", &head[..2]),
            });
        }
        let (id, length) = (head[2], head[3] as usize);
        if id != expected_id {
            return Err(FeetechError::InvalidResponse {
                id: expected_id,
                reason: format!("ID mismatch: got {}", id),
            });
        }
        if length < 2 {
            return Err(FeetechError::InvalidResponse {
                id,
                reason: format!("Length {} too short", length),
            });
        }

        // error byte + params + checksum
        let mut body = vec![0u8; length];
        self.port.read_exact(&mut body)?;

        let (payload, received) = body.split_at(length - 1);
        let mut summed = vec![id, length as u8];
        summed.extend_from_slice(payload);
        if checksum(&summed) != received[0] {
            return Err(FeetechError::ChecksumMismatch { id });
        }
        if payload[0] != 0 {
            return Err(FeetechError::ServoError {
                id,
                status: payload[0],
            });
        }
        Ok(payload[1..].to_vec())
    }

    pub fn ping(&mut self, id: u8) -> Result<bool> {
        self.send(&build_packet(id, Instruction::Ping, &[]))?;
        match self.receive(id) {
            Ok(_) => Ok(true),
            Err(FeetechError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, id: u8, register: Register, data: &[u8]) -> Result<()> {
        let mut params = Vec::with_capacity(1 + data.len());
        params.push(register as u8);
        params.extend_from_slice(data);
        debug!("Write servo {}: reg={:?}, data={:02X?}", id, register, data);
        self.send(&build_packet(id, Instruction::Write, &params))?;
        self.receive(id).map(|_| ())
    }

    fn read(&mut self, id: u8, register: Register, len: u8) -> Result<Vec<u8>> {
        self.send(&build_packet(id, Instruction::Read, &[register as u8, len]))?;
        let data = self.receive(id)?;
        if data.len() < len as usize {
            return Err(FeetechError::InvalidResponse {
                id,
                reason: format!("Expected {} bytes, got {}", len, data.len()),
            });
        }
        Ok(data)
    }

    pub fn write_u8(&mut self, id: u8, register: Register, value: u8) -> Result<()> {
        self.write(id, register, &[value])
    }

    pub fn write_u16(&mut self, id: u8, register: Register, value: u16) -> Result<()> {
        self.write(id, register, &value.to_le_bytes())
    }

    pub fn read_u8(&mut self, id: u8, register: Register) -> Result<u8> {
        Ok(self.read(id, register, 1)?[0])
    }

    pub fn read_u16(&mut self, id: u8, register: Register) -> Result<u16> {
        let data = self.read(id, register, 2)?;
        Ok(u16::from_le_bytes([data[0], data[1]]))
    }

    pub fn enable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 1)?;
        self.write_u8(id, Register::Lock, 1)
    }

    pub fn disable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 0)?;
        self.write_u8(id, Register::Lock, 0)
    }

    /// Torque must be disabled first
    pub fn set_operating_mode(&mut self, id: u8, mode: OperatingMode) -> Result<()> {
        self.write_u8(id, Register::OperatingMode, mode as u8)
    }

    pub fn set_velocity(&mut self, id: u8, steps_per_sec: i16) -> Result<()> {
        self.write_u16(id, Register::GoalVelocity, encode_sign_magnitude(steps_per_sec))
    }

    pub fn velocity(&mut self, id: u8) -> Result<i16> {
        Ok(decode_sign_magnitude(self.read_u16(id, Register::PresentVelocity)?))
    }

    /// Lift the angle limits so position mode tracks goals across the 0/4095
    /// seam. Torque must be disabled first.
    pub fn set_multi_turn(&mut self, id: u8) -> Result<()> {
        self.write_u16(id, Register::MinAngleLimit, 0)?;
        self.write_u16(id, Register::MaxAngleLimit, 0)
    }

    /// Multi-turn goal in steps, clamped to the servo's range
    pub fn set_goal_steps(&mut self, id: u8, steps: i32) -> Result<()> {
        let max = MAX_MULTI_TURN_STEPS as i32;
        let steps = steps.clamp(-max, max) as i16;
        self.write_u16(id, Register::GoalPosition, encode_sign_magnitude(steps))
    }

    /// Unwrapped present position in steps (multi-turn mode)
    pub fn present_steps(&mut self, id: u8) -> Result<i32> {
        Ok(decode_sign_magnitude(self.read_u16(id, Register::PresentPosition)?) as i32)
    }

    pub fn position(&mut self, id: u8) -> Result<u16> {
        Ok(self.read_u16(id, Register::PresentPosition)? % STEPS_PER_REVOLUTION)
    }

    pub fn model_number(&mut self, id: u8) -> Result<u16> {
        self.read_u16(id, Register::ModelNumber)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum() {
        // ID=1, Length=4, WRITE, Addr=30, Data=0, 2
        assert_eq!(checksum(&[1u8, 4, 0x03, 30, 0, 2]), 215);
    }

    #[test]
    fn test_sign_magnitude() {
        assert_eq!(encode_sign_magnitude(100), 100);
        assert_eq!(encode_sign_magnitude(-100), 0x8064);
        assert_eq!(encode_sign_magnitude(i16::MIN), 0xFFFF);
        assert_eq!(decode_sign_magnitude(0x8064), -100);
        assert_eq!(decode_sign_magnitude(0x0001), 1);
    }

    #[test]
    fn test_build_read_packet() {
        let packet = build_packet(12, Instruction::Read, &[Register::PresentPosition as u8, 2]);
        assert_eq!(packet.len(), 8);
        assert_eq!(&packet[..5], &[0xFF, 0xFF, 12, 4, 0x02]);
        assert_eq!(packet[5], 56);
        assert_eq!(packet[7], checksum(&packet[2..7]));
    }
}
