//! Pump bus packets, commands, and the reference serial framing.
//!
//! A packet is `dest, type, payload[4]`. On the wire each packet travels as a
//! fixed 8-byte frame followed by a CRC-16/ARC over the first six bytes.
//! Frames carry no start marker; a partial frame that goes quiet for longer
//! than the frame gap is dropped so the receiver resynchronises on the next
//! byte.

use core::fmt;

use heapless::Vec;

use crate::hal::SerialPort;

/// Destination byte addressing every node on the bus.
pub const DEST_BROADCAST: u8 = 0xFF;
/// Destination byte used for replies to the bus coordinator.
pub const DEST_COORDINATOR: u8 = 0x00;
/// Bytes in one encoded frame.
pub const FRAME_LEN: usize = 8;
const BODY_LEN: usize = FRAME_LEN - 2;

/// Packet type codes carried in the `type` byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PacketType {
    Ping = 3,
    SetMotorSpeed = 4,
    TickDispense = 5,
    TimeDispense = 6,
    LedOff = 7,
    LedIdle = 8,
    LedDispense = 9,
    LedDrinkDone = 10,
    IsDispensing = 11,
    LiquidLevel = 12,
    UpdateLiquidLevel = 13,
    IdConflict = 14,
    LedClean = 15,
    SetCurrentThreshold = 16,
    SavedTickCount = 17,
    ResetSavedTickCount = 18,
    CommTest = 0xFE,
}

impl PacketType {
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn from_raw(code: u8) -> Option<Self> {
        Some(match code {
            3 => PacketType::Ping,
            4 => PacketType::SetMotorSpeed,
            5 => PacketType::TickDispense,
            6 => PacketType::TimeDispense,
            7 => PacketType::LedOff,
            8 => PacketType::LedIdle,
            9 => PacketType::LedDispense,
            10 => PacketType::LedDrinkDone,
            11 => PacketType::IsDispensing,
            12 => PacketType::LiquidLevel,
            13 => PacketType::UpdateLiquidLevel,
            14 => PacketType::IdConflict,
            15 => PacketType::LedClean,
            16 => PacketType::SetCurrentThreshold,
            17 => PacketType::SavedTickCount,
            18 => PacketType::ResetSavedTickCount,
            0xFE => PacketType::CommTest,
            _ => return None,
        })
    }
}

/// One decoded packet.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Packet {
    pub dest: u8,
    pub kind: u8,
    pub payload: [u8; 4],
}

impl Packet {
    #[must_use]
    pub const fn new(dest: u8, kind: PacketType, payload: [u8; 4]) -> Self {
        Self {
            dest,
            kind: kind.to_raw(),
            payload,
        }
    }

    #[must_use]
    pub const fn with_u8(dest: u8, kind: PacketType, value: u8) -> Self {
        Self::new(dest, kind, [value, 0, 0, 0])
    }

    #[must_use]
    pub const fn with_u16(dest: u8, kind: PacketType, value: u16) -> Self {
        let bytes = value.to_le_bytes();
        Self::new(dest, kind, [bytes[0], bytes[1], 0, 0])
    }

    #[must_use]
    pub const fn with_u32(dest: u8, kind: PacketType, value: u32) -> Self {
        Self::new(dest, kind, value.to_le_bytes())
    }

    #[must_use]
    pub const fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_raw(self.kind)
    }

    #[must_use]
    pub const fn u8_arg(&self) -> u8 {
        self.payload[0]
    }

    #[must_use]
    pub const fn u16_arg(&self) -> u16 {
        u16::from_le_bytes([self.payload[0], self.payload[1]])
    }

    #[must_use]
    pub const fn u32_arg(&self) -> u32 {
        u32::from_le_bytes(self.payload)
    }

    /// Returns `true` when a node with `id` must act on this packet.
    #[must_use]
    pub const fn is_for(&self, id: u8) -> bool {
        self.dest == DEST_BROADCAST || self.dest == id
    }

    /// Encodes the packet as one wire frame.
    #[must_use]
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut frame = [0u8; FRAME_LEN];
        frame[0] = self.dest;
        frame[1] = self.kind;
        frame[2..BODY_LEN].copy_from_slice(&self.payload);
        let crc = crc16(&frame[..BODY_LEN]).to_le_bytes();
        frame[BODY_LEN..].copy_from_slice(&crc);
        frame
    }

    /// Decodes a complete wire frame.
    pub fn decode(frame: &[u8; FRAME_LEN]) -> Result<Self, FrameError> {
        let expected = crc16(&frame[..BODY_LEN]);
        let received = u16::from_le_bytes([frame[BODY_LEN], frame[BODY_LEN + 1]]);
        if expected != received {
            return Err(FrameError::Crc { expected, received });
        }

        Ok(Self {
            dest: frame[0],
            kind: frame[1],
            payload: [frame[2], frame[3], frame[4], frame[5]],
        })
    }
}

/// Commands a node understands.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Ping,
    SetMotorSpeed(u8),
    DispenseTicks(u32),
    DispenseTimed(u32),
    QueryIsDispensing,
    QueryLiquidLevel,
    RefreshLiquidLevel,
    LedOff,
    LedIdle,
    LedDispense,
    LedDrinkDone,
    LedClean,
    CommTest,
    IdConflict,
    SetCurrentThreshold(u16),
    QuerySavedTicks,
    ResetSavedTicks,
}

impl Command {
    /// Interprets a packet; unknown type codes yield `None`.
    #[must_use]
    pub fn decode(packet: &Packet) -> Option<Self> {
        let command = match packet.packet_type()? {
            PacketType::Ping => Command::Ping,
            PacketType::SetMotorSpeed => Command::SetMotorSpeed(packet.u8_arg()),
            PacketType::TickDispense => Command::DispenseTicks(packet.u32_arg()),
            PacketType::TimeDispense => Command::DispenseTimed(packet.u32_arg()),
            PacketType::IsDispensing => Command::QueryIsDispensing,
            PacketType::LiquidLevel => Command::QueryLiquidLevel,
            PacketType::UpdateLiquidLevel => Command::RefreshLiquidLevel,
            PacketType::LedOff => Command::LedOff,
            PacketType::LedIdle => Command::LedIdle,
            PacketType::LedDispense => Command::LedDispense,
            PacketType::LedDrinkDone => Command::LedDrinkDone,
            PacketType::LedClean => Command::LedClean,
            PacketType::CommTest => Command::CommTest,
            PacketType::IdConflict => Command::IdConflict,
            PacketType::SetCurrentThreshold => Command::SetCurrentThreshold(packet.u16_arg()),
            PacketType::SavedTickCount => Command::QuerySavedTicks,
            PacketType::ResetSavedTickCount => Command::ResetSavedTicks,
        };
        Some(command)
    }

    /// Builds the packet that carries this command to `dest`.
    #[must_use]
    pub const fn to_packet(self, dest: u8) -> Packet {
        match self {
            Command::Ping => Packet::new(dest, PacketType::Ping, [0; 4]),
            Command::SetMotorSpeed(speed) => Packet::with_u8(dest, PacketType::SetMotorSpeed, speed),
            Command::DispenseTicks(ticks) => Packet::with_u32(dest, PacketType::TickDispense, ticks),
            Command::DispenseTimed(ms) => Packet::with_u32(dest, PacketType::TimeDispense, ms),
            Command::QueryIsDispensing => Packet::new(dest, PacketType::IsDispensing, [0; 4]),
            Command::QueryLiquidLevel => Packet::new(dest, PacketType::LiquidLevel, [0; 4]),
            Command::RefreshLiquidLevel => Packet::new(dest, PacketType::UpdateLiquidLevel, [0; 4]),
            Command::LedOff => Packet::new(dest, PacketType::LedOff, [0; 4]),
            Command::LedIdle => Packet::new(dest, PacketType::LedIdle, [0; 4]),
            Command::LedDispense => Packet::new(dest, PacketType::LedDispense, [0; 4]),
            Command::LedDrinkDone => Packet::new(dest, PacketType::LedDrinkDone, [0; 4]),
            Command::LedClean => Packet::new(dest, PacketType::LedClean, [0; 4]),
            Command::CommTest => Packet::new(dest, PacketType::CommTest, [0; 4]),
            Command::IdConflict => Packet::new(dest, PacketType::IdConflict, [0; 4]),
            Command::SetCurrentThreshold(threshold) => {
                Packet::with_u16(dest, PacketType::SetCurrentThreshold, threshold)
            }
            Command::QuerySavedTicks => Packet::new(dest, PacketType::SavedTickCount, [0; 4]),
            Command::ResetSavedTicks => Packet::new(dest, PacketType::ResetSavedTickCount, [0; 4]),
        }
    }

    /// Commands that energise the motor.
    #[must_use]
    pub const fn affects_motor(self) -> bool {
        matches!(
            self,
            Command::SetMotorSpeed(_) | Command::DispenseTicks(_) | Command::DispenseTimed(_)
        )
    }

    /// LED commands that are suppressed while the current-sense fault is latched.
    #[must_use]
    pub const fn affects_led(self) -> bool {
        matches!(
            self,
            Command::LedIdle | Command::LedDispense | Command::LedDrinkDone | Command::LedClean
        )
    }
}

/// Framing failures.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    Crc { expected: u16, received: u16 },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Crc { expected, received } => {
                write!(f, "crc mismatch (expected {expected:#06x}, got {received:#06x})")
            }
        }
    }
}

/// One unit produced by the packet receiver.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Received {
    Packet(Packet),
    CrcFailure,
    /// The link observed a bus reset while receiving.
    Reset,
}

/// CRC-16/ARC (reflected polynomial 0xA001, zero initial value).
#[must_use]
pub fn crc16(bytes: &[u8]) -> u16 {
    bytes.iter().fold(0u16, |crc, &byte| {
        let mut crc = crc ^ u16::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 == 1 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
        }
        crc
    })
}

/// Reassembles fixed-size frames from a byte stream.
#[derive(Clone, Debug)]
pub struct FrameAssembler {
    buffer: Vec<u8, FRAME_LEN>,
    last_byte_at: u32,
    gap: u32,
}

impl FrameAssembler {
    #[must_use]
    pub const fn new(gap: u32) -> Self {
        Self {
            buffer: Vec::new(),
            last_byte_at: 0,
            gap,
        }
    }

    /// Feeds one byte received at `now`.
    pub fn push(&mut self, byte: u8, now: u32) -> Option<Received> {
        if !self.buffer.is_empty() && now.wrapping_sub(self.last_byte_at) > self.gap {
            self.buffer.clear();
        }
        self.last_byte_at = now;

        // Cannot overflow: the buffer is drained as soon as it is full.
        let _ = self.buffer.push(byte);
        if !self.buffer.is_full() {
            return None;
        }

        let mut frame = [0u8; FRAME_LEN];
        frame.copy_from_slice(&self.buffer);
        self.buffer.clear();
        Some(match Packet::decode(&frame) {
            Ok(packet) => Received::Packet(packet),
            Err(FrameError::Crc { .. }) => Received::CrcFailure,
        })
    }

    /// Drops any partially received frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Packet-level view of the bus used by the command dispatcher.
pub trait PacketLink {
    type Port: SerialPort;

    /// Raw byte access used by address negotiation and the loopback test.
    fn port(&mut self) -> &mut Self::Port;

    /// Returns the next received unit without blocking.
    fn poll(&mut self, now: u32) -> Option<Received>;

    fn send(&mut self, packet: &Packet);

    /// Discards any partially received packet.
    fn resync(&mut self) {}

    fn send_u8(&mut self, kind: PacketType, value: u8) {
        self.send(&Packet::with_u8(DEST_COORDINATOR, kind, value));
    }

    fn send_u16(&mut self, kind: PacketType, value: u16) {
        self.send(&Packet::with_u16(DEST_COORDINATOR, kind, value));
    }

    fn send_u32(&mut self, kind: PacketType, value: u32) {
        self.send(&Packet::with_u32(DEST_COORDINATOR, kind, value));
    }
}

/// [`PacketLink`] built from a [`SerialPort`] and the fixed-size framing.
pub struct FramedLink<S> {
    port: S,
    assembler: FrameAssembler,
}

impl<S: SerialPort> FramedLink<S> {
    #[must_use]
    pub const fn new(port: S, gap: u32) -> Self {
        Self {
            port,
            assembler: FrameAssembler::new(gap),
        }
    }
}

impl<S: SerialPort> PacketLink for FramedLink<S> {
    type Port = S;

    fn port(&mut self) -> &mut S {
        &mut self.port
    }

    fn poll(&mut self, now: u32) -> Option<Received> {
        while let Some(byte) = self.port.read_byte() {
            if let Some(received) = self.assembler.push(byte, now) {
                return Some(received);
            }
        }
        None
    }

    fn send(&mut self, packet: &Packet) {
        for byte in packet.encode() {
            self.port.write_byte(byte);
        }
    }

    fn resync(&mut self) {
        self.assembler.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_matches_reference_vector() {
        assert_eq!(crc16(b"123456789"), 0xBB3D);
    }

    #[test]
    fn corrupted_frame_is_reported() {
        let mut frame = Command::DispenseTicks(100).to_packet(7).encode();
        frame[3] ^= 0x40;

        assert!(matches!(Packet::decode(&frame), Err(FrameError::Crc { .. })));
    }

    #[test]
    fn command_payloads_decode() {
        let packet = Command::SetCurrentThreshold(512).to_packet(DEST_BROADCAST);
        assert_eq!(packet.u16_arg(), 512);
        assert_eq!(Command::decode(&packet), Some(Command::SetCurrentThreshold(512)));

        let packet = Command::DispenseTimed(70_000).to_packet(3);
        assert_eq!(Command::decode(&packet), Some(Command::DispenseTimed(70_000)));
    }

    #[test]
    fn unknown_type_is_not_a_command() {
        let packet = Packet {
            dest: 1,
            kind: 0x42,
            payload: [0; 4],
        };

        assert_eq!(packet.packet_type(), None);
        assert_eq!(Command::decode(&packet), None);
    }

    #[test]
    fn addressing_accepts_own_id_and_broadcast() {
        let unicast = Command::Ping.to_packet(3);
        let broadcast = Command::Ping.to_packet(DEST_BROADCAST);

        assert!(unicast.is_for(3));
        assert!(!unicast.is_for(7));
        assert!(broadcast.is_for(7));
    }

    #[test]
    fn assembler_yields_packet_after_full_frame() {
        let packet = Command::DispenseTicks(250).to_packet(9);
        let mut assembler = FrameAssembler::new(5);

        let mut result = None;
        for (offset, byte) in packet.encode().into_iter().enumerate() {
            result = assembler.push(byte, u32::try_from(offset).expect("small offset"));
        }

        assert_eq!(result, Some(Received::Packet(packet)));
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn assembler_drops_stale_partial_frame() {
        let packet = Command::Ping.to_packet(2);
        let frame = packet.encode();
        let mut assembler = FrameAssembler::new(5);

        for &byte in &frame[..3] {
            assert_eq!(assembler.push(byte, 0), None);
        }

        let mut result = None;
        for byte in frame {
            result = assembler.push(byte, 100);
        }

        assert_eq!(result, Some(Received::Packet(packet)));
    }

    #[test]
    fn assembler_reports_crc_failure() {
        let mut frame = Command::LedIdle.to_packet(4).encode();
        frame[7] ^= 0xFF;
        let mut assembler = FrameAssembler::new(5);

        let mut result = None;
        for byte in frame {
            result = assembler.push(byte, 0);
        }

        assert_eq!(result, Some(Received::CrcFailure));
    }
}
