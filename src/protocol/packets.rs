//! Packet definitions module
//!
//! Opcodes, framing, and the fixed-layout control messages the replicator
//! sends alongside field updates.
//!
//! Frames are `u16` big-endian size (payload plus opcode), `u16`
//! little-endian opcode, then the payload.

use bytes::Bytes;

use crate::error::EncodeError;
use crate::game::avatar::{SpeedKind, Vector3};
use crate::game::update::compression::Envelope;
use crate::net::buffer::{PacketBuffer, MAX_PACKET_SIZE};

/// Bytes the opcode adds to the size header
pub const OPCODE_LEN: usize = 2;

/// Largest payload a frame can carry
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - OPCODE_LEN;

/// Outbound message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    SmsgNewWorld = 0x03E,
    SmsgTransferPending = 0x03F,
    SmsgUpdateObject = 0x0A9,
    SmsgDestroyObject = 0x0AA,
    MsgMoveSetWalkSpeed = 0x0D1,
    MsgMoveSetTurnRateCheat = 0x0DA,
    MsgMoveWorldportAck = 0x0DC,
    SmsgForceSpeedChange = 0x0E2,
    SmsgForceSwimSpeedChange = 0x0E6,
    SmsgCompressedUpdateObject = 0x1F6,
}

impl Opcode {
    pub const ALL: [Opcode; 10] = [
        Opcode::SmsgNewWorld,
        Opcode::SmsgTransferPending,
        Opcode::SmsgUpdateObject,
        Opcode::SmsgDestroyObject,
        Opcode::MsgMoveSetWalkSpeed,
        Opcode::MsgMoveSetTurnRateCheat,
        Opcode::MsgMoveWorldportAck,
        Opcode::SmsgForceSpeedChange,
        Opcode::SmsgForceSwimSpeedChange,
        Opcode::SmsgCompressedUpdateObject,
    ];

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_u16() == value)
    }

    /// Opcode announcing a movement rate
    pub fn for_speed(kind: SpeedKind) -> Self {
        match kind {
            SpeedKind::Run => Opcode::SmsgForceSpeedChange,
            SpeedKind::Swim => Opcode::SmsgForceSwimSpeedChange,
            SpeedKind::Walk => Opcode::MsgMoveSetWalkSpeed,
            SpeedKind::Turn => Opcode::MsgMoveSetTurnRateCheat,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::SmsgNewWorld => "SMSG_NEW_WORLD",
            Opcode::SmsgTransferPending => "SMSG_TRANSFER_PENDING",
            Opcode::SmsgUpdateObject => "SMSG_UPDATE_OBJECT",
            Opcode::SmsgDestroyObject => "SMSG_DESTROY_OBJECT",
            Opcode::MsgMoveSetWalkSpeed => "MSG_MOVE_SET_WALK_SPEED",
            Opcode::MsgMoveSetTurnRateCheat => "MSG_MOVE_SET_TURN_RATE_CHEAT",
            Opcode::MsgMoveWorldportAck => "MSG_MOVE_WORLDPORT_ACK",
            Opcode::SmsgForceSpeedChange => "SMSG_FORCE_SPEED_CHANGE",
            Opcode::SmsgForceSwimSpeedChange => "SMSG_FORCE_SWIM_SPEED_CHANGE",
            Opcode::SmsgCompressedUpdateObject => "SMSG_COMPRESSED_UPDATE_OBJECT",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// An opcode-tagged payload ready for a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    opcode: Opcode,
    payload: Bytes,
}

impl Packet {
    pub fn new(opcode: Opcode, payload: Bytes) -> Result<Self, EncodeError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(EncodeError::EncodingOverflow {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self { opcode, payload })
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Size header, opcode, payload
    pub fn to_frame(&self) -> Bytes {
        let mut buffer = PacketBuffer::with_capacity(self.payload.len() + 4);
        buffer.write_ushort((self.payload.len() + OPCODE_LEN) as u16);
        buffer.write_ushort_le(self.opcode.as_u16());
        buffer.write_bytes(&self.payload);
        buffer.freeze()
    }

    /// Parse one complete frame
    pub fn from_frame(frame: &[u8]) -> Result<Self, PacketDecodeError> {
        let mut buffer = PacketBuffer::from_bytes(frame);
        if buffer.remaining() < 4 {
            return Err(PacketDecodeError::InsufficientData {
                expected: 4,
                actual: buffer.remaining(),
            });
        }

        let size = buffer.read_ushort() as usize;
        if size < OPCODE_LEN {
            return Err(PacketDecodeError::Malformed(format!(
                "frame size {} is smaller than the opcode",
                size
            )));
        }
        let raw = buffer.read_ushort_le();
        let opcode = Opcode::from_u16(raw).ok_or_else(|| PacketDecodeError::InvalidValue {
            field: "opcode".to_string(),
            value: format!("{:#05x}", raw),
        })?;

        let payload_len = size - OPCODE_LEN;
        if buffer.remaining() != payload_len {
            return Err(PacketDecodeError::InsufficientData {
                expected: payload_len,
                actual: buffer.remaining(),
            });
        }

        Ok(Self {
            opcode,
            payload: Bytes::from(buffer.read_bytes(payload_len)),
        })
    }
}

/// Outgoing packet trait
pub trait OutgoingPacket {
    /// The packet opcode
    fn opcode(&self) -> Opcode;

    /// Encode the payload to a buffer
    fn encode(&self, buffer: &mut PacketBuffer);

    /// Encode to a new buffer
    fn to_buffer(&self) -> PacketBuffer {
        let mut buffer = PacketBuffer::with_capacity(64);
        self.encode(&mut buffer);
        buffer
    }

    /// Encode into a transport packet
    fn to_packet(&self) -> Result<Packet, EncodeError> {
        Packet::new(self.opcode(), self.to_buffer().freeze())
    }
}

/// Packet decode error
#[derive(Debug, Clone)]
pub enum PacketDecodeError {
    /// Not enough data in buffer
    InsufficientData { expected: usize, actual: usize },
    /// Invalid field value
    InvalidValue { field: String, value: String },
    /// Malformed packet structure
    Malformed(String),
}

impl std::fmt::Display for PacketDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketDecodeError::InsufficientData { expected, actual } => {
                write!(
                    f,
                    "Insufficient data: expected {} bytes, got {}",
                    expected, actual
                )
            }
            PacketDecodeError::InvalidValue { field, value } => {
                write!(f, "Invalid value for field '{}': {}", field, value)
            }
            PacketDecodeError::Malformed(msg) => {
                write!(f, "Malformed packet: {}", msg)
            }
        }
    }
}

impl std::error::Error for PacketDecodeError {}

// ============ Outgoing Packets ============

/// Field update, compressed or not
#[derive(Debug, Clone)]
pub struct UpdateObjectPacket {
    pub envelope: Envelope,
}

impl OutgoingPacket for UpdateObjectPacket {
    fn opcode(&self) -> Opcode {
        if self.envelope.is_compressed() {
            Opcode::SmsgCompressedUpdateObject
        } else {
            Opcode::SmsgUpdateObject
        }
    }

    fn encode(&self, buffer: &mut PacketBuffer) {
        buffer.write_bytes(self.envelope.as_bytes());
    }
}

/// Entity left view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestroyObjectPacket {
    pub guid: u64,
}

impl OutgoingPacket for DestroyObjectPacket {
    fn opcode(&self) -> Opcode {
        Opcode::SmsgDestroyObject
    }

    fn encode(&self, buffer: &mut PacketBuffer) {
        buffer.write_ulong_le(self.guid);
    }
}

/// In-place relocation acknowledgement (no loading screen)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldportAckPacket {
    pub transport_guid: u64,
    pub transport_offset: Vector3,
    pub transport_orientation: f32,
    pub position: Vector3,
    pub orientation: f32,
    pub movement_flags: u32,
}

impl OutgoingPacket for WorldportAckPacket {
    fn opcode(&self) -> Opcode {
        Opcode::MsgMoveWorldportAck
    }

    fn encode(&self, buffer: &mut PacketBuffer) {
        buffer.write_ulong_le(self.transport_guid);
        buffer.write_float_le(self.transport_offset.x);
        buffer.write_float_le(self.transport_offset.y);
        buffer.write_float_le(self.transport_offset.z);
        buffer.write_float_le(self.transport_orientation);
        buffer.write_float_le(self.position.x);
        buffer.write_float_le(self.position.y);
        buffer.write_float_le(self.position.z);
        buffer.write_float_le(self.orientation);
        // pitch
        buffer.write_float_le(0.0);
        buffer.write_uint_le(self.movement_flags);
    }
}

/// First half of the loading handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPendingPacket {
    pub map: u32,
}

impl OutgoingPacket for TransferPendingPacket {
    fn opcode(&self) -> Opcode {
        Opcode::SmsgTransferPending
    }

    fn encode(&self, buffer: &mut PacketBuffer) {
        buffer.write_uint_le(self.map);
    }
}

/// Second half of the loading handshake; lets the client finish loading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewWorldPacket {
    pub map: u8,
    pub position: Vector3,
    pub orientation: f32,
}

impl OutgoingPacket for NewWorldPacket {
    fn opcode(&self) -> Opcode {
        Opcode::SmsgNewWorld
    }

    fn encode(&self, buffer: &mut PacketBuffer) {
        buffer.write_ubyte(self.map);
        buffer.write_float_le(self.position.x);
        buffer.write_float_le(self.position.y);
        buffer.write_float_le(self.position.z);
        buffer.write_float_le(self.orientation);
    }
}

/// Movement rate announcement to the avatar's own connection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedChangePacket {
    pub kind: SpeedKind,
    pub speed: f32,
}

impl OutgoingPacket for SpeedChangePacket {
    fn opcode(&self) -> Opcode {
        Opcode::for_speed(self.kind)
    }

    fn encode(&self, buffer: &mut PacketBuffer) {
        buffer.write_float_le(self.speed);
    }
}
