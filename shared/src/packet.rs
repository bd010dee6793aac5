//! Packet layouts.
//!
//! Every packet is a 4-byte header `{size: u16, type: u16}` followed by a
//! fixed-layout payload. All integers are little-endian and fields are packed
//! with no padding, which is exactly what bincode's default (legacy) encoding
//! produces for these structs.

use crate::codec::ProtocolError;
use crate::fixed::{AnimationName, StatusMessage, Username};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Byte length of [`PacketHeader`] on the wire.
pub const HEADER_SIZE: usize = 4;
/// Largest `size` a header may declare.
pub const MAX_PACKET_SIZE: usize = 1024;
/// Capacity of the tree array inside a [`TreeSpawn`].
pub const MAX_TREES_PER_PACKET: usize = 20;

/// Closed set of packet kinds.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    PlayerUpdate = 1,
    PlayerSpawn = 2,
    TigerSpawn = 3,
    TigerUpdate = 4,
    TreeSpawn = 5,
    LoginRequest = 6,
    LoginResponse = 7,
    PlayerDisconnect = 8,
    ClientReady = 9,
}

impl PacketType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::PlayerUpdate),
            2 => Some(Self::PlayerSpawn),
            3 => Some(Self::TigerSpawn),
            4 => Some(Self::TigerUpdate),
            5 => Some(Self::TreeSpawn),
            6 => Some(Self::LoginRequest),
            7 => Some(Self::LoginResponse),
            8 => Some(Self::PlayerDisconnect),
            9 => Some(Self::ClientReady),
            _ => None,
        }
    }

    /// Exact byte length (header included) of every packet of this kind.
    pub fn wire_size(self) -> usize {
        HEADER_SIZE
            + match self {
                Self::PlayerUpdate | Self::TigerUpdate => 4 + 4 * 4 + 64 + 4,
                Self::PlayerSpawn | Self::PlayerDisconnect => 4 + 32,
                Self::TigerSpawn => 4 + 3 * 4,
                Self::TreeSpawn => 4 + MAX_TREES_PER_PACKET * TreePlacement::WIRE_SIZE,
                Self::LoginRequest => 32,
                Self::LoginResponse => 4 + 1 + 128,
                Self::ClientReady => 4,
            }
    }

    /// Kinds only the server may originate.
    pub fn is_server_only(self) -> bool {
        matches!(
            self,
            Self::TigerSpawn | Self::TigerUpdate | Self::TreeSpawn | Self::LoginResponse
        )
    }
}

impl TryFrom<u16> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::from_u16(value).ok_or(ProtocolError::UnknownType(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub size: u16,
    pub packet_type: u16,
}

impl PacketHeader {
    /// Reads a header from the front of `bytes`, or `None` if fewer than
    /// [`HEADER_SIZE`] bytes are available.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            size: u16::from_le_bytes([bytes[0], bytes[1]]),
            packet_type: u16::from_le_bytes([bytes[2], bytes[3]]),
        })
    }

    pub fn write_to(&self, bytes: &mut [u8]) {
        bytes[0..2].copy_from_slice(&self.size.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.packet_type.to_le_bytes());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: Username,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub client_id: i32,
    pub success: bool,
    pub message: StatusMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerSpawn {
    pub player_id: i32,
    pub username: Username,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerUpdate {
    pub client_id: i32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub rot_y: f32,
    pub animation_file: AnimationName,
    pub animation_time: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerDisconnect {
    pub player_id: i32,
    pub username: Username,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClientReady {
    pub client_id: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TigerSpawn {
    pub tiger_id: i32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TigerUpdate {
    pub tiger_id: i32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub rot_y: f32,
    pub animation_file: AnimationName,
    pub animation_time: f32,
}

/// One decoration inside a [`TreeSpawn`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TreePlacement {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub rot_y: f32,
    /// 0: long tree, 1: normal tree
    pub tree_type: i32,
}

impl TreePlacement {
    pub const WIRE_SIZE: usize = 5 * 4;
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TreeSpawn {
    pub tree_count: i32,
    pub trees: [TreePlacement; MAX_TREES_PER_PACKET],
}

impl TreeSpawn {
    /// Packs up to [`MAX_TREES_PER_PACKET`] placements; the rest are ignored.
    pub fn from_placements(placements: &[TreePlacement]) -> Self {
        let mut packet = Self::default();
        let count = placements.len().min(MAX_TREES_PER_PACKET);
        packet.trees[..count].copy_from_slice(&placements[..count]);
        packet.tree_count = count as i32;
        packet
    }

    /// The populated prefix of the tree array. A count outside
    /// `0..=MAX_TREES_PER_PACKET` is clamped.
    pub fn placements(&self) -> &[TreePlacement] {
        let count = self.tree_count.clamp(0, MAX_TREES_PER_PACKET as i32) as usize;
        &self.trees[..count]
    }
}

/// A decoded packet of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    PlayerUpdate(PlayerUpdate),
    PlayerSpawn(PlayerSpawn),
    TigerSpawn(TigerSpawn),
    TigerUpdate(TigerUpdate),
    TreeSpawn(TreeSpawn),
    LoginRequest(LoginRequest),
    LoginResponse(LoginResponse),
    PlayerDisconnect(PlayerDisconnect),
    ClientReady(ClientReady),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::PlayerUpdate(_) => PacketType::PlayerUpdate,
            Packet::PlayerSpawn(_) => PacketType::PlayerSpawn,
            Packet::TigerSpawn(_) => PacketType::TigerSpawn,
            Packet::TigerUpdate(_) => PacketType::TigerUpdate,
            Packet::TreeSpawn(_) => PacketType::TreeSpawn,
            Packet::LoginRequest(_) => PacketType::LoginRequest,
            Packet::LoginResponse(_) => PacketType::LoginResponse,
            Packet::PlayerDisconnect(_) => PacketType::PlayerDisconnect,
            Packet::ClientReady(_) => PacketType::ClientReady,
        }
    }

    /// Serializes header and payload into one contiguous buffer.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let packet_type = self.packet_type();
        let mut bytes = Vec::with_capacity(packet_type.wire_size());
        bytes.extend_from_slice(&[0u8; HEADER_SIZE]);

        match self {
            Packet::PlayerUpdate(p) => bincode::serialize_into(&mut bytes, p)?,
            Packet::PlayerSpawn(p) => bincode::serialize_into(&mut bytes, p)?,
            Packet::TigerSpawn(p) => bincode::serialize_into(&mut bytes, p)?,
            Packet::TigerUpdate(p) => bincode::serialize_into(&mut bytes, p)?,
            Packet::TreeSpawn(p) => bincode::serialize_into(&mut bytes, p)?,
            Packet::LoginRequest(p) => bincode::serialize_into(&mut bytes, p)?,
            Packet::LoginResponse(p) => bincode::serialize_into(&mut bytes, p)?,
            Packet::PlayerDisconnect(p) => bincode::serialize_into(&mut bytes, p)?,
            Packet::ClientReady(p) => bincode::serialize_into(&mut bytes, p)?,
        }

        if bytes.len() > MAX_PACKET_SIZE {
            return Err(ProtocolError::PacketTooLarge {
                size: bytes.len(),
                preview: String::new(),
            });
        }

        PacketHeader {
            size: bytes.len() as u16,
            packet_type: packet_type as u16,
        }
        .write_to(&mut bytes);

        Ok(bytes)
    }

    /// Decodes one complete frame (header included). The frame length must
    /// equal the kind's fixed wire size.
    pub fn decode(frame: &[u8]) -> Result<Packet, ProtocolError> {
        let header = PacketHeader::parse(frame).ok_or(ProtocolError::SizeMismatch {
            packet_type: None,
            expected: HEADER_SIZE,
            actual: frame.len(),
        })?;
        let packet_type = PacketType::try_from(header.packet_type)?;

        let expected = packet_type.wire_size();
        if frame.len() != expected || header.size as usize != expected {
            return Err(ProtocolError::SizeMismatch {
                packet_type: Some(packet_type),
                expected,
                actual: header.size as usize,
            });
        }

        let payload = &frame[HEADER_SIZE..];
        let packet = match packet_type {
            PacketType::PlayerUpdate => Packet::PlayerUpdate(payload_of(payload)?),
            PacketType::PlayerSpawn => Packet::PlayerSpawn(payload_of(payload)?),
            PacketType::TigerSpawn => Packet::TigerSpawn(payload_of(payload)?),
            PacketType::TigerUpdate => Packet::TigerUpdate(payload_of(payload)?),
            PacketType::TreeSpawn => Packet::TreeSpawn(payload_of(payload)?),
            PacketType::LoginRequest => Packet::LoginRequest(payload_of(payload)?),
            PacketType::LoginResponse => Packet::LoginResponse(payload_of(payload)?),
            PacketType::PlayerDisconnect => Packet::PlayerDisconnect(payload_of(payload)?),
            PacketType::ClientReady => Packet::ClientReady(payload_of(payload)?),
        };
        Ok(packet)
    }
}

fn payload_of<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ProtocolError> {
    Ok(bincode::deserialize(payload)?)
}
