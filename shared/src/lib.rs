//! Wire protocol shared by the game server and its clients.
//!
//! Packets are fixed-layout, little-endian, byte-packed records behind a
//! `{size: u16, type: u16}` header. Framing is length-prefixed, so the codec
//! tolerates TCP splitting and coalescing at any byte boundary.

pub mod codec;
pub mod fixed;
pub mod packet;

pub use codec::{
    hex_preview, try_extract_packet, Extracted, ProtocolError, ReassemblyBuffer,
    REASSEMBLY_CAPACITY,
};
pub use fixed::{AnimationName, FixedStr, StatusMessage, Username};
pub use packet::{
    ClientReady, LoginRequest, LoginResponse, Packet, PacketHeader, PacketType, PlayerDisconnect,
    PlayerSpawn, PlayerUpdate, TigerSpawn, TigerUpdate, TreePlacement, TreeSpawn, HEADER_SIZE,
    MAX_PACKET_SIZE, MAX_TREES_PER_PACKET,
};

pub const DEFAULT_PORT: u16 = 5000;

pub const LOGIN_SUCCESS_MESSAGE: &str = "Login successful";
pub const USERNAME_TAKEN_MESSAGE: &str = "Username already exists";
pub const INVALID_USERNAME_MESSAGE: &str = "Invalid username";
pub const ALREADY_LOGGED_IN_MESSAGE: &str = "Already logged in";

/// Animation clips a tiger can be playing. Clients resolve the file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TigerAnimation {
    Idle,
    Walk,
    Run,
    Attack,
}

impl TigerAnimation {
    pub const ALL: [TigerAnimation; 4] = [
        TigerAnimation::Idle,
        TigerAnimation::Walk,
        TigerAnimation::Run,
        TigerAnimation::Attack,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            TigerAnimation::Idle => "0722_tiger_idle2.fbx",
            TigerAnimation::Walk => "0113_tiger_walk.fbx",
            TigerAnimation::Run => "0722_tiger_run.fbx",
            TigerAnimation::Attack => "0208_tiger_attack.fbx",
        }
    }
}
