//! Opcode registry: the closed set of request identifiers and the
//! transfer-control codes shared by both ends of the link.
//!
//! These values ARE the protocol. Both nodes must agree on every number
//! here; renumbering anything is a breaking change.

use static_assertions::const_assert;

use crate::wire::WireError;

// ── Opcodes ───────────────────────────────────────────────────────────────────

/// Logical message type, carried in the first byte of every request and
/// response frame.
///
/// Zero is reserved (an empty frame) and anything at or above
/// [`UNKNOWN_THRESHOLD`] is rejected by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    SetParam = 1,
    GetParam = 2,
    GetQueItem = 3,
    GetQueLength = 4,
    SetAllowCapture = 5,
    SetSendStates = 6,
    SetDefaultAllowCapture = 7,
    SetDefaultSendStates = 8,
    Shutdown = 9,
    EnumDb = 10,
    GetFile = 11,
    GetBytes = 12,
    ClearDb = 13,
    /// Ask the server to pull the reflash package from the client.
    Upload = 14,
}

/// First opcode value that is not part of the protocol.
pub const UNKNOWN_THRESHOLD: u8 = 15;

/// Opcodes that both roles must accept in either direction, because a file
/// transfer can run from either end of the link.
pub const TRANSFER_OPCODES: [Opcode; 2] = [Opcode::GetFile, Opcode::GetBytes];

impl Opcode {
    /// Whether this opcode belongs to the transfer sub-protocol.
    pub fn is_transfer(self) -> bool {
        TRANSFER_OPCODES.contains(&self)
    }

    /// Requests that are polled every tick. Logged at trace level only.
    pub fn is_polling(self) -> bool {
        matches!(self, Opcode::GetQueItem | Opcode::GetQueLength)
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::SetParam => "SET_PARAM",
            Opcode::GetParam => "GET_PARAM",
            Opcode::GetQueItem => "GET_QUE_ITEM",
            Opcode::GetQueLength => "GET_QUE_LENGTH",
            Opcode::SetAllowCapture => "SET_ALLOW_CAPTURE",
            Opcode::SetSendStates => "SET_SEND_STATES",
            Opcode::SetDefaultAllowCapture => "SET_DEFAULT_ALLOW_CAPTURE",
            Opcode::SetDefaultSendStates => "SET_DEFAULT_SEND_STATES",
            Opcode::Shutdown => "SHUTDOWN",
            Opcode::EnumDb => "ENUM_DB",
            Opcode::GetFile => "GET_FILE",
            Opcode::GetBytes => "GET_BYTES",
            Opcode::ClearDb => "CLEAR_DB",
            Opcode::Upload => "UPLOAD",
        }
    }
}

/// Whether `raw` names a protocol opcode.
pub fn is_known(raw: u8) -> bool {
    Opcode::try_from(raw).is_ok()
}

impl TryFrom<u8> for Opcode {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Opcode::SetParam),
            2 => Ok(Opcode::GetParam),
            3 => Ok(Opcode::GetQueItem),
            4 => Ok(Opcode::GetQueLength),
            5 => Ok(Opcode::SetAllowCapture),
            6 => Ok(Opcode::SetSendStates),
            7 => Ok(Opcode::SetDefaultAllowCapture),
            8 => Ok(Opcode::SetDefaultSendStates),
            9 => Ok(Opcode::Shutdown),
            10 => Ok(Opcode::EnumDb),
            11 => Ok(Opcode::GetFile),
            12 => Ok(Opcode::GetBytes),
            13 => Ok(Opcode::ClearDb),
            14 => Ok(Opcode::Upload),
            other => Err(WireError::UnknownOpcode(other)),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        op as u8
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.name(), *self as u8)
    }
}

// ── Transfer codes ────────────────────────────────────────────────────────────

/// Acknowledgement and flow-control values carried in the argument byte.
///
/// The chunk sequence space `1..=MAX_CHUNKS` overlaps the low codes; which
/// interpretation applies depends on the opcode and direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransferCode {
    None = 0,
    Ok = 1,
    Error = 2,
    Next = 3,
    Resend = 4,
    FlashError = 5,
}

impl TransferCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Ok),
            2 => Some(Self::Error),
            3 => Some(Self::Next),
            4 => Some(Self::Resend),
            5 => Some(Self::FlashError),
            _ => None,
        }
    }
}

impl From<TransferCode> for u8 {
    fn from(code: TransferCode) -> u8 {
        code as u8
    }
}

/// Highest chunk sequence number within a block.
pub const MAX_CHUNKS: u8 = 220;

/// Argument of the per-block checksum announcement.
pub const CHECKSUM: u8 = MAX_CHUNKS + 1;

/// Argument signalling the end of the source file.
pub const STOP: u8 = MAX_CHUNKS + 2;

/// Argument signalling that the requested file does not exist or no
/// transfer is active.
pub const NOT_FOUND: u8 = MAX_CHUNKS + 3;

/// File id of the reflash package instead of a numbered database.
pub const REFLASH: u8 = 255;

/// `SET_ALLOW_CAPTURE` argument that forces capture even without a camera.
pub const FORCE_CAPTURE: u8 = 2;

// Control codes must never collide with chunk sequence numbers.
const_assert!(CHECKSUM > MAX_CHUNKS);
const_assert!(NOT_FOUND < REFLASH);

/// What a `GET_BYTES` response argument means to the receiving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkArg {
    /// 1-based chunk sequence number within the current block.
    Chunk(u8),
    Checksum,
    Stop,
    NotFound,
    Other(u8),
}

impl ChunkArg {
    pub fn classify(arg: u8) -> Self {
        match arg {
            1..=MAX_CHUNKS => ChunkArg::Chunk(arg),
            CHECKSUM => ChunkArg::Checksum,
            STOP => ChunkArg::Stop,
            NOT_FOUND => ChunkArg::NotFound,
            other => ChunkArg::Other(other),
        }
    }
}

// ── Shutdown kinds ────────────────────────────────────────────────────────────

/// Destructive operation requested through `SHUTDOWN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShutdownKind {
    PowerOff = 0,
    Reboot = 1,
    Flash = 2,
    Restore = 3,
}

impl ShutdownKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::PowerOff),
            1 => Some(Self::Reboot),
            2 => Some(Self::Flash),
            3 => Some(Self::Restore),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ShutdownKind::PowerOff => "shutdown",
            ShutdownKind::Reboot => "reboot",
            ShutdownKind::Flash => "flash",
            ShutdownKind::Restore => "restore",
        }
    }
}

impl From<ShutdownKind> for u8 {
    fn from(kind: ShutdownKind) -> u8 {
        kind as u8
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
