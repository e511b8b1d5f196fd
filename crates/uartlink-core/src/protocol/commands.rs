//! Protocol commands
//!
//! Defines the opcodes understood by the controller firmware and the frames
//! they are sent in.

/// Commands understood by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Move in direction 1
    Direction1,

    /// Move in direction 2
    Direction2,

    /// Move in direction 3
    Direction3,

    /// Turn the LED on
    LedOn,

    /// Turn the LED off
    LedOff,

    /// Ask the controller to report its status
    SendStatus,

    /// Stop the system
    StopSystem,

    /// Initialization frame, carries a 32-bit parameter
    Init,
}

impl Command {
    /// The seven single-byte commands, in opcode order
    pub const SIMPLE: [Command; 7] = [
        Command::Direction1,
        Command::Direction2,
        Command::Direction3,
        Command::LedOn,
        Command::LedOff,
        Command::SendStatus,
        Command::StopSystem,
    ];

    /// Get the opcode byte
    pub fn opcode(&self) -> u8 {
        match self {
            Command::Direction1 => 0xA1,
            Command::Direction2 => 0xA2,
            Command::Direction3 => 0xA3,
            Command::LedOn => 0xA4,
            Command::LedOff => 0xA5,
            Command::SendStatus => 0xA6,
            Command::StopSystem => 0xA7,
            Command::Init => 0xFF,
        }
    }

    /// Long option name used on the command line
    pub fn cli_name(&self) -> &'static str {
        match self {
            Command::Direction1 => "Direction1",
            Command::Direction2 => "Direction2",
            Command::Direction3 => "Direction3",
            Command::LedOn => "Led_On",
            Command::LedOff => "Led_Off",
            Command::SendStatus => "Send_Status",
            Command::StopSystem => "Stop_System",
            Command::Init => "init",
        }
    }

    /// Check if this command is sent as a single opcode byte
    pub fn is_simple(&self) -> bool {
        !matches!(self, Command::Init)
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0xFF => Ok(Command::Init),
            _ => Command::SIMPLE
                .into_iter()
                .find(|c| c.opcode() == byte)
                .ok_or(byte),
        }
    }
}

/// Bytes transmitted for one command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFrame {
    /// A bare opcode
    Single(u8),
    /// `INIT` followed by a little-endian 32-bit parameter
    Init(u32),
}

impl CommandFrame {
    /// Length of the init frame on the wire
    pub const INIT_LEN: usize = 5;

    /// Encode the frame for transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            CommandFrame::Single(opcode) => vec![opcode],
            CommandFrame::Init(param) => {
                let mut bytes = Vec::with_capacity(Self::INIT_LEN);
                bytes.push(Command::Init.opcode());
                bytes.extend_from_slice(&param.to_le_bytes());
                bytes
            }
        }
    }

    /// Number of bytes on the wire
    pub fn encoded_len(&self) -> usize {
        match self {
            CommandFrame::Single(_) => 1,
            CommandFrame::Init(_) => Self::INIT_LEN,
        }
    }
}
