//! Error related data structures.

use std::fmt::{self, Display, Formatter};

/// Top level enum for error handling within the core.
///
/// Most of the time, you will want to use the `CustomError` variant
/// to provide a more detailed error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Header checksum mismatch or length below 0x150.
    InvalidRom,
    /// The cartridge-type code does not map to a known MBC variant.
    UnsupportedMbc,
    /// An opcode outside the decoded set was fetched.
    UnsupportedOpcode(u8),
    /// Cartridge RAM image size does not match the RAM-size code.
    BadBatteryFile,
    /// An operation was requested in a state that doesn't allow it
    /// (e.g. `step` before a ROM is loaded, `pause` while not running).
    InvalidState,
    RomSize,
    CustomError(String),
}

impl Error {
    pub fn description(&self) -> String {
        match self {
            Error::InvalidRom => String::from("Invalid cartridge header"),
            Error::UnsupportedMbc => String::from("Unsupported MBC type"),
            Error::UnsupportedOpcode(opcode) => {
                format!("Unsupported opcode 0x{:02x}", opcode)
            }
            Error::BadBatteryFile => String::from("Battery file size mismatch"),
            Error::InvalidState => String::from("Invalid machine state for operation"),
            Error::RomSize => String::from("Invalid ROM size"),
            Error::CustomError(message) => message.clone(),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn test_unsupported_opcode_message() {
        let err = Error::UnsupportedOpcode(0xd3);
        assert_eq!(err.description(), "Unsupported opcode 0xd3");
    }

    #[test]
    fn test_display_matches_description() {
        let err = Error::BadBatteryFile;
        assert_eq!(format!("{}", err), err.description());
    }
}
