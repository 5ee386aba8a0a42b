#![allow(clippy::uninlined_format_args)]

pub mod color;
pub mod consts;
pub mod cpu;
pub mod dma;
pub mod error;
pub mod gb;
pub mod inst;
pub mod macros;
pub mod mmu;
pub mod pad;
pub mod ppu;
pub mod rom;
pub mod timer;
pub mod util;

pub use error::Error;
pub use gb::{GameBoy, GameBoyConfig, GameBoyMode, GameBoySpeed, MachineState};
pub use pad::PadKey;
