//! Game Boy emulation entrypoint and associated functions and structures.
//!
//! Most of the meaningful publicly available functions and structures to
//! build a working emulator should be present here.

use std::{
    fmt::{self, Display, Formatter},
    sync::{Arc, Mutex},
};

use crate::{
    cpu::Cpu,
    dma::Dma,
    error::Error,
    mmu::Mmu,
    pad::{Pad, PadKey},
    ppu::{Ppu, DISPLAY_HEIGHT, DISPLAY_WIDTH},
    rom::Cartridge,
    timer::Timer,
    util::SharedThread,
};

/// Enumeration that describes the running mode of the Game Boy emulator.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GameBoyMode {
    Dmg = 1,
    Cgb = 2,
}

impl GameBoyMode {
    pub fn description(&self) -> &'static str {
        match self {
            GameBoyMode::Dmg => "Game Boy (DMG)",
            GameBoyMode::Cgb => "Game Boy Color (CGB)",
        }
    }

    pub fn is_dmg(&self) -> bool {
        *self == GameBoyMode::Dmg
    }

    pub fn is_cgb(&self) -> bool {
        *self == GameBoyMode::Cgb
    }
}

impl Display for GameBoyMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// CPU clock speed, toggled by the CGB KEY1 register.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GameBoySpeed {
    Normal = 0,
    Double = 1,
}

impl GameBoySpeed {
    pub fn description(&self) -> &'static str {
        match self {
            GameBoySpeed::Normal => "Normal Speed",
            GameBoySpeed::Double => "Double Speed",
        }
    }

    pub fn switch(&self) -> Self {
        match self {
            GameBoySpeed::Normal => GameBoySpeed::Double,
            GameBoySpeed::Double => GameBoySpeed::Normal,
        }
    }

    /// The PPU always runs at real-table pace; this is the divisor
    /// applied to the CPU's raw cycle count before clocking it, so it
    /// keeps its normal pace regardless of CPU speed. The timer is
    /// clocked with the undivided count, so TIMA/DIV genuinely run
    /// twice as fast in double speed, matching real hardware.
    pub fn multiplier(&self) -> u8 {
        match self {
            GameBoySpeed::Normal => 1,
            GameBoySpeed::Double => 2,
        }
    }
}

impl Display for GameBoySpeed {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Process-wide configuration flags, threaded through every component
/// that needs them as a shared handle rather than read from a global.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct GameBoyConfig {
    /// The current running mode of the emulator.
    pub mode: GameBoyMode,

    /// Whether each fetched instruction is logged via `debugln!` before
    /// execution. Set before `run`; affects logging only.
    pub debug_instructions: bool,

    /// Whether the background/window layer is composited into the
    /// frame buffer. Set before `run`; affects per-layer compositing
    /// only, not PPU timing.
    pub draw_background_layer: bool,

    /// Whether the sprite/object layer is composited into the frame
    /// buffer. Set before `run`; affects per-layer compositing only,
    /// not PPU timing.
    pub draw_sprite_layer: bool,
}

impl Default for GameBoyConfig {
    fn default() -> Self {
        Self {
            mode: GameBoyMode::Dmg,
            debug_instructions: false,
            draw_background_layer: true,
            draw_sprite_layer: true,
        }
    }
}

/// The machine's coarse-grained execution state, enforced on every
/// host-facing operation. See `InvalidState`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MachineState {
    /// No ROM loaded yet. `load_rom` is the only legal operation.
    Waiting,
    /// A ROM is loaded and the machine is paused. `step`/`run`/`reset`
    /// are legal.
    Ready,
    /// `run` is executing. Only `pause`/`reset` are legal; a second
    /// concurrent `run`/`step` is rejected.
    Running,
}

/// Top level structure that abstracts the usage of the Game Boy system.
///
/// Should serve as the main entry-point API.
pub struct GameBoy {
    /// A clone of the configuration's mode, kept for fast access.
    mode: GameBoyMode,

    state: MachineState,

    cpu: Cpu,

    /// The reference counted and mutable reference to the Game Boy
    /// configuration structure, shared with every owned component that
    /// reads it (PPU compositing toggles, CPU instruction logging).
    gbc: SharedThread<GameBoyConfig>,

    /// Cached RGB888-packed (0x00RRGGBB) framebuffer, recomputed from
    /// the PPU's byte buffer whenever `framebuffer()` is called.
    frame_buffer_u32: [u32; DISPLAY_WIDTH * DISPLAY_HEIGHT],
}

impl GameBoy {
    /// The logic frequency of the Game Boy CPU in hz.
    pub const CPU_FREQ: u32 = 4194304;

    /// The visual frequency (refresh rate) of the Game Boy, close to 60hz.
    pub const VISUAL_FREQ: f32 = 59.7275;

    /// The cycles taken to run a complete frame in the PPU (in CPU cycles).
    pub const LCD_CYCLES: u32 = 70224;

    pub fn new(mode: Option<GameBoyMode>) -> Self {
        let mode = mode.unwrap_or(GameBoyMode::Dmg);
        let gbc = Arc::new(Mutex::new(GameBoyConfig {
            mode,
            ..GameBoyConfig::default()
        }));

        let mmu = Mmu::new(mode, gbc.clone());
        let cpu = Cpu::new(mmu, gbc.clone());

        Self {
            mode,
            state: MachineState::Waiting,
            cpu,
            gbc,
            frame_buffer_u32: [0u32; DISPLAY_WIDTH * DISPLAY_HEIGHT],
        }
    }

    pub fn cpu(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub fn cpu_i(&self) -> &Cpu {
        &self.cpu
    }

    pub fn mmu(&mut self) -> &mut Mmu {
        self.cpu.mmu()
    }

    pub fn mmu_i(&self) -> &Mmu {
        self.cpu.mmu_i()
    }

    pub fn ppu(&mut self) -> &mut Ppu {
        self.mmu().ppu()
    }

    pub fn ppu_i(&self) -> &Ppu {
        self.mmu_i().ppu_i()
    }

    pub fn dma_i(&self) -> &Dma {
        self.mmu_i().dma_i()
    }

    pub fn pad(&mut self) -> &mut Pad {
        self.mmu().pad()
    }

    pub fn pad_i(&self) -> &Pad {
        self.mmu_i().pad_i()
    }

    pub fn timer(&mut self) -> &mut Timer {
        self.mmu().timer()
    }

    pub fn timer_i(&self) -> &Timer {
        self.mmu_i().timer_i()
    }

    pub fn rom(&mut self) -> &mut Cartridge {
        self.mmu().rom()
    }

    pub fn rom_i(&self) -> &Cartridge {
        self.mmu_i().rom_i()
    }

    pub fn mode(&self) -> GameBoyMode {
        self.mode
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn speed(&self) -> GameBoySpeed {
        self.mmu_i().speed()
    }

    /// Parses `data` as a cartridge and transitions into `Ready`. Leaves
    /// the machine's previous state untouched (never `Running`) on
    /// parse failure.
    pub fn load_rom(&mut self, data: &[u8]) -> Result<&mut Cartridge, Error> {
        if self.state == MachineState::Running {
            return Err(Error::InvalidState);
        }

        let rom = Cartridge::from_data(data)?;
        let detected_mode = rom.gb_mode();
        self.mode = detected_mode;
        (*self.gbc).lock().unwrap().mode = detected_mode;

        self.mmu().set_rom(rom);
        self.cpu.reset();
        self.mmu().reset();
        self.cpu.boot();
        self.state = MachineState::Ready;

        Ok(self.mmu().rom())
    }

    /// Resets every component and returns the machine to `Waiting`,
    /// discarding runtime state (not the loaded cartridge's battery RAM
    /// image, which lives on in the `Cartridge` the caller can read via
    /// `rom()`).
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.mmu().reset();
        self.state = MachineState::Waiting;
    }

    /// Advance the clock of the system by one tick: one CPU instruction
    /// (or interrupt service, or halted no-op), plus the PPU/timer by
    /// the corresponding number of cycles. Legal only in `Ready`, per
    /// the `Waiting -> Ready -> Running -> Ready -> Waiting` state
    /// machine; `run` is the sole path into `Running`.
    pub fn step(&mut self) -> Result<u16, Error> {
        if self.state != MachineState::Ready {
            return Err(Error::InvalidState);
        }
        Ok(self.clock())
    }

    /// Clocks the emulator until at least `target_cycles` CPU cycles
    /// have been executed. Legal only from `Ready`; transitions to
    /// `Running` for the duration of the call and back to `Ready` on
    /// completion.
    pub fn run(&mut self, target_cycles: u32) -> Result<u32, Error> {
        if self.state != MachineState::Ready {
            return Err(Error::InvalidState);
        }
        self.state = MachineState::Running;

        let mut cycles = 0u32;
        while cycles < target_cycles {
            cycles += self.clock() as u32;
        }

        self.state = MachineState::Ready;
        Ok(cycles)
    }

    /// Transitions `Running` -> `Ready`.
    pub fn pause(&mut self) -> Result<(), Error> {
        if self.state != MachineState::Running {
            return Err(Error::InvalidState);
        }
        self.state = MachineState::Ready;
        Ok(())
    }

    /// The CPU's own `clock()` ticks the PPU and timer per bus access
    /// as it executes (see `Cpu::tick`), so stepping the machine is
    /// just running the CPU one step.
    #[inline(always)]
    fn clock(&mut self) -> u16 {
        self.cpu.clock() as u16
    }

    pub fn button_down(&mut self, index: usize) {
        if let Some(key) = Self::key_for_index(index) {
            self.pad().key_press(key);
        }
    }

    pub fn button_up(&mut self, index: usize) {
        if let Some(key) = Self::key_for_index(index) {
            self.pad().key_lift(key);
        }
    }

    fn key_for_index(index: usize) -> Option<PadKey> {
        match index {
            0 => Some(PadKey::Right),
            1 => Some(PadKey::Left),
            2 => Some(PadKey::Up),
            3 => Some(PadKey::Down),
            4 => Some(PadKey::A),
            5 => Some(PadKey::B),
            6 => Some(PadKey::Select),
            7 => Some(PadKey::Start),
            _ => None,
        }
    }

    /// The current frame, as 0x00RRGGBB-packed pixels, row-major,
    /// 160x144. Recomputed from the PPU's byte buffer lazily, each call.
    pub fn framebuffer(&mut self) -> &[u32; DISPLAY_WIDTH * DISPLAY_HEIGHT] {
        let bytes = self.ppu().frame_buffer();
        for (pixel, chunk) in self.frame_buffer_u32.iter_mut().zip(bytes.chunks_exact(3)) {
            *pixel = ((chunk[0] as u32) << 16) | ((chunk[1] as u32) << 8) | chunk[2] as u32;
        }
        &self.frame_buffer_u32
    }

    /// A single formatted snapshot of the CPU's architectural state,
    /// for diagnostic logging. See `Cpu::debug_snapshot`.
    pub fn debug_snapshot(&self) -> String {
        self.cpu_i().debug_snapshot()
    }

    pub fn display_width(&self) -> usize {
        DISPLAY_WIDTH
    }

    pub fn display_height(&self) -> usize {
        DISPLAY_HEIGHT
    }

    pub fn description(&self, column_length: usize) -> String {
        let mode_l = format!("{:width$}", "Mode", width = column_length);
        let state_l = format!("{:width$}", "State", width = column_length);
        let speed_l = format!("{:width$}", "Speed", width = column_length);
        format!(
            "{}  {}\n{}  {:?}\n{}  {}",
            mode_l,
            self.mode(),
            state_l,
            self.state(),
            speed_l,
            self.speed(),
        )
    }
}

impl Default for GameBoy {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Display for GameBoy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description(9))
    }
}

#[cfg(test)]
mod tests {
    use super::{GameBoy, GameBoyMode, GameBoySpeed, MachineState};
    use crate::error::Error;

    fn rom_bytes() -> Vec<u8> {
        let mut data = vec![0u8; 0x8000];
        data[0x147] = 0x00; // ROM ONLY
        data[0x148] = 0x00; // 32KB
        data[0x149] = 0x00; // no RAM
        let mut checksum: u8 = 0;
        for byte in &data[0x134..0x14d] {
            checksum = checksum.wrapping_sub(*byte).wrapping_sub(1);
        }
        data[0x14d] = checksum;
        data
    }

    #[test]
    fn test_state_machine() {
        let mut gb = GameBoy::new(Some(GameBoyMode::Dmg));
        assert_eq!(gb.state(), MachineState::Waiting);
        assert_eq!(gb.step(), Err(Error::InvalidState));

        gb.load_rom(&rom_bytes()).unwrap();
        assert_eq!(gb.state(), MachineState::Ready);

        assert_eq!(gb.pause(), Err(Error::InvalidState));

        gb.step().unwrap();
        assert_eq!(gb.state(), MachineState::Ready);

        gb.run(100).unwrap();
        assert_eq!(gb.state(), MachineState::Ready);

        gb.reset();
        assert_eq!(gb.state(), MachineState::Waiting);
    }

    #[test]
    fn test_speed_multiplier() {
        assert_eq!(GameBoySpeed::Normal.multiplier(), 1);
        assert_eq!(GameBoySpeed::Double.multiplier(), 2);
        assert_eq!(GameBoySpeed::Normal.switch(), GameBoySpeed::Double);
    }

    #[test]
    fn test_framebuffer_size() {
        let mut gb = GameBoy::new(Some(GameBoyMode::Dmg));
        gb.load_rom(&rom_bytes()).unwrap();
        let buffer = gb.framebuffer();
        assert_eq!(buffer.len(), 160 * 144);
    }

    #[test]
    fn test_button_down_up() {
        let mut gb = GameBoy::new(Some(GameBoyMode::Dmg));
        gb.load_rom(&rom_bytes()).unwrap();
        gb.button_down(4);
        assert!(gb.pad_i().key_state(4));
        gb.button_up(4);
        assert!(!gb.pad_i().key_state(4));
    }
}
