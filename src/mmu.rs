//! MMU (Memory Management Unit) functions and structures.

use crate::{
    consts::{DMA_ADDR, IE_ADDR, IF_ADDR, KEY0_ADDR, KEY1_ADDR, BOOT_ADDR, SVBK_ADDR},
    dma::{Dma, DmaMode},
    gb::{GameBoyConfig, GameBoyMode, GameBoySpeed},
    pad::Pad,
    ppu::{Ppu, PpuMode},
    rom::Cartridge,
    timer::Timer,
    util::SharedThread,
    warnln,
};

pub const RAM_SIZE_DMG: usize = 8192;
pub const RAM_SIZE_CGB: usize = 32768;

/// Common interface implemented by every memory-mapped sub-device so
/// the MMU can dispatch through a uniform shape.
pub trait BusComponent {
    fn read(&self, addr: u16) -> u8;
    fn write(&mut self, addr: u16, value: u8);
    fn read_many(&self, addr: u16, count: usize) -> Vec<u8> {
        (0..count)
            .map(|offset| self.read(addr + offset as u16))
            .collect()
    }
    fn write_many(&mut self, addr: u16, values: &[u8]) {
        for (offset, &value) in values.iter().enumerate() {
            self.write(addr + offset as u16, value);
        }
    }
}

pub struct Mmu {
    /// Interrupt enable register (0xFFFF).
    pub ie: u8,

    /// CGB compatibility flag, taken verbatim from the cartridge's
    /// 0x0143 byte once a ROM is loaded.
    pub key0: u8,

    /// Set while a CGB speed switch has been armed but not yet
    /// performed (cleared by the CPU after servicing STOP).
    pub switching: bool,

    /// Raw serial interrupt request flag. Serial link hardware is a
    /// non-goal, so nothing ever sets this from device logic, but the
    /// IF register bit is still software-writable and participates in
    /// interrupt priority, so it needs somewhere to live.
    serial_int: bool,

    /// Current CPU clock speed (KEY1 bit 7). The PPU always runs at
    /// real-table pace regardless of this value — see design notes on
    /// double-speed handling.
    speed: GameBoySpeed,

    /// Whether the boot overlay is still mapped at 0x0000-0x00FF. This
    /// core has no boot ROM image to overlay (no host API supplies
    /// one), so the flag only tracks the register's software-visible
    /// state; ROM reads always pass through to the cartridge.
    boot_active: bool,

    ppu: Ppu,
    dma: Dma,
    pad: Pad,
    timer: Timer,
    rom: Cartridge,

    /// Generic byte-addressable fallback for I/O windows this core
    /// does not give dedicated behaviour to (audio, serial): plain
    /// slots readable/writable by the CPU, matching real hardware
    /// closely enough that boot code probing them never crashes.
    io_regs: [u8; 0x80],

    ram: Vec<u8>,
    ram_bank: u8,
    ram_offset: u16,

    mode: GameBoyMode,
}

impl Mmu {
    pub fn new(mode: GameBoyMode, gbc: SharedThread<GameBoyConfig>) -> Self {
        let ram = vec![0u8; if mode == GameBoyMode::Cgb { RAM_SIZE_CGB } else { RAM_SIZE_DMG }];
        Self {
            ie: 0x0,
            key0: 0x0,
            switching: false,
            serial_int: false,
            speed: GameBoySpeed::Normal,
            boot_active: true,
            ppu: Ppu::new(mode, gbc),
            dma: Dma::new(),
            pad: Pad::new(),
            timer: Timer::new(),
            rom: Cartridge::new(),
            io_regs: [0u8; 0x80],
            ram,
            ram_bank: 0x1,
            ram_offset: 0x1000,
            mode,
        }
    }

    pub fn reset(&mut self) {
        self.ie = 0x0;
        self.key0 = 0x0;
        self.switching = false;
        self.serial_int = false;
        self.speed = GameBoySpeed::Normal;
        self.boot_active = true;
        self.ppu.reset();
        self.dma.reset();
        self.pad.reset();
        self.timer.reset();
        self.io_regs = [0u8; 0x80];
        self.ram_bank = 0x1;
        self.ram_offset = 0x1000;
        self.ram.iter_mut().for_each(|b| *b = 0);
    }

    pub fn ppu(&mut self) -> &mut Ppu {
        &mut self.ppu
    }

    pub fn ppu_i(&self) -> &Ppu {
        &self.ppu
    }

    pub fn dma_i(&self) -> &Dma {
        &self.dma
    }

    pub fn pad(&mut self) -> &mut Pad {
        &mut self.pad
    }

    pub fn pad_i(&self) -> &Pad {
        &self.pad
    }

    pub fn timer(&mut self) -> &mut Timer {
        &mut self.timer
    }

    pub fn timer_i(&self) -> &Timer {
        &self.timer
    }

    pub fn rom(&mut self) -> &mut Cartridge {
        &mut self.rom
    }

    pub fn rom_i(&self) -> &Cartridge {
        &self.rom
    }

    pub fn set_rom(&mut self, rom: Cartridge) {
        self.rom = rom;
    }

    pub fn mode(&self) -> GameBoyMode {
        self.mode
    }

    pub fn set_boot_active(&mut self, value: bool) {
        self.boot_active = value;
    }

    pub fn switching(&self) -> bool {
        self.switching
    }

    /// Advances the PPU by `cycles` T-cycles and, if that crossed the
    /// Draw→HBlank boundary, pumps one 0x10-byte block of an active
    /// H-Blank DMA transfer.
    pub fn clock_ppu(&mut self, cycles: u16) {
        let entered_hblank = self.ppu.clock(cycles);
        if entered_hblank && self.dma.active_hdma() && self.dma.mode() == DmaMode::HBlank {
            self.pump_hdma_block();
        }
    }

    fn pump_hdma_block(&mut self) {
        let count = self.dma.pending().min(0x10);
        for i in 0..count {
            let byte = self.read(self.dma.source().wrapping_add(i));
            let dest = self.dma.destination().wrapping_add(i);
            self.ppu.write(dest, byte);
        }
        self.dma.advance(count);
    }

    fn pump_general_hdma(&mut self) {
        let count = self.dma.pending();
        for i in 0..count {
            let byte = self.read(self.dma.source().wrapping_add(i));
            let dest = self.dma.destination().wrapping_add(i);
            self.ppu.write(dest, byte);
        }
        self.dma.advance(count);
    }

    /// Performs the (instantaneous, per this core's model) OAM DMA
    /// copy triggered by a write to 0xFF46.
    fn pump_oam_dma(&mut self) {
        let base = (self.dma.value_dma() as u16) << 8;
        let data: Vec<u8> = (0..160).map(|i| self.read(base + i)).collect();
        for (i, byte) in data.into_iter().enumerate() {
            self.ppu.write(0xfe00 + i as u16, byte);
        }
        self.dma.set_active_dma(false);
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            // 0x0000-0x7FFF - ROM bank 0 (fixed) + ROM bank N (switchable)
            0x0000..=0x7fff => self.rom.read(addr),

            // 0x8000-0x9FFF - VRAM
            0x8000..=0x9fff => {
                if self.ppu.mode() == PpuMode::VramRead {
                    0xff
                } else {
                    self.ppu.read(addr)
                }
            }

            // 0xA000-0xBFFF - Cartridge RAM
            0xa000..=0xbfff => self.rom.read(addr),

            // 0xC000-0xCFFF - Work RAM bank 0
            0xc000..=0xcfff => self.ram[(addr & 0x0fff) as usize],

            // 0xD000-0xDFFF - Work RAM bank N (GBC: switchable)
            0xd000..=0xdfff => self.ram[(self.ram_offset + (addr & 0x0fff)) as usize],

            // 0xE000-0xFDFF - Echo RAM (mirror of 0xC000-0xDDFF)
            0xe000..=0xfdff => self.ram[(addr & 0x1fff) as usize],

            // 0xFE00-0xFE9F - OAM
            0xfe00..=0xfe9f => {
                if matches!(self.ppu.mode(), PpuMode::OamRead | PpuMode::VramRead) {
                    0xff
                } else {
                    self.ppu.read(addr)
                }
            }

            // 0xFEA0-0xFEFF - unusable
            0xfea0..=0xfeff => 0xff,

            // 0xFF00 - Joypad
            0xff00 => self.pad.read(addr),

            // 0xFF0F - IF
            IF_ADDR => {
                #[allow(clippy::bool_to_int_with_if)]
                (if self.ppu.int_vblank() { 0x01 } else { 0x00 }
                    | if self.ppu.int_stat() { 0x02 } else { 0x00 }
                    | if self.timer.int_tima() { 0x04 } else { 0x00 }
                    | if self.serial_int { 0x08 } else { 0x00 }
                    | if self.pad.int_pad() { 0x10 } else { 0x00 }
                    | 0xe0)
            }

            // 0xFF40-0xFF45 / 0xFF47-0xFF4B - PPU registers
            0xff40..=0xff45 | 0xff47..=0xff4b => self.ppu.read(addr),

            // 0xFF46 - OAM DMA
            DMA_ADDR => self.dma.read(addr),

            // 0xFF4C - KEY0
            KEY0_ADDR => self.key0,

            // 0xFF4D - KEY1 speed switch
            KEY1_ADDR => {
                (if self.switching { 0x01 } else { 0x00 })
                    | ((self.speed as u8) << 7)
                    | 0x7e
            }

            // 0xFF4F - VBK
            0xff4f => self.ppu.read(addr),

            // 0xFF50 - boot-disable
            BOOT_ADDR => u8::from(!self.boot_active),

            // 0xFF51-0xFF55 - HDMA
            0xff51..=0xff55 => self.dma.read(addr),

            // 0xFF68-0xFF6B - CGB palettes
            0xff68..=0xff6b => self.ppu.read(addr),

            // 0xFF70 - SVBK
            SVBK_ADDR => (self.ram_bank & 0x07) | 0xf8,

            // 0xFF80-0xFFFE - HRAM
            0xff80..=0xfffe => self.ppu.read(addr),

            // 0xFFFF - IE
            IE_ADDR => self.ie,

            // Everything else (audio/serial/unmapped): plain byte slots.
            0xff01..=0xff3f | 0xff56 | 0xff6c..=0xff6f | 0xff71..=0xff7f => {
                self.io_regs[(addr - 0xff00) as usize]
            }

            addr => {
                warnln!("Reading from unknown location 0x{:04x}", addr);
                0xff
            }
        }
    }

    pub fn write(&mut self, addr: u16, value: u8) {
        match addr {
            0x0000..=0x7fff => self.rom.write(addr, value),

            0x8000..=0x9fff => {
                if self.ppu.mode() != PpuMode::VramRead {
                    self.ppu.write(addr, value);
                }
            }

            0xa000..=0xbfff => self.rom.write(addr, value),

            0xc000..=0xcfff => self.ram[(addr & 0x0fff) as usize] = value,

            0xd000..=0xdfff => self.ram[(self.ram_offset + (addr & 0x0fff)) as usize] = value,

            0xe000..=0xfdff => self.ram[(addr & 0x1fff) as usize] = value,

            0xfe00..=0xfe9f => {
                if !matches!(self.ppu.mode(), PpuMode::OamRead | PpuMode::VramRead) {
                    self.ppu.write(addr, value);
                }
            }

            0xfea0..=0xfeff => {}

            0xff00 => self.pad.write(addr, value),

            IF_ADDR => {
                self.ppu.set_int_vblank(value & 0x01 == 0x01);
                self.ppu.set_int_stat(value & 0x02 == 0x02);
                self.timer.set_int_tima(value & 0x04 == 0x04);
                self.serial_int = value & 0x08 == 0x08;
                self.pad.set_int_pad(value & 0x10 == 0x10);
            }

            0xff40..=0xff45 | 0xff47..=0xff4b => self.ppu.write(addr, value),

            DMA_ADDR => {
                if self.dma.write(addr, value) {
                    self.pump_oam_dma();
                }
            }

            KEY0_ADDR => self.key0 = value,

            KEY1_ADDR => self.switching = value & 0x01 == 0x01,

            0xff4f => self.ppu.write(addr, value),

            BOOT_ADDR => self.boot_active = value == 0x00,

            0xff51..=0xff55 => {
                if self.dma.write(addr, value) {
                    self.pump_general_hdma();
                }
            }

            0xff68..=0xff6b => self.ppu.write(addr, value),

            SVBK_ADDR => {
                let mut bank = value & 0x07;
                if bank == 0x0 {
                    bank = 0x1;
                }
                self.ram_bank = bank;
                self.ram_offset = self.ram_bank as u16 * 0x1000;
            }

            0xff80..=0xfffe => self.ppu.write(addr, value),

            IE_ADDR => self.ie = value,

            0xff01..=0xff3f | 0xff56 | 0xff6c..=0xff6f | 0xff71..=0xff7f => {
                self.io_regs[(addr - 0xff00) as usize] = value
            }

            addr => warnln!("Writing to unknown location 0x{:04x}", addr),
        }
    }

    pub fn read_many(&self, addr: u16, count: u16) -> Vec<u8> {
        (0..count).map(|i| self.read(addr + i)).collect()
    }

    pub fn write_many(&mut self, addr: u16, data: &[u8]) {
        for (index, byte) in data.iter().enumerate() {
            self.write(addr + index as u16, *byte)
        }
    }

    pub fn speed(&self) -> GameBoySpeed {
        self.speed
    }

    /// Performs the speed switch armed by a STOP while KEY1 bit 0 is set.
    pub fn switch_speed(&mut self) {
        self.speed = self.speed.switch();
        self.switching = false;
    }

    #[inline(always)]
    pub fn ack_serial(&mut self) {
        self.serial_int = false;
    }

    #[inline(always)]
    pub fn int_serial(&self) -> bool {
        self.serial_int
    }
}

impl Default for Mmu {
    fn default() -> Self {
        let gbc = std::sync::Arc::new(std::sync::Mutex::new(GameBoyConfig::default()));
        Mmu::new(GameBoyMode::Dmg, gbc)
    }
}
