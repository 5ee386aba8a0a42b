//! Implementation of the core CPU ([Sharp LR35902](https://en.wikipedia.org/wiki/Game_Boy)) logic for the Game Boy.
//!
//! Does not include the instruction set implementation, only the core
//! CPU logic and the CPU struct definition.
//!
//! Most of the core CPU logic is implemented in the [`Cpu::clock`] method.

use std::{
    fmt::{self, Display, Formatter},
    sync::{Arc, Mutex},
};

use crate::{
    assert_gb,
    consts::{IF_ADDR, LCDC_ADDR},
    debugln,
    gb::GameBoyConfig,
    inst::{EXTENDED, INSTRUCTIONS},
    mmu::Mmu,
    util::SharedThread,
};

pub const PREFIX: u8 = 0xcb;

pub type Instruction = &'static (fn(&mut Cpu), u8, &'static str);

pub struct Cpu {
    pub pc: u16,
    pub sp: u16,
    pub a: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,

    ime: bool,

    /// Set by `EI`, applied to `ime` at the start of the clock step
    /// following the one that executed it — the real LR35902's
    /// one-instruction EI delay. `DI` clears this alongside `ime`.
    ime_pending: bool,

    zero: bool,
    sub: bool,
    half_carry: bool,
    carry: bool,
    halted: bool,

    /// Reference to the MMU (Memory Management Unit) to be used
    /// for memory bus access operations.
    pub mmu: Mmu,

    /// Temporary counter used to control the number of cycles
    /// taken by the current or last CPU operation.
    pub cycles: u8,

    /// Reference to the PC (Program Counter) of the previous executed
    /// instruction, used to provide a reference to the instruction
    /// so that it can be logged or used for debugging purposes.
    pub ppc: u16,

    /// The pointer to the parent configuration of the running
    /// Game Boy emulator, that can be used to control the behaviour
    /// of Game Boy emulation.
    gbc: SharedThread<GameBoyConfig>,
}

impl Cpu {
    pub fn new(mmu: Mmu, gbc: SharedThread<GameBoyConfig>) -> Self {
        Self {
            pc: 0x0,
            sp: 0x0,
            a: 0x0,
            b: 0x0,
            c: 0x0,
            d: 0x0,
            e: 0x0,
            h: 0x0,
            l: 0x0,
            ime: false,
            ime_pending: false,
            zero: false,
            sub: false,
            half_carry: false,
            carry: false,
            halted: false,
            mmu,
            cycles: 0,
            ppc: 0x0,
            gbc,
        }
    }

    pub fn reset(&mut self) {
        self.pc = 0x0;
        self.sp = 0x0;
        self.a = 0x0;
        self.b = 0x0;
        self.c = 0x0;
        self.d = 0x0;
        self.e = 0x0;
        self.h = 0x0;
        self.l = 0x0;
        self.ime = false;
        self.ime_pending = false;
        self.zero = false;
        self.sub = false;
        self.half_carry = false;
        self.carry = false;
        self.halted = false;
        self.cycles = 0;
    }

    /// Sets the CPU registers and some of the memory space to the
    /// expected state after a typical Game Boy boot ROM finishes.
    ///
    /// Using this strategy it's possible to skip the "normal" boot
    /// loading process for the original DMG Game Boy.
    pub fn boot(&mut self) {
        self.pc = 0x0100;
        self.sp = 0xfffe;
        self.a = 0x01;
        self.set_f(0xb0);
        self.b = 0x00;
        self.c = 0x13;
        self.d = 0x00;
        self.e = 0xd8;
        self.h = 0x01;
        self.l = 0x4d;

        // updates part of the MMU state, disabling the
        // boot memory overlap and setting the LCD control
        // register to enabled (required by some ROMs)
        self.mmu.set_boot_active(false);
        self.mmu.write(LCDC_ADDR, 0x91);
    }

    /// Advances execution by one step: either services a pending
    /// interrupt, stays halted, or fetches and executes one
    /// instruction. Returns the number of T-cycles consumed.
    ///
    /// Every bus access taken along the way (instruction fetch,
    /// immediate operand, stack push/pop, explicit memory read/write)
    /// calls [`Cpu::tick`] as it happens, which is what actually
    /// advances the PPU and timer — so a multi-byte instruction's
    /// mid-execution bus traffic is interleaved with those devices
    /// exactly the way it would be on real hardware, rather than all
    /// landing at once when the instruction completes. Any remaining
    /// gap between the ticks an instruction's bus accesses produced and
    /// its table time (internal-only cycles: ALU latching, condition
    /// checks on untaken branches, etc.) is made up in one final tick.
    pub fn clock(&mut self) -> u8 {
        // an EI executed by the previous instruction takes effect now,
        // before this step's interrupts are evaluated
        if self.ime_pending {
            self.ime = true;
            self.ime_pending = false;
        }

        // gathers the PC (program counter) reference that
        // is going to be used in the fetching phase
        let pc = self.pc;

        assert_gb!(
            !(0x8000..=0x9fff).contains(&pc),
            "Invalid PC area at 0x{:04x}",
            pc
        );

        // prefetch the pending interrupt flags so we can quickly check
        // if any enabled interrupt is waiting to be served. This is used
        // both to release the CPU from a halted state and to execute the
        // correct handler when IME is enabled.
        let pending = self.mmu.read(IF_ADDR) & self.mmu.ie;

        // in case the CPU execution halted and there's a pending interrupt
        // while IME is disabled, release the CPU from the halted state so
        // execution can continue until the interrupt is serviced
        if self.halted && !self.ime && pending != 0 {
            self.halted = false;
        }

        self.cycles = 0;

        // checks the IME (interrupt master enable) is enabled and then checks
        // if there's any interrupt to be handled, in case there's one, tries
        // to check which one should be handled and then handles it, in
        // priority order (bit 0 highest). This code assumes that there's no
        // more than one interrupt serviced per clock cycle.
        if self.ime && pending != 0 {
            if pending & 0x01 == 0x01 {
                debugln!("Servicing V-Blank interrupt (0x40)");
                self.disable_int();
                self.tick(8);
                self.push_word(pc);
                self.pc = 0x40;
                self.tick(4);
                self.mmu.ppu().ack_vblank();
                self.halted = false;
                return self.cycles;
            } else if pending & 0x02 == 0x02 {
                debugln!("Servicing LCD STAT interrupt (0x48)");
                self.disable_int();
                self.tick(8);
                self.push_word(pc);
                self.pc = 0x48;
                self.tick(4);
                self.mmu.ppu().ack_stat();
                self.halted = false;
                return self.cycles;
            } else if pending & 0x04 == 0x04 {
                debugln!("Servicing Timer interrupt (0x50)");
                self.disable_int();
                self.tick(8);
                self.push_word(pc);
                self.pc = 0x50;
                self.tick(4);
                self.mmu.timer().ack_tima();
                self.halted = false;
                return self.cycles;
            } else if pending & 0x08 == 0x08 {
                debugln!("Servicing Serial interrupt (0x58)");
                self.disable_int();
                self.tick(8);
                self.push_word(pc);
                self.pc = 0x58;
                self.tick(4);
                self.mmu.ack_serial();
                self.halted = false;
                return self.cycles;
            } else if pending & 0x10 == 0x10 {
                debugln!("Servicing Joypad interrupt (0x60)");
                self.disable_int();
                self.tick(8);
                self.push_word(pc);
                self.pc = 0x60;
                self.tick(4);
                self.mmu.pad().ack_pad();
                self.halted = false;
                return self.cycles;
            }
        }

        // in case the CPU is currently in the halted state
        // returns the control flow immediately with the associated
        // number of cycles estimated for the halted execution
        if self.halted {
            self.tick(4);
            return self.cycles;
        }

        // fetches the current instruction and updates the PC
        // (Program Counter) according to the final value returned
        // by the fetch operation (we may need to fetch instruction
        // more than one byte of length); each opcode byte read ticks
        // the shared clock exactly like any other bus access
        let mut opcode = self.tick_read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        let inst: Instruction = if opcode == PREFIX {
            opcode = self.tick_read(self.pc);
            self.pc = self.pc.wrapping_add(1);
            &EXTENDED[opcode as usize]
        } else {
            &INSTRUCTIONS[opcode as usize]
        };

        self.ppc = pc;

        let (inst_fn, inst_time, _inst_str) = inst;

        if self.debug_instructions() {
            debugln!("{}", self.description(inst, self.ppc));
        }

        // calls the current instruction; its own bus accesses have
        // already ticked the clock as they happened, so only the
        // shortfall (if any) against the table time is left to add
        inst_fn(self);
        if self.cycles < *inst_time {
            self.tick(*inst_time - self.cycles);
        }

        // returns the number of cycles that the operation
        // that has been executed has taken
        self.cycles
    }

    fn debug_instructions(&self) -> bool {
        self.gbc.lock().unwrap().debug_instructions
    }

    /// Advances the shared clock by `delta` T-cycles: the PPU (scaled
    /// by the current CPU speed multiplier, so it keeps real-table
    /// pace in double-speed mode) and the timer (undivided, so
    /// TIMA/DIV genuinely run twice as fast in double-speed mode).
    #[inline(always)]
    pub fn tick(&mut self, delta: u8) {
        self.cycles = self.cycles.wrapping_add(delta);
        let delta = delta as u16;
        let multiplier = self.mmu.speed().multiplier() as u16;
        self.mmu.clock_ppu(delta / multiplier);
        self.mmu.timer().clock(delta);
    }

    /// Reads a byte off the bus, ticking the shared clock by 4
    /// T-cycles as every individual memory access does.
    #[inline(always)]
    pub fn tick_read(&mut self, addr: u16) -> u8 {
        let value = self.mmu.read(addr);
        self.tick(4);
        value
    }

    /// Writes a byte to the bus, ticking the shared clock by 4
    /// T-cycles as every individual memory access does.
    #[inline(always)]
    pub fn tick_write(&mut self, addr: u16, value: u8) {
        self.mmu.write(addr, value);
        self.tick(4);
    }

    /// Decodes the instruction at `pc` without touching the clock —
    /// used to re-derive a human readable description of the last
    /// executed instruction, not to execute it.
    #[inline(always)]
    fn fetch(&self, pc: u16) -> (Instruction, u16) {
        let mut pc = pc;

        // fetches the current instruction and increments
        // the PC (program counter) accordingly
        let mut opcode = self.mmu.read(pc);
        pc = pc.wrapping_add(1);

        // checks if the current instruction is a prefix
        // instruction, in case it is, fetches the next
        // instruction and increments the PC accordingly
        let inst: Instruction;
        if opcode == PREFIX {
            opcode = self.mmu.read(pc);
            pc = pc.wrapping_add(1);
            inst = &EXTENDED[opcode as usize];
        } else {
            inst = &INSTRUCTIONS[opcode as usize];
        }

        // returns both the fetched instruction and the
        // updated PC (Program Counter) value
        (inst, pc)
    }

    #[inline(always)]
    pub fn mmu(&mut self) -> &mut Mmu {
        &mut self.mmu
    }

    #[inline(always)]
    pub fn mmu_i(&self) -> &Mmu {
        &self.mmu
    }

    #[inline(always)]
    pub fn halted(&self) -> bool {
        self.halted
    }

    #[inline(always)]
    pub fn set_halted(&mut self, value: bool) {
        self.halted = value
    }

    #[inline(always)]
    pub fn cycles(&self) -> u8 {
        self.cycles
    }

    #[inline(always)]
    pub fn pc(&self) -> u16 {
        self.pc
    }

    #[inline(always)]
    pub fn set_pc(&mut self, value: u16) {
        self.pc = value;
    }

    #[inline(always)]
    pub fn sp(&self) -> u16 {
        self.sp
    }

    #[inline(always)]
    pub fn set_sp(&mut self, value: u16) {
        self.sp = value;
    }

    #[inline(always)]
    pub fn af(&self) -> u16 {
        ((self.a as u16) << 8) | self.f() as u16
    }

    #[inline(always)]
    pub fn bc(&self) -> u16 {
        ((self.b as u16) << 8) | self.c as u16
    }

    #[inline(always)]
    pub fn f(&self) -> u8 {
        let mut f = 0x0u8;
        if self.zero {
            f |= 0x80;
        }
        if self.sub {
            f |= 0x40;
        }
        if self.half_carry {
            f |= 0x20;
        }
        if self.carry {
            f |= 0x10;
        }
        f
    }

    #[inline(always)]
    pub fn set_f(&mut self, value: u8) {
        self.zero = value & 0x80 == 0x80;
        self.sub = value & 0x40 == 0x40;
        self.half_carry = value & 0x20 == 0x20;
        self.carry = value & 0x10 == 0x10;
    }

    #[inline(always)]
    pub fn set_af(&mut self, value: u16) {
        self.a = (value >> 8) as u8;
        self.set_f(value as u8);
    }

    #[inline(always)]
    pub fn set_bc(&mut self, value: u16) {
        self.b = (value >> 8) as u8;
        self.c = value as u8;
    }

    #[inline(always)]
    pub fn de(&self) -> u16 {
        ((self.d as u16) << 8) | self.e as u16
    }

    #[inline(always)]
    pub fn set_de(&mut self, value: u16) {
        self.d = (value >> 8) as u8;
        self.e = value as u8;
    }

    #[inline(always)]
    pub fn hl(&self) -> u16 {
        ((self.h as u16) << 8) | self.l as u16
    }

    #[inline(always)]
    pub fn set_hl(&mut self, value: u16) {
        self.h = (value >> 8) as u8;
        self.l = value as u8;
    }

    #[inline(always)]
    pub fn ime(&self) -> bool {
        self.ime
    }

    #[inline(always)]
    pub fn set_ime(&mut self, value: bool) {
        self.ime = value;
    }

    #[inline(always)]
    pub fn read_u8(&mut self) -> u8 {
        let byte = self.tick_read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        byte
    }

    #[inline(always)]
    pub fn read_u16(&mut self) -> u16 {
        let byte1 = self.read_u8();
        let byte2 = self.read_u8();

        byte1 as u16 | ((byte2 as u16) << 8)
    }

    #[inline(always)]
    pub fn push_byte(&mut self, byte: u8) {
        self.sp = self.sp.wrapping_sub(1);
        self.tick_write(self.sp, byte);
    }

    #[inline(always)]
    pub fn push_word(&mut self, word: u16) {
        self.push_byte((word >> 8) as u8);
        self.push_byte(word as u8);
    }

    #[inline(always)]
    pub fn pop_byte(&mut self) -> u8 {
        let byte = self.tick_read(self.sp);
        self.sp = self.sp.wrapping_add(1);
        byte
    }

    #[inline(always)]
    pub fn pop_word(&mut self) -> u16 {
        self.pop_byte() as u16 | ((self.pop_byte() as u16) << 8)
    }

    #[inline(always)]
    pub fn zero(&self) -> bool {
        self.zero
    }

    #[inline(always)]
    pub fn set_zero(&mut self, value: bool) {
        self.zero = value
    }

    #[inline(always)]
    pub fn sub(&self) -> bool {
        self.sub
    }

    #[inline(always)]
    pub fn set_sub(&mut self, value: bool) {
        self.sub = value;
    }

    #[inline(always)]
    pub fn half_carry(&self) -> bool {
        self.half_carry
    }

    #[inline(always)]
    pub fn set_half_carry(&mut self, value: bool) {
        self.half_carry = value
    }

    #[inline(always)]
    pub fn carry(&self) -> bool {
        self.carry
    }

    #[inline(always)]
    pub fn set_carry(&mut self, value: bool) {
        self.carry = value;
    }

    /// Does not implement the real hardware's HALT bug (a missed PC
    /// increment when HALT executes with IME disabled and a pending,
    /// masked interrupt) — see DESIGN.md.
    #[inline(always)]
    pub fn halt(&mut self) {
        self.halted = true;
    }

    #[inline(always)]
    pub fn stop(&mut self) {
        let mmu = self.mmu();
        if mmu.switching() {
            mmu.switch_speed()
        }
    }

    /// Schedules IME to become true at the start of the next clock
    /// step (the real one-instruction EI delay) rather than
    /// immediately. See `ime_pending`.
    #[inline(always)]
    pub fn enable_int(&mut self) {
        self.ime_pending = true;
    }

    /// Sets IME immediately, bypassing the EI delay — used by `RETI`,
    /// which (unlike `EI`) re-enables interrupts as soon as it runs.
    #[inline(always)]
    pub fn enable_int_immediate(&mut self) {
        self.ime = true;
        self.ime_pending = false;
    }

    #[inline(always)]
    pub fn disable_int(&mut self) {
        self.ime = false;
        self.ime_pending = false;
    }

    pub fn set_gbc(&mut self, value: SharedThread<GameBoyConfig>) {
        self.gbc = value;
    }

    pub fn description(&self, inst: Instruction, inst_pc: u16) -> String {
        let (_, inst_time, inst_str) = inst;
        let title_str: String = format!("[0x{inst_pc:04x}] {inst_str}");
        let inst_time_str = format!("({inst_time} cycles)");
        let registers_str = format!("[PC=0x{:04x} SP=0x{:04x}] [A=0x{:02x} B=0x{:02x} C=0x{:02x} D=0x{:02x} E=0x{:02x} H=0x{:02x} L=0x{:02x}]",
        self.pc, self.sp, self.a, self.b, self.c, self.d, self.e, self.h, self.l);
        format!("{title_str: <24} {inst_time_str: <11} {registers_str: <10}")
    }

    pub fn description_default(&self) -> String {
        let (inst, _) = self.fetch(self.ppc);
        self.description(inst, self.ppc)
    }

    /// A single formatted snapshot of the CPU's architectural state,
    /// suitable for logging on a fatal error.
    pub fn debug_snapshot(&self) -> String {
        format!(
            "PC=0x{:04x} SP=0x{:04x} AF=0x{:04x} BC=0x{:04x} DE=0x{:04x} HL=0x{:04x} IME={} HALT={} cycles={}",
            self.pc,
            self.sp,
            self.af(),
            self.bc(),
            self.de(),
            self.hl(),
            self.ime,
            self.halted,
            self.cycles
        )
    }
}

impl Default for Cpu {
    fn default() -> Self {
        let gbc = Arc::new(Mutex::new(GameBoyConfig::default()));
        Cpu::new(Mmu::default(), gbc)
    }
}

impl Display for Cpu {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description_default())
    }
}

#[cfg(test)]
mod tests {
    use super::Cpu;

    #[test]
    fn test_cpu_clock() {
        let mut cpu = Cpu::default();
        cpu.boot();

        // test NOP instruction
        cpu.pc = 0xc000;
        cpu.mmu.write(0xc000, 0x00);
        let cycles = cpu.clock();
        assert_eq!(cycles, 4);
        assert_eq!(cpu.pc, 0xc001);

        // test LD A, d8 instruction
        cpu.pc = 0xc000;
        cpu.mmu.write(0xc000, 0x3e);
        cpu.mmu.write(0xc001, 0x42);
        let cycles = cpu.clock();
        assert_eq!(cycles, 8);
        assert_eq!(cpu.pc, 0xc002);
        assert_eq!(cpu.a, 0x42);

        // test LD (HL+), A instruction
        cpu.pc = 0xc000;
        cpu.mmu.write(0xc000, 0x22);
        cpu.set_hl(0xc000);
        let cycles = cpu.clock();
        assert_eq!(cycles, 8);
        assert_eq!(cpu.pc, 0xc001);
        assert_eq!(cpu.hl(), 0xc001);
        assert_eq!(cpu.mmu.read(cpu.hl()), 0x42);

        // test INC A instruction
        cpu.pc = 0xc000;
        cpu.mmu.write(0xc000, 0x3c);
        cpu.a = 0x42;
        let cycles = cpu.clock();
        assert_eq!(cycles, 4);
        assert_eq!(cpu.pc, 0xc001);
        assert_eq!(cpu.a, 0x43);

        // test DEC A instruction
        cpu.pc = 0xc000;
        cpu.mmu.write(0xc000, 0x3d);
        cpu.a = 0x42;
        let cycles = cpu.clock();
        assert_eq!(cycles, 4);
        assert_eq!(cpu.pc, 0xc001);
        assert_eq!(cpu.a, 0x41);

        // test JR n instruction
        cpu.pc = 0xc000;
        cpu.mmu.write(0xc000, 0x18);
        cpu.mmu.write(0xc001, 0x03);
        let cycles = cpu.clock();
        assert_eq!(cycles, 12);
        assert_eq!(cpu.pc, 0xc005);

        // test ADD A, d8 instruction
        cpu.pc = 0xc000;
        cpu.mmu.write(0xc000, 0xc6);
        cpu.mmu.write(0xc001, 0x01);
        cpu.a = 0x42;
        let cycles = cpu.clock();
        assert_eq!(cycles, 8);
        assert_eq!(cpu.pc, 0xc002);
        assert_eq!(cpu.a, 0x43);

        // test SUB A, d8 instruction
        cpu.pc = 0xc000;
        cpu.mmu.write(0xc000, 0xd6);
        cpu.mmu.write(0xc001, 0x01);
        cpu.a = 0x42;
        let cycles = cpu.clock();
        assert_eq!(cycles, 8);
        assert_eq!(cpu.pc, 0xc002);
        assert_eq!(cpu.a, 0x41);
    }

    #[test]
    fn test_interrupt_dispatch_priority() {
        let mut cpu = Cpu::default();
        cpu.boot();
        cpu.set_ime(true);
        cpu.mmu.ie = 0x1f;

        // both V-Blank and Timer pending: V-Blank (bit 0) wins
        cpu.mmu.ppu().set_int_vblank(true);
        cpu.mmu.timer().set_int_tima(true);

        let pc_before = cpu.pc;
        let cycles = cpu.clock();

        assert_eq!(cycles, 20);
        assert_eq!(cpu.pc, 0x40);
        assert!(!cpu.ime());
        assert_eq!(cpu.pop_word(), pc_before);
        assert!(!cpu.mmu.ppu().int_vblank());
        assert!(cpu.mmu.timer().int_tima());
    }

    #[test]
    fn test_halt_resumes_on_pending_interrupt() {
        let mut cpu = Cpu::default();
        cpu.boot();
        cpu.set_ime(false);
        cpu.mmu.ie = 0x01;
        cpu.halt();
        assert!(cpu.halted());

        cpu.mmu.ppu().set_int_vblank(true);
        cpu.clock();
        assert!(!cpu.halted());
    }
}
