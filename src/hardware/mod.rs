//! The PC hardware facade: interrupts, I/O ports, and process control.
//!
//! This owns everything a running game touches: the memory array, the
//! filesystem, the input and output buffers, and the registered translated
//! processes. Translated code reaches it through the `Exec` context.

use ascii::AsciiStr;

use crate::cpu::{Regs, Stack};
use crate::fs::{Filesystem, GameArchive};
use crate::game::{obj, room, World};
use crate::host::Host;
use crate::input::InputBuffer;
use crate::mem::{Memory, SegmentCache};
use crate::output::OutputQueue;
use crate::process::{exited_guard, AddressId, Exec, Flow, ModuleDef, Process, Transfer};

/// Result of a save or load attempt. None of these are fatal.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SaveStatus {
    Ok,
    /// The running binary can't save, or the buffer isn't a loadable save.
    NotSupported,
    /// The process isn't parked in its main loop, so it can't be
    /// interrupted safely. Try again shortly.
    Blocked,
}

/// How many run() calls to grant a freshly booted process before deciding
/// it will never reach its main loop.
const BOOT_RUN_LIMIT: u32 = 10_000;

pub struct Hardware {
    pub mem: Memory,
    pub fs: Filesystem,
    pub input: InputBuffer,
    pub output: OutputQueue,
    pub host: Box<dyn Host>,

    processes: Vec<Process>,
    current: Option<usize>,
    /// Bumped by exec() so a run that replaced the process mid-flight
    /// doesn't write stale registers back into the new one.
    exec_generation: u64,

    /// Last value written to the speaker gate port.
    port61: u8,
    /// Artificial wallclock for INT 21h/2C, in whole seconds. The menus
    /// only use it for relative delays, so it just increments per query.
    fake_seconds: u32,
}

impl Hardware {
    pub fn new(archive: GameArchive, host: Box<dyn Host>) -> Hardware {
        Hardware {
            mem: Memory::new(),
            fs: Filesystem::new(archive),
            input: InputBuffer::new(),
            output: OutputQueue::new(),
            host,
            processes: Vec::new(),
            current: None,
            exec_generation: 0,
            port61: 0,
            fake_seconds: 0,
        }
    }

    /// Make a translated executable available to `exec`.
    pub fn register_process(&mut self, module: &'static ModuleDef) {
        self.processes.push(Process::new(module));
    }

    pub fn has_process(&self) -> bool {
        self.current.is_some()
    }

    pub fn process(&self) -> Option<&Process> {
        self.current.map(|i| &self.processes[i])
    }

    pub fn process_mut(&mut self) -> Option<&mut Process> {
        self.current.map(move |i| &mut self.processes[i])
    }

    /// Switch to the named program and prepare it to run from its entry
    /// point. The name must match a registered process; translated
    /// transition code only ever asks for binaries that shipped with it.
    pub fn exec(&mut self, program: &str, args: &str) {
        let program_ascii = AsciiStr::from_ascii(program).ok();
        let index = self
            .processes
            .iter()
            .position(|p| match (program_ascii, AsciiStr::from_ascii(p.module.filename)) {
                (Some(a), Ok(b)) => a.eq_ignore_ascii_case(b),
                _ => false,
            })
            .unwrap_or_else(|| panic!("program '{}' not found in exec", program));

        self.current = Some(index);
        self.exec_generation += 1;
        self.fs.reset();
        self.input.clear();
        self.processes[index].exec(&mut self.mem, args);
    }

    /// Drain one step of the output queue into the host callbacks.
    /// Returns the next delay in milliseconds, or 0 when the queue is dry.
    pub fn run_output(&mut self) -> u32 {
        let (output, host) = (&mut self.output, &mut self.host);
        output.run(host.as_mut())
    }

    /// Run the current process until it yields or returns to its main
    /// loop. No-op when no process is running.
    pub fn run(&mut self) {
        let Some(index) = self.current else { return };

        let (func, regs) = {
            let process = &self.processes[index];
            (process.continue_fn, process.regs)
        };
        self.run_internal(index, func, regs, true);
    }

    /// Call an individually exported function with the given registers,
    /// saving and restoring the normal continuation state around it.
    pub fn call(&mut self, id: AddressId, regs: Regs) {
        let Some(index) = self.current else { return };

        let func = self.processes[index]
            .module
            .function(id)
            .expect("calling a function the module doesn't export");
        self.run_internal(index, func, regs, false);
    }

    fn run_internal(&mut self, index: usize, func: crate::process::ContinueFn, regs: Regs, is_run: bool) {
        let generation = self.exec_generation;
        let module = self.processes[index].module;
        let clock = self.processes[index].clock;

        let mut stack = Stack::new();
        let mut cache = SegmentCache::default();
        cache.load(&self.mem, &regs);
        let mut ctx = Exec {
            hw: self,
            stack: &mut stack,
            regs,
            cache,
            clock,
            module,
        };

        let result = func(&mut ctx);
        let clock = ctx.clock;

        // If translated code exec()ed another program, or exited, the slot
        // no longer belongs to the state we were running.
        if self.exec_generation != generation || self.current != Some(index) {
            return;
        }

        let process = &mut self.processes[index];
        process.clock = clock;
        match result {
            Ok(()) => {
                // A continuation chain that returns falls back to the
                // default entry; an exported call leaves the parked state
                // alone entirely.
                if is_run {
                    process.rewind_to_default();
                }
            }
            Err(transfer) => process.apply(transfer),
        }
    }

    /// If the save buffer contains a loadable game, boot the matching
    /// binary with the load-save argument and return true.
    pub fn load_game(&mut self) -> bool {
        let name = match self.fs.save.as_game() {
            Some(save) => save.process_name(),
            None => None,
        };
        match name {
            Some(name) => {
                self.exec(name, "99");
                true
            }
            None => false,
        }
    }

    /// Ask the running process to serialize its state into the save slot.
    pub fn save_game(&mut self) -> SaveStatus {
        let Some(process) = self.process() else {
            // Not running at all
            return SaveStatus::NotSupported;
        };

        if !process.has_function(AddressId::SaveGameFunc) {
            // No save function in this binary
            return SaveStatus::NotSupported;
        }

        if !process.is_waiting_in_main_loop() {
            // Can't safely interrupt the process
            return SaveStatus::Blocked;
        }

        let regs = process.regs;
        self.fs.save.clear();
        self.call(AddressId::SaveGameFunc, regs);

        if !self.fs.save.is_game() {
            // File isn't the right size
            return SaveStatus::NotSupported;
        }

        if self.fs.save.as_game().and_then(|s| s.process_name()).is_none() {
            // File isn't something we know how to load. (Tutorial 6 runs in
            // LAB.EXE, which knows how to save, but we can't load those.)
            return SaveStatus::NotSupported;
        }

        SaveStatus::Ok
    }

    /// When the save slot holds a chip and the lab is idle, load the chip
    /// into slot `id`.
    pub fn load_chip(&mut self, id: u8) -> bool {
        let ready = self
            .process()
            .map(|p| p.is_waiting_in_main_loop() && p.has_function(AddressId::LoadChipFunc))
            .unwrap_or(false);

        if ready && self.fs.save.is_chip() {
            let mut regs = self.process().unwrap().regs;
            regs.set_dl(id);
            self.call(AddressId::LoadChipFunc, regs);
            true
        } else {
            false
        }
    }

    /// Boot a fresh lab, load the saved chip into the first slot, and move
    /// the player into that chip's documentation room.
    pub fn load_chip_documentation(&mut self) -> bool {
        if !self.fs.save.is_chip() {
            return false;
        }

        // Get a fresh lab and run it until it's in the main loop
        self.exec("lab.exe", "30");
        let mut runs = 0;
        while !self.process().map(|p| p.is_waiting_in_main_loop()).unwrap_or(false) {
            if self.current.is_none() || runs > BOOT_RUN_LIMIT {
                return false;
            }
            self.run();
            runs += 1;
        }

        if !self.load_chip(0) {
            return false;
        }

        let process = self.process().unwrap();
        let Some(world) = World::from_process(process.module, &process.regs, &self.mem) else {
            return false;
        };
        world.set_object_room(&mut self.mem, obj::PLAYER, room::CHIP_1);
        true
    }
}

// The side of the facade translated code sees: interrupts, ports, and the
// yield points. All of it lives on the execution context.
impl<'a> Exec<'a> {
    /// BIOS video services.
    pub fn int10(&mut self) -> Flow {
        match self.regs.ah() {
            0x00 => {
                // Set video mode: ignored, we're always in CGA mode
            }
            _ => {
                self.stack.trace();
                panic!("unimplemented BIOS int10, ax={:04x}", self.regs.ax);
            }
        }
        Ok(())
    }

    /// BIOS keyboard services.
    pub fn int16(&mut self) -> Flow {
        match self.regs.ah() {
            0x00 => {
                // Get keystroke
                self.regs.ax = self.hw.input.get_key();
                let zf = self.regs.ax == 0;
                self.regs.put_zf(zf);
            }
            0x01 => {
                // Check for keystroke
                self.regs.ax = self.hw.input.check_for_key();
                let zf = self.regs.ax == 0;
                self.regs.put_zf(zf);
            }
            _ => {
                self.stack.trace();
                panic!("unimplemented BIOS int16, ax={:04x}", self.regs.ax);
            }
        }
        Ok(())
    }

    /// DOS services.
    pub fn int21(&mut self) -> Flow {
        match self.regs.ah() {
            0x06 => {
                // Direct console I/O; only input is supported
                if self.regs.dl() == 0xff {
                    let key = self.hw.input.get_key();
                    self.regs.set_al(key as u8);
                    self.regs.put_zf(key == 0);
                }
            }

            0x25 => {
                // Set interrupt vector: ignored. The game uses this to
                // install its INT 24h error handler.
            }

            0x2c => {
                // Get system time. The menus only use this for relative
                // delays, so a second ticks by on every query.
                let s = self.hw.fake_seconds;
                self.hw.fake_seconds += 1;
                self.regs.set_ch(((s / 3600) % 24) as u8);
                self.regs.set_cl(((s / 60) % 60) as u8);
                self.regs.set_dh((s % 60) as u8);
                self.regs.set_dl(0);
            }

            0x3c => {
                // Create file
                let name = self.filename_at(self.regs.ds, self.regs.dx);
                let fd = self.hw.fs.create(&name);
                self.file_result(fd);
            }

            0x3d => {
                // Open file
                let name = self.filename_at(self.regs.ds, self.regs.dx);
                let fd = self.hw.fs.open(&name);
                self.file_result(fd);
            }

            0x3e => {
                // Close file
                if self.hw.fs.close(self.regs.bx) {
                    self.hw.host.on_save_file_write();
                }
            }

            0x3f => {
                // Read file into DS:DX, CX bytes
                let base = self.hw.mem.seg_base(self.regs.ds) + self.regs.dx as usize;
                let count = self.regs.cx as usize;
                let (fs, mem) = (&mut self.hw.fs, &mut self.hw.mem);
                let n = fs.read(self.regs.bx, &mut mem.bytes_mut()[base..base + count]);
                self.regs.ax = n as u16;
                self.regs.clear_cf();
            }

            0x40 => {
                // Write file from DS:DX, CX bytes
                let base = self.hw.mem.seg_base(self.regs.ds) + self.regs.dx as usize;
                let count = self.regs.cx as usize;
                let (fs, mem) = (&mut self.hw.fs, &self.hw.mem);
                let n = fs.write(self.regs.bx, &mem.bytes()[base..base + count]);
                self.regs.ax = n as u16;
                self.regs.clear_cf();
            }

            0x4a => {
                // Reserve memory: ignored
            }

            0x4c => {
                // Exit with return code
                return self.process_exit(self.regs.al());
            }

            _ => {
                self.stack.trace();
                panic!("unimplemented DOS int21, ax={:04x}", self.regs.ax);
            }
        }
        Ok(())
    }

    /// I/O port read.
    pub fn port_in(&mut self, port: u16) -> u8 {
        match port {
            // PC speaker gate reads back the last written value
            0x61 => self.hw.port61,
            _ => panic!("unimplemented I/O port read, port {:04x}", port),
        }
    }

    /// I/O port write.
    pub fn port_out(&mut self, port: u16, value: u8) {
        match port {
            0x43 => {
                // PIT mode bits: ignored. We don't emulate the PIT; the
                // game always toggles the speaker manually.
            }
            0x61 => {
                if (value ^ self.hw.port61) & 2 != 0 {
                    self.hw.output.push_speaker_timestamp(self.clock);
                }
                self.hw.port61 = value;
            }
            _ => panic!("unimplemented I/O port write, port {:04x}", port),
        }
    }

    /// Queue a copy of the CGA framebuffer at the current CPU time.
    pub fn push_frame(&mut self) {
        if self.hw.output.frames_full() {
            self.stack.trace();
            panic!("frame queue is too deep, infinite loop likely");
        }
        let base = self.hw.mem.seg_base(0xb800);
        let (mem, output) = (&self.hw.mem, &mut self.hw.output);
        output.push_frame_cga(self.clock, &mem.bytes()[base..]);
    }

    /// Queue a bare delay at the current CPU time plus `extra` ms.
    pub fn push_delay(&mut self, extra_millis: u32) {
        self.hw.output.push_delay(self.clock, extra_millis);
    }

    /// One joystick poll against the current world state.
    pub fn poll_joystick(&mut self) -> (u16, u16, u8) {
        let world = World::from_process(self.module, &self.regs, &self.hw.mem);
        self.hw
            .input
            .poll_joystick(world, &self.hw.mem, &self.hw.fs.config)
    }

    /// Translated menu and transition code starting a sibling program.
    /// The new program runs once control returns to the host loop.
    pub fn exec_program(&mut self, program: &str, args: &str) {
        self.hw.exec(program, args);
    }

    /// Translated lab code asking the host for a chip.
    pub fn request_load_chip(&mut self) -> Flow {
        let id = self.regs.dl();
        self.hw.host.on_load_chip_request(id);
        Ok(())
    }

    /// Leave the process. Clears the process slot, tells the host, and
    /// unwinds out of translated code for good.
    pub fn process_exit(&mut self, code: u8) -> Flow {
        log::info!("process exit, code {}", code);

        // Next state is no process, unless the host callback execs
        self.hw.current = None;
        self.hw.host.on_process_exit(code);

        Err(Transfer {
            regs: self.regs,
            func: exited_guard,
            default_entry: false,
        })
    }

    fn filename_at(&self, seg: u16, off: u16) -> String {
        let base = self.hw.mem.seg_base(seg) + off as usize;
        let bytes = self.hw.mem.bytes();
        let mut name = String::new();
        for &b in &bytes[base..] {
            if b == 0 {
                break;
            }
            name.push(b as char);
        }
        name
    }

    fn file_result(&mut self, fd: Option<u16>) {
        match fd {
            Some(fd) => {
                self.regs.ax = fd;
                self.regs.clear_cf();
            }
            None => self.regs.set_cf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NullHost;

    // A minimal translated module: the entry point parks itself in a main
    // loop which reads one key per run and exits on Escape.

    fn entry(ctx: &mut Exec<'_>) -> Flow {
        ctx.regs.ax = 0;
        let regs = ctx.regs;
        ctx.continue_from(regs, main_loop, true)
    }

    fn main_loop(ctx: &mut Exec<'_>) -> Flow {
        ctx.regs.set_ah(0x00);
        ctx.int16()?;
        // Stash what the BIOS call observed where the test can see it
        // after the registers rewind to their defaults.
        let key = ctx.regs.ax;
        let zf = ctx.regs.zf();
        ctx.hw.mem.poke16(ctx.regs.ds, 0x10, key);
        ctx.hw.mem.poke8(ctx.regs.ds, 0x12, zf as u8);
        if ctx.regs.al() == 0x1b {
            ctx.regs.set_ah(0x4c);
            ctx.regs.set_al(0);
            ctx.int21()?;
        }
        Ok(())
    }

    static TEST_MODULE: ModuleDef = ModuleDef {
        filename: "loop.exe",
        data: &[],
        reloc_seg: 0x01f0,
        entry_cs: 0x01e0,
        functions: &[
            (AddressId::EntryFunc, entry),
            (AddressId::SaveGameFunc, main_loop),
        ],
        addresses: &[],
    };

    fn boot() -> Hardware {
        let mut hw = Hardware::new(GameArchive::empty(), Box::new(NullHost));
        hw.register_process(&TEST_MODULE);
        hw.exec("LOOP.EXE", "21");
        hw
    }

    #[test]
    fn exec_builds_the_psp() {
        let hw = boot();
        let process = hw.process().unwrap();
        assert_eq!(process.regs.ds, 0x01f0);
        assert_eq!(process.regs.cs, 0x01e0);
        assert_eq!(process.regs.es, 0x01e0);

        let psp = hw.mem.seg(0x01e0);
        assert_eq!(psp[0x80], 2);
        assert_eq!(&psp[0x81..0x83], b"21");
        assert_eq!(psp[0x83], 0x0d);
        assert_eq!(psp[0xff], 0x0d);
    }

    #[test]
    fn entry_becomes_default_after_first_yield() {
        let mut hw = boot();
        assert!(!hw.process().unwrap().is_waiting_in_main_loop());

        hw.run();
        assert!(hw.process().unwrap().is_waiting_in_main_loop());

        // Later runs keep coming back to the main loop
        hw.run();
        hw.run();
        assert!(hw.process().unwrap().is_waiting_in_main_loop());
    }

    #[test]
    fn keys_reach_translated_code() {
        let mut hw = boot();
        hw.run();

        hw.input.press_key(0x20, 0x39);
        hw.run();
        let ds = hw.process().unwrap().regs.ds;
        assert_eq!(hw.mem.peek16(ds, 0x10), 0x3920);
        assert_eq!(hw.mem.peek8(ds, 0x12), 0, "ZF must be clear with a key waiting");
    }

    #[test]
    fn exit_clears_the_process_slot() {
        let mut hw = boot();
        hw.run();

        hw.input.press_key(0x1b, 0x01);
        hw.run();
        assert!(!hw.has_process());
    }

    #[test]
    fn speaker_toggles_queue_edges() {
        let mut hw = boot();
        hw.run();

        // Drive the gate through a translated context
        let module = hw.process().unwrap().module;
        let mut stack = Stack::new();
        let mut ctx = Exec {
            hw: &mut hw,
            stack: &mut stack,
            regs: Regs::new(),
            cache: SegmentCache::default(),
            clock: 10_000,
            module,
        };
        ctx.port_out(0x61, 0x02);
        ctx.clock += 5_000;
        ctx.port_out(0x61, 0x00);
        ctx.port_out(0x43, 0xb6);
        assert_eq!(ctx.port_in(0x61), 0x00);
    }

    #[test]
    fn fake_clock_is_monotonic() {
        let mut hw = boot();
        let module = hw.process().unwrap().module;
        let mut stack = Stack::new();
        let mut ctx = Exec {
            hw: &mut hw,
            stack: &mut stack,
            regs: Regs::new(),
            cache: SegmentCache::default(),
            clock: 0,
            module,
        };

        ctx.regs.set_ah(0x2c);
        ctx.int21().unwrap();
        let first = (ctx.regs.ch(), ctx.regs.cl(), ctx.regs.dh());
        ctx.regs.set_ah(0x2c);
        ctx.int21().unwrap();
        let second = (ctx.regs.ch(), ctx.regs.cl(), ctx.regs.dh());
        assert!(second > first);
        assert_eq!(first, (0, 0, 0));
    }

    #[test]
    fn save_status_depends_on_process_state() {
        let mut hw = Hardware::new(GameArchive::empty(), Box::new(NullHost));
        assert_eq!(hw.save_game(), SaveStatus::NotSupported);

        hw.register_process(&TEST_MODULE);
        hw.exec("loop.exe", "");
        // Booted but not yet in the main loop
        assert_eq!(hw.save_game(), SaveStatus::Blocked);
    }
}
