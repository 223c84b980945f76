//! Per-executable state for translated processes.
//!
//! Each game binary was rewritten ahead of time into a module of Rust
//! functions. This module holds the runtime side of that bargain: the
//! packed data image, exec(), and the continuation bookkeeping that lets
//! translated code yield to the host and resume later.

use crate::cpu::{Regs, Stack};
use crate::hardware::Hardware;
use crate::mem::{Memory, SegmentCache, MEM_SIZE};

/// Addresses (code or data) which the translator determined statically and
/// exports for runtime lookup.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AddressId {
    EntryFunc,
    SaveGameFunc,
    LoadChipFunc,
    WorldData,
    CircuitData,
    RobotDataMain,
    RobotDataGrabber,
}

/// One translated function. It either runs to completion, or asks to be
/// resumed somewhere else by returning a `Transfer`.
pub type ContinueFn = fn(&mut Exec<'_>) -> Flow;

/// Control flow out of translated code. `Err` is the non-local exit a
/// setjmp/longjmp pair would provide: it unwinds every nested translated
/// call via `?` and lands back in the run loop.
pub type Flow = Result<(), Transfer>;

/// A pending continuation, recorded on yield.
#[derive(Debug)]
pub struct Transfer {
    pub regs: Regs,
    pub func: ContinueFn,
    /// Promote the continuation to the process default, so it is also what
    /// runs after the current function chain returns normally.
    pub default_entry: bool,
}

/// Everything a translated executable provides to the runtime.
pub struct ModuleDef {
    /// DOS filename of the original binary, e.g. `"game.exe"`.
    pub filename: &'static str,
    /// Data image, packed with the zero-run encoding.
    pub data: &'static [u8],
    /// Segment the image was relocated to; the initial DS.
    pub reloc_seg: u16,
    /// Initial CS for the entry point.
    pub entry_cs: u16,
    /// Exported functions by address id.
    pub functions: &'static [(AddressId, ContinueFn)],
    /// Exported data offsets by address id.
    pub addresses: &'static [(AddressId, u16)],
}

impl ModuleDef {
    pub fn function(&self, id: AddressId) -> Option<ContinueFn> {
        self.functions
            .iter()
            .find(|&&(fid, _)| fid == id)
            .map(|&(_, f)| f)
    }

    pub fn address(&self, id: AddressId) -> Option<u16> {
        self.addresses
            .iter()
            .find(|&&(aid, _)| aid == id)
            .map(|&(_, a)| a)
    }

    fn entry(&self) -> ContinueFn {
        self.function(AddressId::EntryFunc)
            .expect("translated module has no entry function")
    }
}

/// Runtime state for one translated process.
pub struct Process {
    pub module: &'static ModuleDef,
    /// Register state carried between runs.
    pub regs: Regs,
    /// CPU cycle counter carried between runs; feeds output timestamps.
    pub clock: u32,
    pub(crate) continue_fn: ContinueFn,
    pub(crate) default_fn: ContinueFn,
    pub(crate) default_regs: Regs,
}

impl Process {
    pub fn new(module: &'static ModuleDef) -> Process {
        Process {
            module,
            regs: Regs::new(),
            clock: 0,
            continue_fn: module.entry(),
            default_fn: module.entry(),
            default_regs: Regs::new(),
        }
    }

    /// Prepare this process to execute: reset registers, rebuild the data
    /// segment and the PSP, and arm the entry point. Does not run anything;
    /// the process starts on the next `run()`.
    pub fn exec(&mut self, mem: &mut Memory, args: &str) {
        log::debug!("exec '{}' args '{}'", self.module.filename, args);

        self.regs = Regs::new();
        self.regs.ds = self.module.reloc_seg;
        self.regs.cs = self.module.entry_cs;
        self.continue_fn = self.module.entry();

        // Clear low memory, including the BIOS data area.
        mem.clear_range(0, 0x600);

        // Clear memory at and above the data segment, leaving lower memory
        // intact for whatever ran before us.
        let data_base = mem.seg_base(self.regs.ds);
        mem.clear_range(data_base, MEM_SIZE);

        // The zero runs were just cleared, so decompression only has to
        // write the nonzero bytes.
        decompress_rle(&mut mem.bytes_mut()[data_base..], self.module.data);

        // Program Segment Prefix: just before the start of the image, with
        // our command line in it.
        self.regs.es = self.regs.ds.wrapping_sub(0x10);
        let psp = mem.seg_mut(self.regs.es);
        for b in &mut psp[..0x80] {
            *b = 0;
        }
        let args = &args.as_bytes()[..args.len().min(0x7e)];
        psp[0x80] = args.len() as u8;
        for b in &mut psp[0x81..0x100] {
            *b = 0x0d;
        }
        psp[0x81..0x81 + args.len()].copy_from_slice(args);

        // Capture this state for future re-entry.
        self.default_fn = self.continue_fn;
        self.default_regs = self.regs;
    }

    pub fn has_function(&self, id: AddressId) -> bool {
        self.module.function(id).is_some()
    }

    /// Is the process parked at a continuation marked as a default entry
    /// which is *not* its original entry point? That's the shape of a game
    /// sitting in its main loop, safe to interrupt.
    pub fn is_waiting_in_main_loop(&self) -> bool {
        fn_eq(self.continue_fn, self.default_fn) && !fn_eq(self.continue_fn, self.module.entry())
    }

    /// Apply the continuation recorded by a yield.
    pub(crate) fn apply(&mut self, transfer: Transfer) {
        self.continue_fn = transfer.func;
        self.regs = transfer.regs;
        if transfer.default_entry {
            self.default_fn = transfer.func;
            self.default_regs = transfer.regs;
        }
    }

    /// Fall back to the default continuation after a normal return.
    pub(crate) fn rewind_to_default(&mut self) {
        self.continue_fn = self.default_fn;
        self.regs = self.default_regs;
    }
}

pub(crate) fn fn_eq(a: ContinueFn, b: ContinueFn) -> bool {
    a as usize == b as usize
}

/// Guard continuation installed by `exit`. Running a process again without
/// exec()ing it first is a bug in the caller.
pub fn exited_guard(_ctx: &mut Exec<'_>) -> Flow {
    panic!("continuing to run an exited process");
}

/// Execution context handed to every translated function.
///
/// Registers and the clock travel by value, the way the translator passes
/// them; the run loop writes them back into the process afterwards.
pub struct Exec<'a> {
    pub hw: &'a mut Hardware,
    pub stack: &'a mut Stack,
    pub regs: Regs,
    /// Segment bases for the registers as last loaded. Translated code
    /// reloads an entry whenever it writes the matching register.
    pub cache: SegmentCache,
    pub clock: u32,
    pub module: &'static ModuleDef,
}

impl<'a> Exec<'a> {
    /// Yield execution now, exiting all nested translated functions, and
    /// resume at `func` the next time the process runs.
    ///
    /// Never returns `Ok`; the result must be propagated with `?`.
    pub fn continue_from(&mut self, regs: Regs, func: ContinueFn, default_entry: bool) -> Flow {
        Err(Transfer {
            regs,
            func,
            default_entry,
        })
    }

    /// A computed branch landed on a value the translator has no target
    /// for. There is no way to continue.
    pub fn failed_dynamic_branch(&mut self, cs: u16, ip: u16, value: u32) -> ! {
        self.stack.trace();
        panic!(
            "failed dynamic branch at {:04x}:{:04x}, to {:x}",
            cs, ip, value
        );
    }

    /// Exported data offset of this module, for the typed memory views.
    pub fn address(&self, id: AddressId) -> Option<u16> {
        self.module.address(id)
    }

    /// Reload every cached segment base from the registers, as after a
    /// far transfer or a segment register write.
    pub fn load_segments(&mut self) {
        self.cache.load(&self.hw.mem, &self.regs);
    }
}

/// Decompress the data image into `dest`.
///
/// The format: bytes are copied verbatim, except that a run of 2 zero bytes
/// is followed by a 16-bit count of additional zeroes to skip. The output
/// buffer starts zero-filled, so skipping is all that's needed.
pub fn decompress_rle(dest: &mut [u8], src: &[u8]) {
    let mut din = 0usize;
    let mut sin = 0usize;
    let mut zeroes = 0u32;

    while sin < src.len() {
        let byte = src[sin];
        sin += 1;
        assert!(din < dest.len(), "overflow decompressing data image");
        dest[din] = byte;
        din += 1;

        if byte != 0 {
            zeroes = 0;
        } else {
            zeroes += 1;
            if zeroes == 2 {
                zeroes = 0;
                din += src[sin] as usize + ((src[sin + 1] as usize) << 8);
                sin += 2;
            }
        }
    }
}
