//! The virtual stack used by translated code.
//!
//! This cheats significantly: the emulated stack is not part of the normal
//! address space at all, and it is strongly typed so we catch translated
//! code which breaks our assumptions about what it pushed.

use crate::cpu::Regs;

const STACK_SIZE: usize = 512;

/// Verification value stored while a return address is parked as a word.
const RET_VERIFICATION: u16 = 0xbeef;

/// If a single entry into translated code makes this many calls, assume
/// it is stuck in a loop the translator failed to break.
const TOTAL_CALLS_THRESHOLD: u32 = 100_000;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Tag {
    Invalid,
    Word,
    Flags,
    RetAddr,
}

#[derive(Copy, Clone)]
struct Entry {
    tag: Tag,
    word: u16,
    fn_addr: u16,
    uresult: u32,
    sresult: i32,
}

impl Entry {
    fn empty() -> Entry {
        Entry {
            tag: Tag::Invalid,
            word: 0,
            fn_addr: 0,
            uresult: 0,
            sresult: 0,
        }
    }
}

/// Typed control-flow stack for one entry into translated code.
///
/// Every pop asserts the tag the translated code expects. Mixing up pushes
/// and pops is a translator bug or emulated-memory corruption, and both are
/// fatal.
pub struct Stack {
    entries: [Entry; STACK_SIZE],
    top: usize,
    total_calls_made: u32,
}

impl Stack {
    pub fn new() -> Stack {
        Stack {
            entries: [Entry::empty(); STACK_SIZE],
            top: 0,
            total_calls_made: 0,
        }
    }

    pub fn reset(&mut self) {
        self.top = 0;
        self.total_calls_made = 0;
    }

    /// Dump the stack contents through the logger, most recent entry last.
    pub fn trace(&self) {
        log::error!("--- stack trace:");
        for (i, entry) in self.entries[..self.top].iter().enumerate() {
            match entry.tag {
                Tag::Invalid => log::error!("[{}] INVALID", i),
                Tag::Word => log::error!("[{}] word {:04x}", i, entry.word),
                Tag::Flags => {
                    log::error!("[{}] flags u={:08x} s={:08x}", i, entry.uresult, entry.sresult)
                }
                Tag::RetAddr => log::error!("[{}] ret fn={:04x}", i, entry.fn_addr),
            }
        }
        log::error!("---");
    }

    pub fn pushw(&mut self, word: u16) {
        let entry = self.alloc();
        entry.tag = Tag::Word;
        entry.word = word;
    }

    pub fn popw(&mut self) -> u16 {
        let entry = self.release();
        assert!(entry.tag == Tag::Word, "stack tag mismatch, expected word");
        entry.word
    }

    pub fn pushf(&mut self, regs: &Regs) {
        let entry = self.alloc();
        entry.tag = Tag::Flags;
        entry.uresult = regs.uresult;
        entry.sresult = regs.sresult;
    }

    pub fn popf(&mut self, regs: &mut Regs) {
        let entry = self.release();
        assert!(entry.tag == Tag::Flags, "stack tag mismatch, expected flags");
        regs.uresult = entry.uresult;
        regs.sresult = entry.sresult;
    }

    pub fn pushret(&mut self, fn_addr: u16) {
        self.total_calls_made += 1;
        if self.total_calls_made > TOTAL_CALLS_THRESHOLD {
            self.trace();
            panic!(
                "over {} calls since entry to translated code, infinite loop?",
                TOTAL_CALLS_THRESHOLD
            );
        }

        let entry = self.alloc();
        entry.tag = Tag::RetAddr;
        entry.fn_addr = fn_addr;
    }

    pub fn popret(&mut self, fn_addr: u16) {
        let entry = self.release();
        assert!(
            entry.tag == Tag::RetAddr,
            "stack tag mismatch, expected return to {:04x}",
            fn_addr
        );
    }

    /// Convert the return address on top of the stack into a word, with a
    /// verification value in it.
    ///
    /// A few game routines save the return value off the stack, poke the
    /// caller's stack, then restore the return value. This must be called
    /// before the return value is saved at the start of such a routine.
    pub fn pre_save_ret(&mut self) {
        assert!(self.top > 0, "stack empty in pre_save_ret");
        let entry = &mut self.entries[self.top - 1];
        assert!(entry.tag == Tag::RetAddr, "stack tag mismatch in pre_save_ret");
        entry.word = RET_VERIFICATION;
        entry.tag = Tag::Word;
    }

    /// Check the verification value left by `pre_save_ret` and convert the
    /// top of the stack back into a return address.
    pub fn post_restore_ret(&mut self) {
        assert!(self.top > 0, "stack empty in post_restore_ret");
        let entry = &mut self.entries[self.top - 1];
        assert!(entry.tag == Tag::Word, "stack tag mismatch in post_restore_ret");
        assert!(entry.word == RET_VERIFICATION, "stack retaddr verification mismatch");
        entry.tag = Tag::RetAddr;
    }

    fn alloc(&mut self) -> &mut Entry {
        assert!(self.top < STACK_SIZE, "translated code stack overflow");
        let entry = &mut self.entries[self.top];
        self.top += 1;
        entry
    }

    fn release(&mut self) -> Entry {
        assert!(self.top > 0, "translated code stack underflow");
        self.top -= 1;
        self.entries[self.top]
    }
}

impl Default for Stack {
    fn default() -> Stack {
        Stack::new()
    }
}
