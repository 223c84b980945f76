//! The host-facing surface: one engine value owning the whole machine,
//! with the entry points a frontend drives and the pacing logic for its
//! main loop.

use crate::cpu::Regs;
use crate::fs::GameArchive;
use crate::game::{GameData, JoyFile};
use crate::hardware::{Hardware, SaveStatus};
use crate::host::Host;
use crate::process::ModuleDef;
use crate::tinysave::TinySave;

/// Don't bother the host with sleeps shorter than this; keep running
/// translated code instead.
const MINIMUM_DELAY_MILLISECONDS: u32 = 10;

/// What the host loop should do after one engine step.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Step {
    /// Nothing to run: speed is zero or no process is loaded. Call again
    /// after the next host event.
    Idle,
    /// Sleep this many milliseconds, then step again. Zero means come back
    /// immediately (input is backed up).
    Wait(u32),
}

pub struct Engine {
    hw: Hardware,
    tiny: TinySave,
    speed: f32,
}

impl Engine {
    pub fn new(mut archive: GameArchive, host: Box<dyn Host>) -> Engine {
        let tiny = TinySave::new(&mut archive);
        Engine {
            hw: Hardware::new(archive, host),
            tiny,
            speed: 1.0,
        }
    }

    /// Make a translated executable available to `exec` and game loading.
    pub fn register_process(&mut self, module: &'static ModuleDef) {
        self.hw.register_process(module);
    }

    /// Start the named program with the given argument string, dropping
    /// any queued output from whatever ran before.
    pub fn exec(&mut self, program: &str, args: &str) {
        self.hw.output.clear();
        self.hw.exec(program, args);
    }

    /// One iteration of the host main loop: drain queued output until a
    /// real-time delay surfaces, running translated code whenever the
    /// queue goes dry.
    pub fn run(&mut self) -> Step {
        let speed = self.speed;
        if speed <= 0.0 {
            // Paused via speed control
            return Step::Idle;
        }

        let mut delay_accum = 0u32;
        loop {
            let queue_delay = self.hw.run_output();

            if queue_delay == 0 {
                if self.hw.has_process() {
                    self.hw.run();
                } else {
                    // Paused until the next exec
                    return Step::Idle;
                }
            }

            delay_accum += queue_delay;
            let adjusted_delay = (delay_accum as f32 / speed) as u32;

            if adjusted_delay >= MINIMUM_DELAY_MILLISECONDS {
                if self.hw.input.check_for_input_backlog() {
                    // Speed up while typed input is waiting
                    return Step::Wait(0);
                }
                return Step::Wait(adjusted_delay);
            }
        }
    }

    /// Engine speed: 1.0 is real time, larger is faster, zero pauses.
    /// Frame skip scales along so fast-forward isn't draw-bound.
    pub fn set_speed(&mut self, speed: f32) {
        self.speed = speed;
        self.hw.output.set_frame_skip((speed / 8.0).max(0.0) as u32);
    }

    pub fn press_key(&mut self, ascii: u8, scancode: u8) {
        self.hw.output.skip_delay();
        self.hw.input.press_key(ascii, scancode);
    }

    pub fn set_joystick_axes(&mut self, x: f32, y: f32) {
        self.hw.input.set_joystick_axes(x, y);
    }

    pub fn set_joystick_button(&mut self, button: bool) {
        if button {
            self.hw.output.skip_delay();
        }
        self.hw.input.set_joystick_button(button);
    }

    pub fn set_mouse_tracking(&mut self, x: i32, y: i32) {
        self.hw.input.set_mouse_tracking(x, y);
    }

    pub fn set_mouse_button(&mut self, button: bool) {
        if button {
            self.hw.output.skip_delay();
        }
        self.hw.input.set_mouse_button(button);
    }

    pub fn end_mouse_tracking(&mut self) {
        self.hw.input.end_mouse_tracking();
    }

    /// Snapshot the running game into the save slot.
    pub fn save_game(&mut self) -> SaveStatus {
        self.hw.save_game()
    }

    /// Boot whatever game the save slot holds.
    pub fn load_game(&mut self) -> bool {
        if self.hw.load_game() {
            self.hw.output.clear();
            true
        } else {
            false
        }
    }

    /// Load a chip save into slot `id` of the idle lab.
    pub fn load_chip(&mut self, id: u8) -> bool {
        self.hw.load_chip(id)
    }

    /// Boot the lab and open the documentation room for the saved chip.
    pub fn load_chip_documentation(&mut self) -> bool {
        self.hw.load_chip_documentation()
    }

    /// Enable the collision cheat. Takes effect on the next exec.
    pub fn set_cheats_enabled(&mut self, enable: bool) {
        self.hw.fs.config.set_cheats_enabled(enable);
    }

    /// The save slot contents.
    pub fn save_file(&self) -> &[u8] {
        self.hw.fs.save.bytes()
    }

    /// Replace the save slot, optionally decoding a compressed stream.
    pub fn set_save_file(&mut self, bytes: &[u8], compressed: bool) -> bool {
        if compressed {
            self.tiny.decompress(bytes, &mut self.hw.fs.save)
        } else {
            self.hw.fs.save.set_bytes(bytes)
        }
    }

    /// Compress the save slot into the shareable tiny format.
    pub fn pack_save_file(&mut self) -> &[u8] {
        self.tiny.compress(self.hw.fs.save.bytes())
    }

    pub fn compression_dictionary(&self) -> &[u8] {
        self.tiny.dictionary()
    }

    pub fn joyfile(&self) -> &JoyFile {
        &self.hw.fs.config
    }

    /// The emulated memory array.
    pub fn memory(&self) -> &[u8] {
        self.hw.mem.bytes()
    }

    /// Typed views over the running game's tables, when it exports them.
    pub fn game_data(&self) -> Option<GameData> {
        let process = self.hw.process()?;
        GameData::from_process(process.module, &process.regs, &self.hw.mem)
    }

    /// Registers of the running process, for debugging hosts.
    pub fn regs(&self) -> Option<Regs> {
        self.hw.process().map(|p| p.regs)
    }

    pub fn frame_count(&self) -> u32 {
        self.hw.output.frame_count()
    }

    /// Direct access for hosts that reach deeper (palette setup, tests).
    pub fn hardware(&mut self) -> &mut Hardware {
        &mut self.hw
    }
}
