//! End-to-end tests driving the engine through a stand-in translated
//! module: a little "game" that boots, draws frames, reads input, beeps,
//! and saves, shaped the way the real translated binaries behave.

use std::cell::RefCell;
use std::rc::Rc;

use ro_rs::cpu::Regs;
use ro_rs::engine::{Engine, Step};
use ro_rs::fs::GameArchive;
use ro_rs::game::{obj, SavedGame};
use ro_rs::hardware::SaveStatus;
use ro_rs::process::{AddressId, Exec, Flow, ModuleDef};
use ro_rs::Host;

// Data segment layout of the fake game. The world sits at 0x0100 so the
// save dump (world, circuit, chips, trailer) occupies 0x0100..0x6045
// contiguously, like the regions the real binaries serialize.
const DS: u16 = 0x0200;
const CS: u16 = 0x01f0;

const VAR_LAST_KEY: u16 = 0x0010;
const VAR_LAST_ZF: u16 = 0x0012;
const VAR_WORLD_ID: u16 = 0x0020;
const VAR_JOYFILE: u16 = 0x0040;

const WORLD: u16 = 0x0100;
const SAVE_SIZE: u16 = SavedGame::SIZE as u16;
const TRAILER_WORLD_ID: u16 = WORLD + SAVE_SIZE - 1;

const ROBOT_GRABBERS: u16 = 0x7000;
const ROBOT_STATE: u16 = 0x700c;
const ROBOT_TERMINATOR: u16 = ROBOT_STATE + 3 * 26;

/// CPU cycles per emulated frame, roughly 60 Hz.
const FRAME_CYCLES: u32 = 79_500;

fn world_poke(ctx: &mut Exec<'_>, table: u16, index: u8, value: u8) {
    ctx.hw.mem.poke8(DS, WORLD + table + index as u16, value);
}

fn world_peek(ctx: &mut Exec<'_>, table: u16, index: u8) -> u8 {
    ctx.hw.mem.peek8(DS, WORLD + table + index as u16)
}

fn entry(ctx: &mut Exec<'_>) -> Flow {
    // Parse the numeric world argument out of the PSP command line
    let len = ctx.hw.mem.peek8(ctx.regs.es, 0x80) as u16;
    let mut arg: u32 = 0;
    for i in 0..len {
        let c = ctx.hw.mem.peek8(ctx.regs.es, 0x81 + i);
        if c.is_ascii_digit() {
            arg = arg * 10 + (c - b'0') as u32;
        }
    }

    // Robot tables the engine's views expect
    ctx.hw.mem.poke8(DS, ROBOT_TERMINATOR, 0xff);

    // Read the joystick configuration the way the game does at boot
    ctx.regs.set_ah(0x3d);
    ctx.regs.dx = name_at(ctx, b"joyfile.joy\0");
    ctx.int21()?;
    let fd = ctx.regs.ax;
    ctx.regs.set_ah(0x3f);
    ctx.regs.bx = fd;
    ctx.regs.cx = 16;
    ctx.regs.dx = VAR_JOYFILE;
    ctx.int21()?;
    ctx.regs.set_ah(0x3e);
    ctx.regs.bx = fd;
    ctx.int21()?;

    if arg == 99 {
        // Boot from the save slot
        ctx.regs.set_ah(0x3d);
        ctx.regs.dx = name_at(ctx, b"savefile\0");
        ctx.int21()?;
        let fd = ctx.regs.ax;
        ctx.regs.set_ah(0x3f);
        ctx.regs.bx = fd;
        ctx.regs.cx = SAVE_SIZE;
        ctx.regs.dx = WORLD;
        ctx.int21()?;
        ctx.regs.set_ah(0x3e);
        ctx.regs.bx = fd;
        ctx.int21()?;

        let id = ctx.hw.mem.peek8(DS, TRAILER_WORLD_ID);
        ctx.hw.mem.poke8(DS, VAR_WORLD_ID, id);
    } else {
        // Fresh world
        ctx.hw.mem.poke8(DS, VAR_WORLD_ID, arg as u8);
        world_poke(ctx, 0x0400, obj::PLAYER, 80);
        world_poke(ctx, 0x0500, obj::PLAYER, 100);
    }

    // Set the video mode the way the real boot code does
    ctx.regs.set_ah(0x00);
    ctx.int10()?;

    // Park in the main loop
    let regs = ctx.regs;
    ctx.continue_from(regs, main_loop, true)
}

fn main_loop(ctx: &mut Exec<'_>) -> Flow {
    // One frame of game time
    ctx.clock += FRAME_CYCLES;

    // Walk the player by whatever the joystick says
    let (jx, jy, _status) = ctx.poll_joystick();
    let px = world_peek(ctx, 0x0400, obj::PLAYER) as i32;
    let py = world_peek(ctx, 0x0500, obj::PLAYER) as i32;
    let dx = (jx as i32 - 0x80).signum();
    let dy = (jy as i32 - 0x80).signum();
    world_poke(ctx, 0x0400, obj::PLAYER, (px + dx) as u8);
    world_poke(ctx, 0x0500, obj::PLAYER, (py - dy) as u8);

    // Check for a keystroke, BIOS style
    ctx.regs.set_ah(0x01);
    ctx.int16()?;
    let pending = ctx.regs.ax;
    let zf = ctx.regs.zf();

    if pending != 0 {
        ctx.hw.mem.poke16(DS, VAR_LAST_KEY, pending);
        ctx.hw.mem.poke8(DS, VAR_LAST_ZF, zf as u8);
        ctx.regs.set_ah(0x00);
        ctx.int16()?;

        match ctx.regs.al() {
            0x1b => {
                // ESC exits to DOS
                ctx.regs.ax = 0x4c00;
                ctx.int21()?;
            }
            b'b' => {
                // Click the speaker through ten gate toggles
                for k in 1..=10u8 {
                    ctx.clock += 200;
                    ctx.port_out(0x61, (k & 1) << 1);
                }
            }
            _ => {}
        }
    }

    // Scan out the frame
    ctx.push_frame();
    Ok(())
}

fn save_game(ctx: &mut Exec<'_>) -> Flow {
    // Store the loose globals into the trailer, then dump everything
    let id = ctx.hw.mem.peek8(DS, VAR_WORLD_ID);
    ctx.hw.mem.poke8(DS, TRAILER_WORLD_ID, id);

    ctx.regs.set_ah(0x3c);
    ctx.regs.dx = name_at(ctx, b"savefile\0");
    ctx.int21()?;
    let fd = ctx.regs.ax;

    ctx.regs.set_ah(0x40);
    ctx.regs.bx = fd;
    ctx.regs.cx = SAVE_SIZE;
    ctx.regs.dx = WORLD;
    ctx.int21()?;

    ctx.regs.set_ah(0x3e);
    ctx.regs.bx = fd;
    ctx.int21()?;
    Ok(())
}

/// Plant a filename in scratch memory and hand back its offset.
fn name_at(ctx: &mut Exec<'_>, name: &[u8]) -> u16 {
    const SCRATCH: u16 = 0x00c0;
    for (i, &b) in name.iter().enumerate() {
        ctx.hw.mem.poke8(DS, SCRATCH + i as u16, b);
    }
    SCRATCH
}

static GAME: ModuleDef = ModuleDef {
    filename: "game.exe",
    data: &[],
    reloc_seg: DS,
    entry_cs: CS,
    functions: &[
        (AddressId::EntryFunc, entry),
        (AddressId::SaveGameFunc, save_game),
    ],
    addresses: &[
        (AddressId::WorldData, WORLD),
        (AddressId::CircuitData, WORLD + 0x3500),
        (AddressId::RobotDataMain, ROBOT_STATE),
        (AddressId::RobotDataGrabber, ROBOT_GRABBERS),
    ],
};

#[derive(Default)]
struct Record {
    frames: usize,
    sounds: Vec<Vec<i8>>,
    exits: Vec<u8>,
    save_writes: usize,
}

struct SharedHost(Rc<RefCell<Record>>);

impl Host for SharedHost {
    fn on_render_frame(&mut self, _rgba: &[u8]) {
        self.0.borrow_mut().frames += 1;
    }

    fn on_render_sound(&mut self, pcm: &[i8], _rate: u32) {
        self.0.borrow_mut().sounds.push(pcm.to_vec());
    }

    fn on_process_exit(&mut self, code: u8) {
        self.0.borrow_mut().exits.push(code);
    }

    fn on_save_file_write(&mut self) {
        self.0.borrow_mut().save_writes += 1;
    }
}

fn boot(args: &str) -> (Engine, Rc<RefCell<Record>>) {
    let record = Rc::new(RefCell::new(Record::default()));
    let mut engine = Engine::new(GameArchive::empty(), Box::new(SharedHost(record.clone())));
    engine.register_process(&GAME);
    engine.exec("game.exe", args);
    (engine, record)
}

/// Step the engine until `cond` holds, failing the test if it never does.
fn run_until(engine: &mut Engine, record: &Rc<RefCell<Record>>, cond: impl Fn(&Record) -> bool) {
    for _ in 0..1000 {
        if cond(&record.borrow()) {
            return;
        }
        match engine.run() {
            Step::Idle => break,
            Step::Wait(_) => {}
        }
    }
    assert!(cond(&record.borrow()), "engine never reached the expected state");
}

#[test]
fn boot_to_first_frame() {
    let (mut engine, record) = boot("21");

    run_until(&mut engine, &record, |r| r.frames >= 1);
    assert_eq!(engine.frame_count(), 1);
    assert_eq!(record.borrow().frames, 1);
    assert!(record.borrow().sounds.is_empty());
}

#[test]
fn key_press_reaches_bios_with_flags() {
    let (mut engine, record) = boot("21");
    run_until(&mut engine, &record, |r| r.frames >= 1);

    engine.press_key(0x20, 0x39);
    let before = record.borrow().frames;
    run_until(&mut engine, &record, |r| r.frames > before + 1);

    // The main loop observed AX = scancode<<8 | ascii with ZF clear
    let mem = engine.memory();
    let base = (DS as usize) << 4;
    let key = mem[base + VAR_LAST_KEY as usize] as u16
        | (mem[base + VAR_LAST_KEY as usize + 1] as u16) << 8;
    assert_eq!(key, 0x3920);
    assert_eq!(mem[base + VAR_LAST_ZF as usize], 0);
}

#[test]
fn save_and_reload_round_trip() {
    let (mut engine, record) = boot("0");
    run_until(&mut engine, &record, |r| r.frames >= 2);

    assert_eq!(engine.save_game(), SaveStatus::Ok);
    assert_eq!(record.borrow().save_writes, 1);

    let saved = engine.save_file().to_vec();
    assert_eq!(saved.len(), SavedGame::SIZE);
    let view = SavedGame::new(&saved).unwrap();
    assert_eq!(view.world_id(), 0);
    assert_eq!(view.process_name(), Some("game.exe"));

    // Reload: the engine boots game.exe with the load argument and the
    // world comes back identical.
    assert!(engine.load_game());
    run_until(&mut engine, &record, |r| r.frames >= 3);

    assert_eq!(engine.save_game(), SaveStatus::Ok);
    assert_eq!(engine.save_file(), &saved[..]);
}

#[test]
fn save_round_trips_any_valid_buffer() {
    let (mut engine, record) = boot("0");
    run_until(&mut engine, &record, |r| r.frames >= 1);

    // An arbitrary buffer of the right size with a loadable world id
    let mut buffer = vec![0u8; SavedGame::SIZE];
    for (i, b) in buffer.iter_mut().enumerate() {
        *b = (i * 7) as u8;
    }
    buffer[SavedGame::SIZE - 1] = 0; // world id: sewer

    assert!(engine.set_save_file(&buffer, false));
    assert!(engine.load_game());
    run_until(&mut engine, &record, |r| r.frames >= 2);

    assert_eq!(engine.save_game(), SaveStatus::Ok);
    assert_eq!(engine.save_file(), &buffer[..]);
}

#[test]
fn speaker_effect_renders_alternating_pcm() {
    let (mut engine, record) = boot("21");
    run_until(&mut engine, &record, |r| r.frames >= 1);

    engine.press_key(b'b', 0x30);
    run_until(&mut engine, &record, |r| !r.sounds.is_empty());

    let record = record.borrow();
    assert_eq!(record.sounds.len(), 1);
    let pcm = &record.sounds[0];
    assert_eq!(pcm.len(), 10);
    for (i, &s) in pcm.iter().enumerate() {
        assert_eq!(s as usize, (i + 1) % 2, "sample {}", i);
    }
}

#[test]
fn virtual_mouse_walks_player_to_target() {
    let (mut engine, record) = boot("0");

    // Let the input tracker settle into the player's starting room
    run_until(&mut engine, &record, |r| r.frames >= 6);

    engine.set_mouse_tracking(90, 90);
    let goal = record.borrow().frames + 30;
    run_until(&mut engine, &record, |r| r.frames >= goal);

    let data = engine.game_data().expect("game data views");
    assert_eq!(data.robot_count, 3);
    let mem_view = engine.memory();
    let base = ((DS as usize) << 4) + WORLD as usize;
    let px = mem_view[base + 0x0400 + obj::PLAYER as usize];
    let py = mem_view[base + 0x0500 + obj::PLAYER as usize];
    assert_eq!((px, py), (90, 90));
}

#[test]
fn escape_exits_to_dos() {
    let (mut engine, record) = boot("21");
    run_until(&mut engine, &record, |r| r.frames >= 1);

    engine.press_key(0x1b, 0x01);
    run_until(&mut engine, &record, |r| !r.exits.is_empty());

    assert_eq!(record.borrow().exits, vec![0]);
    // A paused engine with no process is a normal state
    assert_eq!(engine.run(), Step::Idle);
}

#[test]
fn cheats_byte_lands_in_the_joyfile() {
    let (mut engine, record) = boot("21");
    assert_eq!(engine.joyfile().as_bytes()[9], 0);

    engine.set_cheats_enabled(true);
    assert_eq!(engine.joyfile().as_bytes()[9], 0x5e);

    // The game re-reads the joyfile at exec time and sees the byte
    engine.exec("game.exe", "21");
    run_until(&mut engine, &record, |r| r.frames >= 1);
    let mem = engine.memory();
    let base = (DS as usize) << 4;
    assert_eq!(mem[base + VAR_JOYFILE as usize + 9], 0x5e);
    assert_eq!(mem[base + VAR_JOYFILE as usize], 1);
}

#[test]
fn packed_save_round_trips() {
    let (mut engine, record) = boot("0");
    run_until(&mut engine, &record, |r| r.frames >= 2);
    assert_eq!(engine.save_game(), SaveStatus::Ok);
    let plain = engine.save_file().to_vec();

    let packed = engine.pack_save_file().to_vec();
    assert!(!packed.is_empty());
    assert!(packed.len() < plain.len());

    // Clobber the slot, then restore from the packed form
    assert!(engine.set_save_file(&[1, 2, 3], false));
    assert!(engine.set_save_file(&packed, true));
    assert_eq!(engine.save_file(), &plain[..]);
    assert!(engine.load_game());
}

#[test]
fn speed_zero_pauses_the_loop() {
    let (mut engine, _record) = boot("21");
    engine.set_speed(0.0);
    assert_eq!(engine.run(), Step::Idle);

    engine.set_speed(1.0);
    assert!(matches!(engine.run(), Step::Wait(_)));
}

#[test]
fn typed_backlog_requests_fast_stepping() {
    let (mut engine, record) = boot("21");
    run_until(&mut engine, &record, |r| r.frames >= 1);

    for _ in 0..4 {
        engine.press_key(b'x', 0x2d);
    }
    // With more than one key waiting, the engine asks to be stepped
    // again immediately.
    assert_eq!(engine.run(), Step::Wait(0));
}

#[test]
fn regs_are_visible_to_the_host() {
    let (mut engine, record) = boot("21");
    run_until(&mut engine, &record, |r| r.frames >= 1);

    let regs: Regs = engine.regs().unwrap();
    assert_eq!(regs.ds, DS);
}
