//! Typed views over the game's in-memory data.
//!
//! Robot Odyssey keeps its world as parallel byte tables, indexed by object
//! or room number, at addresses the translator exports. These views overlay
//! structure on that memory without copying it. The byte layout is
//! load-bearing: saved game files are verbatim dumps of these tables.

use crate::cpu::Regs;
use crate::mem::Memory;
use crate::process::{AddressId, ModuleDef};

/// Wire colors, used for the small text style and circuit rendering.
pub const COLOR_WIRE_HOT: u8 = 5;
pub const COLOR_WIRE_COLD: u8 = 7;

/// Object IDs. The tables hold 256 objects; these are the ones the engine
/// itself needs to name.
pub mod obj {
    pub const PLAYER: u8 = 0x00;
    pub const SPARKY_L: u8 = 0xf0;
    pub const SPARKY_R: u8 = 0xf1;
    pub const CHECKERS_L: u8 = 0xf2;
    pub const CHECKERS_R: u8 = 0xf3;
    pub const SCANNER_L: u8 = 0xf4;
    pub const SCANNER_R: u8 = 0xf5;
    pub const ROBOT_MC_L: u8 = 0x01;
    pub const ROBOT_MC_R: u8 = 0x02;
    pub const CURSOR: u8 = 0xfe;
    pub const NONE: u8 = 0xff;
}

/// Room IDs.
pub mod room {
    pub const ESC_TEXT: u8 = 0x00;
    pub const SPARKY: u8 = 0x09;
    pub const CHECKERS: u8 = 0x0a;
    pub const SCANNER: u8 = 0x0b;
    /// Documentation room for the first chip in the lab.
    pub const CHIP_1: u8 = 0x0c;
    pub const NONE: u8 = 0x3f;
}

/// Sprite IDs for the slots the engine touches directly.
pub mod sprite {
    pub const GRABBER_UP: u8 = 0x3a;
    pub const GRABBER_RIGHT: u8 = 0x3b;
    pub const GRABBER_LEFT: u8 = 0x3c;
    pub const GRABBER_DOWN: u8 = 0x3d;
    pub const UNUSED_1: u8 = 0x3e;

    // GAME.EXE reshuffles three of the grabber slots.
    pub const GAME_GRABBER_UP: u8 = GRABBER_RIGHT;
    pub const GAME_GRABBER_RIGHT: u8 = GRABBER_LEFT;
    pub const GAME_GRABBER_LEFT: u8 = UNUSED_1;
}

/// World IDs: command line parameters to the game binaries, and the save
/// file field that says which binary reloads the save.
pub mod world_id {
    pub const SEWER: u8 = 0;
    pub const SUBWAY: u8 = 1;
    pub const TOWN: u8 = 2;
    pub const COMP: u8 = 3;
    pub const STREET: u8 = 4;
    pub const TUT1: u8 = 21;
    pub const TUT7: u8 = 27;
    pub const LAB: u8 = 30;
    pub const DEMO: u8 = 40;
    /// As a command line option, opens the load menu.
    pub const SAVED: u8 = 99;
}

/// Robot sides, indexing the bumper, thruster and grabber tables.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Side {
    Top = 0,
    Right = 1,
    Bottom = 2,
    Left = 3,
}

// World table offsets. See the save file layout: the world is the first
// 0x3500 bytes of every saved game.
const OBJ_NEXT_IN_ROOM: usize = 0x0000;
const OBJ_SPRITE: usize = 0x0100;
const OBJ_COLOR: usize = 0x0200;
const OBJ_ROOM: usize = 0x0300;
const OBJ_X: usize = 0x0400;
const OBJ_Y: usize = 0x0500;
const OBJ_MOVED_BY: usize = 0x0600;
const OBJ_MOVED_BY_OFF_X: usize = 0x0700;
const OBJ_MOVED_BY_OFF_Y: usize = 0x0800;
const OBJ_GRAB_FLAG: usize = 0x0900;
const SPRITES: usize = 0x0a00;
const ROOM_LIST_HEAD: usize = 0x0e00;
const ROOM_BG_COLOR: usize = 0x0e40;
const ROOM_FG_COLOR: usize = 0x0e80;
const ROOM_LINK_UP: usize = 0x0ec0;
const ROOM_LINK_DOWN: usize = 0x0f00;
const ROOM_LINK_RIGHT: usize = 0x0f40;
const ROOM_LINK_LEFT: usize = 0x0f80;
const ROOM_TILES: usize = 0x1000;
const TEXT_ROOM: usize = 0x1880;

/// Sprites are a 16-byte bitmap, 7 active bits per row.
pub const SPRITE_SIZE: usize = 16;

/// Rooms are a 30-byte tile bitmap, each byte a 2x4 grid of tiles.
pub const ROOM_TILES_SIZE: usize = 30;

/// The world tables overlaid on process memory.
#[derive(Copy, Clone)]
pub struct World {
    base: usize,
}

impl World {
    pub const SIZE: usize = 0x3500;

    /// Locate the world data inside a process image. `None` when the
    /// module doesn't export it (the menu binaries don't).
    pub fn from_process(module: &ModuleDef, regs: &Regs, mem: &Memory) -> Option<World> {
        let off = module.address(AddressId::WorldData)?;
        Some(World {
            base: mem.seg_base(regs.ds) + off as usize,
        })
    }

    /// View at a fixed linear address, for save file inspection.
    pub fn at(base: usize) -> World {
        World { base }
    }

    pub fn object_room(&self, mem: &Memory, obj: u8) -> u8 {
        mem.bytes()[self.base + OBJ_ROOM + obj as usize]
    }

    pub fn object_xy(&self, mem: &Memory, obj: u8) -> (i32, i32) {
        let bytes = mem.bytes();
        (
            bytes[self.base + OBJ_X + obj as usize] as i32,
            bytes[self.base + OBJ_Y + obj as usize] as i32,
        )
    }

    pub fn object_sprite(&self, mem: &Memory, obj: u8) -> u8 {
        mem.bytes()[self.base + OBJ_SPRITE + obj as usize]
    }

    pub fn object_color(&self, mem: &Memory, obj: u8) -> u8 {
        mem.bytes()[self.base + OBJ_COLOR + obj as usize]
    }

    pub fn set_object_xy(&self, mem: &mut Memory, obj: u8, x: i32, y: i32) {
        let bytes = mem.bytes_mut();
        bytes[self.base + OBJ_X + obj as usize] = x as u8;
        bytes[self.base + OBJ_Y + obj as usize] = y as u8;
    }

    /// Move an object to a room, keeping the per-room object lists intact.
    pub fn set_object_room(&self, mem: &mut Memory, obj: u8, new_room: u8) {
        let old_room = self.object_room(mem, obj);
        self.remove_object_from_room(mem, obj, old_room);
        mem.bytes_mut()[self.base + OBJ_ROOM + obj as usize] = new_room;
        self.add_object_to_room(mem, obj, new_room);
    }

    /// Robots come in two halves; both move to the same room.
    pub fn set_robot_room(&self, mem: &mut Memory, obj: u8, new_room: u8) {
        let left = obj & !1;
        self.set_object_room(mem, left, new_room);
        self.set_object_room(mem, left + 1, new_room);
    }

    /// Robots come in two halves; the right half sits 5 pixels over.
    pub fn set_robot_xy(&self, mem: &mut Memory, obj: u8, x: i32, y: i32) {
        let left = obj & !1;
        self.set_object_xy(mem, left, x, y);
        self.set_object_xy(mem, left + 1, x + 5, y);
    }

    pub fn room_tiles(&self, mem: &Memory, room: u8) -> [u8; ROOM_TILES_SIZE] {
        let start = self.base + ROOM_TILES + room as usize * ROOM_TILES_SIZE;
        mem.bytes()[start..start + ROOM_TILES_SIZE].try_into().unwrap()
    }

    pub fn room_colors(&self, mem: &Memory, room: u8) -> (u8, u8) {
        let bytes = mem.bytes();
        (
            bytes[self.base + ROOM_FG_COLOR + room as usize],
            bytes[self.base + ROOM_BG_COLOR + room as usize],
        )
    }

    pub fn room_links(&self, mem: &Memory, room: u8) -> [u8; 4] {
        let bytes = mem.bytes();
        [
            bytes[self.base + ROOM_LINK_UP + room as usize],
            bytes[self.base + ROOM_LINK_DOWN + room as usize],
            bytes[self.base + ROOM_LINK_RIGHT + room as usize],
            bytes[self.base + ROOM_LINK_LEFT + room as usize],
        ]
    }

    pub fn sprite_data(&self, mem: &Memory, id: u8) -> [u8; SPRITE_SIZE] {
        let start = self.base + SPRITES + id as usize * SPRITE_SIZE;
        mem.bytes()[start..start + SPRITE_SIZE].try_into().unwrap()
    }

    fn copy_sprite(&self, mem: &mut Memory, dest_id: u8, src: &[u8; SPRITE_SIZE]) {
        let start = self.base + SPRITES + dest_id as usize * SPRITE_SIZE;
        mem.bytes_mut()[start..start + SPRITE_SIZE].copy_from_slice(src);
    }

    /// Reset the world to the empty state the game expects: every object
    /// outside every room, every list terminated.
    pub fn clear(&self, mem: &mut Memory) {
        let bytes = mem.bytes_mut();
        for b in &mut bytes[self.base..self.base + World::SIZE] {
            *b = 0;
        }
        for b in &mut bytes[self.base + OBJ_NEXT_IN_ROOM..self.base + OBJ_NEXT_IN_ROOM + 0x100] {
            *b = obj::NONE;
        }
        for b in &mut bytes[self.base + OBJ_ROOM..self.base + OBJ_ROOM + 0x100] {
            *b = room::NONE;
        }
        for b in &mut bytes[self.base + ROOM_LIST_HEAD..self.base + ROOM_LIST_HEAD + 0x40] {
            *b = obj::NONE;
        }
        for b in &mut bytes[self.base + TEXT_ROOM..self.base + TEXT_ROOM + 0x80] {
            *b = room::NONE;
        }
    }

    fn remove_object_from_room(&self, mem: &mut Memory, obj: u8, room: u8) {
        // Unlink from the room's singly linked list. If the room is NONE or
        // the object isn't on the list, nothing happens.
        //
        // A bit vector memoizes every index we visit so a cycle in the list
        // terminates the walk. Old saves can hold world data that was never
        // fully initialized, and a corrupt list must not hang the engine.

        if room == room::NONE {
            return;
        }

        let mut memo = [0u64; 4];
        let mut seen = |id: u8| {
            let word = &mut memo[id as usize / 64];
            let bit = 1u64 << (id % 64);
            let hit = *word & bit != 0;
            *word |= bit;
            hit
        };

        let base = self.base;
        let bytes = mem.bytes_mut();

        // `head` is a linear address of the link byte currently pointing at
        // the candidate object.
        let mut head = base + ROOM_LIST_HEAD + room as usize;
        while bytes[head] != obj::NONE {
            let candidate = bytes[head];
            if seen(candidate) {
                return;
            }
            if candidate == obj {
                bytes[head] = bytes[base + OBJ_NEXT_IN_ROOM + obj as usize];
                return;
            }
            head = base + OBJ_NEXT_IN_ROOM + candidate as usize;
        }
    }

    fn add_object_to_room(&self, mem: &mut Memory, obj: u8, room: u8) {
        if room == room::NONE {
            return;
        }
        let base = self.base;
        let bytes = mem.bytes_mut();
        bytes[base + OBJ_NEXT_IN_ROOM + obj as usize] = bytes[base + ROOM_LIST_HEAD + room as usize];
        bytes[base + ROOM_LIST_HEAD + room as usize] = obj;
    }
}

// Circuit table offsets.
const FF_STATE: usize = 0x0500;
const FF_INPUTS: usize = 0x0514;
const SPECIAL_CURSOR_OBJ: usize = 0x078e;
const REMOTE_IS_ON: usize = 0x078f;
const TOOLBOX_FF_COUNT: usize = 0x0790;
const TOOLBOX_NODE_COUNT: usize = 0x0791;
const TOOLBOX_GATE_COUNT: usize = 0x0792;
const TOOLBOX_IS_CLOSED: usize = 0x0793;

/// The circuit tables: wires, flip-flops, gate allocations, toolbox.
#[derive(Copy, Clone)]
pub struct Circuit {
    base: usize,
}

impl Circuit {
    /// Size of the live tables.
    pub const SIZE: usize = 0x0794;
    /// Size the circuit occupies in a saved game.
    pub const SAVED_SIZE: usize = 0x0a00;

    pub fn from_process(module: &ModuleDef, regs: &Regs, mem: &Memory) -> Option<Circuit> {
        let off = module.address(AddressId::CircuitData)?;
        Some(Circuit {
            base: mem.seg_base(regs.ds) + off as usize,
        })
    }

    pub fn flipflop_state(&self, mem: &Memory, half: usize) -> u8 {
        mem.bytes()[self.base + FF_STATE + half]
    }

    pub fn flipflop_input(&self, mem: &Memory, half: usize) -> u8 {
        mem.bytes()[self.base + FF_INPUTS + half]
    }

    pub fn remote_is_on(&self, mem: &Memory) -> bool {
        mem.bytes()[self.base + REMOTE_IS_ON] != 0
    }

    pub fn special_cursor_obj(&self, mem: &Memory) -> u8 {
        mem.bytes()[self.base + SPECIAL_CURSOR_OBJ]
    }

    /// Remaining parts in the toolbox: `(flipflops, nodes, gates)`.
    pub fn toolbox_counts(&self, mem: &Memory) -> (u8, u8, u8) {
        let bytes = mem.bytes();
        (
            bytes[self.base + TOOLBOX_FF_COUNT],
            bytes[self.base + TOOLBOX_NODE_COUNT],
            bytes[self.base + TOOLBOX_GATE_COUNT],
        )
    }

    pub fn toolbox_is_closed(&self, mem: &Memory) -> bool {
        mem.bytes()[self.base + TOOLBOX_IS_CLOSED] != 0
    }
}

// Per-robot state record layout.
const ROBOT_OBJ_LEFT: usize = 0;
const ROBOT_THRUSTER_STATE: usize = 12;
const ROBOT_BUMPER_STATE: usize = 16;
const ROBOT_GRABBER_STATE: usize = 20;
const ROBOT_BATTERY_LEVEL: usize = 24;
const ROBOT_THRUSTER_SWITCH: usize = 25;

/// One robot's internal state: thrusters, bumpers, grabber, battery. This
/// holds what can't be recovered from the world tables alone.
#[derive(Copy, Clone)]
pub struct Robot {
    base: usize,
}

impl Robot {
    pub const SIZE: usize = 26;

    pub fn object_id(&self, mem: &Memory) -> u8 {
        mem.bytes()[self.base + ROBOT_OBJ_LEFT]
    }

    pub fn thruster_enable(&self, mem: &mut Memory, side: Side, on: bool) {
        let addr = self.base + ROBOT_THRUSTER_STATE + side as usize;
        let bytes = mem.bytes_mut();
        if on {
            if bytes[addr] == 0 {
                bytes[addr] = 1;
            }
        } else {
            bytes[addr] = 0;
        }
    }

    /// Advance the thruster animation one frame on every active side.
    pub fn animate_thrusters(&self, mem: &mut Memory) {
        const NEXT_STATE: [u8; 4] = [0, 2, 3, 1];
        let bytes = mem.bytes_mut();
        for i in 0..4 {
            let addr = self.base + ROBOT_THRUSTER_STATE + i;
            bytes[addr] = NEXT_STATE[bytes[addr] as usize & 3];
        }
    }

    pub fn bumper_state(&self, mem: &Memory, side: Side) -> u8 {
        mem.bytes()[self.base + ROBOT_BUMPER_STATE + side as usize]
    }

    pub fn grabber_state(&self, mem: &Memory, side: Side) -> u8 {
        mem.bytes()[self.base + ROBOT_GRABBER_STATE + side as usize]
    }

    /// Visible battery gauge, 0 through 15.
    pub fn battery_level(&self, mem: &Memory) -> u8 {
        mem.bytes()[self.base + ROBOT_BATTERY_LEVEL]
    }

    pub fn thruster_switch(&self, mem: &Memory) -> bool {
        mem.bytes()[self.base + ROBOT_THRUSTER_SWITCH] != 0
    }
}

/// Battery discharge accumulator, one per robot just past the state table.
/// The visible gauge loses a bar each time this 16-bit counter overflows.
#[derive(Copy, Clone)]
pub struct RobotBatteryAcc {
    base: usize,
}

impl RobotBatteryAcc {
    pub const SIZE: usize = 2;

    pub fn get(&self, mem: &Memory) -> u16 {
        let bytes = mem.bytes();
        (bytes[self.base] as u16) << 8 | bytes[self.base + 1] as u16
    }
}

/// Everything we know how to poke at inside a running game binary.
pub struct GameData {
    pub world: World,
    pub circuit: Circuit,
    pub robot_count: usize,
    robots_base: usize,
    grabbers_base: usize,
    battery_base: usize,
}

impl GameData {
    /// Locate all the tables, or `None` if this binary doesn't export them.
    ///
    /// The robot count isn't exported directly; it's inferred from the gap
    /// between the grabber table and the state table, and double-checked
    /// against the 0xFF terminator after the state table.
    pub fn from_process(module: &ModuleDef, regs: &Regs, mem: &Memory) -> Option<GameData> {
        let world = World::from_process(module, regs, mem)?;
        let circuit = Circuit::from_process(module, regs, mem)?;

        let ds = mem.seg_base(regs.ds);
        let robots_base = ds + module.address(AddressId::RobotDataMain)? as usize;
        let grabbers_base = ds + module.address(AddressId::RobotDataGrabber)? as usize;

        let robot_count = robots_base.checked_sub(grabbers_base)? / 4;
        if robot_count != 3 && robot_count != 4 {
            log::warn!("robot table sanity check failed, count {}", robot_count);
            return None;
        }

        let end_of_table = robots_base + robot_count * Robot::SIZE;
        if mem.bytes()[end_of_table] != 0xff {
            log::warn!("end of robot table not found");
            return None;
        }

        Some(GameData {
            world,
            circuit,
            robot_count,
            robots_base,
            grabbers_base,
            battery_base: end_of_table + 1,
        })
    }

    pub fn robot(&self, index: usize) -> Robot {
        assert!(index < self.robot_count);
        Robot {
            base: self.robots_base + index * Robot::SIZE,
        }
    }

    pub fn battery_acc(&self, index: usize) -> RobotBatteryAcc {
        assert!(index < self.robot_count);
        RobotBatteryAcc {
            base: self.battery_base + index * RobotBatteryAcc::SIZE,
        }
    }

    /// Grabber direction table for one robot: four bytes, zero or a sprite
    /// index per side.
    pub fn grabbers(&self, mem: &Memory, index: usize) -> [u8; 4] {
        assert!(index < self.robot_count);
        let start = self.grabbers_base + index * 4;
        mem.bytes()[start..start + 4].try_into().unwrap()
    }

    /// Copy all world data from another process image, possibly in a
    /// different memory. Ports worlds between the 3-robot and 4-robot
    /// binaries by remapping the grabber sprites that moved.
    pub fn copy_from(&self, mem: &mut Memory, source: &GameData, source_mem: &Memory) {
        let copy_robots = self.robot_count.min(source.robot_count);

        let world_src: Vec<u8> =
            source_mem.bytes()[source.world.base..source.world.base + World::SIZE].to_vec();
        mem.bytes_mut()[self.world.base..self.world.base + World::SIZE]
            .copy_from_slice(&world_src);

        let circuit_src: Vec<u8> =
            source_mem.bytes()[source.circuit.base..source.circuit.base + Circuit::SIZE].to_vec();
        mem.bytes_mut()[self.circuit.base..self.circuit.base + Circuit::SIZE]
            .copy_from_slice(&circuit_src);

        let grabbers = copy_robots * 4;
        let grabbers_src: Vec<u8> =
            source_mem.bytes()[source.grabbers_base..source.grabbers_base + grabbers].to_vec();
        mem.bytes_mut()[self.grabbers_base..self.grabbers_base + grabbers]
            .copy_from_slice(&grabbers_src);

        let robots = copy_robots * Robot::SIZE;
        let robots_src: Vec<u8> =
            source_mem.bytes()[source.robots_base..source.robots_base + robots].to_vec();
        mem.bytes_mut()[self.robots_base..self.robots_base + robots].copy_from_slice(&robots_src);

        let accs = copy_robots * RobotBatteryAcc::SIZE;
        let accs_src: Vec<u8> =
            source_mem.bytes()[source.battery_base..source.battery_base + accs].to_vec();
        mem.bytes_mut()[self.battery_base..self.battery_base + accs].copy_from_slice(&accs_src);

        // Move the grabber sprites between the slot layouts if the robot
        // counts differ.
        if self.robot_count == 4 && source.robot_count == 3 {
            for (dest, src) in [
                (sprite::GAME_GRABBER_UP, sprite::GRABBER_UP),
                (sprite::GAME_GRABBER_RIGHT, sprite::GRABBER_RIGHT),
                (sprite::GAME_GRABBER_LEFT, sprite::GRABBER_LEFT),
            ] {
                let data = source.world.sprite_data(source_mem, src);
                self.world.copy_sprite(mem, dest, &data);
            }
        } else if self.robot_count == 3 && source.robot_count == 4 {
            for (dest, src) in [
                (sprite::GRABBER_UP, sprite::GAME_GRABBER_UP),
                (sprite::GRABBER_RIGHT, sprite::GAME_GRABBER_RIGHT),
                (sprite::GRABBER_LEFT, sprite::GAME_GRABBER_LEFT),
            ] {
                let data = source.world.sprite_data(source_mem, src);
                self.world.copy_sprite(mem, dest, &data);
            }
        }
    }
}

/// A saved game is a verbatim dump of the world and circuit tables, the
/// compiled chip data, and five loose global bytes.
pub struct SavedGame<'a> {
    bytes: &'a [u8],
}

impl<'a> SavedGame<'a> {
    pub const WORLD_OFFSET: usize = 0;
    pub const CIRCUIT_OFFSET: usize = World::SIZE;
    pub const CHIP_BYTECODE_OFFSET: usize = Self::CIRCUIT_OFFSET + Circuit::SAVED_SIZE;
    pub const CHIP_PINS_OFFSET: usize = Self::CHIP_BYTECODE_OFFSET + 8 * 1024;
    pub const TRAILER_OFFSET: usize = Self::CHIP_PINS_OFFSET + 8 * 8;

    /// Total size: world + padded circuit + 8 chips of bytecode and pins +
    /// 5 trailing bytes.
    pub const SIZE: usize = Self::TRAILER_OFFSET + 5;

    pub fn new(bytes: &'a [u8]) -> Option<SavedGame<'a>> {
        if bytes.len() == Self::SIZE {
            Some(SavedGame { bytes })
        } else {
            None
        }
    }

    pub fn world_id(&self) -> u8 {
        self.bytes[Self::TRAILER_OFFSET + 4]
    }

    pub fn chip_bytecode(&self, chip: usize) -> &[u8] {
        let start = Self::CHIP_BYTECODE_OFFSET + chip * 1024;
        &self.bytes[start..start + 1024]
    }

    pub fn chip_pins(&self, chip: usize) -> &[u8] {
        let start = Self::CHIP_PINS_OFFSET + chip * 8;
        &self.bytes[start..start + 8]
    }

    /// Display name of the saved world.
    pub fn world_name(&self) -> &'static str {
        match self.world_id() {
            world_id::SEWER => "City Sewer",
            world_id::SUBWAY => "The Subway",
            world_id::TOWN => "Streets of Robotropolis",
            world_id::COMP => "Master Computer Center",
            world_id::STREET => "The Skyways",
            world_id::LAB => "Saved Lab",
            _ => "(Unknown)",
        }
    }

    /// Which executable loads this save, if any. Tutorial 6 runs in LAB.EXE
    /// which knows how to save, but those files can't be loaded.
    pub fn process_name(&self) -> Option<&'static str> {
        match self.world_id() {
            world_id::SEWER | world_id::SUBWAY | world_id::TOWN | world_id::COMP
            | world_id::STREET => Some("game.exe"),
            world_id::LAB => Some("lab.exe"),
            _ => None,
        }
    }
}

/// A saved chip is a different, smaller format routed to the chip loader.
pub const CHIP_SAVE_SIZE: usize = 1333;

// Joyfile offsets.
const JOY_ENABLED: usize = 0x0;
const JOY_IO_PORT: usize = 0x1;
const JOY_X_CENTER: usize = 0x3;
const JOY_Y_CENTER: usize = 0x4;
const JOY_XPLUS_DIVISOR: usize = 0x5;
const JOY_YPLUS_DIVISOR: usize = 0x6;
const JOY_XMINUS_DIVISOR: usize = 0x7;
const JOY_YMINUS_DIVISOR: usize = 0x8;
const JOY_CHEAT_CONTROL: usize = 0x9;
const JOY_DEBUG_CONTROL: usize = 0xa;
const JOY_DISK_DRIVE: usize = 0xc;

/// The 16-byte joystick/configuration record the game reads as
/// `joyfile.joy`.
#[derive(Clone)]
pub struct JoyFile {
    bytes: [u8; 16],
}

impl JoyFile {
    pub const SIZE: usize = 16;

    pub const DEFAULT_IO_PORT: u16 = 0x201;
    pub const DEFAULT_CENTER: u8 = 0x80;
    pub const DEFAULT_DIVISOR: u8 = 0x01;
    /// Magic value enabling the in-game collision cheat toggle.
    pub const CHEATS_ENABLED: u8 = 0x5e;
    /// Default for the mystery control word; other values change menu
    /// sound routines and a delay in the Street world.
    pub const DEBUG_NORMAL: u16 = 0x238;
    pub const DRIVE_A: u8 = 0x01;
    pub const DRIVE_B: u8 = 0x02;

    pub fn new() -> JoyFile {
        let mut joy = JoyFile { bytes: [0; 16] };
        joy.bytes[JOY_ENABLED] = 1;
        crate::mem::write16(&mut joy.bytes, JOY_IO_PORT, Self::DEFAULT_IO_PORT);
        joy.bytes[JOY_X_CENTER] = Self::DEFAULT_CENTER;
        joy.bytes[JOY_Y_CENTER] = Self::DEFAULT_CENTER;
        joy.bytes[JOY_XPLUS_DIVISOR] = Self::DEFAULT_DIVISOR;
        joy.bytes[JOY_YPLUS_DIVISOR] = Self::DEFAULT_DIVISOR;
        joy.bytes[JOY_XMINUS_DIVISOR] = Self::DEFAULT_DIVISOR;
        joy.bytes[JOY_YMINUS_DIVISOR] = Self::DEFAULT_DIVISOR;
        crate::mem::write16(&mut joy.bytes, JOY_DEBUG_CONTROL, Self::DEBUG_NORMAL);
        joy.bytes[JOY_DISK_DRIVE] = Self::DRIVE_A;
        joy
    }

    /// The record as the game reads it off "disk".
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn x_center(&self) -> u8 {
        self.bytes[JOY_X_CENTER]
    }

    pub fn y_center(&self) -> u8 {
        self.bytes[JOY_Y_CENTER]
    }

    /// Enable the CTRL-E collision toggle. Takes effect when the game next
    /// reads the joyfile, i.e. on restart.
    pub fn set_cheats_enabled(&mut self, enable: bool) {
        self.bytes[JOY_CHEAT_CONTROL] = if enable { Self::CHEATS_ENABLED } else { 0 };
    }

    pub fn cheats_enabled(&self) -> bool {
        self.bytes[JOY_CHEAT_CONTROL] == Self::CHEATS_ENABLED
    }
}

impl Default for JoyFile {
    fn default() -> JoyFile {
        JoyFile::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::Memory;

    fn test_world(mem: &mut Memory) -> World {
        let world = World::at(0x1000);
        world.clear(mem);
        world
    }

    #[test]
    fn object_room_lists_stay_linked() {
        let mut mem = Memory::new();
        let world = test_world(&mut mem);

        world.set_object_room(&mut mem, 1, 5);
        world.set_object_room(&mut mem, 2, 5);
        world.set_object_room(&mut mem, 3, 5);

        // Most recently added object is the list head
        let bytes = mem.bytes();
        assert_eq!(bytes[0x1000 + ROOM_LIST_HEAD + 5], 3);
        assert_eq!(bytes[0x1000 + OBJ_NEXT_IN_ROOM + 3], 2);
        assert_eq!(bytes[0x1000 + OBJ_NEXT_IN_ROOM + 2], 1);
        assert_eq!(bytes[0x1000 + OBJ_NEXT_IN_ROOM + 1], obj::NONE);

        // Unlink from the middle
        world.set_object_room(&mut mem, 2, 6);
        let bytes = mem.bytes();
        assert_eq!(bytes[0x1000 + ROOM_LIST_HEAD + 5], 3);
        assert_eq!(bytes[0x1000 + OBJ_NEXT_IN_ROOM + 3], 1);
        assert_eq!(bytes[0x1000 + ROOM_LIST_HEAD + 6], 2);
        assert_eq!(world.object_room(&mem, 2), 6);
    }

    #[test]
    fn cyclic_room_list_is_a_noop() {
        let mut mem = Memory::new();
        let world = test_world(&mut mem);

        // Corrupt list: 1 -> 2 -> 1 -> ...
        mem.bytes_mut()[0x1000 + ROOM_LIST_HEAD + 5] = 1;
        mem.bytes_mut()[0x1000 + OBJ_NEXT_IN_ROOM + 1] = 2;
        mem.bytes_mut()[0x1000 + OBJ_NEXT_IN_ROOM + 2] = 1;
        mem.bytes_mut()[0x1000 + OBJ_ROOM + 9] = 5;

        // Object 9 claims room 5 but isn't on the (cyclic) list; the move
        // must terminate and still record the new room.
        world.set_object_room(&mut mem, 9, 7);
        assert_eq!(world.object_room(&mem, 9), 7);
    }

    #[test]
    fn robots_move_in_pairs() {
        let mut mem = Memory::new();
        let world = test_world(&mut mem);

        world.set_robot_xy(&mut mem, obj::SPARKY_R, 100, 80);
        assert_eq!(world.object_xy(&mem, obj::SPARKY_L), (100, 80));
        assert_eq!(world.object_xy(&mem, obj::SPARKY_R), (105, 80));

        world.set_robot_room(&mut mem, obj::SPARKY_L, 3);
        assert_eq!(world.object_room(&mem, obj::SPARKY_L), 3);
        assert_eq!(world.object_room(&mem, obj::SPARKY_R), 3);
    }

    #[test]
    fn saved_game_trailer() {
        let mut buf = vec![0u8; SavedGame::SIZE];
        buf[SavedGame::TRAILER_OFFSET + 4] = world_id::LAB;
        let save = SavedGame::new(&buf).unwrap();
        assert_eq!(save.world_id(), world_id::LAB);
        assert_eq!(save.process_name(), Some("lab.exe"));
        assert_eq!(save.world_name(), "Saved Lab");

        buf[SavedGame::TRAILER_OFFSET + 4] = world_id::TUT1;
        let save = SavedGame::new(&buf).unwrap();
        assert_eq!(save.process_name(), None);

        assert!(SavedGame::new(&buf[1..]).is_none());
    }

    #[test]
    fn saved_game_size_adds_up() {
        assert_eq!(SavedGame::SIZE, 0x3500 + 0x0a00 + 0x2000 + 0x40 + 5);
    }

    #[test]
    fn joyfile_defaults_and_cheats() {
        let mut joy = JoyFile::new();
        let bytes = joy.as_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[1], 0x01);
        assert_eq!(bytes[2], 0x02);
        assert_eq!(bytes[3], 0x80);
        assert_eq!(bytes[9], 0);

        joy.set_cheats_enabled(true);
        assert_eq!(joy.as_bytes()[9], 0x5e);
        joy.set_cheats_enabled(false);
        assert!(!joy.cheats_enabled());
    }

    #[test]
    fn thruster_animation_cycles() {
        let mut mem = Memory::new();
        let robot = Robot { base: 0x2000 };

        robot.thruster_enable(&mut mem, Side::Top, true);
        assert_eq!(mem.bytes()[0x2000 + ROBOT_THRUSTER_STATE], 1);

        // 1 -> 2 -> 3 -> 1
        robot.animate_thrusters(&mut mem);
        assert_eq!(mem.bytes()[0x2000 + ROBOT_THRUSTER_STATE], 2);
        robot.animate_thrusters(&mut mem);
        assert_eq!(mem.bytes()[0x2000 + ROBOT_THRUSTER_STATE], 3);
        robot.animate_thrusters(&mut mem);
        assert_eq!(mem.bytes()[0x2000 + ROBOT_THRUSTER_STATE], 1);

        robot.thruster_enable(&mut mem, Side::Top, false);
        robot.animate_thrusters(&mut mem);
        assert_eq!(mem.bytes()[0x2000 + ROBOT_THRUSTER_STATE], 0);
    }
}
