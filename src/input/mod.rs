//! Input buffering between the host and the game's polling loops.
//!
//! The game reads the keyboard through BIOS calls and the joystick through
//! a timed port read, both at its own pace. Host events land here first and
//! wait to be observed. The virtual mouse sits on top of the joystick: it
//! turns "walk to this spot" into continuous joystick deflection.

use crate::game::{obj, room, JoyFile, World};
use crate::mem::Memory;
use crate::ring::Ring;

const KEY_BUFFER_SIZE: usize = 32;
const MOUSE_BUFFER_SIZE: usize = 8;

/// Frames of mouse suppression after the player changes rooms.
const MOUSE_DELAY_ON_ROOM_CHANGE: u32 = 4;

/// Joystick deflection per pixel of remaining mouse distance.
const MOUSE_GAIN: f32 = 0.07;

/// Deflections inside this dead zone quantize to zero.
const JOYSTICK_RANGE_MIN: i32 = 3;
const JOYSTICK_RANGE_MAX: i32 = 10;

#[derive(Copy, Clone, Default)]
enum MouseEvent {
    #[default]
    None,
    /// Walk the player toward a target, in game coordinates.
    Pos {
        x: i32,
        y: i32,
    },
    /// Press or release the joystick button.
    Button(bool),
}

/// Buffered input state.
pub struct InputBuffer {
    key_buffer: Ring<u16, KEY_BUFFER_SIZE>,
    mouse_buffer: Ring<MouseEvent, MOUSE_BUFFER_SIZE>,

    js_x: f32,
    js_y: f32,
    /// Sub-unit motion carried between polls, so slow continuous movement
    /// dithers into discrete DOS poll samples.
    js_residual_x: f32,
    js_residual_y: f32,
    /// Latest button value.
    js_button_held: bool,
    /// Sticky press flag, so a tap shorter than one poll interval still
    /// registers.
    js_button_pressed: bool,

    saved_player_x: i32,
    saved_player_y: i32,
    saved_player_room: u8,
    mouse_delay_timer: u32,
}

impl InputBuffer {
    pub fn new() -> InputBuffer {
        let mut input = InputBuffer {
            key_buffer: Ring::new(),
            mouse_buffer: Ring::new(),
            js_x: 0.0,
            js_y: 0.0,
            js_residual_x: 0.0,
            js_residual_y: 0.0,
            js_button_held: false,
            js_button_pressed: false,
            saved_player_x: -1,
            saved_player_y: -1,
            saved_player_room: room::NONE,
            mouse_delay_timer: 0,
        };
        input.clear();
        input
    }

    pub fn clear(&mut self) {
        self.key_buffer.clear();
        self.mouse_buffer.clear();
        self.js_x = 0.0;
        self.js_y = 0.0;
        self.js_residual_x = 0.0;
        self.js_residual_y = 0.0;
        self.js_button_pressed = false;
        self.js_button_held = false;
    }

    /// More than one key waiting? The host speeds up the main loop while
    /// typed input is backed up.
    pub fn check_for_input_backlog(&self) -> bool {
        self.key_buffer.len() > 1
    }

    pub fn press_key(&mut self, ascii: u8, scancode: u8) {
        if !self.key_buffer.is_full() {
            self.key_buffer.push_back((scancode as u16) << 8 | ascii as u16);
        }
    }

    pub fn set_joystick_axes(&mut self, x: f32, y: f32) {
        self.mouse_buffer.clear();
        self.js_x = x.clamp(-1.0, 1.0) * JOYSTICK_RANGE_MAX as f32;
        self.js_y = y.clamp(-1.0, 1.0) * JOYSTICK_RANGE_MAX as f32;
    }

    pub fn set_joystick_button(&mut self, button: bool) {
        self.mouse_buffer.clear();
        self.js_button_held = button;
        self.js_button_pressed = self.js_button_pressed || button;
    }

    pub fn set_mouse_tracking(&mut self, x: i32, y: i32) {
        if let Some(MouseEvent::Pos { x: ex, y: ey }) = self.mouse_buffer.back_mut() {
            // Combine with an existing position event
            *ex = x;
            *ey = y;
            return;
        }

        if self.mouse_buffer.is_full() {
            // If the buffer overflows, assume something is wrong or stuck
            // and start over.
            self.mouse_buffer.clear();
        }
        self.mouse_buffer.push_back(MouseEvent::Pos { x, y });
    }

    pub fn set_mouse_button(&mut self, button: bool) {
        if !self.mouse_buffer.is_full() {
            self.mouse_buffer.push_back(MouseEvent::Button(button));
        }
    }

    pub fn end_mouse_tracking(&mut self) {
        self.mouse_buffer.clear();
        self.js_x = 0.0;
        self.js_y = 0.0;
        self.js_button_pressed = false;
        self.js_button_held = false;
    }

    /// Peek the next key without consuming it; 0 when none.
    pub fn check_for_key(&self) -> u16 {
        self.key_buffer.front().copied().unwrap_or(0)
    }

    /// Dequeue the next key; 0 when none.
    pub fn get_key(&mut self) -> u16 {
        self.key_buffer.pop_front().unwrap_or(0)
    }

    pub fn has_mouse_events(&self) -> bool {
        !self.mouse_buffer.is_empty()
    }

    /// One joystick poll, as the game's port read sees it: timed axis
    /// values against the joyfile centers and divisors, plus a port-0x201
    /// style status byte with active-low button bits.
    pub fn poll_joystick(
        &mut self,
        world: Option<World>,
        mem: &Memory,
        joyfile: &JoyFile,
    ) -> (u16, u16, u8) {
        // Mouse tracking drives the joystick toward the chosen spot
        // without ever violating the game's collision detection.
        self.update_mouse(world, mem);

        // Dither the motion so we can move slower than the game's dead
        // zone normally allows.
        let total_x = self.js_x + self.js_residual_x;
        let total_y = self.js_y + self.js_residual_y;

        let mut quantized_x = total_x as i32;
        let mut quantized_y = total_y as i32;
        if quantized_x.abs() < JOYSTICK_RANGE_MIN {
            quantized_x = 0;
        }
        if quantized_y.abs() < JOYSTICK_RANGE_MIN {
            quantized_y = 0;
        }

        self.js_residual_x = total_x - quantized_x as f32;
        self.js_residual_y = total_y - quantized_y as f32;

        // Button presses must not be missed if they end before the next
        // poll; the latch clears here.
        let button = self.js_button_held || self.js_button_pressed;
        self.js_button_pressed = false;

        let x_center = joyfile.x_center() as i32;
        let y_center = joyfile.y_center() as i32;
        let x = (quantized_x + x_center).clamp(0, x_center * 2) as u16;
        let y = (quantized_y + y_center).clamp(0, y_center * 2) as u16;

        let status = 0xfc ^ if button { 0x10 } else { 0 };
        (x, y, status)
    }

    fn update_mouse(&mut self, world: Option<World>, mem: &Memory) {
        // If the player moved to a different room, drop buffered mouse
        // input for a few frames; the old target is meaningless there.
        if let Some(world) = world {
            let player_room = world.object_room(mem, obj::PLAYER);
            if player_room != self.saved_player_room {
                self.mouse_delay_timer = MOUSE_DELAY_ON_ROOM_CHANGE;
            }
            self.saved_player_room = player_room;
        }

        if self.mouse_delay_timer > 0 {
            self.mouse_delay_timer -= 1;
            if !self.mouse_buffer.is_empty() {
                self.set_joystick_axes(0.0, 0.0);
            }
        }

        match self.mouse_buffer.front().copied() {
            None => {}
            Some(MouseEvent::Pos { x, y }) => {
                // Position events last until the requested position has
                // been reached
                if self.virtual_mouse_to_position(world, mem, x, y) {
                    self.mouse_buffer.pop_front();
                }
            }
            Some(MouseEvent::Button(state)) => {
                // Button events set the state immediately and last one frame
                self.js_button_held = state;
                self.mouse_buffer.pop_front();
            }
            Some(MouseEvent::None) => unreachable!(),
        }
    }

    /// Steer toward `(x, y)`. Returns true when the event is complete:
    /// either the player arrived, or it stopped moving against a wall.
    fn virtual_mouse_to_position(
        &mut self,
        world: Option<World>,
        mem: &Memory,
        x: i32,
        y: i32,
    ) -> bool {
        let Some(world) = world else {
            // Some part of the game we have no object data for, like the
            // main menu. Position events resolve immediately and do
            // nothing; button events still work.
            return true;
        };

        let (player_x, player_y) = world.object_xy(mem, obj::PLAYER);

        let xdiff = x - player_x;
        // Screen y runs the other way from game y
        let ydiff = -(y - player_y);

        self.js_x = axis_toward(xdiff);
        self.js_y = axis_toward(ydiff);

        if xdiff == 0 && ydiff == 0 {
            // Made it to the exact place we wanted to be
            self.saved_player_x = -1;
            self.saved_player_y = -1;
            return true;
        }

        // Not there yet; make sure the player keeps moving. If it's up
        // against a barrier and stops, consider the move complete too.
        let last_x = self.saved_player_x;
        let last_y = self.saved_player_y;
        self.saved_player_x = player_x;
        self.saved_player_y = player_y;
        last_x == player_x && last_y == player_y
    }
}

/// Joystick deflection for one axis of remaining distance, scaled so the
/// last pixel approaches gently.
fn axis_toward(diff: i32) -> f32 {
    if diff > 0 {
        (JOYSTICK_RANGE_MAX as f32).min(JOYSTICK_RANGE_MIN as f32 + MOUSE_GAIN * (diff - 1) as f32)
    } else if diff < 0 {
        -(JOYSTICK_RANGE_MAX as f32).min(JOYSTICK_RANGE_MIN as f32 - MOUSE_GAIN * (diff + 1) as f32)
    } else {
        0.0
    }
}

impl Default for InputBuffer {
    fn default() -> InputBuffer {
        InputBuffer::new()
    }
}
