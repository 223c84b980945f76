//! Host interface. The engine produces frames, sound and notifications;
//! what happens to them (canvas, audio device, autosave) is the host's
//! business.

/// Callbacks from the engine to its host. All have empty defaults so a
/// host only implements what it presents.
pub trait Host {
    /// A finished frame: SCREEN_WIDTH x SCREEN_HEIGHT RGBA bytes.
    fn on_render_frame(&mut self, _rgba: &[u8]) {}

    /// A synthesized sound effect: signed 8-bit PCM at `rate` Hz.
    fn on_render_sound(&mut self, _pcm: &[i8], _rate: u32) {}

    /// The game closed the save file after writing it.
    fn on_save_file_write(&mut self) {}

    /// The running process exited with a DOS exit code. A paused engine
    /// with no process is a normal state afterwards.
    fn on_process_exit(&mut self, _code: u8) {}

    /// Translated lab code asked for a chip to be loaded into slot `id`.
    fn on_load_chip_request(&mut self, _id: u8) {}
}

/// Host that discards everything, for tests and headless runs.
pub struct NullHost;

impl Host for NullHost {}
