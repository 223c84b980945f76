//! The output queue: everything the game produces, in emulated time order.
//!
//! Translated code runs much faster than a 4.77 MHz 8086, so it can't just
//! draw and beep as it goes. Instead every frame, delay and speaker toggle
//! is queued with its CPU-cycle timestamp, and the host drains the queue in
//! real time between runs of translated code.

use std::collections::VecDeque;

use crate::draw::{Renderer, CGA_FRAMEBUFFER_SIZE, CGA_HEIGHT, CGA_WIDTH, SCREEN_WIDTH, ZOOM};
use crate::host::Host;
use crate::ring::Ring;

/// Clock rate the translated code's cycle counter models.
pub const CPU_CLOCK_HZ: u32 = 4_770_000;

/// CPU cycles per PCM sample when synthesizing speaker audio.
pub const CPU_CLOCKS_PER_SAMPLE: u32 = 200;

/// Sample rate of the synthesized audio.
pub const AUDIO_HZ: u32 = CPU_CLOCK_HZ / CPU_CLOCKS_PER_SAMPLE;

const AUDIO_BUFFER_SECONDS: usize = 10;
const AUDIO_BUFFER_SAMPLES: usize = AUDIO_HZ as usize * AUDIO_BUFFER_SECONDS;

const MAX_BUFFERED_FRAMES: usize = 128;
const MAX_BUFFERED_EVENTS: usize = 16384;

const CLOCKS_PER_MSEC: u32 = (CPU_CLOCK_HZ + 500) / 1000;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum OutputItem {
    /// A CGA frame capture; the pixels sit in the separate frame ring.
    CgaFrame,
    /// Real-time wait, in milliseconds. Always positive.
    Delay(u32),
    /// The PC speaker toggled at this CPU timestamp.
    SpeakerEdge(u32),
}

impl Default for OutputItem {
    fn default() -> OutputItem {
        OutputItem::Delay(0)
    }
}

/// A queued snapshot of the CGA framebuffer.
type CgaSnapshot = Box<[u8; CGA_FRAMEBUFFER_SIZE]>;

pub struct OutputQueue {
    items: Ring<OutputItem, MAX_BUFFERED_EVENTS>,
    /// Frame pixels live apart from the item ring; 16 KiB items would
    /// fragment it badly.
    frames: VecDeque<CgaSnapshot>,

    /// CPU timestamp corresponding to everything already converted to
    /// real time. Deltas against this become delays; the fractional
    /// remainder stays here so no time is lost.
    reference_timestamp: u32,

    frame_counter: u32,
    frameskip_value: u32,
    frameskip_counter: u32,

    pcm: Vec<i8>,

    pub draw: Renderer,
}

impl OutputQueue {
    pub fn new() -> OutputQueue {
        OutputQueue {
            items: Ring::new(),
            frames: VecDeque::new(),
            reference_timestamp: 0,
            frame_counter: 0,
            frameskip_value: 0,
            frameskip_counter: 0,
            pcm: Vec::with_capacity(AUDIO_BUFFER_SAMPLES),
            draw: Renderer::new(),
        }
    }

    /// Drop everything queued. Used on exec and on game load.
    pub fn clear(&mut self) {
        self.items.clear();
        self.frames.clear();
        self.frame_counter = 0;
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_counter
    }

    /// Deliver only every (N+1)th frame. The expansion work still runs so
    /// emulated state stays identical; only the host callback is skipped.
    pub fn set_frame_skip(&mut self, frameskip: u32) {
        self.frameskip_value = frameskip;
    }

    pub fn set_time_reference(&mut self, timestamp: u32) {
        self.reference_timestamp = timestamp;
    }

    /// Room for another frame? Overflow means translated code is spinning
    /// without the host draining; the caller treats it as fatal.
    pub fn frames_full(&self) -> bool {
        self.frames.len() >= MAX_BUFFERED_FRAMES || self.items.is_full()
    }

    /// Queue a copy of the CGA framebuffer, preceded by the delay that
    /// places it correctly in real time.
    pub fn push_frame_cga(&mut self, timestamp: u32, framebuffer: &[u8]) {
        assert!(!self.frames_full(), "frame queue is too deep, infinite loop likely");

        self.push_delay(timestamp, 0);
        self.items.push_back(OutputItem::CgaFrame);

        let mut snapshot: CgaSnapshot = vec![0u8; CGA_FRAMEBUFFER_SIZE]
            .into_boxed_slice()
            .try_into()
            .unwrap();
        snapshot.copy_from_slice(&framebuffer[..CGA_FRAMEBUFFER_SIZE]);
        self.frames.push_back(snapshot);
    }

    /// The HD rendering path: the backbuffer was already painted through
    /// `draw`; account for time and deliver it synchronously.
    pub fn draw_frame_rgb(&mut self, timestamp: u32, host: &mut dyn Host) {
        self.push_delay(timestamp, 0);
        self.render_frame(host);
    }

    /// Convert CPU time since the reference into a queued delay, merging
    /// with a delay already at the tail. Extra milliseconds ride along.
    pub fn push_delay(&mut self, timestamp: u32, extra_millis: u32) {
        let elapsed_clocks = timestamp.wrapping_sub(self.reference_timestamp);
        let elapsed_msec = (elapsed_clocks + CLOCKS_PER_MSEC / 2) / CLOCKS_PER_MSEC;
        self.reference_timestamp = self
            .reference_timestamp
            .wrapping_add(elapsed_msec * CLOCKS_PER_MSEC);

        let millis = extra_millis + elapsed_msec;
        if millis == 0 {
            return;
        }

        if let Some(OutputItem::Delay(pending)) = self.items.back_mut() {
            // Combine with the existing delay
            *pending += millis;
            return;
        }

        if !self.items.is_full() {
            self.items.push_back(OutputItem::Delay(millis));
        }
    }

    /// Queue one speaker toggle. A run of edges gets a single delay
    /// separator in front of it; the edges themselves carry timestamps.
    pub fn push_speaker_timestamp(&mut self, timestamp: u32) {
        assert!(!self.items.is_full(), "speaker queue is too deep, infinite loop likely");

        if !matches!(self.items.back_mut(), Some(OutputItem::SpeakerEdge(_))) {
            self.push_delay(timestamp, 0);
        }

        self.items.push_back(OutputItem::SpeakerEdge(timestamp));
    }

    /// Collapse queued delays to their 1 ms minimum so buffered input gets
    /// seen right away. Invoked when the host delivers a key or button.
    pub fn skip_delay(&mut self) {
        self.items.for_each_mut(|item| {
            if let OutputItem::Delay(ms) = item {
                *ms = 1;
            }
        });
    }

    /// Generate output until the queue runs dry (returns 0) or a delay
    /// surfaces (returns the milliseconds to wait).
    pub fn run(&mut self, host: &mut dyn Host) -> u32 {
        while let Some(item) = self.items.pop_front() {
            match item {
                OutputItem::CgaFrame => {
                    self.dequeue_cga_frame();
                    self.render_frame(host);
                }
                OutputItem::Delay(ms) => {
                    debug_assert!(ms > 0);
                    return ms;
                }
                OutputItem::SpeakerEdge(timestamp) => {
                    self.render_sound_effect(timestamp, host);
                }
            }
        }
        0
    }

    /// Expand the oldest queued CGA frame into the RGBA backbuffer: two
    /// interleaved scanline planes, four pixels per byte, through the CGA
    /// palette with 2x zoom.
    fn dequeue_cga_frame(&mut self) {
        let frame = self.frames.pop_front().expect("frame ring out of sync");
        let backbuffer = &mut self.draw.backbuffer;

        for plane in 0..2usize {
            for y in 0..CGA_HEIGHT / 2 {
                let row = (y * 2 + plane) * ZOOM;
                let line_start = row * SCREEN_WIDTH;

                for x in 0..CGA_WIDTH {
                    let byte = 0x2000 * plane + (x + CGA_WIDTH * y) / 4;
                    let bit = 3 - x % 4;
                    let color = frame[byte] >> (bit * 2) & 3;
                    let rgb = self.draw.color_table.cga[color as usize];

                    // Zoom each CGA pixel
                    for zy in 0..ZOOM {
                        for zx in 0..ZOOM {
                            backbuffer[line_start + x * ZOOM + zx + zy * SCREEN_WIDTH] = rgb;
                        }
                    }
                }
            }
        }
    }

    /// Deliver the backbuffer to the host, honoring frame skip.
    fn render_frame(&mut self, host: &mut dyn Host) {
        if self.frameskip_counter < self.frameskip_value {
            self.frameskip_counter += 1;
        } else {
            self.frameskip_counter = 0;
            host.on_render_frame(&self.draw.backbuffer_bytes());
            self.frame_counter += 1;
        }
    }

    /// Slurp up a run of speaker edges and synthesize one PCM effect.
    ///
    /// The first sample is always a 1; each edge toggles the level, and the
    /// gap between edges sets how many samples of that level to emit. Stops
    /// at the first non-edge item or when the buffer fills.
    fn render_sound_effect(&mut self, first_timestamp: u32, host: &mut dyn Host) {
        let mut previous_timestamp = first_timestamp;
        let mut next_sample: i8 = 1;
        let mut clocks_remaining: i64 = 0;

        self.pcm.clear();

        while self.pcm.len() < AUDIO_BUFFER_SAMPLES && clocks_remaining >= 0 {
            self.pcm.push(next_sample);
            clocks_remaining -= CPU_CLOCKS_PER_SAMPLE as i64;

            if clocks_remaining < 0 {
                let timestamp = match self.items.front() {
                    Some(&OutputItem::SpeakerEdge(ts)) => ts,
                    _ => break,
                };
                self.items.pop_front();
                clocks_remaining += timestamp.wrapping_sub(previous_timestamp) as i64;
                previous_timestamp = timestamp;
                next_sample = (next_sample == 0) as i8;
            }
        }

        host.on_render_sound(&self.pcm, AUDIO_HZ);
    }
}

impl Default for OutputQueue {
    fn default() -> OutputQueue {
        OutputQueue::new()
    }
}
