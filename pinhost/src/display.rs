//! Frame buffer and pointer state shared with a presentation layer.
//!
//! The application flushes rectangles of 32-bit pixels into the frame
//! buffer; whatever presents the screen (a window, a VNC server, a test)
//! takes finished frames and reports pointer input back. [`Display`] is a
//! cheap clone over shared state, so the two sides can live on different
//! threads.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::DisplayConfig;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;

const BYTES_PER_PIXEL: usize = 4;

/// Last known pointer position and button state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointerState {
    pub pressed: bool,
    pub x: i32,
    pub y: i32,
}

/// A copy of the frame buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u16,
    pub height: u16,
    pub pixels: Vec<u32>,
}

struct State {
    width: u16,
    height: u16,
    pixels: Vec<u32>,
    dirty: bool,
    presenting: bool,
    pointer: PointerState,
}

impl State {
    fn contains(&self, x: i32, y: i32) -> bool {
        (0..i32::from(self.width)).contains(&x) && (0..i32::from(self.height)).contains(&y)
    }
}

#[derive(Clone)]
pub struct Display {
    state: Arc<Mutex<State>>,
}

impl Display {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                width,
                height,
                pixels: vec![0; usize::from(width) * usize::from(height)],
                dirty: false,
                presenting: false,
                pointer: PointerState::default(),
            })),
        }
    }

    pub fn from_config(config: &DisplayConfig) -> Self {
        Self::new(config.width, config.height)
    }

    pub fn size(&self) -> (u16, u16) {
        let state = self.state.lock();
        (state.width, state.height)
    }

    /// Resize the screen. Only allowed before presentation starts, and only
    /// to a non-zero size. Clears the frame buffer.
    pub fn set_screen_size(&self, width: u16, height: u16) -> Result<()> {
        let mut state = self.state.lock();
        if state.presenting {
            return Err(Error::Display("screen size is fixed once presentation starts"));
        }
        if width == 0 || height == 0 {
            return Err(Error::Display("screen size must be non-zero"));
        }
        state.width = width;
        state.height = height;
        state.pixels = vec![0; usize::from(width) * usize::from(height)];
        debug!(width, height, "Screen size set");
        Ok(())
    }

    /// Called by the presentation side once it has created its surface.
    pub fn start_presentation(&self) {
        self.state.lock().presenting = true;
    }

    /// Copy a `width` x `height` rectangle of pixels (4 bytes each, little
    /// endian, row-major) to `(x, y)`. Parts outside the screen are dropped.
    pub fn flush(&self, x: i32, y: i32, width: u16, height: u16, pixels: &[u8]) -> Result<()> {
        let (w, h) = (usize::from(width), usize::from(height));
        if pixels.len() < w * h * BYTES_PER_PIXEL {
            return Err(Error::Display("pixel data shorter than the rectangle"));
        }
        let mut state = self.state.lock();
        let stride = usize::from(state.width);
        for row in 0..h {
            let dy = y + row as i32;
            for col in 0..w {
                let dx = x + col as i32;
                if !state.contains(dx, dy) {
                    continue;
                }
                let src = (row * w + col) * BYTES_PER_PIXEL;
                let mut px = [0u8; BYTES_PER_PIXEL];
                px.copy_from_slice(&pixels[src..src + BYTES_PER_PIXEL]);
                state.pixels[dy as usize * stride + dx as usize] = u32::from_le_bytes(px);
            }
        }
        state.dirty = true;
        Ok(())
    }

    pub fn pixel(&self, x: i32, y: i32) -> Option<u32> {
        let state = self.state.lock();
        state
            .contains(x, y)
            .then(|| state.pixels[y as usize * usize::from(state.width) + x as usize])
    }

    /// The frame buffer, if anything was flushed since the last call.
    pub fn take_frame(&self) -> Option<Frame> {
        let mut state = self.state.lock();
        if !state.dirty {
            return None;
        }
        state.dirty = false;
        Some(Frame {
            width: state.width,
            height: state.height,
            pixels: state.pixels.clone(),
        })
    }

    pub fn pointer(&self) -> PointerState {
        self.state.lock().pointer
    }

    /// Button down. Ignored outside the screen.
    pub fn press(&self, x: i32, y: i32) {
        let mut state = self.state.lock();
        if state.contains(x, y) {
            state.pointer = PointerState { pressed: true, x, y };
        }
    }

    /// Pointer motion. Tracked only while pressed.
    pub fn move_to(&self, x: i32, y: i32) {
        let mut state = self.state.lock();
        if state.pointer.pressed {
            state.pointer.x = x;
            state.pointer.y = y;
        }
    }

    pub fn release(&self, x: i32, y: i32) {
        self.state.lock().pointer = PointerState { pressed: false, x, y };
    }
}

impl Default for Display {
    fn default() -> Self {
        Self::from_config(&DisplayConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba(values: &[u32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_flush_copies_rectangle() {
        let display = Display::new(4, 4);
        assert!(display.take_frame().is_none());
        display.flush(1, 1, 2, 2, &rgba(&[1, 2, 3, 4])).unwrap();

        assert_eq!(display.pixel(1, 1), Some(1));
        assert_eq!(display.pixel(2, 1), Some(2));
        assert_eq!(display.pixel(1, 2), Some(3));
        assert_eq!(display.pixel(2, 2), Some(4));
        assert_eq!(display.pixel(0, 0), Some(0));

        let frame = display.take_frame().unwrap();
        assert_eq!((frame.width, frame.height), (4, 4));
        assert_eq!(frame.pixels[5], 1);
        assert!(display.take_frame().is_none());
    }

    #[test]
    fn test_flush_clips_to_screen() {
        let display = Display::new(2, 2);
        display.flush(-1, 1, 3, 2, &rgba(&[9, 8, 7, 6, 5, 4])).unwrap();
        assert_eq!(display.pixel(0, 1), Some(8));
        assert_eq!(display.pixel(1, 1), Some(7));
        assert_eq!(display.pixel(0, 0), Some(0));
        assert_eq!(display.pixel(2, 1), None);
        assert!(display.flush(0, 0, 2, 2, &[0; 15]).is_err());
    }

    #[test]
    fn test_screen_size_rules() {
        let display = Display::default();
        assert_eq!(display.size(), (320, 240));
        assert!(display.set_screen_size(0, 10).is_err());
        display.set_screen_size(128, 64).unwrap();
        assert_eq!(display.size(), (128, 64));

        display.start_presentation();
        assert!(display.set_screen_size(64, 64).is_err());
        assert_eq!(display.size(), (128, 64));
    }

    #[test]
    fn test_pointer_tracking() {
        let display = Display::new(10, 10);
        let presenter = display.clone();

        presenter.move_to(3, 3);
        assert_eq!(display.pointer(), PointerState::default());

        presenter.press(20, 2);
        assert!(!display.pointer().pressed, "press outside the screen");

        presenter.press(2, 2);
        presenter.move_to(12, 4);
        assert_eq!(display.pointer(), PointerState { pressed: true, x: 12, y: 4 });

        presenter.release(5, 5);
        assert_eq!(display.pointer(), PointerState { pressed: false, x: 5, y: 5 });
    }
}
