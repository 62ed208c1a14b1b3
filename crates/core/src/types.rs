use std::fmt;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Screen coordinate in physical pixels. Serialized as `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(i32, i32)", into = "(i32, i32)")]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<(i32, i32)> for Point {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

impl From<Point> for (i32, i32) {
    fn from(p: Point) -> Self {
        (p.x, p.y)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Screen rectangle given by two corners. Serialized as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(i32, i32, i32, i32)", into = "(i32, i32, i32, i32)")]
pub struct Rect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Rect {
    /// Build a rectangle from any two opposite corners.
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn width(&self) -> u32 {
        (self.x2 - self.x1).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y2 - self.y1).max(0) as u32
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.area() == 0
    }
}

impl From<(i32, i32, i32, i32)> for Rect {
    fn from((x1, y1, x2, y2): (i32, i32, i32, i32)) -> Self {
        Self::new(x1, y1, x2, y2)
    }
}

impl From<Rect> for (i32, i32, i32, i32) {
    fn from(r: Rect) -> Self {
        (r.x1, r.y1, r.x2, r.y2)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})-({}, {})", self.x1, self.y1, self.x2, self.y2)
    }
}

/// RGB triple. Serialized as `[r, g, b]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

/// Raw screenshot pixel data (RGBA, row-major).
#[derive(Debug, Clone)]
pub struct Capture {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
}

impl Capture {
    pub fn from_rgba(img: RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            data: img.into_raw(),
            width,
            height,
            bytes_per_row: width * 4,
        }
    }

    /// A frame where every pixel is `color`.
    pub fn filled(width: u32, height: u32, color: Rgb) -> Self {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            data.extend_from_slice(&[color.0, color.1, color.2, 255]);
        }
        Self { data, width, height, bytes_per_row: width * 4 }
    }

    pub fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = (y * self.bytes_per_row + x * 4) as usize;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }

    pub fn set_rgb(&mut self, x: u32, y: u32, color: Rgb) {
        let idx = (y * self.bytes_per_row + x * 4) as usize;
        self.data[idx] = color.0;
        self.data[idx + 1] = color.1;
        self.data[idx + 2] = color.2;
    }

    /// Every pixel as RGB, row by row.
    pub fn pixels(&self) -> impl Iterator<Item = [u8; 3]> + '_ {
        (0..self.height).flat_map(move |y| (0..self.width).map(move |x| self.rgb(x, y)))
    }

    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut out = RgbaImage::new(self.width, self.height);
        for (x, y, px) in out.enumerate_pixels_mut() {
            let idx = (y * self.bytes_per_row + x * 4) as usize;
            px.0.copy_from_slice(&self.data[idx..idx + 4]);
        }
        out
    }
}

/// One node of the login / channel-cycling state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StageId {
    /// Confirm the channel switch landed.
    A,
    /// Login screen.
    C,
    /// Character-select screen.
    D,
    /// In-game event watch.
    E,
    /// Channel-switch execution.
    F,
}

impl StageId {
    pub const ALL: [StageId; 5] = [StageId::A, StageId::C, StageId::D, StageId::E, StageId::F];

    pub fn key(self) -> &'static str {
        match self {
            StageId::A => "A",
            StageId::C => "C",
            StageId::D => "D",
            StageId::E => "E",
            StageId::F => "F",
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            StageId::A => "channel switch check",
            StageId::C => "login screen",
            StageId::D => "character select",
            StageId::E => "event watch",
            StageId::F => "channel switch",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Named role a click point is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickRole {
    Login,
    Character,
    /// Zero-based index into the four ordered channel-switch points.
    Channel(usize),
}

impl fmt::Display for ClickRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClickRole::Login => f.write_str("login"),
            ClickRole::Character => f.write_str("character"),
            ClickRole::Channel(i) => write!(f, "channel point {}", i + 1),
        }
    }
}

/// Operator-facing description of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    NotStarted,
    Running,
    Paused,
    Stopped,
}

/// Command from the TUI to the controller thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StartStop,
    PauseResume,
    Probe,
    Quit,
}
