//! Display modes and pixel formats
//!
//! Frame rates are expressed the way output hardware expresses them: a frame
//! duration in units of a time scale. 1080p25 is `1000 / 25000`, 1080p29.97 is
//! `1001 / 30000`.

use genlock_common::time::{TimeScale, TimeValue};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Pixel format of a video frame
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit 4:2:2 YUV ('2vuy')
    Yuv8Bit,
    /// 10-bit 4:2:2 YUV ('v210')
    Yuv10Bit,
    /// 8-bit ARGB
    Argb8Bit,
    /// 8-bit BGRA
    Bgra8Bit,
}

impl PixelFormat {
    /// Bytes per row for a frame `width` pixels wide
    pub fn row_bytes(&self, width: u32) -> u32 {
        match self {
            PixelFormat::Yuv8Bit => width * 2,
            // v210 packs 6 pixels into 16 bytes, rows padded to 128 bytes
            PixelFormat::Yuv10Bit => width.div_ceil(48) * 128,
            PixelFormat::Argb8Bit | PixelFormat::Bgra8Bit => width * 4,
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelFormat::Yuv8Bit => write!(f, "2vuy"),
            PixelFormat::Yuv10Bit => write!(f, "v210"),
            PixelFormat::Argb8Bit => write!(f, "ARGB"),
            PixelFormat::Bgra8Bit => write!(f, "BGRA"),
        }
    }
}

/// Field order of a display mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDominance {
    Progressive,
    UpperFieldFirst,
    LowerFieldFirst,
}

/// Display mode identifier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DisplayModeId {
    #[serde(rename = "ntsc")]
    Ntsc,
    #[serde(rename = "pal")]
    Pal,
    #[serde(rename = "720p50")]
    Hd720p50,
    #[serde(rename = "720p59.94")]
    Hd720p5994,
    #[serde(rename = "720p60")]
    Hd720p60,
    #[serde(rename = "1080p23.98")]
    Hd1080p2398,
    #[serde(rename = "1080p24")]
    Hd1080p24,
    #[serde(rename = "1080p25")]
    Hd1080p25,
    #[serde(rename = "1080p29.97")]
    Hd1080p2997,
    #[serde(rename = "1080p30")]
    Hd1080p30,
    #[serde(rename = "1080i50")]
    Hd1080i50,
    #[serde(rename = "1080i59.94")]
    Hd1080i5994,
    #[serde(rename = "1080p50")]
    Hd1080p50,
    #[serde(rename = "1080p59.94")]
    Hd1080p5994,
    #[serde(rename = "1080p60")]
    Hd1080p60,
}

/// Geometry and timing of a display mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMode {
    pub id: DisplayModeId,
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub frame_duration: TimeValue,
    pub time_scale: TimeScale,
    pub field_dominance: FieldDominance,
}

const fn mode(
    id: DisplayModeId,
    name: &'static str,
    width: u32,
    height: u32,
    frame_duration: TimeValue,
    time_scale: TimeScale,
    field_dominance: FieldDominance,
) -> DisplayMode {
    DisplayMode {
        id,
        name,
        width,
        height,
        frame_duration,
        time_scale,
        field_dominance,
    }
}

use DisplayModeId::*;
use FieldDominance::*;

/// Every display mode known to the engine
pub const DISPLAY_MODES: &[DisplayMode] = &[
    mode(Ntsc, "ntsc", 720, 486, 1001, 30000, LowerFieldFirst),
    mode(Pal, "pal", 720, 576, 1000, 25000, UpperFieldFirst),
    mode(Hd720p50, "720p50", 1280, 720, 1000, 50000, Progressive),
    mode(Hd720p5994, "720p59.94", 1280, 720, 1001, 60000, Progressive),
    mode(Hd720p60, "720p60", 1280, 720, 1000, 60000, Progressive),
    mode(Hd1080p2398, "1080p23.98", 1920, 1080, 1001, 24000, Progressive),
    mode(Hd1080p24, "1080p24", 1920, 1080, 1000, 24000, Progressive),
    mode(Hd1080p25, "1080p25", 1920, 1080, 1000, 25000, Progressive),
    mode(Hd1080p2997, "1080p29.97", 1920, 1080, 1001, 30000, Progressive),
    mode(Hd1080p30, "1080p30", 1920, 1080, 1000, 30000, Progressive),
    mode(Hd1080i50, "1080i50", 1920, 1080, 1000, 25000, UpperFieldFirst),
    mode(Hd1080i5994, "1080i59.94", 1920, 1080, 1001, 30000, UpperFieldFirst),
    mode(Hd1080p50, "1080p50", 1920, 1080, 1000, 50000, Progressive),
    mode(Hd1080p5994, "1080p59.94", 1920, 1080, 1001, 60000, Progressive),
    mode(Hd1080p60, "1080p60", 1920, 1080, 1000, 60000, Progressive),
];

impl DisplayModeId {
    pub fn mode(&self) -> DisplayMode {
        *DISPLAY_MODES
            .iter()
            .find(|m| m.id == *self)
            .unwrap_or(&DISPLAY_MODES[0])
    }
}

impl std::fmt::Display for DisplayModeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mode().name)
    }
}

impl FromStr for DisplayModeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DISPLAY_MODES
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(s))
            .map(|m| m.id)
            .ok_or_else(|| format!("unknown display mode '{}'", s))
    }
}

impl DisplayMode {
    /// Frames per second
    pub fn frame_rate(&self) -> f64 {
        self.time_scale as f64 / self.frame_duration as f64
    }

    pub fn is_progressive(&self) -> bool {
        self.field_dominance == FieldDominance::Progressive
    }
}

/// Smallest display mode at `frame_rate` that fits a `width` x `height` frame
///
/// Rates match within 0.01 fps. SD modes (720 wide or less) are taken as
/// interlaced and HD modes as progressive.
pub fn find_for_frame_rate(frame_rate: f64, width: u32, height: u32) -> Option<DisplayMode> {
    let mut candidates: Vec<DisplayMode> = DISPLAY_MODES
        .iter()
        .filter(|m| (m.frame_rate() - frame_rate).abs() < 0.01)
        .filter(|m| (m.width > 720) == m.is_progressive())
        .copied()
        .collect();

    candidates.sort_by_key(|m| (m.width, m.height));

    candidates
        .into_iter()
        .find(|m| m.width >= width && m.height >= height)
}
