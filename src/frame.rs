use std::fmt;
use std::time::Duration;

/// Monotonic capture timestamp in nanoseconds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self(duration.as_nanos().min(u64::MAX as u128) as u64)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Time elapsed since `earlier`, zero if `earlier` is not actually earlier
    pub fn saturating_since(self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// Clockwise rotation the consumer applies to display the frame upright
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// The rotation that undoes this one
    pub fn inverse(self) -> Self {
        match self {
            Self::Deg0 => Self::Deg0,
            Self::Deg90 => Self::Deg270,
            Self::Deg180 => Self::Deg180,
            Self::Deg270 => Self::Deg90,
        }
    }

    /// 0°/180° frames keep the sensor's landscape shape
    pub fn is_landscape(self) -> bool {
        matches!(self, Self::Deg0 | Self::Deg180)
    }
}

/// Four-character pixel format tag as delivered by the capture source
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({})", self)
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            let c = if byte.is_ascii_graphic() || byte == b' ' {
                byte as char
            } else {
                '?'
            };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

/// Pixel layouts understood by the format bridge
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Planar Y, U, V with 4:2:0 chroma
    I420,
    /// Y plane plus interleaved UV plane, 4:2:0
    Nv12,
    /// Y plane plus interleaved VU plane, 4:2:0
    Nv21,
    /// Packed Y0 U Y1 V, 4:2:2
    Yuyv,
    Rgba,
    Bgra,
    Rgb24,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 7] = [
        Self::I420,
        Self::Nv12,
        Self::Nv21,
        Self::Yuyv,
        Self::Rgba,
        Self::Bgra,
        Self::Rgb24,
    ];

    pub fn fourcc(self) -> FourCc {
        match self {
            Self::I420 => FourCc::new(b"I420"),
            Self::Nv12 => FourCc::new(b"NV12"),
            Self::Nv21 => FourCc::new(b"NV21"),
            Self::Yuyv => FourCc::new(b"YUYV"),
            Self::Rgba => FourCc::new(b"RGBA"),
            Self::Bgra => FourCc::new(b"BGRA"),
            Self::Rgb24 => FourCc::new(b"RGB3"),
        }
    }

    pub fn from_fourcc(tag: FourCc) -> Option<Self> {
        Self::ALL.into_iter().find(|format| format.fourcc() == tag)
    }

    pub fn plane_count(self) -> usize {
        match self {
            Self::I420 => 3,
            Self::Nv12 | Self::Nv21 => 2,
            Self::Yuyv | Self::Rgba | Self::Bgra | Self::Rgb24 => 1,
        }
    }

    /// Dimensions of plane `index` for a `width`x`height` image
    pub fn plane_size(self, index: usize, width: u32, height: u32) -> (u32, u32) {
        let chroma = (width.div_ceil(2), height.div_ceil(2));
        match (self, index) {
            (Self::I420, 1 | 2) | (Self::Nv12 | Self::Nv21, 1) => chroma,
            _ => (width, height),
        }
    }

    /// Minimum row length in bytes for plane `index`
    pub fn min_stride(self, index: usize, width: u32) -> usize {
        let width = width as usize;
        let chroma_width = width.div_ceil(2);
        match (self, index) {
            (Self::I420, 0) | (Self::Nv12 | Self::Nv21, 0) => width,
            (Self::I420, _) => chroma_width,
            (Self::Nv12 | Self::Nv21, _) => chroma_width * 2,
            (Self::Yuyv, _) => chroma_width * 4,
            (Self::Rgba | Self::Bgra, _) => width * 4,
            (Self::Rgb24, _) => width * 3,
        }
    }
}

/// One plane of pixel data; `stride` may exceed the tightly packed row length
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plane {
    pub data: Vec<u8>,
    pub stride: usize,
}

impl Plane {
    pub fn new(data: Vec<u8>, stride: usize) -> Self {
        Self { data, stride }
    }

    /// Row `y`, `len` bytes long, if the buffer holds it
    pub fn row(&self, y: usize, len: usize) -> Option<&[u8]> {
        let start = y.checked_mul(self.stride)?;
        self.data.get(start..start.checked_add(len)?)
    }
}

/// A captured video frame with its metadata
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub planes: Vec<Plane>,
    pub width: u32,
    pub height: u32,
    pub format: FourCc,
    pub rotation: Rotation,
    pub timestamp: Timestamp,
}

impl Frame {
    pub fn new(
        planes: Vec<Plane>,
        width: u32,
        height: u32,
        format: FourCc,
        rotation: Rotation,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            planes,
            width,
            height,
            format,
            rotation,
            timestamp,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Hand the plane buffers back for reuse
    pub fn into_buffers(self) -> impl Iterator<Item = Vec<u8>> {
        self.planes.into_iter().map(|plane| plane.data)
    }
}
