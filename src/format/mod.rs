//! Conversion between native frame layouts and the packed RGBA working buffer
//!
//! Everything here is pure: decode/encode only look at their inputs. The
//! `*_with` variants draw their output storage from a [`BufferPool`].

mod pool;
mod rotate;
pub mod yuv;

pub use pool::BufferPool;
pub use rotate::{rotate_grid, rotate_image, rotate_image_into, Transform};

use image::RgbaImage;

use crate::error::{FormatError, Result};
use crate::frame::{Frame, PixelFormat, Plane, Rotation, Timestamp};
use yuv::{average_chroma, rgb_to_ycbcr, ycbcr_to_rgb};

/// Packed RGBA working buffer plus the frame metadata it travels with
#[derive(Clone, Debug, PartialEq)]
pub struct CanonicalBuffer {
    image: RgbaImage,
    rotation: Rotation,
    timestamp: Timestamp,
}

impl CanonicalBuffer {
    pub fn new(image: RgbaImage, rotation: Rotation, timestamp: Timestamp) -> Self {
        Self {
            image,
            rotation,
            timestamp,
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// The buffer as the viewer sees it, with the rotation baked in
    pub fn upright(&self) -> RgbaImage {
        rotate_image(&self.image, self.rotation)
    }

    /// [`upright`](Self::upright) into a buffer drawn from `pool`
    pub fn upright_with(&self, pool: &BufferPool) -> Result<RgbaImage> {
        let (width, height) = self.image.dimensions();
        let (width, height) = if self.rotation.is_landscape() {
            (width, height)
        } else {
            (height, width)
        };
        let mut out = pool.acquire_image(width, height)?;
        if let Err(e) = rotate_image_into(&self.image, self.rotation, &mut out) {
            pool.release_image(out);
            return Err(FormatError::MalformedBuffer(e.to_string()).into());
        }
        Ok(out)
    }
}

/// Check a frame's tag, plane count and strides against its dimensions
pub fn validate(frame: &Frame) -> Result<PixelFormat, FormatError> {
    let format =
        PixelFormat::from_fourcc(frame.format).ok_or(FormatError::UnsupportedFormat(frame.format))?;

    if frame.width == 0 || frame.height == 0 {
        return Err(FormatError::MalformedBuffer(format!(
            "zero-sized frame {}x{}",
            frame.width, frame.height
        )));
    }

    if frame.planes.len() != format.plane_count() {
        return Err(FormatError::MalformedBuffer(format!(
            "{:?} needs {} planes, got {}",
            format,
            format.plane_count(),
            frame.planes.len()
        )));
    }

    for (index, plane) in frame.planes.iter().enumerate() {
        let min_stride = format.min_stride(index, frame.width);
        if plane.stride < min_stride {
            return Err(FormatError::MalformedBuffer(format!(
                "plane {} stride {} is below the minimum {} for width {}",
                index, plane.stride, min_stride, frame.width
            )));
        }

        let (_, rows) = format.plane_size(index, frame.width, frame.height);
        let needed = plane
            .stride
            .checked_mul(rows as usize - 1)
            .and_then(|n| n.checked_add(min_stride))
            .ok_or_else(|| {
                FormatError::MalformedBuffer(format!(
                    "plane {} with stride {} and {} rows overflows the address space",
                    index, plane.stride, rows
                ))
            })?;
        if plane.data.len() < needed {
            return Err(FormatError::MalformedBuffer(format!(
                "plane {} holds {} bytes, needs {}",
                index,
                plane.data.len(),
                needed
            )));
        }
    }

    Ok(format)
}

/// Decode a native frame into a freshly allocated canonical buffer
pub fn decode(frame: &Frame) -> Result<CanonicalBuffer, FormatError> {
    let format = validate(frame)?;
    let mut out = vec![0u8; canonical_len(frame.width, frame.height)?];
    decode_into(frame, format, &mut out)?;
    into_canonical(frame, out)
}

/// Decode a native frame into a pooled canonical buffer
pub fn decode_with(frame: &Frame, pool: &BufferPool) -> Result<CanonicalBuffer> {
    let _span = tracing::debug_span!("decode").entered();

    let format = validate(frame)?;
    let mut out = pool.acquire(canonical_len(frame.width, frame.height)?)?;
    if let Err(e) = decode_into(frame, format, &mut out) {
        pool.release(out);
        return Err(e.into());
    }
    Ok(into_canonical(frame, out)?)
}

/// Byte length of a packed RGBA buffer of the given size
pub fn canonical_len(width: u32, height: u32) -> Result<usize, FormatError> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| FormatError::MalformedBuffer(format!("{}x{} RGBA buffer overflows usize", width, height)))
}

fn into_canonical(frame: &Frame, out: Vec<u8>) -> Result<CanonicalBuffer, FormatError> {
    let image = RgbaImage::from_raw(frame.width, frame.height, out).ok_or_else(|| {
        FormatError::MalformedBuffer(format!("buffer does not hold {}x{} RGBA", frame.width, frame.height))
    })?;
    Ok(CanonicalBuffer::new(image, frame.rotation, frame.timestamp))
}

fn row<'a>(plane: &'a Plane, y: usize, len: usize) -> Result<&'a [u8], FormatError> {
    plane
        .row(y, len)
        .ok_or_else(|| FormatError::MalformedBuffer(format!("row {} is out of bounds", y)))
}

fn decode_into(frame: &Frame, format: PixelFormat, out: &mut [u8]) -> Result<(), FormatError> {
    let width = frame.width as usize;
    let chroma_width = width.div_ceil(2);
    let planes = &frame.planes;

    for (y, out_row) in out.chunks_exact_mut(width * 4).enumerate() {
        match format {
            PixelFormat::I420 => {
                let luma = row(&planes[0], y, width)?;
                let u = row(&planes[1], y / 2, chroma_width)?;
                let v = row(&planes[2], y / 2, chroma_width)?;
                for (x, px) in out_row.chunks_exact_mut(4).enumerate() {
                    write_ycbcr(px, luma[x], u[x / 2], v[x / 2]);
                }
            }
            PixelFormat::Nv12 | PixelFormat::Nv21 => {
                let luma = row(&planes[0], y, width)?;
                let uv = row(&planes[1], y / 2, chroma_width * 2)?;
                let (u_off, v_off) = if format == PixelFormat::Nv12 { (0, 1) } else { (1, 0) };
                for (x, px) in out_row.chunks_exact_mut(4).enumerate() {
                    let pair = (x / 2) * 2;
                    write_ycbcr(px, luma[x], uv[pair + u_off], uv[pair + v_off]);
                }
            }
            PixelFormat::Yuyv => {
                let packed = row(&planes[0], y, chroma_width * 4)?;
                for (x, px) in out_row.chunks_exact_mut(4).enumerate() {
                    let group = (x / 2) * 4;
                    let luma = packed[group + (x % 2) * 2];
                    write_ycbcr(px, luma, packed[group + 1], packed[group + 3]);
                }
            }
            PixelFormat::Rgba => {
                out_row.copy_from_slice(row(&planes[0], y, width * 4)?);
            }
            PixelFormat::Bgra => {
                let src = row(&planes[0], y, width * 4)?;
                for (px, s) in out_row.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
                    px.copy_from_slice(&[s[2], s[1], s[0], s[3]]);
                }
            }
            PixelFormat::Rgb24 => {
                let src = row(&planes[0], y, width * 3)?;
                for (px, s) in out_row.chunks_exact_mut(4).zip(src.chunks_exact(3)) {
                    px.copy_from_slice(&[s[0], s[1], s[2], 255]);
                }
            }
        }
    }

    Ok(())
}

fn write_ycbcr(px: &mut [u8], y: u8, cb: u8, cr: u8) {
    let [r, g, b] = ycbcr_to_rgb(y, cb, cr);
    px.copy_from_slice(&[r, g, b, 255]);
}

/// Encode a canonical buffer into a native frame with tightly packed strides
pub fn encode(buffer: &CanonicalBuffer, target: PixelFormat) -> Frame {
    let planes = plane_lengths(target, buffer.image.width(), buffer.image.height())
        .into_iter()
        .map(|(len, stride)| Plane::new(vec![0u8; len], stride))
        .collect();
    encode_into(buffer, target, planes)
}

/// Encode using pooled plane storage
pub fn encode_with(buffer: &CanonicalBuffer, target: PixelFormat, pool: &BufferPool) -> Result<Frame> {
    let _span = tracing::debug_span!("encode").entered();

    let mut planes = Vec::with_capacity(target.plane_count());
    for (len, stride) in plane_lengths(target, buffer.image.width(), buffer.image.height()) {
        match pool.acquire(len) {
            Ok(data) => planes.push(Plane::new(data, stride)),
            Err(e) => {
                planes.into_iter().for_each(|p: Plane| pool.release(p.data));
                return Err(e);
            }
        }
    }
    Ok(encode_into(buffer, target, planes))
}

fn plane_lengths(format: PixelFormat, width: u32, height: u32) -> Vec<(usize, usize)> {
    (0..format.plane_count())
        .map(|index| {
            let stride = format.min_stride(index, width);
            let (_, rows) = format.plane_size(index, width, height);
            (stride * rows as usize, stride)
        })
        .collect()
}

fn encode_into(buffer: &CanonicalBuffer, target: PixelFormat, mut planes: Vec<Plane>) -> Frame {
    let image = &buffer.image;
    let (width, height) = image.dimensions();
    let pixel = |x: u32, y: u32| image.get_pixel(x.min(width - 1), y.min(height - 1)).0;

    match target {
        PixelFormat::I420 | PixelFormat::Nv12 | PixelFormat::Nv21 => {
            let luma_stride = planes[0].stride;
            for (y, out_row) in planes[0].data.chunks_exact_mut(luma_stride).enumerate() {
                for (x, out) in out_row.iter_mut().enumerate() {
                    let [r, g, b, _] = pixel(x as u32, y as u32);
                    *out = rgb_to_ycbcr(r, g, b).0;
                }
            }

            let (chroma_w, chroma_h) = target.plane_size(1, width, height);
            for cy in 0..chroma_h {
                for cx in 0..chroma_w {
                    let (x, y) = (cx * 2, cy * 2);
                    let (cb, cr) = average_chroma(&[
                        pixel(x, y),
                        pixel(x + 1, y),
                        pixel(x, y + 1),
                        pixel(x + 1, y + 1),
                    ]);
                    let (cx, cy) = (cx as usize, cy as usize);
                    match target {
                        PixelFormat::I420 => {
                            let (u_stride, v_stride) = (planes[1].stride, planes[2].stride);
                            planes[1].data[cy * u_stride + cx] = cb;
                            planes[2].data[cy * v_stride + cx] = cr;
                        }
                        _ => {
                            let stride = planes[1].stride;
                            let (first, second) = if target == PixelFormat::Nv12 { (cb, cr) } else { (cr, cb) };
                            planes[1].data[cy * stride + cx * 2] = first;
                            planes[1].data[cy * stride + cx * 2 + 1] = second;
                        }
                    }
                }
            }
        }
        PixelFormat::Yuyv => {
            let stride = planes[0].stride;
            for (y, out_row) in planes[0].data.chunks_exact_mut(stride).enumerate() {
                for (pair, out) in out_row.chunks_exact_mut(4).enumerate() {
                    let x = (pair * 2) as u32;
                    let p0 = pixel(x, y as u32);
                    let p1 = pixel(x + 1, y as u32);
                    let y0 = rgb_to_ycbcr(p0[0], p0[1], p0[2]).0;
                    let y1 = rgb_to_ycbcr(p1[0], p1[1], p1[2]).0;
                    let (cb, cr) = average_chroma(&[p0, p1]);
                    out.copy_from_slice(&[y0, cb, y1, cr]);
                }
            }
        }
        PixelFormat::Rgba => {
            planes[0].data.copy_from_slice(image.as_raw());
        }
        PixelFormat::Bgra => {
            for (out, p) in planes[0].data.chunks_exact_mut(4).zip(image.pixels()) {
                out.copy_from_slice(&[p[2], p[1], p[0], p[3]]);
            }
        }
        PixelFormat::Rgb24 => {
            for (out, p) in planes[0].data.chunks_exact_mut(3).zip(image.pixels()) {
                out.copy_from_slice(&[p[0], p[1], p[2]]);
            }
        }
    }

    Frame::new(
        planes,
        width,
        height,
        target.fourcc(),
        buffer.rotation,
        buffer.timestamp,
    )
}
