//! PBM/PGM/PPM encoding of scanned frames

use anyhow::{bail, Result};
use scanlink_core::{FrameFormat, Shape};

/// One frame as read from a session
#[derive(Debug, Clone)]
pub struct ScannedFrame {
    pub shape: Shape,
    pub data: Vec<u8>,
}

fn header(magic: &str, shape: &Shape) -> Vec<u8> {
    let mut header = format!("{}\n{} {}\n", magic, shape.pixels_per_line, shape.lines);
    if shape.depth > 1 {
        let max: u32 = if shape.depth > 8 { 65535 } else { 255 };
        header.push_str(&format!("{}\n", max));
    }
    header.into_bytes()
}

/// Encode a complete image
///
/// Accepts one gray, bi-level or RGB frame, or the red, green and blue
/// frames of a three-pass scan in that order.
pub fn encode(frames: &[ScannedFrame]) -> Result<Vec<u8>> {
    match frames {
        [frame] => {
            let magic = match (frame.shape.format, frame.shape.depth) {
                (FrameFormat::Gray, 1) => "P4",
                (FrameFormat::Gray, _) => "P5",
                (FrameFormat::Rgb, _) => "P6",
                (format, _) => bail!("a lone {:?} frame cannot be written", format),
            };
            if frame.data.len() != frame.shape.total_bytes() {
                bail!(
                    "frame has {} bytes, expected {}",
                    frame.data.len(),
                    frame.shape.total_bytes()
                );
            }
            let mut out = header(magic, &frame.shape);
            out.extend_from_slice(&frame.data);
            Ok(out)
        }
        [red, green, blue] => {
            let planes = [red, green, blue];
            let expected = [FrameFormat::Red, FrameFormat::Green, FrameFormat::Blue];
            for (plane, format) in planes.iter().zip(expected) {
                if plane.shape.format != format {
                    bail!("expected a {:?} frame, got {:?}", format, plane.shape.format);
                }
                if plane.shape.pixels_per_line != red.shape.pixels_per_line
                    || plane.shape.lines != red.shape.lines
                    || plane.shape.depth != red.shape.depth
                    || plane.data.len() != red.shape.total_bytes()
                {
                    bail!("three-pass frames differ in size");
                }
            }

            let bps = usize::from(red.shape.depth.max(8) / 8);
            let mut out = header("P6", &red.shape);
            out.reserve(red.data.len() * 3);
            for at in (0..red.data.len()).step_by(bps) {
                for plane in planes {
                    out.extend_from_slice(&plane.data[at..at + bps]);
                }
            }
            Ok(out)
        }
        _ => bail!("cannot encode {} frames", frames.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn frame(
        format: FrameFormat,
        pixels: usize,
        lines: usize,
        depth: u8,
        data: Vec<u8>,
    ) -> ScannedFrame {
        let channels = format.channels();
        let bytes_per_line = if depth == 1 {
            pixels / 8
        } else {
            pixels * channels * usize::from(depth / 8)
        };
        ScannedFrame {
            shape: Shape {
                format,
                last_frame: true,
                pixels_per_line: pixels,
                bytes_per_line,
                lines,
                depth,
            },
            data,
        }
    }

    #[test]
    fn test_gray_frame() {
        let out = encode(&[frame(FrameFormat::Gray, 2, 1, 8, vec![7, 9])]).unwrap();
        assert_eq!(out, b"P5\n2 1\n255\n\x07\x09".to_vec());
    }

    #[test]
    fn test_bilevel_frame_has_no_maxval() {
        let out = encode(&[frame(FrameFormat::Gray, 8, 1, 1, vec![0xAA])]).unwrap();
        assert_eq!(out, b"P4\n8 1\n\xAA".to_vec());
    }

    #[test]
    fn test_three_pass_interleave() {
        let frames = [
            frame(FrameFormat::Red, 2, 1, 8, vec![1, 2]),
            frame(FrameFormat::Green, 2, 1, 8, vec![3, 4]),
            frame(FrameFormat::Blue, 2, 1, 8, vec![5, 6]),
        ];
        let out = encode(&frames).unwrap();
        assert_eq!(out, b"P6\n2 1\n255\n\x01\x03\x05\x02\x04\x06".to_vec());
    }

    #[test]
    fn test_short_frame_rejected() {
        assert!(encode(&[frame(FrameFormat::Rgb, 2, 2, 8, vec![0; 5])]).is_err());
        assert!(encode(&[]).is_err());
    }
}
