//! Color reorder engine for line-interleaved multi-row sensors
//!
//! A tri-linear CCD has one sensor row per color, `distance` lines apart,
//! and delivers each raw line as three single-color rows in the order red,
//! green, blue. The red row leads: document line `j` is seen by red at raw
//! line `j`, by green at `j + distance` and by blue at `j + 2 * distance`.
//!
//! The engine keeps a shared ring of `2 * distance + 1` pixel-interleaved
//! output lines. Each color writes its kept rows into the ring at its own
//! cursor; a line is emitted once every color has written it.

use bytes::{BufMut, Bytes, BytesMut};

/// Host-side Y scaling: keep `target / optical` of the delivered lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YScaling {
    pub target: u16,
    pub optical: u16,
}

/// Geometry of one reorder run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReorderConfig {
    /// Row distance in delivered raw lines
    pub distance: usize,
    pub pixels_per_line: usize,
    pub bytes_per_sample: usize,
    /// Lines to emit before the engine reports completion
    pub output_lines: usize,
    pub y_scaling: Option<YScaling>,
}

impl ReorderConfig {
    /// Bytes of one single-color input row
    pub fn row_bytes(&self) -> usize {
        self.pixels_per_line * self.bytes_per_sample
    }

    /// Bytes of one emitted pixel-interleaved line
    pub fn line_bytes(&self) -> usize {
        self.row_bytes() * 3
    }

    /// Ring capacity in lines
    pub fn capacity(&self) -> usize {
        2 * self.distance + 1
    }

    /// Raw lines (R, G, B row triples) the device must deliver
    pub fn raw_lines(&self) -> usize {
        let aligned = match self.y_scaling {
            Some(s) if s.target > 0 && s.target < s.optical => {
                let (n, o, t) = (
                    self.output_lines,
                    usize::from(s.optical),
                    usize::from(s.target),
                );
                (n * o).div_ceil(t)
            }
            _ => self.output_lines,
        };
        aligned + 2 * self.distance
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Plane {
    /// Raw lines this color lags the red row by
    lag: usize,
    /// Aligned rows observed (after the lag)
    seen: u64,
    /// Rows written into the ring; also this color's ready count
    ready: usize,
}

/// Reorders line-interleaved color rows into pixel-interleaved lines
#[derive(Debug)]
pub struct ColorReorder {
    config: ColorReorderGeometry,
    ring: Vec<u8>,
    planes: [Plane; 3],
    emitted: usize,
    /// Single-color rows consumed so far
    row_counter: usize,
    partial: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
struct ColorReorderGeometry {
    row_bytes: usize,
    line_bytes: usize,
    bytes_per_sample: usize,
    capacity: usize,
    output_lines: usize,
    scaling: Option<(u64, u64)>,
}

impl ColorReorder {
    pub fn new(config: &ReorderConfig) -> Self {
        let geometry = ColorReorderGeometry {
            row_bytes: config.row_bytes(),
            line_bytes: config.line_bytes(),
            bytes_per_sample: config.bytes_per_sample.max(1),
            capacity: config.capacity(),
            output_lines: config.output_lines,
            scaling: config
                .y_scaling
                .filter(|s| s.target > 0 && s.target < s.optical)
                .map(|s| (u64::from(s.target), u64::from(s.optical))),
        };
        let planes = [0, 1, 2].map(|color| Plane {
            lag: color * config.distance,
            ..Plane::default()
        });
        Self {
            ring: vec![0u8; geometry.capacity * geometry.line_bytes],
            config: geometry,
            planes,
            emitted: 0,
            row_counter: 0,
            partial: Vec::with_capacity(geometry.row_bytes),
        }
    }

    /// Lines emitted so far
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Every declared output line has been emitted
    pub fn is_complete(&self) -> bool {
        self.emitted >= self.config.output_lines
    }

    /// Consume raw bytes at any chunk boundary and return the lines that
    /// became complete. Bytes after the last output line are discarded.
    pub fn push(&mut self, mut data: &[u8]) -> Bytes {
        let mut out = BytesMut::new();
        let row_bytes = self.config.row_bytes;
        if row_bytes == 0 {
            return out.freeze();
        }

        while !data.is_empty() && !self.is_complete() {
            if self.partial.is_empty() && data.len() >= row_bytes {
                let (row, rest) = data.split_at(row_bytes);
                self.accept_row(row, &mut out);
                data = rest;
                continue;
            }
            let take = (row_bytes - self.partial.len()).min(data.len());
            self.partial.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.partial.len() == row_bytes {
                let row = std::mem::take(&mut self.partial);
                self.accept_row(&row, &mut out);
                self.partial = row;
                self.partial.clear();
            }
        }
        out.freeze()
    }

    fn accept_row(&mut self, row: &[u8], out: &mut BytesMut) {
        let color = self.row_counter % 3;
        let raw_index = self.row_counter / 3;
        self.row_counter += 1;

        let geometry = self.config;
        let plane = &mut self.planes[color];

        // Rows seen before this color's first aligned partner never emit
        if raw_index < plane.lag {
            return;
        }
        plane.seen += 1;

        if let Some((target, optical)) = geometry.scaling {
            if plane.seen * target / optical <= plane.ready as u64 {
                return;
            }
        }

        let line = plane.ready;
        plane.ready += 1;
        if line >= geometry.output_lines {
            return;
        }

        let slot = (line % geometry.capacity) * geometry.line_bytes;
        let bps = geometry.bytes_per_sample;
        let dest = &mut self.ring[slot..slot + geometry.line_bytes];
        for (pixel, sample) in row.chunks_exact(bps).enumerate() {
            let at = (pixel * 3 + color) * bps;
            dest[at..at + bps].copy_from_slice(sample);
        }

        debug_assert!(
            self.planes.iter().map(|p| p.ready).max().unwrap_or(0) - self.emitted
                <= geometry.capacity,
            "reorder ring overflow"
        );

        self.drain(out);
    }

    fn drain(&mut self, out: &mut BytesMut) {
        let geometry = self.config;
        loop {
            let ready = self.planes.iter().map(|p| p.ready).min().unwrap_or(0);
            if ready <= self.emitted || self.emitted >= geometry.output_lines {
                break;
            }
            let slot = (self.emitted % geometry.capacity) * geometry.line_bytes;
            out.put_slice(&self.ring[slot..slot + geometry.line_bytes]);
            self.emitted += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn config(distance: usize, pixels: usize, lines: usize) -> ReorderConfig {
        ReorderConfig {
            distance,
            pixels_per_line: pixels,
            bytes_per_sample: 1,
            output_lines: lines,
            y_scaling: None,
        }
    }

    /// Raw stream where every row of raw line `k` carries `k`
    fn tagged_raw(cfg: &ReorderConfig) -> Vec<u8> {
        let mut raw = Vec::new();
        for k in 0..cfg.raw_lines() {
            for _ in 0..3 {
                raw.extend(std::iter::repeat((k % 256) as u8).take(cfg.row_bytes()));
            }
        }
        raw
    }

    #[rstest]
    #[case(1, 4, 10)]
    #[case(3, 5, 40)]
    #[case(8, 300, 300)]
    fn test_rgb_rows_are_two_distances_apart(
        #[case] distance: usize,
        #[case] pixels: usize,
        #[case] lines: usize,
    ) {
        let cfg = config(distance, pixels, lines);
        let mut engine = ColorReorder::new(&cfg);
        let out = engine.push(&tagged_raw(&cfg));

        assert_eq!(out.len(), lines * cfg.line_bytes());
        assert!(engine.is_complete());
        for (j, line) in out.chunks(cfg.line_bytes()).enumerate() {
            let expected = [j, j + distance, j + 2 * distance].map(|v| (v % 256) as u8);
            for pixel in line.chunks(3) {
                assert_eq!(pixel, &expected[..]);
            }
        }
    }

    #[test]
    fn test_scenario_raw_line_count() {
        let cfg = ReorderConfig {
            distance: 8,
            pixels_per_line: 300,
            bytes_per_sample: 1,
            output_lines: 300,
            y_scaling: None,
        };
        assert_eq!(cfg.raw_lines(), 316);
        assert_eq!(cfg.line_bytes(), 900);
        assert_eq!(cfg.capacity(), 17);
    }

    #[test]
    fn test_arbitrary_chunk_boundaries() {
        let cfg = config(2, 7, 12);
        let raw = tagged_raw(&cfg);

        let whole = ColorReorder::new(&cfg).push(&raw);

        let mut engine = ColorReorder::new(&cfg);
        let mut pieces = Vec::new();
        for chunk in raw.chunks(5) {
            pieces.extend_from_slice(&engine.push(chunk));
        }
        assert_eq!(pieces, whole.to_vec());
    }

    #[test]
    fn test_tail_is_discarded() {
        let cfg = config(1, 2, 3);
        let mut raw = tagged_raw(&cfg);
        raw.extend(vec![0xEE; 60]);
        let mut engine = ColorReorder::new(&cfg);
        let out = engine.push(&raw);
        assert_eq!(out.len(), 3 * cfg.line_bytes());
        assert!(engine.push(&[1, 2, 3]).is_empty());
    }

    #[test]
    fn test_sixteen_bit_samples_interleave_by_pixel() {
        let cfg = ReorderConfig {
            bytes_per_sample: 2,
            ..config(0, 2, 1)
        };
        let mut engine = ColorReorder::new(&cfg);
        let raw = [
            0xA0, 0xA1, 0xA2, 0xA3, // red
            0xB0, 0xB1, 0xB2, 0xB3, // green
            0xC0, 0xC1, 0xC2, 0xC3, // blue
        ];
        let out = engine.push(&raw);
        assert_eq!(
            out.to_vec(),
            vec![0xA0, 0xA1, 0xB0, 0xB1, 0xC0, 0xC1, 0xA2, 0xA3, 0xB2, 0xB3, 0xC2, 0xC3]
        );
    }

    #[test]
    fn test_host_y_scaling_halves_lines() {
        let cfg = ReorderConfig {
            y_scaling: Some(YScaling {
                target: 300,
                optical: 600,
            }),
            ..config(2, 3, 10)
        };
        // ceil(10 * 600 / 300) + 2 * 2
        assert_eq!(cfg.raw_lines(), 24);

        let mut engine = ColorReorder::new(&cfg);
        let out = engine.push(&tagged_raw(&cfg));
        assert_eq!(out.len(), 10 * cfg.line_bytes());
        for (j, line) in out.chunks(cfg.line_bytes()).enumerate() {
            // Every second aligned row is kept, starting with the second
            let red = 2 * j + 1;
            assert_eq!(&line[..3], &[red as u8, (red + 2) as u8, (red + 4) as u8]);
        }
    }
}
