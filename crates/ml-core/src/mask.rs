/// Binary instance mask in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

/// Inclusive pixel bounds of the true pixels of a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBounds {
    pub x_min: u32,
    pub x_max: u32,
    pub y_min: u32,
    pub y_max: u32,
}

impl Mask {
    /// Wrap a row-major boolean buffer. Returns `None` when the length does not match.
    pub fn from_bits(width: u32, height: u32, bits: Vec<bool>) -> Option<Self> {
        if bits.len() != (width as usize) * (height as usize) {
            return None;
        }
        Some(Self {
            width,
            height,
            bits,
        })
    }

    /// Threshold a row-major probability map.
    pub fn from_scores(width: u32, height: u32, scores: &[f32], threshold: f32) -> Option<Self> {
        Self::from_bits(width, height, scores.iter().map(|&s| s > threshold).collect())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.bits[(y * self.width + x) as usize]
    }

    /// Number of true pixels.
    pub fn area(&self) -> u64 {
        self.bits.iter().filter(|&&b| b).count() as u64
    }

    /// Bounding box of the true pixels, `None` for an empty mask.
    pub fn bounds(&self) -> Option<PixelBounds> {
        let mut bounds: Option<PixelBounds> = None;
        let width = self.width as usize;
        if width == 0 {
            return None;
        }
        for (row, line) in self.bits.chunks_exact(width).enumerate() {
            let Some(first) = line.iter().position(|&b| b) else {
                continue;
            };
            let last = line.iter().rposition(|&b| b).unwrap_or(first);
            let y = row as u32;
            let (x0, x1) = (first as u32, last as u32);
            bounds = Some(match bounds {
                None => PixelBounds {
                    x_min: x0,
                    x_max: x1,
                    y_min: y,
                    y_max: y,
                },
                Some(b) => PixelBounds {
                    x_min: b.x_min.min(x0),
                    x_max: b.x_max.max(x1),
                    y_min: b.y_min,
                    y_max: y,
                },
            });
        }
        bounds
    }

    /// Nearest-neighbour rescale, used to map model-resolution masks back to frame pixels.
    pub fn resize_nearest(&self, width: u32, height: u32) -> Mask {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let mut bits = Vec::with_capacity((width as usize) * (height as usize));
        for y in 0..height {
            let sy = ((y as u64 * self.height as u64) / height.max(1) as u64) as u32;
            for x in 0..width {
                let sx = ((x as u64 * self.width as u64) / width.max(1) as u64) as u32;
                bits.push(self.get(sx, sy));
            }
        }
        Mask {
            width,
            height,
            bits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from_rows(rows: &[&str]) -> Mask {
        let width = rows[0].len() as u32;
        let bits = rows
            .iter()
            .flat_map(|row| row.chars().map(|c| c == '#'))
            .collect();
        Mask::from_bits(width, rows.len() as u32, bits).unwrap()
    }

    #[test]
    fn area_and_bounds_cover_true_pixels() {
        let mask = mask_from_rows(&["......", "..##..", ".###..", "....#."]);
        assert_eq!(mask.area(), 6);
        assert_eq!(
            mask.bounds(),
            Some(PixelBounds {
                x_min: 1,
                x_max: 4,
                y_min: 1,
                y_max: 3
            })
        );
    }

    #[test]
    fn empty_mask_has_no_bounds() {
        let mask = mask_from_rows(&["...", "..."]);
        assert_eq!(mask.area(), 0);
        assert_eq!(mask.bounds(), None);
    }

    #[test]
    fn mismatched_buffers_are_rejected() {
        assert!(Mask::from_bits(3, 3, vec![true; 8]).is_none());
    }

    #[test]
    fn nearest_resize_doubles_blocks() {
        let mask = mask_from_rows(&["#.", ".#"]);
        let big = mask.resize_nearest(4, 4);
        assert_eq!(big.area(), 8);
        assert!(big.get(0, 0) && big.get(1, 1) && big.get(3, 3));
        assert!(!big.get(3, 0));
    }
}
