//! Contrast-limited adaptive histogram equalization.
//!
//! The image is tiled into a small grid; each tile gets its own clipped
//! histogram and equalization LUT, and every pixel is mapped through a
//! bilinear blend of the four nearest tile LUTs. The clip limit bounds how
//! much any histogram bin may contribute, which keeps near-uniform tiles
//! from amplifying noise.

use image::GrayImage;

const BINS: usize = 256;

/// Apply CLAHE with the given tile grid and clip limit.
///
/// `clip_limit` is relative to the mean bin height of a tile (the OpenCV
/// convention): the effective per-bin cap is
/// `clip_limit * tile_area / 256`, never below 1.
pub fn apply(image: &GrayImage, tiles_x: u32, tiles_y: u32, clip_limit: f32) -> GrayImage {
    let (width, height) = image.dimensions();
    let tiles_x = tiles_x.max(1) as usize;
    let tiles_y = tiles_y.max(1) as usize;

    let luts = tile_luts(image, tiles_x, tiles_y, clip_limit);

    let tile_w = width as f32 / tiles_x as f32;
    let tile_h = height as f32 / tiles_y as f32;

    let mut out = GrayImage::new(width, height);
    for y in 0..height {
        // Position of this row between vertical tile centers
        let fy = (y as f32 + 0.5) / tile_h - 0.5;
        let (ty0, ty1, wy) = neighbor_tiles(fy, tiles_y);

        for x in 0..width {
            let fx = (x as f32 + 0.5) / tile_w - 0.5;
            let (tx0, tx1, wx) = neighbor_tiles(fx, tiles_x);

            let v = image.get_pixel(x, y)[0] as usize;
            let v00 = luts[ty0 * tiles_x + tx0][v] as f32;
            let v01 = luts[ty0 * tiles_x + tx1][v] as f32;
            let v10 = luts[ty1 * tiles_x + tx0][v] as f32;
            let v11 = luts[ty1 * tiles_x + tx1][v] as f32;

            let top = v00 * (1.0 - wx) + v01 * wx;
            let bottom = v10 * (1.0 - wx) + v11 * wx;
            let blended = top * (1.0 - wy) + bottom * wy;

            out.put_pixel(x, y, image::Luma([blended.round().clamp(0.0, 255.0) as u8]));
        }
    }

    out
}

/// Indices of the two neighboring tiles along one axis and the blend weight
/// toward the second one. Border pixels clamp to the edge tile.
fn neighbor_tiles(f: f32, tiles: usize) -> (usize, usize, f32) {
    if f <= 0.0 {
        return (0, 0, 0.0);
    }
    let max = tiles - 1;
    if f >= max as f32 {
        return (max, max, 0.0);
    }
    let t0 = f.floor() as usize;
    (t0, t0 + 1, f - t0 as f32)
}

/// Build the clipped equalization LUT for every tile, row-major.
fn tile_luts(image: &GrayImage, tiles_x: usize, tiles_y: usize, clip_limit: f32) -> Vec<[u8; BINS]> {
    let (width, height) = image.dimensions();
    let mut luts = Vec::with_capacity(tiles_x * tiles_y);

    for ty in 0..tiles_y {
        let y0 = (ty * height as usize) / tiles_y;
        let y1 = ((ty + 1) * height as usize) / tiles_y;

        for tx in 0..tiles_x {
            let x0 = (tx * width as usize) / tiles_x;
            let x1 = ((tx + 1) * width as usize) / tiles_x;

            let mut hist = [0u32; BINS];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[image.get_pixel(x as u32, y as u32)[0] as usize] += 1;
                }
            }

            let area = ((y1 - y0) * (x1 - x0)) as u32;
            luts.push(equalization_lut(&mut hist, area, clip_limit));
        }
    }

    luts
}

/// Clip the histogram, redistribute the excess uniformly, and turn the CDF
/// into a 0-255 mapping.
fn equalization_lut(hist: &mut [u32; BINS], area: u32, clip_limit: f32) -> [u8; BINS] {
    let mut lut = [0u8; BINS];
    if area == 0 {
        return lut;
    }

    let cap = ((clip_limit * area as f32 / BINS as f32) as u32).max(1);

    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > cap {
            excess += *bin - cap;
            *bin = cap;
        }
    }

    // Spread the clipped mass evenly; the remainder goes one-per-bin from 0
    let per_bin = excess / BINS as u32;
    let leftover = (excess % BINS as u32) as usize;
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += per_bin;
        if i < leftover {
            *bin += 1;
        }
    }

    let mut cdf = 0u64;
    for (i, &bin) in hist.iter().enumerate() {
        cdf += bin as u64;
        lut[i] = ((cdf * 255) / area as u64).min(255) as u8;
    }

    lut
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_constant_image_stays_constant() {
        let img = GrayImage::from_fn(64, 64, |_, _| Luma([90]));
        let out = apply(&img, 4, 4, 2.0);
        let first = out.get_pixel(0, 0)[0];
        assert!(out.pixels().all(|p| p[0] == first));
    }

    #[test]
    fn test_output_dimensions_preserved() {
        let img = GrayImage::from_fn(100, 60, |x, y| Luma([((x * y) % 256) as u8]));
        let out = apply(&img, 4, 4, 2.0);
        assert_eq!(out.dimensions(), (100, 60));
    }

    #[test]
    fn test_deterministic() {
        let img = GrayImage::from_fn(80, 80, |x, y| Luma([((x * 7 + y * 13) % 256) as u8]));
        let a = apply(&img, 4, 4, 2.0);
        let b = apply(&img, 4, 4, 2.0);
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn test_raises_local_contrast() {
        // Low-contrast ramp confined to a narrow band
        let img = GrayImage::from_fn(64, 64, |x, _| Luma([100 + (x / 8) as u8]));
        let out = apply(&img, 4, 4, 4.0);

        let spread_in = minmax_spread(&img);
        let spread_out = minmax_spread(&out);
        assert!(
            spread_out > spread_in,
            "CLAHE should widen a narrow intensity band ({spread_in} -> {spread_out})"
        );
    }

    #[test]
    fn test_neighbor_tiles_clamps_at_borders() {
        assert_eq!(neighbor_tiles(-0.3, 4), (0, 0, 0.0));
        assert_eq!(neighbor_tiles(3.5, 4), (3, 3, 0.0));
        let (t0, t1, w) = neighbor_tiles(1.25, 4);
        assert_eq!((t0, t1), (1, 2));
        assert!((w - 0.25).abs() < 1e-6);
    }

    fn minmax_spread(img: &GrayImage) -> u8 {
        let min = img.pixels().map(|p| p[0]).min().unwrap();
        let max = img.pixels().map(|p| p[0]).max().unwrap();
        max - min
    }
}
