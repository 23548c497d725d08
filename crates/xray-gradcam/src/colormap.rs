//! Jet-style colormap: blue for low saliency, red for high.

/// Map a normalized value in `[0, 1]` to an RGB color.
pub fn jet(value: f32) -> [u8; 3] {
    let v = value.clamp(0.0, 1.0);
    let r = channel(1.5 - (4.0 * v - 3.0).abs());
    let g = channel(1.5 - (4.0 * v - 2.0).abs());
    let b = channel(1.5 - (4.0 * v - 1.0).abs());
    [r, g, b]
}

fn channel(x: f32) -> u8 {
    (x.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_low_values_are_blue() {
        let [r, _, b] = jet(0.0);
        assert!(b > r);
    }

    #[test]
    fn test_high_values_are_red() {
        let [r, _, b] = jet(1.0);
        assert!(r > b);
    }

    #[test]
    fn test_midpoint_is_green_dominant() {
        let [r, g, b] = jet(0.5);
        assert!(g >= r);
        assert!(g >= b);
    }

    #[test]
    fn test_out_of_range_clamps() {
        assert_eq!(jet(-1.0), jet(0.0));
        assert_eq!(jet(2.0), jet(1.0));
    }
}
