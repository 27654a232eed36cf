use iced::widget::image::Handle;
use ndarray::ArrayView2;

const CROSSHAIR_RGBA: [u8; 4] = [220, 60, 60, 255];

/// Converts one extracted plane into an RGBA image handle. Intensities map
/// linearly against `white_point` (the brightness window's upper bound) into
/// 8-bit gray, clamped at both ends. Row 0 renders at the top.
pub fn slice_to_handle(
    plane: ArrayView2<'_, f32>,
    white_point: f32,
    crosshair: Option<(usize, usize)>,
) -> Handle {
    let (height, width) = plane.dim();
    let mut rgba = rasterize(plane, white_point);
    if let Some((row, col)) = crosshair {
        paint_crosshair(&mut rgba, height, width, row, col);
    }
    Handle::from_rgba(width as u32, height as u32, rgba)
}

fn rasterize(plane: ArrayView2<'_, f32>, white_point: f32) -> Vec<u8> {
    let (height, width) = plane.dim();
    let scale = if white_point > 0.0 {
        255.0 / white_point
    } else {
        0.0
    };

    let mut rgba = Vec::with_capacity(height * width * 4);
    for row in 0..height {
        for col in 0..width {
            let gray = (plane[[row, col]] * scale).clamp(0.0, 255.0).round() as u8;
            rgba.extend_from_slice(&[gray, gray, gray, 255]);
        }
    }
    rgba
}

/// Marks the sibling planes' slice positions with one horizontal and one
/// vertical line.
fn paint_crosshair(rgba: &mut [u8], height: usize, width: usize, row: usize, col: usize) {
    if row < height {
        for c in 0..width {
            let at = (row * width + c) * 4;
            rgba[at..at + 4].copy_from_slice(&CROSSHAIR_RGBA);
        }
    }
    if col < width {
        for r in 0..height {
            let at = (r * width + col) * 4;
            rgba[at..at + 4].copy_from_slice(&CROSSHAIR_RGBA);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn gray_mapping_is_linear_and_clamped() {
        let plane = arr2(&[[0.0f32, 100.0], [200.0, 400.0]]);
        let rgba = rasterize(plane.view(), 200.0);

        // Pixels are [gray, gray, gray, 255] in row-major order.
        assert_eq!(&rgba[0..4], &[0, 0, 0, 255]);
        assert_eq!(&rgba[4..8], &[128, 128, 128, 255]);
        assert_eq!(&rgba[8..12], &[255, 255, 255, 255]);
        // Above the white point clamps instead of wrapping.
        assert_eq!(&rgba[12..16], &[255, 255, 255, 255]);
    }

    #[test]
    fn lower_white_point_brightens_the_same_voxel() {
        let plane = arr2(&[[100.0f32]]);
        assert_eq!(rasterize(plane.view(), 400.0)[0], 64);
        assert_eq!(rasterize(plane.view(), 200.0)[0], 128);
    }

    #[test]
    fn crosshair_overwrites_one_row_and_column() {
        let plane = arr2(&[[0.0f32; 3]; 3]);
        let mut rgba = rasterize(plane.view(), 1.0);
        paint_crosshair(&mut rgba, 3, 3, 1, 2);

        let pixel = |row: usize, col: usize| &rgba[(row * 3 + col) * 4..(row * 3 + col) * 4 + 4];
        assert_eq!(pixel(1, 0), &CROSSHAIR_RGBA);
        assert_eq!(pixel(1, 1), &CROSSHAIR_RGBA);
        assert_eq!(pixel(0, 2), &CROSSHAIR_RGBA);
        assert_eq!(pixel(0, 0), &[0, 0, 0, 255]);
    }
}
