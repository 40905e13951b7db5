//! Pointer shape reconstruction.
//!
//! The capture layer hands over the raw pointer shape exactly as the
//! duplication API reported it: full-color BGRA, a stacked pair of 1bpp
//! AND/XOR planes, or 32-bit masked color. Everything here is plain CPU
//! work over pixel words so the compositor only has to upload the result
//! as a texture and draw one quad.

use crate::error::{PresentError, PresentResult};

pub const BYTES_PER_PIXEL: usize = 4;

/// Raw shape type values reported by the duplication API.
const SHAPE_TYPE_MONOCHROME: u32 = 0x1;
const SHAPE_TYPE_COLOR: u32 = 0x2;
const SHAPE_TYPE_MASKED_COLOR: u32 = 0x4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    /// Full BGRA image, used as-is.
    Color,
    /// 1bpp AND mask stacked above a 1bpp XOR mask of equal size.
    Monochrome,
    /// 32bpp image whose top byte is a binary replace/transparent mask.
    MaskedColor,
}

impl ShapeKind {
    /// `None` for unrecognized type values; the compositor treats those as
    /// a no-op draw rather than an error.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            SHAPE_TYPE_MONOCHROME => Some(Self::Monochrome),
            SHAPE_TYPE_COLOR => Some(Self::Color),
            SHAPE_TYPE_MASKED_COLOR => Some(Self::MaskedColor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PointerShape {
    pub kind: ShapeKind,
    pub width: u32,
    /// Buffer height as reported. For `Monochrome` this is the packed
    /// height of both planes; the visible cursor is half as tall.
    pub height: u32,
    /// Row stride of `data` in bytes.
    pub pitch: u32,
    pub data: Vec<u8>,
}

impl PointerShape {
    /// Height of the drawn cursor image.
    pub fn logical_height(&self) -> u32 {
        match self.kind {
            ShapeKind::Monochrome => self.height / 2,
            _ => self.height,
        }
    }
}

/// Latest cursor snapshot from the capture layer. Position may be negative
/// while the cursor straddles the canvas's left or top edge.
#[derive(Debug, Clone, Default)]
pub struct PointerState {
    pub x: i32,
    pub y: i32,
    pub visible: bool,
    pub shape: Option<PointerShape>,
}

/// Where the clipped cursor lands on the canvas, and how many leading
/// shape pixels fall outside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
    pub skip_x: u32,
    pub skip_y: u32,
}

impl Placement {
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// Clip a shape rectangle at (x, y) against the canvas. Each side clips
/// independently; a cursor entirely off the canvas comes back empty.
pub fn clip_to_canvas(
    x: i32,
    y: i32,
    shape_width: u32,
    shape_height: u32,
    canvas_width: u32,
    canvas_height: u32,
) -> Placement {
    let shape_width = shape_width as i32;
    let shape_height = shape_height as i32;
    let canvas_width = canvas_width as i32;
    let canvas_height = canvas_height as i32;

    let width = if x < 0 {
        x + shape_width
    } else if x + shape_width > canvas_width {
        canvas_width - x
    } else {
        shape_width
    };

    let height = if y < 0 {
        y + shape_height
    } else if y + shape_height > canvas_height {
        canvas_height - y
    } else {
        shape_height
    };

    Placement {
        left: x.max(0),
        top: y.max(0),
        width: width.max(0),
        height: height.max(0),
        skip_x: if x < 0 { (-x) as u32 } else { 0 },
        skip_y: if y < 0 { (-y) as u32 } else { 0 },
    }
}

fn alloc_output(placement: &Placement) -> PresentResult<Vec<u32>> {
    let len = placement.width as usize * placement.height as usize;
    let mut out = Vec::new();
    out.try_reserve_exact(len)
        .map_err(|_| PresentError::PointerAlloc {
            width: placement.width as u32,
            height: placement.height as u32,
        })?;
    out.resize(len, 0);
    Ok(out)
}

/// Decode the stacked AND/XOR planes against the desktop pixels underneath
/// the cursor. `desktop` is the copied canvas region starting at the
/// placement origin, `desktop_pitch` its row stride in pixels. Output is
/// straight BGRA sized exactly to the clipped rectangle.
///
/// Per pixel: AND bit set keeps the desktop pixel, with the XOR bit
/// inverting its RGB channels; AND bit clear paints opaque black or
/// white depending on the XOR bit.
pub fn decode_monochrome(
    shape: &PointerShape,
    placement: &Placement,
    desktop: &[u32],
    desktop_pitch: usize,
) -> PresentResult<Vec<u32>> {
    let mut out = alloc_output(placement)?;

    let pitch = shape.pitch as usize;
    let xor_plane_offset = shape.logical_height() as usize;
    let skip_x = placement.skip_x as usize;
    let skip_y = placement.skip_y as usize;

    for row in 0..placement.height as usize {
        let mut mask: u8 = 0x80 >> (placement.skip_x % 8);
        for col in 0..placement.width as usize {
            let byte = (col + skip_x) / 8;
            let and_bit = shape.data[byte + (row + skip_y) * pitch] & mask != 0;
            let xor_bit = shape.data[byte + (row + skip_y + xor_plane_offset) * pitch] & mask != 0;

            let xor_mask: u32 = if xor_bit { 0x00FF_FFFF } else { 0x0000_0000 };

            out[row * placement.width as usize + col] = if and_bit {
                desktop[row * desktop_pitch + col] ^ xor_mask
            } else {
                0xFF00_0000 ^ xor_mask
            };

            mask = if mask == 0x01 { 0x80 } else { mask >> 1 };
        }
    }

    Ok(out)
}

/// Decode a masked-color shape against the desktop pixels underneath the
/// cursor. The top byte of each shape pixel is a full mask: nonzero XORs
/// the shape into the desktop pixel, zero replaces it outright. Alpha is
/// forced opaque either way.
pub fn decode_masked_color(
    shape: &PointerShape,
    placement: &Placement,
    desktop: &[u32],
    desktop_pitch: usize,
) -> PresentResult<Vec<u32>> {
    let mut out = alloc_output(placement)?;

    let pitch_px = shape.pitch as usize / BYTES_PER_PIXEL;
    let skip_x = placement.skip_x as usize;
    let skip_y = placement.skip_y as usize;

    for row in 0..placement.height as usize {
        for col in 0..placement.width as usize {
            let idx = ((col + skip_x) + (row + skip_y) * pitch_px) * BYTES_PER_PIXEL;
            let src = u32::from_le_bytes([
                shape.data[idx],
                shape.data[idx + 1],
                shape.data[idx + 2],
                shape.data[idx + 3],
            ]);

            out[row * placement.width as usize + col] = if src & 0xFF00_0000 != 0 {
                (desktop[row * desktop_pitch + col] ^ src) | 0xFF00_0000
            } else {
                src | 0xFF00_0000
            };
        }
    }

    Ok(out)
}

/// Transport for cursor updates from the capture layer. Producers send
/// snapshots as they happen; the render thread folds whatever queued up
/// into the latest state before each tick (last writer wins).
pub struct PointerFeed {
    receiver: crossbeam_channel::Receiver<PointerState>,
    latest: PointerState,
}

pub fn pointer_channel() -> (crossbeam_channel::Sender<PointerState>, PointerFeed) {
    let (sender, receiver) = crossbeam_channel::unbounded();
    (
        sender,
        PointerFeed {
            receiver,
            latest: PointerState::default(),
        },
    )
}

impl PointerFeed {
    pub fn latest(&mut self) -> &PointerState {
        while let Ok(state) = self.receiver.try_recv() {
            self.latest = state;
        }
        &self.latest
    }
}

/// Vertex layout shared with the HLSL quad shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub tex: [f32; 2],
}

/// Two triangles covering the whole render target.
pub const FULL_TARGET_QUAD: [Vertex; 6] = [
    Vertex { pos: [-1.0, -1.0, 0.0], tex: [0.0, 1.0] },
    Vertex { pos: [-1.0, 1.0, 0.0], tex: [0.0, 0.0] },
    Vertex { pos: [1.0, -1.0, 0.0], tex: [1.0, 1.0] },
    Vertex { pos: [1.0, -1.0, 0.0], tex: [1.0, 1.0] },
    Vertex { pos: [-1.0, 1.0, 0.0], tex: [0.0, 0.0] },
    Vertex { pos: [1.0, 1.0, 0.0], tex: [1.0, 0.0] },
];

/// Quad for the cursor rectangle in the composed target's normalized
/// device coordinates. Canvas pixel coordinates grow downward; NDC grows
/// upward, hence the negated Y terms.
pub fn pointer_quad(
    left: i32,
    top: i32,
    width: i32,
    height: i32,
    canvas_width: u32,
    canvas_height: u32,
) -> [Vertex; 6] {
    let center_x = (canvas_width / 2) as f32;
    let center_y = (canvas_height / 2) as f32;

    let x0 = (left as f32 - center_x) / center_x;
    let x1 = ((left + width) as f32 - center_x) / center_x;
    let y0 = -((top + height) as f32 - center_y) / center_y;
    let y1 = -(top as f32 - center_y) / center_y;

    [
        Vertex { pos: [x0, y0, 0.0], tex: [0.0, 1.0] },
        Vertex { pos: [x0, y1, 0.0], tex: [0.0, 0.0] },
        Vertex { pos: [x1, y0, 0.0], tex: [1.0, 1.0] },
        Vertex { pos: [x1, y0, 0.0], tex: [1.0, 1.0] },
        Vertex { pos: [x0, y1, 0.0], tex: [0.0, 0.0] },
        Vertex { pos: [x1, y1, 0.0], tex: [1.0, 0.0] },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANVAS_W: u32 = 64;
    const CANVAS_H: u32 = 64;

    /// Stacked AND/XOR planes for a 4x4 monochrome cursor, one byte per
    /// row. `and` and `xor` give the leading 4 bits of every row.
    fn mono_shape(and: u8, xor: u8) -> PointerShape {
        let mut data = vec![and; 4];
        data.extend(vec![xor; 4]);
        PointerShape {
            kind: ShapeKind::Monochrome,
            width: 4,
            height: 8,
            pitch: 1,
            data,
        }
    }

    fn solid_desktop(color: u32, len: usize) -> Vec<u32> {
        vec![color; len]
    }

    #[test]
    fn monochrome_and_set_xor_clear_passes_desktop_through() {
        let shape = mono_shape(0xF0, 0x00);
        let placement = clip_to_canvas(10, 10, 4, 4, CANVAS_W, CANVAS_H);
        let desktop = solid_desktop(0xFF20_40C0, 16);

        let out = decode_monochrome(&shape, &placement, &desktop, 4).unwrap();
        assert_eq!(out.len(), 16);
        assert!(out.iter().all(|&px| px == 0xFF20_40C0));
    }

    #[test]
    fn monochrome_and_set_xor_set_inverts_rgb_opaque() {
        let shape = mono_shape(0xF0, 0xF0);
        let placement = clip_to_canvas(10, 10, 4, 4, CANVAS_W, CANVAS_H);
        let desktop = solid_desktop(0xFF20_40C0, 16);

        let out = decode_monochrome(&shape, &placement, &desktop, 4).unwrap();
        // RGB channels inverted, alpha untouched (still opaque).
        assert!(out.iter().all(|&px| px == 0xFFDF_BF3F));
    }

    #[test]
    fn monochrome_and_clear_paints_black_or_white() {
        let desktop = solid_desktop(0xFF20_40C0, 16);
        let placement = clip_to_canvas(0, 0, 4, 4, CANVAS_W, CANVAS_H);

        let black = decode_monochrome(&mono_shape(0x00, 0x00), &placement, &desktop, 4).unwrap();
        assert!(black.iter().all(|&px| px == 0xFF00_0000));

        let white = decode_monochrome(&mono_shape(0x00, 0xF0), &placement, &desktop, 4).unwrap();
        assert!(white.iter().all(|&px| px == 0xFFFF_FFFF));
    }

    #[test]
    fn monochrome_mask_walk_crosses_byte_boundary() {
        // 12 px wide: rows span one and a half bytes per plane.
        let mut data = vec![0u8; 4];
        data[0] = 0b1010_1010;
        data[1] = 0b1010_0000;
        data.extend([0u8; 4]); // XOR plane all clear
        let shape = PointerShape {
            kind: ShapeKind::Monochrome,
            width: 12,
            height: 4,
            pitch: 2,
            data,
        };

        let placement = clip_to_canvas(0, 0, 12, 2, CANVAS_W, CANVAS_H);
        let desktop = solid_desktop(0xFFAA_BBCC, 24);
        let out = decode_monochrome(&shape, &placement, &desktop, 12).unwrap();

        for col in 0..12 {
            let expected = if col % 2 == 0 { 0xFFAA_BBCC } else { 0xFF00_0000 };
            assert_eq!(out[col], expected, "column {col}");
        }
    }

    fn masked_shape(pixels: &[u32], width: u32, height: u32) -> PointerShape {
        let data = pixels.iter().flat_map(|px| px.to_le_bytes()).collect();
        PointerShape {
            kind: ShapeKind::MaskedColor,
            width,
            height,
            pitch: width * BYTES_PER_PIXEL as u32,
            data,
        }
    }

    #[test]
    fn masked_color_zero_mask_replaces_ignoring_desktop() {
        let shape = masked_shape(&[0x0012_3456; 4], 2, 2);
        let placement = clip_to_canvas(0, 0, 2, 2, CANVAS_W, CANVAS_H);
        let desktop = solid_desktop(0xFFFF_FFFF, 4);

        let out = decode_masked_color(&shape, &placement, &desktop, 2).unwrap();
        assert!(out.iter().all(|&px| px == 0xFF12_3456));
    }

    #[test]
    fn masked_color_nonzero_mask_xors_with_desktop() {
        let shape = masked_shape(&[0xFF00_00FF; 1], 1, 1);
        let placement = clip_to_canvas(0, 0, 1, 1, CANVAS_W, CANVAS_H);
        let desktop = solid_desktop(0xFF00_FF00, 1);

        let out = decode_masked_color(&shape, &placement, &desktop, 1).unwrap();
        assert_eq!(out[0], 0xFF00_FFFF);
    }

    #[test]
    fn clip_left_edge_skips_hidden_columns() {
        let placement = clip_to_canvas(-5, 0, 10, 10, CANVAS_W, CANVAS_H);
        assert_eq!(placement.width, 5);
        assert_eq!(placement.skip_x, 5);
        assert_eq!(placement.left, 0);

        // The decoded buffer's first column must come from shape column 5.
        let mut pixels = vec![0x0000_0000u32; 100];
        for row in 0..10 {
            pixels[row * 10 + 5] = 0x00AB_CDEF;
        }
        let shape = masked_shape(&pixels, 10, 10);
        let desktop = solid_desktop(0xFF11_1111, 50);
        let out = decode_masked_color(&shape, &placement, &desktop, 5).unwrap();
        assert_eq!(out[0], 0xFFAB_CDEF);
    }

    #[test]
    fn clip_all_four_directions_independently() {
        // Right edge
        let p = clip_to_canvas(60, 0, 10, 10, CANVAS_W, CANVAS_H);
        assert_eq!((p.width, p.skip_x, p.left), (4, 0, 60));
        // Top edge
        let p = clip_to_canvas(0, -3, 10, 10, CANVAS_W, CANVAS_H);
        assert_eq!((p.height, p.skip_y, p.top), (7, 3, 0));
        // Bottom edge
        let p = clip_to_canvas(0, 58, 10, 10, CANVAS_W, CANVAS_H);
        assert_eq!((p.height, p.skip_y, p.top), (6, 0, 58));
        // Fully on-screen
        let p = clip_to_canvas(5, 5, 10, 10, CANVAS_W, CANVAS_H);
        assert_eq!((p.width, p.height, p.skip_x, p.skip_y), (10, 10, 0, 0));
    }

    #[test]
    fn fully_offscreen_pointer_is_empty() {
        assert!(clip_to_canvas(-20, 0, 10, 10, CANVAS_W, CANVAS_H).is_empty());
        assert!(clip_to_canvas(0, 70, 10, 10, CANVAS_W, CANVAS_H).is_empty());
    }

    #[test]
    fn unknown_shape_type_is_rejected() {
        assert_eq!(ShapeKind::from_raw(0x3), None);
        assert_eq!(ShapeKind::from_raw(0x8), None);
        assert_eq!(ShapeKind::from_raw(0x1), Some(ShapeKind::Monochrome));
        assert_eq!(ShapeKind::from_raw(0x2), Some(ShapeKind::Color));
        assert_eq!(ShapeKind::from_raw(0x4), Some(ShapeKind::MaskedColor));
    }

    #[test]
    fn pointer_quad_maps_pixels_to_centered_ndc() {
        // 32x32 cursor at (100, 100) on a 1920x1080 canvas.
        let quad = pointer_quad(100, 100, 32, 32, 1920, 1080);
        let cx = 960.0f32;
        let cy = 540.0f32;

        assert_eq!(quad[0].pos[0], (100.0 - cx) / cx);
        assert_eq!(quad[0].pos[1], -((132.0 - cy) / cy));
        assert_eq!(quad[5].pos[0], (132.0 - cx) / cx);
        assert_eq!(quad[5].pos[1], -((100.0 - cy) / cy));
        // Vertical axis flips: bottom edge below top edge in NDC.
        assert!(quad[0].pos[1] < quad[1].pos[1]);
    }

    #[test]
    fn full_target_quad_spans_clip_space() {
        assert_eq!(FULL_TARGET_QUAD[0].pos, [-1.0, -1.0, 0.0]);
        assert_eq!(FULL_TARGET_QUAD[5].pos, [1.0, 1.0, 0.0]);
    }

    #[test]
    fn pointer_feed_keeps_last_writer() {
        let (tx, mut feed) = pointer_channel();
        assert!(!feed.latest().visible);

        for x in 0..5 {
            tx.send(PointerState {
                x,
                y: 2 * x,
                visible: true,
                shape: None,
            })
            .unwrap();
        }

        let latest = feed.latest();
        assert_eq!((latest.x, latest.y), (4, 8));
        assert!(latest.visible);
    }

    #[test]
    fn monochrome_logical_height_halves_packed_buffer() {
        let shape = mono_shape(0xF0, 0x00);
        assert_eq!(shape.logical_height(), 4);

        let color = PointerShape {
            kind: ShapeKind::Color,
            width: 8,
            height: 8,
            pitch: 32,
            data: vec![0; 256],
        };
        assert_eq!(color.logical_height(), 8);
    }
}
