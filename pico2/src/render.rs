//! Band renderer feeding the flush pipeline.
//!
//! The panel is drawn in [`BAND_COUNT`] full-width bands of [`BAND_LINES`]
//! lines. Two band buffers alternate: while one is leased to the bus and
//! streaming, the next band is drawn into the other.
//!
//! | Element     | Drawn                       |
//! |-------------|-----------------------------|
//! | Background  | every band                  |
//! | Greeting    | centred, 24 pt              |
//! | Touch mark  | while pressed, with x/y     |
//!
//! Every band draws the whole scene; [`BandCanvas`] clips it to its rows.

use core::fmt::Write;

use dispbus::config::{BAND_BYTES, BAND_LINES, BYTES_PER_PIXEL, LCD_HEIGHT, LCD_WIDTH};
use dispbus::{Area, DirtyRegion, DmaBuffer, Renderer};
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::pixelcolor::raw::RawU16;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{Circle, ContainsPoint, PointsIter, PrimitiveStyle, Rectangle};
use embedded_graphics::text::{Alignment, Baseline, Text, TextStyle, TextStyleBuilder};
use heapless::String;
use profont::{PROFONT_12_POINT, PROFONT_24_POINT};

// =============================================================================
// Scene
// =============================================================================

/// Bands per frame.
pub const BAND_COUNT: u16 = LCD_HEIGHT / BAND_LINES;

/// Screen background (#003A57).
pub const BACKGROUND: Rgb565 = Rgb565::new(0x00 >> 3, 0x3A >> 2, 0x57 >> 3);

/// Touch marker fill.
pub const MARKER: Rgb565 = Rgb565::new(31, 40, 0);

/// Touch marker diameter in pixels.
pub const MARKER_DIAMETER: u32 = 13;

pub const GREETING: &str = "Hello world";

const WIDTH: usize = LCD_WIDTH as usize;

/// What the next frame shows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Scene {
    /// Touch position while the panel is pressed.
    pub touch: Option<Point>,
}

fn centered() -> TextStyle {
    TextStyleBuilder::new()
        .alignment(Alignment::Center)
        .baseline(Baseline::Middle)
        .build()
}

/// Draw the full scene onto `target`.
pub fn draw_scene<D>(
    target: &mut D,
    scene: &Scene,
) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb565>,
{
    target.clear(BACKGROUND)?;

    let center = Point::new(i32::from(LCD_WIDTH) / 2, i32::from(LCD_HEIGHT) / 2);
    let greeting = MonoTextStyle::new(&PROFONT_24_POINT, Rgb565::WHITE);
    Text::with_text_style(GREETING, center, greeting, centered()).draw(target)?;

    if let Some(point) = scene.touch {
        Circle::with_center(point, MARKER_DIAMETER)
            .into_styled(PrimitiveStyle::with_fill(MARKER))
            .draw(target)?;

        let mut label: String<24> = String::new();
        // Panel-sized coordinates always fit
        let _ = write!(label, "x:{} y:{}", point.x, point.y);
        let position = Point::new(center.x, i32::from(LCD_HEIGHT) - 12);
        let small = MonoTextStyle::new(&PROFONT_12_POINT, Rgb565::WHITE);
        Text::with_text_style(&label, position, small, centered()).draw(target)?;
    }
    Ok(())
}

// =============================================================================
// Band Canvas
// =============================================================================

#[inline]
fn wire_bytes(color: Rgb565) -> [u8; 2] {
    let raw: RawU16 = color.into();
    raw.into_inner().to_be_bytes()
}

/// Full-screen draw target backed by a single band of rows.
///
/// Coordinates are panel coordinates; anything outside the band is dropped.
pub struct BandCanvas<'a> {
    pixels: &'a mut [u8],
    top: i32,
    lines: u32,
}

impl<'a> BandCanvas<'a> {
    /// Canvas over `pixels` (row-major RGB565 big-endian) starting at panel row `top`.
    pub fn new(
        pixels: &'a mut [u8],
        top: u16,
    ) -> Self {
        let lines = (pixels.len() / (WIDTH * BYTES_PER_PIXEL)) as u32;
        Self {
            pixels,
            top: i32::from(top),
            lines,
        }
    }

    /// Panel rows this canvas covers.
    pub fn rows(&self) -> Rectangle { Rectangle::new(Point::new(0, self.top), Size::new(WIDTH as u32, self.lines)) }

    #[inline]
    fn put(
        &mut self,
        point: Point,
        bytes: [u8; 2],
    ) {
        let idx = ((point.y - self.top) as usize * WIDTH + point.x as usize) * BYTES_PER_PIXEL;
        self.pixels[idx..idx + BYTES_PER_PIXEL].copy_from_slice(&bytes);
    }
}

impl OriginDimensions for BandCanvas<'_> {
    fn size(&self) -> Size { Size::new(u32::from(LCD_WIDTH), u32::from(LCD_HEIGHT)) }
}

impl DrawTarget for BandCanvas<'_> {
    type Color = Rgb565;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(
        &mut self,
        pixels: I,
    ) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let rows = self.rows();
        for Pixel(point, color) in pixels {
            if rows.contains(point) {
                self.put(point, wire_bytes(color));
            }
        }
        Ok(())
    }

    fn fill_contiguous<I>(
        &mut self,
        area: &Rectangle,
        colors: I,
    ) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Self::Color>,
    {
        let rows = self.rows();
        for (point, color) in area.points().zip(colors) {
            if rows.contains(point) {
                self.put(point, wire_bytes(color));
            }
        }
        Ok(())
    }

    fn fill_solid(
        &mut self,
        area: &Rectangle,
        color: Self::Color,
    ) -> Result<(), Self::Error> {
        let drawable_area = area.intersection(&self.rows());
        if drawable_area.size == Size::zero() {
            return Ok(());
        }

        let bytes = wire_bytes(color);
        for y in drawable_area.rows() {
            for x in drawable_area.columns() {
                self.put(Point::new(x, y), bytes);
            }
        }
        Ok(())
    }

    fn clear(
        &mut self,
        color: Self::Color,
    ) -> Result<(), Self::Error> {
        let bytes = wire_bytes(color);
        for pixel in self.pixels.chunks_exact_mut(BYTES_PER_PIXEL) {
            pixel.copy_from_slice(&bytes);
        }
        Ok(())
    }
}

// =============================================================================
// Band Renderer
// =============================================================================

/// Draws the scene band by band into two alternating band buffers.
pub struct BandRenderer {
    buffers: [&'static DmaBuffer<BAND_BYTES>; 2],
    next_buffer: usize,
    next_band: u16,
    scene: Scene,
    flushed: u32,
}

impl BandRenderer {
    /// Renderer with the first frame pending.
    pub fn new(buffers: [&'static DmaBuffer<BAND_BYTES>; 2]) -> Self {
        Self {
            buffers,
            next_buffer: 0,
            next_band: 0,
            scene: Scene::default(),
            flushed: 0,
        }
    }

    #[inline]
    pub const fn scene(&self) -> &Scene { &self.scene }

    /// Update the touch marker; redraws the frame when it moved.
    pub fn set_touch(
        &mut self,
        touch: Option<Point>,
    ) {
        if self.scene.touch != touch {
            self.scene.touch = touch;
            self.invalidate();
        }
    }

    /// Start the frame over from the first band.
    pub fn invalidate(&mut self) { self.next_band = 0; }

    /// Every band of the current frame has been handed out.
    #[inline]
    pub const fn is_frame_done(&self) -> bool { self.next_band >= BAND_COUNT }

    /// Bands the pipeline reported as on the panel.
    #[inline]
    pub const fn bands_flushed(&self) -> u32 { self.flushed }

    /// Panel area of band `band`.
    pub const fn band_area(band: u16) -> Area {
        let y1 = band * BAND_LINES;
        Area::new(0, y1, LCD_WIDTH - 1, y1 + BAND_LINES - 1)
    }
}

impl Renderer for BandRenderer {
    /// `None` when the frame is done, or when the next buffer is still streaming.
    fn dirty_region(&mut self) -> Option<DirtyRegion> {
        if self.is_frame_done() {
            return None;
        }

        let buffer = self.buffers[self.next_buffer];
        {
            let mut pixels = buffer.try_write()?;
            let mut canvas = BandCanvas::new(&mut pixels[..], self.next_band * BAND_LINES);
            draw_scene(&mut canvas, &self.scene).ok();
        }
        let pixels = buffer.lease_all()?;

        let area = Self::band_area(self.next_band);
        self.next_band += 1;
        self.next_buffer ^= 1;
        Some(DirtyRegion { area, pixels })
    }

    fn on_flush_complete(&mut self) { self.flushed = self.flushed.wrapping_add(1); }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn buffers() -> [&'static DmaBuffer<BAND_BYTES>; 2] {
        [
            Box::leak(Box::new(DmaBuffer::new())),
            Box::leak(Box::new(DmaBuffer::new())),
        ]
    }

    fn pixel_at(
        band: &[u8],
        x: usize,
        row: usize,
    ) -> [u8; 2] {
        let idx = (row * WIDTH + x) * BYTES_PER_PIXEL;
        [band[idx], band[idx + 1]]
    }

    fn render_band(
        band: u16,
        scene: &Scene,
    ) -> std::vec::Vec<u8> {
        let mut pixels = std::vec![0u8; BAND_BYTES];
        let mut canvas = BandCanvas::new(&mut pixels, band * BAND_LINES);
        draw_scene(&mut canvas, scene).ok();
        pixels
    }

    #[test]
    fn test_band_geometry() {
        assert_eq!(BAND_COUNT, 7);
        assert_eq!(BandRenderer::band_area(0), Area::new(0, 0, 239, 39));
        assert_eq!(BandRenderer::band_area(6), Area::new(0, 240, 239, 279));
        assert_eq!(BandRenderer::band_area(3).byte_len(), Some(BAND_BYTES));
    }

    #[test]
    fn test_background_wire_order() {
        // 0x003A57 -> RGB565 0x01CA, big-endian on the wire
        assert_eq!(wire_bytes(BACKGROUND), [0x01, 0xCA]);
        let top = render_band(0, &Scene::default());
        assert!(top.chunks_exact(2).all(|px| px == [0x01, 0xCA]));
    }

    #[test]
    fn test_greeting_lands_in_middle_band() {
        let white = wire_bytes(Rgb565::WHITE);
        let middle = render_band(3, &Scene::default());
        assert!(middle.chunks_exact(2).any(|px| px == white));

        let bottom = render_band(6, &Scene::default());
        assert!(!bottom.chunks_exact(2).any(|px| px == white));
    }

    #[test]
    fn test_touch_marker_clipped_to_band() {
        let scene = Scene {
            touch: Some(Point::new(20, 20)),
        };
        let top = render_band(0, &scene);
        assert_eq!(pixel_at(&top, 20, 20), wire_bytes(MARKER));

        let next = render_band(1, &scene);
        assert!(!next.chunks_exact(2).any(|px| px == wire_bytes(MARKER)));
    }

    #[test]
    fn test_renderer_alternates_buffers() {
        let [a, b] = buffers();
        let mut renderer = BandRenderer::new([a, b]);

        let first = renderer.dirty_region().unwrap();
        assert_eq!(first.area, BandRenderer::band_area(0));
        assert!(a.is_leased());

        // Second band goes to the other buffer while the first still streams.
        let second = renderer.dirty_region().unwrap();
        assert_eq!(second.area, BandRenderer::band_area(1));
        assert!(b.is_leased());

        // Both buffers busy: nothing to hand out until one is released.
        assert!(renderer.dirty_region().is_none());
        drop(first);
        renderer.on_flush_complete();
        let third = renderer.dirty_region().unwrap();
        assert_eq!(third.area, BandRenderer::band_area(2));
        assert_eq!(renderer.bands_flushed(), 1);
        drop(second);
        drop(third);
    }

    #[test]
    fn test_frame_completion_and_invalidate() {
        let mut renderer = BandRenderer::new(buffers());
        for band in 0..BAND_COUNT {
            let region = renderer.dirty_region().unwrap();
            assert_eq!(region.area, BandRenderer::band_area(band));
            drop(region);
            renderer.on_flush_complete();
        }
        assert!(renderer.is_frame_done());
        assert!(renderer.dirty_region().is_none());

        // Same touch state: no redraw
        renderer.set_touch(None);
        assert!(renderer.is_frame_done());

        renderer.set_touch(Some(Point::new(100, 100)));
        assert!(!renderer.is_frame_done());
        assert_eq!(renderer.dirty_region().unwrap().area, BandRenderer::band_area(0));
    }
}
