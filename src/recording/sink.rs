//! Consumer interfaces fed by the player.
//!
//! A consumer is a graphic sink (drawing orders), a capture sink
//! (timing, input and image rows), or both. Every method has an empty
//! default body so a sink implements only what it consumes.

use std::collections::BTreeMap;
use std::fmt;

use crate::cache::{GlyphCache, Pointer};
use crate::orders::{
    Bitmap, BitmapData, CacheGlyph, DstBlt, FrameMarker, GlyphIndex, LineTo, Mem3Blt, MemBlt,
    MultiDstBlt, MultiOpaqueRect, MultiPatBlt, MultiScrBlt, OpaqueRect, PatBlt, Polyline, ScrBlt,
};
use crate::wire::Rect;

/// Drawing order visitor. `clip` is the order bounds, or the screen when
/// the order carries none.
pub trait GraphicSink {
    fn draw_dst_blt(&mut self, _order: &DstBlt, _clip: &Rect) {}
    fn draw_multi_dst_blt(&mut self, _order: &MultiDstBlt, _clip: &Rect) {}
    fn draw_pat_blt(&mut self, _order: &PatBlt, _clip: &Rect) {}
    fn draw_multi_pat_blt(&mut self, _order: &MultiPatBlt, _clip: &Rect) {}
    fn draw_scr_blt(&mut self, _order: &ScrBlt, _clip: &Rect) {}
    fn draw_multi_scr_blt(&mut self, _order: &MultiScrBlt, _clip: &Rect) {}
    fn draw_opaque_rect(&mut self, _order: &OpaqueRect, _clip: &Rect) {}
    fn draw_multi_opaque_rect(&mut self, _order: &MultiOpaqueRect, _clip: &Rect) {}
    /// `bitmap` is the cache entry the order references.
    fn draw_mem_blt(&mut self, _order: &MemBlt, _clip: &Rect, _bitmap: &Bitmap) {}
    fn draw_mem3_blt(&mut self, _order: &Mem3Blt, _clip: &Rect, _bitmap: &Bitmap) {}
    fn draw_line_to(&mut self, _order: &LineTo, _clip: &Rect) {}
    fn draw_glyph_index(&mut self, _order: &GlyphIndex, _clip: &Rect, _glyphs: &GlyphCache) {}
    fn draw_polyline(&mut self, _order: &Polyline, _clip: &Rect) {}
    /// Glyph cache inserts are visible to sinks, bitmap cache inserts are not.
    fn draw_glyph_cache(&mut self, _order: &CacheGlyph) {}
    fn draw_frame_marker(&mut self, _order: &FrameMarker) {}
    /// Full bitmap update: wire header, raw (possibly compressed) payload
    /// and the decoded bitmap.
    fn draw_bitmap_update(&mut self, _header: &BitmapData, _raw: &[u8], _bitmap: &Bitmap) {}
    fn set_pointer(&mut self, _pointer: &Pointer) {}
    /// Buffered drawing must become visible.
    fn flush(&mut self) {}
}

/// Timing, input and image-frame visitor. Times are microseconds since the epoch.
pub trait CaptureSink {
    fn snapshot(&mut self, _now: u64, _mouse_x: u16, _mouse_y: u16, _ignore_frame: bool) {}
    fn input(&mut self, _now: u64, _keys: &[char]) {}
    fn external_time(&mut self, _now: u64) {}
    /// Recording segment boundary (every META chunk).
    fn external_breakpoint(&mut self) {}
    /// One decoded image-frame row, BGR.
    fn set_row(&mut self, _row: usize, _bgr: &[u8]) {}
}

/// A sink that is both; registered through a single borrow.
pub trait Device: GraphicSink + CaptureSink {}

impl<T: GraphicSink + CaptureSink> Device for T {}

/// One registered consumer; either half may be absent.
pub enum Consumer<'a> {
    Split {
        graphic: Option<&'a mut dyn GraphicSink>,
        capture: Option<&'a mut dyn CaptureSink>,
    },
    Device(&'a mut dyn Device),
}

impl<'a> Consumer<'a> {
    pub fn graphic(sink: &'a mut dyn GraphicSink) -> Self {
        Consumer::Split {
            graphic: Some(sink),
            capture: None,
        }
    }

    pub fn capture(sink: &'a mut dyn CaptureSink) -> Self {
        Consumer::Split {
            graphic: None,
            capture: Some(sink),
        }
    }

    pub fn pair(graphic: &'a mut dyn GraphicSink, capture: &'a mut dyn CaptureSink) -> Self {
        Consumer::Split {
            graphic: Some(graphic),
            capture: Some(capture),
        }
    }

    pub fn device(sink: &'a mut dyn Device) -> Self {
        Consumer::Device(sink)
    }

    pub fn graphic_sink(&mut self) -> Option<&mut dyn GraphicSink> {
        match self {
            Consumer::Split { graphic, .. } => {
                graphic.as_deref_mut().map(|g| g as &mut dyn GraphicSink)
            }
            Consumer::Device(d) => Some(&mut **d as &mut dyn GraphicSink),
        }
    }

    pub fn capture_sink(&mut self) -> Option<&mut dyn CaptureSink> {
        match self {
            Consumer::Split { capture, .. } => {
                capture.as_deref_mut().map(|c| c as &mut dyn CaptureSink)
            }
            Consumer::Device(d) => Some(&mut **d as &mut dyn CaptureSink),
        }
    }
}

/// Call `f` on every graphic sink in registration order.
pub fn each_graphic(consumers: &mut [Consumer<'_>], mut f: impl FnMut(&mut dyn GraphicSink)) {
    for c in consumers.iter_mut() {
        if let Some(g) = c.graphic_sink() {
            f(g);
        }
    }
}

/// Call `f` on every capture sink in registration order.
pub fn each_capture(consumers: &mut [Consumer<'_>], mut f: impl FnMut(&mut dyn CaptureSink)) {
    for c in consumers.iter_mut() {
        if let Some(s) = c.capture_sink() {
            f(s);
        }
    }
}

/// Tallies every callback by name.
#[derive(Debug, Clone, Default)]
pub struct OrderCounter {
    pub counts: BTreeMap<&'static str, u64>,
    pub first_time: Option<u64>,
    pub last_time: Option<u64>,
    pub keys: Vec<char>,
    pub rows: usize,
}

impl OrderCounter {
    fn bump(&mut self, name: &'static str) {
        *self.counts.entry(name).or_default() += 1;
    }

    pub fn count(&self, name: &str) -> u64 {
        self.counts.get(name).copied().unwrap_or(0)
    }

    /// Drawing callbacks, excluding flushes and capture events.
    pub fn drawing_orders(&self) -> u64 {
        self.counts
            .iter()
            .filter(|(k, _)| k.starts_with("draw_") || **k == "set_pointer")
            .map(|(_, v)| v)
            .sum()
    }
}

impl GraphicSink for OrderCounter {
    fn draw_dst_blt(&mut self, _: &DstBlt, _: &Rect) {
        self.bump("draw_dst_blt");
    }
    fn draw_multi_dst_blt(&mut self, _: &MultiDstBlt, _: &Rect) {
        self.bump("draw_multi_dst_blt");
    }
    fn draw_pat_blt(&mut self, _: &PatBlt, _: &Rect) {
        self.bump("draw_pat_blt");
    }
    fn draw_multi_pat_blt(&mut self, _: &MultiPatBlt, _: &Rect) {
        self.bump("draw_multi_pat_blt");
    }
    fn draw_scr_blt(&mut self, _: &ScrBlt, _: &Rect) {
        self.bump("draw_scr_blt");
    }
    fn draw_multi_scr_blt(&mut self, _: &MultiScrBlt, _: &Rect) {
        self.bump("draw_multi_scr_blt");
    }
    fn draw_opaque_rect(&mut self, _: &OpaqueRect, _: &Rect) {
        self.bump("draw_opaque_rect");
    }
    fn draw_multi_opaque_rect(&mut self, _: &MultiOpaqueRect, _: &Rect) {
        self.bump("draw_multi_opaque_rect");
    }
    fn draw_mem_blt(&mut self, _: &MemBlt, _: &Rect, _: &Bitmap) {
        self.bump("draw_mem_blt");
    }
    fn draw_mem3_blt(&mut self, _: &Mem3Blt, _: &Rect, _: &Bitmap) {
        self.bump("draw_mem3_blt");
    }
    fn draw_line_to(&mut self, _: &LineTo, _: &Rect) {
        self.bump("draw_line_to");
    }
    fn draw_glyph_index(&mut self, _: &GlyphIndex, _: &Rect, _: &GlyphCache) {
        self.bump("draw_glyph_index");
    }
    fn draw_polyline(&mut self, _: &Polyline, _: &Rect) {
        self.bump("draw_polyline");
    }
    fn draw_glyph_cache(&mut self, _: &CacheGlyph) {
        self.bump("draw_glyph_cache");
    }
    fn draw_frame_marker(&mut self, _: &FrameMarker) {
        self.bump("draw_frame_marker");
    }
    fn draw_bitmap_update(&mut self, _: &BitmapData, _: &[u8], _: &Bitmap) {
        self.bump("draw_bitmap_update");
    }
    fn set_pointer(&mut self, _: &Pointer) {
        self.bump("set_pointer");
    }
    fn flush(&mut self) {
        self.bump("flush");
    }
}

impl CaptureSink for OrderCounter {
    fn snapshot(&mut self, _: u64, _: u16, _: u16, _: bool) {
        self.bump("snapshot");
    }
    fn input(&mut self, _: u64, keys: &[char]) {
        self.bump("input");
        self.keys.extend_from_slice(keys);
    }
    fn external_time(&mut self, now: u64) {
        self.bump("external_time");
        self.first_time.get_or_insert(now);
        self.last_time = Some(now);
    }
    fn external_breakpoint(&mut self) {
        self.bump("external_breakpoint");
    }
    fn set_row(&mut self, _: usize, _: &[u8]) {
        self.bump("set_row");
        self.rows += 1;
    }
}

impl fmt::Display for OrderCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, count) in &self.counts {
            writeln!(f, "{:>24}: {}", name, count)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Flushes(u32);

    impl GraphicSink for Flushes {
        fn flush(&mut self) {
            self.0 += 1;
        }
    }

    #[test]
    fn test_fan_out_skips_absent_halves() {
        let mut flushes = Flushes::default();
        let mut counter = OrderCounter::default();
        {
            let mut consumers = vec![
                Consumer::graphic(&mut flushes),
                Consumer::device(&mut counter),
                Consumer::Split {
                    graphic: None,
                    capture: None,
                },
            ];
            each_graphic(&mut consumers, |g| g.flush());
            each_capture(&mut consumers, |c| c.external_time(5));
        }
        assert_eq!(flushes.0, 1);
        assert_eq!(counter.count("flush"), 1);
        assert_eq!(counter.first_time, Some(5));
    }

    #[test]
    fn test_counter_tallies_by_name() {
        let mut counter = OrderCounter::default();
        counter.draw_opaque_rect(&OpaqueRect::default(), &Rect::default());
        counter.draw_opaque_rect(&OpaqueRect::default(), &Rect::default());
        counter.flush();
        assert_eq!(counter.count("draw_opaque_rect"), 2);
        assert_eq!(counter.drawing_orders(), 2);
        assert!(counter.to_string().contains("draw_opaque_rect: 2"));
    }
}
