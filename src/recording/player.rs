//! Playback driver for WRM recordings.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use super::format::{ChunkHeader, ChunkType, MetaHeader};
use super::framer::ChunkFramer;
use super::interpreter::{Flow, ReplayState};
use super::sink::{Consumer, each_capture, each_graphic};
use crate::error::{ProtocolError, ReplayError, Result};
use crate::schema::PlayerConfig;
use crate::wire::Rect;

/// Consumers a player accepts.
pub const MAX_CONSUMERS: usize = 10;

/// Replays a recording into registered consumers.
///
/// Usage:
/// ```ignore
/// let mut counter = OrderCounter::default();
/// let mut player = Player::open(File::open("session.wrm")?, PlayerConfig::default())?;
/// player.add_consumer(Consumer::device(&mut counter))?;
/// let stats = player.play()?;
/// println!("{}", stats);
/// ```
pub struct Player<'a, R> {
    framer: ChunkFramer<R>,
    state: ReplayState,
    consumers: Vec<Consumer<'a>>,
    config: PlayerConfig,
    chunk: Option<ChunkHeader>,
    remaining: u16,
    stats: PlayStats,
}

impl<'a> Player<'a, BufReader<File>> {
    /// Open a recording file for playback.
    pub fn open_file<P: AsRef<Path>>(path: P, config: PlayerConfig) -> Result<Self> {
        Self::open(BufReader::new(File::open(path)?), config)
    }
}

impl<'a, R: Read> Player<'a, R> {
    /// Create a player without reading anything.
    pub fn new(reader: R, config: PlayerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            framer: ChunkFramer::new(reader),
            state: ReplayState::new(config.real_time),
            consumers: Vec::new(),
            config,
            chunk: None,
            remaining: 0,
            stats: PlayStats::default(),
        })
    }

    /// Create a player and read the recording up to its first META and
    /// TIMESTAMP, so screen geometry and start time are known before any
    /// consumer is registered.
    pub fn open(reader: R, config: PlayerConfig) -> Result<Self> {
        let mut player = Self::new(reader, config)?;
        while !(player.state.meta_ok() && player.state.timestamp_ok) {
            if !player.next_order()? {
                return Err(ReplayError::truncated(
                    "recording preamble",
                    ChunkHeader::SIZE,
                    0,
                ));
            }
            player.interpret_order()?;
        }
        Ok(player)
    }

    /// Register a consumer; at most [`MAX_CONSUMERS`].
    pub fn add_consumer(&mut self, consumer: Consumer<'a>) -> Result<()> {
        if self.consumers.len() >= MAX_CONSUMERS {
            return Err(ProtocolError::TooManyConsumers(MAX_CONSUMERS).into());
        }
        self.consumers.push(consumer);
        Ok(())
    }

    pub fn state(&self) -> &ReplayState {
        &self.state
    }

    pub fn meta(&self) -> Option<&MetaHeader> {
        self.state.meta.as_ref()
    }

    pub fn screen_rect(&self) -> Rect {
        self.state.screen_rect
    }

    /// Time of the last TIMESTAMP in microseconds since the epoch.
    pub fn record_now(&self) -> u64 {
        self.state.record_now
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn stats(&self) -> &PlayStats {
        &self.stats
    }

    /// Header of the chunk the next unit comes from.
    pub fn chunk_header(&self) -> Option<&ChunkHeader> {
        self.chunk.as_ref()
    }

    /// Advance to the next logical unit, fetching a new chunk (and flushing
    /// graphic sinks first) once the current one is consumed. Returns
    /// `false` on a clean end of stream.
    pub fn next_order(&mut self) -> Result<bool> {
        if self.remaining == 0 {
            each_graphic(&mut self.consumers, |g| g.flush());
            let header = loop {
                let Some(header) = self.framer.next_chunk()? else {
                    self.chunk = None;
                    return Ok(false);
                };
                self.stats.chunks += 1;
                if header.kind() == Some(ChunkType::Orders) && header.count == 0 {
                    log::debug!("skipping empty ORDERS chunk");
                    continue;
                }
                break header;
            };
            log::trace!(
                "chunk {:#06x}: {} bytes, {} units",
                header.chunk_type,
                header.size,
                header.count
            );
            self.remaining = header.count;
            self.chunk = Some(header);
        }
        self.remaining = self.remaining.saturating_sub(1);
        Ok(true)
    }

    /// Decode and dispatch the unit selected by [`Player::next_order`].
    pub fn interpret_order(&mut self) -> Result<()> {
        let Some(header) = self.chunk else {
            return Ok(());
        };
        let flow = self
            .state
            .interpret(&header, &mut self.framer, &mut self.consumers)?;
        if flow == Flow::EndOfChunk {
            self.remaining = 0;
        }
        self.stats.units += 1;
        if header.kind() == Some(ChunkType::Timestamp) {
            self.stats.timestamps += 1;
        }
        Ok(())
    }

    /// Play until the end of the recording, the configured unit limit or
    /// the end of the capture window. Stops at the first error; everything
    /// dispatched before it stays with the consumers.
    pub fn play(&mut self) -> Result<PlayStats> {
        let begin = self.config.begin_micros();
        let end = self.config.end_micros();
        let max = u64::from(self.config.max_order_count);
        let mut units = 0u64;

        while self.next_order()? {
            if let Err(e) = self.interpret_order() {
                log::error!("playback stopped after {} units: {}", units, e);
                return Err(e);
            }
            units += 1;

            let is_timestamp = self
                .chunk
                .is_some_and(|h| h.kind() == Some(ChunkType::Timestamp));
            let now = self.state.record_now;
            if is_timestamp && begin.is_none_or(|b| now >= b) {
                let (x, y) = (self.state.mouse_x, self.state.mouse_y);
                let ignore = self.state.ignore_frame;
                each_capture(&mut self.consumers, |c| c.snapshot(now, x, y, ignore));
                self.state.ignore_frame = false;
                self.stats.snapshots += 1;
            }

            if max > 0 && units >= max {
                log::info!("unit limit {} reached", max);
                break;
            }
            if end.is_some_and(|e| now > e) {
                log::info!("end of capture window reached at {}", now);
                break;
            }
        }

        each_graphic(&mut self.consumers, |g| g.flush());
        self.stats.first_timestamp = self.state.first_timestamp;
        self.stats.last_timestamp = Some(self.state.record_now);
        Ok(self.stats.clone())
    }
}

/// Counters from a playback run.
#[derive(Debug, Clone, Default)]
pub struct PlayStats {
    /// Chunks read, including those consumed while opening.
    pub chunks: u64,
    /// Logical units interpreted.
    pub units: u64,
    pub timestamps: u64,
    pub snapshots: u64,
    pub first_timestamp: Option<u64>,
    pub last_timestamp: Option<u64>,
}

impl PlayStats {
    /// Recorded duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        match (self.first_timestamp, self.last_timestamp) {
            (Some(first), Some(last)) => last.saturating_sub(first) as f64 / 1e6,
            _ => 0.0,
        }
    }
}

impl fmt::Display for PlayStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} chunks, {} units, {} timestamps, {} snapshots, {:.3}s recorded",
            self.chunks,
            self.units,
            self.timestamps,
            self.snapshots,
            self.duration_secs()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheGeometry, CacheTier, FontChar, POINTER_EDIT, Pointer};
    use crate::orders::{
        Bitmap, BitmapData, CacheGlyph, FrameMarker, GlyphEntry, MemBlt, OpaqueRect, SECONDARY,
        SecondaryHeader,
    };
    use crate::recording::format::{CompressionType, PointerRecord, TimestampInput};
    use crate::recording::recorder::{RecorderConfig, WrmRecorder};
    use crate::recording::sink::{CaptureSink, GraphicSink, OrderCounter};
    use crate::wire::OutStream;
    use proptest::prelude::*;
    use std::io::Cursor;
    use std::time::{Duration, Instant};

    const START: u64 = 1_352_304_810_000_000;
    const SECOND: u64 = 1_000_000;

    fn recorder(config: RecorderConfig) -> WrmRecorder<Vec<u8>> {
        WrmRecorder::new(Vec::new(), config).unwrap()
    }

    fn rect_order(i: i16) -> OpaqueRect {
        OpaqueRect {
            rect: Rect::new(i, i * 2, 40, 30),
            color: 0x00_10_20_30 + i as u32,
        }
    }

    /// One minute of recording: a timestamp per second, two rectangles each.
    fn minute_recording(config: RecorderConfig) -> Vec<u8> {
        let mut rec = recorder(config);
        let screen = rec.screen_rect();
        for s in 0..=60u64 {
            rec.timestamp(START + s * SECOND, None).unwrap();
            if s < 60 {
                rec.draw(&rect_order(s as i16), &screen).unwrap();
                rec.draw(&rect_order(s as i16 + 1), &Rect::new(0, 0, 100, 100))
                    .unwrap();
            }
        }
        rec.finish().unwrap().0
    }

    fn play_all(bytes: Vec<u8>, config: PlayerConfig) -> (Result<PlayStats>, OrderCounter) {
        let mut counter = OrderCounter::default();
        let result = {
            let mut player = Player::open(Cursor::new(bytes), config).unwrap();
            player.add_consumer(Consumer::device(&mut counter)).unwrap();
            player.play()
        };
        (result, counter)
    }

    /// Records every opaque rectangle with its clip.
    #[derive(Default)]
    struct Rects(Vec<(OpaqueRect, Rect)>);

    impl GraphicSink for Rects {
        fn draw_opaque_rect(&mut self, order: &OpaqueRect, clip: &Rect) {
            self.0.push((order.clone(), *clip));
        }
    }

    #[test]
    fn test_first_and_last_timestamp() {
        let bytes = minute_recording(RecorderConfig::default());
        let mut player = Player::open(Cursor::new(bytes), PlayerConfig::default()).unwrap();
        assert_eq!(player.record_now() / SECOND, 1_352_304_810);
        let stats = player.play().unwrap();
        assert_eq!(player.record_now() / SECOND, 1_352_304_870);
        assert_eq!(stats.duration_secs(), 60.0);
    }

    #[test]
    fn test_orders_reach_sinks_with_clip() {
        let bytes = minute_recording(RecorderConfig::default());
        let mut rects = Rects::default();
        let screen = {
            let mut player = Player::open(Cursor::new(bytes), PlayerConfig::default()).unwrap();
            player.add_consumer(Consumer::graphic(&mut rects)).unwrap();
            player.play().unwrap();
            player.screen_rect()
        };
        assert_eq!(rects.0.len(), 120);
        assert_eq!(rects.0[0], (rect_order(0), screen));
        assert_eq!(rects.0[1], (rect_order(1), Rect::new(0, 0, 100, 100)));
        assert_eq!(rects.0[119].0, rect_order(60));
    }

    #[test]
    fn test_compressed_channels_replay_identically() {
        let plain = minute_recording(RecorderConfig::default());
        let (_, expected) = play_all(plain, PlayerConfig::default());
        let mut modes = vec![CompressionType::Gzip];
        if cfg!(feature = "lz4") {
            modes.push(CompressionType::Lz4);
        }
        for compression in modes {
            let bytes = minute_recording(RecorderConfig {
                compression,
                ..Default::default()
            });
            let (result, counter) = play_all(bytes, PlayerConfig::default());
            result.unwrap();
            assert_eq!(counter.counts, expected.counts, "{:?}", compression);
        }
    }

    #[test]
    fn test_reset_returns_to_plain_channel() {
        let mut rec = recorder(RecorderConfig {
            compression: CompressionType::Gzip,
            ..Default::default()
        });
        rec.timestamp(START, None).unwrap();
        rec.reset().unwrap();
        rec.timestamp(START + SECOND, None).unwrap();
        let (bytes, _) = rec.finish().unwrap();
        let (result, counter) = play_all(bytes, PlayerConfig::default());
        assert_eq!(result.unwrap().last_timestamp, Some(START + SECOND));
        assert_eq!(counter.last_time, Some(START + SECOND));
    }

    #[test]
    fn test_redundant_meta_is_idempotent() {
        let mut rec = recorder(RecorderConfig::default());
        rec.timestamp(START, None).unwrap();
        rec.cache_bitmap(0, 3, &Bitmap::from_raw(24, 2, 2, &[7; 16]).unwrap())
            .unwrap();
        rec.write_meta().unwrap();
        rec.timestamp(START + SECOND, None).unwrap();
        let (bytes, _) = rec.finish().unwrap();

        let mut counter = OrderCounter::default();
        let mut player = Player::open(Cursor::new(bytes), PlayerConfig::default()).unwrap();
        player.add_consumer(Consumer::device(&mut counter)).unwrap();
        player.play().unwrap();
        let cache = player.state().bitmaps.as_ref().unwrap();
        assert!(cache.get(0, 3).unwrap().is_some());
        drop(player);
        assert_eq!(counter.count("external_breakpoint"), 1);
    }

    #[test]
    fn test_inconsistent_meta_is_fatal() {
        let mut first = recorder(RecorderConfig::default());
        first.timestamp(START, None).unwrap();
        let (mut bytes, _) = first.finish().unwrap();
        let second = recorder(RecorderConfig {
            width: 1024,
            ..Default::default()
        });
        bytes.extend(second.finish().unwrap().0);

        let (result, _) = play_all(bytes, PlayerConfig::default());
        let err = result.unwrap_err();
        assert!(matches!(
            err,
            ReplayError::Protocol(ProtocolError::InconsistentMeta(_))
        ));
    }

    #[test]
    fn test_orders_before_timestamp_rejected() {
        let mut rec = recorder(RecorderConfig::default());
        let screen = rec.screen_rect();
        rec.draw(&rect_order(1), &screen).unwrap();
        let (bytes, _) = rec.finish().unwrap();
        let err = Player::open(Cursor::new(bytes), PlayerConfig::default())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ReplayError::Protocol(ProtocolError::TimestampMissing("ORDERS"))
        ));
    }

    #[test]
    fn test_memblt_on_empty_slot_is_unresolved() {
        let mut rec = recorder(RecorderConfig::default());
        rec.timestamp(START, None).unwrap();
        let order = MemBlt {
            cache_id: 1,
            rect: Rect::new(0, 0, 8, 8),
            rop: 0xCC,
            cache_index: 42,
            ..Default::default()
        };
        let screen = rec.screen_rect();
        rec.draw(&order, &screen).unwrap();
        let (bytes, _) = rec.finish().unwrap();

        let (result, counter) = play_all(bytes, PlayerConfig::default());
        assert!(matches!(
            result.unwrap_err(),
            ReplayError::Protocol(ProtocolError::UnresolvedBitmap {
                cache_id: 1,
                cache_index: 42
            })
        ));
        assert_eq!(counter.count("draw_mem_blt"), 0);
    }

    #[test]
    fn test_memblt_resolves_cached_bitmap() {
        let bitmap = Bitmap::from_raw(24, 4, 4, &[0x55; 48]).unwrap();
        let mut rec = recorder(RecorderConfig::default());
        rec.timestamp(START, None).unwrap();
        rec.cache_bitmap(2, 7, &bitmap).unwrap();
        let order = MemBlt {
            cache_id: 2,
            rect: Rect::new(5, 5, 4, 4),
            rop: 0xCC,
            cache_index: 7,
            ..Default::default()
        };
        let screen = rec.screen_rect();
        rec.draw(&order, &screen).unwrap();
        let (bytes, _) = rec.finish().unwrap();

        #[derive(Default)]
        struct Blits(Vec<(MemBlt, Bitmap)>);
        impl GraphicSink for Blits {
            fn draw_mem_blt(&mut self, order: &MemBlt, _: &Rect, bitmap: &Bitmap) {
                self.0.push((order.clone(), bitmap.clone()));
            }
        }

        let mut blits = Blits::default();
        {
            let mut player = Player::open(Cursor::new(bytes), PlayerConfig::default()).unwrap();
            player.add_consumer(Consumer::graphic(&mut blits)).unwrap();
            player.play().unwrap();
        }
        assert_eq!(blits.0, vec![(order, bitmap)]);
    }

    #[test]
    fn test_unknown_secondary_skipped_exactly() {
        let mut rec = recorder(RecorderConfig::default());
        rec.timestamp(START, None).unwrap();
        let (mut bytes, _) = rec.finish().unwrap();

        // Brush cache order (unsupported) followed by a frame marker.
        let mut orders = OutStream::new();
        SecondaryHeader::encode(&mut orders, 0x07, 0, 20);
        orders.out_bytes(&[0xEE; 20]);
        FrameMarker { action: 1 }.encode(&mut orders);
        ChunkHeader::new(ChunkType::Orders, orders.len(), 2)
            .write_to(&mut bytes)
            .unwrap();
        bytes.extend_from_slice(orders.as_slice());

        let (result, counter) = play_all(bytes, PlayerConfig::default());
        result.unwrap();
        assert_eq!(counter.count("draw_frame_marker"), 1);
    }

    #[test]
    fn test_unknown_altsec_abandons_chunk() {
        let mut rec = recorder(RecorderConfig::default());
        rec.timestamp(START, None).unwrap();
        let (mut bytes, _) = rec.finish().unwrap();

        let mut orders = OutStream::new();
        orders.out_u8(SECONDARY | (0x0A << 2));
        orders.out_bytes(&[1, 2, 3]);
        FrameMarker { action: 0 }.encode(&mut orders);
        ChunkHeader::new(ChunkType::Orders, orders.len(), 2)
            .write_to(&mut bytes)
            .unwrap();
        bytes.extend_from_slice(orders.as_slice());
        let mut tail = recorder(RecorderConfig::default());
        tail.timestamp(START + SECOND, None).unwrap();
        let tail_bytes = tail.finish().unwrap().0;
        // Skip the tail's META, keep its TIMESTAMP.
        let meta_len = u32::from_le_bytes(tail_bytes[2..6].try_into().unwrap()) as usize;
        bytes.extend_from_slice(&tail_bytes[meta_len..]);

        let (result, counter) = play_all(bytes, PlayerConfig::default());
        assert_eq!(result.unwrap().last_timestamp, Some(START + SECOND));
        assert_eq!(counter.count("draw_frame_marker"), 0);
    }

    #[test]
    fn test_invalid_control_byte_is_fatal() {
        let mut rec = recorder(RecorderConfig::default());
        rec.timestamp(START, None).unwrap();
        let (mut bytes, _) = rec.finish().unwrap();
        ChunkHeader::new(ChunkType::Orders, 1, 1)
            .write_to(&mut bytes)
            .unwrap();
        bytes.push(0x00);
        let (result, _) = play_all(bytes, PlayerConfig::default());
        assert!(matches!(
            result.unwrap_err(),
            ReplayError::Protocol(ProtocolError::InvalidOrderClass(0x00))
        ));
    }

    #[test]
    fn test_unknown_chunk_type_is_fatal() {
        let mut rec = recorder(RecorderConfig::default());
        rec.timestamp(START, None).unwrap();
        let (mut bytes, _) = rec.finish().unwrap();
        ChunkHeader {
            chunk_type: 0x0777,
            size: 8,
            count: 1,
        }
        .write_to(&mut bytes)
        .unwrap();
        let (result, _) = play_all(bytes, PlayerConfig::default());
        assert!(matches!(
            result.unwrap_err(),
            ReplayError::Protocol(ProtocolError::UnknownChunkType(0x0777))
        ));
    }

    #[test]
    fn test_truncation_versus_clean_end() {
        let bytes = minute_recording(RecorderConfig::default());
        let (clean, _) = play_all(bytes.clone(), PlayerConfig::default());
        assert!(clean.is_ok());

        let mut cut = bytes;
        cut.truncate(cut.len() - 3);
        let (result, counter) = play_all(cut, PlayerConfig::default());
        assert!(result.unwrap_err().is_truncation());
        assert_eq!(counter.count("draw_opaque_rect"), 120);
    }

    #[test]
    fn test_begin_bound_filters_snapshots() {
        let bytes = minute_recording(RecorderConfig::default());
        let config = PlayerConfig {
            begin_capture: Some(1_352_304_850),
            ..Default::default()
        };
        let (result, counter) = play_all(bytes, config);
        result.unwrap();
        // Seconds 50..=60.
        assert_eq!(counter.count("snapshot"), 11);
        assert_eq!(counter.count("draw_opaque_rect"), 120);
    }

    #[test]
    fn test_end_bound_stops_playback() {
        let bytes = minute_recording(RecorderConfig::default());
        let config = PlayerConfig {
            end_capture: Some(1_352_304_820),
            ..Default::default()
        };
        let (result, _) = play_all(bytes, config);
        let stats = result.unwrap();
        assert_eq!(stats.last_timestamp, Some(START + 11 * SECOND));
    }

    #[test]
    fn test_max_order_count_stops_playback() {
        let bytes = minute_recording(RecorderConfig::default());
        let config = PlayerConfig {
            max_order_count: 5,
            ..Default::default()
        };
        let (result, counter) = play_all(bytes, config);
        result.unwrap();
        // Two rectangles, a timestamp, two rectangles.
        assert_eq!(counter.count("draw_opaque_rect"), 4);
        assert_eq!(counter.count("external_time"), 1);
    }

    #[test]
    fn test_real_time_pacing_sleeps() {
        let mut rec = recorder(RecorderConfig::default());
        rec.timestamp(START, None).unwrap();
        rec.timestamp(START + 60_000, None).unwrap();
        let (bytes, _) = rec.finish().unwrap();
        let config = PlayerConfig {
            real_time: true,
            ..Default::default()
        };
        let started = Instant::now();
        let (result, _) = play_all(bytes, config);
        result.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_timestamp_input_reaches_capture_sinks() {
        let mut rec = recorder(RecorderConfig::default());
        rec.timestamp(START, None).unwrap();
        let input = TimestampInput {
            mouse_x: 100,
            mouse_y: 200,
            ignore_frame: true,
            keys: vec!['h', 'é'],
        };
        rec.timestamp(START + SECOND, Some(input)).unwrap();
        let (bytes, _) = rec.finish().unwrap();

        #[derive(Default)]
        struct Snaps(Vec<(u64, u16, u16, bool)>);
        impl CaptureSink for Snaps {
            fn snapshot(&mut self, now: u64, x: u16, y: u16, ignore: bool) {
                self.0.push((now, x, y, ignore));
            }
        }

        let mut snaps = Snaps::default();
        let mut counter = OrderCounter::default();
        {
            let mut player = Player::open(Cursor::new(bytes), PlayerConfig::default()).unwrap();
            player.add_consumer(Consumer::capture(&mut snaps)).unwrap();
            player.add_consumer(Consumer::device(&mut counter)).unwrap();
            player.play().unwrap();
        }
        assert_eq!(snaps.0, vec![(START + SECOND, 100, 200, true)]);
        assert_eq!(counter.keys, vec!['h', 'é']);
    }

    #[test]
    fn test_pointer_builtins_and_miss() {
        let mut shape = Pointer::blank();
        shape.hotspot_x = 9;
        let mut rec = recorder(RecorderConfig::default());
        rec.timestamp(START, None).unwrap();
        rec.pointer(&PointerRecord {
            mouse_x: 1,
            mouse_y: 2,
            cache_index: POINTER_EDIT,
            shape: None,
        })
        .unwrap();
        rec.pointer(&PointerRecord {
            mouse_x: 3,
            mouse_y: 4,
            cache_index: 6,
            shape: Some(shape.clone()),
        })
        .unwrap();
        rec.pointer(&PointerRecord {
            mouse_x: 3,
            mouse_y: 4,
            cache_index: 6,
            shape: None,
        })
        .unwrap();
        let (mut bytes, _) = rec.finish().unwrap();

        #[derive(Default)]
        struct Pointers(Vec<Pointer>);
        impl GraphicSink for Pointers {
            fn set_pointer(&mut self, pointer: &Pointer) {
                self.0.push(pointer.clone());
            }
        }

        let mut pointers = Pointers::default();
        {
            let mut player =
                Player::open(Cursor::new(bytes.clone()), PlayerConfig::default()).unwrap();
            player.add_consumer(Consumer::graphic(&mut pointers)).unwrap();
            player.play().unwrap();
            assert_eq!(
                (player.state().mouse_x, player.state().mouse_y),
                (3, 4)
            );
        }
        assert_eq!(pointers.0, vec![Pointer::edit(), shape.clone(), shape]);

        let mut miss = OutStream::new();
        PointerRecord {
            mouse_x: 0,
            mouse_y: 0,
            cache_index: 20,
            shape: None,
        }
        .encode(&mut miss);
        ChunkHeader::new(ChunkType::Pointer, miss.len(), 1)
            .write_to(&mut bytes)
            .unwrap();
        bytes.extend_from_slice(miss.as_slice());
        let (result, _) = play_all(bytes, PlayerConfig::default());
        assert!(matches!(
            result.unwrap_err(),
            ReplayError::Protocol(ProtocolError::PointerCacheMiss(20))
        ));
    }

    #[test]
    fn test_image_frame_rows_reach_capture_sinks() {
        let config = RecorderConfig {
            width: 32,
            height: 16,
            ..Default::default()
        };
        let bgr: Vec<u8> = (0..32 * 16 * 3).map(|i| (i % 251) as u8).collect();
        let mut rec = recorder(config);
        rec.timestamp(START, None).unwrap();
        rec.image_frame(32, 16, &bgr).unwrap();
        rec.timestamp(START + SECOND, None).unwrap();
        let (bytes, _) = rec.finish().unwrap();

        #[derive(Default)]
        struct Rows(Vec<u8>);
        impl CaptureSink for Rows {
            fn set_row(&mut self, _: usize, row: &[u8]) {
                self.0.extend_from_slice(row);
            }
        }

        let mut rows = Rows::default();
        {
            let mut player =
                Player::open(Cursor::new(bytes.clone()), PlayerConfig::default()).unwrap();
            player.add_consumer(Consumer::capture(&mut rows)).unwrap();
            player.play().unwrap();
        }
        assert_eq!(rows.0, bgr);

        // Without capture sinks the frame is skipped and playback stays aligned.
        let mut rects = Rects::default();
        let mut player = Player::open(Cursor::new(bytes), PlayerConfig::default()).unwrap();
        player.add_consumer(Consumer::graphic(&mut rects)).unwrap();
        let stats = player.play().unwrap();
        assert_eq!(stats.last_timestamp, Some(START + SECOND));
    }

    #[test]
    fn test_bitmap_update_forwarded() {
        let pixels = vec![0x20u8; 8 * 2 * 3];
        let header = BitmapData {
            dest_left: 10,
            dest_top: 10,
            dest_right: 17,
            dest_bottom: 11,
            width: 8,
            height: 2,
            bits_per_pixel: 24,
            bitmap_length: pixels.len() as u16,
            ..Default::default()
        };
        let mut rec = recorder(RecorderConfig::default());
        rec.timestamp(START, None).unwrap();
        rec.bitmap_update(&header, &pixels).unwrap();
        let (bytes, _) = rec.finish().unwrap();

        #[derive(Default)]
        struct Updates(Vec<(BitmapData, Vec<u8>, Bitmap)>);
        impl GraphicSink for Updates {
            fn draw_bitmap_update(&mut self, h: &BitmapData, raw: &[u8], bmp: &Bitmap) {
                self.0.push((h.clone(), raw.to_vec(), bmp.clone()));
            }
        }

        let mut updates = Updates::default();
        {
            let mut player = Player::open(Cursor::new(bytes), PlayerConfig::default()).unwrap();
            player.add_consumer(Consumer::graphic(&mut updates)).unwrap();
            player.play().unwrap();
        }
        assert_eq!(updates.0.len(), 1);
        assert_eq!(updates.0[0].0, header);
        assert_eq!(updates.0[0].1, pixels);
        assert_eq!(updates.0[0].2, Bitmap::from_raw(24, 8, 2, &pixels).unwrap());
    }

    #[test]
    fn test_save_state_restores_order_state() {
        let mut rec = recorder(RecorderConfig::default());
        let screen = rec.screen_rect();
        rec.timestamp(START, None).unwrap();
        rec.draw(&rect_order(7), &screen).unwrap();
        rec.save_state().unwrap();
        let (bytes, _) = rec.finish().unwrap();

        let mut player = Player::open(Cursor::new(bytes), PlayerConfig::default()).unwrap();
        player.play().unwrap();
        assert_eq!(player.state().orders.opaquerect, rect_order(7));
    }

    #[test]
    fn test_glyph_cache_forwarded_and_stored() {
        let order = CacheGlyph {
            cache_id: 2,
            glyphs: vec![GlyphEntry {
                cache_index: 9,
                glyph: FontChar {
                    offset: 0,
                    baseline: -7,
                    width: 5,
                    height: 8,
                    data: vec![0xF8; 8],
                },
            }],
        };
        let mut rec = recorder(RecorderConfig::default());
        rec.timestamp(START, None).unwrap();
        rec.cache_glyph(&order).unwrap();
        let (bytes, _) = rec.finish().unwrap();

        let mut counter = OrderCounter::default();
        let mut player = Player::open(Cursor::new(bytes), PlayerConfig::default()).unwrap();
        player.add_consumer(Consumer::device(&mut counter)).unwrap();
        player.play().unwrap();
        let glyph = player.state().glyphs.get(2, 9).unwrap().unwrap();
        assert_eq!(glyph.baseline, -7);
        drop(player);
        assert_eq!(counter.count("draw_glyph_cache"), 1);
    }

    #[test]
    fn test_rerecording_reproduces_the_stream() {
        let bitmap = Bitmap::from_raw(24, 4, 4, &[0x33; 48]).unwrap();
        let geometry = CacheGeometry {
            tiers: vec![
                CacheTier::new(120, 768, false),
                CacheTier::new(120, 3072, false),
                CacheTier::new(2553, 12288, false),
            ],
            use_waiting_list: false,
        };
        let config = RecorderConfig {
            geometry,
            ..Default::default()
        };
        let mut rec = recorder(config.clone());
        let screen = rec.screen_rect();
        rec.timestamp(START, None).unwrap();
        rec.cache_bitmap(0, 1, &bitmap).unwrap();
        rec.draw(
            &MemBlt {
                cache_id: 0,
                rect: Rect::new(0, 0, 4, 4),
                rop: 0xCC,
                cache_index: 1,
                ..Default::default()
            },
            &screen,
        )
        .unwrap();
        rec.draw(&rect_order(3), &Rect::new(1, 1, 50, 50)).unwrap();
        rec.timestamp(START + SECOND, None).unwrap();
        let (original, _) = rec.finish().unwrap();

        let mut copy = recorder(config);
        {
            // Not opened: the copy must see the first META and TIMESTAMP too.
            let mut player =
                Player::new(Cursor::new(original.clone()), PlayerConfig::default()).unwrap();
            player.add_consumer(Consumer::device(&mut copy)).unwrap();
            player.play().unwrap();
        }
        let (rerecorded, _) = copy.finish().unwrap();

        let (_, a) = play_all(original, PlayerConfig::default());
        let (_, b) = play_all(rerecorded, PlayerConfig::default());
        assert_eq!(a.count("draw_mem_blt"), 1);
        assert_eq!(a.count("draw_mem_blt"), b.count("draw_mem_blt"));
        assert_eq!(a.count("draw_opaque_rect"), b.count("draw_opaque_rect"));
        assert_eq!(a.last_time, b.last_time);
    }

    #[test]
    fn test_consumer_limit() {
        let bytes = minute_recording(RecorderConfig::default());
        let mut counters: Vec<OrderCounter> = vec![OrderCounter::default(); MAX_CONSUMERS + 1];
        let mut player = Player::open(Cursor::new(bytes), PlayerConfig::default()).unwrap();
        let mut iter = counters.iter_mut();
        for counter in iter.by_ref().take(MAX_CONSUMERS) {
            player.add_consumer(Consumer::device(counter)).unwrap();
        }
        let extra = iter.next().unwrap();
        assert!(matches!(
            player.add_consumer(Consumer::device(extra)),
            Err(ReplayError::Protocol(ProtocolError::TooManyConsumers(10)))
        ));
    }

    proptest! {
        #[test]
        fn prop_arbitrary_orders_never_panic(
            body in proptest::collection::vec(any::<u8>(), 1..512),
            count in 1u16..64,
        ) {
            let mut rec = recorder(RecorderConfig::default());
            rec.timestamp(START, None).unwrap();
            let (mut bytes, _) = rec.finish().unwrap();
            ChunkHeader::new(ChunkType::Orders, body.len(), count)
                .write_to(&mut bytes)
                .unwrap();
            bytes.extend_from_slice(&body);
            let mut counter = OrderCounter::default();
            let mut player = Player::open(Cursor::new(bytes), PlayerConfig::default()).unwrap();
            player.add_consumer(Consumer::device(&mut counter)).unwrap();
            let _ = player.play();
        }
    }
}
