//! Animated GIF played back as the live video source.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek};
use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use image::codecs::gif::GifDecoder;
use image::AnimationDecoder;
use renderer::{ChannelFeed, VideoFrame};

/// Frames with no usable delay play at the rate browsers fall back to.
const FALLBACK_DELAY: Duration = Duration::from_millis(100);
const FEED_CAPACITY: usize = 2;

#[derive(Clone, Debug)]
pub struct TimedFrame {
    pub frame: VideoFrame,
    pub delay: Duration,
}

pub fn decode_frames<R: BufRead + Seek>(reader: R) -> Result<Vec<TimedFrame>> {
    let decoder = GifDecoder::new(reader).context("failed to read GIF header")?;
    let frames = decoder
        .into_frames()
        .collect_frames()
        .context("failed to decode GIF frames")?;

    Ok(frames
        .into_iter()
        .map(|frame| {
            let (numer, denom) = frame.delay().numer_denom_ms();
            let millis = if denom == 0 { 0 } else { numer / denom };
            let delay = if millis == 0 {
                FALLBACK_DELAY
            } else {
                Duration::from_millis(u64::from(millis))
            };
            let buffer = frame.into_buffer();
            TimedFrame {
                frame: VideoFrame {
                    width: buffer.width(),
                    height: buffer.height(),
                    rgba: buffer.into_raw(),
                },
                delay,
            }
        })
        .collect())
}

/// Opens `path` and streams its frames into a [`ChannelFeed`] from a
/// producer thread. `loops == 0` repeats until the feed is dropped.
pub fn spawn_gif_feed(path: &Path, loops: u32) -> Result<(ChannelFeed, JoinHandle<()>)> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let (tx, feed) = ChannelFeed::bounded(FEED_CAPACITY);
    let label = path.display().to_string();
    let handle = thread::Builder::new()
        .name("rampwarp-feed".into())
        .spawn(move || match decode_frames(BufReader::new(file)) {
            Ok(frames) => {
                tracing::info!(source = %label, frames = frames.len(), loops, "video feed started");
                let passes = play(&frames, loops, &tx, thread::sleep);
                tracing::info!(source = %label, passes, "video feed finished");
            }
            Err(err) => tracing::error!(source = %label, error = %err, "video feed failed"),
        })
        .context("failed to spawn video feed thread")?;
    Ok((feed, handle))
}

/// Sends every frame `loops` times (forever when zero), waiting out each
/// frame's delay. Returns the number of completed passes; stops early once the
/// receiving side is gone.
fn play(
    frames: &[TimedFrame],
    loops: u32,
    tx: &Sender<VideoFrame>,
    mut wait: impl FnMut(Duration),
) -> u32 {
    if frames.is_empty() {
        return 0;
    }
    let mut passes = 0;
    while loops == 0 || passes < loops {
        for timed in frames {
            if tx.send(timed.frame.clone()).is_err() {
                return passes;
            }
            wait(timed.delay);
        }
        passes += 1;
    }
    passes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use image::codecs::gif::{GifEncoder, Repeat};
    use image::{Delay, Frame, Rgba, RgbaImage};
    use renderer::{FeedEvent, VideoFeed};

    fn sample_gif(delays_ms: &[u32]) -> Vec<u8> {
        let mut bytes = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut bytes);
            encoder.set_repeat(Repeat::Infinite).unwrap();
            for (index, delay) in delays_ms.iter().enumerate() {
                let shade = (index * 60) as u8;
                let image = RgbaImage::from_pixel(4, 3, Rgba([shade, 0, 255 - shade, 255]));
                let frame = Frame::from_parts(image, 0, 0, Delay::from_numer_denom_ms(*delay, 1));
                encoder.encode_frame(frame).unwrap();
            }
        }
        bytes
    }

    #[test]
    fn decodes_frames_with_native_delays() {
        let frames = decode_frames(Cursor::new(sample_gif(&[50, 0, 120]))).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!((frames[0].frame.width, frames[0].frame.height), (4, 3));
        assert_eq!(frames[0].frame.rgba.len(), 4 * 3 * 4);
        assert_eq!(frames[0].delay, Duration::from_millis(50));
        assert_eq!(frames[1].delay, FALLBACK_DELAY);
        assert_eq!(frames[2].delay, Duration::from_millis(120));
    }

    #[test]
    fn garbage_input_is_an_error() {
        assert!(decode_frames(Cursor::new(b"not a gif".to_vec())).is_err());
    }

    #[test]
    fn play_repeats_requested_passes_then_ends() {
        let frames = decode_frames(Cursor::new(sample_gif(&[40, 40]))).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut waited = Duration::ZERO;
        let passes = play(&frames, 3, &tx, |delay| waited += delay);
        drop(tx);

        assert_eq!(passes, 3);
        assert_eq!(rx.iter().count(), 6);
        assert_eq!(waited, Duration::from_millis(240));
    }

    #[test]
    fn play_stops_when_receiver_is_dropped() {
        let frames = decode_frames(Cursor::new(sample_gif(&[10]))).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        drop(rx);
        assert_eq!(play(&frames, 0, &tx, |_| {}), 0);
    }

    #[test]
    fn spawned_feed_ends_after_last_pass() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("clip.gif");
        std::fs::write(&path, sample_gif(&[10, 10])).unwrap();

        let (mut feed, handle) = spawn_gif_feed(&path, 1).unwrap();
        assert!(handle.join().is_ok(), "feed thread panicked");

        assert!(matches!(feed.poll_frame(), FeedEvent::Frame(_)));
        assert!(matches!(feed.poll_frame(), FeedEvent::Ended));
    }
}
