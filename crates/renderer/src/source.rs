//! Image provider behind the base texture.
//!
//! [`FrameSource`] is either the built-in procedural pattern or a live
//! [`VideoFeed`]. A feed only takes over once it has delivered a frame; losing
//! it at any point drops straight back to the procedural pattern and forces a
//! full re-upload so no stale video frame stays bound.

use std::f32::consts::TAU;
use std::fmt;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use image::imageops::flip_vertical_in_place;
use image::{Rgba, RgbaImage};

/// Edge length of the procedural pattern.
pub const PROCEDURAL_SIZE: u32 = 512;

const CHECKER_CELL: u32 = 32;
const SINE_PERIODS: f32 = 3.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceState {
    Procedural,
    LiveVideo { ready: bool },
}

/// Which scanline a pixel buffer stores first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowOrigin {
    Top,
    Bottom,
}

impl RowOrigin {
    /// The base texture wants bottom-origin rows.
    pub fn flip_rows(self) -> bool {
        matches!(self, RowOrigin::Top)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadKind {
    /// Reallocate the base texture from scratch.
    Full,
    /// Write into the existing texture when dimensions match.
    Update,
}

/// Pixels bound for the base texture, with their row order.
#[derive(Clone)]
pub struct ImageUpload {
    pub image: RgbaImage,
    pub origin: RowOrigin,
    pub kind: UploadKind,
}

impl ImageUpload {
    /// Consumes the upload and returns bottom-origin rows ready for the GPU.
    pub fn into_texture_rows(self) -> RgbaImage {
        let mut image = self.image;
        if self.origin.flip_rows() {
            flip_vertical_in_place(&mut image);
        }
        image
    }
}

impl fmt::Debug for ImageUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageUpload")
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .field("origin", &self.origin)
            .field("kind", &self.kind)
            .finish()
    }
}

/// One decoded video frame: tightly packed RGBA8, top row first.
#[derive(Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgba.len())
            .finish()
    }
}

#[derive(Debug)]
pub enum FeedEvent {
    Frame(VideoFrame),
    /// No new frame since the last poll.
    Idle,
    Ended,
    Failed(String),
}

/// External video provider polled once per render tick.
pub trait VideoFeed: Send {
    fn poll_frame(&mut self) -> FeedEvent;
}

/// Acquisition status reported alongside a feed by its owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FeedStatus {
    #[default]
    Inactive,
    Pending,
    Active,
    Error,
}

/// [`VideoFeed`] over a crossbeam channel; a dropped sender ends the stream.
pub struct ChannelFeed {
    frames: Receiver<VideoFrame>,
}

impl ChannelFeed {
    pub fn new(frames: Receiver<VideoFrame>) -> Self {
        Self { frames }
    }

    pub fn bounded(capacity: usize) -> (Sender<VideoFrame>, Self) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (tx, Self::new(rx))
    }
}

impl VideoFeed for ChannelFeed {
    fn poll_frame(&mut self) -> FeedEvent {
        let mut latest = None;
        loop {
            match self.frames.try_recv() {
                Ok(frame) => latest = Some(frame),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if latest.is_none() {
                        return FeedEvent::Ended;
                    }
                    break;
                }
            }
        }
        latest.map_or(FeedEvent::Idle, FeedEvent::Frame)
    }
}

/// Two-state image provider for the base texture.
pub struct FrameSource {
    state: SourceState,
    feed: Option<Box<dyn VideoFeed>>,
    procedural: RgbaImage,
    procedural_pending: bool,
}

impl Default for FrameSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource {
    pub fn new() -> Self {
        Self {
            state: SourceState::Procedural,
            feed: None,
            procedural: procedural_image(),
            procedural_pending: true,
        }
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    /// Row order of the image currently bound, or about to be.
    pub fn origin(&self) -> RowOrigin {
        match self.state {
            SourceState::LiveVideo { ready: true } => RowOrigin::Top,
            _ => RowOrigin::Bottom,
        }
    }

    pub fn procedural(&self) -> &RgbaImage {
        &self.procedural
    }

    /// A freshly created context starts out holding the procedural image, so
    /// there is nothing to re-upload, and a live feed must deliver again.
    pub fn on_context_restored(&mut self) {
        self.procedural_pending = false;
        if let SourceState::LiveVideo { ready: true } = self.state {
            self.state = SourceState::LiveVideo { ready: false };
        }
    }

    /// Starts listening to a feed; the procedural image stays bound until
    /// its first frame arrives.
    pub fn attach(&mut self, feed: Box<dyn VideoFeed>) {
        if matches!(self.state, SourceState::LiveVideo { ready: true }) {
            self.procedural_pending = true;
        }
        self.feed = Some(feed);
        self.state = SourceState::LiveVideo { ready: false };
        tracing::debug!("video feed attached; waiting for first frame");
    }

    /// Drops the feed and reverts to the procedural pattern.
    pub fn detach(&mut self, reason: &str) {
        if self.feed.is_none() && self.state == SourceState::Procedural {
            return;
        }
        tracing::warn!(reason, "video source lost; reverting to procedural image");
        self.feed = None;
        self.state = SourceState::Procedural;
        self.procedural_pending = true;
    }

    /// Applies the owner's view of the feed. Only presence, readiness and
    /// loss matter here.
    pub fn sync(&mut self, status: FeedStatus, feed: Option<Box<dyn VideoFeed>>) {
        match (status, feed) {
            (FeedStatus::Active | FeedStatus::Pending, Some(feed)) => self.attach(feed),
            (FeedStatus::Error, _) => self.detach("feed reported an error"),
            (_, _) => self.detach("feed released"),
        }
    }

    /// Polls the feed and returns the next image to bind, if any.
    pub fn poll(&mut self) -> Option<ImageUpload> {
        if let SourceState::LiveVideo { ready } = self.state {
            let event = match self.feed.as_mut() {
                Some(feed) => feed.poll_frame(),
                None => FeedEvent::Ended,
            };
            match event {
                FeedEvent::Frame(frame) => match frame_to_image(frame) {
                    Some(image) => {
                        self.state = SourceState::LiveVideo { ready: true };
                        self.procedural_pending = false;
                        return Some(ImageUpload {
                            image,
                            origin: RowOrigin::Top,
                            kind: if ready {
                                UploadKind::Update
                            } else {
                                UploadKind::Full
                            },
                        });
                    }
                    None => self.detach("video frame has mismatched dimensions"),
                },
                FeedEvent::Idle => {}
                FeedEvent::Ended => self.detach("end of stream"),
                FeedEvent::Failed(message) => self.detach(&message),
            }
        }

        if self.procedural_pending && self.origin() == RowOrigin::Bottom {
            self.procedural_pending = false;
            return Some(ImageUpload {
                image: self.procedural.clone(),
                origin: RowOrigin::Bottom,
                kind: UploadKind::Full,
            });
        }
        None
    }
}

fn frame_to_image(frame: VideoFrame) -> Option<RgbaImage> {
    if frame.width == 0 || frame.height == 0 {
        return None;
    }
    RgbaImage::from_raw(frame.width, frame.height, frame.rgba)
}

/// Deterministic fallback image, stored bottom row first.
///
/// Red follows a horizontal gradient, green a vertical sinusoid and blue a
/// checker stripe.
pub fn procedural_image() -> RgbaImage {
    let size = PROCEDURAL_SIZE;
    let span = (size - 1) as f32;
    RgbaImage::from_fn(size, size, |x, row| {
        let fx = x as f32 / span;
        let fy = row as f32 / span;
        let red = fx * 255.0;
        let green = (0.5 + 0.5 * (fy * TAU * SINE_PERIODS).sin()) * 255.0;
        let blue = if (x / CHECKER_CELL + row / CHECKER_CELL) % 2 == 0 {
            200
        } else {
            55
        };
        Rgba([red.round() as u8, green.round() as u8, blue, 255])
    })
}
