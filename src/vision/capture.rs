//! Frame acquisition
//!
//! The engine only talks to [`FrameSource`]. Whether a source is a recorded
//! stream or live capture is expressed through its capabilities
//! (`current_frame_index`, `supports_restart`), never through its type.

use crate::error::{CaptureError, EngineError};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use image::RgbImage;

/// A captured frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// RGB pixel data
    pub image: RgbImage,
    /// Monotonic index within the stream, when the source knows it
    pub index: Option<u64>,
}

impl Frame {
    /// Create a frame without a stream index (live capture)
    pub fn new(image: RgbImage) -> Self {
        Self { image, index: None }
    }

    /// Create a frame with a stream index (recorded stream)
    pub fn with_index(image: RgbImage, index: u64) -> Self {
        Self {
            image,
            index: Some(index),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Source of frames for the engine loop
pub trait FrameSource: Send {
    /// Next frame; `Ok(None)` means end of stream
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError>;

    /// Index of the most recently returned frame, if the source tracks one
    fn current_frame_index(&self) -> Option<u64> {
        None
    }

    /// Whether the stream can jump back to its start (loop / restart)
    fn supports_restart(&self) -> bool {
        false
    }
}

/// Supported frame file extensions
const FRAME_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Recorded stream read from a directory of images in lexical order
pub struct FrameSequenceSource {
    paths: Vec<PathBuf>,
    position: usize,
    loop_playback: bool,
    current_index: Option<u64>,
}

impl FrameSequenceSource {
    /// Open a directory of frame images. A missing or unreadable directory
    /// is [`EngineError::SourceUnavailable`].
    pub fn from_directory(dir: impl AsRef<Path>, loop_playback: bool) -> crate::error::Result<Self> {
        let unavailable = |source: std::io::Error| EngineError::SourceUnavailable {
            path: dir.as_ref().to_path_buf(),
            source,
        };

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir.as_ref()).map_err(unavailable)? {
            let path = entry.map_err(unavailable)?.path();
            let supported = path
                .extension()
                .map(|ext| {
                    let ext = ext.to_string_lossy().to_lowercase();
                    FRAME_EXTENSIONS.contains(&ext.as_str())
                })
                .unwrap_or(false);
            if supported {
                paths.push(path);
            }
        }
        paths.sort();

        log::info!(
            "Frame sequence {:?}: {} frames (loop: {})",
            dir.as_ref(),
            paths.len(),
            loop_playback
        );

        Ok(Self {
            paths,
            position: 0,
            loop_playback,
            current_index: None,
        })
    }

    /// Number of frames in the sequence
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for FrameSequenceSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.position >= self.paths.len() {
            if !self.loop_playback || self.paths.is_empty() {
                return Ok(None);
            }
            log::debug!("Frame sequence looped back to start");
            self.position = 0;
        }

        let index = self.position as u64;
        let path = &self.paths[self.position];
        self.position += 1;

        let image = image::open(path)
            .map_err(|source| CaptureError::Decode {
                path: path.clone(),
                source,
            })?
            .to_rgb8();

        self.current_index = Some(index);
        Ok(Some(Frame::with_index(image, index)))
    }

    fn current_frame_index(&self) -> Option<u64> {
        self.current_index
    }

    fn supports_restart(&self) -> bool {
        self.loop_playback
    }
}

/// In-memory source for tests and replay
#[derive(Default)]
pub struct MockFrameSource {
    frames: VecDeque<Result<Frame, CaptureError>>,
    current_index: Option<u64>,
    restartable: bool,
}

impl MockFrameSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue frames to be returned in order
    pub fn with_frames(mut self, frames: impl IntoIterator<Item = Frame>) -> Self {
        self.frames.extend(frames.into_iter().map(Ok));
        self
    }

    /// Queue an acquisition error
    pub fn with_error(mut self, error: CaptureError) -> Self {
        self.frames.push_back(Err(error));
        self
    }

    /// Report the restart capability
    pub fn with_restart(mut self, restartable: bool) -> Self {
        self.restartable = restartable;
        self
    }

    /// Frames (and errors) not yet consumed
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for MockFrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        match self.frames.pop_front() {
            Some(Ok(frame)) => {
                self.current_index = frame.index;
                Ok(Some(frame))
            }
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    fn current_frame_index(&self) -> Option<u64> {
        self.current_index
    }

    fn supports_restart(&self) -> bool {
        self.restartable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_mock_source_order() {
        let frames = (0..3).map(|i| Frame::with_index(RgbImage::new(2, 2), i));
        let mut source = MockFrameSource::new().with_frames(frames);

        assert_eq!(source.current_frame_index(), None);
        assert_eq!(source.next_frame().unwrap().unwrap().index, Some(0));
        assert_eq!(source.next_frame().unwrap().unwrap().index, Some(1));
        assert_eq!(source.current_frame_index(), Some(1));
        assert_eq!(source.next_frame().unwrap().unwrap().index, Some(2));
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_mock_source_error() {
        let mut source = MockFrameSource::new()
            .with_error(CaptureError::Transient("busy".into()))
            .with_frames([Frame::new(RgbImage::new(1, 1))]);

        assert!(source.next_frame().is_err());
        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!(frame.index, None);
    }

    #[test]
    fn test_frame_sequence_loops() {
        let dir = std::env::temp_dir().join(format!("roulette-vision-seq-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        for i in 0..2 {
            let img = RgbImage::from_pixel(4, 4, Rgb([i * 100, 0, 0]));
            img.save(dir.join(format!("frame_{:03}.png", i))).unwrap();
        }
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let mut source = FrameSequenceSource::from_directory(&dir, true).unwrap();
        assert_eq!(source.len(), 2);
        assert!(source.supports_restart());

        let indices: Vec<_> = (0..3)
            .map(|_| source.next_frame().unwrap().unwrap().index.unwrap())
            .collect();
        assert_eq!(indices, vec![0, 1, 0]);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_directory_is_unavailable() {
        let result = FrameSequenceSource::from_directory("/nonexistent/roulette-frames", false);
        match result {
            Err(EngineError::SourceUnavailable { path, source }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/roulette-frames"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            Err(other) => panic!("expected SourceUnavailable, got {:?}", other),
            Ok(_) => panic!("missing directory opened"),
        }
    }
}
