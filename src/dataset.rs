//! On-disk layout of captured datasets.
//!
//! This module owns the naming contract shared by the capture loop, the SGM
//! post-processing step and any consumer reading the data back:
//!
//! ```text
//! object_XX/environment_NNNN/sequence_NNNNN/
//!   images/left/frame_NNNNNNNNNN.png
//!   images/right/frame_NNNNNNNNNN.png
//!   disparity/frame_NNNNNNNNNN.npy
//!   timestamps.txt
//! ```
//!
//! # Reading a Sequence Back
//!
//! ```ignore
//! use flightmare_dataset::dataset::CapturedSequence;
//!
//! let sequence = CapturedSequence::load("data/object_01/environment_0000/sequence_00000")?;
//! sequence.validate(0.01)?;
//! let disparity = sequence.load_disparity(0)?;
//! ```

use crate::{CameraConfig, CaptureError, SessionConfig};
use image::RgbImage;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Left camera images, relative to a sequence directory
pub const LEFT_IMAGES_DIR: &str = "images/left";
/// Right camera images, relative to a sequence directory
pub const RIGHT_IMAGES_DIR: &str = "images/right";
/// Disparity arrays, relative to a sequence directory
pub const DISPARITY_DIR: &str = "disparity";
/// Timestamp log name
pub const TIMESTAMPS_FILE: &str = "timestamps.txt";
/// Session manifest name, written in the session root
pub const MANIFEST_FILE: &str = "session.json";

/// Manifest format version
pub const MANIFEST_VERSION: &str = "1.0";

/// `object_XX`
pub fn object_dir_name(object_type: u32) -> String {
    format!("object_{:02}", object_type)
}

/// `environment_NNNN`
pub fn environment_dir_name(index: usize) -> String {
    format!("environment_{:04}", index)
}

/// `sequence_NNNNN`
pub fn sequence_dir_name(index: usize) -> String {
    format!("sequence_{:05}", index)
}

/// `frame_NNNNNNNNNN`, without extension
pub fn frame_stem(frame_id: usize) -> String {
    format!("frame_{:010}", frame_id)
}

/// Paths of one captured sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequenceLayout {
    root: PathBuf,
}

impl SequenceLayout {
    /// Sequence `sequence` of environment `environment` under `save_root`.
    pub fn new(save_root: &Path, environment: usize, sequence: usize) -> Self {
        Self {
            root: save_root
                .join(environment_dir_name(environment))
                .join(sequence_dir_name(sequence)),
        }
    }

    /// Use an existing sequence directory.
    pub fn from_root<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn left_dir(&self) -> PathBuf {
        self.root.join(LEFT_IMAGES_DIR)
    }

    pub fn right_dir(&self) -> PathBuf {
        self.root.join(RIGHT_IMAGES_DIR)
    }

    pub fn disparity_dir(&self) -> PathBuf {
        self.root.join(DISPARITY_DIR)
    }

    pub fn timestamps_path(&self) -> PathBuf {
        self.root.join(TIMESTAMPS_FILE)
    }

    pub fn left_frame(&self, frame_id: usize) -> PathBuf {
        self.left_dir().join(format!("{}.png", frame_stem(frame_id)))
    }

    pub fn right_frame(&self, frame_id: usize) -> PathBuf {
        self.right_dir().join(format!("{}.png", frame_stem(frame_id)))
    }

    pub fn disparity_frame(&self, frame_id: usize) -> PathBuf {
        self.disparity_dir().join(format!("{}.npy", frame_stem(frame_id)))
    }

    /// Create the image and disparity directories (existing ones are kept).
    pub fn create(&self) -> io::Result<()> {
        fs::create_dir_all(self.left_dir())?;
        fs::create_dir_all(self.right_dir())?;
        fs::create_dir_all(self.disparity_dir())?;
        Ok(())
    }
}

/// Format a timestamp the way the downstream tools parse it (`0.0`, `0.25`, `0.030000000000000002`).
pub fn format_timestamp(seconds: f64) -> String {
    format!("{:?}", seconds)
}

/// Write `count` lines where line `i` is `i * sim_dt`.
///
/// The values are index based, not the simulated time at which each frame was
/// rendered.
pub fn write_timestamps(path: &Path, count: usize, sim_dt: f64) -> io::Result<()> {
    let mut writer = BufWriter::new(fs::File::create(path)?);
    for i in 0..count {
        writeln!(writer, "{}", format_timestamp(i as f64 * sim_dt))?;
    }
    writer.flush()
}

/// Parse a timestamp log, one value per non-empty line.
pub fn read_timestamps(path: &Path) -> Result<Vec<f64>, CaptureError> {
    let reader = BufReader::new(fs::File::open(path)?);
    let mut timestamps = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value = trimmed.parse::<f64>().map_err(|e| CaptureError::Inconsistent {
            path: path.to_path_buf(),
            message: format!("line {}: {}", line_no + 1, e),
        })?;
        timestamps.push(value);
    }
    Ok(timestamps)
}

/// Save an RGB image as PNG.
pub fn save_rgb_png(image: &RgbImage, path: &Path) -> Result<(), CaptureError> {
    image.save_with_format(path, image::ImageFormat::Png)?;
    Ok(())
}

/// Save a disparity map as a `.npy` array (`<f4`, `height × width`).
pub fn save_disparity_npy(disparity: &Array2<f32>, path: &Path) -> Result<(), CaptureError> {
    ndarray_npy::write_npy(path, disparity)?;
    Ok(())
}

/// Count non-hidden files with extension `ext` directly inside `dir`.
///
/// A missing directory counts as empty.
pub fn count_files(dir: &Path, ext: &str) -> io::Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut count = 0;
    for entry in entries {
        let path = entry?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if !hidden && path.extension().is_some_and(|e| e == ext) {
            count += 1;
        }
    }
    Ok(count)
}

/// Session parameters recorded next to the captured environments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionManifest {
    pub version: String,
    pub object_type: u32,
    pub render_enabled: bool,
    pub radius: f32,
    pub sim_dt: f64,
    pub duration: f64,
    pub start_save_frame: u64,
    pub max_env: usize,
    pub camera: CameraConfig,
}

impl SessionManifest {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            object_type: config.object_type,
            render_enabled: config.render_enabled,
            radius: config.radius,
            sim_dt: config.sim_dt,
            duration: config.duration,
            start_save_frame: config.start_save_frame,
            max_env: config.max_env,
            camera: config.camera.clone(),
        }
    }

    /// Write `session.json` into `save_root`.
    pub fn write(&self, save_root: &Path) -> Result<PathBuf, CaptureError> {
        let path = save_root.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;
        Ok(path)
    }

    /// Read `session.json` from `save_root`.
    pub fn load(save_root: &Path) -> Result<Self, CaptureError> {
        let json = fs::read_to_string(save_root.join(MANIFEST_FILE))?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// A captured sequence read back from disk.
#[derive(Debug, Clone)]
pub struct CapturedSequence {
    layout: SequenceLayout,
    /// Number of left images
    pub left_frames: usize,
    /// Number of right images
    pub right_frames: usize,
    /// Number of disparity arrays
    pub disparity_frames: usize,
    /// Parsed `timestamps.txt`
    pub timestamps: Vec<f64>,
}

impl CapturedSequence {
    /// Index a sequence directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CaptureError> {
        let root = path.as_ref();
        if !root.is_dir() {
            return Err(CaptureError::Inconsistent {
                path: root.to_path_buf(),
                message: "sequence directory not found".to_string(),
            });
        }
        let layout = SequenceLayout::from_root(root);
        Ok(Self {
            left_frames: count_files(&layout.left_dir(), "png")?,
            right_frames: count_files(&layout.right_dir(), "png")?,
            disparity_frames: count_files(&layout.disparity_dir(), "npy")?,
            timestamps: read_timestamps(&layout.timestamps_path())?,
            layout,
        })
    }

    pub fn layout(&self) -> &SequenceLayout {
        &self.layout
    }

    /// Number of saved frames according to the timestamp log
    pub fn frame_count(&self) -> usize {
        self.timestamps.len()
    }

    /// Check the sequence invariant: equal counts on every stream, contiguous
    /// frame names from 0, and `timestamps[i] == i * sim_dt`.
    pub fn validate(&self, sim_dt: f64) -> Result<(), CaptureError> {
        let n = self.frame_count();
        let fail = |message: String| CaptureError::Inconsistent {
            path: self.layout.root().to_path_buf(),
            message,
        };

        if self.left_frames != n || self.right_frames != n || self.disparity_frames != n {
            return Err(fail(format!(
                "{} timestamps but {} left, {} right, {} disparity frames",
                n, self.left_frames, self.right_frames, self.disparity_frames
            )));
        }
        for (i, &t) in self.timestamps.iter().enumerate() {
            if t != i as f64 * sim_dt {
                return Err(fail(format!("timestamp {} is {}, expected {}", i, t, i as f64 * sim_dt)));
            }
        }
        for k in 0..n {
            for path in [
                self.layout.left_frame(k),
                self.layout.right_frame(k),
                self.layout.disparity_frame(k),
            ] {
                if !path.is_file() {
                    return Err(fail(format!("missing {}", path.display())));
                }
            }
        }
        Ok(())
    }

    /// Load the left image of frame `frame_id`.
    pub fn load_left(&self, frame_id: usize) -> Result<RgbImage, CaptureError> {
        Ok(image::open(self.layout.left_frame(frame_id))?.to_rgb8())
    }

    /// Load the right image of frame `frame_id`.
    pub fn load_right(&self, frame_id: usize) -> Result<RgbImage, CaptureError> {
        Ok(image::open(self.layout.right_frame(frame_id))?.to_rgb8())
    }

    /// Load the disparity map of frame `frame_id`.
    pub fn load_disparity(&self, frame_id: usize) -> Result<Array2<f32>, CaptureError> {
        Ok(ndarray_npy::read_npy(self.layout.disparity_frame(frame_id))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_dir_names() {
        assert_eq!(object_dir_name(1), "object_01");
        assert_eq!(object_dir_name(12), "object_12");
        assert_eq!(environment_dir_name(2), "environment_0002");
        assert_eq!(sequence_dir_name(7), "sequence_00007");
        assert_eq!(frame_stem(0), "frame_0000000000");
        assert_eq!(frame_stem(123), "frame_0000000123");
    }

    #[test]
    fn test_sequence_layout_paths() {
        let layout = SequenceLayout::new(Path::new("/data/object_01"), 2, 7);
        assert_eq!(
            layout.root(),
            Path::new("/data/object_01/environment_0002/sequence_00007")
        );
        assert_eq!(
            layout.left_dir(),
            PathBuf::from("/data/object_01/environment_0002/sequence_00007/images/left")
        );
        assert_eq!(
            layout.right_dir(),
            PathBuf::from("/data/object_01/environment_0002/sequence_00007/images/right")
        );
        assert_eq!(
            layout.disparity_dir(),
            PathBuf::from("/data/object_01/environment_0002/sequence_00007/disparity")
        );
        assert_eq!(
            layout.disparity_frame(3),
            PathBuf::from(
                "/data/object_01/environment_0002/sequence_00007/disparity/frame_0000000003.npy"
            )
        );
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0), "0.0");
        assert_eq!(format_timestamp(0.25), "0.25");
        assert_eq!(format_timestamp(2.0), "2.0");
        assert_eq!(format_timestamp(3.0 * 0.1), "0.30000000000000004");
    }

    #[test]
    fn test_write_timestamps() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(TIMESTAMPS_FILE);
        write_timestamps(&path, 4, 0.01).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["0.0", "0.01", "0.02", "0.03"]);

        let parsed = read_timestamps(&path).unwrap();
        for (i, t) in parsed.iter().enumerate() {
            assert_eq!(*t, i as f64 * 0.01);
        }
    }

    #[test]
    fn test_write_empty_timestamps() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(TIMESTAMPS_FILE);
        write_timestamps(&path, 0, 0.01).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
        assert!(read_timestamps(&path).unwrap().is_empty());
    }

    #[test]
    fn test_read_timestamps_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(TIMESTAMPS_FILE);
        fs::write(&path, "0.0\nabc\n").unwrap();
        assert!(matches!(
            read_timestamps(&path),
            Err(CaptureError::Inconsistent { .. })
        ));
    }

    #[test]
    fn test_count_files() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        fs::write(dir.join("a.png"), b"").unwrap();
        fs::write(dir.join("b.png"), b"").unwrap();
        fs::write(dir.join(".hidden.png"), b"").unwrap();
        fs::write(dir.join("c.npy"), b"").unwrap();
        fs::create_dir(dir.join("nested.png")).unwrap();
        fs::write(dir.join("nested.png").join("d.png"), b"").unwrap();

        // The directory named nested.png is counted like a glob would.
        assert_eq!(count_files(dir, "png").unwrap(), 3);
        assert_eq!(count_files(dir, "npy").unwrap(), 1);
        assert_eq!(count_files(&dir.join("missing"), "png").unwrap(), 0);
    }

    #[test]
    fn test_png_and_npy_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let layout = SequenceLayout::from_root(temp_dir.path());
        layout.create().unwrap();

        let image = RgbImage::from_fn(4, 3, |x, y| image::Rgb([x as u8, y as u8, 7]));
        save_rgb_png(&image, &layout.left_frame(0)).unwrap();
        save_rgb_png(&image, &layout.right_frame(0)).unwrap();

        let disparity = Array2::from_shape_fn((3, 4), |(r, c)| (r * 4 + c) as f32 * 0.5);
        save_disparity_npy(&disparity, &layout.disparity_frame(0)).unwrap();
        write_timestamps(&layout.timestamps_path(), 1, 0.01).unwrap();

        let sequence = CapturedSequence::load(temp_dir.path()).unwrap();
        sequence.validate(0.01).unwrap();
        assert_eq!(sequence.load_left(0).unwrap(), image);
        assert_eq!(sequence.load_right(0).unwrap().dimensions(), (4, 3));
        assert_eq!(sequence.load_disparity(0).unwrap(), disparity);
    }

    #[test]
    fn test_validate_detects_count_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let layout = SequenceLayout::from_root(temp_dir.path());
        layout.create().unwrap();
        let image = RgbImage::new(2, 2);
        save_rgb_png(&image, &layout.left_frame(0)).unwrap();
        write_timestamps(&layout.timestamps_path(), 1, 0.01).unwrap();

        let sequence = CapturedSequence::load(temp_dir.path()).unwrap();
        assert!(matches!(
            sequence.validate(0.01),
            Err(CaptureError::Inconsistent { .. })
        ));
    }

    #[test]
    fn test_load_missing_sequence() {
        assert!(matches!(
            CapturedSequence::load("/nonexistent/sequence"),
            Err(CaptureError::Inconsistent { .. })
        ));
    }

    #[test]
    fn test_manifest_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config = SessionConfig::new(temp_dir.path(), 5, CameraConfig::default());
        let manifest = SessionManifest::from_config(&config);
        assert_eq!(manifest.radius, 16.0);

        let path = manifest.write(temp_dir.path()).unwrap();
        assert!(path.ends_with(MANIFEST_FILE));
        let loaded = SessionManifest::load(temp_dir.path()).unwrap();
        assert_eq!(loaded, manifest);
    }
}
