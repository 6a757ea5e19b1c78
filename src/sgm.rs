//! Post-processing for the SGM stereo matcher.
//!
//! The matcher expects a flat capture directory:
//!
//! ```text
//! save_dir/
//!   left/imgs/*.png      left/timestamps.txt    (written here)
//!   right/imgs/*.png     right/timestamps.txt   (written here)
//!   sgm/gt/disparities/                         (created here)
//!   sgm/gt/disparities_vis/                     (created here)
//!   sgm/gt/left  -> save_dir/left/imgs          (symlink)
//!   sgm/gt/right -> save_dir/right/imgs         (symlink)
//! ```
//!
//! Running [`reorganize`] twice on the same directory fails because the
//! symlinks already exist.

use crate::dataset::{count_files, write_timestamps, TIMESTAMPS_FILE};
use crate::CaptureError;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info};

const GT_DIR: &str = "sgm/gt";

/// Image counts found by [`reorganize`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SgmSummary {
    /// PNG files in `left/imgs`
    pub left: usize,
    /// PNG files in `right/imgs`
    pub right: usize,
}

/// Prepare `save_dir` for the SGM matcher.
///
/// Each side gets its own timestamp log sized to its own image count; the two
/// counts are not reconciled.
pub fn reorganize(save_dir: &Path, sim_dt: f64) -> Result<SgmSummary, CaptureError> {
    let gt = save_dir.join(GT_DIR);
    fs::create_dir_all(gt.join("disparities"))?;
    fs::create_dir_all(gt.join("disparities_vis"))?;

    // Absolute link targets stay valid for relative save dirs
    let save_dir = save_dir.canonicalize()?;
    let gt = save_dir.join(GT_DIR);

    let mut summary = SgmSummary::default();
    for (side, count) in [("left", &mut summary.left), ("right", &mut summary.right)] {
        let images = save_dir.join(side).join("imgs");
        *count = count_files(&images, "png")?;
        write_timestamps(&save_dir.join(side).join(TIMESTAMPS_FILE), *count, sim_dt)?;
        debug!(side, images = *count, "timestamps written");
    }

    for side in ["left", "right"] {
        symlink_dir(&save_dir.join(side).join("imgs"), &gt.join(side))?;
    }

    info!(
        save_dir = %save_dir.display(),
        left = summary.left,
        right = summary.right,
        "prepared SGM layout"
    );
    Ok(summary)
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}
