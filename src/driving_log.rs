//! Reading simulator driving logs into datasets.
//!
//! A driving log is a CSV file written by the simulator. Column 0 holds the
//! centre camera frame, relative to the log's directory, and column 3 the
//! steering angle. Every other column is ignored.

use std::fs::File;
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use image::{ImageReader, RgbImage};

use crate::dataset::DrivingDataset;
use crate::error::{Error, Result};
use crate::preprocess::{ChannelOrder, ImagePreprocessor, swap_red_blue};

const IMAGE_COLUMN: usize = 0;
const STEERING_COLUMN: usize = 3;
const HEADER_MARKER: &str = "center";

/// One row of a driving log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Frame path, already resolved against the log's directory.
    pub image_path: PathBuf,
    pub steering: f32,
}

/// Parses the log at `path`, dropping the header row if there is one.
pub fn read_log(path: &Path) -> Result<Vec<LogRecord>> {
    let file = File::open(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);

    let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
    let mut records = Vec::new();

    for (index, row) in reader.records().enumerate() {
        let row = row.map_err(|source| Error::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let line = index + 1;

        let (Some(image), Some(steering)) = (row.get(IMAGE_COLUMN), row.get(STEERING_COLUMN))
        else {
            return Err(Error::Parse {
                path: path.to_path_buf(),
                row: line,
                message: format!("expected at least 4 columns, found {}", row.len()),
            });
        };

        if index == 0 && image == HEADER_MARKER {
            log::debug!("Skipping header row in {}", path.display());
            continue;
        }

        let steering = steering.trim().parse::<f32>().map_err(|err| Error::Parse {
            path: path.to_path_buf(),
            row: line,
            message: format!("invalid steering angle {steering:?}: {err}"),
        })?;

        records.push(LogRecord {
            image_path: base_dir.join(image.trim()),
            steering,
        });
    }

    Ok(records)
}

/// Builds [`DrivingDataset`]s out of driving logs.
#[derive(Debug, Clone, Default)]
pub struct DatasetLoader {
    preprocessor: ImagePreprocessor,
    channel_order: ChannelOrder,
}

impl DatasetLoader {
    pub fn new(preprocessor: ImagePreprocessor) -> Self {
        Self {
            preprocessor,
            channel_order: ChannelOrder::default(),
        }
    }

    /// Channel order of the frames on disk. `Bgr` frames are swapped to RGB.
    pub fn with_channel_order(mut self, channel_order: ChannelOrder) -> Self {
        self.channel_order = channel_order;
        self
    }

    pub fn preprocessor(&self) -> &ImagePreprocessor {
        &self.preprocessor
    }

    /// Loads every frame referenced by one log.
    ///
    /// Any missing or unreadable frame aborts the whole load.
    pub fn load(&self, log_path: &Path) -> Result<DrivingDataset> {
        let records = read_log(log_path)?;

        let mut images = Vec::with_capacity(records.len());
        let mut labels = Vec::with_capacity(records.len());
        for record in &records {
            let rgb = self.load_rgb(&record.image_path)?;
            images.push(self.preprocessor.preprocess(&rgb));
            labels.push(record.steering);
        }

        let dataset =
            DrivingDataset::from_samples(self.preprocessor.input_shape(), images, labels)?;
        log::info!(
            "Loaded {} samples from {}",
            dataset.len(),
            log_path.display()
        );
        Ok(dataset)
    }

    /// Loads each log in turn and concatenates them in the given order.
    pub fn load_all<P: AsRef<Path>>(&self, log_paths: &[P]) -> Result<DrivingDataset> {
        let mut paths = log_paths.iter();
        let first = paths
            .next()
            .ok_or_else(|| Error::Validation("no driving logs given".to_string()))?;

        let mut dataset = self.load(first.as_ref())?;
        for path in paths {
            dataset = dataset.concat(&self.load(path.as_ref())?)?;
        }

        Ok(dataset)
    }

    fn load_rgb(&self, path: &Path) -> Result<RgbImage> {
        log::debug!("Decoding {}", path.display());
        let io_err = |source| Error::Io {
            path: path.to_path_buf(),
            source,
        };

        let image = ImageReader::open(path)
            .map_err(io_err)?
            .with_guessed_format()
            .map_err(io_err)?
            .decode()
            .map_err(|source| Error::Decode {
                path: path.to_path_buf(),
                source,
            })?;

        let mut rgb = image.to_rgb8();
        if self.channel_order == ChannelOrder::Bgr {
            swap_red_blue(&mut rgb);
        }
        Ok(rgb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_log(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("driving_log.csv");
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn header_row_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let log = write_log(
            dir.path(),
            "center,left,right,steering,throttle,brake,speed\n\
             IMG/a.jpg,IMG/b.jpg,IMG/c.jpg,0.5,1,0,30\n\
             IMG/d.jpg,IMG/e.jpg,IMG/f.jpg,-0.3,1,0,30\n",
        );

        let records = read_log(&log).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].image_path, dir.path().join("IMG/a.jpg"));
        assert_eq!(records[1].steering, -0.3);
    }

    #[test]
    fn headerless_log_keeps_every_row() {
        let dir = tempfile::tempdir().unwrap();
        let log = write_log(
            dir.path(),
            "IMG/a.jpg, IMG/b.jpg, IMG/c.jpg, 0.1, 1, 0, 30\n\
             IMG/d.jpg, IMG/e.jpg, IMG/f.jpg, 0.2, 1, 0, 30\n\
             IMG/g.jpg, IMG/h.jpg, IMG/i.jpg, 0.3, 1, 0, 30\n",
        );

        let records = read_log(&log).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[2].steering, 0.3);
    }

    #[test]
    fn short_rows_are_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let log = write_log(dir.path(), "IMG/a.jpg,0.5\n");

        let result = read_log(&log);

        assert!(matches!(result, Err(Error::Parse { row: 1, .. })));
    }

    #[test]
    fn bad_steering_value_names_the_row() {
        let dir = tempfile::tempdir().unwrap();
        let log = write_log(dir.path(), "IMG/a.jpg,x,y,0.5\nIMG/b.jpg,x,y,left\n");

        let result = read_log(&log);

        assert!(matches!(result, Err(Error::Parse { row: 2, .. })));
    }

    #[test]
    fn missing_log_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();

        let result = read_log(&dir.path().join("nope.csv"));

        assert!(matches!(result, Err(Error::Io { .. })));
    }

    #[test]
    fn missing_image_aborts_the_load() {
        let dir = tempfile::tempdir().unwrap();
        let log = write_log(dir.path(), "IMG/missing.jpg,x,y,0.5\n");

        let result = DatasetLoader::default().load(&log);

        assert!(matches!(result, Err(Error::Io { .. })));
    }

    #[test]
    fn corrupt_image_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.png"), b"not an image").unwrap();
        let log = write_log(dir.path(), "broken.png,x,y,0.5\n");

        let result = DatasetLoader::default().load(&log);

        assert!(matches!(result, Err(Error::Decode { .. })));
    }

    #[test]
    fn load_all_needs_at_least_one_log() {
        let paths: Vec<PathBuf> = Vec::new();

        let result = DatasetLoader::default().load_all(&paths);

        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
