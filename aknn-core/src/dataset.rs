//! Point-dataset file codecs.
//!
//! Two on-disk shapes are supported, selected by file extension:
//!
//! - `.bin` — a u64 little-endian point count followed by packed
//!   `(u64 id, f64 x, f64 y)` records, all little-endian so files stay
//!   portable across machines;
//! - anything else — text, one whitespace-separated `id x y` record per
//!   line.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::DatasetError;
use crate::point::Point;

/// Bytes of one packed binary point record.
pub const POINT_RECORD_BYTES: usize = 24;

/// Returns true when `path` selects the binary codec.
#[must_use]
pub fn is_binary_dataset(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "bin")
}

fn io_error(path: &Path, source: io::Error) -> DatasetError {
    DatasetError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Loads a dataset, dispatching on the file extension.
///
/// # Errors
/// Returns [`DatasetError::Io`] when the file cannot be read,
/// [`DatasetError::Parse`] for a malformed text record, and
/// [`DatasetError::Truncated`] when a binary file ends early.
pub fn load_points(path: &Path) -> Result<Vec<Point>, DatasetError> {
    if is_binary_dataset(path) {
        load_binary(path)
    } else {
        load_text(path)
    }
}

fn load_binary(path: &Path) -> Result<Vec<Point>, DatasetError> {
    let file = File::open(path).map_err(|source| io_error(path, source))?;
    let mut reader = BufReader::new(file);

    let mut header = [0_u8; 8];
    reader
        .read_exact(&mut header)
        .map_err(|source| io_error(path, source))?;
    let expected = u64::from_le_bytes(header);

    let mut points = Vec::with_capacity(usize::try_from(expected).unwrap_or(0));
    let mut record = [0_u8; POINT_RECORD_BYTES];
    for actual in 0..expected {
        match reader.read_exact(&mut record) {
            Ok(()) => points.push(decode_point(&record)),
            Err(source) if source.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(DatasetError::Truncated {
                    path: path.to_path_buf(),
                    expected,
                    actual,
                });
            }
            Err(source) => return Err(io_error(path, source)),
        }
    }
    Ok(points)
}

fn load_text(path: &Path) -> Result<Vec<Point>, DatasetError> {
    let file = File::open(path).map_err(|source| io_error(path, source))?;
    let reader = BufReader::new(file);

    let mut points = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| io_error(path, source))?;
        if line.trim().is_empty() {
            continue;
        }
        let point = parse_record(&line).ok_or_else(|| DatasetError::Parse {
            path: path.to_path_buf(),
            line: index + 1,
        })?;
        points.push(point);
    }
    Ok(points)
}

/// Streams every point of a dataset file into `sink` without materialising
/// the dataset, returning the record count. Used when transcoding datasets
/// that may exceed memory into external record files.
pub(crate) fn for_each_point(
    path: &Path,
    mut sink: impl FnMut(Point) -> crate::error::Result<()>,
) -> crate::error::Result<u64> {
    if is_binary_dataset(path) {
        let file = File::open(path).map_err(|source| io_error(path, source))?;
        let mut reader = BufReader::new(file);
        let mut header = [0_u8; 8];
        reader
            .read_exact(&mut header)
            .map_err(|source| io_error(path, source))?;
        let expected = u64::from_le_bytes(header);
        let mut record = [0_u8; POINT_RECORD_BYTES];
        for actual in 0..expected {
            match reader.read_exact(&mut record) {
                Ok(()) => sink(decode_point(&record))?,
                Err(source) if source.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(DatasetError::Truncated {
                        path: path.to_path_buf(),
                        expected,
                        actual,
                    }
                    .into());
                }
                Err(source) => return Err(io_error(path, source).into()),
            }
        }
        Ok(expected)
    } else {
        let file = File::open(path).map_err(|source| io_error(path, source))?;
        let reader = BufReader::new(file);
        let mut count = 0_u64;
        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| io_error(path, source))?;
            if line.trim().is_empty() {
                continue;
            }
            let point = parse_record(&line).ok_or_else(|| DatasetError::Parse {
                path: path.to_path_buf(),
                line: index + 1,
            })?;
            sink(point)?;
            count += 1;
        }
        Ok(count)
    }
}

/// Parses one whitespace-separated `id x y` record.
#[must_use]
pub fn parse_record(line: &str) -> Option<Point> {
    let mut fields = line.split_whitespace();
    let id = fields.next()?.parse().ok()?;
    let x = fields.next()?.parse().ok()?;
    let y = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some(Point { id, x, y })
}

/// Writes a dataset, dispatching on the file extension.
///
/// # Errors
/// Returns [`DatasetError::Io`] when the file cannot be created or written.
pub fn write_points(path: &Path, points: &[Point]) -> Result<(), DatasetError> {
    let file = File::create(path).map_err(|source| io_error(path, source))?;
    let mut writer = BufWriter::new(file);
    if is_binary_dataset(path) {
        write_binary(path, &mut writer, points)?;
    } else {
        write_text(path, &mut writer, points)?;
    }
    writer.flush().map_err(|source| io_error(path, source))
}

fn write_binary<W: Write>(
    path: &Path,
    writer: &mut W,
    points: &[Point],
) -> Result<(), DatasetError> {
    writer
        .write_all(&(points.len() as u64).to_le_bytes())
        .map_err(|source| io_error(path, source))?;
    let mut record = [0_u8; POINT_RECORD_BYTES];
    for point in points {
        encode_point(point, &mut record);
        writer
            .write_all(&record)
            .map_err(|source| io_error(path, source))?;
    }
    Ok(())
}

fn write_text<W: Write>(
    path: &Path,
    writer: &mut W,
    points: &[Point],
) -> Result<(), DatasetError> {
    for point in points {
        writeln!(writer, "{}\t{}\t{}", point.id, point.x, point.y)
            .map_err(|source| io_error(path, source))?;
    }
    Ok(())
}

pub(crate) fn encode_point(point: &Point, buf: &mut [u8; POINT_RECORD_BYTES]) {
    buf[0..8].copy_from_slice(&point.id.to_le_bytes());
    buf[8..16].copy_from_slice(&point.x.to_le_bytes());
    buf[16..24].copy_from_slice(&point.y.to_le_bytes());
}

pub(crate) fn decode_point(buf: &[u8; POINT_RECORD_BYTES]) -> Point {
    let mut id = [0_u8; 8];
    let mut x = [0_u8; 8];
    let mut y = [0_u8; 8];
    id.copy_from_slice(&buf[0..8]);
    x.copy_from_slice(&buf[8..16]);
    y.copy_from_slice(&buf[16..24]);
    Point {
        id: u64::from_le_bytes(id),
        x: f64::from_le_bytes(x),
        y: f64::from_le_bytes(y),
    }
}
