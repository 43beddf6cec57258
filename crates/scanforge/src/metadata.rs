//! Copies a reference file's EXIF block onto extracted JPEG frames.
//!
//! The reference is parsed once with `kamadak-exif`; its raw TIFF payload is
//! then spliced into each accepted frame as an `APP1` segment.

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::MetadataError;

const SOI: [u8; 2] = [0xFF, 0xD8];
const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;
const SOS: u8 = 0xDA;
const EOI: u8 = 0xD9;
const EXIF_HEADER: &[u8] = b"Exif\0\0";

/// Largest TIFF payload that fits in one APP1 segment.
const MAX_PAYLOAD: usize = u16::MAX as usize - 2 - EXIF_HEADER.len();

pub struct MetadataPropagator {
    reference: PathBuf,
    payload: std::result::Result<Vec<u8>, LoadFailure>,
}

enum LoadFailure {
    Missing,
    Unreadable(String),
}

impl MetadataPropagator {
    /// Reads the reference EXIF. A missing or unreadable reference is
    /// remembered and reported by every later [`apply`](Self::apply).
    pub fn from_reference(reference: &Path) -> Self {
        let payload = read_exif_payload(reference);
        match &payload {
            Ok(bytes) => log::debug!(
                "Loaded {} bytes of EXIF from {}",
                bytes.len(),
                reference.display()
            ),
            Err(LoadFailure::Missing) => log::warn!(
                "Reference metadata file not found: {}",
                reference.display()
            ),
            Err(LoadFailure::Unreadable(reason)) => log::warn!(
                "Reference metadata unreadable ({}): {}",
                reference.display(),
                reason
            ),
        }

        Self {
            reference: reference.to_path_buf(),
            payload,
        }
    }

    pub fn reference(&self) -> &Path {
        &self.reference
    }

    pub fn is_loaded(&self) -> bool {
        self.payload.is_ok()
    }

    /// Replaces the frame's EXIF block with the reference payload.
    pub fn apply(&self, frame: &Path) -> Result<(), MetadataError> {
        let payload = match &self.payload {
            Ok(bytes) => bytes,
            Err(LoadFailure::Missing) => {
                return Err(MetadataError::ReferenceMissing(self.reference.clone()))
            }
            Err(LoadFailure::Unreadable(reason)) => {
                return Err(MetadataError::ReadReference {
                    path: self.reference.clone(),
                    reason: reason.clone(),
                })
            }
        };

        let io_err = |source| MetadataError::Io {
            path: frame.to_path_buf(),
            source,
        };

        let jpeg = std::fs::read(frame).map_err(io_err)?;
        let rewritten = splice_exif(&jpeg, payload).map_err(|e| match e {
            SpliceError::NotJpeg => MetadataError::NotJpeg(frame.to_path_buf()),
            SpliceError::TooLarge(n) => MetadataError::PayloadTooLarge(n),
        })?;

        let tmp = frame.with_extension("jpeg.tmp");
        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(&rewritten)?;
            file.sync_all()?;
            std::fs::rename(&tmp, frame)
        };
        if let Err(e) = write() {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(e));
        }

        Ok(())
    }
}

fn read_exif_payload(path: &Path) -> std::result::Result<Vec<u8>, LoadFailure> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(LoadFailure::Missing),
        Err(e) => return Err(LoadFailure::Unreadable(e.to_string())),
    };

    let exif = exif::Reader::new()
        .read_from_container(&mut BufReader::new(file))
        .map_err(|e| LoadFailure::Unreadable(e.to_string()))?;

    let buf = exif.buf();
    if buf.is_empty() {
        return Err(LoadFailure::Unreadable("empty EXIF block".to_string()));
    }
    Ok(buf.to_vec())
}

#[derive(Debug, PartialEq)]
enum SpliceError {
    NotJpeg,
    TooLarge(usize),
}

/// Rebuilds `jpeg` with `payload` as its only EXIF segment, placed after
/// SOI and any leading APP0 (JFIF) segments. Scan data is copied unchanged.
fn splice_exif(jpeg: &[u8], payload: &[u8]) -> std::result::Result<Vec<u8>, SpliceError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(SpliceError::TooLarge(payload.len()));
    }
    if jpeg.len() < 4 || jpeg[..2] != SOI {
        return Err(SpliceError::NotJpeg);
    }

    let mut out = Vec::with_capacity(jpeg.len() + payload.len() + 10);
    out.extend_from_slice(&SOI);

    let mut pos = 2;
    let mut inserted = false;
    loop {
        if pos + 4 > jpeg.len() || jpeg[pos] != 0xFF {
            return Err(SpliceError::NotJpeg);
        }
        let marker = jpeg[pos + 1];
        if marker == SOS || marker == EOI {
            break;
        }
        let len = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        let end = pos + 2 + len;
        if len < 2 || end > jpeg.len() {
            return Err(SpliceError::NotJpeg);
        }
        let segment = &jpeg[pos..end];

        if !inserted && marker != APP0 {
            write_app1(&mut out, payload);
            inserted = true;
        }
        let is_exif = marker == APP1 && segment[4..].starts_with(EXIF_HEADER);
        if !is_exif {
            out.extend_from_slice(segment);
        }
        pos = end;
    }

    if !inserted {
        write_app1(&mut out, payload);
    }
    out.extend_from_slice(&jpeg[pos..]);
    Ok(out)
}

fn write_app1(out: &mut Vec<u8>, payload: &[u8]) {
    let len = (2 + EXIF_HEADER.len() + payload.len()) as u16;
    out.extend_from_slice(&[0xFF, APP1]);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(EXIF_HEADER);
    out.extend_from_slice(payload);
}
