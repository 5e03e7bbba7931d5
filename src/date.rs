use crate::scan::FileEntry;
use regex::Regex;
use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::OnceLock;
use time::{Date, Month, OffsetDateTime};

/// Formats worth an EXIF attempt. Everything else skips straight to the
/// string and stat sources.
pub const EXIF_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "tif", "tiff", "heic", "heif", "cr2", "cr3", "nef", "arw", "dng", "raf",
    "rw2", "orf", "srw", "pef",
];

const EXIF_READ_LIMIT: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSource {
    Exif,
    Path,
    PathEpoch,
    Filename,
    FilenameEpoch,
    Mtime,
}

impl fmt::Display for DateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DateSource::Exif => "exif",
            DateSource::Path => "path",
            DateSource::PathEpoch => "path (epoch)",
            DateSource::Filename => "filename",
            DateSource::FilenameEpoch => "filename (epoch)",
            DateSource::Mtime => "timestamps (mtime)",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoundDate {
    pub date: Date,
    pub source: DateSource,
}

/// The earliest plausible date strictly after `threshold`, or `None`.
///
/// EXIF and the path/filename strings are authoritative; the file's mtime is
/// consulted only when none of them yields a date that clears the threshold,
/// since stat times drift with every copy and must not override intentional
/// naming.
pub fn extract_date(entry: &FileEntry, threshold: Date) -> Option<FoundDate> {
    let mut candidates: Vec<FoundDate> = Vec::new();

    if EXIF_EXTENSIONS.contains(&entry.ext.as_str()) {
        if let Some(date) = exif_date(&entry.path) {
            candidates.push(FoundDate { date, source: DateSource::Exif });
        }
    }
    if let Some((date, epoch)) = scan_string(&entry.dir.to_string_lossy()) {
        let source = if epoch { DateSource::PathEpoch } else { DateSource::Path };
        candidates.push(FoundDate { date, source });
    }
    if let Some((date, epoch)) = scan_string(&entry.name) {
        let source = if epoch { DateSource::FilenameEpoch } else { DateSource::Filename };
        candidates.push(FoundDate { date, source });
    }

    candidates.retain(|c| c.date > threshold);
    if let Some(best) = candidates.into_iter().min_by_key(|c| c.date) {
        return Some(best);
    }

    let mtime = OffsetDateTime::from_unix_timestamp(entry.stat.mtime_ms / 1000)
        .ok()?
        .date();
    (mtime > threshold).then_some(FoundDate { date: mtime, source: DateSource::Mtime })
}

/// `DateTimeOriginal` from the first 64 KiB of the file; any failure is an
/// expected outcome, not an error.
fn exif_date(path: &Path) -> Option<Date> {
    let mut file = File::open(path).ok()?;
    let mut buf = vec![0u8; EXIF_READ_LIMIT];
    let mut read = 0;
    loop {
        match file.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => {
                read += n;
                if read == buf.len() {
                    break;
                }
            }
            Err(_) => return None,
        }
    }
    buf.truncate(read);

    let exif = exif::Reader::new().read_from_container(&mut Cursor::new(buf)).ok()?;
    let field = exif.get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)?;
    let ascii = match &field.value {
        exif::Value::Ascii(values) => values.first()?,
        _ => return None,
    };
    let dt = exif::DateTime::from_ascii(ascii).ok()?;
    let month = Month::try_from(dt.month).ok()?;
    Date::from_calendar_date(i32::from(dt.year), month, dt.day).ok()
}

/// First date found in `s`, trying YYYYMMDD, then DDMMYYYY, then a standalone
/// 10-digit epoch. The bool is true for the epoch form.
fn scan_string(s: &str) -> Option<(Date, bool)> {
    if let Some(date) = find_ymd(s) {
        return Some((date, false));
    }
    if let Some(date) = find_dmy(s) {
        return Some((date, false));
    }
    find_epoch(s).map(|date| (date, true))
}

fn ymd_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|[^0-9])(\d{4})-?(\d{2})-?(\d{2})(?:[^0-9]|$)").expect("date pattern")
    })
}

fn dmy_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|[^0-9])(\d{2})-?(\d{2})-?(\d{4})(?:[^0-9]|$)").expect("date pattern")
    })
}

fn epoch_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|[^0-9])(\d{10})(?:[^0-9]|$)").expect("epoch pattern"))
}

fn find_ymd(s: &str) -> Option<Date> {
    for caps in ymd_re().captures_iter(s) {
        let year: i32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let day: u32 = caps[3].parse().ok()?;
        if let Some(date) = build_date(year, month, day) {
            return Some(date);
        }
    }
    None
}

fn find_dmy(s: &str) -> Option<Date> {
    for caps in dmy_re().captures_iter(s) {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        if let Some(date) = build_date(year, month, day) {
            return Some(date);
        }
    }
    None
}

fn find_epoch(s: &str) -> Option<Date> {
    for caps in epoch_re().captures_iter(s) {
        let secs: i64 = caps[1].parse().ok()?;
        if let Ok(dt) = OffsetDateTime::from_unix_timestamp(secs) {
            return Some(dt.date());
        }
    }
    None
}

fn build_date(year: i32, month: u32, day: u32) -> Option<Date> {
    if !(1900..=2099).contains(&year) || !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    let month = Month::try_from(month as u8).ok()?;
    Date::from_calendar_date(year, month, day as u8).ok()
}
