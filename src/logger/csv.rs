use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use log::info;

use super::{LogField, Measurement};

pub(crate) fn log_file_path(root: &Path, year: i32, month: u32, day: u32) -> PathBuf {
    root.join("data")
        .join(format!("{year:04}"))
        .join(format!("{month:02}"))
        .join(format!("{day:02}.csv"))
}

fn date_of(timestamp: i64) -> io::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "timestamp out of range"))
}

fn same_day(a: &DateTime<Utc>, b: &DateTime<Utc>) -> bool {
    (a.year(), a.month(), a.day()) == (b.year(), b.month(), b.day())
}

/// Header row: friendly names where the catalog has them, raw names
/// otherwise, then the energy total and timestamp columns.
pub(crate) fn csv_header(fields: &[LogField]) -> String {
    let mut header = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            header.push(',');
        }
        match field.descriptor {
            Some(reg) if !reg.friendly_name.is_empty() => header.push_str(reg.friendly_name),
            _ => header.push_str(&field.name),
        }
    }
    header.push_str(",kWh,UnixTime");
    header
}

fn decimals_for(field: &LogField) -> usize {
    match field.descriptor {
        Some(reg) if reg.kind.is_signed_integer() => 0,
        // current-like RMS quantities carry an extra digit
        Some(_) if field.name.contains("rms") => 3,
        _ => 2,
    }
}

fn open_day_file(
    root: &Path,
    fields: &[LogField],
    date: &DateTime<Utc>,
) -> io::Result<BufWriter<File>> {
    let path = log_file_path(root, date.year(), date.month(), date.day());
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let is_new = !path.exists();
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    let mut writer = BufWriter::new(file);
    if is_new {
        writeln!(writer, "{}", csv_header(fields))?;
        info!("created new log file {}", path.display());
    }
    Ok(writer)
}

fn write_row(out: &mut impl Write, fields: &[LogField], measurement: &Measurement) -> io::Result<()> {
    for (i, sample) in measurement.fields.iter().enumerate() {
        if i > 0 {
            out.write_all(b",")?;
        }
        match fields.get(i) {
            Some(field) if sample.valid => {
                write!(out, "{:.*}", decimals_for(field), sample.value)?
            }
            _ => out.write_all(b"NaN")?,
        }
    }
    writeln!(out, ",{:.3},{}", measurement.kwh, measurement.timestamp)
}

/// Appends every measurement to its day's file, creating folders and header
/// rows as needed. A buffer spanning midnight rolls over to the next day's
/// file mid-flush.
pub(crate) fn write_measurements(
    root: &Path,
    fields: &[LogField],
    data: &[Measurement],
) -> io::Result<()> {
    let Some(first) = data.first() else {
        return Ok(());
    };

    let mut date = date_of(first.timestamp)?;
    let mut writer = open_day_file(root, fields, &date)?;

    for measurement in data {
        let current = date_of(measurement.timestamp)?;
        if !same_day(&current, &date) {
            writer.flush()?;
            date = current;
            writer = open_day_file(root, fields, &date)?;
        }
        write_row(&mut writer, fields, measurement)?;
    }

    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::String as BoundedString;

    fn field(name: &str) -> LogField {
        LogField {
            name: BoundedString::try_from(name).unwrap(),
            descriptor: crate::meter::REGISTERS.iter().find(|r| r.name == name),
        }
    }

    #[test]
    fn path_is_zero_padded() {
        let path = log_file_path(Path::new("/mnt/card"), 2026, 8, 6);
        assert_eq!(path, Path::new("/mnt/card/data/2026/08/06.csv"));
    }

    #[test]
    fn header_prefers_friendly_names() {
        let fields = [field("UrmsA"), field("NotInCatalog")];
        assert_eq!(
            csv_header(&fields),
            "Phase A Voltage RMS,NotInCatalog,kWh,UnixTime"
        );
    }

    #[test]
    fn decimal_rules_follow_value_kind_and_name() {
        // signed integer kind: none
        assert_eq!(decimals_for(&field("Temp")), 0);
        // rms current-like: three
        assert_eq!(decimals_for(&field("IrmsA")), 3);
        // everything else, including unknown fields: two
        assert_eq!(decimals_for(&field("Freq")), 2);
        assert_eq!(decimals_for(&field("NotInCatalog")), 2);
    }
}
