use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use tracing::debug;

pub const CSV_HEADER: [&str; 3] = ["start_seg", "end_seg", "label"];

/// Half-open interval `[start, end)` in seconds during which `label` speaks.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub label: i64,
}

/// Collapses one label per hop into runs of equal labels.
///
/// Every run ends at the hop where the next one begins. The last run ends at
/// `labels.len() * hop_len` and, when it spans more than one hop, also covers
/// the look-ahead of its final frame (`frame_len - hop_len`).
pub fn compact(labels: &[i64], hop_len: f64, frame_len: f64) -> Vec<Segment> {
    let mut segments = Vec::new();

    let Some(&first) = labels.first() else {
        return segments;
    };

    let mut run_start = 0;
    let mut current = first;

    for (index, &label) in labels.iter().enumerate().skip(1) {
        if label != current {
            segments.push(Segment {
                start: run_start as f64 * hop_len,
                end: index as f64 * hop_len,
                label: current,
            });
            run_start = index;
            current = label;
        }
    }

    let mut end = labels.len() as f64 * hop_len;
    if labels.len() - run_start > 1 {
        end += frame_len - hop_len;
    }

    segments.push(Segment {
        start: run_start as f64 * hop_len,
        end,
        label: current,
    });

    debug!("compacted {} labels into {} segments", labels.len(), segments.len());

    segments
}

pub fn write_rows<W: Write>(writer: &mut W, segments: &[Segment]) -> io::Result<()> {
    writeln!(writer, "{}", CSV_HEADER.join(","))?;
    for segment in segments {
        writeln!(writer, "{:?},{:?},{}", segment.start, segment.end, segment.label)?;
    }
    Ok(())
}

/// Writes the result file next to its final location and renames it into
/// place, so a reader never sees half a file and a failed write leaves nothing.
pub fn write_csv(path: &Path, segments: &[Segment]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = tempfile::Builder::new()
        .prefix(".result")
        .suffix(".tmp")
        .tempfile_in(dir)?;

    {
        let mut writer = BufWriter::new(file.as_file_mut());
        write_rows(&mut writer, segments)?;
        writer.flush()?;
    }
    file.as_file().sync_all()?;

    file.persist(path).map_err(|err| err.error)?;

    Ok(())
}
