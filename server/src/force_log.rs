//! Human-readable log of the pull forces applied by the client.
//!
//! One line is written whenever the applied batch differs from the last
//! logged one; only atoms whose force changed are listed. The force on an
//! atom is always the last value found for it in the file.

use imd_shared::{ForceBatch, Vec3};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

pub struct ForceLog {
    writer: BufWriter<File>,
    previous: ForceBatch,
}

impl ForceLog {
    /// Opens the log. A fresh file gets a descriptive header; when appending
    /// the header is assumed to be present already.
    pub fn open(path: &Path, tracked: usize, total: usize, append: bool) -> io::Result<Self> {
        let file = if append {
            OpenOptions::new().create(true).append(true).open(path)?
        } else {
            File::create(path)?
        };
        let mut writer = BufWriter::new(file);

        if !append {
            if tracked == total {
                writeln!(
                    writer,
                    "# Note that you can select an IMD index group in the run input if a subset of the atoms suffices."
                )?;
            }
            writeln!(writer, "@    title \"IMD Pull Forces\"")?;
            writeln!(writer, "@    xaxis  label \"Time (ps)\"")?;
            writeln!(
                writer,
                "@    yaxis  label \"# of Forces / Atom IDs / Forces (kJ/mol)\""
            )?;
            writeln!(
                writer,
                "# Can display and manipulate {} (of a total of {}) atoms via IMD.",
                tracked, total
            )?;
            writeln!(writer, "# column 1    : time (ps)")?;
            writeln!(
                writer,
                "# column 2    : total number of atoms feeling an IMD pulling force at that time"
            )?;
            writeln!(
                writer,
                "# cols. 3.-6  : global atom number of pulled atom, x-force, y-force, z-force (kJ/mol)"
            )?;
            writeln!(
                writer,
                "# then follow : atom-ID, f[x], f[y], f[z] for more atoms in case the force on multiple atoms is changed simultaneously."
            )?;
            writeln!(
                writer,
                "# Note that the force on any atom is always equal to the last value for that atom-ID found in the data."
            )?;
            writer.flush()?;
        }

        Ok(Self {
            writer,
            previous: ForceBatch::default(),
        })
    }

    fn changed(&self, applied: &ForceBatch) -> bool {
        applied.len() != self.previous.len()
            || applied.indices() != self.previous.indices()
            || applied.forces() != self.previous.forces()
    }

    /// Writes a line for `applied` if it differs from the last logged batch.
    /// `tracked` maps batch indices to global atom indices. Returns whether
    /// a line was written.
    pub fn record(&mut self, time: f64, applied: &ForceBatch, tracked: &[usize]) -> io::Result<bool> {
        if !self.changed(applied) {
            return Ok(false);
        }

        let mut line = format!("{:14.6e}{:6}", time, applied.len());
        for (i, (index, force)) in applied.iter().enumerate() {
            let old: Option<&Vec3> = self.previous.forces().get(i);
            if old == Some(&force) {
                continue;
            }
            let global = tracked.get(index as usize).copied().unwrap_or(index as usize);
            line.push_str(&format!(
                "{:9}{:12.4e}{:12.4e}{:12.4e}",
                global + 1,
                force[0],
                force[1],
                force[2]
            ));
        }
        writeln!(self.writer, "{}", line)?;

        self.previous = applied.clone();
        Ok(true)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn batch(indices: Vec<i32>, forces: Vec<Vec3>) -> ForceBatch {
        ForceBatch::new(indices, forces).unwrap()
    }

    fn data_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .filter(|l| !l.starts_with('#') && !l.starts_with('@'))
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_header_written_for_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("imd.xvg");
        let mut log = ForceLog::open(&path, 10, 10, false).unwrap();
        log.flush().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("IMD Pull Forces"));
        assert!(content.contains("Can display and manipulate 10 (of a total of 10) atoms"));
        assert!(content.contains("select an IMD index group"));
        assert!(data_lines(&path).is_empty());
    }

    #[test]
    fn test_append_skips_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("imd.xvg");
        fs::write(&path, "existing\n").unwrap();

        let mut log = ForceLog::open(&path, 3, 10, true).unwrap();
        log.record(1.0, &batch(vec![0], vec![[1.0, 0.0, 0.0]]), &[4, 5, 6])
            .unwrap();
        log.flush().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("existing\n"));
        assert!(!content.contains("IMD Pull Forces"));
    }

    #[test]
    fn test_identical_batches_log_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("imd.xvg");
        let mut log = ForceLog::open(&path, 3, 20, false).unwrap();
        let tracked = [2, 7, 11];
        let applied = batch(vec![0, 2], vec![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);

        assert!(log.record(0.0, &applied, &tracked).unwrap());
        assert!(!log.record(0.1, &applied, &tracked).unwrap());
        log.flush().unwrap();

        let lines = data_lines(&path);
        assert_eq!(lines.len(), 1);
        let fields: Vec<&str> = lines[0].split_whitespace().collect();
        // time, count, then (id, fx, fy, fz) for both atoms
        assert_eq!(fields.len(), 2 + 2 * 4);
        assert_eq!(fields[1], "2");
        assert_eq!(fields[2], "3");
        assert_eq!(fields[6], "12");
    }

    #[test]
    fn test_changed_single_force_lists_only_that_atom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("imd.xvg");
        let mut log = ForceLog::open(&path, 3, 20, false).unwrap();
        let tracked = [2, 7, 11];

        let first = batch(vec![0, 1], vec![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        let second = batch(vec![0, 1], vec![[1.0, 0.0, 0.0], [0.0, 3.0, 0.0]]);
        log.record(0.0, &first, &tracked).unwrap();
        log.record(0.2, &second, &tracked).unwrap();
        log.flush().unwrap();

        let lines = data_lines(&path);
        assert_eq!(lines.len(), 2);
        let fields: Vec<&str> = lines[1].split_whitespace().collect();
        assert_eq!(fields.len(), 2 + 4);
        assert_eq!(fields[1], "2");
        assert_eq!(fields[2], "8");
        assert_eq!(fields[4].parse::<f32>().unwrap(), 3.0);
    }

    #[test]
    fn test_cleared_batch_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("imd.xvg");
        let mut log = ForceLog::open(&path, 3, 20, false).unwrap();

        log.record(0.0, &batch(vec![1], vec![[1.0, 1.0, 1.0]]), &[0, 1, 2])
            .unwrap();
        assert!(log.record(0.5, &ForceBatch::default(), &[0, 1, 2]).unwrap());
        log.flush().unwrap();

        let lines = data_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].split_whitespace().count(), 2);
    }
}
