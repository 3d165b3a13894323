// Append-only CSV result files.
//
// The benchmark harness appends one row per recovered event.  The file has a single writer for
// its whole lifetime and every append writes (and flushes) a whole line, so a crashed run leaves
// at worst a complete prefix of its rows, never a partial line.

use anyhow::Result;
use std::fs::File;
use std::path::Path;

pub struct ResultFile {
    writer: csv::Writer<File>,
}

impl ResultFile {
    /// Create (truncating) the result file and write the header row.

    pub fn create(path: &Path, header: &[&str]) -> Result<ResultFile> {
        let mut writer = csv::Writer::from_writer(File::create(path)?);
        writer.write_record(header)?;
        writer.flush()?;
        Ok(ResultFile { writer })
    }

    /// Append one whole row and flush it.

    pub fn append(&mut self, fields: &[String]) -> Result<()> {
        self.writer.write_record(fields)?;
        self.writer.flush()?;
        Ok(())
    }
}

#[test]
fn test_result_file() {
    let path = std::env::temp_dir().join(format!("cvmutils-csv-test-{}", std::process::id()));
    {
        let mut f = ResultFile::create(&path, &["Run", "Event", "TimeStampSecs"]).unwrap();
        f.append(&["0".to_string(), "Start".to_string(), "100.0".to_string()])
            .unwrap();
        f.append(&["0".to_string(), "End".to_string(), "103.2".to_string()])
            .unwrap();
    }
    let text = std::fs::read_to_string(&path).unwrap();
    let lines = text.lines().collect::<Vec<&str>>();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "Run,Event,TimeStampSecs");
    assert_eq!(lines[1], "0,Start,100.0");
    assert_eq!(lines[2], "0,End,103.2");
    std::fs::remove_file(&path).unwrap();
}
