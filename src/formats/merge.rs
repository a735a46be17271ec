//! Multi-file uploads. Every file must describe the same test; the check
//! reads only the header(s) and first data row of each file and runs before
//! anything is written.

use super::{ColumnMap, FormatKind};
use crate::error::{ImportError, ImportResult};
use crate::tabular::{Delimiter, RawRow, TabularFile};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Header row(s), column map and first data row title of one file.
#[derive(Debug, Clone)]
pub struct FilePreamble {
    pub headers: Vec<RawRow>,
    pub columns: ColumnMap,
    pub title: Option<String>,
}

pub fn read_preamble(kind: FormatKind, file: &TabularFile) -> ImportResult<FilePreamble> {
    let mut rows = file.rows()?;
    let mut headers = Vec::with_capacity(kind.header_rows());
    while headers.len() < kind.header_rows() {
        match rows.next() {
            Some(row) => headers.push(row?),
            None => break,
        }
    }
    if headers.is_empty() {
        return Err(ImportError::MalformedInput(format!(
            "{} is empty",
            display_name(file.path())
        )));
    }
    let columns = kind.discover(&headers)?;
    let mut title = None;
    for row in rows {
        let row = row?;
        if row.is_blank() {
            continue;
        }
        title = columns.title_of(&row);
        break;
    }
    Ok(FilePreamble {
        headers,
        columns,
        title,
    })
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Returns the shared title (if the layout has one). The first file sets
/// the expectation for both column layout and title; any later file that
/// disagrees rejects the whole upload. Only the first file's header is
/// written to the merged file, so the layouts must match column for column.
pub fn validate_titles(kind: FormatKind, files: &[TabularFile]) -> ImportResult<Option<String>> {
    let Some((first, rest)) = files.split_first() else {
        return Err(ImportError::MalformedInput("no input files".to_string()));
    };
    let FilePreamble {
        columns: layout,
        title: expected,
        ..
    } = read_preamble(kind, first)?;
    for file in rest {
        let preamble = read_preamble(kind, file)?;
        if preamble.columns != layout {
            debug!(
                expected = ?layout,
                found = ?preamble.columns,
                "column layout differs"
            );
            return Err(ImportError::MalformedInput(format!(
                "{} has a different column layout than {}",
                display_name(file.path()),
                display_name(first.path())
            )));
        }
        let found = preamble.title;
        if found != expected {
            return Err(ImportError::TitleMismatch {
                expected: expected.unwrap_or_default(),
                found: found.unwrap_or_default(),
                file: display_name(file.path()),
            });
        }
    }
    Ok(expected)
}

#[derive(Debug, Clone)]
pub struct MergedUpload {
    pub path: PathBuf,
    pub delimiter: Delimiter,
    pub title: Option<String>,
    pub files: usize,
    pub data_rows: usize,
    pub sha256: String,
}

impl MergedUpload {
    pub fn file_name(&self) -> String {
        display_name(&self.path)
    }

    pub fn tabular(&self) -> TabularFile {
        TabularFile::new(&self.path, self.delimiter)
    }
}

/// Validates titles, then writes one working file under `uploads_dir`:
/// the first file's header row(s) once, followed by every file's data rows.
pub fn merge_files(
    kind: FormatKind,
    files: &[TabularFile],
    uploads_dir: &Path,
) -> ImportResult<MergedUpload> {
    let title = validate_titles(kind, files)?;
    let delimiter = files[0].delimiter();
    let path = uploads_dir.join(format!("{}.{}", Uuid::new_v4(), delimiter.extension()));

    let data_rows = match write_merged(kind, files, delimiter, &path) {
        Ok(n) => n,
        Err(e) => {
            let _ = std::fs::remove_file(&path);
            return Err(e);
        }
    };

    let bytes = std::fs::read(&path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = format!("{:x}", hasher.finalize());

    info!(
        format = kind.as_str(),
        files = files.len(),
        data_rows,
        path = %path.display(),
        "merged upload"
    );
    Ok(MergedUpload {
        path,
        delimiter,
        title,
        files: files.len(),
        data_rows,
        sha256,
    })
}

fn write_merged(
    kind: FormatKind,
    files: &[TabularFile],
    delimiter: Delimiter,
    path: &Path,
) -> ImportResult<usize> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter.byte())
        .flexible(true)
        .from_path(path)?;
    let mut data_rows = 0;
    for (i, file) in files.iter().enumerate() {
        for (n, row) in file.rows()?.enumerate() {
            let row = row?;
            let is_header = n < kind.header_rows();
            if is_header && i > 0 {
                continue;
            }
            if !is_header {
                if row.is_blank() {
                    continue;
                }
                data_rows += 1;
            }
            writer.write_record(&row.fields)?;
        }
        debug!(file = %file.path().display(), "appended file");
    }
    writer.flush()?;
    Ok(data_rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{parse_file, test_files};

    fn uploads_dir() -> PathBuf {
        let dir = test_files::write_temp("marker", "")
            .parent()
            .expect("parent")
            .join("uploads");
        std::fs::create_dir_all(&dir).expect("uploads dir");
        dir
    }

    #[test]
    fn title_mismatch_rejects_batch_without_writing() {
        let a = test_files::write_temp(
            "a.csv",
            "StudentId,Standard,Score,Test Name\n1001,RI.9-10.3,2,ELA Cycle 1\n",
        );
        let b = test_files::write_temp(
            "b.csv",
            "StudentId,Standard,Score,Test Name\n\n1002,RI.9-10.3,1,ELA Cycle 2\n",
        );
        let dir = uploads_dir();
        let files = [
            TabularFile::new(&a, Delimiter::Comma),
            TabularFile::new(&b, Delimiter::Comma),
        ];
        match merge_files(FormatKind::NamedColumns, &files, &dir) {
            Err(ImportError::TitleMismatch {
                expected,
                found,
                file,
            }) => {
                assert_eq!(expected, "ELA Cycle 1");
                assert_eq!(found, "ELA Cycle 2");
                assert_eq!(file, "b.csv");
            }
            other => panic!("unexpected: {other:?}"),
        }
        let written = std::fs::read_dir(&dir).expect("read dir").count();
        assert_eq!(written, 0);
    }

    #[test]
    fn merged_file_has_header_once_and_all_data_rows() {
        let a = test_files::write_temp(
            "a.csv",
            "Student ID,Test Title,RI.9-10.3,\n,,4,\n1001,ELA Cycle 1,3,B\n",
        );
        let b = test_files::write_temp(
            "b.csv",
            "Student ID,Test Title,RI.9-10.3,\n,,4,\n1002,ELA Cycle 1,2,\"A, then B\"\n1003,ELA Cycle 1,,\n",
        );
        let dir = uploads_dir();
        let files = [
            TabularFile::new(&a, Delimiter::Comma),
            TabularFile::new(&b, Delimiter::Comma),
        ];
        let merged = merge_files(FormatKind::DualHeader, &files, &dir).expect("merge");
        assert_eq!(merged.files, 2);
        assert_eq!(merged.data_rows, 3);
        assert_eq!(merged.title.as_deref(), Some("ELA Cycle 1"));
        assert_eq!(merged.sha256.len(), 64);
        assert!(merged.file_name().ends_with(".csv"));

        let parsed = parse_file(FormatKind::DualHeader, &merged.tabular(), "x").expect("parse");
        let students: Vec<&str> = parsed
            .records
            .iter()
            .map(|r| r.local_student_id.as_str())
            .collect();
        assert_eq!(students, vec!["1001", "1002"]);
    }

    #[test]
    fn reordered_columns_reject_batch_without_writing() {
        let a = test_files::write_temp(
            "a.csv",
            "Student ID,Test Title,RI.9-10.3,,RL.9-10.1,\n,,4,,2,\n1001,ELA Cycle 1,3,B,1,A\n",
        );
        let b = test_files::write_temp(
            "b.csv",
            "Student ID,Test Title,RL.9-10.1,,RI.9-10.3,\n,,2,,4,\n1002,ELA Cycle 1,1,A,3,B\n",
        );
        let dir = uploads_dir();
        let files = [
            TabularFile::new(&a, Delimiter::Comma),
            TabularFile::new(&b, Delimiter::Comma),
        ];
        let err = merge_files(FormatKind::DualHeader, &files, &dir).expect_err("layouts differ");
        assert_eq!(err.code(), "malformed_input");
        assert!(err.to_string().contains("b.csv"), "{err}");
        let written = std::fs::read_dir(&dir).expect("read dir").count();
        assert_eq!(written, 0);
    }

    #[test]
    fn extra_named_column_rejects_batch() {
        let a = test_files::write_temp(
            "a.csv",
            "StudentId,Standard,Score,Test Name\n1001,RI.9-10.3,2,ELA Cycle 1\n",
        );
        let b = test_files::write_temp(
            "b.csv",
            "StudentId,Standard,Score,Max Score,Test Name\n1002,RI.9-10.3,2,4,ELA Cycle 1\n",
        );
        let err = validate_titles(
            FormatKind::NamedColumns,
            &[
                TabularFile::new(&a, Delimiter::Comma),
                TabularFile::new(&b, Delimiter::Comma),
            ],
        )
        .expect_err("layouts differ");
        assert_eq!(err.code(), "malformed_input");
    }

    #[test]
    fn structural_problems_surface_before_title_check() {
        let a = test_files::write_temp("a.csv", "Name,Standard,Score\nx,RI.9-10.3,1\n");
        let err = validate_titles(
            FormatKind::NamedColumns,
            &[TabularFile::new(&a, Delimiter::Comma)],
        )
        .expect_err("missing id column");
        assert_eq!(err.code(), "required_column_missing");
    }
}
