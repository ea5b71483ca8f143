//! Dataset partitions stored as Parquet files

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::encoder::{TextTokenizer, TokenizedInput};
use crate::error::{Error, Result};

/// Fixed role of a partition in the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionRole {
    /// Gradient updates
    Train,
    /// Per-epoch accuracy
    Test,
    /// Final evaluation and confusion matrix
    Eval,
}

impl PartitionRole {
    /// All roles in loading order
    pub const ALL: [PartitionRole; 3] =
        [PartitionRole::Train, PartitionRole::Test, PartitionRole::Eval];

    /// Role name used in file names and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionRole::Train => "train",
            PartitionRole::Test => "test",
            PartitionRole::Eval => "eval",
        }
    }
}

impl fmt::Display for PartitionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Locations of the three partitions of a dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetPaths {
    /// Training partition
    pub train: PathBuf,
    /// Test partition
    pub test: PathBuf,
    /// Evaluation partition
    pub eval: PathBuf,
}

impl DatasetPaths {
    /// `{data_dir}/{role}_conjunto_{id}_output.parquet` for each role
    pub fn resolve<P: AsRef<Path>>(data_dir: P, dataset: &str) -> Self {
        let dir = data_dir.as_ref();
        let path = |role: PartitionRole| {
            dir.join(format!("{}_conjunto_{}_output.parquet", role, dataset))
        };
        Self {
            train: path(PartitionRole::Train),
            test: path(PartitionRole::Test),
            eval: path(PartitionRole::Eval),
        }
    }

    /// Path of one partition
    pub fn path(&self, role: PartitionRole) -> &Path {
        match role {
            PartitionRole::Train => &self.train,
            PartitionRole::Test => &self.test,
            PartitionRole::Eval => &self.eval,
        }
    }

    /// Fail on the first partition that is not a file
    pub fn ensure_exist(&self) -> Result<()> {
        for role in PartitionRole::ALL {
            let path = self.path(role);
            if !path.is_file() {
                return Err(Error::MissingPartition {
                    role: role.to_string(),
                    path: path.to_path_buf(),
                });
            }
        }
        Ok(())
    }
}

/// One labelled text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Free text
    pub text: String,
    /// Class label
    pub label: u32,
}

/// Ordered records of one partition
#[derive(Debug, Clone)]
pub struct Partition {
    role: PartitionRole,
    records: Vec<Record>,
}

impl Partition {
    /// Create a partition from records
    pub fn new(role: PartitionRole, records: Vec<Record>) -> Self {
        Self { role, records }
    }

    /// Read a Parquet file row by row.
    ///
    /// The text column must hold strings; the label column may use any
    /// integer type but must not be negative. Other columns are ignored.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn load<P: AsRef<Path>>(
        role: PartitionRole,
        path: P,
        text_column: &str,
        label_column: &str,
    ) -> Result<Self> {
        let path = path.as_ref();
        let context = |row: usize, msg: String| {
            Error::data(format!("{} row {}: {}", path.display(), row, msg))
        };

        let reader = SerializedFileReader::new(File::open(path)?)?;
        let num_rows = reader.metadata().file_metadata().num_rows().max(0) as usize;
        let mut records = Vec::with_capacity(num_rows);

        for (index, row) in reader.get_row_iter(None)?.enumerate() {
            let row = row?;
            let mut text = None;
            let mut label = None;
            for (name, field) in row.get_column_iter() {
                if name == text_column {
                    text = Some(field_to_text(field).map_err(|msg| context(index, msg))?);
                } else if name == label_column {
                    label = Some(field_to_label(field).map_err(|msg| context(index, msg))?);
                }
            }

            let missing = |column: &str| context(index, format!("missing column '{}'", column));
            let text = text.ok_or_else(|| missing(text_column))?;
            let label = label.ok_or_else(|| missing(label_column))?;
            records.push(Record { text, label });
        }

        info!("Loaded {} {} records", records.len(), role);
        Ok(Self { role, records })
    }

    /// Fail if any label does not fit a head with `num_labels` outputs
    pub fn check_labels(&self, num_labels: usize) -> Result<()> {
        match self.records.iter().position(|r| r.label as usize >= num_labels) {
            Some(index) => Err(Error::data(format!(
                "{} record {} has label {} but the model has {} labels",
                self.role, index, self.records[index].label, num_labels
            ))),
            None => Ok(()),
        }
    }

    /// Partition role
    pub fn role(&self) -> PartitionRole {
        self.role
    }

    /// Records in file order
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the partition has no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn field_to_text(field: &Field) -> std::result::Result<String, String> {
    match field {
        Field::Str(s) => Ok(s.clone()),
        Field::Bytes(bytes) => bytes
            .as_utf8()
            .map(str::to_string)
            .map_err(|e| format!("text is not valid UTF-8: {}", e)),
        Field::Null => Err("text is null".to_string()),
        other => Err(format!("text column holds a non-string value: {}", other)),
    }
}

fn field_to_label(field: &Field) -> std::result::Result<u32, String> {
    let value: i128 = match field {
        Field::Byte(v) => *v as i128,
        Field::Short(v) => *v as i128,
        Field::Int(v) => *v as i128,
        Field::Long(v) => *v as i128,
        Field::UByte(v) => *v as i128,
        Field::UShort(v) => *v as i128,
        Field::UInt(v) => *v as i128,
        Field::ULong(v) => *v as i128,
        Field::Null => return Err("label is null".to_string()),
        other => return Err(format!("label column holds a non-integer value: {}", other)),
    };
    u32::try_from(value).map_err(|_| format!("label {} is out of range", value))
}

/// Token ids, masks and labels of a partition, in file order
#[derive(Debug, Clone)]
pub struct TokenizedPartition {
    role: PartitionRole,
    records: Vec<TokenizedInput>,
}

impl TokenizedPartition {
    /// Tokenize every text in one batch call; texts and raw labels are dropped
    #[instrument(skip_all, fields(role = %partition.role(), records = partition.len()))]
    pub fn from_partition(partition: Partition, tokenizer: &TextTokenizer) -> Result<Self> {
        let role = partition.role;
        let (texts, labels): (Vec<String>, Vec<u32>) =
            partition.records.into_iter().map(|r| (r.text, r.label)).unzip();

        let encodings = tokenizer.encode_batch(&texts)?;
        let records = encodings
            .iter()
            .zip(labels)
            .map(|(encoding, label)| TokenizedInput::from_encoding(encoding, label))
            .collect();

        Ok(Self { role, records })
    }

    /// Create from already tokenized records
    pub fn new(role: PartitionRole, records: Vec<TokenizedInput>) -> Self {
        Self { role, records }
    }

    /// Partition role
    pub fn role(&self) -> PartitionRole {
        self.role
    }

    /// Records in file order
    pub fn records(&self) -> &[TokenizedInput] {
        &self.records
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the partition has no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::tests::fixtures;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_paths() {
        let paths = DatasetPaths::resolve("preprocessing", "7");
        assert_eq!(paths.train, PathBuf::from("preprocessing/train_conjunto_7_output.parquet"));
        assert_eq!(paths.test, PathBuf::from("preprocessing/test_conjunto_7_output.parquet"));
        assert_eq!(paths.eval, PathBuf::from("preprocessing/eval_conjunto_7_output.parquet"));
    }

    #[test]
    fn test_ensure_exist_names_first_missing_partition() {
        let dir = TempDir::new().unwrap();
        let paths = DatasetPaths::resolve(dir.path(), "3");
        fixtures::write_partition(&paths.train, &[("alpha", 0)]);

        match paths.ensure_exist() {
            Err(Error::MissingPartition { role, path }) => {
                assert_eq!(role, "test");
                assert_eq!(path, paths.test);
            }
            other => panic!("unexpected result: {:?}", other),
        }

        fixtures::write_partition(&paths.test, &[("alpha", 0)]);
        fixtures::write_partition(&paths.eval, &[("alpha", 0)]);
        assert!(paths.ensure_exist().is_ok());
    }

    #[test]
    fn test_load_keeps_file_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("train.parquet");
        fixtures::write_partition(&path, &[("alpha beta", 1), ("gamma", 0), ("delta", 4)]);

        let partition = Partition::load(PartitionRole::Train, &path, "texto", "labels").unwrap();
        assert_eq!(partition.len(), 3);
        assert_eq!(
            partition.records()[0],
            Record { text: "alpha beta".to_string(), label: 1 }
        );
        assert_eq!(partition.records()[2].label, 4);
    }

    #[test]
    fn test_load_rejects_missing_column_and_negative_label() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("eval.parquet");
        fixtures::write_partition(&path, &[("alpha", 0)]);
        let err = Partition::load(PartitionRole::Eval, &path, "text", "labels").unwrap_err();
        assert!(err.to_string().contains("missing column 'text'"));

        fixtures::write_partition(&path, &[("alpha", 0), ("beta", -2)]);
        let err = Partition::load(PartitionRole::Eval, &path, "texto", "labels").unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn test_check_labels() {
        let partition = Partition::new(
            PartitionRole::Train,
            vec![Record { text: "a".into(), label: 0 }, Record { text: "b".into(), label: 2 }],
        );
        assert!(partition.check_labels(3).is_ok());
        assert!(partition.check_labels(2).is_err());
    }

    #[test]
    fn test_tokenized_partition_drops_text() {
        let dir = TempDir::new().unwrap();
        let path = fixtures::write_tokenizer(dir.path());
        let tokenizer = TextTokenizer::from_file(path, 16, None, None).unwrap();
        let partition = Partition::new(
            PartitionRole::Test,
            vec![
                Record { text: "alpha".into(), label: 1 },
                Record { text: "beta gamma".into(), label: 0 },
            ],
        );

        let tokenized = TokenizedPartition::from_partition(partition, &tokenizer).unwrap();
        assert_eq!(tokenized.role(), PartitionRole::Test);
        assert_eq!(tokenized.records()[0].label, 1);
        assert_eq!(tokenized.records()[0].len(), 3);
        assert_eq!(tokenized.records()[1].attention_mask, vec![1, 1, 1, 1]);
    }
}
