//! Typed artifacts written into per-category run subdirectories.
//!
//! Every artifact lands at `<run>/<category>/<tag>_<step>.<ext>`:
//!
//! | category       | type              | format                     |
//! |----------------|-------------------|----------------------------|
//! | `arrays`       | [`ArrayArchive`]  | Arrow IPC file (`.arrow`)  |
//! | `figures`      | [`PngFigure`]     | PNG (`.png`)               |
//! | `torch_models` | [`ModelWeights`]  | MessagePack (`.msgpack`)   |
//! | `checkpoints`  | [`Checkpoint`]    | MessagePack (`.msgpack`)   |
//!
//! Anything else can be logged by implementing [`Artifact`] for it.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use arrow::array::{ArrayRef, AsArray, Float64Builder, ListBuilder, StringArray, UInt64Builder};
use arrow::datatypes::{Float64Type, UInt64Type};
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ExplogError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactCategory {
    Arrays,
    Figures,
    TorchModels,
    Checkpoints,
}

impl ArtifactCategory {
    pub const ALL: [ArtifactCategory; 4] = [
        ArtifactCategory::Arrays,
        ArtifactCategory::Figures,
        ArtifactCategory::TorchModels,
        ArtifactCategory::Checkpoints,
    ];

    /// Name of the run subdirectory holding this category.
    pub fn dir_name(self) -> &'static str {
        match self {
            ArtifactCategory::Arrays => "arrays",
            ArtifactCategory::Figures => "figures",
            ArtifactCategory::TorchModels => "torch_models",
            ArtifactCategory::Checkpoints => "checkpoints",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ArtifactCategory::Arrays => "arrow",
            ArtifactCategory::Figures => "png",
            ArtifactCategory::TorchModels | ArtifactCategory::Checkpoints => "msgpack",
        }
    }

    /// `<tag>_<step>.<ext>`
    pub fn file_name(self, tag: &str, step: u64) -> String {
        format!("{tag}_{step}.{}", self.extension())
    }
}

impl fmt::Display for ArtifactCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for ArtifactCategory {
    type Err = ExplogError;

    fn from_str(s: &str) -> Result<Self> {
        ArtifactCategory::ALL
            .into_iter()
            .find(|c| c.dir_name() == s)
            .ok_or_else(|| ExplogError::UnsupportedCategory(s.to_string()))
    }
}

/// Something that can be persisted as a run artifact.
pub trait Artifact {
    fn category(&self) -> ArtifactCategory;

    /// Serialize the artifact in its category's format.
    fn write_to(&self, out: &mut dyn Write) -> Result<()>;
}

// ─── Arrays ──────────────────────────────────────────────────────────────────

/// A dense n-dimensional `f64` array in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl NdArray {
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ExplogError::InvalidArtifact(format!(
                "shape {shape:?} needs {expected} values, got {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }
}

impl From<Vec<f64>> for NdArray {
    fn from(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }
}

/// Named arrays saved together, one Arrow row per array (`name`, `shape`, `values`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArrayArchive {
    arrays: BTreeMap<String, NdArray>,
}

impl ArrayArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, array: impl Into<NdArray>) -> &mut Self {
        self.arrays.insert(name.into(), array.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&NdArray> {
        self.arrays.get(name)
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    fn to_record_batch(&self) -> Result<RecordBatch> {
        let names = StringArray::from_iter_values(self.arrays.keys());
        let mut shapes = ListBuilder::new(UInt64Builder::new());
        let mut values = ListBuilder::new(Float64Builder::new());
        for array in self.arrays.values() {
            for &dim in &array.shape {
                shapes.values().append_value(dim as u64);
            }
            shapes.append(true);
            values.values().append_slice(&array.data);
            values.append(true);
        }
        Ok(RecordBatch::try_from_iter([
            ("name", Arc::new(names) as ArrayRef),
            ("shape", Arc::new(shapes.finish()) as ArrayRef),
            ("values", Arc::new(values.finish()) as ArrayRef),
        ])?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let reader = FileReader::try_new(fs::File::open(path)?, None)?;
        let mut archive = Self::new();
        for batch in reader {
            let batch = batch?;
            let bad_layout = || ExplogError::InvalidArtifact(format!("{} is not an array archive", path.display()));
            let names = batch
                .column_by_name("name")
                .and_then(|c| c.as_string_opt::<i32>())
                .ok_or_else(bad_layout)?;
            let shapes = batch
                .column_by_name("shape")
                .and_then(|c| c.as_list_opt::<i32>())
                .ok_or_else(bad_layout)?;
            let values = batch
                .column_by_name("values")
                .and_then(|c| c.as_list_opt::<i32>())
                .ok_or_else(bad_layout)?;
            for row in 0..batch.num_rows() {
                let shape = shapes.value(row);
                let shape = shape.as_primitive_opt::<UInt64Type>().ok_or_else(bad_layout)?;
                let data = values.value(row);
                let data = data.as_primitive_opt::<Float64Type>().ok_or_else(bad_layout)?;
                let array = NdArray::new(
                    shape.values().iter().map(|&d| d as usize).collect(),
                    data.values().to_vec(),
                )?;
                archive.insert(names.value(row), array);
            }
        }
        Ok(archive)
    }
}

impl Artifact for ArrayArchive {
    fn category(&self) -> ArtifactCategory {
        ArtifactCategory::Arrays
    }

    fn write_to(&self, out: &mut dyn Write) -> Result<()> {
        let batch = self.to_record_batch()?;
        let mut writer = FileWriter::try_new(out, &batch.schema())?;
        writer.write(&batch)?;
        writer.finish()?;
        Ok(())
    }
}

// ─── Figures ─────────────────────────────────────────────────────────────────

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// An already-rendered PNG image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PngFigure {
    bytes: Vec<u8>,
}

impl PngFigure {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if !bytes.starts_with(&PNG_SIGNATURE) {
            return Err(ExplogError::InvalidArtifact("figure is not a PNG image".into()));
        }
        Ok(Self { bytes })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_bytes(fs::read(path)?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Artifact for PngFigure {
    fn category(&self) -> ArtifactCategory {
        ArtifactCategory::Figures
    }

    fn write_to(&self, out: &mut dyn Write) -> Result<()> {
        out.write_all(&self.bytes)?;
        Ok(())
    }
}

// ─── Model weights ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// A model's named parameter tensors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelWeights {
    tensors: BTreeMap<String, Tensor>,
}

impl ModelWeights {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Result<&mut Self> {
        let name = name.into();
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ExplogError::InvalidArtifact(format!(
                "tensor {name}: shape {shape:?} needs {expected} values, got {}",
                data.len()
            )));
        }
        self.tensors.insert(name, Tensor { shape, data });
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    pub fn num_parameters(&self) -> usize {
        self.tensors.values().map(|t| t.data.len()).sum()
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(rmp_serde::from_slice(&fs::read(path)?)?)
    }
}

impl Artifact for ModelWeights {
    fn category(&self) -> ArtifactCategory {
        ArtifactCategory::TorchModels
    }

    fn write_to(&self, out: &mut dyn Write) -> Result<()> {
        out.write_all(&rmp_serde::to_vec_named(self)?)?;
        Ok(())
    }
}

// ─── Checkpoints ─────────────────────────────────────────────────────────────

/// Any serializable training state, stored as MessagePack.
#[derive(Debug)]
pub struct Checkpoint<'a, T: ?Sized>(pub &'a T);

impl<T: Serialize + ?Sized> Artifact for Checkpoint<'_, T> {
    fn category(&self) -> ArtifactCategory {
        ArtifactCategory::Checkpoints
    }

    fn write_to(&self, out: &mut dyn Write) -> Result<()> {
        out.write_all(&rmp_serde::to_vec_named(self.0)?)?;
        Ok(())
    }
}

pub fn load_checkpoint<T: DeserializeOwned>(path: &Path) -> Result<T> {
    Ok(rmp_serde::from_slice(&fs::read(path)?)?)
}

// ─── Listing ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub category: ArtifactCategory,
    pub tag: String,
    pub step: u64,
    pub path: PathBuf,
}

/// Every artifact under `run_dir`, ordered by category, tag and step.
/// Files not following the `<tag>_<step>.<ext>` convention are skipped.
pub fn list_artifacts(run_dir: &Path) -> Result<Vec<ArtifactInfo>> {
    let mut out = vec![];
    for category in ArtifactCategory::ALL {
        let dir = run_dir.join(category.dir_name());
        if !dir.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some((tag, step)) = parse_artifact_name(name, category) else {
                continue;
            };
            out.push(ArtifactInfo {
                category,
                tag: tag.to_string(),
                step,
                path,
            });
        }
    }
    out.sort_by(|a, b| (a.category, &a.tag, a.step).cmp(&(b.category, &b.tag, b.step)));
    Ok(out)
}

fn parse_artifact_name(name: &str, category: ArtifactCategory) -> Option<(&str, u64)> {
    let stem = name.strip_suffix(category.extension())?.strip_suffix('.')?;
    let (tag, step) = stem.rsplit_once('_')?;
    Some((tag, step.parse().ok()?))
}
