use super::fit::StopReason;
use super::store::ColumnTransform;
use faer::{Mat, MatRef};
use serde::de::Error as DeError;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

/// Standard deviation and explained-variance shares per component.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImportanceTable {
    pub std_deviation: Vec<f64>,
    pub proportion_of_variance: Vec<f64>,
    pub cumulative_proportion: Vec<f64>,
}

impl ImportanceTable {
    /// `sdev = sigma / sqrt(n - 1)`; proportions are taken over the retained components.
    pub fn from_singular_values(singular_values: &[f64], n_rows: usize) -> Self {
        let denom = (n_rows.saturating_sub(1).max(1) as f64).sqrt();
        let std_deviation: Vec<f64> = singular_values.iter().map(|s| s / denom).collect();
        let total: f64 = std_deviation.iter().map(|sd| sd * sd).sum();

        let proportion_of_variance: Vec<f64> = std_deviation
            .iter()
            .map(|sd| if total > 0.0 { sd * sd / total } else { 0.0 })
            .collect();
        let cumulative_proportion = proportion_of_variance
            .iter()
            .scan(0.0, |running, share| {
                *running += share;
                Some(*running)
            })
            .collect();

        Self {
            std_deviation,
            proportion_of_variance,
            cumulative_proportion,
        }
    }
}

/// Result of a converged factorization run.
#[derive(Clone, Debug)]
pub struct AlsPcaModel {
    pub(crate) n_rows: usize,
    pub(crate) n_cols: usize,
    pub(crate) gamma: f64,
    pub(crate) transform: ColumnTransform,
    pub(crate) eigenvectors: Mat<f64>,
    pub(crate) singular_values: Vec<f64>,
    pub(crate) importance: ImportanceTable,
    pub(crate) x_factor: Mat<f64>,
    pub(crate) y_factor: Mat<f64>,
    pub(crate) iterations: usize,
    pub(crate) avg_change_obj: f64,
    pub(crate) objective: f64,
    pub(crate) residual: f64,
    pub(crate) stop_reason: StopReason,
}

impl AlsPcaModel {
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn components(&self) -> usize {
        self.eigenvectors.ncols()
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn transform(&self) -> &ColumnTransform {
        &self.transform
    }

    /// Orthonormal `p x k` principal directions.
    pub fn eigenvectors(&self) -> MatRef<'_, f64> {
        self.eigenvectors.as_ref()
    }

    pub fn singular_values(&self) -> &[f64] {
        &self.singular_values
    }

    pub fn importance(&self) -> &ImportanceTable {
        &self.importance
    }

    pub fn std_deviation(&self) -> &[f64] {
        &self.importance.std_deviation
    }

    /// The final `n x k` left factor `X`.
    pub fn x_factor(&self) -> MatRef<'_, f64> {
        self.x_factor.as_ref()
    }

    /// The final `p x k` right factor `Y'`.
    pub fn y_factor(&self) -> MatRef<'_, f64> {
        self.y_factor.as_ref()
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn avg_change_obj(&self) -> f64 {
        self.avg_change_obj
    }

    pub fn objective(&self) -> f64 {
        self.objective
    }

    /// `||A - X Y||_F^2` over observed cells on the internal scale.
    pub fn residual(&self) -> f64 {
        self.residual
    }

    pub fn stop_reason(&self) -> StopReason {
        self.stop_reason
    }

    /// Fitted row `x_i Y'ᵀ`, mapped back to the raw data scale.
    pub fn reconstruct_row(&self, row: usize) -> Option<Vec<f64>> {
        if row >= self.n_rows {
            return None;
        }
        let k = self.x_factor.ncols();
        Some(
            (0..self.n_cols)
                .map(|j| {
                    let fitted: f64 = (0..k)
                        .map(|c| self.x_factor[(row, c)] * self.y_factor[(j, c)])
                        .sum();
                    self.transform.denormalize(j, fitted)
                })
                .collect(),
        )
    }

    /// Saves the model in a human-readable TOML format.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        Ok(toml::from_str(&toml_string)?)
    }
}

#[derive(Serialize, Deserialize)]
struct MatrixData {
    nrows: usize,
    ncols: usize,
    data: Vec<f64>,
}

impl MatrixData {
    fn from_mat(mat: MatRef<'_, f64>) -> Self {
        let mut data = Vec::with_capacity(mat.nrows() * mat.ncols());
        for col in 0..mat.ncols() {
            for row in 0..mat.nrows() {
                data.push(mat[(row, col)]);
            }
        }
        Self {
            nrows: mat.nrows(),
            ncols: mat.ncols(),
            data,
        }
    }

    fn into_mat(self) -> Result<Mat<f64>, String> {
        let MatrixData { nrows, ncols, data } = self;
        if data.len() != nrows * ncols {
            return Err("matrix data length does not match dimensions".into());
        }
        Ok(Mat::from_fn(nrows, ncols, |row, col| data[col * nrows + row]))
    }
}

impl Serialize for AlsPcaModel {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("AlsPcaModel", 14)?;
        state.serialize_field("n_rows", &self.n_rows)?;
        state.serialize_field("n_cols", &self.n_cols)?;
        state.serialize_field("gamma", &self.gamma)?;
        state.serialize_field("iterations", &self.iterations)?;
        state.serialize_field("avg_change_obj", &self.avg_change_obj)?;
        state.serialize_field("objective", &self.objective)?;
        state.serialize_field("residual", &self.residual)?;
        state.serialize_field("stop_reason", &self.stop_reason)?;
        state.serialize_field("singular_values", &self.singular_values)?;
        state.serialize_field("transform", &self.transform)?;
        state.serialize_field("importance", &self.importance)?;
        state.serialize_field(
            "eigenvectors",
            &MatrixData::from_mat(self.eigenvectors.as_ref()),
        )?;
        state.serialize_field("x_factor", &MatrixData::from_mat(self.x_factor.as_ref()))?;
        state.serialize_field("y_factor", &MatrixData::from_mat(self.y_factor.as_ref()))?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for AlsPcaModel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct ModelData {
            n_rows: usize,
            n_cols: usize,
            gamma: f64,
            iterations: usize,
            avg_change_obj: f64,
            objective: f64,
            residual: f64,
            stop_reason: StopReason,
            singular_values: Vec<f64>,
            transform: ColumnTransform,
            importance: ImportanceTable,
            eigenvectors: MatrixData,
            x_factor: MatrixData,
            y_factor: MatrixData,
        }

        let raw = ModelData::deserialize(deserializer)?;
        Ok(AlsPcaModel {
            n_rows: raw.n_rows,
            n_cols: raw.n_cols,
            gamma: raw.gamma,
            transform: raw.transform,
            eigenvectors: raw.eigenvectors.into_mat().map_err(DeError::custom)?,
            singular_values: raw.singular_values,
            importance: raw.importance,
            x_factor: raw.x_factor.into_mat().map_err(DeError::custom)?,
            y_factor: raw.y_factor.into_mat().map_err(DeError::custom)?,
            iterations: raw.iterations,
            avg_change_obj: raw.avg_change_obj,
            objective: raw.objective,
            residual: raw.residual,
            stop_reason: raw.stop_reason,
        })
    }
}
