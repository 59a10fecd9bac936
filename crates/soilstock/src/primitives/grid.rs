//! Raster grid primitives: geo-referenced grids, covariate stacks, masks.
//!
//! ## Purpose
//!
//! This module provides the dense raster types the interpolators and the
//! stock integrator operate on: a NaN-nodata [`Grid`] with an affine
//! [`GeoTransform`], the co-registered environmental [`CovariateStack`],
//! the categorical [`StratumMask`], and the derived surface types
//! ([`PredictionSurface`], [`StockLayer`]).
//!
//! ## Design notes
//!
//! * **Storage**: `ndarray::Array2<f64>` in row-major order; row 0 is the
//!   northernmost row (origin at the top-left corner, y decreasing).
//! * **Nodata**: `f64::NAN` marks undefined cells; all consumers must treat
//!   NaN as "not defined" rather than a value.
//! * **Co-registration**: every layer of a stack shares one transform, CRS,
//!   and shape; this is validated at construction.
//!
//! ## Invariants
//!
//! * `PredictionSurface` variance is >= 0 at every defined cell.
//! * `StockLayer` conservative <= mean and conservative >= 0 wherever both
//!   are defined.
//! * Cell size is positive and cells are square.

// External dependencies
use ndarray::Array2;

// Internal dependencies
use crate::primitives::errors::StockError;

// ============================================================================
// Geo-referencing
// ============================================================================

/// Affine geo-transform for a north-up raster with square cells.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    /// X coordinate of the top-left corner of cell (0, 0).
    pub origin_x: f64,
    /// Y coordinate of the top-left corner of cell (0, 0).
    pub origin_y: f64,
    /// Cell edge length in CRS units (positive).
    pub cell_size: f64,
}

impl GeoTransform {
    /// Create a transform from the top-left corner and cell size.
    pub fn new(origin_x: f64, origin_y: f64, cell_size: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            cell_size,
        }
    }

    /// Center coordinates of cell (row, col).
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.cell_size,
            self.origin_y - (row as f64 + 0.5) * self.cell_size,
        )
    }

    /// Cell (row, col) containing point (x, y), if inside an
    /// `rows` x `cols` raster.
    pub fn locate(&self, x: f64, y: f64, rows: usize, cols: usize) -> Option<(usize, usize)> {
        let col = (x - self.origin_x) / self.cell_size;
        let row = (self.origin_y - y) / self.cell_size;
        if col < 0.0 || row < 0.0 {
            return None;
        }
        let (row, col) = (row as usize, col as usize);
        if row < rows && col < cols {
            Some((row, col))
        } else {
            None
        }
    }
}

// ============================================================================
// Grid
// ============================================================================

/// A single-band geo-referenced grid with NaN as nodata.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    /// Cell values; NaN marks nodata.
    pub data: Array2<f64>,
    /// Geo-referencing for the grid.
    pub transform: GeoTransform,
}

impl Grid {
    /// Create a grid filled with nodata.
    pub fn filled_nodata(rows: usize, cols: usize, transform: GeoTransform) -> Self {
        Self {
            data: Array2::from_elem((rows, cols), f64::NAN),
            transform,
        }
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// Value at (row, col); NaN when out of bounds or nodata.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data.get((row, col)).copied().unwrap_or(f64::NAN)
    }

    /// Set the value at (row, col). Out-of-bounds writes are ignored.
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        if let Some(cell) = self.data.get_mut((row, col)) {
            *cell = value;
        }
    }

    /// Number of defined (non-NaN) cells.
    pub fn defined_cells(&self) -> usize {
        self.data.iter().filter(|v| v.is_finite()).count()
    }

    /// Mean over defined cells; NaN when no cell is defined.
    pub fn defined_mean(&self) -> f64 {
        let mut sum = 0.0;
        let mut n = 0usize;
        for &v in self.data.iter() {
            if v.is_finite() {
                sum += v;
                n += 1;
            }
        }
        if n == 0 {
            f64::NAN
        } else {
            sum / n as f64
        }
    }

    /// Apply a function to every defined cell, leaving nodata untouched.
    pub fn map_defined(&self, f: impl Fn(f64) -> f64) -> Grid {
        Grid {
            data: self.data.mapv(|v| if v.is_finite() { f(v) } else { v }),
            transform: self.transform,
        }
    }
}

// ============================================================================
// Covariate Stack
// ============================================================================

/// A co-registered stack of environmental raster covariates.
///
/// All layers share one CRS, geo-transform, and shape. Supplied by the
/// upstream covariate provider; the core only reads from it.
#[derive(Debug, Clone)]
pub struct CovariateStack {
    /// Covariate names, parallel to `layers`.
    pub names: Vec<String>,
    /// Covariate rasters; NaN marks nodata.
    pub layers: Vec<Array2<f64>>,
    /// Shared geo-referencing.
    pub transform: GeoTransform,
    /// Coordinate reference system label (e.g. an EPSG code string).
    pub crs: String,
}

impl CovariateStack {
    /// Validate and assemble a covariate stack.
    pub fn new(
        names: Vec<String>,
        layers: Vec<Array2<f64>>,
        transform: GeoTransform,
        crs: String,
    ) -> Result<Self, StockError> {
        if names.is_empty() || layers.is_empty() {
            return Err(StockError::CovariateMismatch(
                "covariate stack has no layers".into(),
            ));
        }
        if names.len() != layers.len() {
            return Err(StockError::CovariateMismatch(format!(
                "{} names for {} layers",
                names.len(),
                layers.len()
            )));
        }
        if !transform.cell_size.is_finite() || transform.cell_size <= 0.0 {
            return Err(StockError::InvalidCellSize(transform.cell_size));
        }
        let shape = layers[0].dim();
        for (name, layer) in names.iter().zip(layers.iter()) {
            if layer.dim() != shape {
                return Err(StockError::CovariateMismatch(format!(
                    "layer '{}' has shape {:?}, expected {:?}",
                    name,
                    layer.dim(),
                    shape
                )));
            }
        }
        Ok(Self {
            names,
            layers,
            transform,
            crs,
        })
    }

    /// Number of rows shared by all layers.
    pub fn rows(&self) -> usize {
        self.layers[0].nrows()
    }

    /// Number of columns shared by all layers.
    pub fn cols(&self) -> usize {
        self.layers[0].ncols()
    }

    /// Number of covariates.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// True when the stack holds no covariates.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Extract the covariate vector at a point.
    ///
    /// Returns `None` when the point is outside the stack extent or any
    /// covariate is nodata there (incomplete rows are dropped upstream).
    pub fn extract(&self, x: f64, y: f64) -> Option<Vec<f64>> {
        let (row, col) = self.transform.locate(x, y, self.rows(), self.cols())?;
        self.extract_cell(row, col)
    }

    /// Extract the covariate vector at a cell, `None` if any layer is nodata.
    pub fn extract_cell(&self, row: usize, col: usize) -> Option<Vec<f64>> {
        let mut values = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let v = *layer.get((row, col))?;
            if !v.is_finite() {
                return None;
            }
            values.push(v);
        }
        Some(values)
    }
}

// ============================================================================
// Stratum Mask
// ============================================================================

/// Categorical stratum raster: one label index per cell, -1 as nodata.
#[derive(Debug, Clone)]
pub struct StratumMask {
    /// Stratum labels; cell values index into this list.
    pub labels: Vec<String>,
    /// Label index per cell; negative values mark nodata.
    pub index: Array2<i32>,
    /// Geo-referencing for the mask.
    pub transform: GeoTransform,
    /// Coordinate reference system label.
    pub crs: String,
}

impl StratumMask {
    /// Validate and assemble a stratum mask.
    pub fn new(
        labels: Vec<String>,
        index: Array2<i32>,
        transform: GeoTransform,
        crs: String,
    ) -> Result<Self, StockError> {
        if labels.is_empty() {
            return Err(StockError::InvalidRecord(
                "stratum mask has no labels".into(),
            ));
        }
        let max = labels.len() as i32;
        if index.iter().any(|&v| v >= max) {
            return Err(StockError::InvalidRecord(format!(
                "stratum mask references label index >= {max}"
            )));
        }
        Ok(Self {
            labels,
            index,
            transform,
            crs,
        })
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.index.nrows()
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.index.ncols()
    }

    /// Stratum label at a cell, `None` for nodata.
    pub fn stratum_at(&self, row: usize, col: usize) -> Option<&str> {
        let idx = *self.index.get((row, col))?;
        if idx < 0 {
            None
        } else {
            self.labels.get(idx as usize).map(String::as_str)
        }
    }
}

// ============================================================================
// Derived Surfaces
// ============================================================================

/// Interpolated concentration surface for one standard depth.
#[derive(Debug, Clone)]
pub struct PredictionSurface {
    /// Standard depth the surface belongs to (cm).
    pub depth: f64,
    /// Predicted mean concentration per cell (g/kg).
    pub mean: Grid,
    /// Prediction variance per cell ((g/kg)^2); >= 0 at every defined cell.
    pub variance: Option<Grid>,
    /// Cells flagged as outside the area of reliable prediction.
    pub extrapolation_mask: Option<Array2<bool>>,
    /// Coordinate reference system label.
    pub crs: String,
}

/// Areal stock surface for one reporting depth interval.
#[derive(Debug, Clone)]
pub struct StockLayer {
    /// Reporting interval (cm): (top, bottom).
    pub interval: (f64, f64),
    /// Mean stock per cell (t/ha).
    pub mean: Grid,
    /// Standard error per cell (t/ha), when uncertainty is available.
    pub se: Option<Grid>,
    /// Conservative lower-bound stock per cell (t/ha); omitted rather than
    /// fabricated when no variance input exists.
    pub conservative: Option<Grid>,
    /// True when a variance input was missing and only the mean is reported.
    pub uncertainty_unavailable: bool,
}
