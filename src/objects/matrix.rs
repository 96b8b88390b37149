//! Matrices and convolutions.
//!
//! A convolution is an `Int16` matrix with odd dimensions and a power-of-two scale.

use crate::core::context::Context;
use crate::core::error::{VxError, VxResult};
use crate::core::meta::MetaInfo;
use crate::core::reference::{AsHandle, Convolution, Creation, Matrix, ObjectData, Payload};
use crate::core::types::{Coordinates2d, DataType, MatrixPattern, ObjectType, Usage};
use serde::{Deserialize, Serialize};

pub struct MatrixData {
    pub data_type: DataType,
    pub rows: usize,
    pub columns: usize,
    pub origin: Coordinates2d,
    pub pattern: MatrixPattern,
    /// Row-major, native-endian.
    pub bytes: Vec<u8>,
}

impl MatrixData {
    pub(crate) fn meta(&self) -> MetaInfo {
        MetaInfo::Matrix {
            data_type: self.data_type,
            rows: self.rows,
            columns: self.columns,
        }
    }

    pub(crate) fn conform(&mut self, meta: &MetaInfo) -> VxResult<()> {
        let MetaInfo::Matrix { data_type, rows, columns } = *meta else {
            return Err(VxError::InvalidType);
        };
        if data_type != self.data_type {
            return Err(VxError::InvalidType);
        }
        if (rows, columns) != (self.rows, self.columns) {
            return Err(VxError::InvalidDimension);
        }
        Ok(())
    }
}

impl Payload for MatrixData {
    fn project(data: &mut ObjectData) -> Option<&mut Self> {
        match data {
            ObjectData::Matrix(d) => Some(d),
            _ => None,
        }
    }

    fn storage_bytes(&self) -> usize {
        self.bytes.len()
    }
}

pub struct ConvolutionData {
    pub rows: usize,
    pub columns: usize,
    pub scale: u32,
    pub coefficients: Vec<i16>,
}

impl ConvolutionData {
    pub(crate) fn meta(&self) -> MetaInfo {
        MetaInfo::Convolution {
            rows: self.rows,
            columns: self.columns,
        }
    }

    pub(crate) fn conform(&mut self, meta: &MetaInfo) -> VxResult<()> {
        match *meta {
            MetaInfo::Convolution { rows, columns } if (rows, columns) == (self.rows, self.columns) => Ok(()),
            MetaInfo::Convolution { .. } => Err(VxError::InvalidDimension),
            _ => Err(VxError::InvalidType),
        }
    }
}

impl Payload for ConvolutionData {
    fn project(data: &mut ObjectData) -> Option<&mut Self> {
        match data {
            ObjectData::Convolution(d) => Some(d),
            _ => None,
        }
    }

    fn storage_bytes(&self) -> usize {
        self.coefficients.len() * 2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixInfo {
    pub data_type: DataType,
    pub rows: usize,
    pub columns: usize,
    pub origin: Coordinates2d,
    pub pattern: MatrixPattern,
    pub size: usize,
}

fn copy_payload(stored: &mut [u8], bytes: &mut [u8], usage: Usage) -> VxResult<()> {
    if bytes.len() < stored.len() {
        return Err(VxError::InvalidParameters);
    }
    let n = stored.len();
    match usage {
        Usage::ReadOnly => bytes[..n].copy_from_slice(stored),
        Usage::WriteOnly => stored.copy_from_slice(&bytes[..n]),
        Usage::ReadWrite => return Err(VxError::InvalidParameters),
    }
    Ok(())
}

impl Context {
    pub fn create_matrix(&self, data_type: DataType, columns: usize, rows: usize) -> VxResult<Matrix> {
        if !data_type.is_matrix_type() {
            return Err(VxError::InvalidType);
        }
        if rows == 0 || columns == 0 {
            return Err(VxError::InvalidDimension);
        }
        let size = rows * columns * data_type.fixed_size().unwrap_or(1);
        self.inner.memory.allocate(size)?;
        let data = MatrixData {
            data_type,
            rows,
            columns,
            origin: Coordinates2d {
                x: (columns / 2) as u32,
                y: (rows / 2) as u32,
            },
            pattern: MatrixPattern::Other,
            bytes: vec![0u8; size],
        };
        match self.create_reference(Creation::external(ObjectType::Matrix), ObjectData::Matrix(data)) {
            Ok(h) => Ok(Matrix(h)),
            Err(e) => {
                self.inner.memory.release(size);
                Err(e)
            }
        }
    }

    /// `UInt8` matrix of 255/0 entries laid out in `pattern`.
    pub fn create_matrix_from_pattern(&self, pattern: MatrixPattern, columns: usize, rows: usize) -> VxResult<Matrix> {
        let matrix = self.create_matrix(DataType::UInt8, columns, rows)?;
        let (cx, cy) = ((columns / 2) as i64, (rows / 2) as i64);
        let mut bytes = vec![0u8; rows * columns];
        for y in 0..rows {
            for x in 0..columns {
                let (dx, dy) = (x as i64 - cx, y as i64 - cy);
                let on = match pattern {
                    MatrixPattern::Box => true,
                    MatrixPattern::Cross => dx == 0 || dy == 0,
                    MatrixPattern::Disk => {
                        let (rx, ry) = ((columns as f64) / 2.0, (rows as f64) / 2.0);
                        let (fx, fy) = ((x as f64 + 0.5 - rx) / rx, (y as f64 + 0.5 - ry) / ry);
                        fx * fx + fy * fy <= 1.0
                    }
                    MatrixPattern::Other => return Err(VxError::InvalidParameters),
                };
                bytes[y * columns + x] = if on { 255 } else { 0 };
            }
        }
        self.copy_matrix(matrix, &mut bytes, Usage::WriteOnly)?;
        self.with_payload::<MatrixData, _>(matrix.handle(), |d| {
            d.pattern = pattern;
            Ok(())
        })?;
        Ok(matrix)
    }

    pub fn query_matrix(&self, matrix: Matrix) -> VxResult<MatrixInfo> {
        self.with_payload::<MatrixData, _>(matrix.handle(), |d| {
            Ok(MatrixInfo {
                data_type: d.data_type,
                rows: d.rows,
                columns: d.columns,
                origin: d.origin,
                pattern: d.pattern,
                size: d.bytes.len(),
            })
        })
    }

    /// The origin must lie inside the matrix.
    pub fn set_matrix_origin(&self, matrix: Matrix, origin: Coordinates2d) -> VxResult<()> {
        self.with_payload::<MatrixData, _>(matrix.handle(), |d| {
            if origin.x as usize >= d.columns || origin.y as usize >= d.rows {
                return Err(VxError::InvalidValue);
            }
            d.origin = origin;
            Ok(())
        })
    }

    /// Copy the row-major content to or from `bytes`.
    pub fn copy_matrix(&self, matrix: Matrix, bytes: &mut [u8], usage: Usage) -> VxResult<()> {
        self.check_accessible(matrix.handle())?;
        self.with_payload::<MatrixData, _>(matrix.handle(), |d| copy_payload(&mut d.bytes, bytes, usage))?;
        if usage.writes() {
            self.wrote(matrix.handle());
        } else {
            self.read(matrix.handle());
        }
        Ok(())
    }

    pub(crate) fn matrix_snapshot(&self, matrix: Matrix) -> VxResult<(MatrixInfo, Vec<u8>)> {
        let info = self.query_matrix(matrix)?;
        let bytes = self.with_payload::<MatrixData, _>(matrix.handle(), |d| Ok(d.bytes.clone()))?;
        Ok((info, bytes))
    }

    /// Convolution with odd dimensions between 3 and 9.
    pub fn create_convolution(&self, columns: usize, rows: usize) -> VxResult<Convolution> {
        let ok = |n: usize| (3..=9).contains(&n) && n % 2 == 1;
        if !ok(columns) || !ok(rows) {
            return Err(VxError::InvalidDimension);
        }
        self.inner.memory.allocate(columns * rows * 2)?;
        let data = ConvolutionData {
            rows,
            columns,
            scale: 1,
            coefficients: vec![0; rows * columns],
        };
        match self.create_reference(Creation::external(ObjectType::Convolution), ObjectData::Convolution(data)) {
            Ok(h) => Ok(Convolution(h)),
            Err(e) => {
                self.inner.memory.release(columns * rows * 2);
                Err(e)
            }
        }
    }

    /// The scale must be a power of two.
    pub fn set_convolution_scale(&self, conv: Convolution, scale: u32) -> VxResult<()> {
        if !scale.is_power_of_two() {
            return Err(VxError::InvalidValue);
        }
        self.with_payload::<ConvolutionData, _>(conv.handle(), |d| {
            d.scale = scale;
            Ok(())
        })
    }

    /// `(columns, rows, scale)`.
    pub fn query_convolution(&self, conv: Convolution) -> VxResult<(usize, usize, u32)> {
        self.with_payload::<ConvolutionData, _>(conv.handle(), |d| Ok((d.columns, d.rows, d.scale)))
    }

    pub fn copy_convolution_coefficients(&self, conv: Convolution, coefficients: &mut [i16], usage: Usage) -> VxResult<()> {
        self.check_accessible(conv.handle())?;
        self.with_payload::<ConvolutionData, _>(conv.handle(), |d| {
            copy_payload(
                bytemuck::cast_slice_mut(&mut d.coefficients),
                bytemuck::cast_slice_mut(coefficients),
                usage,
            )
        })?;
        if usage.writes() {
            self.wrote(conv.handle());
        } else {
            self.read(conv.handle());
        }
        Ok(())
    }

    pub(crate) fn convolution_snapshot(&self, conv: Convolution) -> VxResult<(usize, usize, u32, Vec<i16>)> {
        self.with_payload::<ConvolutionData, _>(conv.handle(), |d| {
            Ok((d.columns, d.rows, d.scale, d.coefficients.clone()))
        })
    }
}
