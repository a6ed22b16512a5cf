//! In-memory matrix source.
use crate::data::Numeric;
use crate::source::VectorSource;
use crate::{Error, Result};
use ndarray::prelude::*;
use std::borrow::Cow;

/// `size × dim` matrix of vectors held contiguously in memory.
#[derive(Debug, Clone)]
pub struct MemorySource<N> {
    data: Vec<N>,
    dim: usize,
}

impl<N: Numeric> MemorySource<N> {
    /// Wrap a flat row-major buffer of `dim`-length vectors.
    pub fn from_vec(dim: usize, data: Vec<N>) -> Result<MemorySource<N>> {
        if dim == 0 {
            return Err(Error::Param("vector dimension must be positive".to_string()));
        }
        if data.len() % dim != 0 {
            return Err(Error::Param(format!(
                "buffer of {} scalars is not a whole number of {}-dimensional vectors",
                data.len(),
                dim
            )));
        }
        Ok(MemorySource { data, dim })
    }

    /// Wrap a 2-D array; rows are vectors.
    pub fn from_array(array: Array2<N>) -> Result<MemorySource<N>> {
        let dim = array.ncols();
        let array = if array.is_standard_layout() {
            array
        } else {
            array.as_standard_layout().into_owned()
        };
        MemorySource::from_vec(dim, array.into_raw_vec())
    }

    /// Borrow the data as a `size × dim` array view.
    pub fn view(&self) -> ArrayView2<'_, N> {
        let rows = self.data.len() / self.dim;
        ArrayView2::from_shape((rows, self.dim), &self.data).unwrap()
    }
}

impl<N: Numeric> VectorSource<N> for MemorySource<N> {
    fn dim(&self) -> usize {
        self.dim
    }

    fn size(&self) -> usize {
        self.data.len() / self.dim
    }

    fn get(&self, key: u32) -> Result<Cow<'_, [N]>> {
        let start = key as usize * self.dim;
        let row = self
            .data
            .get(start..start + self.dim)
            .ok_or_else(|| Error::Param(format!("vector key {} is out of range", key)))?;
        Ok(Cow::Borrowed(row))
    }
}
