//! Generic traits for the vector element type.
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::{LinalgScalar, ScalarOperand};
use num::{Float, FromPrimitive, NumCast, ToPrimitive};
use std::fmt::{Debug, Display};
use std::io::{self, Read, Write};
use std::ops::AddAssign;

/// Element type of database and query vectors.
///
/// The index stores projections and rotations in `f32` regardless of the
/// element type; `Numeric` carries the casts and the little-endian codec
/// used by the on-disk formats.
pub trait Numeric:
    LinalgScalar
    + ScalarOperand
    + Float
    + NumCast
    + ToPrimitive
    + FromPrimitive
    + AddAssign
    + Send
    + Sync
    + Debug
    + Display
{
    /// Width of one scalar on the wire, in bytes.
    const WIDTH: usize;

    /// Fill `out` with little-endian scalars read from `r`.
    fn read_slice<R: Read>(r: R, out: &mut [Self]) -> io::Result<()>;

    /// Write `xs` as little-endian scalars to `w`.
    fn write_slice<W: Write>(w: W, xs: &[Self]) -> io::Result<()>;
}

impl Numeric for f32 {
    const WIDTH: usize = 4;

    fn read_slice<R: Read>(mut r: R, out: &mut [Self]) -> io::Result<()> {
        r.read_f32_into::<LittleEndian>(out)
    }

    fn write_slice<W: Write>(mut w: W, xs: &[Self]) -> io::Result<()> {
        for &x in xs {
            w.write_f32::<LittleEndian>(x)?;
        }
        Ok(())
    }
}

impl Numeric for f64 {
    const WIDTH: usize = 8;

    fn read_slice<R: Read>(mut r: R, out: &mut [Self]) -> io::Result<()> {
        r.read_f64_into::<LittleEndian>(out)
    }

    fn write_slice<W: Write>(mut w: W, xs: &[Self]) -> io::Result<()> {
        for &x in xs {
            w.write_f64::<LittleEndian>(x)?;
        }
        Ok(())
    }
}
