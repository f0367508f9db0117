//! Multi-dimensional event records.
//!
//! Events are stored in the event region of a file as rows of `f64` columns. Each event
//! type declares its column layout through [`MdEvent::columns`], [`MdEvent::write_row`] and
//! [`MdEvent::read_row`].

use crate::{Error, Result};

/// An event record with a fixed number of dimensions.
pub trait MdEvent: Clone + Send + Sync {
    /// Number of dimensions of the event center.
    const NDIMS: usize;

    /// Name written to the `event_type` descriptor.
    fn type_name() -> &'static str;

    /// Number of `f64` columns per row in the event region.
    fn columns() -> usize;

    /// Event weight.
    fn signal(&self) -> f32;

    /// Squared error of the weight.
    fn error_squared(&self) -> f32;

    /// Coordinates of the event.
    fn center(&self) -> &[f32];

    /// Appends this event's columns to `row`.
    fn write_row(&self, row: &mut Vec<f64>);

    /// Decodes one row of [`MdEvent::columns`] values.
    ///
    /// # Errors
    /// Returns [`Error::EventDecode`] if the row has the wrong width or a value is out of
    /// range for its field.
    fn read_row(row: &[f64]) -> Result<Self>;
}

/// Lightweight event: weight, error and position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MdLeanEvent<const ND: usize> {
    pub signal: f32,
    pub error_squared: f32,
    pub center: [f32; ND],
}

impl<const ND: usize> MdLeanEvent<ND> {
    /// Creates a new lean event.
    #[must_use]
    pub fn new(signal: f32, error_squared: f32, center: [f32; ND]) -> Self {
        Self {
            signal,
            error_squared,
            center,
        }
    }
}

impl<const ND: usize> MdEvent for MdLeanEvent<ND> {
    const NDIMS: usize = ND;

    fn type_name() -> &'static str {
        "MDLeanEvent"
    }

    fn columns() -> usize {
        ND + 2
    }

    #[inline]
    fn signal(&self) -> f32 {
        self.signal
    }

    #[inline]
    fn error_squared(&self) -> f32 {
        self.error_squared
    }

    #[inline]
    fn center(&self) -> &[f32] {
        &self.center
    }

    fn write_row(&self, row: &mut Vec<f64>) {
        row.push(f64::from(self.signal));
        row.push(f64::from(self.error_squared));
        row.extend(self.center.iter().map(|&c| f64::from(c)));
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read_row(row: &[f64]) -> Result<Self> {
        check_width(row, Self::columns())?;
        let mut center = [0.0_f32; ND];
        for (dst, &src) in center.iter_mut().zip(&row[2..]) {
            *dst = src as f32;
        }
        Ok(Self {
            signal: row[0] as f32,
            error_squared: row[1] as f32,
            center,
        })
    }
}

/// Full event: adds the run and detector that recorded it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MdFullEvent<const ND: usize> {
    pub signal: f32,
    pub error_squared: f32,
    pub run_index: u16,
    pub detector_id: i32,
    pub center: [f32; ND],
}

impl<const ND: usize> MdFullEvent<ND> {
    /// Creates a new full event.
    #[must_use]
    pub fn new(
        signal: f32,
        error_squared: f32,
        run_index: u16,
        detector_id: i32,
        center: [f32; ND],
    ) -> Self {
        Self {
            signal,
            error_squared,
            run_index,
            detector_id,
            center,
        }
    }
}

impl<const ND: usize> MdEvent for MdFullEvent<ND> {
    const NDIMS: usize = ND;

    fn type_name() -> &'static str {
        "MDEvent"
    }

    fn columns() -> usize {
        ND + 4
    }

    #[inline]
    fn signal(&self) -> f32 {
        self.signal
    }

    #[inline]
    fn error_squared(&self) -> f32 {
        self.error_squared
    }

    #[inline]
    fn center(&self) -> &[f32] {
        &self.center
    }

    fn write_row(&self, row: &mut Vec<f64>) {
        row.push(f64::from(self.signal));
        row.push(f64::from(self.error_squared));
        row.push(f64::from(self.run_index));
        row.push(f64::from(self.detector_id));
        row.extend(self.center.iter().map(|&c| f64::from(c)));
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read_row(row: &[f64]) -> Result<Self> {
        check_width(row, Self::columns())?;
        let run_index = integral::<u16>(row[2], "run_index")?;
        let detector_id = integral::<i32>(row[3], "detector_id")?;
        let mut center = [0.0_f32; ND];
        for (dst, &src) in center.iter_mut().zip(&row[4..]) {
            *dst = src as f32;
        }
        Ok(Self {
            signal: row[0] as f32,
            error_squared: row[1] as f32,
            run_index,
            detector_id,
            center,
        })
    }
}

fn check_width(row: &[f64], expected: usize) -> Result<()> {
    if row.len() == expected {
        Ok(())
    } else {
        Err(Error::EventDecode(format!(
            "row has {} columns, expected {expected}",
            row.len()
        )))
    }
}

#[allow(clippy::cast_possible_truncation)]
fn integral<T: TryFrom<i64>>(value: f64, field: &str) -> Result<T> {
    if value.fract() != 0.0 || !value.is_finite() {
        return Err(Error::EventDecode(format!("{field} is not integral: {value}")));
    }
    T::try_from(value as i64)
        .map_err(|_| Error::EventDecode(format!("{field} out of range: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lean_event_row_layout() {
        let event = MdLeanEvent::new(2.0, 0.5, [1.0, 2.0, 3.0]);
        let mut row = Vec::new();
        event.write_row(&mut row);
        assert_eq!(row, vec![2.0, 0.5, 1.0, 2.0, 3.0]);
        assert_eq!(row.len(), MdLeanEvent::<3>::columns());
        assert_eq!(MdLeanEvent::<3>::read_row(&row).unwrap(), event);
    }

    #[test]
    fn test_full_event_row_layout() {
        let event = MdFullEvent::new(1.0, 1.0, 7, -3, [0.25, 0.75]);
        let mut row = Vec::new();
        event.write_row(&mut row);
        assert_eq!(row, vec![1.0, 1.0, 7.0, -3.0, 0.25, 0.75]);
        assert_eq!(MdFullEvent::<2>::read_row(&row).unwrap(), event);
    }

    #[test]
    fn test_read_row_rejects_wrong_width() {
        let err = MdLeanEvent::<3>::read_row(&[1.0, 1.0]).unwrap_err();
        assert!(matches!(err, Error::EventDecode(_)));
    }

    #[test]
    fn test_read_row_rejects_fractional_ids() {
        let err = MdFullEvent::<1>::read_row(&[1.0, 1.0, 0.5, 3.0, 0.0]).unwrap_err();
        assert!(matches!(err, Error::EventDecode(_)));

        let err = MdFullEvent::<1>::read_row(&[1.0, 1.0, 70_000.0, 3.0, 0.0]).unwrap_err();
        assert!(matches!(err, Error::EventDecode(_)));
    }
}
